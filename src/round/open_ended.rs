//! Open-ended question implementation
//!
//! This module implements the free-text question type. Open-ended rounds
//! ask a question that players answer in their own words; with
//! answer-for-both enabled, every submission must carry one answer per
//! partner, which is the staple format for guess-what-your-partner-said
//! rounds. There is no automatic grading: once all answers are in, the
//! host reveals them one by one and awards points at their own judgement.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    pairing::PairingManager,
    scoreboard::Scoreboard,
    session::Tunnel,
    watcher::{Id, ValueKind, Watchers},
};

use super::{
    super::game::{IncomingHostMessage, IncomingMessage, IncomingPlayerMessage},
    common::{self, PairAnswer, PossiblyHidden, RevealedAnswer, RoundPhase, Submissions},
};

/// Configuration for an open-ended round
///
/// This struct defines the parameters of a free-text question: the question
/// itself, whether submissions must cover both partners, the default award
/// for the host's point handouts, and an optional answering time limit.
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RoundConfig {
    /// The question text that will be displayed to players
    #[garde(length(max = crate::constants::question::MAX_TITLE_LENGTH))]
    title: String,
    /// Whether each submission must carry an answer for both partners
    #[garde(skip)]
    #[serde(default)]
    answer_for_both: bool,
    /// Default points handed out by an award without an explicit amount
    #[garde(range(max = crate::constants::tourney::MAX_POINTS_PER_AWARD))]
    points_awarded: u64,
    /// Optional limit on answering time
    #[garde(custom(common::validate_time_limit))]
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
    #[serde(default)]
    time_limit: Option<Duration>,
}

/// Runtime state for an open-ended round during gameplay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// The configuration this state was created from
    config: RoundConfig,

    // Runtime state
    /// Answer bookkeeping for the live round
    submissions: Submissions<String>,
    /// Current phase of the round
    phase: RoundPhase,
}

impl RoundConfig {
    /// Creates a new runtime state from this configuration
    ///
    /// # Returns
    ///
    /// A new `State` ready for gameplay
    pub fn to_state(&self) -> State {
        State {
            config: self.clone(),
            submissions: Submissions::default(),
            phase: RoundPhase::Unstarted,
        }
    }

    /// Returns the question text
    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Update messages sent to participants during open-ended rounds
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// Announces the question and opens answering
    QuestionAnnouncement {
        /// Index of the current round (0-based)
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The question text being asked
        question: String,
        /// Whether submissions must cover both partners
        answer_for_both: bool,
        /// Time before answering closes, when a limit is set
        #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
        duration: Option<Duration>,
    },
    /// (HOST ONLY) A player has submitted; carries the running count
    AnswerSubmitted {
        /// Name of the player who submitted
        name: String,
        /// Number of connected players who have submitted so far
        answered: usize,
    },
    /// Every connected player has submitted
    AllAnswersIn,
    /// Scoring has begun; the answer sheet is only visible to the host
    ScoringStarted {
        /// The full answer sheet (hidden from players)
        answers: PossiblyHidden<Vec<RevealedAnswer<String>>>,
    },
    /// The host revealed one player's answer
    AnswerRevealed(RevealedAnswer<String>),
    /// The host sent the round back to answering
    ReturnedToAnswering,
}

/// Alarm messages for timed events in open-ended rounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Triggers a transition from one round phase to another
    ProceedFromPhaseIntoPhase {
        /// Index of the round being transitioned
        index: usize,
        /// Target phase to transition to
        to: RoundPhase,
    },
}

/// Synchronization messages for participants joining during open-ended rounds
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum SyncMessage {
    /// Synchronizes the answering phase
    QuestionAnnouncement {
        /// Index of the current round
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The question text being asked
        question: String,
        /// Whether submissions must cover both partners
        answer_for_both: bool,
        /// Remaining time before answering closes, when a limit is set
        #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
        duration: Option<Duration>,
        /// Number of connected players who have submitted
        answered_count: usize,
        /// Whether the recipient has submitted in this phase
        you_submitted: bool,
    },
    /// Synchronizes the all-answers-in screen
    AllAnswersIn {
        /// Index of the current round
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The question text being asked
        question: String,
    },
    /// Synchronizes the scoring phase
    Scoring {
        /// Index of the current round
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The question text being asked
        question: String,
        /// The full answer sheet (hidden from players)
        answers: PossiblyHidden<Vec<RevealedAnswer<String>>>,
        /// Answers the host has revealed so far
        revealed: Vec<RevealedAnswer<String>>,
    },
}

impl State {
    /// Starts the round by announcing the question and opening answering
    ///
    /// # Arguments
    ///
    /// * `watchers` - Connection manager for all participants
    /// * `schedule_message` - Function to schedule delayed messages for timing
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    /// * `index` - Current round index in the deck
    /// * `count` - Total number of rounds in the deck
    pub fn play<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        watchers: &Watchers,
        mut schedule_message: S,
        tunnel_finder: F,
        index: usize,
        count: usize,
    ) {
        if self.change_phase(RoundPhase::Unstarted, RoundPhase::Answering) {
            self.submissions.start_timer();

            watchers.announce(
                &UpdateMessage::QuestionAnnouncement {
                    index,
                    count,
                    question: self.config.title.clone(),
                    answer_for_both: self.config.answer_for_both,
                    duration: self.config.time_limit,
                }
                .into(),
                tunnel_finder,
            );

            if let Some(limit) = self.config.time_limit {
                schedule_message(
                    AlarmMessage::ProceedFromPhaseIntoPhase {
                        index,
                        to: RoundPhase::AllAnswersIn,
                    }
                    .into(),
                    limit,
                );
            }
        }
    }

    /// Attempts to transition from one round phase to another
    ///
    /// # Arguments
    ///
    /// * `before` - Expected current phase
    /// * `after` - Target phase to transition to
    ///
    /// # Returns
    ///
    /// `true` if the transition was performed, `false` if the current phase
    /// didn't match
    fn change_phase(&mut self, before: RoundPhase, after: RoundPhase) -> bool {
        if self.phase == before {
            self.phase = after;

            true
        } else {
            false
        }
    }

    /// Returns the current phase of the round
    fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Moves a player's submissions onto a fresh connection id
    pub fn reassign(&mut self, old: Id, new: Id) {
        self.submissions.reassign(old, new);
    }

    /// Handles a player's submission
    ///
    /// Validates the payload, records it (replacing any earlier submission),
    /// notifies the host, and closes answering once every connected player
    /// is in.
    fn submit_answer<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        answer: PairAnswer<String>,
        watchers: &Watchers,
        pairing: &PairingManager,
        tunnel_finder: F,
    ) {
        let validation = if matches!(self.phase(), RoundPhase::Answering) {
            common::validate_answer_shape(
                &answer,
                watcher_id,
                self.config.answer_for_both,
                watchers,
                pairing,
            )
            .and_then(|()| common::validate_answer_texts(&answer))
        } else {
            Err(common::AnswerError::Closed)
        };

        if let Err(error) = validation {
            watchers.send_message(
                &crate::game::UpdateMessage::AnswerRejected(error).into(),
                watcher_id,
                tunnel_finder,
            );
            return;
        }

        self.submissions.submit(watcher_id, answer);

        if let Some(name) = watchers.get_name(watcher_id) {
            watchers.announce_specific(
                ValueKind::Host,
                &UpdateMessage::AnswerSubmitted {
                    name,
                    answered: self.submissions.submitted_count(watchers, &tunnel_finder),
                }
                .into(),
                &tunnel_finder,
            );
        }

        if self.submissions.everyone_submitted(watchers, &tunnel_finder) {
            self.close_answering(watchers, tunnel_finder);
        }
    }

    /// Closes the answering phase and announces all-answers-in
    fn close_answering<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watchers: &Watchers,
        tunnel_finder: F,
    ) {
        if self.change_phase(RoundPhase::Answering, RoundPhase::AllAnswersIn) {
            watchers.announce(&UpdateMessage::AllAnswersIn.into(), tunnel_finder);
        }
    }

    /// Moves to the scoring phase, handing the host the full answer sheet
    fn begin_scoring<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watchers: &Watchers,
        tunnel_finder: F,
    ) {
        if self.change_phase(RoundPhase::AllAnswersIn, RoundPhase::Scoring) {
            watchers.announce_with(
                |_, kind| match kind {
                    ValueKind::Host => Some(
                        UpdateMessage::ScoringStarted {
                            answers: PossiblyHidden::Visible(
                                self.submissions.entries(watchers, false),
                            ),
                        }
                        .into(),
                    ),
                    ValueKind::Player => Some(
                        UpdateMessage::ScoringStarted {
                            answers: PossiblyHidden::Hidden,
                        }
                        .into(),
                    ),
                    ValueKind::Unassigned => None,
                },
                tunnel_finder,
            );
        }
    }

    /// Reveals the answer of the player going by the given name
    fn reveal_answer<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player_name: &str,
        watchers: &Watchers,
        tunnel_finder: F,
    ) {
        if !matches!(self.phase(), RoundPhase::Scoring) {
            return;
        }

        let Some(player_id) = watchers
            .specific_all(ValueKind::Player)
            .into_iter()
            .find(|(_, value)| {
                matches!(value, crate::watcher::Value::Player(p) if p.name() == player_name)
            })
            .map(|(id, _)| id)
        else {
            return;
        };

        if let Some(submitted) = self.submissions.reveal(player_id) {
            watchers.announce(
                &UpdateMessage::AnswerRevealed(RevealedAnswer {
                    name: player_name.to_owned(),
                    answer: submitted.answer,
                    response_time: submitted.response_time,
                })
                .into(),
                tunnel_finder,
            );
        }
    }

    /// Sends the round back to answering, wiping the round's awards
    fn reopen<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        scoreboard: &mut Scoreboard,
        watchers: &Watchers,
        mut schedule_message: S,
        tunnel_finder: F,
        index: usize,
    ) {
        if self.change_phase(RoundPhase::Scoring, RoundPhase::Answering) {
            scoreboard.clear_current_round();
            self.submissions.reopen();

            watchers.announce(&UpdateMessage::ReturnedToAnswering.into(), &tunnel_finder);

            if let Some(limit) = self.config.time_limit {
                schedule_message(
                    AlarmMessage::ProceedFromPhaseIntoPhase {
                        index,
                        to: RoundPhase::AllAnswersIn,
                    }
                    .into(),
                    limit,
                );
            }
        }
    }

    /// Processes an incoming message for this round
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - ID of the participant sending the message
    /// * `message` - The incoming message to process
    /// * `scoreboard` - The room's scoreboard for awards and re-scores
    /// * `watchers` - Connection manager for all participants
    /// * `pairing` - Couple membership
    /// * `schedule_message` - Function to schedule delayed messages for timing
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    /// * `index` - Current round index in the deck
    /// * `count` - Total number of rounds in the deck
    ///
    /// # Returns
    ///
    /// `true` if the round is complete and the game should move on
    pub fn receive_message<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(crate::AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        message: IncomingMessage,
        scoreboard: &mut Scoreboard,
        watchers: &Watchers,
        pairing: &PairingManager,
        schedule_message: S,
        tunnel_finder: F,
        index: usize,
        _count: usize,
    ) -> bool {
        match message {
            IncomingMessage::Player(IncomingPlayerMessage::TextAnswer(answer)) => {
                self.submit_answer(
                    watcher_id,
                    PairAnswer::Single(answer),
                    watchers,
                    pairing,
                    tunnel_finder,
                );
                false
            }
            IncomingMessage::Player(IncomingPlayerMessage::TextAnswerForBoth(subjects)) => {
                self.submit_answer(
                    watcher_id,
                    PairAnswer::ForBoth(subjects),
                    watchers,
                    pairing,
                    tunnel_finder,
                );
                false
            }
            IncomingMessage::Host(IncomingHostMessage::Next) => match self.phase() {
                RoundPhase::Unstarted => false,
                RoundPhase::Answering => {
                    self.close_answering(watchers, tunnel_finder);
                    false
                }
                RoundPhase::AllAnswersIn => {
                    self.begin_scoring(watchers, tunnel_finder);
                    false
                }
                RoundPhase::Scoring => true,
            },
            IncomingMessage::Host(IncomingHostMessage::Reveal(player_name)) => {
                self.reveal_answer(&player_name, watchers, tunnel_finder);
                false
            }
            IncomingMessage::Host(IncomingHostMessage::Award { team, points }) => {
                if matches!(self.phase(), RoundPhase::Scoring) {
                    common::award_points(
                        team,
                        points,
                        self.config.points_awarded,
                        scoreboard,
                        pairing,
                        watchers,
                        tunnel_finder,
                    );
                }
                false
            }
            IncomingMessage::Host(IncomingHostMessage::Reopen) => {
                self.reopen(scoreboard, watchers, schedule_message, tunnel_finder, index);
                false
            }
            _ => false,
        }
    }

    /// Processes a scheduled alarm message for this round
    ///
    /// # Arguments
    ///
    /// * `watchers` - Connection manager for all participants
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    /// * `message` - The alarm message being processed
    /// * `index` - Current round index in the deck
    ///
    /// # Returns
    ///
    /// `true` if the round is complete and the game should move on
    pub fn receive_alarm<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watchers: &Watchers,
        tunnel_finder: F,
        message: AlarmMessage,
        index: usize,
    ) -> bool {
        match message {
            AlarmMessage::ProceedFromPhaseIntoPhase {
                index: round_index,
                to: RoundPhase::AllAnswersIn,
            } if round_index == index => {
                self.close_answering(watchers, tunnel_finder);
            }
            _ => (),
        }
        false
    }

    /// Generates a synchronization message for a participant joining mid-round
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - ID of the participant to synchronize
    /// * `watcher_kind` - Type of participant (host, player, unassigned)
    /// * `watchers` - Connection manager for all participants
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    /// * `index` - Current round index in the deck
    /// * `count` - Total number of rounds in the deck
    ///
    /// # Returns
    ///
    /// A `SyncMessage` appropriate for the current phase and participant type
    pub fn state_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: Id,
        watcher_kind: ValueKind,
        watchers: &Watchers,
        tunnel_finder: F,
        index: usize,
        count: usize,
    ) -> SyncMessage {
        match self.phase() {
            RoundPhase::Unstarted | RoundPhase::Answering => SyncMessage::QuestionAnnouncement {
                index,
                count,
                question: self.config.title.clone(),
                answer_for_both: self.config.answer_for_both,
                duration: self
                    .config
                    .time_limit
                    .map(|limit| self.submissions.remaining(limit)),
                answered_count: self.submissions.submitted_count(watchers, &tunnel_finder),
                you_submitted: self.submissions.has_submitted(watcher_id),
            },
            RoundPhase::AllAnswersIn => SyncMessage::AllAnswersIn {
                index,
                count,
                question: self.config.title.clone(),
            },
            RoundPhase::Scoring => SyncMessage::Scoring {
                index,
                count,
                question: self.config.title.clone(),
                answers: match watcher_kind {
                    ValueKind::Host => {
                        PossiblyHidden::Visible(self.submissions.entries(watchers, false))
                    }
                    ValueKind::Player | ValueKind::Unassigned => PossiblyHidden::Hidden,
                },
                revealed: self.submissions.entries(watchers, true),
            },
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{names::Names, watcher::PlayerValue};
    use std::collections::BTreeMap;

    struct MockTunnel;

    impl Tunnel for MockTunnel {
        fn send_message(&self, _message: &crate::UpdateMessage) {}

        fn send_state(&self, _state: &crate::SyncMessage) {}

        fn close(self) {}
    }

    fn create_config(answer_for_both: bool) -> RoundConfig {
        RoundConfig {
            title: "What is your partner's favorite food?".to_string(),
            answer_for_both,
            points_awarded: 100,
            time_limit: None,
        }
    }

    fn create_room() -> (Watchers, Names, PairingManager, Id, Id) {
        let mut watchers = Watchers::with_host_id(Id::new());
        let mut names = Names::default();
        let mut pairing = PairingManager::new(None);

        let mut add = |watchers: &mut Watchers, names: &mut Names, name: &str| {
            let id = Id::new();
            names.set_name(id, name).unwrap();
            watchers
                .add_watcher(
                    id,
                    crate::watcher::Value::Player(PlayerValue::Solo {
                        name: name.to_owned(),
                        avatar: String::new(),
                    }),
                )
                .unwrap();
            id
        };

        let alice = add(&mut watchers, &mut names, "Alice");
        let bob = add(&mut watchers, &mut names, "Bob");
        pairing.request(alice, bob, &mut watchers, &mut names).unwrap();
        pairing.request(bob, alice, &mut watchers, &mut names).unwrap();

        (watchers, names, pairing, alice, bob)
    }

    fn no_alarm(_message: crate::AlarmMessage, _duration: Duration) {}

    #[test]
    fn test_config_validation() {
        let config = create_config(false);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_title_too_long() {
        let mut config = create_config(false);
        config.title = "a".repeat(crate::constants::question::MAX_TITLE_LENGTH + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_time_limit_out_of_bounds() {
        let mut config = create_config(false);
        config.time_limit = Some(Duration::from_secs(1));
        assert!(config.validate().is_err());

        config.time_limit = Some(Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_state_starts_unstarted() {
        let state = create_config(false).to_state();
        assert_eq!(state.phase, RoundPhase::Unstarted);
    }

    #[test]
    fn test_play_opens_answering() {
        let (watchers, _, _, _, _) = create_room();
        let mut state = create_config(false).to_state();

        state.play(&watchers, no_alarm, |_| Some(MockTunnel), 0, 3);
        assert_eq!(state.phase, RoundPhase::Answering);

        // playing twice is a no-op
        state.play(&watchers, no_alarm, |_| Some(MockTunnel), 0, 3);
        assert_eq!(state.phase, RoundPhase::Answering);
    }

    #[test]
    fn test_play_schedules_alarm_for_time_limit() {
        let (watchers, _, _, _, _) = create_room();
        let mut config = create_config(false);
        config.time_limit = Some(Duration::from_secs(30));
        let mut state = config.to_state();

        let mut scheduled = Vec::new();
        state.play(
            &watchers,
            |message, duration| scheduled.push((message, duration)),
            |_| Some(MockTunnel),
            0,
            3,
        );

        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].1, Duration::from_secs(30));
    }

    #[test]
    fn test_all_answers_in_when_everyone_submits() {
        let (watchers, _, pairing, alice, bob) = create_room();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();
        let mut state = create_config(false).to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 0, 3);

        let complete = state.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::TextAnswer("pizza".to_owned())),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert!(!complete);
        assert_eq!(state.phase, RoundPhase::Answering);

        state.receive_message(
            bob,
            IncomingMessage::Player(IncomingPlayerMessage::TextAnswer("sushi".to_owned())),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert_eq!(state.phase, RoundPhase::AllAnswersIn);
    }

    #[test]
    fn test_joint_answer_required() {
        let (watchers, _, pairing, alice, _) = create_room();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();
        let mut state = create_config(true).to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 0, 3);

        state.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::TextAnswer("pizza".to_owned())),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert!(state.submissions.get(alice).is_none());

        state.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::TextAnswerForBoth(BTreeMap::from([
                ("Alice".to_owned(), "pizza".to_owned()),
                ("Bob".to_owned(), "sushi".to_owned()),
            ]))),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert!(state.submissions.get(alice).is_some());
    }

    #[test]
    fn test_host_advances_phases_and_completes() {
        let (watchers, _, pairing, alice, bob) = create_room();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();
        let mut state = create_config(false).to_state();
        let tunnel = |_id| Some(MockTunnel);
        let host_next = || IncomingMessage::Host(IncomingHostMessage::Next);

        state.play(&watchers, no_alarm, tunnel, 0, 3);
        for (id, answer) in [(alice, "pizza"), (bob, "sushi")] {
            state.receive_message(
                id,
                IncomingMessage::Player(IncomingPlayerMessage::TextAnswer(answer.to_owned())),
                &mut scoreboard,
                &watchers,
                &pairing,
                no_alarm,
                tunnel,
                0,
                3,
            );
        }

        let complete = state.receive_message(
            Id::new(),
            host_next(),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert!(!complete);
        assert_eq!(state.phase, RoundPhase::Scoring);

        let complete = state.receive_message(
            Id::new(),
            host_next(),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert!(complete);
    }

    #[test]
    fn test_award_only_during_scoring() {
        let (watchers, _, pairing, alice, _) = create_room();
        let team = pairing.team_of(alice).unwrap();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();
        let mut state = create_config(false).to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 0, 3);
        state.receive_message(
            Id::new(),
            IncomingMessage::Host(IncomingHostMessage::Award { team, points: None }),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert!(scoreboard.score(team).is_none());

        state.close_answering(&watchers, tunnel);
        state.begin_scoring(&watchers, tunnel);
        state.receive_message(
            Id::new(),
            IncomingMessage::Host(IncomingHostMessage::Award { team, points: None }),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert_eq!(scoreboard.score(team).unwrap().points, 100);
    }

    #[test]
    fn test_reopen_resets_phase_and_awards() {
        let (watchers, _, pairing, alice, bob) = create_room();
        let team = pairing.team_of(alice).unwrap();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();
        let mut state = create_config(false).to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 0, 3);
        for (id, answer) in [(alice, "pizza"), (bob, "sushi")] {
            state.receive_message(
                id,
                IncomingMessage::Player(IncomingPlayerMessage::TextAnswer(answer.to_owned())),
                &mut scoreboard,
                &watchers,
                &pairing,
                no_alarm,
                tunnel,
                0,
                3,
            );
        }
        state.begin_scoring(&watchers, tunnel);
        state.receive_message(
            Id::new(),
            IncomingMessage::Host(IncomingHostMessage::Reveal("Alice".to_owned())),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert!(state.submissions.is_revealed(alice));

        common::award_points(team, Some(50), 0, &mut scoreboard, &pairing, &watchers, tunnel);
        assert_eq!(scoreboard.score(team).unwrap().points, 50);

        state.receive_message(
            Id::new(),
            IncomingMessage::Host(IncomingHostMessage::Reopen),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );

        assert_eq!(state.phase, RoundPhase::Answering);
        assert!(!state.submissions.is_revealed(alice));
        assert!(!state.submissions.has_submitted(alice));
        assert_eq!(scoreboard.score(team).unwrap().points, 0);
        // earlier answers survive for resubmission
        assert!(state.submissions.get(alice).is_some());
    }

    #[test]
    fn test_alarm_closes_answering() {
        let (watchers, _, _, _, _) = create_room();
        let mut state = create_config(false).to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 2, 3);

        // alarm for a different round is ignored
        state.receive_alarm(
            &watchers,
            tunnel,
            AlarmMessage::ProceedFromPhaseIntoPhase {
                index: 0,
                to: RoundPhase::AllAnswersIn,
            },
            2,
        );
        assert_eq!(state.phase, RoundPhase::Answering);

        state.receive_alarm(
            &watchers,
            tunnel,
            AlarmMessage::ProceedFromPhaseIntoPhase {
                index: 2,
                to: RoundPhase::AllAnswersIn,
            },
            2,
        );
        assert_eq!(state.phase, RoundPhase::AllAnswersIn);
    }

    #[test]
    fn test_state_message_per_phase() {
        let (watchers, _, pairing, alice, bob) = create_room();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();
        let mut state = create_config(false).to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 0, 3);
        state.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::TextAnswer("pizza".to_owned())),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );

        match state.state_message(alice, ValueKind::Player, &watchers, tunnel, 0, 3) {
            SyncMessage::QuestionAnnouncement {
                answered_count,
                you_submitted,
                ..
            } => {
                assert_eq!(answered_count, 1);
                assert!(you_submitted);
            }
            other => panic!("expected answering sync, got {other:?}"),
        }

        state.receive_message(
            bob,
            IncomingMessage::Player(IncomingPlayerMessage::TextAnswer("sushi".to_owned())),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            3,
        );
        assert!(matches!(
            state.state_message(alice, ValueKind::Player, &watchers, tunnel, 0, 3),
            SyncMessage::AllAnswersIn { .. }
        ));

        state.begin_scoring(&watchers, tunnel);
        match state.state_message(alice, ValueKind::Player, &watchers, tunnel, 0, 3) {
            SyncMessage::Scoring {
                answers, revealed, ..
            } => {
                assert!(matches!(answers, PossiblyHidden::Hidden));
                assert!(revealed.is_empty());
            }
            other => panic!("expected scoring sync, got {other:?}"),
        }

        match state.state_message(Id::new(), ValueKind::Host, &watchers, tunnel, 0, 3) {
            SyncMessage::Scoring { answers, .. } => match answers {
                PossiblyHidden::Visible(sheet) => assert_eq!(sheet.len(), 2),
                PossiblyHidden::Hidden => panic!("host should see the sheet"),
            },
            other => panic!("expected scoring sync, got {other:?}"),
        }
    }
}
