//! Multiple choice question implementation
//!
//! This module implements the multiple choice question type. Players pick
//! one of a fixed set of options by index. Unlike a graded quiz, options
//! carry no correct flag: during scoring the host compares what the two
//! halves of each couple picked and awards points at their own judgement.

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

/// Configuration for a multiple choice round
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RoundConfig {
    /// The question text that will be displayed to players
    #[garde(length(max = crate::constants::question::MAX_TITLE_LENGTH))]
    title: String,
    /// The options players choose from
    #[garde(
        length(
            min = crate::constants::multiple_choice::MIN_OPTION_COUNT,
            max = crate::constants::multiple_choice::MAX_OPTION_COUNT
        ),
        inner(length(max = crate::constants::multiple_choice::MAX_OPTION_LENGTH))
    )]
    options: Vec<String>,
    /// Whether each submission must carry a pick for both partners
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

/// Runtime state for a multiple choice round during gameplay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// The configuration this state was created from
    config: RoundConfig,

    // Runtime state
    /// Answer bookkeeping for the live round (answers are option indices)
    submissions: Submissions<usize>,
    /// Current phase of the round
    phase: RoundPhase,
}

impl RoundConfig {
    /// Creates a new runtime state from this configuration
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

/// Update messages sent to participants during multiple choice rounds
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// Announces the question with its options and opens answering
    QuestionAnnouncement {
        /// Index of the current round (0-based)
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The question text being asked
        question: String,
        /// The options players choose from
        options: Vec<String>,
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
        answers: PossiblyHidden<Vec<RevealedAnswer<usize>>>,
    },
    /// The host revealed one player's pick
    AnswerRevealed(RevealedAnswer<usize>),
    /// The host sent the round back to answering
    ReturnedToAnswering,
}

/// Alarm messages for timed events in multiple choice rounds
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

/// Synchronization messages for participants joining during multiple choice rounds
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
        /// The options players choose from
        options: Vec<String>,
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
        /// The options players chose from
        options: Vec<String>,
    },
    /// Synchronizes the scoring phase
    Scoring {
        /// Index of the current round
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The question text being asked
        question: String,
        /// The options players chose from
        options: Vec<String>,
        /// The full answer sheet (hidden from players)
        answers: PossiblyHidden<Vec<RevealedAnswer<usize>>>,
        /// Answers the host has revealed so far
        revealed: Vec<RevealedAnswer<usize>>,
    },
}

impl State {
    /// Starts the round by announcing the question and opening answering
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
                    options: self.config.options.clone(),
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

    fn change_phase(&mut self, before: RoundPhase, after: RoundPhase) -> bool {
        if self.phase == before {
            self.phase = after;

            true
        } else {
            false
        }
    }

    fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Moves a player's submissions onto a fresh connection id
    pub fn reassign(&mut self, old: Id, new: Id) {
        self.submissions.reassign(old, new);
    }

    /// Handles a player's pick, validating the index range and shape
    fn submit_answer<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        answer: PairAnswer<usize>,
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
            .and_then(|()| common::validate_answer_indices(&answer, self.config.options.len()))
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

    fn close_answering<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watchers: &Watchers,
        tunnel_finder: F,
    ) {
        if self.change_phase(RoundPhase::Answering, RoundPhase::AllAnswersIn) {
            watchers.announce(&UpdateMessage::AllAnswersIn.into(), tunnel_finder);
        }
    }

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
            IncomingMessage::Player(IncomingPlayerMessage::IndexAnswer(index_answer)) => {
                self.submit_answer(
                    watcher_id,
                    PairAnswer::Single(index_answer),
                    watchers,
                    pairing,
                    tunnel_finder,
                );
                false
            }
            IncomingMessage::Player(IncomingPlayerMessage::IndexAnswerForBoth(subjects)) => {
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
                options: self.config.options.clone(),
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
                options: self.config.options.clone(),
            },
            RoundPhase::Scoring => SyncMessage::Scoring {
                index,
                count,
                question: self.config.title.clone(),
                options: self.config.options.clone(),
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

    struct MockTunnel;

    impl Tunnel for MockTunnel {
        fn send_message(&self, _message: &crate::UpdateMessage) {}

        fn send_state(&self, _state: &crate::SyncMessage) {}

        fn close(self) {}
    }

    fn create_config() -> RoundConfig {
        RoundConfig {
            title: "Who usually picks the restaurant?".to_string(),
            options: vec!["Me".to_string(), "My partner".to_string(), "Neither".to_string()],
            answer_for_both: false,
            points_awarded: 100,
            time_limit: None,
        }
    }

    fn create_room() -> (Watchers, PairingManager, Id, Id) {
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

        (watchers, pairing, alice, bob)
    }

    fn no_alarm(_message: crate::AlarmMessage, _duration: Duration) {}

    #[test]
    fn test_config_validation() {
        assert!(create_config().validate().is_ok());
    }

    #[test]
    fn test_config_too_few_options() {
        let mut config = create_config();
        config.options = vec!["Only one".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_too_many_options() {
        let mut config = create_config();
        config.options =
            vec!["Option".to_string(); crate::constants::multiple_choice::MAX_OPTION_COUNT + 1];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_option_too_long() {
        let mut config = create_config();
        config.options = vec![
            "a".repeat(crate::constants::multiple_choice::MAX_OPTION_LENGTH + 1),
            "fine".to_string(),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_pick_rejected() {
        let (watchers, pairing, alice, _) = create_room();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();
        let mut state = create_config().to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 0, 1);

        state.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::IndexAnswer(3)),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            1,
        );
        assert!(state.submissions.get(alice).is_none());

        state.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::IndexAnswer(2)),
            &mut scoreboard,
            &watchers,
            &pairing,
            no_alarm,
            tunnel,
            0,
            1,
        );
        assert_eq!(
            state.submissions.get(alice).unwrap().answer,
            PairAnswer::Single(2)
        );
    }

    #[test]
    fn test_everyone_picking_closes_answering() {
        let (watchers, pairing, alice, bob) = create_room();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();
        let mut state = create_config().to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 0, 1);
        for (id, pick) in [(alice, 0), (bob, 1)] {
            state.receive_message(
                id,
                IncomingMessage::Player(IncomingPlayerMessage::IndexAnswer(pick)),
                &mut scoreboard,
                &watchers,
                &pairing,
                no_alarm,
                tunnel,
                0,
                1,
            );
        }
        assert_eq!(state.phase, RoundPhase::AllAnswersIn);
    }

    #[test]
    fn test_resubmission_replaces_pick() {
        let (watchers, pairing, alice, _) = create_room();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();
        let mut state = create_config().to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 0, 1);
        for pick in [0, 2] {
            state.receive_message(
                alice,
                IncomingMessage::Player(IncomingPlayerMessage::IndexAnswer(pick)),
                &mut scoreboard,
                &watchers,
                &pairing,
                no_alarm,
                tunnel,
                0,
                1,
            );
        }
        assert_eq!(
            state.submissions.get(alice).unwrap().answer,
            PairAnswer::Single(2)
        );
    }

    #[test]
    fn test_sync_carries_options() {
        let (watchers, _, alice, _) = create_room();
        let mut state = create_config().to_state();
        let tunnel = |_id| Some(MockTunnel);

        state.play(&watchers, no_alarm, tunnel, 0, 1);

        match state.state_message(alice, ValueKind::Player, &watchers, tunnel, 0, 1) {
            SyncMessage::QuestionAnnouncement { options, .. } => {
                assert_eq!(options.len(), 3);
            }
            other => panic!("expected answering sync, got {other:?}"),
        }
    }
}
