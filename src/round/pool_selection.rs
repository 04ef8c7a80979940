//! Pool selection question implementation
//!
//! This module implements the pick-a-name question type ("which couple is
//! most likely to..."). The option pool is not configured up front: it is
//! a snapshot of the live roster, either every player name or every couple
//! name, taken the moment the round opens. Submissions are validated
//! against that snapshot, so roster churn mid-round cannot invalidate an
//! answer that was legal when the question was asked.

use std::time::Duration;

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    pairing::PairingManager,
    scoreboard::Scoreboard,
    session::Tunnel,
    watcher::{Id, Value, ValueKind, Watchers},
};

use super::{
    super::game::{IncomingHostMessage, IncomingMessage, IncomingPlayerMessage},
    common::{self, PairAnswer, PossiblyHidden, RevealedAnswer, RoundPhase, Submissions},
};

/// Where the option pool of a pool selection round is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolSource {
    /// The pool contains every player's name
    Players,
    /// The pool contains every couple's name
    Teams,
}

/// Configuration for a pool selection round
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RoundConfig {
    /// The question text that will be displayed to players
    #[garde(length(max = crate::constants::question::MAX_TITLE_LENGTH))]
    title: String,
    /// Where the option pool is drawn from
    #[garde(skip)]
    source: PoolSource,
    /// Whether each submission must carry a selection for both partners
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

/// Runtime state for a pool selection round during gameplay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// The configuration this state was created from
    config: RoundConfig,

    // Runtime state
    /// The option pool snapshotted when the round opened
    pool: Vec<String>,
    /// Answer bookkeeping for the live round (answers are pool members)
    submissions: Submissions<String>,
    /// Current phase of the round
    phase: RoundPhase,
}

impl RoundConfig {
    /// Creates a new runtime state from this configuration
    ///
    /// The pool starts empty; it is snapshotted from the roster when the
    /// round is played.
    pub fn to_state(&self) -> State {
        State {
            config: self.clone(),
            pool: Vec::new(),
            submissions: Submissions::default(),
            phase: RoundPhase::Unstarted,
        }
    }

    /// Returns the question text
    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Update messages sent to participants during pool selection rounds
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// Announces the question with its pool and opens answering
    QuestionAnnouncement {
        /// Index of the current round (0-based)
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The question text being asked
        question: String,
        /// The names players select from
        pool: Vec<String>,
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
    /// The host revealed one player's selection
    AnswerRevealed(RevealedAnswer<String>),
    /// The host sent the round back to answering
    ReturnedToAnswering,
}

/// Alarm messages for timed events in pool selection rounds
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

/// Synchronization messages for participants joining during pool selection rounds
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
        /// The names players select from
        pool: Vec<String>,
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
        /// The names players selected from
        pool: Vec<String>,
    },
    /// Synchronizes the scoring phase
    Scoring {
        /// Index of the current round
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The question text being asked
        question: String,
        /// The names players selected from
        pool: Vec<String>,
        /// The full answer sheet (hidden from players)
        answers: PossiblyHidden<Vec<RevealedAnswer<String>>>,
        /// Answers the host has revealed so far
        revealed: Vec<RevealedAnswer<String>>,
    },
}

impl State {
    /// Snapshots the option pool from the current roster
    fn snapshot_pool(&self, watchers: &Watchers, pairing: &PairingManager) -> Vec<String> {
        match self.config.source {
            PoolSource::Players => watchers
                .specific_all(ValueKind::Player)
                .into_iter()
                .filter_map(|(_, value)| match value {
                    Value::Player(player_value) => Some(player_value.name().to_owned()),
                    _ => None,
                })
                .sorted()
                .dedup()
                .collect_vec(),
            PoolSource::Teams => pairing
                .all_ids()
                .into_iter()
                .filter_map(|team_id| pairing.team_name(team_id))
                .sorted()
                .collect_vec(),
        }
    }

    /// Starts the round: snapshots the pool, announces, opens answering
    pub fn play<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        watchers: &Watchers,
        pairing: &PairingManager,
        mut schedule_message: S,
        tunnel_finder: F,
        index: usize,
        count: usize,
    ) {
        if self.change_phase(RoundPhase::Unstarted, RoundPhase::Answering) {
            self.pool = self.snapshot_pool(watchers, pairing);
            self.submissions.start_timer();

            watchers.announce(
                &UpdateMessage::QuestionAnnouncement {
                    index,
                    count,
                    question: self.config.title.clone(),
                    pool: self.pool.clone(),
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

    /// Handles a player's selection, validating pool membership
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
            .and_then(|()| common::validate_answer_in_pool(&answer, &self.pool))
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
                matches!(value, Value::Player(p) if p.name() == player_name)
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
                pool: self.pool.clone(),
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
                pool: self.pool.clone(),
            },
            RoundPhase::Scoring => SyncMessage::Scoring {
                index,
                count,
                question: self.config.title.clone(),
                pool: self.pool.clone(),
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
