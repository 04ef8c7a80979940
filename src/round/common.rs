//! Shared building blocks for round variants
//!
//! This module contains the pieces common to every question variant: the
//! phase machine a round moves through, the joint-answer payload used when
//! a question asks both partners to answer, submission bookkeeping with
//! response times, and helpers for award handling and validation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

use crate::{
    pairing::PairingManager,
    scoreboard::Scoreboard,
    session::Tunnel,
    watcher::{Id, ValueKind, Watchers},
};

/// The phases a round moves through while it is live
///
/// Rounds are host-driven: answering closes either when every connected
/// player has submitted, when an optional time limit expires, or when the
/// host forces it. Scoring can be left back towards answering through the
/// reopen action.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoundPhase {
    /// Initial state before the round has started
    #[default]
    Unstarted,
    /// Players are submitting answers
    Answering,
    /// Every answer is in; waiting for the host to start scoring
    AllAnswersIn,
    /// The host is revealing answers and awarding points
    Scoring,
}

/// An answer payload that either covers the submitter alone or both partners
///
/// Questions flagged as answer-for-both expect one submission per player
/// that carries an answer for each half of the couple, keyed by the
/// partners' names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairAnswer<T> {
    /// A single answer for the submitting player
    Single(T),
    /// One answer per partner, keyed by player name
    ForBoth(BTreeMap<String, T>),
}

/// A recorded submission together with how long the player took
///
/// The response time is measured from the moment the answering phase was
/// last opened, so reopened rounds measure from the reopen.
#[serde_with::serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedAnswer<T> {
    /// The submitted payload
    pub answer: PairAnswer<T>,
    /// Elapsed time between the phase opening and the submission
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub response_time: Duration,
}

/// A revealed answer as broadcast to every participant
#[serde_with::serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct RevealedAnswer<T> {
    /// Name of the player the answer belongs to
    pub name: String,
    /// The revealed payload
    pub answer: PairAnswer<T>,
    /// How long the player took to submit
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub response_time: Duration,
}

/// Utility type for conditionally hiding content based on viewer permissions
///
/// This enum allows content to be visible to some participants (like the
/// host's answer sheet during scoring) while being hidden from others
/// until the host reveals it.
#[derive(Debug, Serialize, Clone)]
pub enum PossiblyHidden<T> {
    /// Content is visible to the recipient
    Visible(T),
    /// Content is hidden from the recipient
    Hidden,
}

/// Reasons a submission can be rejected
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerError {
    /// The round is not currently accepting answers
    #[error("answers are not being accepted right now")]
    Closed,
    /// The question expects one answer per partner
    #[error("a joint answer covering both partners is required")]
    ExpectedJoint,
    /// The question expects a single answer
    #[error("an individual answer is required")]
    ExpectedIndividual,
    /// A joint answer did not cover exactly the two partners
    #[error("joint answers must cover exactly the two partners")]
    WrongSubjects,
    /// The submitter is not part of a couple
    #[error("you must be paired to answer this question")]
    NotPaired,
    /// An option index was out of range
    #[error("that option does not exist")]
    OutOfRange,
    /// A selection was not part of the round's pool
    #[error("that choice is not in the pool")]
    NotInPool,
    /// A free-text answer exceeded the length limit
    #[error("answer is too long")]
    TooLong,
}

/// Bookkeeping for the answers of one live round
///
/// Keeps every submission (resubmissions replace), the set of players who
/// submitted since the answering phase last opened, the set of revealed
/// answers, and the phase timer. Reopening keeps the answers but resets
/// the per-phase sets and the timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submissions<T> {
    /// Latest submission per player
    answers: HashMap<Id, SubmittedAnswer<T>>,
    /// Players who submitted since answering was last opened
    submitted_in_current_phase: HashSet<Id>,
    /// Players whose answers the host has revealed
    revealed: HashSet<Id>,
    /// When the answering phase was last opened
    answer_start: Option<SystemTime>,
}

impl<T> Default for Submissions<T> {
    fn default() -> Self {
        Self {
            answers: HashMap::new(),
            submitted_in_current_phase: HashSet::new(),
            revealed: HashSet::new(),
            answer_start: None,
        }
    }
}

impl<T: Clone> Submissions<T> {
    /// Starts (or restarts) the phase timer
    pub fn start_timer(&mut self) {
        self.answer_start = Some(SystemTime::now());
    }

    /// Returns the elapsed time since the phase timer started
    pub fn elapsed(&self) -> Duration {
        self.answer_start
            .and_then(|start| start.elapsed().ok())
            .unwrap_or_default()
    }

    /// Returns the remaining time out of a limit, saturating at zero
    pub fn remaining(&self, limit: Duration) -> Duration {
        limit.saturating_sub(self.elapsed())
    }

    /// Records a submission, replacing any earlier one by the same player
    ///
    /// # Arguments
    ///
    /// * `player` - The submitting player
    /// * `answer` - The validated payload
    ///
    /// # Returns
    ///
    /// The recorded submission with its response time
    pub fn submit(&mut self, player: Id, answer: PairAnswer<T>) -> SubmittedAnswer<T> {
        let submitted = SubmittedAnswer {
            answer,
            response_time: self.elapsed(),
        };
        self.answers.insert(player, submitted.clone());
        self.submitted_in_current_phase.insert(player);
        submitted
    }

    /// Resets the per-phase bookkeeping when a round reopens for answering
    ///
    /// Answers persist so players do not have to retype everything; the
    /// submitted-in-current-phase set, the revealed set, and the timer
    /// start over.
    pub fn reopen(&mut self) {
        self.submitted_in_current_phase.clear();
        self.revealed.clear();
        self.start_timer();
    }

    /// Marks a player's answer as revealed
    ///
    /// # Arguments
    ///
    /// * `player` - The player whose answer the host revealed
    ///
    /// # Returns
    ///
    /// The revealed submission, or `None` if the player never answered
    pub fn reveal(&mut self, player: Id) -> Option<SubmittedAnswer<T>> {
        let submitted = self.answers.get(&player)?.clone();
        self.revealed.insert(player);
        Some(submitted)
    }

    /// Checks whether a player's answer has been revealed
    pub fn is_revealed(&self, player: Id) -> bool {
        self.revealed.contains(&player)
    }

    /// Gets a player's latest submission
    pub fn get(&self, player: Id) -> Option<&SubmittedAnswer<T>> {
        self.answers.get(&player)
    }

    /// Iterates over every recorded submission
    pub fn iter(&self) -> impl Iterator<Item = (&Id, &SubmittedAnswer<T>)> {
        self.answers.iter()
    }

    /// Checks whether a player submitted since answering last opened
    pub fn has_submitted(&self, player: Id) -> bool {
        self.submitted_in_current_phase.contains(&player)
    }

    /// Counts the connected players who submitted since answering opened
    ///
    /// # Arguments
    ///
    /// * `watchers` - Participant registry
    /// * `tunnel_finder` - Function to find tunnels for participants
    pub fn submitted_count<U: Tunnel, F: Fn(Id) -> Option<U>>(
        &self,
        watchers: &Watchers,
        tunnel_finder: F,
    ) -> usize {
        watchers
            .specific_vec(ValueKind::Player, tunnel_finder)
            .iter()
            .filter(|(id, _, _)| self.submitted_in_current_phase.contains(id))
            .count()
    }

    /// Checks whether every connected player submitted since answering opened
    ///
    /// Disconnected players do not hold the round up; if they reconnect
    /// before scoring they can still submit.
    ///
    /// # Arguments
    ///
    /// * `watchers` - Participant registry
    /// * `tunnel_finder` - Function to find tunnels for participants
    pub fn everyone_submitted<U: Tunnel, F: Fn(Id) -> Option<U>>(
        &self,
        watchers: &Watchers,
        tunnel_finder: F,
    ) -> bool {
        let players = watchers.specific_vec(ValueKind::Player, tunnel_finder);
        !players.is_empty()
            && players
                .iter()
                .all(|(id, _, _)| self.submitted_in_current_phase.contains(id))
    }

    /// Moves a player's submission records onto a fresh connection id
    ///
    /// Used during reconnection so a reclaimed identity keeps its answer.
    ///
    /// # Arguments
    ///
    /// * `old` - The stale connection id
    /// * `new` - The fresh connection id
    pub fn reassign(&mut self, old: Id, new: Id) {
        if let Some(answer) = self.answers.remove(&old) {
            self.answers.insert(new, answer);
        }
        if self.submitted_in_current_phase.remove(&old) {
            self.submitted_in_current_phase.insert(new);
        }
        if self.revealed.remove(&old) {
            self.revealed.insert(new);
        }
    }

    /// Builds the revealed-answer entries for a set of players
    ///
    /// # Arguments
    ///
    /// * `watchers` - Participant registry, used to resolve names
    /// * `only_revealed` - When true, restrict to answers the host revealed
    pub fn entries(&self, watchers: &Watchers, only_revealed: bool) -> Vec<RevealedAnswer<T>> {
        let mut entries: Vec<RevealedAnswer<T>> = self
            .answers
            .iter()
            .filter(|(id, _)| !only_revealed || self.revealed.contains(id))
            .filter_map(|(id, submitted)| {
                Some(RevealedAnswer {
                    name: watchers.get_name(*id)?,
                    answer: submitted.answer.clone(),
                    response_time: submitted.response_time,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

/// Validates the shape of a payload against the round's answer-for-both flag
///
/// Joint answers must come from paired players and cover exactly the two
/// partners' names; individual answers must not be joint.
///
/// # Arguments
///
/// * `answer` - The submitted payload
/// * `submitter` - The submitting player
/// * `answer_for_both` - Whether the round expects joint answers
/// * `watchers` - Participant registry, used to resolve partner names
/// * `pairing` - Couple membership
///
/// # Errors
///
/// Returns the appropriate [`AnswerError`] when the shape does not fit.
pub fn validate_answer_shape<T>(
    answer: &PairAnswer<T>,
    submitter: Id,
    answer_for_both: bool,
    watchers: &Watchers,
    pairing: &PairingManager,
) -> Result<(), AnswerError> {
    match (answer, answer_for_both) {
        (PairAnswer::Single(_), false) => Ok(()),
        (PairAnswer::Single(_), true) => Err(AnswerError::ExpectedJoint),
        (PairAnswer::ForBoth(_), false) => Err(AnswerError::ExpectedIndividual),
        (PairAnswer::ForBoth(subjects), true) => {
            let team_id = pairing.team_of(submitter).ok_or(AnswerError::NotPaired)?;
            let members = pairing.members_of(team_id).ok_or(AnswerError::NotPaired)?;

            let expected: HashSet<String> = members
                .iter()
                .filter_map(|id| watchers.get_name(*id))
                .collect();
            let provided: HashSet<String> = subjects.keys().cloned().collect();

            if expected.len() == 2 && expected == provided {
                Ok(())
            } else {
                Err(AnswerError::WrongSubjects)
            }
        }
    }
}

/// Validates every text in a payload against the answer length limit
///
/// # Errors
///
/// Returns `AnswerError::TooLong` if any contained text exceeds the limit.
pub fn validate_answer_texts(answer: &PairAnswer<String>) -> Result<(), AnswerError> {
    let too_long = |text: &String| text.len() > crate::constants::answer_text::MAX_LENGTH;
    let violated = match answer {
        PairAnswer::Single(text) => too_long(text),
        PairAnswer::ForBoth(subjects) => subjects.values().any(too_long),
    };
    if violated {
        Err(AnswerError::TooLong)
    } else {
        Ok(())
    }
}

/// Validates every selection in a payload against a pool of valid choices
///
/// # Errors
///
/// Returns `AnswerError::NotInPool` if any contained selection is not part
/// of the pool.
pub fn validate_answer_in_pool(
    answer: &PairAnswer<String>,
    pool: &[String],
) -> Result<(), AnswerError> {
    let missing = |choice: &String| !pool.contains(choice);
    let violated = match answer {
        PairAnswer::Single(choice) => missing(choice),
        PairAnswer::ForBoth(subjects) => subjects.values().any(missing),
    };
    if violated {
        Err(AnswerError::NotInPool)
    } else {
        Ok(())
    }
}

/// Validates every option index in a payload against the option count
///
/// # Errors
///
/// Returns `AnswerError::OutOfRange` if any contained index is out of range.
pub fn validate_answer_indices(
    answer: &PairAnswer<usize>,
    option_count: usize,
) -> Result<(), AnswerError> {
    let out_of_range = match answer {
        PairAnswer::Single(index) => *index >= option_count,
        PairAnswer::ForBoth(subjects) => subjects.values().any(|index| *index >= option_count),
    };
    if out_of_range {
        Err(AnswerError::OutOfRange)
    } else {
        Ok(())
    }
}

/// Credits an award to a couple and broadcasts the score change
///
/// The awarded amount defaults to the round's configured points when the
/// host does not name one, and is capped at the per-award maximum.
///
/// # Arguments
///
/// * `team_id` - The couple receiving the points
/// * `points` - Explicit amount, or `None` for the round's default
/// * `default_points` - The round's configured award
/// * `scoreboard` - Score bookkeeping
/// * `pairing` - Couple membership, used to resolve the couple's name
/// * `watchers` - Participant registry for the broadcast
/// * `tunnel_finder` - Function to find tunnels for participants
///
/// # Returns
///
/// `true` when the award was credited, `false` for an unknown couple
pub fn award_points<T: Tunnel, F: Fn(Id) -> Option<T>>(
    team_id: Id,
    points: Option<u64>,
    default_points: u64,
    scoreboard: &mut Scoreboard,
    pairing: &PairingManager,
    watchers: &Watchers,
    tunnel_finder: F,
) -> bool {
    let Some(team_name) = pairing.team_name(team_id) else {
        return false;
    };

    let awarded = points
        .unwrap_or(default_points)
        .min(crate::constants::tourney::MAX_POINTS_PER_AWARD);
    scoreboard.award(team_id, awarded);

    let score = scoreboard.score(team_id);
    watchers.announce(
        &crate::game::UpdateMessage::ScoreUpdated {
            team_id,
            team_name,
            awarded,
            score,
        }
        .into(),
        tunnel_finder,
    );

    true
}

/// Validation result type for duration validation
type ValidationResult = garde::Result;

/// Validates that an optional time limit falls within the allowed bounds.
///
/// This is a custom validation function for use with the `garde` crate.
/// `None` (no time limit) is always valid.
///
/// # Errors
///
/// Returns a `garde::Error` if the duration is outside the allowed bounds.
pub fn validate_time_limit(val: &Option<Duration>, _ctx: &()) -> ValidationResult {
    const MIN: u64 = crate::constants::question::MIN_TIME_LIMIT;
    const MAX: u64 = crate::constants::question::MAX_TIME_LIMIT;

    match val {
        None => Ok(()),
        Some(duration) if (MIN..=MAX).contains(&duration.as_secs()) => Ok(()),
        Some(_) => Err(garde::Error::new(format!(
            "outside of bounds [{MIN},{MAX}]",
        ))),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{names::Names, watcher::PlayerValue};

    struct MockTunnel;

    impl crate::session::Tunnel for MockTunnel {
        fn send_message(&self, _message: &crate::UpdateMessage) {}

        fn send_state(&self, _state: &crate::SyncMessage) {}

        fn close(self) {}
    }

    fn add_player(watchers: &mut Watchers, names: &mut Names, name: &str) -> Id {
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
    }

    fn paired_setup() -> (PairingManager, Watchers, Names, Id, Id) {
        let mut watchers = Watchers::with_host_id(Id::new());
        let mut names = Names::default();
        let alice = add_player(&mut watchers, &mut names, "Alice");
        let bob = add_player(&mut watchers, &mut names, "Bob");
        let mut pairing = PairingManager::new(None);
        pairing.request(alice, bob, &mut watchers, &mut names).unwrap();
        pairing.request(bob, alice, &mut watchers, &mut names).unwrap();
        (pairing, watchers, names, alice, bob)
    }

    #[test]
    fn test_submissions_replace_and_track_phase() {
        let mut submissions: Submissions<String> = Submissions::default();
        let player = Id::new();

        submissions.start_timer();
        submissions.submit(player, PairAnswer::Single("pizza".to_owned()));
        submissions.submit(player, PairAnswer::Single("sushi".to_owned()));

        assert!(submissions.has_submitted(player));
        assert_eq!(
            submissions.get(player).unwrap().answer,
            PairAnswer::Single("sushi".to_owned())
        );
    }

    #[test]
    fn test_reopen_keeps_answers_resets_phase() {
        let mut submissions: Submissions<String> = Submissions::default();
        let player = Id::new();

        submissions.start_timer();
        submissions.submit(player, PairAnswer::Single("pizza".to_owned()));
        submissions.reveal(player);

        submissions.reopen();

        assert!(!submissions.has_submitted(player));
        assert!(!submissions.is_revealed(player));
        assert!(submissions.get(player).is_some());
    }

    #[test]
    fn test_reveal_unknown_player() {
        let mut submissions: Submissions<String> = Submissions::default();
        assert!(submissions.reveal(Id::new()).is_none());
    }

    #[test]
    fn test_everyone_submitted_ignores_disconnected() {
        let (_, mut watchers, mut names, alice, bob) = paired_setup();
        let carol = add_player(&mut watchers, &mut names, "Carol");

        let mut submissions: Submissions<String> = Submissions::default();
        submissions.start_timer();
        submissions.submit(alice, PairAnswer::Single("a".to_owned()));
        submissions.submit(bob, PairAnswer::Single("b".to_owned()));

        // carol is disconnected: no tunnel for her
        let tunnel = move |id| if id == carol { None } else { Some(MockTunnel) };
        assert!(submissions.everyone_submitted(&watchers, tunnel));

        let all_connected = |_id| Some(MockTunnel);
        assert!(!submissions.everyone_submitted(&watchers, all_connected));
        assert_eq!(submissions.submitted_count(&watchers, all_connected), 2);
    }

    #[test]
    fn test_everyone_submitted_requires_players() {
        let watchers = Watchers::with_host_id(Id::new());
        let submissions: Submissions<String> = Submissions::default();
        let tunnel = |_id| Some(MockTunnel);
        assert!(!submissions.everyone_submitted(&watchers, tunnel));
    }

    #[test]
    fn test_validate_shape_single() {
        let (pairing, watchers, _, alice, _) = paired_setup();
        let answer = PairAnswer::Single("pizza".to_owned());

        assert!(validate_answer_shape(&answer, alice, false, &watchers, &pairing).is_ok());
        assert_eq!(
            validate_answer_shape(&answer, alice, true, &watchers, &pairing),
            Err(AnswerError::ExpectedJoint)
        );
    }

    #[test]
    fn test_validate_shape_joint() {
        let (pairing, watchers, _, alice, _) = paired_setup();
        let answer = PairAnswer::ForBoth(BTreeMap::from([
            ("Alice".to_owned(), "pizza".to_owned()),
            ("Bob".to_owned(), "sushi".to_owned()),
        ]));

        assert!(validate_answer_shape(&answer, alice, true, &watchers, &pairing).is_ok());
        assert_eq!(
            validate_answer_shape(&answer, alice, false, &watchers, &pairing),
            Err(AnswerError::ExpectedIndividual)
        );
    }

    #[test]
    fn test_validate_shape_wrong_subjects() {
        let (pairing, watchers, _, alice, _) = paired_setup();
        let answer = PairAnswer::ForBoth(BTreeMap::from([
            ("Alice".to_owned(), "pizza".to_owned()),
            ("Carol".to_owned(), "sushi".to_owned()),
        ]));

        assert_eq!(
            validate_answer_shape(&answer, alice, true, &watchers, &pairing),
            Err(AnswerError::WrongSubjects)
        );
    }

    #[test]
    fn test_validate_shape_unpaired_joint() {
        let mut watchers = Watchers::with_host_id(Id::new());
        let mut names = Names::default();
        let carol = add_player(&mut watchers, &mut names, "Carol");
        let pairing = PairingManager::new(None);

        let answer: PairAnswer<String> = PairAnswer::ForBoth(BTreeMap::new());
        assert_eq!(
            validate_answer_shape(&answer, carol, true, &watchers, &pairing),
            Err(AnswerError::NotPaired)
        );
    }

    #[test]
    fn test_validate_texts_length() {
        let ok = PairAnswer::Single("pizza".to_owned());
        assert!(validate_answer_texts(&ok).is_ok());

        let long = "a".repeat(crate::constants::answer_text::MAX_LENGTH + 1);
        let too_long = PairAnswer::Single(long.clone());
        assert_eq!(validate_answer_texts(&too_long), Err(AnswerError::TooLong));

        let joint = PairAnswer::ForBoth(BTreeMap::from([
            ("Alice".to_owned(), "fine".to_owned()),
            ("Bob".to_owned(), long),
        ]));
        assert_eq!(validate_answer_texts(&joint), Err(AnswerError::TooLong));
    }

    #[test]
    fn test_validate_indices_range() {
        assert!(validate_answer_indices(&PairAnswer::Single(2), 4).is_ok());
        assert_eq!(
            validate_answer_indices(&PairAnswer::Single(4), 4),
            Err(AnswerError::OutOfRange)
        );

        let joint = PairAnswer::ForBoth(BTreeMap::from([
            ("Alice".to_owned(), 1),
            ("Bob".to_owned(), 9),
        ]));
        assert_eq!(
            validate_answer_indices(&joint, 4),
            Err(AnswerError::OutOfRange)
        );
    }

    #[test]
    fn test_validate_time_limit_bounds() {
        assert!(validate_time_limit(&None, &()).is_ok());
        assert!(validate_time_limit(&Some(Duration::from_secs(30)), &()).is_ok());
        assert!(validate_time_limit(&Some(Duration::from_secs(1)), &()).is_err());
        assert!(
            validate_time_limit(
                &Some(Duration::from_secs(
                    crate::constants::question::MAX_TIME_LIMIT + 1
                )),
                &()
            )
            .is_err()
        );
    }

    #[test]
    fn test_award_points_unknown_team() {
        let (pairing, watchers, ..) = paired_setup();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();

        let tunnel = |_id| Some(MockTunnel);
        assert!(!award_points(
            Id::new(),
            Some(100),
            0,
            &mut scoreboard,
            &pairing,
            &watchers,
            tunnel
        ));
    }

    #[test]
    fn test_award_points_defaults_and_caps() {
        let (pairing, watchers, _, alice, _) = paired_setup();
        let team = pairing.team_of(alice).unwrap();
        let mut scoreboard = Scoreboard::default();
        scoreboard.open_round();

        let tunnel = |_id| Some(MockTunnel);
        assert!(award_points(
            team,
            None,
            250,
            &mut scoreboard,
            &pairing,
            &watchers,
            tunnel
        ));
        assert_eq!(scoreboard.score(team).unwrap().points, 250);

        assert!(award_points(
            team,
            Some(u64::MAX),
            250,
            &mut scoreboard,
            &pairing,
            &watchers,
            tunnel
        ));
        assert_eq!(
            scoreboard.score(team).unwrap().points,
            250 + crate::constants::tourney::MAX_POINTS_PER_AWARD
        );
    }
}
