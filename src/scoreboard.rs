//! Score bookkeeping for host-awarded points
//!
//! This module manages the scoring system for a tournament: the host hands
//! out points to couples while scoring a round, and the scoreboard keeps
//! per-round award buckets, maintains sorted standings, and provides score
//! summaries. Totals only ever grow, except through
//! [`Scoreboard::clear_current_round`], the explicit re-score path used
//! when a round is reopened for answering.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{TruncatedVec, watcher::Id};

/// Summary of final game statistics and couple performance
///
/// This struct contains aggregated data about the completed game,
/// including per-round statistics and per-couple point breakdowns.
#[derive(Debug, Clone)]
pub struct FinalSummary {
    /// For each round, tuple of (couples who were awarded points, couples who weren't)
    stats: Vec<(usize, usize)>,
    /// For each couple, the points they earned in each round
    mapping: HashMap<Id, Vec<u64>>,
}

/// Serialization helper for Scoreboard struct
#[derive(Deserialize)]
struct ScoreboardSerde {
    points_awarded: Vec<Vec<(Id, u64)>>,
}

/// Manages per-round awards and standings for a room
///
/// Each round gets its own bucket of award events. Standings are cached in
/// descending order, together with the standings as they were before the
/// current round, so clients can show movement between rounds.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "ScoreboardSerde")]
pub struct Scoreboard {
    /// Award events per round, in the order the host issued them
    points_awarded: Vec<Vec<(Id, u64)>>,

    /// Standings before the current round, descending (cached)
    #[serde(skip)]
    previous_scores_descending: Vec<(Id, u64)>,
    /// Current standings, descending (cached)
    #[serde(skip)]
    scores_descending: Vec<(Id, u64)>,
    /// Mapping from couple id to their total score and position (cached)
    #[serde(skip)]
    score_and_position: HashMap<Id, (u64, usize)>,
    /// Final game summary (computed once when needed)
    #[serde(skip)]
    final_summary: once_cell_serde::sync::OnceCell<FinalSummary>,
}

impl From<ScoreboardSerde> for Scoreboard {
    /// Reconstructs the Scoreboard from serialized data
    ///
    /// This rebuilds all the cached standings from the award buckets,
    /// which is necessary since the cached fields are not serialized.
    fn from(serde: ScoreboardSerde) -> Self {
        let mut scoreboard = Scoreboard {
            points_awarded: serde.points_awarded,
            previous_scores_descending: Vec::new(),
            scores_descending: Vec::new(),
            score_and_position: HashMap::new(),
            final_summary: once_cell_serde::sync::OnceCell::new(),
        };
        scoreboard.recompute();
        scoreboard
    }
}

/// Score information for a couple
///
/// Contains the couple's current score and their position in the standings.
/// This information is sent to players so they can see their performance.
#[derive(Debug, Serialize, Clone, Copy)]
pub struct ScoreMessage {
    /// Total points awarded to the couple
    pub points: u64,
    /// Current position in the standings (0-indexed)
    pub position: usize,
}

/// Sums award events into per-couple totals
fn totals(buckets: &[Vec<(Id, u64)>]) -> HashMap<Id, u64> {
    let mut summary: HashMap<Id, u64> = HashMap::new();
    for (id, points) in buckets.iter().flat_map(|bucket| bucket.iter()) {
        *summary.entry(*id).or_default() += points;
    }
    summary
}

/// Sorts per-couple totals into a descending standings list
fn descending(summary: &HashMap<Id, u64>) -> Vec<(Id, u64)> {
    summary
        .iter()
        .sorted_by_key(|(_, points)| *points)
        .rev()
        .map(|(id, points)| (*id, *points))
        .collect_vec()
}

impl Scoreboard {
    /// Opens a fresh award bucket for the round that is about to play
    ///
    /// Everything awarded before this call becomes part of the "previous"
    /// standings that clients use to show movement.
    pub fn open_round(&mut self) {
        self.points_awarded.push(Vec::new());
        self.recompute();
    }

    /// Records an award for a couple in the current round
    ///
    /// Multiple awards to the same couple within a round accumulate.
    ///
    /// # Arguments
    ///
    /// * `team_id` - The couple receiving the points
    /// * `points` - The number of points awarded
    pub fn award(&mut self, team_id: Id, points: u64) {
        if self.points_awarded.is_empty() {
            self.points_awarded.push(Vec::new());
        }
        if let Some(bucket) = self.points_awarded.last_mut() {
            bucket.push((team_id, points));
        }
        self.recompute();
    }

    /// Discards every award of the current round
    ///
    /// This is the explicit re-score action: when the host sends a round
    /// back to answering, its awards are wiped so scoring can start over.
    /// Awards of earlier rounds are untouched.
    pub fn clear_current_round(&mut self) {
        if let Some(bucket) = self.points_awarded.last_mut() {
            bucket.clear();
        }
        self.recompute();
    }

    /// Returns the number of rounds that have had an award bucket opened
    pub fn rounds_recorded(&self) -> usize {
        self.points_awarded.len()
    }

    /// Rebuilds the cached standings from the award buckets
    fn recompute(&mut self) {
        let current = totals(&self.points_awarded);
        let previous = totals(
            &self.points_awarded[..self.points_awarded.len().saturating_sub(1)],
        );

        self.scores_descending = descending(&current);
        self.previous_scores_descending = descending(&previous);
        self.score_and_position = self
            .scores_descending
            .iter()
            .enumerate()
            .map(|(position, (id, points))| (*id, (*points, position)))
            .collect();
    }

    /// Returns the current and previous standings
    ///
    /// Provides the standings as of now and as of before the current round
    /// as truncated vectors suitable for display to clients.
    ///
    /// # Returns
    ///
    /// An array containing [current_standings, previous_standings] where
    /// each entry is (couple_id, total_score)
    pub fn last_two_scores_descending(&self) -> [TruncatedVec<(Id, u64)>; 2] {
        const LIMIT: usize = 50;

        [
            TruncatedVec::new(
                self.scores_descending.iter().copied(),
                LIMIT,
                self.scores_descending.len(),
            ),
            TruncatedVec::new(
                self.previous_scores_descending.iter().copied(),
                LIMIT,
                self.previous_scores_descending.len(),
            ),
        ]
    }

    /// Computes comprehensive final game statistics
    ///
    /// Generates detailed statistics about the completed game: for every
    /// round, how many couples received points and how many went empty, and
    /// for every couple, their points in each round (with zeros filled in
    /// for rounds they were not awarded in).
    fn compute_final_summary(&self) -> FinalSummary {
        let round_totals = self
            .points_awarded
            .iter()
            .map(|bucket| totals(std::slice::from_ref(bucket)))
            .collect_vec();

        FinalSummary {
            stats: round_totals
                .iter()
                .map(|bucket| {
                    let awarded_count = bucket.values().filter(|points| **points > 0).count();
                    (awarded_count, bucket.len() - awarded_count)
                })
                .collect(),
            mapping: round_totals.into_iter().enumerate().fold(
                HashMap::new(),
                |mut aggregate, (round_index, bucket)| {
                    for (id, points) in bucket {
                        aggregate.entry(id).or_default().push(points);
                    }
                    for (_, v) in aggregate.iter_mut() {
                        v.resize(round_index + 1, 0);
                    }
                    aggregate
                },
            ),
        }
    }

    /// Gets or computes the final game summary with caching
    fn final_summary(&self) -> &FinalSummary {
        self.final_summary.get_or_init(|| self.compute_final_summary())
    }

    /// Generates summary statistics for the host
    ///
    /// # Returns
    ///
    /// A tuple of (couples_with_any_points, per_round_stats) where
    /// per_round_stats is a vector of (couples awarded, couples not awarded)
    /// for each round
    pub fn host_summary(&self) -> (usize, Vec<(usize, usize)>) {
        let final_summary = self.final_summary();

        (final_summary.mapping.len(), final_summary.stats.clone())
    }

    /// Generates the per-round point breakdown for a specific couple
    ///
    /// # Arguments
    ///
    /// * `id` - The couple's unique identifier
    ///
    /// # Returns
    ///
    /// A vector containing the couple's points for each round in order
    pub fn team_summary(&self, id: Id) -> Vec<u64> {
        self.final_summary()
            .mapping
            .get(&id)
            .map_or(vec![0; self.points_awarded.len()], std::clone::Clone::clone)
    }

    /// Gets the current score and position for a specific couple
    ///
    /// # Arguments
    ///
    /// * `team_id` - The couple's unique identifier
    ///
    /// # Returns
    ///
    /// `Some(ScoreMessage)` containing the couple's points and position,
    /// or `None` if the couple has no recorded awards
    pub fn score(&self, team_id: Id) -> Option<ScoreMessage> {
        let (points, position) = self.score_and_position.get(&team_id)?;
        Some(ScoreMessage {
            points: *points,
            position: *position,
        })
    }
}
