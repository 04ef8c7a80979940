//! Deck configuration and round dispatch
//!
//! This module defines the deck the host brings to a room (the ordered list
//! of questions to play) and the runtime dispatch between the different
//! question variants. It provides the central coordination layer that the
//! game aggregate drives without knowing which variant is live.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::{
    AlarmMessage, SyncMessage,
    pairing::PairingManager,
    scoreboard::Scoreboard,
    session::Tunnel,
    watcher::{Id, ValueKind, Watchers},
};

use super::{
    super::game::IncomingMessage, binary, multiple_choice, open_ended, pool_selection,
};

/// A complete deck containing every round of a tournament
///
/// This is the main configuration structure the host supplies when creating
/// a room: a title and the ordered questions that will be played.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Deck {
    /// The title of the deck
    #[garde(length(max = crate::constants::tourney::MAX_TITLE_LENGTH))]
    title: String,

    /// The ordered rounds of the deck
    #[garde(length(max = crate::constants::tourney::MAX_ROUNDS_COUNT), dive)]
    pub rounds: Vec<RoundConfig>,
}

impl Deck {
    /// Returns the number of rounds in this deck
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// Checks if this deck contains any rounds
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

/// Represents the currently live round with its runtime state
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CurrentRound {
    /// The index of the current round in the deck
    pub index: usize,
    /// The runtime state of the current round
    pub state: RoundState,
}

/// Configuration for a single round
///
/// This enum represents the different question variants that can appear in
/// a deck. Each variant contains the specific configuration for that
/// question type.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub enum RoundConfig {
    /// A free-text question
    OpenEnded(#[garde(dive)] open_ended::RoundConfig),
    /// A question with a fixed set of options
    MultipleChoice(#[garde(dive)] multiple_choice::RoundConfig),
    /// A two-label question
    Binary(#[garde(dive)] binary::RoundConfig),
    /// A pick-a-name question over the live roster
    PoolSelection(#[garde(dive)] pool_selection::RoundConfig),
}

impl RoundConfig {
    /// Converts this configuration into a runtime state
    ///
    /// # Returns
    ///
    /// A new `RoundState` initialized from this configuration
    pub fn to_state(&self) -> RoundState {
        match self {
            Self::OpenEnded(c) => RoundState::OpenEnded(c.to_state()),
            Self::MultipleChoice(c) => RoundState::MultipleChoice(c.to_state()),
            Self::Binary(c) => RoundState::Binary(c.to_state()),
            Self::PoolSelection(c) => RoundState::PoolSelection(c.to_state()),
        }
    }

    /// Returns the question text of this round
    pub fn title(&self) -> &str {
        match self {
            Self::OpenEnded(c) => c.title(),
            Self::MultipleChoice(c) => c.title(),
            Self::Binary(c) => c.title(),
            Self::PoolSelection(c) => c.title(),
        }
    }
}

/// Runtime state for a round during active gameplay
///
/// This enum holds the live state of whichever variant is being played and
/// forwards the game aggregate's calls to it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum RoundState {
    /// Runtime state for a free-text question
    OpenEnded(open_ended::State),
    /// Runtime state for a multiple choice question
    MultipleChoice(multiple_choice::State),
    /// Runtime state for a two-label question
    Binary(binary::State),
    /// Runtime state for a pick-a-name question
    PoolSelection(pool_selection::State),
}

impl RoundState {
    /// Starts playing this round
    ///
    /// This announces the question, opens answering, and schedules the
    /// answering deadline when the round has a time limit.
    ///
    /// # Arguments
    ///
    /// * `watchers` - Connection manager for all participants
    /// * `pairing` - Couple membership (used to snapshot name pools)
    /// * `schedule_message` - Function to schedule timed alarm messages
    /// * `tunnel_finder` - Function to find communication tunnels
    /// * `index` - The current round index
    /// * `count` - The total number of rounds
    pub fn play<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watchers: &Watchers,
        pairing: &PairingManager,
        schedule_message: S,
        tunnel_finder: F,
        index: usize,
        count: usize,
    ) {
        match self {
            Self::OpenEnded(s) => {
                s.play(watchers, schedule_message, tunnel_finder, index, count);
            }
            Self::MultipleChoice(s) => {
                s.play(watchers, schedule_message, tunnel_finder, index, count);
            }
            Self::Binary(s) => {
                s.play(watchers, schedule_message, tunnel_finder, index, count);
            }
            Self::PoolSelection(s) => {
                s.play(
                    watchers,
                    pairing,
                    schedule_message,
                    tunnel_finder,
                    index,
                    count,
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
    /// * `schedule_message` - Function to schedule timed alarm messages
    /// * `tunnel_finder` - Function to find communication tunnels
    /// * `index` - The current round index
    /// * `count` - The total number of rounds
    ///
    /// # Returns
    ///
    /// `true` if the round is complete and the game should move on
    pub fn receive_message<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(AlarmMessage, Duration)>(
        &mut self,
        watcher_id: Id,
        message: IncomingMessage,
        scoreboard: &mut Scoreboard,
        watchers: &Watchers,
        pairing: &PairingManager,
        schedule_message: S,
        tunnel_finder: F,
        index: usize,
        count: usize,
    ) -> bool {
        match self {
            Self::OpenEnded(s) => s.receive_message(
                watcher_id,
                message,
                scoreboard,
                watchers,
                pairing,
                schedule_message,
                tunnel_finder,
                index,
                count,
            ),
            Self::MultipleChoice(s) => s.receive_message(
                watcher_id,
                message,
                scoreboard,
                watchers,
                pairing,
                schedule_message,
                tunnel_finder,
                index,
                count,
            ),
            Self::Binary(s) => s.receive_message(
                watcher_id,
                message,
                scoreboard,
                watchers,
                pairing,
                schedule_message,
                tunnel_finder,
                index,
                count,
            ),
            Self::PoolSelection(s) => s.receive_message(
                watcher_id,
                message,
                scoreboard,
                watchers,
                pairing,
                schedule_message,
                tunnel_finder,
                index,
                count,
            ),
        }
    }

    /// Generates a state synchronization message for a specific participant
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - ID of the participant requesting synchronization
    /// * `watcher_kind` - The type of participant
    /// * `watchers` - Connection manager for all participants
    /// * `tunnel_finder` - Function to find communication tunnels
    /// * `index` - The current round index
    /// * `count` - The total number of rounds
    ///
    /// # Returns
    ///
    /// A `SyncMessage` containing the current round state information
    pub fn state_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: Id,
        watcher_kind: ValueKind,
        watchers: &Watchers,
        tunnel_finder: F,
        index: usize,
        count: usize,
    ) -> SyncMessage {
        match self {
            Self::OpenEnded(s) => SyncMessage::OpenEnded(s.state_message(
                watcher_id,
                watcher_kind,
                watchers,
                tunnel_finder,
                index,
                count,
            )),
            Self::MultipleChoice(s) => SyncMessage::MultipleChoice(s.state_message(
                watcher_id,
                watcher_kind,
                watchers,
                tunnel_finder,
                index,
                count,
            )),
            Self::Binary(s) => SyncMessage::Binary(s.state_message(
                watcher_id,
                watcher_kind,
                watchers,
                tunnel_finder,
                index,
                count,
            )),
            Self::PoolSelection(s) => SyncMessage::PoolSelection(s.state_message(
                watcher_id,
                watcher_kind,
                watchers,
                tunnel_finder,
                index,
                count,
            )),
        }
    }

    /// Moves a player's submissions onto a fresh connection id
    ///
    /// Used during reconnection so a reclaimed identity keeps its answer.
    ///
    /// # Arguments
    ///
    /// * `old` - The stale connection id
    /// * `new` - The fresh connection id
    pub fn reassign(&mut self, old: Id, new: Id) {
        match self {
            Self::OpenEnded(s) => s.reassign(old, new),
            Self::MultipleChoice(s) => s.reassign(old, new),
            Self::Binary(s) => s.reassign(old, new),
            Self::PoolSelection(s) => s.reassign(old, new),
        }
    }

    /// Processes a scheduled alarm message for this round
    ///
    /// # Arguments
    ///
    /// * `watchers` - Connection manager for all participants
    /// * `tunnel_finder` - Function to find communication tunnels
    /// * `message` - The alarm message being processed
    /// * `index` - The current round index
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
        match (self, message) {
            (Self::OpenEnded(s), AlarmMessage::OpenEnded(alarm)) => {
                s.receive_alarm(watchers, tunnel_finder, alarm, index)
            }
            (Self::MultipleChoice(s), AlarmMessage::MultipleChoice(alarm)) => {
                s.receive_alarm(watchers, tunnel_finder, alarm, index)
            }
            (Self::Binary(s), AlarmMessage::Binary(alarm)) => {
                s.receive_alarm(watchers, tunnel_finder, alarm, index)
            }
            (Self::PoolSelection(s), AlarmMessage::PoolSelection(alarm)) => {
                s.receive_alarm(watchers, tunnel_finder, alarm, index)
            }
            _ => false,
        }
    }
}
