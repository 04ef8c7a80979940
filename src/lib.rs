//! # Tourney Game Library
//!
//! This library provides the core game logic for the Tournament of the
//! Couples party game. It handles room sessions, player pairing into
//! couples, the host-driven round flow (answering, all-answers-in,
//! scoring, reopen), score bookkeeping, and real-time synchronization
//! between players and hosts, including reconnection by name.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
use derive_where::derive_where;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub mod constants;

pub mod game;
pub mod names;
pub mod pairing;
pub mod room_code;
pub mod round;
pub mod scoreboard;
pub mod session;
pub mod watcher;

/// Messages sent to synchronize state between players and hosts
///
/// This enum represents all possible synchronization messages that can be
/// sent to keep game state consistent across all connected clients.
#[derive(Debug, Serialize, Clone, derive_more::From)]
pub enum SyncMessage {
    /// General game synchronization messages
    Game(game::SyncMessage),
    /// Open-ended round synchronization
    OpenEnded(round::open_ended::SyncMessage),
    /// Multiple choice round synchronization
    MultipleChoice(round::multiple_choice::SyncMessage),
    /// Binary round synchronization
    Binary(round::binary::SyncMessage),
    /// Pool selection round synchronization
    PoolSelection(round::pool_selection::SyncMessage),
}

impl SyncMessage {
    /// Converts the sync message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Messages sent to update specific aspects of the game state
///
/// Update messages are used to notify clients about changes that affect
/// their local view of the game, such as lobby changes, submitted answers,
/// reveals, or score updates.
#[derive(Debug, Serialize, Clone, derive_more::From)]
pub enum UpdateMessage {
    /// General game update messages
    Game(game::UpdateMessage),
    /// Open-ended round updates
    OpenEnded(round::open_ended::UpdateMessage),
    /// Multiple choice round updates
    MultipleChoice(round::multiple_choice::UpdateMessage),
    /// Binary round updates
    Binary(round::binary::UpdateMessage),
    /// Pool selection round updates
    PoolSelection(round::pool_selection::UpdateMessage),
}

/// Alarm messages for timed events in different round types
///
/// These messages are used to handle time-based events like the expiry of
/// a round's answering time limit.
#[derive(Debug, Clone, derive_more::From, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Open-ended round alarms
    OpenEnded(round::open_ended::AlarmMessage),
    /// Multiple choice round alarms
    MultipleChoice(round::multiple_choice::AlarmMessage),
    /// Binary round alarms
    Binary(round::binary::AlarmMessage),
    /// Pool selection round alarms
    PoolSelection(round::pool_selection::AlarmMessage),
}

impl UpdateMessage {
    /// Converts the update message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// A truncated vector that maintains the exact count while limiting displayed items
///
/// This structure is useful for displaying a limited number of items while
/// still showing the total count. For example, showing "60 players" but only
/// displaying the first 50 names.
#[derive(Debug, Clone, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// The exact total count of items
    exact_count: usize,
    /// The truncated list of items (up to the limit)
    items: Vec<T>,
}

impl<T: Clone> TruncatedVec<T> {
    /// Creates a new truncated vector from an iterator
    ///
    /// # Arguments
    ///
    /// * `list` - An iterator over items to include
    /// * `limit` - Maximum number of items to include in the truncated vector
    /// * `exact_count` - The exact total count of items (may be larger than limit)
    ///
    /// # Returns
    ///
    /// A new `TruncatedVec` containing up to `limit` items from the iterator
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// Maps a function over the items in the truncated vector
    ///
    /// # Arguments
    ///
    /// * `f` - Function to apply to each item
    ///
    /// # Returns
    ///
    /// A new `TruncatedVec` with the function applied to each item
    pub fn map<F, U>(self, f: F) -> TruncatedVec<U>
    where
        F: Fn(T) -> U,
    {
        TruncatedVec {
            exact_count: self.exact_count,
            items: self.items.into_iter().map(f).collect_vec(),
        }
    }

    /// Returns the exact count of items
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// Returns the truncated items
    pub fn items(&self) -> &[T] {
        &self.items
    }
}
