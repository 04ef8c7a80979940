//! Name registry and validation
//!
//! Names are the durable identity in a room: connection ids churn on every
//! reconnect, but a player keeps their name for the whole session. This
//! module maintains the bidirectional mapping between ids and names,
//! enforces uniqueness and content rules, and supports moving a name onto
//! a fresh connection id when a player reconnects.

use std::collections::{HashMap, HashSet, hash_map::Entry};

use heck::ToTitleCase;
use rustrict::CensorStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::watcher::Id;

/// Defines the style of generated couple nicknames
///
/// When nicknames are enabled, freshly formed couples are given a whimsical
/// shared name instead of the default "A & B" composition.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, garde::Validate)]
pub enum NicknameStyle {
    /// Pet-style nicknames (adjective + animal combinations), pluralized
    /// so the couple reads as "Cuddly Otters" rather than "Cuddly Otter"
    Petname(#[garde(range(min = 2, max = 3))] usize),
}

impl Default for NicknameStyle {
    /// Default nickname style is Petname with 2 words
    fn default() -> Self {
        Self::Petname(2)
    }
}

impl NicknameStyle {
    /// Generates a random couple nickname according to this style
    ///
    /// # Returns
    ///
    /// A randomly generated, title-cased, pluralized nickname.
    pub fn get_name(&self) -> String {
        match self {
            Self::Petname(count) => loop {
                if let Some(name) = petname::petname(*count as u8, " ") {
                    return pluralizer::pluralize(&name.to_title_case(), 2, false);
                }
            },
        }
    }
}

/// Serialization helper for Names struct
#[derive(Deserialize)]
struct NamesSerde {
    mapping: HashMap<Id, String>,
}

/// Manages names and their associations with participant ids
///
/// Both player names and couple names live in the same registry so that no
/// two of them collide. The struct maintains a bidirectional mapping and a
/// set of taken names for quick uniqueness checks.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(from = "NamesSerde")]
pub struct Names {
    /// Primary mapping from participant id to name
    mapping: HashMap<Id, String>,

    /// Reverse mapping from name to participant id (not serialized)
    #[serde(skip_serializing)]
    reverse_mapping: HashMap<String, Id>,
    /// Set of all existing names for quick uniqueness checks (not serialized)
    #[serde(skip_serializing)]
    existing: HashSet<String>,
}

impl From<NamesSerde> for Names {
    /// Reconstructs the Names struct from serialized data
    ///
    /// This rebuilds the reverse mapping and existing names set from
    /// the primary mapping, which is necessary since these fields
    /// are not serialized.
    fn from(serde: NamesSerde) -> Self {
        let NamesSerde { mapping } = serde;
        let mut reverse_mapping = HashMap::new();
        let mut existing = HashSet::new();
        for (id, name) in &mapping {
            reverse_mapping.insert(name.to_owned(), *id);
            existing.insert(name.to_owned());
        }
        Self {
            mapping,
            reverse_mapping,
            existing,
        }
    }
}

/// Errors that can occur during name validation and assignment
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested name is already in use in this room
    #[error("name already in-use")]
    Used,
    /// The participant already has an assigned name
    #[error("player has an existing name")]
    Assigned,
    /// The name is empty or contains only whitespace
    #[error("name cannot be empty")]
    Empty,
    /// The name contains inappropriate content
    #[error("name is inappropriate")]
    Sinful,
    /// The name exceeds the maximum allowed length
    #[error("name is too long")]
    TooLong,
}

impl Names {
    /// Retrieves the name associated with a participant id
    ///
    /// # Arguments
    ///
    /// * `id` - The participant id to look up
    ///
    /// # Returns
    ///
    /// The participant's name if they have one assigned, otherwise `None`
    pub fn get_name(&self, id: &Id) -> Option<String> {
        self.mapping.get(id).map(std::borrow::ToOwned::to_owned)
    }

    /// Assigns a name to a participant after validation
    ///
    /// This method performs comprehensive validation including length limits,
    /// content filtering, uniqueness checking, and ensures the participant
    /// doesn't already have a name assigned.
    ///
    /// # Arguments
    ///
    /// * `id` - The participant id to assign the name to
    /// * `name` - The requested name (will be trimmed of whitespace)
    ///
    /// # Returns
    ///
    /// The cleaned and assigned name on success, or an error describing
    /// why the name was rejected.
    ///
    /// # Errors
    ///
    /// * `Error::TooLong` - Name exceeds the maximum length
    /// * `Error::Empty` - Name is empty after trimming whitespace
    /// * `Error::Sinful` - Name contains inappropriate content
    /// * `Error::Used` - Name is already taken in this room
    /// * `Error::Assigned` - Participant already has a name assigned
    pub fn set_name(&mut self, id: Id, name: &str) -> Result<String, Error> {
        if name.len() > crate::constants::identity::MAX_NAME_LENGTH {
            return Err(Error::TooLong);
        }
        let name = rustrict::trim_whitespace(name);
        if name.is_empty() {
            return Err(Error::Empty);
        }
        if name.is_inappropriate() {
            return Err(Error::Sinful);
        }
        if !self.existing.insert(name.to_owned()) {
            return Err(Error::Used);
        }
        match self.mapping.entry(id) {
            Entry::Occupied(_) => Err(Error::Assigned),
            Entry::Vacant(v) => {
                v.insert(name.to_owned());
                self.reverse_mapping.insert(name.to_owned(), id);
                Ok(name.to_owned())
            }
        }
    }

    /// Retrieves the participant id associated with a name
    ///
    /// # Arguments
    ///
    /// * `name` - The name to look up
    ///
    /// # Returns
    ///
    /// The participant id if the name is assigned, otherwise `None`
    pub fn get_id(&self, name: &str) -> Option<Id> {
        self.reverse_mapping.get(name).copied()
    }

    /// Moves a name from one participant id to another
    ///
    /// This is the reconnection path: the name (the durable identity) stays
    /// the same while the connection id it points to is replaced.
    ///
    /// # Arguments
    ///
    /// * `old` - The stale connection id currently holding the name
    /// * `new` - The fresh connection id that should hold it
    ///
    /// # Returns
    ///
    /// The moved name, or `None` if `old` had no name assigned
    pub fn reassign(&mut self, old: Id, new: Id) -> Option<String> {
        let name = self.mapping.remove(&old)?;
        self.mapping.insert(new, name.clone());
        self.reverse_mapping.insert(name.clone(), new);
        Some(name)
    }

    /// Releases a participant's name, making it available again
    ///
    /// Used when a player leaves the room for good, or when a dissolved
    /// couple's name should be freed for reuse.
    ///
    /// # Arguments
    ///
    /// * `id` - The participant id whose name should be released
    ///
    /// # Returns
    ///
    /// The released name, or `None` if the id had no name assigned
    pub fn remove(&mut self, id: Id) -> Option<String> {
        let name = self.mapping.remove(&id)?;
        self.reverse_mapping.remove(&name);
        self.existing.remove(&name);
        Some(name)
    }
}
