//! Couple formation and management
//!
//! This module handles the pairing of players into couples. Unlike a
//! bulk assignment at game start, couples form in the lobby through
//! mutual requests: when two unpaired players request each other, a team
//! of exactly two is created. Either partner can dissolve the couple
//! again while the room is still in the lobby.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::names::NicknameStyle;

use super::{
    TruncatedVec, names,
    watcher::{self, Id, PlayerValue, Watchers},
};

/// A couple that has just been formed by a mutual pair request
///
/// Returned from [`PairingManager::request`] so the caller can notify the
/// two players and the rest of the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormedTeam {
    /// The unique identifier of the new couple
    pub team_id: Id,
    /// The display name of the new couple
    pub team_name: String,
    /// The two players forming the couple
    pub players: [Id; 2],
}

/// Errors that can occur while managing pair requests
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested partner is not a player in this room
    #[error("no such player")]
    UnknownPlayer,
    /// Players cannot pair with themselves
    #[error("cannot pair with yourself")]
    SelfRequest,
    /// The requesting player is already part of a couple
    #[error("you are already paired")]
    AlreadyPaired,
    /// The requested partner is already part of a couple
    #[error("that player is already paired")]
    TargetPaired,
    /// The player is not part of a couple
    #[error("you are not paired")]
    NotPaired,
}

/// Manages pair requests and couple membership
///
/// This struct tracks outstanding pair requests, the mapping between
/// players and their couples, and couple display names. It guarantees the
/// room invariants: a player belongs to at most one couple, and a couple
/// always has exactly two distinct players.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PairingManager {
    /// Outstanding pair requests: requester to desired partner
    requests: HashMap<Id, Id>,
    /// Mapping from player id to their couple id
    player_to_team: HashMap<Id, Id>,
    /// Mapping from couple id to its two players
    team_to_players: HashMap<Id, [Id; 2]>,
    /// Mapping from couple id to its display name
    team_names: HashMap<Id, String>,
    /// Style for generated couple nicknames (None composes "A & B")
    nickname_style: Option<NicknameStyle>,
}

impl PairingManager {
    /// Creates a new pairing manager
    ///
    /// # Arguments
    ///
    /// * `nickname_style` - Style for generated couple nicknames, or `None`
    ///   to compose couple names from the partners' names
    pub fn new(nickname_style: Option<NicknameStyle>) -> Self {
        Self {
            requests: HashMap::default(),
            player_to_team: HashMap::default(),
            team_to_players: HashMap::default(),
            team_names: HashMap::default(),
            nickname_style,
        }
    }

    /// Records a pair request, forming a couple when it is mutual
    ///
    /// The request is stored until the target requests the requester back.
    /// At that point the couple is created: it receives a unique display
    /// name, both players' values are rewritten to
    /// [`PlayerValue::Paired`], and any other requests involving either
    /// player are dropped.
    ///
    /// # Arguments
    ///
    /// * `requester` - The player issuing the request
    /// * `target` - The desired partner
    /// * `watchers` - Participant registry, updated when a couple forms
    /// * `names` - Name registry, where the couple name is reserved
    ///
    /// # Returns
    ///
    /// `Ok(Some(FormedTeam))` when the request was mutual and a couple
    /// formed, `Ok(None)` when the request is pending.
    ///
    /// # Errors
    ///
    /// * `Error::SelfRequest` - requester and target are the same player
    /// * `Error::AlreadyPaired` - the requester is already in a couple
    /// * `Error::TargetPaired` - the target is already in a couple
    pub fn request(
        &mut self,
        requester: Id,
        target: Id,
        watchers: &mut Watchers,
        names: &mut names::Names,
    ) -> Result<Option<FormedTeam>, Error> {
        if requester == target {
            return Err(Error::SelfRequest);
        }
        if self.player_to_team.contains_key(&requester) {
            return Err(Error::AlreadyPaired);
        }
        if self.player_to_team.contains_key(&target) {
            return Err(Error::TargetPaired);
        }

        self.requests.insert(requester, target);

        if self.requests.get(&target).copied() != Some(requester) {
            return Ok(None);
        }

        let team_id = Id::new();
        let team_name = self.reserve_team_name(team_id, [requester, target], watchers, names);

        for player in [requester, target] {
            self.player_to_team.insert(player, team_id);
            if let Some(watcher::Value::Player(player_value)) = watchers.get_watcher_value(player)
            {
                watchers.update_watcher_value(
                    player,
                    watcher::Value::Player(PlayerValue::Paired {
                        name: player_value.name().to_owned(),
                        avatar: player_value.avatar().to_owned(),
                        team_name: team_name.clone(),
                        team_id,
                    }),
                );
            }
        }
        self.team_to_players.insert(team_id, [requester, target]);
        self.team_names.insert(team_id, team_name.clone());

        self.requests.remove(&requester);
        self.requests.remove(&target);
        self.requests
            .retain(|_, wanted| *wanted != requester && *wanted != target);

        Ok(Some(FormedTeam {
            team_id,
            team_name,
            players: [requester, target],
        }))
    }

    /// Reserves a unique display name for a couple in the name registry
    ///
    /// With a nickname style configured, generated nicknames are drawn until
    /// one is free. Otherwise the name is composed from the partners' names
    /// in alphabetical order; if that composition collides with an existing
    /// name, generated nicknames are used as a fallback.
    fn reserve_team_name(
        &self,
        team_id: Id,
        players: [Id; 2],
        watchers: &Watchers,
        names: &mut names::Names,
    ) -> String {
        if self.nickname_style.is_none() {
            let composed = players
                .iter()
                .filter_map(|id| watchers.get_name(*id))
                .sorted()
                .join(" & ");
            if let Ok(name) = names.set_name(team_id, &composed) {
                return name;
            }
        }

        let style = self.nickname_style.unwrap_or_default();
        loop {
            if let Ok(name) = names.set_name(team_id, &style.get_name()) {
                return name;
            }
        }
    }

    /// Dissolves the couple a player belongs to
    ///
    /// Both partners revert to [`PlayerValue::Solo`], the couple's display
    /// name is released, and any outstanding requests aimed at either
    /// partner remain untouched (they were impossible while paired and are
    /// now valid again).
    ///
    /// # Arguments
    ///
    /// * `player` - Either member of the couple
    /// * `watchers` - Participant registry, updated for both partners
    /// * `names` - Name registry, where the couple name is released
    ///
    /// # Returns
    ///
    /// The two former members of the dissolved couple
    ///
    /// # Errors
    ///
    /// Returns `Error::NotPaired` if the player is not part of a couple.
    pub fn unpair(
        &mut self,
        player: Id,
        watchers: &mut Watchers,
        names: &mut names::Names,
    ) -> Result<[Id; 2], Error> {
        let team_id = self
            .player_to_team
            .get(&player)
            .copied()
            .ok_or(Error::NotPaired)?;
        let members = self
            .team_to_players
            .remove(&team_id)
            .ok_or(Error::NotPaired)?;

        for member in members {
            self.player_to_team.remove(&member);
            if let Some(watcher::Value::Player(player_value)) = watchers.get_watcher_value(member)
            {
                watchers.update_watcher_value(
                    member,
                    watcher::Value::Player(PlayerValue::Solo {
                        name: player_value.name().to_owned(),
                        avatar: player_value.avatar().to_owned(),
                    }),
                );
            }
        }

        self.team_names.remove(&team_id);
        names.remove(team_id);

        Ok(members)
    }

    /// Removes a player from pairing entirely
    ///
    /// Dissolves their couple if they have one and drops every request
    /// they issued or received.
    ///
    /// # Arguments
    ///
    /// * `player` - The player leaving the room
    /// * `watchers` - Participant registry, updated for a former partner
    /// * `names` - Name registry, where a dissolved couple name is released
    ///
    /// # Returns
    ///
    /// The former partner's id if a couple was dissolved, otherwise `None`
    pub fn remove_player(
        &mut self,
        player: Id,
        watchers: &mut Watchers,
        names: &mut names::Names,
    ) -> Option<Id> {
        self.requests.remove(&player);
        self.requests.retain(|_, wanted| *wanted != player);

        let members = self.unpair(player, watchers, names).ok()?;
        members.into_iter().find(|id| *id != player)
    }

    /// Moves a player's pairing records onto a fresh connection id
    ///
    /// Used during reconnection together with [`Watchers::reassign`] and
    /// [`names::Names::reassign`].
    ///
    /// # Arguments
    ///
    /// * `old` - The stale connection id
    /// * `new` - The fresh connection id
    pub fn reassign(&mut self, old: Id, new: Id) {
        if let Some(target) = self.requests.remove(&old) {
            self.requests.insert(new, target);
        }
        for wanted in self.requests.values_mut() {
            if *wanted == old {
                *wanted = new;
            }
        }
        if let Some(team_id) = self.player_to_team.remove(&old) {
            self.player_to_team.insert(new, team_id);
            if let Some(members) = self.team_to_players.get_mut(&team_id) {
                for member in members.iter_mut() {
                    if *member == old {
                        *member = new;
                    }
                }
            }
        }
    }

    /// Gets the couple id for a specific player
    ///
    /// # Arguments
    ///
    /// * `player` - The player's connection id
    ///
    /// # Returns
    ///
    /// `Some(Id)` of the couple, or `None` if the player is unpaired
    pub fn team_of(&self, player: Id) -> Option<Id> {
        self.player_to_team.get(&player).copied()
    }

    /// Gets the two members of a couple
    ///
    /// # Arguments
    ///
    /// * `team_id` - The couple's id
    ///
    /// # Returns
    ///
    /// The two member ids, or `None` for an unknown couple
    pub fn members_of(&self, team_id: Id) -> Option<[Id; 2]> {
        self.team_to_players.get(&team_id).copied()
    }

    /// Gets a player's partner
    ///
    /// # Arguments
    ///
    /// * `player` - The player's connection id
    ///
    /// # Returns
    ///
    /// The partner's id, or `None` if the player is unpaired
    pub fn partner_of(&self, player: Id) -> Option<Id> {
        let team_id = self.team_of(player)?;
        self.members_of(team_id)?
            .into_iter()
            .find(|id| *id != player)
    }

    /// Gets the display name of a couple
    ///
    /// # Arguments
    ///
    /// * `team_id` - The couple's id
    ///
    /// # Returns
    ///
    /// The display name, or `None` for an unknown couple
    pub fn team_name(&self, team_id: Id) -> Option<String> {
        self.team_names.get(&team_id).cloned()
    }

    /// Gets all couple ids
    pub fn all_ids(&self) -> Vec<Id> {
        self.team_to_players.keys().copied().collect_vec()
    }

    /// Gets the number of couples
    pub fn team_count(&self) -> usize {
        self.team_to_players.len()
    }

    /// Gets the display names of all couples for the lobby
    ///
    /// # Returns
    ///
    /// A truncated list of couple names, sorted for stable display
    pub fn team_names_list(&self) -> TruncatedVec<String> {
        const LIMIT: usize = 50;
        TruncatedVec::new(
            self.team_names.values().sorted().cloned(),
            LIMIT,
            self.team_names.len(),
        )
    }

    /// Checks whether every rostered player is part of a couple
    ///
    /// This is the precondition for starting the game; it considers the
    /// full roster, including temporarily disconnected players.
    ///
    /// # Arguments
    ///
    /// * `watchers` - Participant registry providing the roster
    pub fn is_roster_paired(&self, watchers: &Watchers) -> bool {
        watchers
            .specific_all(watcher::ValueKind::Player)
            .iter()
            .all(|(id, _)| self.player_to_team.contains_key(id))
    }
}
