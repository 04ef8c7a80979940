//! Core game logic and state management
//!
//! This module contains the main game struct and logic for managing a
//! room of the tournament: lobby membership and pairing, the round flow
//! with host-driven scoring, standings between rounds, reconnection by
//! name, and real-time communication with all connected participants.

use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::{
    round::{
        common::AnswerError,
        config::{CurrentRound, Deck},
    },
    watcher::Value,
};

use super::{
    TruncatedVec,
    names::{self, Names, NicknameStyle},
    pairing::{self, PairingManager},
    scoreboard::{ScoreMessage, Scoreboard},
    session::Tunnel,
    watcher::{self, Id, PlayerValue, ValueKind, Watchers},
};

/// Represents the current phase or state of the game
///
/// A room starts in the lobby, where players join and pair up. Once the
/// host starts the game, rounds and standings alternate until the deck
/// runs out and the room reaches its final summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum State {
    /// Pre-game phase where players join and pair into couples
    Lobby,
    /// Currently playing a specific round
    Round(Box<CurrentRound>),
    /// Showing the standings after a completed round (with index)
    Standings(usize),
    /// Game has completed
    Done,
}

/// Global configuration options for the room
///
/// These options affect the overall behavior of the game, including couple
/// naming and answer visibility.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, garde::Validate)]
pub struct Options {
    /// Style for generated couple nicknames (None composes "A & B")
    #[garde(dive)]
    team_nicknames: Option<NicknameStyle>,
    /// Whether players' own devices show their submitted answers back
    #[garde(skip)]
    show_answers: bool,
}

/// The main game session struct
///
/// This struct represents a complete room, managing all aspects of the
/// game including participant connections, pairing, the round flow,
/// scoring, and real-time communication.
#[derive(Serialize, Deserialize)]
pub struct Game {
    /// The deck containing all rounds of this tournament
    deck: Deck,
    /// Manager for all connected participants (host, players, unassigned)
    pub watchers: Watchers,
    /// Name assignments and validation for players and couples
    names: Names,
    /// Pair requests and couple membership
    pub pairing: PairingManager,
    /// Host-awarded points and standings
    pub scoreboard: Scoreboard,
    /// Current phase/state of the game
    pub state: State,
    /// Game configuration options
    options: Options,
    /// Whether the room is locked to new participants
    locked: bool,
}

impl Debug for Game {
    /// Custom debug implementation that avoids printing large amounts of data
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("deck", &self.deck)
            .finish_non_exhaustive()
    }
}

/// Errors surfaced to clients as a transient error event
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The game has left the lobby, so fresh joins are closed
    #[error("the game has already started")]
    AlreadyStarted,
    /// The deck contains no rounds to play
    #[error("the deck has no rounds")]
    EmptyDeck,
    /// Some rostered player has no partner yet
    #[error("every player must be paired up before starting")]
    PlayersUnpaired,
    /// The room has no couples at all
    #[error("at least one couple is needed to start")]
    NoCouples,
    /// No disconnected player goes by the claimed name
    #[error("no disconnected player goes by that name")]
    IdentityUnavailable,
}

/// Messages received from different types of participants
///
/// This enum categorizes incoming messages based on the sender's role,
/// ensuring that only appropriate messages are processed from each
/// participant type.
#[derive(Debug, Deserialize, Clone)]
pub enum IncomingMessage {
    /// Messages from disconnected clients trying to (re)establish identity
    Ghost(IncomingGhostMessage),
    /// Messages from the game host
    Host(IncomingHostMessage),
    /// Messages from unassigned connections (not yet players)
    Unassigned(IncomingUnassignedMessage),
    /// Messages from active players
    Player(IncomingPlayerMessage),
}

impl IncomingMessage {
    /// Validates that a message matches the sender's participant type
    ///
    /// # Arguments
    ///
    /// * `sender_kind` - The type of participant sending the message
    ///
    /// # Returns
    ///
    /// `true` if the message type matches the sender type, `false` otherwise
    fn follows(&self, sender_kind: ValueKind) -> bool {
        matches!(
            (self, sender_kind),
            (IncomingMessage::Host(_), ValueKind::Host)
                | (IncomingMessage::Player(_), ValueKind::Player)
                | (IncomingMessage::Unassigned(_), ValueKind::Unassigned)
        )
    }
}

/// Messages that can be sent by active players
#[derive(Debug, Deserialize, Clone)]
pub enum IncomingPlayerMessage {
    /// Free-text answer (open-ended and pool selection rounds)
    TextAnswer(String),
    /// Option index answer (multiple choice and binary rounds)
    IndexAnswer(usize),
    /// Free-text answers covering both partners, keyed by name
    TextAnswerForBoth(BTreeMap<String, String>),
    /// Option index answers covering both partners, keyed by name
    IndexAnswerForBoth(BTreeMap<String, usize>),
    /// Ask the named player to pair up (lobby only)
    RequestPair(String),
    /// Dissolve the sender's couple (lobby only)
    Unpair,
    /// Leave the room for good
    Leave,
}

/// Messages that can be sent by unassigned connections
#[derive(Debug, Deserialize, Clone)]
pub enum IncomingUnassignedMessage {
    /// Request to join with a name and avatar and become a player
    NameRequest {
        /// The requested player name
        name: String,
        /// The chosen avatar token
        avatar: String,
    },
}

/// Messages that can be sent by connections without an established identity
#[derive(Debug, Deserialize, Clone)]
pub enum IncomingGhostMessage {
    /// Request a fresh identity (the join form path)
    DemandId,
    /// Reclaim the identity of a disconnected player by name
    ClaimIdentity(String),
}

/// Messages that can be sent by the game host
#[derive(Debug, Deserialize, Clone)]
pub enum IncomingHostMessage {
    /// Leave the lobby and play the first round
    Start,
    /// Advance to the next phase, round, or the summary
    Next,
    /// Reveal the named player's answer (scoring phase)
    Reveal(String),
    /// Hand out points to a couple (scoring phase)
    Award {
        /// The couple receiving the points
        team: Id,
        /// Explicit amount, or `None` for the round's default
        points: Option<u64>,
    },
    /// Send the current round back to answering
    Reopen,
    /// Lock or unlock the room to new participants
    Lock(bool),
    /// End the game for everyone
    End,
}

/// One line of the lobby roster
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub struct RosterEntry {
    /// The player's name
    pub name: String,
    /// The player's avatar token
    pub avatar: String,
    /// Whether the player currently has a live connection
    pub connected: bool,
    /// The name of the player's couple, if they are paired
    pub team_name: Option<String>,
}

/// A snapshot of the lobby: who is in the room and how they are paired
#[derive(Debug, Serialize, Clone)]
pub struct LobbyUpdate {
    /// The players in the room
    pub players: TruncatedVec<RosterEntry>,
    /// The display names of the formed couples
    pub teams: TruncatedVec<String>,
}

/// Standings data for display between rounds
///
/// Contains both current standings and the standings before the current
/// round, for ranking movement visualization.
#[derive(Debug, Serialize, Clone)]
pub struct StandingsMessage {
    /// Current standings as (couple name, score) in descending order
    pub current: TruncatedVec<(String, u64)>,
    /// Standings before the current round for comparison
    pub prior: TruncatedVec<(String, u64)>,
}

/// Summary information sent at the end of the game
///
/// This enum provides different views of the game results depending
/// on whether the recipient is a player or the host.
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum SummaryMessage {
    /// Summary for individual players
    Player {
        /// The couple's final score information
        score: Option<ScoreMessage>,
        /// Points the couple earned in each round
        points: Vec<u64>,
        /// The deck that was played
        deck: Deck,
    },
    /// Summary for the game host with per-round statistics
    Host {
        /// Statistics for each round: (couples awarded, couples not awarded)
        stats: Vec<(usize, usize)>,
        /// Number of couples that were awarded points at least once
        team_count: usize,
        /// The deck that was played
        deck: Deck,
        /// Game options that were used
        options: Options,
    },
}

/// Metadata information about the game state
///
/// This provides contextual information that participants need
/// to understand their current status and available actions.
#[derive(Debug, Serialize, Clone)]
pub enum MetainfoMessage {
    /// Information for the game host
    Host {
        /// Whether the room is locked to new participants
        locked: bool,
    },
    /// Information for players
    Player {
        /// The couple's current total score
        score: u64,
        /// Whether players' own devices show their submitted answers back
        show_answers: bool,
    },
}

/// The publicly visible status of a room, for pre-join queries
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum RoomStatus {
    /// The room is in the lobby and joinable
    Lobby {
        /// Number of players currently in the room
        player_count: usize,
    },
    /// The game is being played; only identity reclaims are possible
    InProgress {
        /// Index of the current round
        round: usize,
        /// Total number of rounds in the deck
        count: usize,
    },
    /// The game has ended
    Ended,
}

/// Update messages sent to participants about game state changes
///
/// These messages inform participants about changes that affect their
/// view or interaction with the game.
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// Assign a unique connection id to a participant
    IdAssign(Id),
    /// Prompt the participant to choose a name and avatar
    NameChoose,
    /// Confirm a join with the assigned name and avatar
    NameAssign {
        /// The assigned player name
        name: String,
        /// The assigned avatar token
        avatar: String,
    },
    /// Report an error with name validation
    NameError(names::Error),
    /// Report an error with a pair request
    PairError(pairing::Error),
    /// Report a rejected answer submission
    AnswerRejected(AnswerError),
    /// Report a game-level error
    Error(Error),
    /// Update the lobby roster and couples
    Lobby(LobbyUpdate),
    /// Tell a player that someone asked to pair with them
    PairRequested {
        /// Name of the requesting player
        from: String,
    },
    /// Tell a player that their couple has formed
    PairAssign {
        /// The display name of the new couple
        team_name: String,
        /// The partner's name
        partner: String,
    },
    /// Tell a player that their couple was dissolved
    Unpaired,
    /// The host started the game
    GameStarted,
    /// Send standings information between rounds
    Standings {
        /// The standings data to display
        standings: StandingsMessage,
    },
    /// Send individual score information
    Score {
        /// The couple's score information
        score: Option<ScoreMessage>,
    },
    /// A couple was awarded points
    ScoreUpdated {
        /// The couple receiving the points
        team_id: Id,
        /// The couple's display name
        team_name: String,
        /// The amount handed out in this award
        awarded: u64,
        /// The couple's score after the award
        score: Option<ScoreMessage>,
    },
    /// Send game summary information
    Summary(SummaryMessage),
}

/// Sync messages sent to participants to synchronize their view with game state
///
/// These messages are sent when participants connect or when their view
/// needs to be completely synchronized with the current game state.
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum SyncMessage {
    /// Sync the lobby roster and couples
    Lobby(LobbyUpdate),
    /// Sync standings view with position information
    Standings {
        /// Index of the completed round
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The standings data to display
        standings: StandingsMessage,
    },
    /// Sync individual score view with position information
    Score {
        /// Index of the completed round
        index: usize,
        /// Total number of rounds in the deck
        count: usize,
        /// The couple's score information
        score: Option<ScoreMessage>,
    },
    /// Sync metadata about the game state
    Metainfo(MetainfoMessage),
    /// Sync game summary information
    Summary(SummaryMessage),
    /// Participant is not allowed to join
    NotAllowed,
}

// Convenience methods
impl Game {
    /// Gets the score information for the couple a watcher belongs to
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - The id of the watcher to get score for
    ///
    /// # Returns
    ///
    /// Score information if the watcher's couple has awards, otherwise `None`
    fn score(&self, watcher_id: Id) -> Option<ScoreMessage> {
        self.scoreboard.score(self.pairing.team_of(watcher_id)?)
    }

    /// Builds the current lobby snapshot
    ///
    /// # Arguments
    ///
    /// * `tunnel_finder` - Function to find active communication tunnels
    fn lobby_update<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) -> LobbyUpdate {
        const LIMIT: usize = 50;

        let players = self
            .watchers
            .specific_all(ValueKind::Player)
            .into_iter()
            .filter_map(|(id, value)| match value {
                Value::Player(player_value) => Some(RosterEntry {
                    name: player_value.name().to_owned(),
                    avatar: player_value.avatar().to_owned(),
                    connected: tunnel_finder(id).is_some(),
                    team_name: self
                        .pairing
                        .team_of(id)
                        .and_then(|team_id| self.pairing.team_name(team_id)),
                }),
                _ => None,
            })
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect_vec();

        let count = players.len();
        LobbyUpdate {
            players: TruncatedVec::new(players.into_iter(), LIMIT, count),
            teams: self.pairing.team_names_list(),
        }
    }

    /// Broadcasts the current lobby snapshot to everyone in the room
    fn announce_lobby<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) {
        self.watchers.announce(
            &UpdateMessage::Lobby(self.lobby_update(&tunnel_finder)).into(),
            tunnel_finder,
        );
    }

    /// Creates a standings message with couple ids resolved to names
    fn standings_message(&self) -> StandingsMessage {
        let [current, prior] = self.scoreboard.last_two_scores_descending();

        let id_map = |i| self.names.get_name(&i).unwrap_or("Unknown".to_owned());

        let id_score_map = |(id, s)| (id_map(id), s);

        StandingsMessage {
            current: current.map(id_score_map),
            prior: prior.map(id_score_map),
        }
    }
}

impl Game {
    /// Creates a new game instance with the provided configuration
    ///
    /// Initializes a new room with the given deck, game options, and host
    /// identifier. Sets up the initial state, scoring system, name
    /// management, and pairing.
    ///
    /// # Arguments
    ///
    /// * `deck` - The deck containing the rounds to play
    /// * `options` - Game options including couple naming and visibility
    /// * `host_id` - Unique identifier for the game host
    ///
    /// # Returns
    ///
    /// A new Game instance ready to accept players
    pub fn new(deck: Deck, options: Options, host_id: Id) -> Self {
        Self {
            deck,
            watchers: Watchers::with_host_id(host_id),
            names: Names::default(),
            pairing: PairingManager::new(options.team_nicknames),
            scoreboard: Scoreboard::default(),
            state: State::Lobby,
            options,
            locked: false,
        }
    }

    /// Plays the first round of the deck
    ///
    /// Opens the first scoreboard bucket and hands control to the round
    /// state. An empty deck goes straight to the summary.
    ///
    /// # Arguments
    ///
    /// * `schedule_message` - Function to schedule delayed messages for timing
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    pub fn play<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        if let Some(round) = self.deck.rounds.first() {
            let mut current_round = CurrentRound {
                index: 0,
                state: round.to_state(),
            };

            self.scoreboard.open_round();
            current_round.state.play(
                &self.watchers,
                &self.pairing,
                schedule_message,
                &tunnel_finder,
                0,
                self.deck.len(),
            );

            self.state = State::Round(Box::new(current_round));
        } else {
            self.announce_summary(tunnel_finder);
        }
    }

    /// Validates the start preconditions and launches the game
    ///
    /// Starting requires a non-empty deck, at least one couple, and every
    /// rostered player to be paired. Violations are reported back to the
    /// host as error events and leave the lobby unchanged.
    fn start_game<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        host_id: Id,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        let refusal = if self.deck.is_empty() {
            Some(Error::EmptyDeck)
        } else if self.pairing.team_count() == 0 {
            Some(Error::NoCouples)
        } else if !self.pairing.is_roster_paired(&self.watchers) {
            Some(Error::PlayersUnpaired)
        } else {
            None
        };

        if let Some(error) = refusal {
            self.watchers.send_message(
                &UpdateMessage::Error(error).into(),
                host_id,
                tunnel_finder,
            );
            return;
        }

        self.watchers
            .announce(&UpdateMessage::GameStarted.into(), &tunnel_finder);
        self.play(schedule_message, tunnel_finder);
    }

    /// Marks the current round as complete and shows the standings
    ///
    /// This sends the standings to the host and each couple's score to its
    /// players, matching the ready-for-next-round screen.
    ///
    /// # Arguments
    ///
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    pub fn finish_round<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: F) {
        if let State::Round(current_round) = &self.state {
            let index = current_round.index;
            self.state = State::Standings(index);

            let standings_message = self.standings_message();

            self.watchers.announce_with(
                |watcher_id, watcher_kind| {
                    Some(match watcher_kind {
                        ValueKind::Host => UpdateMessage::Standings {
                            standings: standings_message.clone(),
                        }
                        .into(),
                        ValueKind::Player => UpdateMessage::Score {
                            score: self.score(watcher_id),
                        }
                        .into(),
                        ValueKind::Unassigned => return None,
                    })
                },
                tunnel_finder,
            );
        }
    }

    /// Sends the final game summary to all participants
    ///
    /// This method transitions the game to the Done state and sends
    /// appropriate summary messages to the host and players.
    ///
    /// # Arguments
    ///
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    fn announce_summary<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: F) {
        self.state = State::Done;

        self.watchers.announce_with(
            |id, vk| match vk {
                ValueKind::Host => Some(
                    UpdateMessage::Summary({
                        let (team_count, stats) = self.scoreboard.host_summary();

                        SummaryMessage::Host {
                            stats,
                            team_count,
                            deck: self.deck.clone(),
                            options: self.options,
                        }
                    })
                    .into(),
                ),
                ValueKind::Player => Some(
                    UpdateMessage::Summary(SummaryMessage::Player {
                        score: self.score(id),
                        points: self
                            .pairing
                            .team_of(id)
                            .map(|team_id| self.scoreboard.team_summary(team_id))
                            .unwrap_or_default(),
                        deck: self.deck.clone(),
                    })
                    .into(),
                ),
                ValueKind::Unassigned => None,
            },
            tunnel_finder,
        );
    }

    /// Marks the game as done and disconnects all participants
    ///
    /// This method finalizes the session by setting the state to Done
    /// and removing all participant sessions, effectively ending the game.
    ///
    /// # Arguments
    ///
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    pub fn mark_as_done<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: F) {
        self.state = State::Done;

        let watchers = self
            .watchers
            .vec(&tunnel_finder)
            .iter()
            .map(|(x, _, _)| *x)
            .collect_vec();

        for watcher in watchers {
            self.watchers
                .remove_watcher_session(&watcher, &tunnel_finder);
        }
    }

    /// Sends metadata information to a player about the game
    fn update_player_with_options<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher: Id,
        tunnel_finder: F,
    ) {
        self.watchers.send_state(
            &SyncMessage::Metainfo(MetainfoMessage::Player {
                score: self.score(watcher).map_or(0, |x| x.points),
                show_answers: self.options.show_answers,
            })
            .into(),
            watcher,
            tunnel_finder,
        );
    }

    /// Initiates interactions with an unassigned participant
    ///
    /// In the lobby this prompts for the join form; once the game has
    /// started, unassigned connections are told the room is closed to
    /// fresh joins.
    fn handle_unassigned<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher: Id,
        tunnel_finder: F,
    ) {
        if matches!(self.state, State::Lobby) {
            self.watchers
                .send_message(&UpdateMessage::NameChoose.into(), watcher, tunnel_finder);
        } else {
            self.watchers
                .send_state(&SyncMessage::NotAllowed.into(), watcher, tunnel_finder);
        }
    }

    /// Assigns a name to a participant and makes them a player
    ///
    /// # Arguments
    ///
    /// * `watcher` - id of the participant to assign a name to
    /// * `name` - The requested name
    /// * `avatar` - The requested avatar token (truncated to the limit)
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    ///
    /// # Errors
    ///
    /// Returns a `names::Error` if the name is invalid or already taken.
    fn assign_player_name<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher: Id,
        name: &str,
        avatar: &str,
        tunnel_finder: F,
    ) -> Result<(), names::Error> {
        let name = self.names.set_name(watcher, name)?;
        let avatar: String = avatar
            .chars()
            .take(crate::constants::identity::MAX_AVATAR_LENGTH)
            .collect();

        self.watchers.update_watcher_value(
            watcher,
            Value::Player(PlayerValue::Solo {
                name: name.clone(),
                avatar: avatar.clone(),
            }),
        );

        self.update_player_with_name(watcher, &name, &avatar, tunnel_finder);

        Ok(())
    }

    /// Sends messages to the player about their newly assigned name
    ///
    /// This notifies the player of their name and avatar, shares their
    /// metadata, refreshes the lobby for everyone, and sends the current
    /// game state to the newly named player.
    pub fn update_player_with_name<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher: Id,
        name: &str,
        avatar: &str,
        tunnel_finder: F,
    ) {
        self.watchers.send_message(
            &UpdateMessage::NameAssign {
                name: name.to_owned(),
                avatar: avatar.to_owned(),
            }
            .into(),
            watcher,
            &tunnel_finder,
        );

        self.update_player_with_options(watcher, &tunnel_finder);

        if !name.is_empty() && matches!(self.state, State::Lobby) {
            // Announce to others of user joining
            self.announce_lobby(&tunnel_finder);
        }

        self.watchers.send_state(
            &self.state_message(watcher, ValueKind::Player, &tunnel_finder),
            watcher,
            tunnel_finder,
        );
    }

    // Network

    /// Adds a new unassigned participant to the room
    ///
    /// # Arguments
    ///
    /// * `watcher` - Unique id for the new participant
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    ///
    /// # Errors
    ///
    /// Returns a `watcher::Error` if the room is full.
    pub fn add_unassigned<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher: Id,
        tunnel_finder: F,
    ) -> Result<(), watcher::Error> {
        self.watchers.add_watcher(watcher, Value::Unassigned)?;

        if !self.locked {
            self.handle_unassigned(watcher, tunnel_finder);
        }

        Ok(())
    }

    /// Handles a pair request from a player, forming a couple when mutual
    fn request_pair<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        requester: Id,
        target_name: &str,
        tunnel_finder: F,
    ) {
        if !matches!(self.state, State::Lobby) {
            return;
        }

        let target = self
            .names
            .get_id(target_name)
            .filter(|id| matches!(self.watchers.get_watcher_value(*id), Some(Value::Player(_))));

        let result = match target {
            Some(target) => self
                .pairing
                .request(requester, target, &mut self.watchers, &mut self.names),
            None => Err(pairing::Error::UnknownPlayer),
        };

        match result {
            Err(error) => {
                self.watchers.send_message(
                    &UpdateMessage::PairError(error).into(),
                    requester,
                    tunnel_finder,
                );
            }
            Ok(None) => {
                if let (Some(target), Some(from)) = (target, self.watchers.get_name(requester)) {
                    self.watchers.send_message(
                        &UpdateMessage::PairRequested { from }.into(),
                        target,
                        tunnel_finder,
                    );
                }
            }
            Ok(Some(formed)) => {
                for player in formed.players {
                    let partner = formed
                        .players
                        .into_iter()
                        .find(|id| *id != player)
                        .unwrap_or(player);
                    self.watchers.send_message(
                        &UpdateMessage::PairAssign {
                            team_name: formed.team_name.clone(),
                            partner: self.watchers.get_name(partner).unwrap_or_default(),
                        }
                        .into(),
                        player,
                        &tunnel_finder,
                    );
                }
                self.announce_lobby(&tunnel_finder);
            }
        }
    }

    /// Handles a player dissolving their couple
    fn unpair<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, player: Id, tunnel_finder: F) {
        if !matches!(self.state, State::Lobby) {
            return;
        }

        match self
            .pairing
            .unpair(player, &mut self.watchers, &mut self.names)
        {
            Err(error) => {
                self.watchers.send_message(
                    &UpdateMessage::PairError(error).into(),
                    player,
                    tunnel_finder,
                );
            }
            Ok(members) => {
                for member in members {
                    self.watchers.send_message(
                        &UpdateMessage::Unpaired.into(),
                        member,
                        &tunnel_finder,
                    );
                }
                self.announce_lobby(&tunnel_finder);
            }
        }
    }

    /// Removes a player from the room for good
    ///
    /// Their couple is dissolved, their name is released, and the lobby is
    /// refreshed. A mid-game leave keeps the couple's score history.
    fn remove_player<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, player: Id, tunnel_finder: F) {
        if let Some(partner) = self
            .pairing
            .remove_player(player, &mut self.watchers, &mut self.names)
        {
            self.watchers
                .send_message(&UpdateMessage::Unpaired.into(), partner, &tunnel_finder);
        }

        self.names.remove(player);
        self.watchers.remove_watcher(player);
        self.watchers
            .remove_watcher_session(&player, &tunnel_finder);

        if matches!(self.state, State::Lobby) {
            self.announce_lobby(&tunnel_finder);
        }
    }

    /// Handles messages from connections without an established identity
    ///
    /// Ghost messages implement the reconnection resolver: a fresh
    /// connection either demands a brand new identity (the join form path)
    /// or claims the identity of a disconnected player by name.
    fn handle_ghost<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        message: IncomingGhostMessage,
        tunnel_finder: F,
    ) {
        if self.watchers.has_watcher(watcher_id) {
            return;
        }

        match message {
            IncomingGhostMessage::DemandId => {
                if self.add_unassigned(watcher_id, &tunnel_finder).is_ok() {
                    self.watchers.send_message(
                        &UpdateMessage::IdAssign(watcher_id).into(),
                        watcher_id,
                        tunnel_finder,
                    );
                }
            }
            IncomingGhostMessage::ClaimIdentity(name) => {
                if let Err(error) = self.claim_identity(watcher_id, &name, &tunnel_finder) {
                    self.watchers.send_message(
                        &UpdateMessage::Error(error).into(),
                        watcher_id,
                        tunnel_finder,
                    );
                }
            }
        }
    }

    /// Rebinds a disconnected player's identity onto a fresh connection
    ///
    /// The player's watcher record, name, pairing membership, and any
    /// answers in the live round move to the new connection id, and the
    /// reclaimed player receives a full state synchronization.
    ///
    /// # Arguments
    ///
    /// * `new_id` - The fresh connection id
    /// * `name` - The claimed player name
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    ///
    /// # Errors
    ///
    /// Returns `Error::IdentityUnavailable` when the name is unknown, does
    /// not belong to a player, or its player is still connected. Clients
    /// treat this as the signal to drop their stored credentials.
    pub fn claim_identity<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        new_id: Id,
        name: &str,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        let old_id = self.names.get_id(name).ok_or(Error::IdentityUnavailable)?;

        if !matches!(
            self.watchers.get_watcher_value(old_id),
            Some(Value::Player(_))
        ) {
            return Err(Error::IdentityUnavailable);
        }

        if Watchers::is_alive(old_id, &tunnel_finder) {
            return Err(Error::IdentityUnavailable);
        }

        self.watchers
            .reassign(old_id, new_id)
            .map_err(|_| Error::IdentityUnavailable)?;
        self.names.reassign(old_id, new_id);
        self.pairing.reassign(old_id, new_id);
        if let State::Round(current_round) = &mut self.state {
            current_round.state.reassign(old_id, new_id);
        }

        self.watchers.send_message(
            &UpdateMessage::IdAssign(new_id).into(),
            new_id,
            &tunnel_finder,
        );
        self.update_session(new_id, &tunnel_finder);

        if matches!(self.state, State::Lobby) {
            self.announce_lobby(&tunnel_finder);
        }

        Ok(())
    }

    /// Lists the names of rostered players without a live connection
    ///
    /// This answers the pre-rejoin query a reconnecting client makes to
    /// offer its user the pick-your-identity list.
    ///
    /// # Arguments
    ///
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    pub fn disconnected_players<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        tunnel_finder: F,
    ) -> Vec<String> {
        self.watchers
            .specific_all(ValueKind::Player)
            .into_iter()
            .filter(|(id, _)| tunnel_finder(*id).is_none())
            .filter_map(|(_, value)| match value {
                Value::Player(player_value) => Some(player_value.name().to_owned()),
                _ => None,
            })
            .sorted()
            .collect_vec()
    }

    /// Reports the publicly visible status of the room
    ///
    /// This answers the pre-join room check: whether the room is still in
    /// the lobby (fresh joins possible), mid-game (reclaims only), or over.
    pub fn room_status(&self) -> RoomStatus {
        match &self.state {
            State::Lobby => RoomStatus::Lobby {
                player_count: self.watchers.specific_count(ValueKind::Player),
            },
            State::Round(current_round) => RoomStatus::InProgress {
                round: current_round.index,
                count: self.deck.len(),
            },
            State::Standings(index) => RoomStatus::InProgress {
                round: *index,
                count: self.deck.len(),
            },
            State::Done => RoomStatus::Ended,
        }
    }

    /// Handles incoming messages from participants
    ///
    /// This method processes all incoming messages, validates that they
    /// are appropriate for the sender's role, and routes them to the
    /// correct handlers based on the current game state.
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - id of the participant sending the message
    /// * `message` - The incoming message to process
    /// * `schedule_message` - Function to schedule delayed messages for timing
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    pub fn receive_message<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(crate::AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        message: IncomingMessage,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        let message = match message {
            IncomingMessage::Ghost(ghost_message) => {
                self.handle_ghost(watcher_id, ghost_message, tunnel_finder);
                return;
            }
            message => message,
        };

        let Some(watcher_value) = self.watchers.get_watcher_value(watcher_id) else {
            return;
        };

        if !message.follows(watcher_value.kind()) {
            return;
        }

        match message {
            IncomingMessage::Unassigned(_) if self.locked => {}
            IncomingMessage::Host(IncomingHostMessage::Lock(lock_state)) => {
                self.locked = lock_state;
            }
            IncomingMessage::Host(IncomingHostMessage::End) => {
                if !matches!(self.state, State::Done) {
                    self.announce_summary(&tunnel_finder);
                }
                self.mark_as_done(tunnel_finder);
            }
            IncomingMessage::Unassigned(IncomingUnassignedMessage::NameRequest {
                name,
                avatar,
            }) => {
                if matches!(self.state, State::Lobby) {
                    if let Err(e) =
                        self.assign_player_name(watcher_id, &name, &avatar, &tunnel_finder)
                    {
                        self.watchers.send_message(
                            &UpdateMessage::NameError(e).into(),
                            watcher_id,
                            tunnel_finder,
                        );
                    }
                } else {
                    self.watchers.send_message(
                        &UpdateMessage::Error(Error::AlreadyStarted).into(),
                        watcher_id,
                        tunnel_finder,
                    );
                }
            }
            IncomingMessage::Player(IncomingPlayerMessage::RequestPair(target_name)) => {
                self.request_pair(watcher_id, &target_name, tunnel_finder);
            }
            IncomingMessage::Player(IncomingPlayerMessage::Unpair) => {
                self.unpair(watcher_id, tunnel_finder);
            }
            IncomingMessage::Player(IncomingPlayerMessage::Leave) => {
                self.remove_player(watcher_id, tunnel_finder);
            }
            message => match &mut self.state {
                State::Lobby => {
                    if let IncomingMessage::Host(IncomingHostMessage::Start) = message {
                        self.start_game(watcher_id, schedule_message, tunnel_finder);
                    }
                }
                State::Round(current_round) => {
                    if current_round.state.receive_message(
                        watcher_id,
                        message,
                        &mut self.scoreboard,
                        &self.watchers,
                        &self.pairing,
                        &mut schedule_message,
                        &tunnel_finder,
                        current_round.index,
                        self.deck.len(),
                    ) {
                        self.finish_round(tunnel_finder);
                    }
                }
                State::Standings(index) => {
                    if let IncomingMessage::Host(IncomingHostMessage::Next) = message {
                        let next_index = *index + 1;
                        if let Some(round) = self.deck.rounds.get(next_index) {
                            let mut state = round.to_state();

                            self.scoreboard.open_round();
                            state.play(
                                &self.watchers,
                                &self.pairing,
                                schedule_message,
                                &tunnel_finder,
                                next_index,
                                self.deck.len(),
                            );

                            self.state = State::Round(Box::new(CurrentRound {
                                index: next_index,
                                state,
                            }));
                        } else {
                            self.announce_summary(&tunnel_finder);
                        }
                    }
                }
                State::Done => {
                    if let IncomingMessage::Host(IncomingHostMessage::Next) = message {
                        self.mark_as_done(tunnel_finder);
                    }
                }
            },
        }
    }

    /// Handles scheduled alarm messages for timed game events
    ///
    /// Alarm messages close the answering phase of a round whose time
    /// limit has expired. Alarms referencing a round that is no longer
    /// live are ignored.
    ///
    /// # Arguments
    ///
    /// * `message` - The alarm message to process
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    pub fn receive_alarm<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        message: crate::AlarmMessage,
        tunnel_finder: F,
    ) {
        if let State::Round(current_round) = &mut self.state {
            if current_round.state.receive_alarm(
                &self.watchers,
                &tunnel_finder,
                message,
                current_round.index,
            ) {
                self.finish_round(tunnel_finder);
            }
        }
    }

    /// Returns the message necessary to synchronize a participant's state
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - id of the participant to synchronize
    /// * `watcher_kind` - Type of participant (host, player, unassigned)
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    ///
    /// # Returns
    ///
    /// A SyncMessage containing the current state information appropriate
    /// for the participant
    pub fn state_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: Id,
        watcher_kind: ValueKind,
        tunnel_finder: F,
    ) -> super::SyncMessage {
        match &self.state {
            State::Lobby => SyncMessage::Lobby(self.lobby_update(tunnel_finder)).into(),
            State::Round(current_round) => current_round.state.state_message(
                watcher_id,
                watcher_kind,
                &self.watchers,
                tunnel_finder,
                current_round.index,
                self.deck.len(),
            ),
            State::Standings(index) => match watcher_kind {
                ValueKind::Host | ValueKind::Unassigned => SyncMessage::Standings {
                    index: *index,
                    count: self.deck.len(),
                    standings: self.standings_message(),
                }
                .into(),
                ValueKind::Player => SyncMessage::Score {
                    index: *index,
                    count: self.deck.len(),
                    score: self.score(watcher_id),
                }
                .into(),
            },
            State::Done => match watcher_kind {
                ValueKind::Host => SyncMessage::Summary({
                    let (team_count, stats) = self.scoreboard.host_summary();
                    SummaryMessage::Host {
                        stats,
                        team_count,
                        deck: self.deck.clone(),
                        options: self.options,
                    }
                })
                .into(),
                ValueKind::Player => SyncMessage::Summary(SummaryMessage::Player {
                    score: self.score(watcher_id),
                    points: self
                        .pairing
                        .team_of(watcher_id)
                        .map(|team_id| self.scoreboard.team_summary(team_id))
                        .unwrap_or_default(),
                    deck: self.deck.clone(),
                })
                .into(),
                ValueKind::Unassigned => SyncMessage::NotAllowed.into(),
            },
        }
    }

    /// Updates the session associated with a participant (for reconnection)
    ///
    /// This method handles participant reconnection by re-sending their
    /// identity and the current game state. It handles different
    /// participant types appropriately and manages locked rooms.
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - id of the participant reconnecting
    /// * `tunnel_finder` - Function to find communication tunnels for participants
    pub fn update_session<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(watcher_value) = self.watchers.get_watcher_value(watcher_id) else {
            return;
        };

        match watcher_value.clone() {
            Value::Host => {
                self.watchers.send_state(
                    &self.state_message(watcher_id, watcher_value.kind(), &tunnel_finder),
                    watcher_id,
                    &tunnel_finder,
                );
                self.watchers.send_state(
                    &SyncMessage::Metainfo(MetainfoMessage::Host {
                        locked: self.locked,
                    })
                    .into(),
                    watcher_id,
                    tunnel_finder,
                );
            }
            Value::Player(player_value) => {
                if let PlayerValue::Paired {
                    team_name, team_id, ..
                } = &player_value
                {
                    let partner = self
                        .pairing
                        .members_of(*team_id)
                        .into_iter()
                        .flatten()
                        .find(|id| *id != watcher_id)
                        .and_then(|id| self.watchers.get_name(id))
                        .unwrap_or_default();
                    self.watchers.send_message(
                        &UpdateMessage::PairAssign {
                            team_name: team_name.clone(),
                            partner,
                        }
                        .into(),
                        watcher_id,
                        &tunnel_finder,
                    );
                }
                self.watchers.send_message(
                    &UpdateMessage::NameAssign {
                        name: player_value.name().to_owned(),
                        avatar: player_value.avatar().to_owned(),
                    }
                    .into(),
                    watcher_id,
                    &tunnel_finder,
                );
                self.update_player_with_options(watcher_id, &tunnel_finder);
                self.watchers.send_state(
                    &self.state_message(watcher_id, watcher_value.kind(), &tunnel_finder),
                    watcher_id,
                    &tunnel_finder,
                );
            }
            Value::Unassigned if self.locked => {}
            Value::Unassigned => {
                self.handle_unassigned(watcher_id, &tunnel_finder);
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::{cell::RefCell, collections::HashMap, rc::Rc};

    /// Shared per-participant log of serialized outgoing messages
    #[derive(Clone, Default)]
    struct MessageLog(Rc<RefCell<HashMap<Id, Vec<String>>>>);

    impl MessageLog {
        fn messages_for(&self, id: Id) -> Vec<String> {
            self.0.borrow().get(&id).cloned().unwrap_or_default()
        }

        fn last_for(&self, id: Id) -> String {
            self.messages_for(id).last().cloned().unwrap_or_default()
        }
    }

    struct MockTunnel {
        id: Id,
        log: MessageLog,
    }

    impl Tunnel for MockTunnel {
        fn send_message(&self, message: &crate::UpdateMessage) {
            self.log
                .0
                .borrow_mut()
                .entry(self.id)
                .or_default()
                .push(message.to_message());
        }

        fn send_state(&self, state: &crate::SyncMessage) {
            self.log
                .0
                .borrow_mut()
                .entry(self.id)
                .or_default()
                .push(state.to_message());
        }

        fn close(self) {}
    }

    fn tunnel_for(log: &MessageLog) -> impl Fn(Id) -> Option<MockTunnel> + '_ {
        move |id| {
            Some(MockTunnel {
                id,
                log: log.clone(),
            })
        }
    }

    fn no_alarm(_message: crate::AlarmMessage, _duration: Duration) {}

    fn test_deck() -> Deck {
        serde_json::from_value(serde_json::json!({
            "title": "Date Night",
            "rounds": [
                {
                    "OpenEnded": {
                        "title": "Where did you meet?",
                        "points_awarded": 100
                    }
                },
                {
                    "Binary": {
                        "title": "Do you cook together?",
                        "points_awarded": 50
                    }
                }
            ]
        }))
        .unwrap()
    }

    /// Creates a lobby with two paired players, returning all the ids
    fn lobby_with_couple(log: &MessageLog) -> (Game, Id, Id, Id) {
        let host = Id::new();
        let mut game = Game::new(test_deck(), Options::default(), host);
        let tunnel = tunnel_for(log);

        let alice = Id::new();
        let bob = Id::new();
        for (id, name) in [(alice, "Alice"), (bob, "Bob")] {
            game.add_unassigned(id, &tunnel).unwrap();
            game.receive_message(
                id,
                IncomingMessage::Unassigned(IncomingUnassignedMessage::NameRequest {
                    name: name.to_owned(),
                    avatar: "🦊".to_owned(),
                }),
                no_alarm,
                &tunnel,
            );
        }

        game.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::RequestPair("Bob".to_owned())),
            no_alarm,
            &tunnel,
        );
        game.receive_message(
            bob,
            IncomingMessage::Player(IncomingPlayerMessage::RequestPair("Alice".to_owned())),
            no_alarm,
            &tunnel,
        );

        (game, host, alice, bob)
    }

    #[test]
    fn test_join_and_pair_in_lobby() {
        let log = MessageLog::default();
        let (game, _, alice, bob) = lobby_with_couple(&log);

        assert_eq!(game.watchers.specific_count(ValueKind::Player), 2);
        assert_eq!(game.pairing.team_count(), 1);
        assert_eq!(game.pairing.partner_of(alice), Some(bob));

        assert!(log.messages_for(alice).iter().any(|m| m.contains("PairAssign")));
        assert!(log.messages_for(bob).iter().any(|m| m.contains("Alice & Bob")));
    }

    #[test]
    fn test_pair_request_notifies_target() {
        let log = MessageLog::default();
        let host = Id::new();
        let mut game = Game::new(test_deck(), Options::default(), host);
        let tunnel = tunnel_for(&log);

        let alice = Id::new();
        let bob = Id::new();
        for (id, name) in [(alice, "Alice"), (bob, "Bob")] {
            game.add_unassigned(id, &tunnel).unwrap();
            game.receive_message(
                id,
                IncomingMessage::Unassigned(IncomingUnassignedMessage::NameRequest {
                    name: name.to_owned(),
                    avatar: String::new(),
                }),
                no_alarm,
                &tunnel,
            );
        }

        game.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::RequestPair("Bob".to_owned())),
            no_alarm,
            &tunnel,
        );

        assert!(log.last_for(bob).contains("PairRequested"));
        assert_eq!(game.pairing.team_count(), 0);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let log = MessageLog::default();
        let host = Id::new();
        let mut game = Game::new(test_deck(), Options::default(), host);
        let tunnel = tunnel_for(&log);

        for name in ["Alice", "Alice"] {
            let id = Id::new();
            game.add_unassigned(id, &tunnel).unwrap();
            game.receive_message(
                id,
                IncomingMessage::Unassigned(IncomingUnassignedMessage::NameRequest {
                    name: name.to_owned(),
                    avatar: String::new(),
                }),
                no_alarm,
                &tunnel,
            );
        }

        assert_eq!(game.watchers.specific_count(ValueKind::Player), 1);
    }

    #[test]
    fn test_start_requires_full_pairing() {
        let log = MessageLog::default();
        let (mut game, host, _, _) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);

        // an extra solo player blocks the start
        let carol = Id::new();
        game.add_unassigned(carol, &tunnel).unwrap();
        game.receive_message(
            carol,
            IncomingMessage::Unassigned(IncomingUnassignedMessage::NameRequest {
                name: "Carol".to_owned(),
                avatar: String::new(),
            }),
            no_alarm,
            &tunnel,
        );

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Start),
            no_alarm,
            &tunnel,
        );

        assert!(matches!(game.state, State::Lobby));
        assert!(log.last_for(host).contains("PlayersUnpaired"));
    }

    #[test]
    fn test_start_requires_couples() {
        let log = MessageLog::default();
        let host = Id::new();
        let mut game = Game::new(test_deck(), Options::default(), host);
        let tunnel = tunnel_for(&log);

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Start),
            no_alarm,
            &tunnel,
        );

        assert!(matches!(game.state, State::Lobby));
        assert!(log.last_for(host).contains("NoCouples"));
    }

    #[test]
    fn test_full_game_flow() {
        let log = MessageLog::default();
        let (mut game, host, alice, bob) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);
        let team = game.pairing.team_of(alice).unwrap();

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Start),
            no_alarm,
            &tunnel,
        );
        assert!(matches!(&game.state, State::Round(r) if r.index == 0));
        assert!(log.messages_for(alice).iter().any(|m| m.contains("GameStarted")));

        // both players answer the open-ended round
        for (id, answer) in [(alice, "At a concert"), (bob, "At work")] {
            game.receive_message(
                id,
                IncomingMessage::Player(IncomingPlayerMessage::TextAnswer(answer.to_owned())),
                no_alarm,
                &tunnel,
            );
        }
        assert!(log.messages_for(host).iter().any(|m| m.contains("AllAnswersIn")));

        // host enters scoring, reveals, and awards
        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Next),
            no_alarm,
            &tunnel,
        );
        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Reveal("Alice".to_owned())),
            no_alarm,
            &tunnel,
        );
        assert!(log.messages_for(bob).iter().any(|m| m.contains("At a concert")));

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Award { team, points: None }),
            no_alarm,
            &tunnel,
        );
        assert_eq!(game.scoreboard.score(team).unwrap().points, 100);

        // complete the round, check standings, then move to the next round
        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Next),
            no_alarm,
            &tunnel,
        );
        assert!(matches!(game.state, State::Standings(0)));
        assert!(log.messages_for(host).iter().any(|m| m.contains("Standings")));

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Next),
            no_alarm,
            &tunnel,
        );
        assert!(matches!(&game.state, State::Round(r) if r.index == 1));

        // play out the binary round without any award
        for id in [alice, bob] {
            game.receive_message(
                id,
                IncomingMessage::Player(IncomingPlayerMessage::IndexAnswer(0)),
                no_alarm,
                &tunnel,
            );
        }
        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Next),
            no_alarm,
            &tunnel,
        );
        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Next),
            no_alarm,
            &tunnel,
        );
        assert!(matches!(game.state, State::Standings(1)));

        // past the last round lies the summary
        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Next),
            no_alarm,
            &tunnel,
        );
        assert!(matches!(game.state, State::Done));
        assert!(log.messages_for(alice).iter().any(|m| m.contains("Summary")));
    }

    #[test]
    fn test_reopen_round_trip() {
        let log = MessageLog::default();
        let (mut game, host, alice, bob) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);
        let team = game.pairing.team_of(alice).unwrap();

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Start),
            no_alarm,
            &tunnel,
        );
        for id in [alice, bob] {
            game.receive_message(
                id,
                IncomingMessage::Player(IncomingPlayerMessage::TextAnswer("answer".to_owned())),
                no_alarm,
                &tunnel,
            );
        }
        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Next),
            no_alarm,
            &tunnel,
        );
        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Award {
                team,
                points: Some(70),
            }),
            no_alarm,
            &tunnel,
        );
        assert_eq!(game.scoreboard.score(team).unwrap().points, 70);

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Reopen),
            no_alarm,
            &tunnel,
        );

        assert!(matches!(&game.state, State::Round(r) if r.index == 0));
        assert_eq!(game.scoreboard.score(team).unwrap().points, 0);
        assert!(log.messages_for(alice).iter().any(|m| m.contains("ReturnedToAnswering")));
    }

    #[test]
    fn test_join_closed_after_start() {
        let log = MessageLog::default();
        let (mut game, host, _, _) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Start),
            no_alarm,
            &tunnel,
        );

        let late = Id::new();
        game.add_unassigned(late, &tunnel).unwrap();
        game.receive_message(
            late,
            IncomingMessage::Unassigned(IncomingUnassignedMessage::NameRequest {
                name: "Latecomer".to_owned(),
                avatar: String::new(),
            }),
            no_alarm,
            &tunnel,
        );

        assert!(log.last_for(late).contains("AlreadyStarted"));
        assert_eq!(game.watchers.specific_count(ValueKind::Player), 2);
    }

    #[test]
    fn test_reconnection_claims_identity_and_answers() {
        let log = MessageLog::default();
        let (mut game, host, alice, bob) = lobby_with_couple(&log);
        let team = game.pairing.team_of(alice).unwrap();

        // bob drops: his tunnel vanishes, everyone else stays connected
        let with_bob_gone = |id| {
            if id == bob {
                None
            } else {
                Some(MockTunnel {
                    id,
                    log: log.clone(),
                })
            }
        };

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Start),
            no_alarm,
            &with_bob_gone,
        );
        game.receive_message(
            bob,
            IncomingMessage::Player(IncomingPlayerMessage::TextAnswer("typed".to_owned())),
            no_alarm,
            &with_bob_gone,
        );

        assert_eq!(game.disconnected_players(&with_bob_gone), vec!["Bob"]);

        let fresh = Id::new();
        game.receive_message(
            fresh,
            IncomingMessage::Ghost(IncomingGhostMessage::ClaimIdentity("Bob".to_owned())),
            no_alarm,
            &with_bob_gone,
        );

        assert!(!game.watchers.has_watcher(bob));
        assert_eq!(game.watchers.get_name(fresh), Some("Bob".to_owned()));
        assert_eq!(game.pairing.partner_of(alice), Some(fresh));
        assert_eq!(game.pairing.team_of(fresh), Some(team));
        assert!(log.messages_for(fresh).iter().any(|m| m.contains("IdAssign")));
    }

    #[test]
    fn test_claiming_connected_identity_fails() {
        let log = MessageLog::default();
        let (mut game, _, _, _) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);

        let impostor = Id::new();
        game.receive_message(
            impostor,
            IncomingMessage::Ghost(IncomingGhostMessage::ClaimIdentity("Alice".to_owned())),
            no_alarm,
            &tunnel,
        );

        assert!(log.last_for(impostor).contains("IdentityUnavailable"));
        assert!(!game.watchers.has_watcher(impostor));
    }

    #[test]
    fn test_claiming_team_name_fails() {
        let log = MessageLog::default();
        let (mut game, _, _, _) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);

        let impostor = Id::new();
        let result = game.claim_identity(impostor, "Alice & Bob", &tunnel);
        assert_eq!(result, Err(Error::IdentityUnavailable));
    }

    #[test]
    fn test_ghost_demand_id_joins_lobby() {
        let log = MessageLog::default();
        let host = Id::new();
        let mut game = Game::new(test_deck(), Options::default(), host);
        let tunnel = tunnel_for(&log);

        let ghost = Id::new();
        game.receive_message(
            ghost,
            IncomingMessage::Ghost(IncomingGhostMessage::DemandId),
            no_alarm,
            &tunnel,
        );

        assert!(game.watchers.has_watcher(ghost));
        assert!(log.messages_for(ghost).iter().any(|m| m.contains("IdAssign")));
        assert!(log.messages_for(ghost).iter().any(|m| m.contains("NameChoose")));
    }

    #[test]
    fn test_locked_room_ignores_joins() {
        let log = MessageLog::default();
        let (mut game, host, _, _) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Lock(true)),
            no_alarm,
            &tunnel,
        );

        let late = Id::new();
        game.add_unassigned(late, &tunnel).unwrap();
        game.receive_message(
            late,
            IncomingMessage::Unassigned(IncomingUnassignedMessage::NameRequest {
                name: "Latecomer".to_owned(),
                avatar: String::new(),
            }),
            no_alarm,
            &tunnel,
        );

        assert_eq!(game.watchers.specific_count(ValueKind::Player), 2);
    }

    #[test]
    fn test_leave_dissolves_couple() {
        let log = MessageLog::default();
        let (mut game, _, alice, bob) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);

        game.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::Leave),
            no_alarm,
            &tunnel,
        );

        assert!(!game.watchers.has_watcher(alice));
        assert_eq!(game.pairing.team_of(bob), None);
        assert!(log.messages_for(bob).iter().any(|m| m.contains("Unpaired")));

        // the name is free again
        let replacement = Id::new();
        game.add_unassigned(replacement, &tunnel).unwrap();
        game.receive_message(
            replacement,
            IncomingMessage::Unassigned(IncomingUnassignedMessage::NameRequest {
                name: "Alice".to_owned(),
                avatar: String::new(),
            }),
            no_alarm,
            &tunnel,
        );
        assert_eq!(game.watchers.get_name(replacement), Some("Alice".to_owned()));
    }

    #[test]
    fn test_room_status_transitions() {
        let log = MessageLog::default();
        let (mut game, host, _, _) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);

        assert_eq!(game.room_status(), RoomStatus::Lobby { player_count: 2 });

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Start),
            no_alarm,
            &tunnel,
        );
        assert_eq!(
            game.room_status(),
            RoomStatus::InProgress { round: 0, count: 2 }
        );

        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::End),
            no_alarm,
            &tunnel,
        );
        assert_eq!(game.room_status(), RoomStatus::Ended);
    }

    #[test]
    fn test_messages_from_wrong_kind_ignored() {
        let log = MessageLog::default();
        let (mut game, _, alice, _) = lobby_with_couple(&log);
        let tunnel = tunnel_for(&log);

        // a player trying to start the game is ignored
        game.receive_message(
            alice,
            IncomingMessage::Host(IncomingHostMessage::Start),
            no_alarm,
            &tunnel,
        );
        assert!(matches!(game.state, State::Lobby));
    }

    #[test]
    fn test_time_limit_alarm_round_trip() {
        let log = MessageLog::default();
        let host = Id::new();
        let deck: Deck = serde_json::from_value(serde_json::json!({
            "title": "Timed",
            "rounds": [
                {
                    "OpenEnded": {
                        "title": "Quick!",
                        "points_awarded": 100,
                        "time_limit": 10_000
                    }
                }
            ]
        }))
        .unwrap();
        let mut game = Game::new(deck, Options::default(), host);
        let tunnel = tunnel_for(&log);

        let alice = Id::new();
        let bob = Id::new();
        for (id, name) in [(alice, "Alice"), (bob, "Bob")] {
            game.add_unassigned(id, &tunnel).unwrap();
            game.receive_message(
                id,
                IncomingMessage::Unassigned(IncomingUnassignedMessage::NameRequest {
                    name: name.to_owned(),
                    avatar: String::new(),
                }),
                no_alarm,
                &tunnel,
            );
        }
        game.receive_message(
            alice,
            IncomingMessage::Player(IncomingPlayerMessage::RequestPair("Bob".to_owned())),
            no_alarm,
            &tunnel,
        );
        game.receive_message(
            bob,
            IncomingMessage::Player(IncomingPlayerMessage::RequestPair("Alice".to_owned())),
            no_alarm,
            &tunnel,
        );

        let scheduled = Rc::new(RefCell::new(Vec::new()));
        let sink = scheduled.clone();
        game.receive_message(
            host,
            IncomingMessage::Host(IncomingHostMessage::Start),
            move |message, duration| sink.borrow_mut().push((message, duration)),
            &tunnel,
        );

        let alarms = scheduled.borrow();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].1, Duration::from_secs(10));

        drop(alarms);
        let (alarm, _) = scheduled.borrow_mut().remove(0);
        game.receive_alarm(alarm, &tunnel);
        assert!(log.messages_for(host).iter().any(|m| m.contains("AllAnswersIn")));
    }
}
