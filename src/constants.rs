//! Configuration constants for the tournament game system
//!
//! This module contains all the configuration limits and constraints
//! used throughout the game system to ensure data integrity and
//! provide consistent boundaries for different game components.

/// Main tournament configuration constants
pub mod tourney {
    /// Maximum number of rounds allowed in a single deck
    pub const MAX_ROUNDS_COUNT: usize = 100;
    /// Maximum length of a deck title in characters
    pub const MAX_TITLE_LENGTH: usize = 200;
    /// Maximum number of participants allowed in a single room
    pub const MAX_PLAYER_COUNT: usize = 100;
    /// Maximum points the host can hand out in a single award
    pub const MAX_POINTS_PER_AWARD: u64 = 10_000;
}

/// Question configuration constants shared by all round variants
pub mod question {
    /// Maximum length of a question in characters
    pub const MAX_TITLE_LENGTH: usize = 200;
    /// Minimum answer time limit in seconds, when a limit is set
    pub const MIN_TIME_LIMIT: u64 = 5;
    /// Maximum answer time limit in seconds, when a limit is set
    pub const MAX_TIME_LIMIT: u64 = 600;
}

/// Multiple choice round configuration constants
pub mod multiple_choice {
    /// Minimum number of options in a multiple choice round
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of options in a multiple choice round
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Maximum length of a single option label
    pub const MAX_OPTION_LENGTH: usize = 100;
}

/// Binary round configuration constants
pub mod binary {
    /// Maximum length of either of the two labels
    pub const MAX_LABEL_LENGTH: usize = 50;
}

/// Answer text configuration constants
pub mod answer_text {
    /// Maximum length of a submitted answer in characters
    pub const MAX_LENGTH: usize = 200;
}

/// Player identity configuration constants
pub mod identity {
    /// Maximum length of a player name in characters
    pub const MAX_NAME_LENGTH: usize = 30;
    /// Maximum length of an avatar token in characters
    pub const MAX_AVATAR_LENGTH: usize = 16;
}
