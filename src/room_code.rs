//! Room code generation and management
//!
//! This module provides functionality for generating and managing the short
//! codes players type in to join a room. Codes are displayed in octal format
//! to make them easier to communicate verbally.

use std::{fmt::Display, num::ParseIntError, str::FromStr};

use enum_map::{Enum, EnumArray};
use serde::{Deserialize, Deserializer, Serialize};

/// Minimum value for generated room codes (in octal: 10000)
const MIN_VALUE: u16 = 0o10_000;
/// Maximum value for generated room codes (in octal: 100000)
const MAX_VALUE: u16 = 0o100_000;

/// A short joinable code identifying a room
///
/// Room codes are generated randomly within a specific range and displayed
/// in octal format to make them easier to communicate. The octal format
/// reduces confusion when sharing codes verbally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoomCode(u16);

impl RoomCode {
    /// Creates a new random room code
    ///
    /// The code is generated within the valid range to ensure it displays
    /// as a 5-digit octal number for easy communication.
    pub fn new() -> Self {
        Self(fastrand::u16(MIN_VALUE..MAX_VALUE))
    }
}

impl Default for RoomCode {
    /// Creates a new random room code (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RoomCode {
    /// Formats the room code as a 5-digit octal number
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:05o}", self.0)
    }
}

impl Serialize for RoomCode {
    /// Serializes the room code as an octal string
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RoomCode {
    /// Deserializes a room code from an octal string
    fn deserialize<D>(deserializer: D) -> Result<RoomCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RoomCode::from_str(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

impl FromStr for RoomCode {
    type Err = ParseIntError;

    /// Parses a room code from an octal string representation
    ///
    /// # Errors
    ///
    /// Returns a `ParseIntError` if the string is not a valid octal number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(u16::from_str_radix(s, 8)?))
    }
}

impl Enum for RoomCode {
    /// Total number of possible room codes
    const LENGTH: usize = (MAX_VALUE - MIN_VALUE) as usize;

    /// Creates a room code from a usize index
    ///
    /// # Panics
    ///
    /// Panics if the value is out of range for the enum.
    fn from_usize(value: usize) -> Self {
        Self(u16::try_from(value).expect("index out of range for Enum::from_usize") + MIN_VALUE)
    }

    /// Converts the room code to a usize index
    ///
    /// The returned value is clamped to the valid range to prevent
    /// array access violations.
    fn into_usize(self) -> usize {
        usize::from(self.0.saturating_sub(MIN_VALUE)).min(RoomCode::LENGTH - 1)
    }
}

impl<V> EnumArray<V> for RoomCode {
    /// Array type for storing values indexed by `RoomCode`
    type Array = [V; Self::LENGTH];
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_room_code_new_in_range() {
        for _ in 0..100 {
            let code = RoomCode::new();
            assert!(code.0 >= MIN_VALUE);
            assert!(code.0 < MAX_VALUE);
        }
    }

    #[test]
    fn test_room_code_display_format() {
        let code = RoomCode(MIN_VALUE);
        assert_eq!(code.to_string(), "10000");

        let code = RoomCode(MIN_VALUE + 1);
        assert_eq!(code.to_string(), "10001");

        let code = RoomCode(MAX_VALUE - 1);
        assert_eq!(code.to_string(), "77777");
    }

    #[test]
    fn test_room_code_from_str() {
        let code = RoomCode::from_str("10000").unwrap();
        assert_eq!(code.0, MIN_VALUE);

        let code = RoomCode::from_str("12345").unwrap();
        assert_eq!(code.0, 0o12345);
    }

    #[test]
    fn test_room_code_from_str_invalid() {
        assert!(RoomCode::from_str("invalid").is_err());
        assert!(RoomCode::from_str("888").is_err()); // Invalid octal digit
        assert!(RoomCode::from_str("").is_err());
    }

    #[test]
    fn test_room_code_serialization() {
        let code = RoomCode(0o12345);
        let serialized = serde_json::to_string(&code).unwrap();
        assert_eq!(serialized, "\"12345\"");

        let deserialized: RoomCode = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, code);
    }

    #[test]
    fn test_room_code_enum_conversions() {
        let original = RoomCode(MIN_VALUE);
        let index = original.into_usize();
        let converted = RoomCode::from_usize(index);
        assert_eq!(original, converted);

        let max_index = RoomCode::LENGTH - 1;
        let code_from_max = RoomCode::from_usize(max_index);
        assert_eq!(code_from_max.into_usize(), max_index);
    }

    #[test]
    fn test_room_code_enum_boundary_clamping() {
        let out_of_range = RoomCode(MAX_VALUE + 100);
        let index = out_of_range.into_usize();
        assert_eq!(index, RoomCode::LENGTH - 1);
    }

    #[test]
    fn test_room_code_deserialization_parse_error() {
        let invalid_octal = "\"999\""; // Invalid octal digit
        let result: Result<RoomCode, _> = serde_json::from_str(invalid_octal);
        assert!(result.is_err());
    }
}
