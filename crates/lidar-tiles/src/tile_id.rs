//! Tile identifiers extracted from provider filenames.
//!
//! Both providers embed the same 7-digit tile number in their filenames,
//! but with different prefixes and separators:
//!
//! - DEM: `EGM-NHP_2123200.tif`, `EGM-NMCG_2073200.tif`, `EGM-NMCG-7923199.tif`
//! - ORTHO: `NHP_2123200.tif`, `NMCG_2073200.tif`
//!
//! The first run of exactly seven digits, scanning left to right, is the id.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Number of digits in a tile id.
pub const TILE_ID_DIGITS: usize = 7;

fn digit_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[0-9]+").expect("digit-run pattern is valid"))
}

/// Canonical tile identifier shared by a DEM file and its ORTHO file.
///
/// Ids are fixed-width digit strings, so string ordering equals numeric ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileId(String);

impl TileId {
    /// Parse a bare id such as `"2123200"`.
    ///
    /// Returns `None` unless the input is exactly seven ASCII digits.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == TILE_ID_DIGITS && s.bytes().all(|b| b.is_ascii_digit()) {
            Some(TileId(s.to_string()))
        } else {
            None
        }
    }

    /// Extract the id from a filename.
    ///
    /// Digit runs longer or shorter than seven (dates, version numbers) are
    /// skipped. Returns `None` when no run of exactly seven digits exists.
    pub fn from_filename(filename: &str) -> Option<Self> {
        digit_runs()
            .find_iter(filename)
            .find(|m| m.as_str().len() == TILE_ID_DIGITS)
            .map(|m| TileId(m.as_str().to_string()))
    }

    /// The id as a digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as a number.
    pub fn value(&self) -> u32 {
        // Seven digits always fit in a u32.
        self.0.parse().unwrap_or_default()
    }

    /// Row/column hint encoded in the id: first three digits, last four digits.
    ///
    /// This is only a naming convention; mosaic placement always uses the
    /// raster's geotransform.
    pub fn grid_hint(&self) -> (u32, u32) {
        let (row, col) = self.0.split_at(3);
        (
            row.parse().unwrap_or_default(),
            col.parse().unwrap_or_default(),
        )
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TileId {
    type Err = InvalidTileId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TileId::parse(s).ok_or_else(|| InvalidTileId(s.to_string()))
    }
}

impl TryFrom<String> for TileId {
    type Error = InvalidTileId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TileId> for String {
    fn from(id: TileId) -> Self {
        id.0
    }
}

/// A string that is not a 7-digit tile id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tile id {0:?} (expected 7 digits)")]
pub struct InvalidTileId(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_patterns() {
        for name in [
            "EGM-NHP_1234567.tif",
            "EGM-NMCG_1234567.tif",
            "EGM-NMCG-1234567.tif",
            "NHP_1234567.tif",
            "NMCG_1234567.tif",
        ] {
            let id = TileId::from_filename(name)
                .unwrap_or_else(|| panic!("no id extracted from {}", name));
            assert_eq!(id.as_str(), "1234567", "filename {}", name);
        }
    }

    #[test]
    fn test_no_id() {
        assert!(TileId::from_filename("overview.tif").is_none());
        assert!(TileId::from_filename("NHP_123456.tif").is_none());
        assert!(TileId::from_filename("").is_none());
    }

    #[test]
    fn test_skips_runs_of_other_lengths() {
        // An 8-digit date is not a tile id; the later 7-digit run is.
        let id = TileId::from_filename("EGM-NHP_20240327_2123200.tif").unwrap();
        assert_eq!(id.as_str(), "2123200");
        assert!(TileId::from_filename("NHP_12345678.tif").is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let id = TileId::from_filename("NHP_2123200_2073200.tif").unwrap();
        assert_eq!(id.as_str(), "2123200");
    }

    #[test]
    fn test_parse_and_display() {
        let id: TileId = "2073200".parse().unwrap();
        assert_eq!(id.to_string(), "2073200");
        assert_eq!(id.value(), 2_073_200);
        assert_eq!(id.grid_hint(), (207, 3200));
        assert!("207320".parse::<TileId>().is_err());
        assert!("20732OO".parse::<TileId>().is_err());
    }

    #[test]
    fn test_ordering_is_numeric() {
        let mut ids = vec![
            TileId::parse("2123200").unwrap(),
            TileId::parse("0073200").unwrap(),
            TileId::parse("2073200").unwrap(),
        ];
        ids.sort();
        let values: Vec<u32> = ids.iter().map(TileId::value).collect();
        assert_eq!(values, vec![73_200, 2_073_200, 2_123_200]);
    }

    #[test]
    fn test_serde_roundtrip_rejects_garbage() {
        let id = TileId::parse("2123200").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"2123200\"");
        assert!(serde_json::from_str::<TileId>("\"abc\"").is_err());
    }
}
