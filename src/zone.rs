//! Topographic zones - the body regions that scope decision trees
//!
//! The set of regions is fixed. Rows for every region are seeded into
//! `topographic_zones` when the database is opened.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A body region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Cervical,
    Thoracique,
    Lombaire,
    Epaule,
    Coude,
    Poignet,
    Main,
    Hanche,
    Genou,
    Cheville,
    Pied,
}

impl Region {
    /// Every region, head to foot
    pub const ALL: [Region; 11] = [
        Region::Cervical,
        Region::Thoracique,
        Region::Lombaire,
        Region::Epaule,
        Region::Coude,
        Region::Poignet,
        Region::Main,
        Region::Hanche,
        Region::Genou,
        Region::Cheville,
        Region::Pied,
    ];

    /// Identifier stored in the `region` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Cervical => "cervical",
            Region::Thoracique => "thoracique",
            Region::Lombaire => "lombaire",
            Region::Epaule => "epaule",
            Region::Coude => "coude",
            Region::Poignet => "poignet",
            Region::Main => "main",
            Region::Hanche => "hanche",
            Region::Genou => "genou",
            Region::Cheville => "cheville",
            Region::Pied => "pied",
        }
    }

    /// Display name shown to practitioners
    pub fn label(&self) -> &'static str {
        match self {
            Region::Cervical => "Cervical",
            Region::Thoracique => "Thoracique",
            Region::Lombaire => "Lombaire",
            Region::Epaule => "Épaule",
            Region::Coude => "Coude",
            Region::Poignet => "Poignet",
            Region::Main => "Main",
            Region::Hanche => "Hanche",
            Region::Genou => "Genou",
            Region::Cheville => "Cheville",
            Region::Pied => "Pied",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRegion(pub String);

impl fmt::Display for UnknownRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown region '{}' (expected one of: {})",
            self.0,
            Region::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
        )
    }
}

impl std::error::Error for UnknownRegion {}

impl FromStr for Region {
    type Err = UnknownRegion;

    /// Accepts the stored identifier or the label, case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Region::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == wanted || r.label().to_lowercase() == wanted)
            .ok_or_else(|| UnknownRegion(s.to_string()))
    }
}

/// A stored zone row resolved to its region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopographicZone {
    pub id: i32,
    pub region: Region,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_regions_round_trip_through_str() {
        for region in Region::ALL {
            assert_eq!(region.as_str().parse::<Region>().unwrap(), region);
        }
    }

    #[test]
    fn test_parse_accepts_labels_and_case() {
        assert_eq!("Épaule".parse::<Region>().unwrap(), Region::Epaule);
        assert_eq!("GENOU".parse::<Region>().unwrap(), Region::Genou);
        assert_eq!(" pied ".parse::<Region>().unwrap(), Region::Pied);
    }

    #[test]
    fn test_parse_unknown_region() {
        let err = "knee".parse::<Region>().unwrap_err();
        assert!(err.to_string().contains("unknown region 'knee'"));
        assert!(err.to_string().contains("genou"));
    }

    #[test]
    fn test_region_serializes_lowercase() {
        let json = serde_json::to_string(&Region::Cheville).unwrap();
        assert_eq!(json, "\"cheville\"");
    }
}
