//! # Houses
//!
//! The predictor feed multiplexes a small, fixed set of logical sources. They
//! are not discovered at runtime: anything the feed sends for an identifier
//! outside this set is dropped by the ingestor.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// One logical source of the predictor feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum House {
    /// `placard`
    Placard,
    /// `bet888`
    Bet888,
    /// `betway`
    Betway,
}

/// Returned by [`House::from_str`] for identifiers outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown house '{0}'")]
pub struct UnknownHouse(pub String);

impl House {
    /// Number of known houses.
    pub const COUNT: usize = 3;

    /// Every known house, in the order the API lists them.
    pub const ALL: [House; House::COUNT] = [House::Placard, House::Bet888, House::Betway];

    /// The identifier used both on the feed and in the read API.
    pub const fn as_str(self) -> &'static str {
        match self {
            House::Placard => "placard",
            House::Bet888 => "bet888",
            House::Betway => "betway",
        }
    }

    /// Dense index into per-house arrays.
    pub(crate) const fn index(self) -> usize {
        match self {
            House::Placard => 0,
            House::Bet888 => 1,
            House::Betway => 2,
        }
    }

    /// Resolves an identifier exactly as the feed sends it.
    ///
    /// The feed always uses the lowercase names, so no folding happens here;
    /// `"PLACARD"` on the wire is treated as a foreign identifier.
    pub fn from_feed_id(id: &str) -> Option<House> {
        House::ALL.into_iter().find(|house| house.as_str() == id)
    }
}

impl fmt::Display for House {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive parsing, used for identifiers coming from API callers.
impl FromStr for House {
    type Err = UnknownHouse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        House::ALL
            .into_iter()
            .find(|house| house.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownHouse(s.to_string()))
    }
}
