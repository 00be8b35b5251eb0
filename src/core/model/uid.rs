// src/core/model/uid.rs

//! Time-ordered unique identifiers for clusters, stripes, nodes and changes.

use crate::core::NomadError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A globally unique, time-ordered identifier (UUID v7 underneath).
///
/// Generation order is preserved in the lexicographic order of the encoded
/// form, which keeps directory listings and journals naturally sorted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Uid(Uuid);

impl Uid {
    /// Generates a fresh time-ordered UID.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(s: &str) -> Result<Self, NomadError> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Uid {
    type Err = NomadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
