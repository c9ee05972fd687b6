//! Identifier types for instruments and sectors
//!
//! Codes are opaque strings assigned by the upstream market (e.g. the
//! six-digit KRX codes "005930", "000660"). They are trimmed on
//! construction and must not be empty. Ordering is lexicographic, which is
//! what the sector ranking uses to break trading-value ties.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CodeError;

/// Instrument (stock) code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentCode(String);

impl InstrumentCode {
    /// Create a new InstrumentCode
    ///
    /// # Panics
    /// Panics if the code is empty after trimming
    pub fn new(code: impl Into<String>) -> Self {
        Self::try_new(code).expect("InstrumentCode must not be empty")
    }

    /// Try to create an InstrumentCode, returning None if empty
    pub fn try_new(code: impl Into<String>) -> Option<Self> {
        let s = code.into();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == s.len() {
            Some(Self(s))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Get the code string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstrumentCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl TryFrom<String> for InstrumentCode {
    type Error = CodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_new(s).ok_or(CodeError::Empty("instrument"))
    }
}

impl From<InstrumentCode> for String {
    fn from(code: InstrumentCode) -> Self {
        code.0
    }
}

/// Sector (theme) code, e.g. "SEMICONDUCTOR"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SectorCode(String);

impl SectorCode {
    /// # Panics
    /// Panics if the code is empty after trimming
    pub fn new(code: impl Into<String>) -> Self {
        Self::try_new(code).expect("SectorCode must not be empty")
    }

    pub fn try_new(code: impl Into<String>) -> Option<Self> {
        let s = code.into();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SectorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SectorCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl TryFrom<String> for SectorCode {
    type Error = CodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_new(s).ok_or(CodeError::Empty("sector"))
    }
}

impl From<SectorCode> for String {
    fn from(code: SectorCode) -> Self {
        code.0
    }
}
