use std::fmt;

/// Lifecycle of a staged product observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingStatus {
    /// Freshly extracted (or re-extracted) and not yet merged
    Raw,

    /// Merged into the catalog
    Processed,

    /// Catalog merge failed; see the record's error message
    Error,
}

impl StagingStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Processed => "processed",
            Self::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(Self::Raw),
            "processed" => Some(Self::Processed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
