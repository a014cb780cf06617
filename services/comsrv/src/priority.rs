//! Operation priority levels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue priority of an operation; later variants run first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    /// Background diagnostics (pixel tests, version queries)
    Diagnostic,
    /// Periodic data collection
    Data,
    /// Configuration downloads and clock sync
    Download,
    /// Operator commands
    Command,
    /// Time-critical commands
    Urgent,
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriorityLevel::Diagnostic => "diagnostic",
            PriorityLevel::Data => "data",
            PriorityLevel::Download => "download",
            PriorityLevel::Command => "command",
            PriorityLevel::Urgent => "urgent",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(PriorityLevel::Urgent > PriorityLevel::Command);
        assert!(PriorityLevel::Command > PriorityLevel::Download);
        assert!(PriorityLevel::Download > PriorityLevel::Data);
        assert!(PriorityLevel::Data > PriorityLevel::Diagnostic);
        assert_eq!(PriorityLevel::Data.to_string(), "data");
    }
}
