//! How a conflicted commit is settled during a bidirectional sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Newer edit wins; a tie goes to the remote copy
    #[default]
    LastWriterWins,
    PreferLocal,
    PreferRemote,
    /// Leave the commit in conflict for the user
    Manual,
}

/// Result of applying a policy to one conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    TakeRemote,
    Unresolved,
}

impl ConflictPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "last_writer_wins" | "lww" => Some(ConflictPolicy::LastWriterWins),
            "prefer_local" | "local" => Some(ConflictPolicy::PreferLocal),
            "prefer_remote" | "remote" => Some(ConflictPolicy::PreferRemote),
            "manual" => Some(ConflictPolicy::Manual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::LastWriterWins => "last_writer_wins",
            ConflictPolicy::PreferLocal => "prefer_local",
            ConflictPolicy::PreferRemote => "prefer_remote",
            ConflictPolicy::Manual => "manual",
        }
    }

    pub fn resolve(&self, local_updated_at: DateTime<Utc>, remote_updated_at: DateTime<Utc>) -> Resolution {
        match self {
            ConflictPolicy::LastWriterWins => {
                if local_updated_at > remote_updated_at {
                    Resolution::KeepLocal
                } else {
                    Resolution::TakeRemote
                }
            }
            ConflictPolicy::PreferLocal => Resolution::KeepLocal,
            ConflictPolicy::PreferRemote => Resolution::TakeRemote,
            ConflictPolicy::Manual => Resolution::Unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_last_writer_wins() {
        let t = Utc::now();
        let lww = ConflictPolicy::LastWriterWins;
        assert_eq!(lww.resolve(t + Duration::seconds(1), t), Resolution::KeepLocal);
        assert_eq!(lww.resolve(t, t + Duration::seconds(1)), Resolution::TakeRemote);
        assert_eq!(lww.resolve(t, t), Resolution::TakeRemote);
    }

    #[test]
    fn test_fixed_policies_ignore_time() {
        let t = Utc::now();
        let later = t + Duration::hours(1);
        assert_eq!(ConflictPolicy::PreferLocal.resolve(t, later), Resolution::KeepLocal);
        assert_eq!(ConflictPolicy::PreferRemote.resolve(later, t), Resolution::TakeRemote);
        assert_eq!(ConflictPolicy::Manual.resolve(later, t), Resolution::Unresolved);
    }

    #[test]
    fn test_parse_names() {
        for policy in [
            ConflictPolicy::LastWriterWins,
            ConflictPolicy::PreferLocal,
            ConflictPolicy::PreferRemote,
            ConflictPolicy::Manual,
        ] {
            assert_eq!(ConflictPolicy::from_str(policy.as_str()), Some(policy));
        }
        assert_eq!(ConflictPolicy::from_str("newest"), None);
    }
}
