use std::fmt;

use serde::{Deserialize, Serialize};

/// A permission level on a resource. Levels are totally ordered:
/// viewer < editor < owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Viewer,
    Editor,
    Owner,
}

impl PermissionLevel {
    pub const ALL: [PermissionLevel; 3] = [Self::Viewer, Self::Editor, Self::Owner];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Owner => "owner",
        }
    }

    /// Rank used by the store to keep the max level in upserts.
    #[must_use]
    pub const fn rank(self) -> i64 {
        match self {
            Self::Viewer => 1,
            Self::Editor => 2,
            Self::Owner => 3,
        }
    }

    pub fn parse(s: &str) -> Option<PermissionLevel> {
        match s {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Returns true if this level satisfies the required level.
    #[must_use]
    pub fn satisfies(self, required: PermissionLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A direct grant of a level to a user on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermission {
    pub user_id: String,
    pub permission: PermissionLevel,
}

/// A grant of a level to every member of a group on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPermission {
    pub group_id: String,
    pub permission: PermissionLevel,
}

/// Anything carrying user and group grants.
pub trait Guarded {
    fn user_permissions(&self) -> &[UserPermission];
    fn group_permissions(&self) -> &[GroupPermission];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        assert!(PermissionLevel::Viewer < PermissionLevel::Editor);
        assert!(PermissionLevel::Editor < PermissionLevel::Owner);
        assert_eq!(
            [PermissionLevel::Editor, PermissionLevel::Owner, PermissionLevel::Viewer]
                .into_iter()
                .max(),
            Some(PermissionLevel::Owner)
        );
    }

    #[test]
    fn test_satisfies_is_monotone() {
        for granted in PermissionLevel::ALL {
            for required in PermissionLevel::ALL {
                if granted.satisfies(required) {
                    for lower in PermissionLevel::ALL.into_iter().filter(|l| *l <= required) {
                        assert!(granted.satisfies(lower));
                    }
                }
            }
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        for level in PermissionLevel::ALL {
            assert_eq!(PermissionLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(PermissionLevel::parse("admin"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&PermissionLevel::Editor).unwrap();
        assert_eq!(json, "\"editor\"");
        let level: PermissionLevel = serde_json::from_str("\"owner\"").unwrap();
        assert_eq!(level, PermissionLevel::Owner);
    }

    #[test]
    fn test_rank_matches_order() {
        assert!(PermissionLevel::Viewer.rank() < PermissionLevel::Editor.rank());
        assert!(PermissionLevel::Editor.rank() < PermissionLevel::Owner.rank());
    }
}
