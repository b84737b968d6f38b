//! Strongly typed identifiers for board entities.
//!
//! Every identifier issued by the authority is a UUID. Wrapping each kind in its
//! own newtype keeps a `ColumnId` from ever being passed where a `TaskId` is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when a string is not a canonical identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a canonical identifier (expected xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx)")]
pub struct InvalidId {
    pub value: String,
}

/// Parse a UUID accepting only the canonical hyphenated 36-character form.
///
/// `Uuid::parse_str` also accepts the simple, braced and URN encodings; the push
/// channel address must use the canonical one, so anything else is rejected.
pub fn parse_canonical(value: &str) -> Result<Uuid, InvalidId> {
    let invalid = || InvalidId {
        value: value.to_string(),
    };

    let bytes = value.as_bytes();
    if bytes.len() != 36 {
        return Err(invalid());
    }
    for (i, b) in bytes.iter().enumerate() {
        let ok = match i {
            8 | 13 | 18 | 23 => *b == b'-',
            _ => b.is_ascii_hexdigit(),
        };
        if !ok {
            return Err(invalid());
        }
    }

    Uuid::parse_str(value).map_err(|_| invalid())
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse a canonical hyphenated identifier
            pub fn parse(value: &str) -> Result<Self, InvalidId> {
                parse_canonical(value).map(Self)
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Identifier of a board
    BoardId
);
define_id!(
    /// Identifier of a column
    ColumnId
);
define_id!(
    /// Identifier of a task
    TaskId
);
define_id!(
    /// Identifier of a workflow definition
    WorkflowId
);
define_id!(
    /// Identifier of a workflow transition
    TransitionId
);
define_id!(
    /// Identifier of an automated execution
    ExecutionId
);
define_id!(
    /// Identifier of an activity log entry
    ActivityId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        let id = BoardId::parse("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(id.to_string(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
    }

    #[test]
    fn test_parse_accepts_uppercase_hex() {
        assert!(BoardId::parse("67E55044-10B1-426F-9247-BB680E5FE0C8").is_ok());
    }

    #[test]
    fn test_parse_rejects_non_canonical_forms() {
        for value in [
            "",
            "not-a-uuid",
            "67e5504410b1426f9247bb680e5fe0c8",
            "{67e55044-10b1-426f-9247-bb680e5fe0c8}",
            "urn:uuid:67e55044-10b1-426f-9247-bb680e5fe0c8",
            "67e55044-10b1-426f-9247-bb680e5fe0cz",
            "67e55044-10b1-426f-9247bbb680e5fe0c8",
            "../../etc/passwd-0000-0000-000000000",
        ] {
            assert!(BoardId::parse(value).is_err(), "accepted {value:?}");
        }
    }

    #[test]
    fn test_serde_transparent() {
        let id = TaskId::parse("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"67e55044-10b1-426f-9247-bb680e5fe0c8\"");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
