// Copyright 2025 Cowboy AI, LLC.

//! Opaque identifier types for the action log.
//!
//! Small `Copy` wrappers with `Display`, `FromStr`, and conversions to/from
//! the underlying `Uuid`, rather than passing raw UUIDs (or strings) around.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing `Uuid`.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// View the underlying `Uuid`.
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
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(CompletionId, "Unique identifier for an `ActionCompletion` record.");
uuid_id!(InvocationId, "Unique identifier for an `ActionInvocation` record.");
uuid_id!(FlowId, "Correlation id shared by every record in one causal lineage.");

/// Either side of a parent pointer: a completion or an invocation caused the
/// record in question. The log is keyed by a single id space per record
/// kind, so the parent is stored as the raw id with the kind recorded
/// alongside it by the caller (see `engine::LogRecord`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
pub enum ParentId {
    /// Parent is a completion.
    Completion(CompletionId),
    /// Parent is an invocation.
    Invocation(InvocationId),
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentId::Completion(id) => write!(f, "completion:{id}"),
            ParentId::Invocation(id) => write!(f, "invocation:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string() {
        let id = CompletionId::new();
        let parsed: CompletionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn distinct_kinds_do_not_collide_in_display() {
        let c = CompletionId::new();
        let i = InvocationId::new();
        let pc = ParentId::Completion(c);
        let pi = ParentId::Invocation(i);
        assert_ne!(pc.to_string(), pi.to_string());
    }
}
