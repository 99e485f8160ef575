//! Branded ID newtypes for type safety.
//!
//! Every entity in the protocol has a distinct ID type implemented as a
//! newtype wrapper around `String`. This prevents accidentally passing a
//! conversation ID where an agent ID is expected, or correlating progress
//! notifications against the wrong token.
//!
//! All generated IDs are UUID v7 (time-ordered) via [`uuid::Uuid::now_v7`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id! {
    /// Identifies one conversation (lead or subagent) at the backend.
    ConversationId
}

branded_id! {
    /// Identifies one spawned subagent across its whole lifecycle.
    AgentId
}

branded_id! {
    /// Correlation token for streaming progress notifications tied to
    /// one turn. Generated client-side, echoed by the backend on every
    /// `$/progress` notification for that turn.
    WorkDoneToken
}

impl WorkDoneToken {
    /// Generate a turn token with a recognizable prefix for log greps.
    #[must_use]
    pub fn for_turn() -> Self {
        Self(format!("wdt-{}", new_v7()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = ConversationId::new();
        let b = ConversationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_time_ordered() {
        // UUID v7 sorts lexicographically by creation time.
        let a = AgentId::new();
        let b = AgentId::new();
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn serde_transparent() {
        let id = ConversationId::from("conv-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conv-1\"");
        let back: ConversationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn work_done_token_prefix() {
        let token = WorkDoneToken::for_turn();
        assert!(token.as_str().starts_with("wdt-"));
    }

    #[test]
    fn display_matches_inner() {
        let id = AgentId::from_string("agent-7".into());
        assert_eq!(id.to_string(), "agent-7");
        assert_eq!(id.as_ref(), "agent-7");
    }

    #[test]
    fn into_inner_roundtrip() {
        let id = WorkDoneToken::from("tok");
        assert_eq!(id.into_inner(), "tok");
    }
}
