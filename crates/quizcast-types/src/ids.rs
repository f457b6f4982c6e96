//! Type-safe identifier wrappers.
//!
//! Every persisted entity carries a strongly-typed ID so that a quiz id
//! can never be passed where a participant id is expected. Persisted IDs
//! wrap the `BIGSERIAL` keys assigned by `PostgreSQL`; live WebSocket
//! connections, which are never persisted, are identified by UUID v7.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around an `i64` database key.
macro_rules! define_row_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/", type = "number")]
        pub struct $name(pub i64);

        impl $name {
            /// Return the inner `i64` key.
            pub const fn into_inner(self) -> i64 {
                self.0
            }

            /// Whether the key is in the range `PostgreSQL` sequences produce.
            pub const fn is_valid(self) -> bool {
                self.0 > 0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_row_id! {
    /// Identifier of a quiz (one question with four options).
    QuizId
}

define_row_id! {
    /// Identifier of a registered participant.
    ParticipantId
}

define_row_id! {
    /// Identifier of a stored answer row.
    AnswerId
}

define_row_id! {
    /// Identifier of a quiz session row.
    SessionId
}

/// Identifier of a live observer connection.
///
/// Generated when the WebSocket upgrade completes and discarded when the
/// connection leaves the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
