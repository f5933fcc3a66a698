use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// String-typed identifiers carrying a fixed prefix, e.g. `conn_0192f3…`.
///
/// Ids minted here embed a v7 uuid, so they sort by creation time. Ids
/// received from outside (the client-supplied [`ClientId`]) are wrapped
/// untouched by `from_raw` and need not carry the prefix; `is_minted`
/// distinguishes the two.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Box<str>);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mint a fresh, time-ordered id. Never reused within a process.
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()).into_boxed_str())
            }

            /// Wrap an externally supplied identifier as-is.
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into().into_boxed_str())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when this id was minted by `new` rather than supplied
            /// from outside.
            pub fn is_minted(&self) -> bool {
                self.0
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .is_some_and(|rest| !rest.is_empty())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

entity_id!(
    /// Assigned when a controller is created; stable for the controller's
    /// lifetime, never reused.
    ConnectionId,
    "conn"
);

entity_id!(
    /// Supplied by the client in the initialization request and fixed into
    /// the session on success.
    ClientId,
    "client"
);

entity_id!(
    /// An execution context held by the runtime.
    ContextId,
    "ctx"
);

entity_id!(
    /// A visualisation attached to an execution context.
    VisualisationId,
    "vis"
);
