//! Newtype wrappers for identifiers that cross the wire

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Unwrap into the inner string
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_newtype!(
    /// Conversation session identifier assigned by the CLI
    SessionId
);

string_newtype!(
    /// Tool name such as `Bash` or `Write`
    ToolName
);

string_newtype!(
    /// Control request identifier.
    ///
    /// Outbound ids are generated locally as `req_{n}`; inbound ids are
    /// chosen by the CLI and echoed back verbatim.
    RequestId
);

string_newtype!(
    /// Identifier of a hook callback registered during `initialize`, `hook_{n}`
    CallbackId
);

impl RequestId {
    /// Build the outbound id for sequence number `n`
    #[must_use]
    pub fn sequenced(n: u64) -> Self {
        Self(format!("req_{n}"))
    }
}

impl CallbackId {
    /// Build the hook callback id for sequence number `n`
    #[must_use]
    pub fn sequenced(n: u64) -> Self {
        Self(format!("hook_{n}"))
    }
}
