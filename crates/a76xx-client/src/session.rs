//! Session handles threaded through multi-step command sequences.
//!
//! The modem identifies SSL contexts, MQTT clients and sessions by small
//! integers. The engine does not validate them; the newtypes only stop one
//! kind of index being passed where another is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u8);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u8> for $name {
            fn from(value: u8) -> Self {
                $name(value)
            }
        }
    };
}

handle!(
    /// Index of an SSL configuration context (`AT+CSSLCFG`), 0 to 9.
    SslContextIndex
);

handle!(
    /// Index of an MQTT client (`AT+CMQTTACCQ`), 0 or 1.
    ClientIndex
);

handle!(
    /// Index of an MQTT or SSL session, 0 or 1.
    SessionId
);

/// Which peers an SSL context authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No authentication.
    #[default]
    None = 0,
    /// Verify the server with a CA certificate.
    ServerOnly = 1,
    /// Verify both ends.
    Mutual = 2,
    /// Present a client certificate only.
    ClientOnly = 3,
}

impl AuthMode {
    /// Value sent in `AT+CSSLCFG="authmode"`.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Mode implied by which certificate slots a context has bound.
    pub fn for_slots(has_ca: bool, has_client: bool) -> Self {
        match (has_ca, has_client) {
            (false, false) => AuthMode::None,
            (true, false) => AuthMode::ServerOnly,
            (false, true) => AuthMode::ClientOnly,
            (true, true) => AuthMode::Mutual,
        }
    }
}
