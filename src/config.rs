use crate::envelope::DEFAULT_CONTROL_EVENT;

/// Which end of the connection a channel wraps.
///
/// Only initiators consult the reconnection policy and listen for
/// [crate::SocketEvent::ReconnectFailed]. Only responders forward room
/// methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

impl Default for Role {
    fn default() -> Self {
        Role::Initiator
    }
}

/// Plain-data settings of a [crate::Channel].
///
/// Can be embedded in an application config file. Missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub role: Role,
    /// Socket event that carries all envelopes. Both peers must agree on it.
    pub control_event: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::default(),
            control_event: DEFAULT_CONTROL_EVENT.to_string(),
        }
    }
}

impl Config {
    pub fn initiator() -> Self {
        Self::default()
    }

    pub fn responder() -> Self {
        Self {
            role: Role::Responder,
            ..Self::default()
        }
    }
}
