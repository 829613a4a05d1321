//! Typed gateway events.
//!
//! The gateway module deserialises dispatch payloads into this enum so the
//! bot loop can pattern-match on strongly-typed data instead of raw
//! `(op, t, serde_json::Value)` tuples.

use tracing::warn;

use crate::types::*;

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// We've successfully identified / resumed — bot is ready.
    Ready(ReadyEvent),

    /// A message was created in a channel we can see.
    MessageCreate(Message),

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). The inner bool indicates whether
    /// the session is resumable (`true`) or we must re-identify (`false`).
    InvalidSession(bool),

    /// An event we received but don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
    },
}

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// This never fails — unrecognised or malformed events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            11 => GatewayEvent::HeartbeatAck,
            op => GatewayEvent::Unknown {
                event_name: payload.t,
                op,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let Some(name) = event_name else {
            return GatewayEvent::Unknown {
                event_name: None,
                op: 0,
            };
        };

        let Some(d) = data else {
            return GatewayEvent::Unknown {
                event_name: Some(name),
                op: 0,
            };
        };

        let parsed = match name.as_str() {
            "READY" => Some(serde_json::from_value(d).map(GatewayEvent::Ready)),
            "MESSAGE_CREATE" => Some(serde_json::from_value(d).map(GatewayEvent::MessageCreate)),
            // Events we receive but don't need.
            _ => None,
        };

        match parsed {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(event = %name, error = %e, "failed to parse dispatch payload");
                GatewayEvent::Unknown {
                    event_name: Some(name),
                    op: 0,
                }
            }
            None => GatewayEvent::Unknown {
                event_name: Some(name),
                op: 0,
            },
        }
    }
}
