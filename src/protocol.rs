//! Wire messages exchanged with the publication provider.
//!
//! Every message is a mapping with a `msg` discriminator. Outbound messages
//! are [`ClientMessage`]; inbound mappings decode into [`ServerMessage`],
//! with any tag this client does not handle kept verbatim as
//! [`ServerMessage::Other`].

use crate::error::{ClientError, Result};
use crate::types::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version sent in the `connect` handshake.
pub const PROTOCOL_VERSION: &str = "1";

/// Client-to-provider messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Handshake, sent whenever a transport is (re)established.
    Connect { version: String },

    /// Start a subscription.
    Sub {
        id: String,
        name: String,
        params: Vec<Value>,
    },

    /// Stop a subscription.
    Unsub { id: String },
}

impl ClientMessage {
    /// Encode as the mapping handed to the transport.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// The `msg` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Connect { .. } => "connect",
            ClientMessage::Sub { .. } => "sub",
            ClientMessage::Unsub { .. } => "unsub",
        }
    }
}

/// The `error` field of a `nosub`: a bare message or an object wrapping one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoSubError {
    Message(String),
    Nested { error: Value },
}

impl NoSubError {
    /// The error text, unwrapping one level of nesting.
    pub fn message(&self) -> String {
        match self {
            NoSubError::Message(message) => message.clone(),
            NoSubError::Nested {
                error: Value::String(message),
            } => message.clone(),
            NoSubError::Nested { error } => error.to_string(),
        }
    }
}

/// Provider-to-client messages.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    Added {
        collection: String,
        id: String,
        fields: Document,
    },
    Changed {
        collection: String,
        id: String,
        fields: Document,
        cleared: Vec<String>,
    },
    Removed {
        collection: String,
        id: String,
    },
    Connected,
    Ready {
        subs: Vec<String>,
    },
    NoSub {
        id: String,
        error: Option<NoSubError>,
    },
    /// Any other tag, passed through untouched.
    Other {
        kind: String,
        payload: Value,
    },
}

#[derive(Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
enum KnownMessage {
    Added {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Document,
    },
    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Document,
        #[serde(default)]
        cleared: Vec<String>,
    },
    Removed {
        collection: String,
        id: String,
    },
    Connected,
    Ready {
        #[serde(default)]
        subs: Vec<String>,
    },
    Nosub {
        id: String,
        #[serde(default)]
        error: Option<NoSubError>,
    },
}

const KNOWN_KINDS: [&str; 6] = ["added", "changed", "removed", "connected", "ready", "nosub"];

impl ServerMessage {
    /// Decode an inbound mapping.
    ///
    /// Returns `Ok(None)` for anything without a string `msg` tag, and an
    /// error when a known tag carries fields of the wrong shape.
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        let Some(kind) = value.get("msg").and_then(Value::as_str) else {
            return Ok(None);
        };

        if !KNOWN_KINDS.contains(&kind) {
            return Ok(Some(ServerMessage::Other {
                kind: kind.to_string(),
                payload: value,
            }));
        }

        let kind = kind.to_string();
        let known: KnownMessage = serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidMessage(format!("`{kind}` message: {e}")))?;

        Ok(Some(match known {
            KnownMessage::Added {
                collection,
                id,
                fields,
            } => ServerMessage::Added {
                collection,
                id,
                fields,
            },
            KnownMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } => ServerMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            },
            KnownMessage::Removed { collection, id } => ServerMessage::Removed { collection, id },
            KnownMessage::Connected => ServerMessage::Connected,
            KnownMessage::Ready { subs } => ServerMessage::Ready { subs },
            KnownMessage::Nosub { id, error } => ServerMessage::NoSub { id, error },
        }))
    }

    /// The `msg` tag.
    pub fn kind(&self) -> &str {
        match self {
            ServerMessage::Added { .. } => "added",
            ServerMessage::Changed { .. } => "changed",
            ServerMessage::Removed { .. } => "removed",
            ServerMessage::Connected => "connected",
            ServerMessage::Ready { .. } => "ready",
            ServerMessage::NoSub { .. } => "nosub",
            ServerMessage::Other { kind, .. } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> ServerMessage {
        ServerMessage::from_value(value).unwrap().unwrap()
    }

    #[test]
    fn test_encode_client_messages() {
        let connect = ClientMessage::Connect {
            version: PROTOCOL_VERSION.to_string(),
        };
        assert_eq!(connect.to_value().unwrap(), json!({"msg": "connect", "version": "1"}));

        let sub = ClientMessage::Sub {
            id: "0".into(),
            name: "orgs".into(),
            params: vec![json!({"a": 1})],
        };
        assert_eq!(
            sub.to_value().unwrap(),
            json!({"msg": "sub", "id": "0", "name": "orgs", "params": [{"a": 1}]})
        );

        let unsub = ClientMessage::Unsub { id: "0".into() };
        assert_eq!(unsub.to_value().unwrap(), json!({"msg": "unsub", "id": "0"}));
    }

    #[test]
    fn test_decode_documents() {
        let added = decode(json!({"msg": "added", "collection": "c", "id": "1", "fields": {"n": 1}}));
        assert!(matches!(added, ServerMessage::Added { ref fields, .. } if fields["n"] == 1));

        let changed = decode(json!({"msg": "changed", "collection": "c", "id": "1", "cleared": ["x"]}));
        match changed {
            ServerMessage::Changed { fields, cleared, .. } => {
                assert!(fields.is_empty());
                assert_eq!(cleared, vec!["x".to_string()]);
            }
            other => panic!("expected Changed, got {:?}", other),
        }

        let removed = decode(json!({"msg": "removed", "collection": "c", "id": "1"}));
        assert_eq!(
            removed,
            ServerMessage::Removed {
                collection: "c".into(),
                id: "1".into()
            }
        );
    }

    #[test]
    fn test_decode_lifecycle() {
        assert_eq!(
            decode(json!({"msg": "connected", "session": "abc"})),
            ServerMessage::Connected
        );
        assert_eq!(
            decode(json!({"msg": "ready", "subs": ["7", "8"]})),
            ServerMessage::Ready {
                subs: vec!["7".into(), "8".into()]
            }
        );
    }

    #[test]
    fn test_nosub_error_shapes() {
        let plain = decode(json!({"msg": "nosub", "id": "1", "error": "sub-not-found"}));
        let nested = decode(json!({"msg": "nosub", "id": "1", "error": {"error": "denied", "reason": "x"}}));

        let ServerMessage::NoSub { error: Some(plain), .. } = plain else {
            panic!("expected NoSub");
        };
        let ServerMessage::NoSub { error: Some(nested), .. } = nested else {
            panic!("expected NoSub");
        };
        assert_eq!(plain.message(), "sub-not-found");
        assert_eq!(nested.message(), "denied");
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let payload = json!({"msg": "ping", "id": "p1"});
        assert_eq!(
            decode(payload.clone()),
            ServerMessage::Other {
                kind: "ping".into(),
                payload
            }
        );
    }

    #[test]
    fn test_untagged_is_ignored() {
        assert_eq!(ServerMessage::from_value(json!({"id": 1})).unwrap(), None);
        assert_eq!(ServerMessage::from_value(json!("text")).unwrap(), None);
    }

    #[test]
    fn test_malformed_known_kind() {
        let result = ServerMessage::from_value(json!({"msg": "added", "id": "1"}));
        assert!(matches!(result, Err(ClientError::InvalidMessage(_))));
    }
}
