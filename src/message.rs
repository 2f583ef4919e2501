//! NIP-01 wire messages: the JSON array frames exchanged with relays, plus
//! the [`Filter`] shape carried inside `REQ`.

use crate::error::{Error, Result};
use crate::event::Event;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Subscription filter for REQ messages.
///
/// Single-letter tag filters serialize under a `#` prefix (`#e`, `#p`, ...)
/// per NIP-01.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    // An empty map flattens to no keys at all, so no skip attribute is needed.
    #[serde(flatten, default)]
    pub tags: HashMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Match events carrying `value` under tag `name` (e.g. `tag("e", id)`).
    pub fn tag(mut self, name: &str, value: String) -> Self {
        self.tags
            .entry(format!("#{}", name))
            .or_default()
            .push(value);
        self
    }
}

/// Client-to-relay frames.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Event(Event),
    Req {
        subscription_id: String,
        filter: Filter,
    },
    Close {
        subscription_id: String,
    },
}

impl ClientMessage {
    /// Serialize to the NIP-01 JSON array form.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            ClientMessage::Event(event) => json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filter,
            } => json!(["REQ", subscription_id, filter]),
            ClientMessage::Close { subscription_id } => json!(["CLOSE", subscription_id]),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

/// Relay-to-client frames.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },
    Eose {
        subscription_id: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice {
        message: String,
    },
}

impl RelayMessage {
    /// Parse a relay frame. Frames that are not a JSON array with a known
    /// message type are a protocol error.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let array = value
            .as_array()
            .ok_or_else(|| Error::Protocol("relay message is not an array".to_string()))?;

        let kind = array
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("relay message missing type".to_string()))?;

        match kind {
            "EVENT" => {
                let subscription_id = Self::str_at(array, 1, "EVENT subscription id")?;
                let event_value = array
                    .get(2)
                    .ok_or_else(|| Error::Protocol("EVENT missing payload".to_string()))?;
                let event: Event = serde_json::from_value(event_value.clone())?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" => {
                let event_id = Self::str_at(array, 1, "OK event id")?;
                let success = array
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| Error::Protocol("OK missing status".to_string()))?;
                let message = array
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(RelayMessage::Ok {
                    event_id,
                    success,
                    message,
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: Self::str_at(array, 1, "EOSE subscription id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: Self::str_at(array, 1, "CLOSED subscription id")?,
                message: array
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: Self::str_at(array, 1, "NOTICE message")?,
            }),
            other => Err(Error::Protocol(format!(
                "unknown relay message type: {}",
                other
            ))),
        }
    }

    fn str_at(array: &[Value], index: usize, what: &str) -> Result<String> {
        array
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol(format!("{} missing or not a string", what)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: "e".repeat(64),
            pubkey: "a".repeat(64),
            created_at: 1700000000,
            kind: 1,
            tags: vec![vec!["client".to_string(), "nosbin".to_string()]],
            content: "hello".to_string(),
            sig: "b".repeat(128),
        }
    }

    #[test]
    fn test_req_serialization() {
        let filter = Filter::new().kinds(vec![1050]).limit(10);
        let msg = ClientMessage::Req {
            subscription_id: "sub1".to_string(),
            filter,
        };

        let json = msg.to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0], "REQ");
        assert_eq!(value[1], "sub1");
        assert_eq!(value[2]["kinds"][0], 1050);
        assert_eq!(value[2]["limit"], 10);
        assert!(value[2].get("ids").is_none());
    }

    #[test]
    fn test_close_serialization_exact_shape() {
        let msg = ClientMessage::Close {
            subscription_id: "sub1".to_string(),
        };
        assert_eq!(msg.to_json().unwrap(), r#"["CLOSE","sub1"]"#);
    }

    #[test]
    fn test_event_serialization() {
        let msg = ClientMessage::Event(sample_event());
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value[0], "EVENT");
        assert_eq!(value[1]["kind"], 1);
        assert_eq!(value[1]["content"], "hello");
    }

    #[test]
    fn test_filter_tag_serialization() {
        let filter = Filter::new().tag("e", "abc".to_string()).tag("e", "def".to_string());
        let value = serde_json::to_value(&filter).unwrap();
        assert_eq!(value["#e"][0], "abc");
        assert_eq!(value["#e"][1], "def");
    }

    #[test]
    fn test_parse_event_message() {
        let event = sample_event();
        let frame = json!(["EVENT", "sub1", event]).to_string();

        match RelayMessage::from_json(&frame).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(event.content, "hello");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ok_message() {
        let frame = r#"["OK","abc123",true,"stored"]"#;
        match RelayMessage::from_json(frame).unwrap() {
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                assert_eq!(event_id, "abc123");
                assert!(success);
                assert_eq!(message, "stored");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ok_without_message() {
        let frame = r#"["OK","abc123",false]"#;
        match RelayMessage::from_json(frame).unwrap() {
            RelayMessage::Ok {
                success, message, ..
            } => {
                assert!(!success);
                assert_eq!(message, "");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_eose_and_notice() {
        match RelayMessage::from_json(r#"["EOSE","sub1"]"#).unwrap() {
            RelayMessage::Eose { subscription_id } => assert_eq!(subscription_id, "sub1"),
            other => panic!("unexpected message: {:?}", other),
        }

        match RelayMessage::from_json(r#"["NOTICE","slow down"]"#).unwrap() {
            RelayMessage::Notice { message } => assert_eq!(message, "slow down"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_closed() {
        match RelayMessage::from_json(r#"["CLOSED","sub1","auth-required"]"#).unwrap() {
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(message, "auth-required");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(RelayMessage::from_json("not json").is_err());
        assert!(matches!(
            RelayMessage::from_json(r#"{"type":"EVENT"}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["AUTH","challenge"]"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["EVENT"]"#),
            Err(Error::Protocol(_))
        ));
    }
}
