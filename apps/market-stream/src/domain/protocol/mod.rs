//! Control Channel Protocol
//!
//! JSON text frames exchanged with clients.
//!
//! Inbound frames carry an `action` (`subscribe`, `unsubscribe`, `ping`) and,
//! for the first two, a `symbol`. Outbound frames are tagged by `type`:
//!
//! | `type`           | fields                        |
//! |------------------|-------------------------------|
//! | `subscription`   | `status`, `symbol`            |
//! | `unsubscription` | `status`, `symbol`            |
//! | `pong`           | `timestamp`                   |
//! | `error`          | `message`                     |
//! | `tick`           | `symbol`, `bid`, `ask`, `time`|

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::streaming::{Symbol, Tick};

// =============================================================================
// Inbound
// =============================================================================

/// A decoded, validated control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Start receiving ticks for a symbol.
    Subscribe(Symbol),
    /// Stop receiving ticks for a symbol.
    Unsubscribe(Symbol),
    /// Liveness probe.
    Ping,
}

/// Loose shape of an inbound frame, before validation.
#[derive(Debug, Deserialize)]
struct RawControlMessage {
    action: Option<String>,
    symbol: Option<String>,
}

impl ControlRequest {
    /// Decode and validate an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the frame is not a JSON object of the
    /// expected shape, names no or an unknown action, or omits the symbol
    /// for a subscription change.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawControlMessage =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let action = raw.action.ok_or(ProtocolError::MissingAction)?;

        match action.as_str() {
            "subscribe" => require_symbol(raw.symbol.as_deref(), "subscribe").map(Self::Subscribe),
            "unsubscribe" => {
                require_symbol(raw.symbol.as_deref(), "unsubscribe").map(Self::Unsubscribe)
            }
            "ping" => Ok(Self::Ping),
            _ => Err(ProtocolError::UnknownAction(action)),
        }
    }
}

fn require_symbol(symbol: Option<&str>, action: &'static str) -> Result<Symbol, ProtocolError> {
    symbol
        .and_then(Symbol::parse)
        .ok_or(ProtocolError::MissingSymbol(action))
}

/// Errors decoding an inbound control frame.
///
/// These are always recovered by replying with an `error` message; they
/// never close the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or not an object of the expected shape.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    /// Frame has no `action` field.
    #[error("missing action")]
    MissingAction,
    /// `action` is not one of the supported values.
    #[error("unknown action: {0}")]
    UnknownAction(String),
    /// `subscribe`/`unsubscribe` without a non-empty `symbol`.
    #[error("{0} requires a non-empty symbol")]
    MissingSymbol(&'static str),
    /// Binary frames are not part of the protocol.
    #[error("binary frames are not supported")]
    BinaryFrame,
}

// =============================================================================
// Outbound
// =============================================================================

/// Acknowledgment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Request applied.
    Success,
}

/// A message sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscribe acknowledgment.
    Subscription {
        /// Outcome.
        status: AckStatus,
        /// Normalized symbol.
        symbol: Symbol,
    },
    /// Unsubscribe acknowledgment.
    Unsubscription {
        /// Outcome.
        status: AckStatus,
        /// Normalized symbol.
        symbol: Symbol,
    },
    /// Ping reply.
    Pong {
        /// Server time (ISO-8601).
        timestamp: DateTime<Utc>,
    },
    /// Malformed or rejected input.
    Error {
        /// Human-readable reason.
        message: String,
    },
    /// Broadcast data sample.
    Tick {
        /// Symbol the sample belongs to.
        symbol: Symbol,
        /// Best bid price.
        #[serde(with = "rust_decimal::serde::float")]
        bid: Decimal,
        /// Best ask price.
        #[serde(with = "rust_decimal::serde::float")]
        ask: Decimal,
        /// Sample time (ISO-8601).
        time: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Successful subscribe acknowledgment.
    #[must_use]
    pub const fn subscribed(symbol: Symbol) -> Self {
        Self::Subscription {
            status: AckStatus::Success,
            symbol,
        }
    }

    /// Successful unsubscribe acknowledgment.
    #[must_use]
    pub const fn unsubscribed(symbol: Symbol) -> Self {
        Self::Unsubscription {
            status: AckStatus::Success,
            symbol,
        }
    }

    /// Ping reply stamped with the current time.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    /// Error reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Data sample.
    #[must_use]
    pub fn tick(tick: Tick) -> Self {
        Self::Tick {
            symbol: tick.symbol,
            bid: tick.bid,
            ask: tick.ask,
            time: tick.time,
        }
    }

    /// Label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscription { .. } => "subscription",
            Self::Unsubscription { .. } => "unsubscription",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
            Self::Tick { .. } => "tick",
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; none of the variants can produce one in
    /// practice.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ProtocolError> for ServerMessage {
    fn from(err: ProtocolError) -> Self {
        Self::error(err.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::{Value, json};
    use test_case::test_case;

    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test_case(r#"{"action":"subscribe","symbol":"EURUSD"}"#, ControlRequest::Subscribe(sym("EURUSD")); "subscribe")]
    #[test_case(r#"{"action":"subscribe","symbol":" eurusd "}"#, ControlRequest::Subscribe(sym("EURUSD")); "subscribe normalizes")]
    #[test_case(r#"{"action":"unsubscribe","symbol":"GBPUSD"}"#, ControlRequest::Unsubscribe(sym("GBPUSD")); "unsubscribe")]
    #[test_case(r#"{"action":"ping"}"#, ControlRequest::Ping; "ping")]
    #[test_case(r#"{"action":"ping","symbol":"EURUSD"}"#, ControlRequest::Ping; "ping ignores symbol")]
    #[test_case(r#"{"action":"ping","extra":1}"#, ControlRequest::Ping; "unknown fields ignored")]
    fn decodes_valid_requests(text: &str, expected: ControlRequest) {
        assert_eq!(ControlRequest::decode(text).unwrap(), expected);
    }

    #[test_case(r#"{"action":"subscribe"}"#, ProtocolError::MissingSymbol("subscribe"); "subscribe without symbol")]
    #[test_case(r#"{"action":"subscribe","symbol":""}"#, ProtocolError::MissingSymbol("subscribe"); "subscribe empty symbol")]
    #[test_case(r#"{"action":"unsubscribe","symbol":"  "}"#, ProtocolError::MissingSymbol("unsubscribe"); "unsubscribe blank symbol")]
    #[test_case(r#"{"symbol":"EURUSD"}"#, ProtocolError::MissingAction; "no action")]
    #[test_case(r#"{"action":"trade","symbol":"EURUSD"}"#, ProtocolError::UnknownAction("trade".to_string()); "unknown action")]
    fn rejects_invalid_requests(text: &str, expected: ProtocolError) {
        assert_eq!(ControlRequest::decode(text).unwrap_err(), expected);
    }

    #[test_case("not json"; "garbage")]
    #[test_case("{\"action\":"; "truncated")]
    #[test_case("[1,2,3]"; "array")]
    #[test_case(r#"{"action":42}"#; "action wrong type")]
    #[test_case(r#"{"action":"subscribe","symbol":7}"#; "symbol wrong type")]
    fn malformed_frames_are_invalid_json(text: &str) {
        let err = ControlRequest::decode(text).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)), "{err:?}");
        assert!(err.to_string().starts_with("Invalid JSON"));
    }

    #[test]
    fn subscription_ack_shape() {
        let value: Value = serde_json::to_value(ServerMessage::subscribed(sym("EURUSD"))).unwrap();
        assert_eq!(
            value,
            json!({"type": "subscription", "status": "success", "symbol": "EURUSD"})
        );
    }

    #[test]
    fn unsubscription_ack_shape() {
        let value: Value =
            serde_json::to_value(ServerMessage::unsubscribed(sym("EURUSD"))).unwrap();
        assert_eq!(
            value,
            json!({"type": "unsubscription", "status": "success", "symbol": "EURUSD"})
        );
    }

    #[test]
    fn error_shape() {
        let value: Value = serde_json::to_value(ServerMessage::error("bad")).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "bad"}));
    }

    #[test]
    fn pong_timestamp_is_iso8601() {
        let value: Value = serde_json::to_value(ServerMessage::pong()).unwrap();
        assert_eq!(value["type"], "pong");

        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn tick_prices_are_json_numbers() {
        let time = DateTime::parse_from_rfc3339("2026-01-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let tick = Tick {
            symbol: sym("EURUSD"),
            bid: Decimal::from_str("1.1000").unwrap(),
            ask: Decimal::from_str("1.1002").unwrap(),
            time,
        };

        let value: Value = serde_json::to_value(ServerMessage::tick(tick)).unwrap();

        assert_eq!(value["type"], "tick");
        assert_eq!(value["symbol"], "EURUSD");
        assert!(value["bid"].is_number());
        assert!((value["bid"].as_f64().unwrap() - 1.1).abs() < 1e-12);
        assert!((value["ask"].as_f64().unwrap() - 1.1002).abs() < 1e-12);
        assert_eq!(value["time"], "2026-01-05T10:00:00Z");
    }

    #[test]
    fn protocol_error_becomes_error_message() {
        let message = ServerMessage::from(ProtocolError::MissingSymbol("subscribe"));
        assert_eq!(
            message,
            ServerMessage::error("subscribe requires a non-empty symbol")
        );
    }

    #[test]
    fn kind_labels() {
        assert_eq!(ServerMessage::pong().kind(), "pong");
        assert_eq!(ServerMessage::error("x").kind(), "error");
        assert_eq!(ServerMessage::subscribed(sym("A")).kind(), "subscription");
        assert_eq!(ServerMessage::unsubscribed(sym("A")).kind(), "unsubscription");
    }
}
