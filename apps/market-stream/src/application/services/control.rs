//! Control Session
//!
//! Per-connection handler for inbound control messages.
//!
//! A session is bound to one registered connection. It decodes each text
//! frame, applies subscription changes to the registry, and queues the reply
//! on the connection's outbound queue so replies and ticks share one FIFO.
//! Malformed input is answered with an `error` message and never closes the
//! session.

use std::sync::Arc;

use crate::application::services::registry::{ConnectionRegistry, DeliveryError};
use crate::domain::connection::{ConnectionId, ConnectionState};
use crate::domain::protocol::{ControlRequest, ProtocolError, ServerMessage};
use crate::infrastructure::metrics;

/// Control-message handler for a single connection.
#[derive(Debug)]
pub struct ControlSession {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    state: ConnectionState,
}

impl ControlSession {
    /// Bind a session to a registered connection.
    #[must_use]
    pub fn new(id: ConnectionId, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            id,
            registry,
            state: ConnectionState::Open,
        }
    }

    /// Connection this session serves.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Handle one inbound text frame.
    ///
    /// Returns the session state afterwards. The session only leaves `Open`
    /// if the reply could not be delivered because the connection is gone.
    pub fn handle_text(&mut self, text: &str) -> ConnectionState {
        if !self.state.is_open() {
            return self.state;
        }

        let reply = match ControlRequest::decode(text) {
            Ok(request) => self.dispatch(request),
            Err(e) => self.protocol_error(&e),
        };

        self.reply(reply)
    }

    /// Answer a binary frame with an error message.
    pub fn reject_binary(&mut self) -> ConnectionState {
        if !self.state.is_open() {
            return self.state;
        }
        let reply = self.protocol_error(&ProtocolError::BinaryFrame);
        self.reply(reply)
    }

    /// Close the session and remove the connection from the registry.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        if self.state.begin_close() {
            self.registry.unregister(self.id);
            tracing::debug!(connection_id = %self.id, "Control session closed");
        }
        self.state.finish_close();
    }

    fn dispatch(&self, request: ControlRequest) -> ServerMessage {
        match request {
            ControlRequest::Subscribe(symbol) => {
                match self.registry.subscribe(self.id, symbol.clone()) {
                    Ok(_) => ServerMessage::subscribed(symbol),
                    Err(e) => ServerMessage::error(e.to_string()),
                }
            }
            ControlRequest::Unsubscribe(symbol) => {
                self.registry.unsubscribe(self.id, &symbol);
                ServerMessage::unsubscribed(symbol)
            }
            ControlRequest::Ping => ServerMessage::pong(),
        }
    }

    fn protocol_error(&self, error: &ProtocolError) -> ServerMessage {
        metrics::record_protocol_error();
        tracing::debug!(connection_id = %self.id, error = %error, "Rejected control message");
        ServerMessage::from(error.clone())
    }

    fn reply(&mut self, message: ServerMessage) -> ConnectionState {
        match self.registry.send(self.id, message) {
            Ok(()) | Err(DeliveryError::QueueFull(_)) => {}
            Err(DeliveryError::Disconnected(_) | DeliveryError::UnknownConnection(_)) => {
                self.close();
            }
        }
        self.state
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::registry::Registration;
    use crate::domain::protocol::AckStatus;
    use crate::domain::streaming::Symbol;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn session() -> (Arc<ConnectionRegistry>, ControlSession, Registration) {
        let registry = Arc::new(ConnectionRegistry::default());
        let registration = registry.register().unwrap();
        let session = ControlSession::new(registration.id, Arc::clone(&registry));
        (registry, session, registration)
    }

    fn next(registration: &mut Registration) -> ServerMessage {
        registration.outbound.try_recv().unwrap()
    }

    #[test]
    fn subscribe_acks_normalized_symbol() {
        let (registry, mut session, mut conn) = session();

        let state = session.handle_text(r#"{"action":"subscribe","symbol":"eurusd"}"#);

        assert_eq!(state, ConnectionState::Open);
        assert_eq!(
            next(&mut conn),
            ServerMessage::Subscription {
                status: AckStatus::Success,
                symbol: sym("EURUSD"),
            }
        );
        assert_eq!(registry.connection_symbols(conn.id), vec![sym("EURUSD")]);
    }

    #[test]
    fn repeated_subscribe_still_acks() {
        let (registry, mut session, mut conn) = session();

        session.handle_text(r#"{"action":"subscribe","symbol":"EURUSD"}"#);
        session.handle_text(r#"{"action":"subscribe","symbol":"EURUSD"}"#);

        assert_eq!(next(&mut conn), ServerMessage::subscribed(sym("EURUSD")));
        assert_eq!(next(&mut conn), ServerMessage::subscribed(sym("EURUSD")));
        assert_eq!(registry.subscribers(&sym("EURUSD")).len(), 1);
    }

    #[test]
    fn unsubscribe_acks_even_when_not_subscribed() {
        let (registry, mut session, mut conn) = session();

        session.handle_text(r#"{"action":"subscribe","symbol":"EURUSD"}"#);
        session.handle_text(r#"{"action":"unsubscribe","symbol":"EURUSD"}"#);
        session.handle_text(r#"{"action":"unsubscribe","symbol":"EURUSD"}"#);

        assert_eq!(next(&mut conn), ServerMessage::subscribed(sym("EURUSD")));
        assert_eq!(next(&mut conn), ServerMessage::unsubscribed(sym("EURUSD")));
        assert_eq!(next(&mut conn), ServerMessage::unsubscribed(sym("EURUSD")));
        assert!(registry.active_symbols().is_empty());
    }

    #[test]
    fn ping_replies_pong() {
        let (_registry, mut session, mut conn) = session();

        session.handle_text(r#"{"action":"ping"}"#);

        assert!(matches!(next(&mut conn), ServerMessage::Pong { .. }));
    }

    #[test]
    fn missing_symbol_replies_error_and_stays_open() {
        let (registry, mut session, mut conn) = session();

        let state = session.handle_text(r#"{"action":"subscribe"}"#);

        assert_eq!(state, ConnectionState::Open);
        assert!(matches!(next(&mut conn), ServerMessage::Error { .. }));
        assert!(registry.is_registered(conn.id));
        assert!(registry.active_symbols().is_empty());
    }

    #[test]
    fn invalid_json_replies_error() {
        let (_registry, mut session, mut conn) = session();

        let state = session.handle_text("{not json");

        assert_eq!(state, ConnectionState::Open);
        match next(&mut conn) {
            ServerMessage::Error { message } => assert!(message.starts_with("Invalid JSON")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_replies_error() {
        let (_registry, mut session, mut conn) = session();

        session.handle_text(r#"{"action":"trade","symbol":"EURUSD"}"#);

        assert_eq!(next(&mut conn), ServerMessage::error("unknown action: trade"));
    }

    #[test]
    fn binary_frame_replies_error() {
        let (_registry, mut session, mut conn) = session();

        let state = session.reject_binary();

        assert_eq!(state, ConnectionState::Open);
        assert_eq!(
            next(&mut conn),
            ServerMessage::error("binary frames are not supported")
        );
    }

    #[test]
    fn closed_transport_closes_session() {
        let (registry, mut session, conn) = session();
        let id = conn.id;
        drop(conn.outbound);

        let state = session.handle_text(r#"{"action":"ping"}"#);

        assert_eq!(state, ConnectionState::Closed);
        assert!(!registry.is_registered(id));
    }

    #[test]
    fn close_unregisters_and_is_idempotent() {
        let (registry, mut session, conn) = session();
        session.handle_text(r#"{"action":"subscribe","symbol":"EURUSD"}"#);

        session.close();
        session.close();

        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(!registry.is_registered(conn.id));
        assert!(registry.active_symbols().is_empty());
    }

    #[test]
    fn closed_session_ignores_input() {
        let (registry, mut session, mut conn) = session();
        session.close();

        let state = session.handle_text(r#"{"action":"subscribe","symbol":"EURUSD"}"#);

        assert_eq!(state, ConnectionState::Closed);
        assert!(conn.outbound.try_recv().is_err());
        assert!(registry.active_symbols().is_empty());
    }

    #[test]
    fn drop_unregisters() {
        let (registry, session, conn) = session();
        drop(session);
        assert!(!registry.is_registered(conn.id));
    }
}
