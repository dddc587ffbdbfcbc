//! Connection Registry
//!
//! Shared, concurrent record of live connections and their subscriptions.
//!
//! Each connection owns a bounded outbound queue; the registry keeps the
//! sending half and hands the receiving half to the connection's writer
//! task. Delivery never blocks: a full queue drops the message for that
//! connection only, a closed queue removes the connection.
//!
//! All state sits behind one `RwLock`. Mutations take the write lock,
//! broadcast snapshots recipients under the read lock and delivers after
//! releasing it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::connection::ConnectionId;
use crate::domain::protocol::ServerMessage;
use crate::domain::streaming::Symbol;
use crate::domain::subscription::SubscriptionIndex;
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Configuration
// =============================================================================

/// Registry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum number of live connections.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            outbound_capacity: 256,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Registry admission and lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry already holds `limit` live connections.
    #[error("connection limit reached ({limit})")]
    CapacityExceeded {
        /// Configured maximum.
        limit: usize,
    },

    /// The connection is not (or no longer) registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

/// Single-recipient delivery errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Transport closed; the connection has been unregistered.
    #[error("connection {0} disconnected")]
    Disconnected(ConnectionId),

    /// Outbound queue full; the message was dropped.
    #[error("outbound queue full for {0}")]
    QueueFull(ConnectionId),

    /// The connection is not registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

// =============================================================================
// Reports
// =============================================================================

/// Result of admitting a connection.
#[derive(Debug)]
pub struct Registration {
    /// Identity assigned to the connection.
    pub id: ConnectionId,
    /// Receiving half of the connection's outbound queue.
    pub outbound: mpsc::Receiver<ServerMessage>,
}

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients the message was queued for.
    pub delivered: usize,
    /// Recipients whose queue was full.
    pub dropped: usize,
    /// Recipients found disconnected and removed.
    pub disconnected: usize,
}

impl BroadcastReport {
    /// Number of recipients in the snapshot.
    #[must_use]
    pub const fn recipients(&self) -> usize {
        self.delivered + self.dropped + self.disconnected
    }
}

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live connections.
    pub connections: usize,
    /// Symbols with at least one subscriber.
    pub active_symbols: usize,
    /// Total (connection, symbol) pairs.
    pub subscriptions: usize,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug)]
struct Connection {
    outbound: mpsc::Sender<ServerMessage>,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    index: SubscriptionIndex,
}

/// Registry of live connections and their symbol subscriptions.
#[derive(Debug)]
pub struct ConnectionRegistry {
    config: RegistryConfig,
    next_id: AtomicU64,
    state: RwLock<RegistryState>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Admit a new connection with an empty subscription set.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::CapacityExceeded` when `max_connections`
    /// connections are already live.
    pub fn register(&self) -> Result<Registration, RegistryError> {
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));

        let (id, live) = {
            let mut state = self.state.write();
            if state.connections.len() >= self.config.max_connections {
                drop(state);
                metrics::record_connection_rejected();
                tracing::warn!(
                    limit = self.config.max_connections,
                    "Rejecting connection, registry full"
                );
                return Err(RegistryError::CapacityExceeded {
                    limit: self.config.max_connections,
                });
            }

            let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            state.connections.insert(
                id,
                Connection {
                    outbound: tx,
                    connected_at: Utc::now(),
                },
            );
            (id, state.connections.len())
        };

        metrics::set_connections(live);
        tracing::debug!(connection_id = %id, connections = live, "Connection registered");

        Ok(Registration { id, outbound: rx })
    }

    /// Remove a connection and all of its subscriptions.
    ///
    /// Idempotent. Returns `true` if the connection was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, live, active) = {
            let mut state = self.state.write();
            let removed = state.connections.remove(&id);
            if removed.is_some() {
                state.index.remove_connection(id);
            }
            (removed, state.connections.len(), state.index.symbol_count())
        };

        let Some(connection) = removed else {
            return false;
        };

        metrics::set_connections(live);
        metrics::set_active_symbols(active);
        let session = Utc::now() - connection.connected_at;
        tracing::debug!(
            connection_id = %id,
            connections = live,
            session_secs = session.num_seconds(),
            "Connection unregistered"
        );
        true
    }

    /// Subscribe a connection to a symbol.
    ///
    /// Idempotent: returns `Ok(false)` if the subscription already existed.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownConnection` if `id` is not registered.
    pub fn subscribe(&self, id: ConnectionId, symbol: Symbol) -> Result<bool, RegistryError> {
        let (added, activated, active) = {
            let mut state = self.state.write();
            if !state.connections.contains_key(&id) {
                return Err(RegistryError::UnknownConnection(id));
            }
            let activated = !state.index.is_active(&symbol);
            let added = state.index.subscribe(id, symbol.clone());
            (added, activated, state.index.symbol_count())
        };

        if added {
            metrics::set_active_symbols(active);
            tracing::debug!(connection_id = %id, symbol = %symbol, "Subscribed");
        }
        if activated {
            tracing::info!(symbol = %symbol, active_symbols = active, "Symbol activated");
        }
        Ok(added)
    }

    /// Unsubscribe a connection from a symbol.
    ///
    /// Idempotent. Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, id: ConnectionId, symbol: &Symbol) -> bool {
        let (removed, deactivated, active) = {
            let mut state = self.state.write();
            let removed = state.index.unsubscribe(id, symbol);
            let deactivated = removed && !state.index.is_active(symbol);
            (removed, deactivated, state.index.symbol_count())
        };

        if removed {
            metrics::set_active_symbols(active);
            tracing::debug!(connection_id = %id, symbol = %symbol, "Unsubscribed");
        }
        if deactivated {
            tracing::info!(symbol = %symbol, active_symbols = active, "Symbol deactivated");
        }
        removed
    }

    /// Queue a message for exactly one connection.
    ///
    /// # Errors
    ///
    /// - `DeliveryError::Disconnected` if the transport closed; the
    ///   connection is unregistered before returning.
    /// - `DeliveryError::QueueFull` if the queue is full; the message is
    ///   dropped and the connection kept.
    /// - `DeliveryError::UnknownConnection` if `id` is not registered.
    pub fn send(&self, id: ConnectionId, message: ServerMessage) -> Result<(), DeliveryError> {
        let outbound = self
            .state
            .read()
            .connections
            .get(&id)
            .map(|connection| connection.outbound.clone())
            .ok_or(DeliveryError::UnknownConnection(id))?;

        let kind = message.kind();
        self.deliver(id, &outbound, message).inspect(|()| {
            metrics::record_messages_sent(kind, 1);
        })
    }

    /// Queue a message for every connection subscribed to `symbol`.
    ///
    /// Recipients are snapshotted under the read lock; delivery happens
    /// after it is released. A failure for one recipient never affects the
    /// others.
    pub fn broadcast(&self, symbol: &Symbol, message: &ServerMessage) -> BroadcastReport {
        let recipients: Vec<(ConnectionId, mpsc::Sender<ServerMessage>)> = {
            let state = self.state.read();
            state
                .index
                .subscribers(symbol)
                .into_iter()
                .filter_map(|id| {
                    state
                        .connections
                        .get(&id)
                        .map(|connection| (id, connection.outbound.clone()))
                })
                .collect()
        };

        let mut report = BroadcastReport::default();
        for (id, outbound) in &recipients {
            match self.deliver(*id, outbound, message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::QueueFull(_)) => report.dropped += 1,
                Err(DeliveryError::Disconnected(_) | DeliveryError::UnknownConnection(_)) => {
                    report.disconnected += 1;
                }
            }
        }

        if report.delivered > 0 {
            metrics::record_messages_sent(message.kind(), report.delivered as u64);
        }
        report
    }

    fn deliver(
        &self,
        id: ConnectionId,
        outbound: &mpsc::Sender<ServerMessage>,
        message: ServerMessage,
    ) -> Result<(), DeliveryError> {
        match outbound.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                metrics::record_messages_dropped(DropReason::QueueFull, 1);
                tracing::warn!(connection_id = %id, "Outbound queue full, dropping message");
                Err(DeliveryError::QueueFull(id))
            }
            Err(TrySendError::Closed(_)) => {
                metrics::record_messages_dropped(DropReason::Disconnected, 1);
                self.unregister(id);
                Err(DeliveryError::Disconnected(id))
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Symbols that currently have at least one subscriber.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.state.read().index.active_symbols()
    }

    /// Connections subscribed to `symbol`.
    #[must_use]
    pub fn subscribers(&self, symbol: &Symbol) -> Vec<ConnectionId> {
        self.state.read().index.subscribers(symbol)
    }

    /// Symbols `id` is subscribed to.
    #[must_use]
    pub fn connection_symbols(&self, id: ConnectionId) -> Vec<Symbol> {
        self.state.read().index.symbols_for(id)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.state.read().connections.contains_key(&id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Point-in-time counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            connections: state.connections.len(),
            active_symbols: state.index.symbol_count(),
            subscriptions: state.index.subscription_count(),
        }
    }

    /// Drop every connection and subscription.
    ///
    /// Dropping the senders closes each outbound queue, so writer tasks
    /// drain what is left and exit.
    pub fn shutdown(&self) -> usize {
        let removed = {
            let mut state = self.state.write();
            let removed = state.connections.len();
            state.connections.clear();
            state.index.clear();
            removed
        };

        metrics::set_connections(0);
        metrics::set_active_symbols(0);
        tracing::info!(connections = removed, "Connection registry shut down");
        removed
    }
}

// =============================================================================
// Tests
// =============================================================================
