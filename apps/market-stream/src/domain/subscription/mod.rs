//! Subscription Index
//!
//! Domain type tracking which connections want which symbols.
//!
//! # Design
//!
//! The index keeps both directions of the relation:
//! - symbol → connections subscribed to it (used by the broadcast loop)
//! - connection → symbols it is subscribed to (used on disconnect)
//!
//! Both maps change together in every operation, so a connection appears in
//! a symbol's subscriber set exactly when that symbol is in the connection's
//! own set. Empty sets are pruned immediately: a symbol key exists only
//! while it has at least one subscriber, and iterating the keys yields
//! exactly the symbols worth fetching.
//!
//! The index itself is not synchronized; the connection registry owns it
//! behind a lock.

use std::collections::{HashMap, HashSet};

use super::connection::ConnectionId;
use super::streaming::Symbol;

// =============================================================================
// Subscription Index
// =============================================================================

/// Bidirectional symbol ↔ connection subscription index.
///
/// # Example
///
/// ```rust
/// use market_stream::domain::connection::ConnectionId;
/// use market_stream::domain::streaming::Symbol;
/// use market_stream::domain::subscription::SubscriptionIndex;
///
/// let mut index = SubscriptionIndex::new();
/// let eurusd = Symbol::parse("EURUSD").unwrap();
/// let a = ConnectionId::new(1);
/// let b = ConnectionId::new(2);
///
/// assert!(index.subscribe(a, eurusd.clone()));
/// assert!(index.subscribe(b, eurusd.clone()));
/// assert_eq!(index.subscribers(&eurusd).len(), 2);
///
/// // First unsubscribe keeps the symbol alive for B
/// index.unsubscribe(a, &eurusd);
/// assert!(index.is_active(&eurusd));
///
/// // Removing B prunes the symbol entirely
/// let emptied = index.remove_connection(b);
/// assert_eq!(emptied, vec![eurusd.clone()]);
/// assert!(!index.is_active(&eurusd));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    /// Map from symbol to the connections subscribed to it.
    subscribers: HashMap<Symbol, HashSet<ConnectionId>>,
    /// Map from connection to the symbols it is subscribed to.
    connection_symbols: HashMap<ConnectionId, HashSet<Symbol>>,
}

impl SubscriptionIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a symbol.
    ///
    /// Returns `true` if the subscription is new, `false` if the connection
    /// was already subscribed (the index is unchanged).
    pub fn subscribe(&mut self, connection: ConnectionId, symbol: Symbol) -> bool {
        let symbols = self.connection_symbols.entry(connection).or_default();
        if !symbols.insert(symbol.clone()) {
            return false;
        }

        self.subscribers
            .entry(symbol)
            .or_default()
            .insert(connection);
        true
    }

    /// Unsubscribe a connection from a symbol.
    ///
    /// Returns `true` if a subscription was removed. The symbol is pruned if
    /// this was its last subscriber.
    pub fn unsubscribe(&mut self, connection: ConnectionId, symbol: &Symbol) -> bool {
        let Some(symbols) = self.connection_symbols.get_mut(&connection) else {
            return false;
        };

        if !symbols.remove(symbol) {
            return false;
        }

        // Clean up empty connection entry
        if symbols.is_empty() {
            self.connection_symbols.remove(&connection);
        }

        self.detach(connection, symbol);
        true
    }

    /// Remove every subscription held by a connection.
    ///
    /// Returns the symbols that lost their last subscriber as a result.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<Symbol> {
        let Some(symbols) = self.connection_symbols.remove(&connection) else {
            return vec![];
        };

        symbols
            .into_iter()
            .filter(|symbol| self.detach(connection, symbol))
            .collect()
    }

    /// Snapshot the connections currently subscribed to a symbol.
    #[must_use]
    pub fn subscribers(&self, symbol: &Symbol) -> Vec<ConnectionId> {
        self.subscribers
            .get(symbol)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot the symbols that have at least one subscriber.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.subscribers.keys().cloned().collect()
    }

    /// Snapshot the symbols a connection is subscribed to.
    #[must_use]
    pub fn symbols_for(&self, connection: ConnectionId) -> Vec<Symbol> {
        self.connection_symbols
            .get(&connection)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a symbol has any subscriber.
    #[must_use]
    pub fn is_active(&self, symbol: &Symbol) -> bool {
        self.subscribers.contains_key(symbol)
    }

    /// Number of symbols with at least one subscriber.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total number of (connection, symbol) pairs.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.connection_symbols.values().map(HashSet::len).sum()
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.subscribers.clear();
        self.connection_symbols.clear();
    }

    /// Remove `connection` from `symbol`'s subscriber set.
    ///
    /// Returns `true` if the set became empty and was pruned.
    fn detach(&mut self, connection: ConnectionId, symbol: &Symbol) -> bool {
        let Some(set) = self.subscribers.get_mut(symbol) else {
            return false;
        };

        set.remove(&connection);
        if set.is_empty() {
            self.subscribers.remove(symbol);
            return true;
        }
        false
    }
}

// =============================================================================
// Tests
// =============================================================================
