//! Market Data Adapters
//!
//! Implementations of the `MarketDataSource` port.
//!
//! - `QuoteCache`: latest quote per symbol, read by the broadcast loop
//! - `SimulatedFeed`: random-walk generator that fills the cache

mod quote_cache;
mod simulated;

pub use quote_cache::QuoteCache;
pub use simulated::SimulatedFeed;
