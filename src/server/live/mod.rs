//! Live state derived from the switch's event stream.
//!
//! - `events`: typed view over raw manager events
//! - `aggregator`: folds events into the derived-state table
//! - `hub`: fans state changes out to admin WebSocket sessions

pub mod aggregator;
pub mod events;
pub mod hub;

pub use aggregator::StateAggregator;
pub use hub::{BroadcastHub, PushMessage};
