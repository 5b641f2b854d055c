//! Resilient relay of MetaTrader candles to a remote collector.
//!
//! The [`LifecycleController`] wires a [`ConnectionManager`] shared by the
//! foreground [`PollLoop`] and a background [`HealthMonitor`], persisting
//! progress through a [`StateStore`].

pub mod bridge;
pub mod connection;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod poll_loop;
pub mod run_flag;
pub mod sink;
pub mod state_store;
pub mod stats;

pub use bridge::BridgeSource;
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionState};
pub use error::{CollectorError, ConnectionError, PersistenceError, ReconnectError, SinkError};
pub use health::{HealthMonitor, HealthReport};
pub use lifecycle::{spawn_signal_listener, LifecycleController, LifecycleSettings, RunSummary};
pub use poll_loop::{PollLoop, PollSettings};
pub use run_flag::RunFlag;
pub use sink::HttpSink;
pub use state_store::{PersistedProgress, StateStore};
pub use stats::{CollectorStats, CycleReport};
