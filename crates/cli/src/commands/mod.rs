//! CLI commands for the candle relay.

pub mod check;
pub mod init_config;
pub mod run;
pub mod status;

pub use check::{run_check, CheckArgs};
pub use init_config::{run_init_config, InitConfigArgs};
pub use run::{run_collector, RunArgs};
pub use status::{run_status, StatusArgs};
