//! Parley CLI
//!
//! Chat and template commands that work directly on the local database and
//! relay every change to a running `parley-server`, if there is one.

pub mod commands;
pub mod output;
pub mod relay;

pub use commands::Context;
pub use relay::{RelayError, RelayNotifier, RelayOutcome, RelaySink, DEFAULT_RELAY_TIMEOUT};
