//! The `logger` module wires `tracing` output for the client and its demo binaries.
//! See `bin/logger_demo.rs` for a binary demonstrating reload behaviour.

mod logger;
pub use logger::*;

pub use tracing::{debug, error, info, trace, warn};
