//! Gate controller simulator library.
//!
//! Re-exports all modules so the binary and `gk-e2e-tests` can drive a
//! simulated controller over a real or mock channel.

pub mod config;
pub mod device;
pub mod heartbeat;
pub mod mqtt_loop;
pub mod responder;
