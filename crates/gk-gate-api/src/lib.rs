//! Gate backend library crate.
//!
//! Re-exports all modules so the binary (`main.rs`) and external crates
//! (e.g. `gk-e2e-tests`) can reach `AppState`, `build_router` and the
//! engine types.

pub mod config;
pub mod db;
pub mod device_writer;
pub mod engine;
pub mod error;
pub mod mqtt_bridge;
pub mod routes;
pub mod state;
