//! Plejd gateway library
//! Keeps an authenticated BLE session with a Plejd lighting mesh and exposes
//! device state changes and scene triggers to a home-automation layer.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;

pub use error::{PlejdError, Result};
