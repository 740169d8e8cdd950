//! Core domain + application logic for the sequential channel forwarder.
//!
//! This crate is intentionally framework-agnostic. The Telegram client lives
//! behind a port (trait) implemented in the adapter crate.

pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod ports;
pub mod progress;
pub mod relay;
pub mod settings;

pub use errors::{Error, Result};
