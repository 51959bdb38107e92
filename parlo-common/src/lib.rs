//! # Parlo Common Library
//!
//! Shared code for the Parlo services including:
//! - Error types
//! - Event types (ParloEvent enum) and the EventBus
//! - Configuration loading
//! - Logging initialisation
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, ParloEvent};
