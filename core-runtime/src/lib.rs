//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the offline media core:
//! - Logging and tracing infrastructure
//! - Configuration management and bridge wiring
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the download engine and
//! service façade depend on. It establishes the logging conventions, the
//! fail-fast configuration builder, and the event broadcasting used to
//! report download progress to hosts.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
