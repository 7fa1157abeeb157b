//! # Rangeping Common
//!
//! Models shared between the probing engine and its consumers.
//!
//! * **[`network`]**: address ranges and per-target probe results.
//! * **[`config`]**: the explicit run configuration handed down from the CLI.

pub mod config;
pub mod network;
