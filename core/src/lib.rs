//! # Rangeping Core
//!
//! The probing engine: a fair, cancellable concurrency limiter, per-target
//! probe sessions over pluggable echo engines, and the orchestrator fanning a
//! whole address list out across them.

pub mod echo;
pub mod limiter;
pub mod network;
pub mod orchestrator;
pub mod session;
pub mod source;
