//! compflow - render scheduler for node-graph compositing
//!
//! Re-exports all modules for use by the binary target.

// Scheduling engine (tree, clock, events, cache)
pub mod core;

pub mod cli;
pub mod config;
pub mod entities;
pub mod nodes;
pub mod paths;

#[cfg(test)]
pub mod testing;

pub use config::EngineSettings;
pub use core::engine::{EngineError, RenderEngine, RenderRequest};
pub use core::event_bus::EventBus;
pub use core::run_args::PlaybackMode;
pub use entities::{RenderOutput, Session, Timeline};
