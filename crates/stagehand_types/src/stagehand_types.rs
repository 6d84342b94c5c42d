//! Stagehand Types - Core data definitions for the event dispatch system
//!
//! This crate contains the pure data structures shared by the runtime and the
//! host: events coming in from platforms, the rules that react to them, and
//! the tracks sequenced by the playlist.

mod event;
mod rule;
mod track;

pub use event::*;
pub use rule::*;
pub use track::*;
