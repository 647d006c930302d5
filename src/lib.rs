//! Two-deck automix engine for DesiZone Broadcaster.
//!
//! [`engine::MixEngine`] owns both decks, the audio graph and the play
//! queue, and decides on its own when and how to cross from the audible
//! deck to the staged one. Hosts drive it by calling
//! [`engine::MixEngine::tick`] (or through [`driver::Driver`]) and read
//! back [`engine::EngineEvent`]s.

pub mod audio;
pub mod commands;
pub mod config;
pub mod cues;
pub mod driver;
pub mod engine;
pub mod error;
pub mod history;
pub mod media;
pub mod queue;
pub mod scheduler;
pub mod state;

pub use commands::{CommandReply, EngineCommand};
pub use config::MixConfig;
pub use engine::{EngineEvent, EngineSnapshot, MixEngine};
pub use error::{EngineError, EngineResult};
