//! sp-core: Shared audio types for the Solara player audio stack
//!
//! This crate provides the vocabulary used across the audio engine:
//! logical channel positions, interleaved channel layouts, block formats
//! and stream classification.

mod channel;
mod format;
mod stream;

pub use channel::*;
pub use format::*;
pub use stream::*;
