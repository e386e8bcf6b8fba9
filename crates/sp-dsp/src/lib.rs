//! sp-dsp: Per-stream audio DSP pipeline
//!
//! For every active audio stream this crate negotiates which of the
//! enabled DSP plugins take part in processing, assembles them into the
//! ordered pipeline
//!
//! ```text
//! pre process -> input resample -> master process -> post process -> output resample
//! ```
//!
//! and executes that pipeline once per block on the real-time audio
//! thread, translating between the interleaved hardware buffer layout
//! and the planar layout plugins work on.
//!
//! Plugins are third-party code: every call crossing the boundary is
//! contained. A faulting stage is dropped from the pipeline for the
//! rest of the stream; the stream itself keeps playing.

mod buffer;
mod error;
mod mode;
mod plugin;
mod ports;
mod process;
mod settings;
mod store;

pub use buffer::{MIN_BUFFER_FRAMES, PlanarBuffer};
pub use error::{DspError, DspResult};
pub use mode::{AddonMode, MasterMode, ModeId, ModeSwitch};
pub use plugin::{DspPlugin, ModeSetResponse, PluginFault, PluginId, PluginStatus};
pub use ports::{
    AudioSettingsStore, ChannelResolver, ContentClassifier, LayoutOrderResolver,
    MasterModeSelection, MemoryModeRegistry, MemorySettingsStore, ModeRegistry, StoredPreferences,
    TagClassifier,
};
pub use process::StreamProcess;
pub use settings::{StreamProperties, StreamSettings};
pub use store::JsonSettingsStore;
