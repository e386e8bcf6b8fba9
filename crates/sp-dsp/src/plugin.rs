//! The DSP plugin boundary
//!
//! One trait covers every plugin regardless of which pipeline stages it
//! serves; capability queries tell the negotiator which of the five
//! roles a plugin may fill. All per-stage calls are parameterized by the
//! stream id, so one plugin instance can serve several streams at once.
//!
//! Foreign faults (a plugin panicking or its backing library misbehaving)
//! are modeled as the `Err` side of each processing call rather than as
//! unwinding: the engine maps a [`PluginFault`] to a stage-disable
//! decision at every call site and never propagates it further.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sp_core::{StreamId, StreamType};

use crate::buffer::PlanarBuffer;
use crate::mode::{AddonMode, ModeId};
use crate::settings::{StreamProperties, StreamSettings};

/// Identifier of a loaded plugin, unique across the enabled set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PluginId(pub i32);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status codes a plugin reports from lifecycle and mode calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    /// Call succeeded
    NoError,
    /// Unspecified failure
    Unknown,
    /// The plugin declines this stream; not an error
    IgnoreMe,
    NotImplemented,
    Rejected,
    InvalidParameters,
    Failed,
}

impl PluginStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == PluginStatus::NoError
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginStatus::NoError => "no error",
            PluginStatus::Unknown => "unknown error",
            PluginStatus::IgnoreMe => "ignore me",
            PluginStatus::NotImplemented => "not implemented",
            PluginStatus::Rejected => "rejected",
            PluginStatus::InvalidParameters => "invalid parameters",
            PluginStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A fault raised across the plugin boundary.
///
/// Stands in for anything that would otherwise unwind out of foreign
/// plugin code. Call sites contain it: the offending stage is disabled
/// for the rest of the stream, the fault itself goes no further.
#[derive(Error, Debug, Clone)]
#[error("plugin fault: {0}")]
pub struct PluginFault(pub String);

impl PluginFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Answer to a master-mode selection call.
///
/// `stream_type` echoes the type the plugin will actually process with;
/// a plugin may answer with a different type than it was offered, which
/// the engine accepts and logs.
#[derive(Debug, Clone, Copy)]
pub struct ModeSetResponse {
    pub status: PluginStatus,
    pub stream_type: StreamType,
}

impl ModeSetResponse {
    pub fn accepted(stream_type: StreamType) -> Self {
        Self {
            status: PluginStatus::NoError,
            stream_type,
        }
    }
}

/// A loaded DSP plugin.
///
/// Capability queries default to `false`; a plugin overrides the ones it
/// serves plus the matching operation methods. Operations of unserved
/// roles are never invoked by the engine.
pub trait DspPlugin: Send + Sync {
    fn id(&self) -> PluginId;

    fn name(&self) -> &str;

    // -- capabilities ----------------------------------------------------

    fn supports_pre_process(&self) -> bool {
        false
    }

    fn supports_input_resample(&self) -> bool {
        false
    }

    fn supports_master_process(&self) -> bool {
        false
    }

    fn supports_post_process(&self) -> bool {
        false
    }

    fn supports_output_resample(&self) -> bool {
        false
    }

    // -- stream lifecycle ------------------------------------------------

    /// Offer this stream to the plugin. `IgnoreMe` declines without
    /// error; any other non-ok status drops the plugin from this stream.
    fn stream_create(
        &self,
        settings: &StreamSettings,
        properties: &StreamProperties,
    ) -> PluginStatus;

    /// (Re)initialize for the current settings; called at every full
    /// pipeline reinitialization.
    fn stream_initialize(&self, _settings: &StreamSettings) -> PluginStatus {
        PluginStatus::NoError
    }

    fn stream_destroy(&self, _stream: StreamId) {}

    // -- pre processing --------------------------------------------------

    /// In-place rework of the input block. Sample content only; channel
    /// and frame counts must not change. `Ok(false)` fails the block.
    fn pre_process(
        &self,
        _stream: StreamId,
        _audio: &mut PlanarBuffer,
        _frames: usize,
    ) -> Result<bool, PluginFault> {
        Ok(true)
    }

    // -- input resampling ------------------------------------------------

    /// Target rate of the input resampler; 0 means invalid/unset.
    fn input_resample_rate(&self, _stream: StreamId) -> u32 {
        0
    }

    /// Output frame capacity the next resample call needs.
    fn input_resample_needed_frames(&self, _stream: StreamId) -> Result<usize, PluginFault> {
        Ok(0)
    }

    /// Returns produced frames; 0 signals failure.
    fn input_resample_process(
        &self,
        _stream: StreamId,
        _input: &PlanarBuffer,
        _output: &mut PlanarBuffer,
        _frames: usize,
    ) -> Result<usize, PluginFault> {
        Ok(0)
    }

    /// Stage delay in seconds.
    fn input_resample_delay(&self, _stream: StreamId) -> Result<f64, PluginFault> {
        Ok(0.0)
    }

    // -- master processing -----------------------------------------------

    /// Selectable master modes of this plugin for the given stream.
    fn master_process_modes(&self, _stream: StreamId) -> Result<Vec<AddonMode>, PluginStatus> {
        Err(PluginStatus::NotImplemented)
    }

    /// Select the active master mode. The engine calls this with the
    /// effective stream type; the response may override it.
    fn master_process_set_mode(
        &self,
        _stream: StreamId,
        stream_type: StreamType,
        _mode_number: u32,
        _mode_id: ModeId,
    ) -> Result<ModeSetResponse, PluginFault> {
        Ok(ModeSetResponse::accepted(stream_type))
    }

    fn master_needed_frames(&self, _stream: StreamId) -> Result<usize, PluginFault> {
        Ok(0)
    }

    /// Returns produced frames; 0 signals failure.
    fn master_process(
        &self,
        _stream: StreamId,
        _input: &PlanarBuffer,
        _output: &mut PlanarBuffer,
        _frames: usize,
    ) -> Result<usize, PluginFault> {
        Ok(0)
    }

    fn master_delay(&self, _stream: StreamId) -> Result<f64, PluginFault> {
        Ok(0.0)
    }

    /// Human-readable info line about the running master mode, shown by
    /// player UIs.
    fn master_stream_info(&self, _stream: StreamId) -> String {
        String::new()
    }

    // -- post processing -------------------------------------------------

    fn post_needed_frames(&self, _stream: StreamId) -> Result<usize, PluginFault> {
        Ok(0)
    }

    /// Returns produced frames; 0 signals failure.
    fn post_process(
        &self,
        _stream: StreamId,
        _input: &PlanarBuffer,
        _output: &mut PlanarBuffer,
        _frames: usize,
    ) -> Result<usize, PluginFault> {
        Ok(0)
    }

    fn post_delay(&self, _stream: StreamId) -> Result<f64, PluginFault> {
        Ok(0.0)
    }

    // -- output resampling -----------------------------------------------

    /// Target rate of the output resampler; 0 means invalid/unset.
    fn output_resample_rate(&self, _stream: StreamId) -> u32 {
        0
    }

    fn output_resample_needed_frames(&self, _stream: StreamId) -> Result<usize, PluginFault> {
        Ok(0)
    }

    /// Returns produced frames; 0 signals failure.
    fn output_resample_process(
        &self,
        _stream: StreamId,
        _input: &PlanarBuffer,
        _output: &mut PlanarBuffer,
        _frames: usize,
    ) -> Result<usize, PluginFault> {
        Ok(0)
    }

    fn output_resample_delay(&self, _stream: StreamId) -> Result<f64, PluginFault> {
        Ok(0.0)
    }
}
