//! Negotiated per-stream configuration shared with plugins

use serde::{Deserialize, Serialize};

use sp_core::{BaseType, ProcessQuality, StreamId, StreamType};

/// Immutable-per-stream descriptor handed to plugins at stream creation.
///
/// `stream_type` starts as the engine-resolved effective type; the
/// selected master plugin may override it at mode selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamProperties {
    pub stream_id: StreamId,
    /// Effective stream type as seen by plugins
    pub stream_type: StreamType,
    /// Coarse codec/channel classification
    pub base_type: BaseType,
    /// Source-side identifier of the selected audio stream
    pub identifier: u32,
    pub name: String,
    pub language: String,
    pub codec_id: String,
    pub channels: usize,
    pub sample_rate: u32,
}

/// Mutable negotiated configuration, recomputed whenever the observed
/// channel layout or a stage sample rate changes.
///
/// Frame counts and sample rates exist for three stages: input (as
/// delivered), process (after the optional input resample) and output
/// (after the optional output resample).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    pub stream_id: StreamId,
    pub stream_type: StreamType,
    /// Input presence mask, `AudioChannel::presence_bit` bits
    pub in_channel_present_flags: u32,
    pub in_channels: usize,
    pub in_frames: usize,
    pub in_sample_rate: u32,
    pub process_frames: usize,
    pub process_sample_rate: u32,
    /// Output presence mask, `AudioChannel::presence_bit` bits
    pub out_channel_present_flags: u32,
    pub out_channels: usize,
    pub out_frames: usize,
    pub out_sample_rate: u32,
    /// Stereo upmix requested by the player
    pub stereo_upmix: bool,
    /// True once an input resampler was selected
    pub input_resampling_active: bool,
    pub quality: ProcessQuality,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stream_id: StreamId(0),
            stream_type: StreamType::Invalid,
            in_channel_present_flags: 0,
            in_channels: 0,
            in_frames: 0,
            in_sample_rate: 0,
            process_frames: 0,
            process_sample_rate: 0,
            out_channel_present_flags: 0,
            out_channels: 0,
            out_frames: 0,
            out_sample_rate: 0,
            stereo_upmix: false,
            input_resampling_active: false,
            quality: ProcessQuality::Mid,
        }
    }
}

impl Default for StreamProperties {
    fn default() -> Self {
        Self {
            stream_id: StreamId(0),
            stream_type: StreamType::Invalid,
            base_type: BaseType::Stereo,
            identifier: 0,
            name: String::new(),
            language: String::new(),
            codec_id: String::new(),
            channels: 0,
            sample_rate: 0,
        }
    }
}
