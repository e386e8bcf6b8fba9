//! Block formats and the interleaved sample buffer

use serde::{Deserialize, Serialize};

use crate::ChannelLayout;

/// Format of one side of the DSP pipeline (input or output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel arrangement
    pub channel_layout: ChannelLayout,
    /// Frames per block
    pub frames: usize,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channel_layout: ChannelLayout, frames: usize) -> Self {
        Self {
            sample_rate,
            channel_layout,
            frames,
        }
    }
}

/// Resample quality preference, forwarded to resampling plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessQuality {
    Low,
    Mid,
    High,
}

impl Default for ProcessQuality {
    fn default() -> Self {
        Self::Mid
    }
}

/// One interleaved block of f32 samples as exchanged with the
/// hardware/codec boundary.
///
/// `data` holds `frames * channels` samples, frame-major: all channels of
/// frame 0, then all channels of frame 1, and so on. Which logical
/// channel sits at which offset within a frame is determined by `layout`
/// and resolved through the channel resolver.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    /// Interleaved arrangement identifier
    pub layout: ChannelLayout,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channels per frame
    pub channels: usize,
    /// Valid frames in `data`
    pub frames: usize,
    /// Interleaved samples, `frames * channels` long
    pub data: Vec<f32>,
}

impl SampleBuffer {
    /// Create a silent buffer for `frames` frames of the given layout.
    pub fn silent(layout: ChannelLayout, sample_rate: u32, frames: usize) -> Self {
        let channels = layout.count();
        Self {
            layout,
            sample_rate,
            channels,
            frames,
            data: vec![0.0; frames * channels],
        }
    }

    /// Sample of `frame` at interleaved offset `index`.
    #[inline]
    pub fn sample(&self, frame: usize, index: usize) -> f32 {
        self.data[frame * self.channels + index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_buffer_dimensions() {
        let buf = SampleBuffer::silent(ChannelLayout::STEREO, 48000, 256);
        assert_eq!(buf.channels, 2);
        assert_eq!(buf.frames, 256);
        assert_eq!(buf.data.len(), 512);
        assert!(buf.data.iter().all(|s| *s == 0.0));
    }
}
