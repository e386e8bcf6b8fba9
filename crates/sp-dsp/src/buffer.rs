//! Planar stage buffers
//!
//! Every pipeline stage owns one [`PlanarBuffer`]: a float sequence per
//! logical channel slot, all [`CHANNEL_COUNT`] slots allocated whether
//! the current layout uses them or not (unused slots stay available to
//! plugins as scratch). Capacity starts at a fixed floor, grows with a
//! headroom margin when a stage needs more, and never shrinks.

use sp_core::{AudioChannel, CHANNEL_COUNT};

/// Capacity floor of every stage buffer, in frames.
pub const MIN_BUFFER_FRAMES: usize = 4096;

/// Growable per-channel scratch storage for one pipeline stage.
///
/// Contents are scratch, not state: growth makes no guarantee about
/// previously written samples, and [`PlanarBuffer::clear`] is the only
/// way to get defined (zero) content.
#[derive(Debug, Clone)]
pub struct PlanarBuffer {
    planes: Vec<Vec<f32>>,
    frames: usize,
}

impl PlanarBuffer {
    /// Allocate at the capacity floor.
    pub fn new() -> Self {
        Self {
            planes: (0..CHANNEL_COUNT).map(|_| vec![0.0; MIN_BUFFER_FRAMES]).collect(),
            frames: MIN_BUFFER_FRAMES,
        }
    }

    /// Current per-channel capacity in frames.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.frames
    }

    /// Make sure every channel can hold `needed` frames.
    ///
    /// Grows to `needed` plus a tenth of the floor as headroom; existing
    /// capacity is kept (never shrinks).
    pub fn ensure_frames(&mut self, needed: usize) {
        if needed <= self.frames {
            return;
        }
        let frames = needed + MIN_BUFFER_FRAMES / 10;
        for plane in &mut self.planes {
            plane.resize(frames, 0.0);
        }
        self.frames = frames;
    }

    /// Zero every channel over the whole capacity.
    pub fn clear(&mut self) {
        for plane in &mut self.planes {
            plane.fill(0.0);
        }
    }

    /// Samples of one logical channel.
    #[inline]
    pub fn channel(&self, channel: AudioChannel) -> &[f32] {
        &self.planes[channel.slot()]
    }

    /// Mutable samples of one logical channel.
    #[inline]
    pub fn channel_mut(&mut self, channel: AudioChannel) -> &mut [f32] {
        &mut self.planes[channel.slot()]
    }

    /// All channel planes in slot order.
    #[inline]
    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }
}

impl Default for PlanarBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_floor() {
        let buf = PlanarBuffer::new();
        assert_eq!(buf.capacity(), MIN_BUFFER_FRAMES);
        assert_eq!(buf.planes().len(), CHANNEL_COUNT);
    }

    #[test]
    fn grows_with_headroom_never_shrinks() {
        let mut buf = PlanarBuffer::new();
        buf.ensure_frames(10_000);
        assert_eq!(buf.capacity(), 10_000 + MIN_BUFFER_FRAMES / 10);

        let grown = buf.capacity();
        buf.ensure_frames(16);
        assert_eq!(buf.capacity(), grown);
    }

    #[test]
    fn growth_is_monotone_over_block_sequence() {
        let mut buf = PlanarBuffer::new();
        let mut max_seen = 0usize;
        for needed in [512, 9000, 1024, 12_000, 256] {
            buf.ensure_frames(needed);
            max_seen = max_seen.max(needed);
            assert!(buf.capacity() >= max_seen);
        }
    }

    #[test]
    fn clear_zeroes_all_slots() {
        let mut buf = PlanarBuffer::new();
        buf.channel_mut(AudioChannel::FrontLeft)[3] = 1.0;
        buf.channel_mut(AudioChannel::TopCenter)[7] = -1.0;
        buf.clear();
        assert_eq!(buf.channel(AudioChannel::FrontLeft)[3], 0.0);
        assert_eq!(buf.channel(AudioChannel::TopCenter)[7], 0.0);
    }
}
