//! Logical channel positions and interleaved channel layouts
//!
//! The DSP pipeline works on planar buffers indexed by [`AudioChannel`].
//! The hardware/codec boundary identifies its interleaved arrangement with
//! a [`ChannelLayout`] bitmask; which logical channel sits at which
//! interleaved offset is resolved externally (see the channel resolver
//! port in sp-dsp).

use serde::{Deserialize, Serialize};

/// Logical speaker positions addressable by the DSP pipeline.
///
/// The enum order is the planar buffer slot order; every stage buffer
/// carries one sample sequence per position whether the current layout
/// uses it or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum AudioChannel {
    /// Front left
    FrontLeft = 0,
    /// Front right
    FrontRight,
    /// Front center
    FrontCenter,
    /// Low frequency effects
    Lfe,
    /// Back left
    BackLeft,
    /// Back right
    BackRight,
    /// Front left of center
    FrontLeftOfCenter,
    /// Front right of center
    FrontRightOfCenter,
    /// Back center
    BackCenter,
    /// Side left
    SideLeft,
    /// Side right
    SideRight,
    /// Top front left
    TopFrontLeft,
    /// Top front right
    TopFrontRight,
    /// Top front center
    TopFrontCenter,
    /// Top center
    TopCenter,
    /// Top back left
    TopBackLeft,
    /// Top back right
    TopBackRight,
    /// Top back center
    TopBackCenter,
    /// Back left of center
    BackLeftOfCenter,
    /// Back right of center
    BackRightOfCenter,
}

/// Number of planar channel slots carried by every stage buffer.
pub const CHANNEL_COUNT: usize = 20;

impl AudioChannel {
    /// All positions in planar slot order.
    pub const ALL: [AudioChannel; CHANNEL_COUNT] = [
        AudioChannel::FrontLeft,
        AudioChannel::FrontRight,
        AudioChannel::FrontCenter,
        AudioChannel::Lfe,
        AudioChannel::BackLeft,
        AudioChannel::BackRight,
        AudioChannel::FrontLeftOfCenter,
        AudioChannel::FrontRightOfCenter,
        AudioChannel::BackCenter,
        AudioChannel::SideLeft,
        AudioChannel::SideRight,
        AudioChannel::TopFrontLeft,
        AudioChannel::TopFrontRight,
        AudioChannel::TopFrontCenter,
        AudioChannel::TopCenter,
        AudioChannel::TopBackLeft,
        AudioChannel::TopBackRight,
        AudioChannel::TopBackCenter,
        AudioChannel::BackLeftOfCenter,
        AudioChannel::BackRightOfCenter,
    ];

    /// Planar buffer slot of this position.
    #[inline]
    pub fn slot(self) -> usize {
        self as usize
    }

    /// Presence bit of this position, used in the per-stream settings
    /// masks shared with plugins.
    #[inline]
    pub fn presence_bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Layout bit of this position inside a [`ChannelLayout`].
    #[inline]
    pub fn layout_bit(self) -> u64 {
        1 << (self as u64)
    }
}

/// Identifier of an interleaved channel arrangement, one bit per
/// [`AudioChannel`].
///
/// Two buffers with the same `ChannelLayout` interleave their frames the
/// same way. `EMPTY` means "layout not yet observed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelLayout(pub u64);

impl ChannelLayout {
    /// No channels; the undefined/unobserved layout.
    pub const EMPTY: ChannelLayout = ChannelLayout(0);
    /// Front center only.
    pub const MONO: ChannelLayout = ChannelLayout(1 << AudioChannel::FrontCenter as u64);
    /// Front left + front right.
    pub const STEREO: ChannelLayout =
        ChannelLayout(1 << AudioChannel::FrontLeft as u64 | 1 << AudioChannel::FrontRight as u64);
    /// FL, FR, FC, LFE, BL, BR.
    pub const SURROUND_5_1: ChannelLayout = ChannelLayout(
        Self::STEREO.0
            | 1 << AudioChannel::FrontCenter as u64
            | 1 << AudioChannel::Lfe as u64
            | 1 << AudioChannel::BackLeft as u64
            | 1 << AudioChannel::BackRight as u64,
    );
    /// 5.1 plus side left/right.
    pub const SURROUND_7_1: ChannelLayout = ChannelLayout(
        Self::SURROUND_5_1.0
            | 1 << AudioChannel::SideLeft as u64
            | 1 << AudioChannel::SideRight as u64,
    );

    /// Whether the layout carries the given position.
    #[inline]
    pub fn has_channel(self, channel: AudioChannel) -> bool {
        self.0 & channel.layout_bit() != 0
    }

    /// Number of channels in one interleaved frame.
    #[inline]
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Presence mask over all logical positions, as shared with plugins
    /// through the stream settings.
    pub fn presence_flags(self) -> u32 {
        let mut flags = 0;
        for ch in AudioChannel::ALL {
            if self.has_channel(ch) {
                flags |= ch.presence_bit();
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_order_matches_all() {
        for (i, ch) in AudioChannel::ALL.iter().enumerate() {
            assert_eq!(ch.slot(), i);
        }
    }

    #[test]
    fn layout_counts() {
        assert_eq!(ChannelLayout::EMPTY.count(), 0);
        assert_eq!(ChannelLayout::MONO.count(), 1);
        assert_eq!(ChannelLayout::STEREO.count(), 2);
        assert_eq!(ChannelLayout::SURROUND_5_1.count(), 6);
        assert_eq!(ChannelLayout::SURROUND_7_1.count(), 8);
    }

    #[test]
    fn presence_flags_follow_layout() {
        let flags = ChannelLayout::STEREO.presence_flags();
        assert_eq!(
            flags,
            AudioChannel::FrontLeft.presence_bit() | AudioChannel::FrontRight.presence_bit()
        );
        assert!(ChannelLayout::SURROUND_5_1.has_channel(AudioChannel::Lfe));
        assert!(!ChannelLayout::STEREO.has_channel(AudioChannel::Lfe));
    }
}
