//! Stream classification
//!
//! Streams carry two orthogonal classifications: the [`StreamType`]
//! (what kind of content is playing, selectable by the user or detected
//! from the played item) and the [`BaseType`] (coarse codec/channel
//! classification derived from the source). Both key the persisted
//! master-mode selection matrix.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one active audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content classification of an audio stream.
///
/// `Game`, `App`, `Phone` and `Message` are reserved for future sources
/// and currently never produced by detection, but remain selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StreamType {
    Invalid = -1,
    /// Resolve from content detection
    Auto = 0,
    Basic = 1,
    Music = 2,
    Movie = 3,
    Game = 4,
    App = 5,
    Phone = 6,
    Message = 7,
}

impl StreamType {
    /// True for the concrete, selectable types (not `Auto`/`Invalid`).
    #[inline]
    pub fn is_concrete(self) -> bool {
        self as i32 >= StreamType::Basic as i32
    }

    /// Bit used in per-mode supported-stream-type masks.
    #[inline]
    pub fn flag(self) -> u32 {
        match self {
            StreamType::Invalid | StreamType::Auto => 0,
            other => 1 << (other as u32),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamType::Basic => "Basic",
            StreamType::Music => "Music",
            StreamType::Movie => "Movie",
            StreamType::Game => "Game",
            StreamType::App => "App",
            StreamType::Phone => "Phone",
            StreamType::Message => "Message",
            StreamType::Auto => "Automatic",
            StreamType::Invalid => "Unknown",
        };
        f.write_str(name)
    }
}

/// Coarse source classification derived from the codec id, falling back
/// to channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseType {
    Mono,
    Stereo,
    Multichannel,
    Ac3,
    Eac3,
    Dts,
    DtsHdHra,
    DtsHdMa,
    TrueHd,
    Mlp,
    Flac,
}

impl BaseType {
    /// Derive the base type from the codec id string, else from the
    /// channel count.
    pub fn from_codec(codec_id: &str, channels: usize) -> BaseType {
        match codec_id {
            "ac3" => BaseType::Ac3,
            "eac3" => BaseType::Eac3,
            // ffmpeg reports DTS under both names
            "dca" | "dts" => BaseType::Dts,
            "dtshd_hra" => BaseType::DtsHdHra,
            "dtshd_ma" => BaseType::DtsHdMa,
            "truehd" => BaseType::TrueHd,
            "mlp" => BaseType::Mlp,
            "flac" => BaseType::Flac,
            _ if channels > 2 => BaseType::Multichannel,
            _ if channels == 2 => BaseType::Stereo,
            _ => BaseType::Mono,
        }
    }
}

/// The played item as seen by the content classifier and the stream
/// negotiator: display metadata of the selected audio stream plus the
/// tag flags content detection keys on.
#[derive(Debug, Clone, Default)]
pub struct MediaItem {
    /// Display name of the audio stream
    pub name: String,
    /// Language tag of the audio stream
    pub language: String,
    /// Codec id as reported by the demuxer ("ac3", "dca", "flac", ...)
    pub codec_id: String,
    /// Item carries a music info tag
    pub has_music_tag: bool,
    /// Item carries video, or the player is showing video
    pub has_video: bool,
}
