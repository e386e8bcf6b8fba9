//! Master-mode descriptors
//!
//! Master processing is a single selectable algorithm per stream,
//! supplied by one of the master-capable plugins. Every stream keeps a
//! registered table of the modes its plugins offer, with a synthetic
//! "passover" entry at index 0 meaning "no master processing".

use serde::{Deserialize, Serialize};

use sp_core::{BaseType, StreamType};

use crate::plugin::PluginId;

/// Globally unique id of a registered master mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModeId(pub i32);

impl ModeId {
    /// No mode / nothing persisted.
    pub const INVALID: ModeId = ModeId(-1);
    /// The reserved sentinel for "no master processing".
    pub const PASSOVER: ModeId = ModeId(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

/// One selectable mode as reported by a plugin.
#[derive(Debug, Clone)]
pub struct AddonMode {
    /// Plugin-local mode number
    pub mode_number: u32,
    /// Human-readable mode name
    pub name: String,
    /// Hidden modes are registered but never selectable
    pub hidden: bool,
    /// Preferred default when nothing is persisted
    pub primary: bool,
    /// Supported stream types, `StreamType::flag` bits; 0 = all
    pub stream_type_flags: u32,
}

/// A registered master mode: an [`AddonMode`] bound to its owning plugin
/// and to the registry-assigned unique id.
#[derive(Debug, Clone)]
pub struct MasterMode {
    /// Registry-assigned unique id
    pub mode_id: ModeId,
    /// Owning plugin
    pub plugin_id: PluginId,
    /// Plugin-local mode number
    pub mode_number: u32,
    pub name: String,
    pub hidden: bool,
    pub primary: bool,
    /// Base type of the stream the mode was registered for
    pub base_type: BaseType,
    /// Supported stream types, `StreamType::flag` bits; 0 = all
    pub stream_type_flags: u32,
}

impl MasterMode {
    /// The synthetic passover entry every stream carries at index 0.
    pub fn passover(base_type: BaseType) -> Self {
        Self {
            mode_id: ModeId::PASSOVER,
            plugin_id: PluginId(-1),
            mode_number: 0,
            name: "passover".to_string(),
            hidden: false,
            primary: false,
            base_type,
            stream_type_flags: 0,
        }
    }

    /// Bind a plugin-reported mode to its registry id.
    pub fn from_addon(
        mode_id: ModeId,
        plugin_id: PluginId,
        base_type: BaseType,
        mode: &AddonMode,
    ) -> Self {
        Self {
            mode_id,
            plugin_id,
            mode_number: mode.mode_number,
            name: mode.name.clone(),
            hidden: mode.hidden,
            primary: mode.primary,
            base_type,
            stream_type_flags: mode.stream_type_flags,
        }
    }

    /// Whether the mode may run for streams of the given type.
    #[inline]
    pub fn supports_stream_type(&self, stream_type: StreamType) -> bool {
        self.stream_type_flags == 0 || self.stream_type_flags & stream_type.flag() != 0
    }
}

/// A staged master-mode transition, applied at the next reinit boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSwitch {
    /// Requested mode; `ModeId::PASSOVER` deactivates master processing
    pub mode_id: ModeId,
    /// Bundled stream-type switch, if any
    pub stream_type: Option<StreamType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passover_accepts_every_stream_type() {
        let mode = MasterMode::passover(BaseType::Stereo);
        assert_eq!(mode.mode_id, ModeId::PASSOVER);
        assert!(mode.supports_stream_type(StreamType::Music));
        assert!(mode.supports_stream_type(StreamType::Movie));
    }

    #[test]
    fn stream_type_flags_filter() {
        let mode = MasterMode {
            stream_type_flags: StreamType::Movie.flag(),
            ..MasterMode::passover(BaseType::Multichannel)
        };
        assert!(mode.supports_stream_type(StreamType::Movie));
        assert!(!mode.supports_stream_type(StreamType::Music));
    }

    #[test]
    fn sentinel_ordering() {
        assert!(!ModeId::INVALID.is_valid());
        assert!(ModeId::PASSOVER.is_valid());
        assert!(ModeId::INVALID < ModeId::PASSOVER);
    }
}
