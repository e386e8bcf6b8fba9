//! Collaborator ports
//!
//! The engine talks to the rest of the player through four narrow
//! interfaces: channel-offset resolution, content classification,
//! persisted audio preferences and the master-mode registry. Each port
//! ships with an in-process implementation; players with their own
//! database layer substitute theirs.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sp_core::{AudioChannel, BaseType, ChannelLayout, MediaItem, StreamType};

use crate::mode::ModeId;
use crate::plugin::PluginId;

/// Resolves where a logical channel sits inside an interleaved frame of
/// the given layout, or `None` when the layout lacks it.
pub trait ChannelResolver {
    fn channel_index(&self, channel: AudioChannel, layout: ChannelLayout) -> Option<usize>;
}

/// Interleave convention used by the decode side: channels appear in
/// ascending layout-bit order, so a channel's offset is its rank among
/// the set bits below it.
#[derive(Debug, Default)]
pub struct LayoutOrderResolver;

impl ChannelResolver for LayoutOrderResolver {
    fn channel_index(&self, channel: AudioChannel, layout: ChannelLayout) -> Option<usize> {
        if !layout.has_channel(channel) {
            return None;
        }
        let below = layout.0 & (channel.layout_bit() - 1);
        Some(below.count_ones() as usize)
    }
}

/// Classifies what kind of content a played item carries.
pub trait ContentClassifier: Send + Sync {
    fn detect_stream_type(&self, item: &MediaItem) -> StreamType;
}

/// Tag-based detection: music info tag wins over video, everything else
/// is basic.
#[derive(Debug, Default)]
pub struct TagClassifier;

impl ContentClassifier for TagClassifier {
    fn detect_stream_type(&self, item: &MediaItem) -> StreamType {
        if item.has_music_tag {
            StreamType::Music
        } else if item.has_video {
            StreamType::Movie
        } else {
            StreamType::Basic
        }
    }
}

/// One persisted master-mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterModeSelection {
    pub stream_type: StreamType,
    pub base_type: BaseType,
    pub mode_id: ModeId,
}

/// The persisted audio preference set the negotiator reads and writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredPreferences {
    /// Preselected input-resample plugin, if any
    pub input_resample: Option<PluginId>,
    /// Preselected output-resample plugin, if any
    pub output_resample: Option<PluginId>,
    /// Selected master mode per (stream type, base type)
    pub master_modes: Vec<MasterModeSelection>,
}

impl StoredPreferences {
    fn master_mode(&self, stream_type: StreamType, base_type: BaseType) -> ModeId {
        self.master_modes
            .iter()
            .find(|s| s.stream_type == stream_type && s.base_type == base_type)
            .map(|s| s.mode_id)
            .unwrap_or(ModeId::INVALID)
    }

    fn set_master_mode(&mut self, stream_type: StreamType, base_type: BaseType, mode_id: ModeId) {
        if let Some(slot) = self
            .master_modes
            .iter_mut()
            .find(|s| s.stream_type == stream_type && s.base_type == base_type)
        {
            slot.mode_id = mode_id;
        } else {
            self.master_modes.push(MasterModeSelection {
                stream_type,
                base_type,
                mode_id,
            });
        }
    }
}

/// Persisted user preferences consulted during negotiation.
///
/// Read/modify/write; implementations serialize their own updates.
/// Concurrent streams still race whole read-modify-write cycles
/// (last writer wins), as the player settings layer always has.
pub trait AudioSettingsStore: Send + Sync {
    fn input_resample_plugin(&self) -> Option<PluginId>;
    fn set_input_resample_plugin(&self, plugin: Option<PluginId>);
    fn output_resample_plugin(&self) -> Option<PluginId>;
    fn set_output_resample_plugin(&self, plugin: Option<PluginId>);
    fn master_mode(&self, stream_type: StreamType, base_type: BaseType) -> ModeId;
    fn set_master_mode(&self, stream_type: StreamType, base_type: BaseType, mode_id: ModeId);
}

/// In-memory preference store; the default for tests and embedders
/// without persistence.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    state: RwLock<StoredPreferences>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferences(preferences: StoredPreferences) -> Self {
        Self {
            state: RwLock::new(preferences),
        }
    }

    /// Snapshot of the current preference set.
    pub fn snapshot(&self) -> StoredPreferences {
        self.state.read().clone()
    }
}

impl AudioSettingsStore for MemorySettingsStore {
    fn input_resample_plugin(&self) -> Option<PluginId> {
        self.state.read().input_resample
    }

    fn set_input_resample_plugin(&self, plugin: Option<PluginId>) {
        self.state.write().input_resample = plugin;
    }

    fn output_resample_plugin(&self) -> Option<PluginId> {
        self.state.read().output_resample
    }

    fn set_output_resample_plugin(&self, plugin: Option<PluginId>) {
        self.state.write().output_resample = plugin;
    }

    fn master_mode(&self, stream_type: StreamType, base_type: BaseType) -> ModeId {
        self.state.read().master_mode(stream_type, base_type)
    }

    fn set_master_mode(&self, stream_type: StreamType, base_type: BaseType, mode_id: ModeId) {
        self.state.write().set_master_mode(stream_type, base_type, mode_id)
    }
}

/// Registry of master modes across streams.
///
/// Assigns every (plugin, mode number) pair a globally unique id above
/// the passover sentinel and keeps last-used bookkeeping: re-registering
/// an existing pair refreshes it and returns the same id.
pub trait ModeRegistry: Send + Sync {
    fn add_update(&self, plugin: PluginId, mode_number: u32, name: &str) -> ModeId;
}

#[derive(Debug, Default)]
struct ModeRegistryState {
    ids: HashMap<(PluginId, u32), ModeId>,
    use_counts: HashMap<ModeId, u64>,
    next_id: i32,
}

/// In-memory mode registry.
#[derive(Debug)]
pub struct MemoryModeRegistry {
    state: RwLock<ModeRegistryState>,
}

impl MemoryModeRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ModeRegistryState {
                ids: HashMap::new(),
                use_counts: HashMap::new(),
                next_id: ModeId::PASSOVER.0 + 1,
            }),
        }
    }

    /// How often a mode was registered or refreshed.
    pub fn use_count(&self, mode_id: ModeId) -> u64 {
        self.state.read().use_counts.get(&mode_id).copied().unwrap_or(0)
    }
}

impl Default for MemoryModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeRegistry for MemoryModeRegistry {
    fn add_update(&self, plugin: PluginId, mode_number: u32, _name: &str) -> ModeId {
        let mut state = self.state.write();
        let id = match state.ids.get(&(plugin, mode_number)).copied() {
            Some(id) => id,
            None => {
                let id = ModeId(state.next_id);
                state.next_id += 1;
                state.ids.insert((plugin, mode_number), id);
                id
            }
        };
        *state.use_counts.entry(id).or_insert(0) += 1;
        id
    }
}
