//! File-backed preference store
//!
//! JSON adapter over [`StoredPreferences`] for embedders without their
//! own settings database. Writes go to disk on every update; a failed
//! write keeps the in-memory state and is logged, since preference
//! persistence must never fail a running stream.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use sp_core::{BaseType, StreamType};

use crate::error::DspResult;
use crate::mode::ModeId;
use crate::plugin::PluginId;
use crate::ports::{AudioSettingsStore, StoredPreferences};

/// Audio preference store persisted as a JSON file.
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    state: RwLock<StoredPreferences>,
}

impl JsonSettingsStore {
    /// Open the store at `path`, starting empty if the file does not
    /// exist yet.
    pub fn open(path: impl Into<PathBuf>) -> DspResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let data = std::fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            StoredPreferences::default()
        };
        Ok(Self {
            path: path.clone(),
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, state: &StoredPreferences) {
        let result = serde_json::to_vec_pretty(state)
            .map_err(std::io::Error::other)
            .and_then(|data| std::fs::write(&self.path, data));
        if let Err(err) = result {
            log::warn!("failed to persist audio settings to {:?}: {}", self.path, err);
        }
    }
}

impl AudioSettingsStore for JsonSettingsStore {
    fn input_resample_plugin(&self) -> Option<PluginId> {
        self.state.read().input_resample
    }

    fn set_input_resample_plugin(&self, plugin: Option<PluginId>) {
        let mut state = self.state.write();
        state.input_resample = plugin;
        self.save(&state);
    }

    fn output_resample_plugin(&self) -> Option<PluginId> {
        self.state.read().output_resample
    }

    fn set_output_resample_plugin(&self, plugin: Option<PluginId>) {
        let mut state = self.state.write();
        state.output_resample = plugin;
        self.save(&state);
    }

    fn master_mode(&self, stream_type: StreamType, base_type: BaseType) -> ModeId {
        self.state
            .read()
            .master_modes
            .iter()
            .find(|s| s.stream_type == stream_type && s.base_type == base_type)
            .map(|s| s.mode_id)
            .unwrap_or(ModeId::INVALID)
    }

    fn set_master_mode(&self, stream_type: StreamType, base_type: BaseType, mode_id: ModeId) {
        let mut state = self.state.write();
        if let Some(slot) = state
            .master_modes
            .iter_mut()
            .find(|s| s.stream_type == stream_type && s.base_type == base_type)
        {
            slot.mode_id = mode_id;
        } else {
            state.master_modes.push(crate::ports::MasterModeSelection {
                stream_type,
                base_type,
                mode_id,
            });
        }
        self.save(&state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let dir = std::env::temp_dir().join("sp-dsp-store-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("audiosettings.json");
        let _ = std::fs::remove_file(&path);

        {
            let store = JsonSettingsStore::open(&path).unwrap();
            store.set_input_resample_plugin(Some(PluginId(4)));
            store.set_master_mode(StreamType::Movie, BaseType::Ac3, ModeId(11));
        }

        let reopened = JsonSettingsStore::open(&path).unwrap();
        assert_eq!(reopened.input_resample_plugin(), Some(PluginId(4)));
        assert_eq!(
            reopened.master_mode(StreamType::Movie, BaseType::Ac3),
            ModeId(11)
        );
        assert_eq!(reopened.output_resample_plugin(), None);

        let _ = std::fs::remove_file(&path);
    }
}
