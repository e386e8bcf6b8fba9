//! Per-stream DSP process engine
//!
//! One [`StreamProcess`] exists per active audio stream. At creation it
//! negotiates which of the enabled plugins take part in the pipeline and
//! in which role; per block it deinterleaves the input, runs
//! pre-process -> input resample -> master process -> post-process ->
//! output resample over planar stage buffers, and reinterleaves the
//! result.
//!
//! Threading follows the player engine contract: the audio thread calls
//! [`StreamProcess::process`] and [`StreamProcess::delay_seconds`];
//! control threads request mode changes or reinitialization, which are
//! staged and consumed at the top of the next block. The `state` mutex
//! is the restart/configuration lock; the `modes` RwLock guards the
//! read-mostly mode table used by menu/UI threads and is only ever held
//! for metadata copies. Lock order is always `state` before `modes`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use sp_core::{
    AudioChannel, AudioFormat, BaseType, CHANNEL_COUNT, ChannelLayout, MediaItem, ProcessQuality,
    SampleBuffer, StreamId, StreamType,
};

use crate::buffer::PlanarBuffer;
use crate::error::{DspError, DspResult};
use crate::mode::{MasterMode, ModeId, ModeSwitch};
use crate::plugin::{DspPlugin, PluginId, PluginStatus};
use crate::ports::{AudioSettingsStore, ChannelResolver, ContentClassifier, ModeRegistry};
use crate::settings::{StreamProperties, StreamSettings};

/// Stage buffer slots inside [`EngineState::buffers`].
const BUF_INPUT: usize = 0;
const BUF_INPUT_RESAMPLE: usize = 1;
const BUF_MASTER: usize = 2;
const BUF_POST_A: usize = 3;
const BUF_POST_B: usize = 4;
const BUF_OUTPUT_RESAMPLE: usize = 5;
const STAGE_BUFFERS: usize = 6;

type PluginRef = Arc<dyn DspPlugin>;
type PluginChain = SmallVec<[PluginRef; 4]>;

/// Everything the audio thread reads and writes while running a block.
/// Guarded by the restart lock.
struct EngineState {
    input_format: AudioFormat,
    output_format: AudioFormat,
    /// Rate the pipeline delivers to the sink; input rate until a
    /// resampler overrides it
    output_sample_rate: u32,
    stream_type: StreamType,
    stream_type_detected: StreamType,
    stream_type_asked: StreamType,
    properties: StreamProperties,
    settings: StreamSettings,
    /// Full reinitialization requested; consumed at the next block
    force_init: bool,
    /// Staged master-mode transition; applied at the next reinit
    pending: Option<ModeSwitch>,
    /// Plugins that accepted this stream, keyed by id
    active: BTreeMap<PluginId, PluginRef>,
    pre: PluginChain,
    post: PluginChain,
    input_resample: Option<PluginRef>,
    master: Option<PluginRef>,
    output_resample: Option<PluginRef>,
    /// Cached interleaved layout identifiers; index tables are
    /// recomputed when the observed layout differs
    layout_in: ChannelLayout,
    layout_out: ChannelLayout,
    idx_in: [Option<usize>; CHANNEL_COUNT],
    idx_out: [Option<usize>; CHANNEL_COUNT],
    buffers: [PlanarBuffer; STAGE_BUFFERS],
    /// Which of the two post buffers the next post stage writes
    post_toggle: usize,
}

/// Master-mode table shared with UI threads.
#[derive(Default)]
struct ModeTable {
    /// Registered modes; index 0 is always the synthetic passover entry
    modes: Vec<MasterMode>,
    /// Index of the active mode; 0 = passover
    active: usize,
}

impl ModeTable {
    fn reset(&mut self) {
        self.modes.clear();
        self.active = 0;
    }

    fn active_mode(&self) -> Option<&MasterMode> {
        self.modes.get(self.active)
    }
}

/// The per-stream DSP pipeline.
pub struct StreamProcess {
    stream_id: StreamId,
    /// Globally enabled plugins, in enablement order
    enabled: Vec<PluginRef>,
    settings_store: Arc<dyn AudioSettingsStore>,
    mode_registry: Arc<dyn ModeRegistry>,
    classifier: Arc<dyn ContentClassifier>,
    /// Restart/configuration lock; every processing-path field lives
    /// behind it
    state: Mutex<EngineState>,
    /// Read-mostly mode metadata for menu/UI threads
    modes: RwLock<ModeTable>,
}

impl StreamProcess {
    pub fn new(
        stream_id: StreamId,
        enabled: Vec<PluginRef>,
        settings_store: Arc<dyn AudioSettingsStore>,
        mode_registry: Arc<dyn ModeRegistry>,
        classifier: Arc<dyn ContentClassifier>,
    ) -> Self {
        Self {
            stream_id,
            enabled,
            settings_store,
            mode_registry,
            classifier,
            state: Mutex::new(EngineState {
                input_format: AudioFormat::new(0, ChannelLayout::EMPTY, 0),
                output_format: AudioFormat::new(0, ChannelLayout::EMPTY, 0),
                output_sample_rate: 0,
                stream_type: StreamType::Invalid,
                stream_type_detected: StreamType::Invalid,
                stream_type_asked: StreamType::Invalid,
                properties: StreamProperties::default(),
                settings: StreamSettings::default(),
                force_init: false,
                pending: None,
                active: BTreeMap::new(),
                pre: SmallVec::new(),
                post: SmallVec::new(),
                input_resample: None,
                master: None,
                output_resample: None,
                layout_in: ChannelLayout::EMPTY,
                layout_out: ChannelLayout::EMPTY,
                idx_in: [None; CHANNEL_COUNT],
                idx_out: [None; CHANNEL_COUNT],
                buffers: std::array::from_fn(|_| PlanarBuffer::new()),
                post_toggle: 0,
            }),
            modes: RwLock::new(ModeTable::default()),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    // -- negotiation -----------------------------------------------------

    /// Negotiate the pipeline for a new stream.
    ///
    /// Asks every enabled plugin whether it accepts the stream, fills
    /// the five role slots, registers and selects the master mode, and
    /// records the stage formats. Fails only when no plugin at all
    /// accepts the stream; every per-plugin problem degrades to a
    /// missing stage instead.
    pub fn create(
        &self,
        input_format: AudioFormat,
        output_format: AudioFormat,
        upmix: bool,
        quality: ProcessQuality,
        requested_type: StreamType,
        item: &MediaItem,
    ) -> DspResult<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;

        log::debug!("dsp process {}: creating", self.stream_id);

        self.reset_selection_locked(st);

        st.input_format = input_format;
        st.output_format = output_format;
        st.output_sample_rate = input_format.sample_rate;
        st.force_init = false;

        st.stream_type_detected = self.classifier.detect_stream_type(item);
        st.stream_type_asked = requested_type;
        st.stream_type = resolve_stream_type(requested_type, st.stream_type_detected);

        let in_channels = input_format.channel_layout.count();
        let name = if item.name.is_empty() {
            "Unknown".to_string()
        } else {
            item.name.clone()
        };
        st.properties = StreamProperties {
            stream_id: self.stream_id,
            stream_type: st.stream_type,
            base_type: BaseType::from_codec(&item.codec_id, in_channels),
            identifier: self.stream_id.0,
            name,
            language: item.language.clone(),
            codec_id: item.codec_id.clone(),
            channels: in_channels,
            sample_rate: input_format.sample_rate,
        };

        st.settings = StreamSettings {
            stream_id: self.stream_id,
            stream_type: st.stream_type,
            in_channel_present_flags: input_format.channel_layout.presence_flags(),
            in_channels,
            in_frames: input_format.frames,
            in_sample_rate: input_format.sample_rate,
            process_frames: input_format.frames,
            process_sample_rate: input_format.sample_rate,
            out_channel_present_flags: output_format.channel_layout.presence_flags(),
            out_channels: output_format.channel_layout.count(),
            out_frames: output_format.frames,
            out_sample_rate: output_format.sample_rate,
            stereo_upmix: upmix,
            input_resampling_active: false,
            quality,
        };

        self.select_input_resampler_locked(st);
        self.accept_remaining_plugins_locked(st);

        if st.active.is_empty() {
            log::error!("dsp process {}: no usable plugins present", self.stream_id);
            return Err(DspError::NoUsablePlugins);
        }

        // Pre-process chain: every accepted plugin with the capability.
        for plugin in st.active.values() {
            if plugin.supports_pre_process() {
                log::debug!("dsp process {}: pre process '{}'", self.stream_id, plugin.name());
                st.pre.push(plugin.clone());
            }
        }

        self.collect_master_modes_locked(st);
        self.select_master_mode_locked(st);

        // Post-process chain.
        for plugin in st.active.values() {
            if plugin.supports_post_process() {
                log::debug!("dsp process {}: post process '{}'", self.stream_id, plugin.name());
                st.post.push(plugin.clone());
            }
        }

        self.select_output_resampler_locked(st);

        log::debug!(
            "dsp process {}: stream type {} ({}), base type {:?}, {} Hz in / {} Hz process / {} Hz out",
            self.stream_id,
            st.properties.stream_type,
            st.properties.name,
            st.properties.base_type,
            st.settings.in_sample_rate,
            st.settings.process_sample_rate,
            st.settings.out_sample_rate,
        );

        st.force_init = true;
        Ok(())
    }

    /// At most one input resampler: first enabled plugin with the
    /// capability that accepts the stream and matches the persisted
    /// preference, if any. A valid target rate re-bases the process
    /// stage; an invalid one clears the preference and leaves the role
    /// unfilled.
    fn select_input_resampler_locked(&self, st: &mut EngineState) {
        let preselected = self.settings_store.input_resample_plugin();
        for plugin in &self.enabled {
            if !plugin.supports_input_resample() {
                continue;
            }
            if preselected.is_some_and(|id| id != plugin.id()) {
                continue;
            }
            let status = plugin.stream_create(&st.settings, &st.properties);
            if status == PluginStatus::IgnoreMe {
                continue;
            }
            if !status.is_ok() {
                log::error!(
                    "dsp process {}: input resample creation failed on '{}' with {}",
                    self.stream_id,
                    plugin.name(),
                    status
                );
                continue;
            }

            let process_rate = plugin.input_resample_rate(self.stream_id);
            if process_rate == 0 {
                log::error!(
                    "dsp process {}: input resampler '{}' returned an invalid samplerate and becomes disabled",
                    self.stream_id,
                    plugin.name()
                );
                self.settings_store.set_input_resample_plugin(None);
                break;
            }

            log::debug!(
                "dsp process {}: input resample '{}' from {} to {} Hz",
                self.stream_id,
                plugin.name(),
                st.settings.in_sample_rate,
                process_rate
            );

            st.output_sample_rate = process_rate;
            st.settings.process_sample_rate = process_rate;
            st.settings.process_frames = scaled_frames(
                process_rate,
                st.settings.in_sample_rate,
                st.settings.in_frames,
            );
            st.settings.input_resampling_active = true;
            st.active.insert(plugin.id(), plugin.clone());
            st.input_resample = Some(plugin.clone());
            self.settings_store.set_input_resample_plugin(Some(plugin.id()));
            break;
        }
        if st.input_resample.is_none() {
            log::debug!(
                "dsp process {}: no input resample plugin present or enabled",
                self.stream_id
            );
        }
    }

    /// Offer the stream to every remaining enabled plugin; `IgnoreMe`
    /// skips silently, anything else failing is logged and skipped.
    fn accept_remaining_plugins_locked(&self, st: &mut EngineState) {
        let resampler = st.input_resample.as_ref().map(|p| p.id());
        for plugin in &self.enabled {
            if resampler == Some(plugin.id()) {
                continue;
            }
            match plugin.stream_create(&st.settings, &st.properties) {
                PluginStatus::NoError => {
                    st.active.insert(plugin.id(), plugin.clone());
                }
                PluginStatus::IgnoreMe => {}
                status => {
                    log::error!(
                        "dsp process {}: creation failed on '{}' with {}",
                        self.stream_id,
                        plugin.name(),
                        status
                    );
                }
            }
        }
    }

    /// Query every master-capable plugin for its modes, register each in
    /// the mode registry and append the accepted ones to the table. The
    /// synthetic passover entry is inserted first.
    fn collect_master_modes_locked(&self, st: &mut EngineState) {
        let mut table = self.modes.write();
        table.reset();
        table.modes.push(MasterMode::passover(st.properties.base_type));

        for plugin in st.active.values() {
            if !plugin.supports_master_process() {
                continue;
            }
            match plugin.master_process_modes(self.stream_id) {
                Ok(addon_modes) => {
                    log::debug!(
                        "dsp process {}: '{}' offers {} master modes",
                        self.stream_id,
                        plugin.name(),
                        addon_modes.len()
                    );
                    for addon_mode in &addon_modes {
                        let mode_id = self.mode_registry.add_update(
                            plugin.id(),
                            addon_mode.mode_number,
                            &addon_mode.name,
                        );
                        if mode_id > ModeId::PASSOVER {
                            table.modes.push(MasterMode::from_addon(
                                mode_id,
                                plugin.id(),
                                st.properties.base_type,
                                addon_mode,
                            ));
                        } else {
                            log::error!(
                                "dsp process {}: registration of master mode '{}' from '{}' failed",
                                self.stream_id,
                                addon_mode.name,
                                plugin.name()
                            );
                        }
                    }
                }
                Err(PluginStatus::IgnoreMe) => {}
                Err(status) => {
                    log::error!(
                        "dsp process {}: master mode query failed on '{}' with {}",
                        self.stream_id,
                        plugin.name(),
                        status
                    );
                }
            }
        }
    }

    /// Pick the active master mode from the persisted matrix, falling
    /// back to the first primary mode, and tell the owning plugin. Any
    /// refusal or fault keeps master processing off without failing the
    /// negotiation.
    fn select_master_mode_locked(&self, st: &mut EngineState) {
        let persisted = self
            .settings_store
            .master_mode(st.properties.stream_type, st.properties.base_type);

        let mut selected: Option<(usize, MasterMode)> = None;
        {
            let table = self.modes.read();
            for (index, mode) in table.modes.iter().enumerate() {
                if mode.hidden || mode.mode_id == ModeId::PASSOVER {
                    continue;
                }
                if mode.primary && persisted == ModeId::INVALID {
                    self.settings_store.set_master_mode(
                        st.properties.stream_type,
                        st.properties.base_type,
                        mode.mode_id,
                    );
                    log::debug!(
                        "dsp process {}: master mode '{}' (as default)",
                        self.stream_id,
                        mode.name
                    );
                    selected = Some((index, mode.clone()));
                    break;
                }
                if mode.mode_id == persisted {
                    log::debug!(
                        "dsp process {}: master mode '{}' (selected)",
                        self.stream_id,
                        mode.name
                    );
                    selected = Some((index, mode.clone()));
                    break;
                }
            }
        }

        let Some((index, mode)) = selected else {
            log::debug!("dsp process {}: no master process selected", self.stream_id);
            return;
        };
        let Some(plugin) = st.active.get(&mode.plugin_id).cloned() else {
            return;
        };

        match plugin.master_process_set_mode(
            self.stream_id,
            st.properties.stream_type,
            mode.mode_number,
            mode.mode_id,
        ) {
            Ok(response) if response.status.is_ok() => {
                st.properties.stream_type = response.stream_type;
                st.master = Some(plugin);
                self.modes.write().active = index;
            }
            Ok(response) => {
                log::error!(
                    "dsp process {}: master mode selection failed on '{}' mode '{}' with {}",
                    self.stream_id,
                    plugin.name(),
                    mode.name,
                    response.status
                );
            }
            Err(fault) => {
                log::error!(
                    "dsp process {}: {} while selecting master mode on '{}'",
                    self.stream_id,
                    fault,
                    plugin.name()
                );
            }
        }
    }

    /// At most one output resampler, only when the process rate differs
    /// from the requested output rate. The scan stops at the first
    /// capability-and-preference match whether or not its reported rate
    /// is usable; an unusable rate clears the preference and leaves the
    /// role unfilled for this stream generation.
    fn select_output_resampler_locked(&self, st: &mut EngineState) {
        if st.settings.process_sample_rate == st.output_format.sample_rate {
            log::debug!(
                "dsp process {}: no final resampling needed, process and output samplerate equal",
                self.stream_id
            );
            return;
        }
        let preselected = self.settings_store.output_resample_plugin();
        // First capability-and-preference match ends the scan, usable
        // rate or not.
        let candidate = st
            .active
            .values()
            .find(|plugin| {
                plugin.supports_output_resample()
                    && !preselected.is_some_and(|id| id != plugin.id())
            })
            .cloned();
        if let Some(plugin) = candidate {
            let out_rate = plugin.output_resample_rate(self.stream_id);
            if out_rate > 0 {
                log::debug!(
                    "dsp process {}: output resample '{}' to {} Hz",
                    self.stream_id,
                    plugin.name(),
                    out_rate
                );
                self.settings_store.set_output_resample_plugin(Some(plugin.id()));
                st.output_resample = Some(plugin.clone());
                st.output_sample_rate = out_rate;
            } else {
                log::error!(
                    "dsp process {}: output resampler '{}' returned an invalid samplerate and becomes disabled",
                    self.stream_id,
                    plugin.name()
                );
                self.settings_store.set_output_resample_plugin(None);
            }
        }
        if st.output_resample.is_none() {
            log::debug!(
                "dsp process {}: no output resample plugin present or enabled",
                self.stream_id
            );
        }
    }

    fn reset_selection_locked(&self, st: &mut EngineState) {
        self.destroy_locked(st);
        st.pending = None;
        st.input_resample = None;
        st.master = None;
        st.output_resample = None;
        st.pre.clear();
        st.post.clear();
        st.active.clear();
    }

    fn destroy_locked(&self, st: &EngineState) {
        self.modes.write().reset();
        for plugin in st.active.values() {
            plugin.stream_destroy(self.stream_id);
        }
    }

    /// Tear down the stream: drop all registered modes and tell every
    /// accepted plugin. Safe to call even if processing never started.
    pub fn destroy(&self) {
        let st = self.state.lock();
        self.destroy_locked(&st);
    }

    /// Request a full pipeline reinitialization at the next block.
    pub fn force_reinit(&self) {
        self.state.lock().force_init = true;
    }

    // -- master-mode state machine ---------------------------------------

    /// Request a master-mode change, optionally bundled with a
    /// stream-type switch.
    ///
    /// Requesting the already active mode with no type switch is a
    /// no-op. Anything else is staged and applied at the next block
    /// boundary, never mid-block.
    pub fn request_master_mode(&self, mode_id: ModeId, stream_type: Option<StreamType>) -> bool {
        let mut st = self.state.lock();
        {
            let table = self.modes.read();
            if stream_type.is_none()
                && table.active_mode().is_some_and(|mode| mode.mode_id == mode_id)
            {
                return true;
            }
        }
        st.pending = Some(ModeSwitch { mode_id, stream_type });
        st.force_init = true;
        true
    }

    /// Apply a staged transition. Passover always succeeds and switches
    /// master processing off; otherwise the mode must be registered and
    /// visible, and the owning plugin must accept it — on any error or
    /// fault the previous state stays in place.
    fn master_mode_change_locked(
        &self,
        st: &mut EngineState,
        mode_id: ModeId,
        switch_type: Option<StreamType>,
    ) -> bool {
        log::debug!("dsp process {}: master mode change", self.stream_id);

        if let Some(requested) = switch_type {
            if requested != st.stream_type {
                let old = st.stream_type;
                st.stream_type = resolve_stream_type(requested, st.stream_type_detected);
                log::debug!(
                    "dsp process {}: stream type change from '{}' to '{}'",
                    self.stream_id,
                    old,
                    st.stream_type
                );
            }
        }

        // The plugin observes the new type at selection time; it may
        // answer with another one.
        st.properties.stream_type = st.stream_type;
        st.settings.stream_type = st.stream_type;

        if mode_id == ModeId::PASSOVER {
            log::info!("dsp process {}: switching master mode off", self.stream_id);
            st.master = None;
            self.modes.write().active = 0;
            return true;
        }

        let found = {
            let table = self.modes.read();
            table
                .modes
                .iter()
                .enumerate()
                .find(|(_, mode)| mode.mode_id == mode_id && !mode.hidden)
                .map(|(index, mode)| (index, mode.clone()))
        };
        let Some((index, mode)) = found else {
            return false;
        };
        let Some(plugin) = st.active.get(&mode.plugin_id).cloned() else {
            log::error!(
                "dsp process {}: master mode '{}' belongs to an unavailable plugin",
                self.stream_id,
                mode.name
            );
            return false;
        };

        match plugin.master_process_set_mode(
            self.stream_id,
            st.properties.stream_type,
            mode.mode_number,
            mode.mode_id,
        ) {
            Ok(response) if response.status.is_ok() => {
                {
                    let mut table = self.modes.write();
                    // Demote the previous mode: refresh its last-used
                    // bookkeeping in the registry.
                    if table.active > 0
                        && let Some(old) = table.modes.get(table.active)
                    {
                        self.mode_registry
                            .add_update(old.plugin_id, old.mode_number, &old.name);
                    }
                    table.active = index;
                }
                log::info!(
                    "dsp process {}: switching master mode to '{}' as '{}' on '{}'",
                    self.stream_id,
                    mode.name,
                    st.properties.stream_type,
                    plugin.name()
                );
                if response.stream_type != st.stream_type {
                    log::debug!(
                        "dsp process {}: plugin forces stream type from '{}' to '{}'",
                        self.stream_id,
                        st.stream_type,
                        response.stream_type
                    );
                    st.properties.stream_type = response.stream_type;
                }
                st.master = Some(plugin);
                true
            }
            Ok(response) => {
                log::error!(
                    "dsp process {}: master mode selection failed on '{}' mode '{}' with {}",
                    self.stream_id,
                    plugin.name(),
                    mode.name,
                    response.status
                );
                false
            }
            Err(fault) => {
                log::error!(
                    "dsp process {}: {} while switching master mode on '{}'",
                    self.stream_id,
                    fault,
                    plugin.name()
                );
                false
            }
        }
    }

    // -- block processing ------------------------------------------------

    /// Process one block of frames.
    ///
    /// `output.data` must hold room for the produced frame count times
    /// the output channel count; the engine writes only the channels
    /// present in the output layout and leaves the rest of the buffer
    /// untouched (callers wanting silence on unmapped channels pre-zero
    /// it). The produced frame count is written to `output.frames`.
    ///
    /// Returns `false` when a stage fails the block; the caller decides
    /// between emitting silence and recreating the stream.
    pub fn process(
        &self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        resolver: &dyn ChannelResolver,
    ) -> bool {
        let mut guard = self.state.lock();
        let st = &mut *guard;

        let mut needs_reinit = st.force_init;

        if st.layout_in != input.layout {
            st.layout_in = input.layout;
            for ch in AudioChannel::ALL {
                st.idx_in[ch.slot()] = resolver.channel_index(ch, input.layout);
            }
            needs_reinit = true;
        }
        if st.layout_out != output.layout {
            st.layout_out = output.layout;
            for ch in AudioChannel::ALL {
                st.idx_out[ch.slot()] = resolver.channel_index(ch, output.layout);
            }
            needs_reinit = true;
        }

        if needs_reinit {
            self.reinitialize_locked(st, input, output);
        }

        let frames_in = input.frames;
        st.buffers[BUF_INPUT].ensure_frames(frames_in);

        // Deinterleave: every present channel into its planar slot,
        // absent channels as silence.
        for ch in AudioChannel::ALL {
            let offset = st.idx_in[ch.slot()];
            let plane = st.buffers[BUF_INPUT].channel_mut(ch);
            match offset {
                Some(offset) => {
                    for (frame, sample) in input
                        .data
                        .chunks_exact(input.channels)
                        .zip(plane.iter_mut())
                        .take(frames_in)
                    {
                        *sample = frame[offset];
                    }
                }
                None => plane[..frames_in].fill(0.0),
            }
        }

        let mut last = BUF_INPUT;
        let mut frames = frames_in;

        // Pre processing, in place. A plugin reporting failure fails
        // the block; a faulting plugin is dropped from the chain and the
        // block continues.
        let mut i = 0;
        while i < st.pre.len() {
            let plugin = st.pre[i].clone();
            match plugin.pre_process(self.stream_id, &mut st.buffers[last], frames) {
                Ok(true) => i += 1,
                Ok(false) => {
                    log::error!(
                        "dsp process {}: pre process failed on '{}'",
                        self.stream_id,
                        plugin.name()
                    );
                    return false;
                }
                Err(fault) => {
                    log::error!(
                        "dsp process {}: {} in pre process of '{}', plugin removed",
                        self.stream_id,
                        fault,
                        plugin.name()
                    );
                    st.pre.remove(i);
                }
            }
        }

        // Input resample.
        if let Some(plugin) = st.input_resample.clone() {
            let step = (|| {
                let needed = plugin.input_resample_needed_frames(self.stream_id)?;
                st.buffers[BUF_INPUT_RESAMPLE].ensure_frames(needed);
                let (src, dst) = stage_pair(&mut st.buffers, last, BUF_INPUT_RESAMPLE);
                plugin.input_resample_process(self.stream_id, src, dst, frames)
            })();
            match step {
                Ok(0) => return false,
                Ok(produced) => {
                    frames = produced;
                    last = BUF_INPUT_RESAMPLE;
                }
                Err(fault) => {
                    log::error!(
                        "dsp process {}: {} in input resample of '{}', stage disabled",
                        self.stream_id,
                        fault,
                        plugin.name()
                    );
                    st.input_resample = None;
                }
            }
        }

        // Master processing.
        if let Some(plugin) = st.master.clone() {
            let step = (|| {
                let needed = plugin.master_needed_frames(self.stream_id)?;
                st.buffers[BUF_MASTER].ensure_frames(needed);
                let (src, dst) = stage_pair(&mut st.buffers, last, BUF_MASTER);
                plugin.master_process(self.stream_id, src, dst, frames)
            })();
            match step {
                Ok(0) => return false,
                Ok(produced) => {
                    frames = produced;
                    last = BUF_MASTER;
                }
                Err(fault) => {
                    log::error!(
                        "dsp process {}: {} in master process of '{}', stage disabled",
                        self.stream_id,
                        fault,
                        plugin.name()
                    );
                    st.master = None;
                }
            }
        }

        // Post processing; outputs ping-pong between the two post
        // buffers so a plugin never reads the buffer it writes.
        let mut i = 0;
        while i < st.post.len() {
            let plugin = st.post[i].clone();
            let dst = BUF_POST_A + st.post_toggle;
            let step = (|| {
                let needed = plugin.post_needed_frames(self.stream_id)?;
                st.buffers[BUF_POST_A].ensure_frames(needed);
                st.buffers[BUF_POST_B].ensure_frames(needed);
                let (src, dst) = stage_pair(&mut st.buffers, last, dst);
                plugin.post_process(self.stream_id, src, dst, frames)
            })();
            match step {
                Ok(0) => return false,
                Ok(produced) => {
                    frames = produced;
                    last = dst;
                    st.post_toggle ^= 1;
                    i += 1;
                }
                Err(fault) => {
                    log::error!(
                        "dsp process {}: {} in post process of '{}', plugin removed",
                        self.stream_id,
                        fault,
                        plugin.name()
                    );
                    st.post.remove(i);
                }
            }
        }

        // Output resample.
        if let Some(plugin) = st.output_resample.clone() {
            let step = (|| {
                let needed = plugin.output_resample_needed_frames(self.stream_id)?;
                st.buffers[BUF_OUTPUT_RESAMPLE].ensure_frames(needed);
                let (src, dst) = stage_pair(&mut st.buffers, last, BUF_OUTPUT_RESAMPLE);
                plugin.output_resample_process(self.stream_id, src, dst, frames)
            })();
            match step {
                Ok(0) => return false,
                Ok(produced) => {
                    frames = produced;
                    last = BUF_OUTPUT_RESAMPLE;
                }
                Err(fault) => {
                    log::error!(
                        "dsp process {}: {} in output resample of '{}', stage disabled",
                        self.stream_id,
                        fault,
                        plugin.name()
                    );
                    st.output_resample = None;
                }
            }
        }

        // Reinterleave the channels present in the output layout; absent
        // destination channels stay untouched.
        for ch in AudioChannel::ALL {
            if let Some(offset) = st.idx_out[ch.slot()] {
                let plane = st.buffers[last].channel(ch);
                for (frame, sample) in output
                    .data
                    .chunks_exact_mut(output.channels)
                    .zip(plane.iter())
                    .take(frames)
                {
                    frame[offset] = *sample;
                }
            }
        }
        output.frames = frames;

        true
    }

    /// Full pipeline reinitialization, run at the top of a block when
    /// the layout changed or a reinit was requested.
    fn reinitialize_locked(
        &self,
        st: &mut EngineState,
        input: &SampleBuffer,
        output: &SampleBuffer,
    ) {
        st.settings.in_channel_present_flags = presence_from_indices(&st.idx_in);
        st.settings.out_channel_present_flags = presence_from_indices(&st.idx_out);

        // Stage buffers in use are scratch again from here.
        st.buffers[BUF_INPUT].clear();
        if st.input_resample.is_some() {
            st.buffers[BUF_INPUT_RESAMPLE].clear();
        }
        if st.master.is_some() {
            st.buffers[BUF_MASTER].clear();
        }
        if !st.post.is_empty() {
            st.buffers[BUF_POST_A].clear();
            st.buffers[BUF_POST_B].clear();
        }
        if st.output_resample.is_some() {
            st.buffers[BUF_OUTPUT_RESAMPLE].clear();
        }

        st.settings.stream_id = self.stream_id;
        st.settings.in_channels = input.channels;
        st.settings.out_channels = output.channels;
        st.settings.in_sample_rate = input.sample_rate;
        st.settings.process_sample_rate = match &st.input_resample {
            Some(plugin) => plugin.input_resample_rate(self.stream_id),
            None => st.settings.in_sample_rate,
        };
        st.settings.out_sample_rate = match &st.output_resample {
            Some(plugin) => plugin.output_resample_rate(self.stream_id),
            None => st.settings.process_sample_rate,
        };

        if let Some(switch) = st.pending.take()
            && switch.mode_id.is_valid()
        {
            self.master_mode_change_locked(st, switch.mode_id, switch.stream_type);
        }

        for plugin in st.active.values() {
            let status = plugin.stream_initialize(&st.settings);
            if !status.is_ok() {
                log::error!(
                    "dsp process {}: initialize failed on '{}' with {}",
                    self.stream_id,
                    plugin.name(),
                    status
                );
            }
        }

        st.force_init = false;
    }

    /// Cumulative delay of all active stages in seconds.
    ///
    /// A stage whose delay query faults is disabled permanently, exactly
    /// like a processing fault, and contributes zero.
    pub fn delay_seconds(&self) -> f64 {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let mut delay = 0.0;

        if let Some(plugin) = st.input_resample.clone() {
            match plugin.input_resample_delay(self.stream_id) {
                Ok(seconds) => delay += seconds,
                Err(fault) => {
                    log::error!(
                        "dsp process {}: {} in input resample delay of '{}', stage disabled",
                        self.stream_id,
                        fault,
                        plugin.name()
                    );
                    st.input_resample = None;
                }
            }
        }

        if let Some(plugin) = st.master.clone() {
            match plugin.master_delay(self.stream_id) {
                Ok(seconds) => delay += seconds,
                Err(fault) => {
                    log::error!(
                        "dsp process {}: {} in master delay of '{}', stage disabled",
                        self.stream_id,
                        fault,
                        plugin.name()
                    );
                    st.master = None;
                }
            }
        }

        let mut i = 0;
        while i < st.post.len() {
            let plugin = st.post[i].clone();
            match plugin.post_delay(self.stream_id) {
                Ok(seconds) => {
                    delay += seconds;
                    i += 1;
                }
                Err(fault) => {
                    log::error!(
                        "dsp process {}: {} in post delay of '{}', plugin removed",
                        self.stream_id,
                        fault,
                        plugin.name()
                    );
                    st.post.remove(i);
                }
            }
        }

        if let Some(plugin) = st.output_resample.clone() {
            match plugin.output_resample_delay(self.stream_id) {
                Ok(seconds) => delay += seconds,
                Err(fault) => {
                    log::error!(
                        "dsp process {}: {} in output resample delay of '{}', stage disabled",
                        self.stream_id,
                        fault,
                        plugin.name()
                    );
                    st.output_resample = None;
                }
            }
        }

        delay
    }

    // -- introspection ---------------------------------------------------

    /// Unique id of the active master mode; `ModeId::INVALID` before
    /// creation.
    pub fn master_mode_id(&self) -> ModeId {
        self.modes
            .read()
            .active_mode()
            .map(|mode| mode.mode_id)
            .unwrap_or(ModeId::INVALID)
    }

    /// Registered modes selectable for the given stream type.
    pub fn available_master_modes(&self, stream_type: StreamType) -> Vec<MasterMode> {
        self.modes
            .read()
            .modes
            .iter()
            .filter(|mode| mode.supports_stream_type(stream_type))
            .cloned()
            .collect()
    }

    /// Registered mode of a plugin by its plugin-local number.
    pub fn master_mode_by_plugin(&self, plugin: PluginId, mode_number: u32) -> Option<MasterMode> {
        self.modes
            .read()
            .modes
            .iter()
            .find(|mode| mode.plugin_id == plugin && mode.mode_number == mode_number)
            .cloned()
    }

    /// The mode currently running on the master plugin, if any.
    pub fn running_master_mode(&self) -> Option<MasterMode> {
        let st = self.state.lock();
        if st.master.is_none() {
            return None;
        }
        self.modes.read().active_mode().cloned()
    }

    /// (effective stream type, base type, active mode id), once created.
    pub fn master_mode_type_info(&self) -> Option<(StreamType, BaseType, ModeId)> {
        let st = self.state.lock();
        let table = self.modes.read();
        table
            .active_mode()
            .map(|mode| (st.properties.stream_type, mode.base_type, mode.mode_id))
    }

    /// Info line of the running master mode: empty for passover, `None`
    /// when no master plugin is selected.
    pub fn master_mode_stream_info(&self) -> Option<String> {
        let st = self.state.lock();
        let table = self.modes.read();
        if table.active == 0 {
            return Some(String::new());
        }
        st.master
            .as_ref()
            .map(|plugin| plugin.master_stream_info(self.stream_id))
    }

    /// Sample rate delivered to the sink.
    pub fn output_sample_rate(&self) -> u32 {
        self.state.lock().output_sample_rate
    }

    pub fn output_channel_layout(&self) -> ChannelLayout {
        self.state.lock().output_format.channel_layout
    }

    pub fn input_format(&self) -> AudioFormat {
        self.state.lock().input_format
    }

    pub fn detected_stream_type(&self) -> StreamType {
        self.state.lock().stream_type_detected
    }

    pub fn requested_stream_type(&self) -> StreamType {
        self.state.lock().stream_type_asked
    }

    pub fn stream_type(&self) -> StreamType {
        self.state.lock().stream_type
    }

    /// Stream type as the plugins see it (a master plugin may have
    /// overridden the engine-resolved one).
    pub fn effective_stream_type(&self) -> StreamType {
        self.state.lock().properties.stream_type
    }

    pub fn effective_base_type(&self) -> BaseType {
        self.state.lock().properties.base_type
    }
}

/// Resolve the effective stream type from the requested one: automatic
/// takes the detected type, a concrete request wins, anything else falls
/// back to basic.
fn resolve_stream_type(requested: StreamType, detected: StreamType) -> StreamType {
    if requested == StreamType::Auto {
        detected
    } else if requested.is_concrete() {
        requested
    } else {
        log::warn!("unknown audio stream type requested, falling back to basic");
        StreamType::Basic
    }
}

/// Frame count of the process stage for a resampled block:
/// `ceil(process_rate / in_rate * in_frames)`.
fn scaled_frames(process_rate: u32, in_rate: u32, in_frames: usize) -> usize {
    (f64::from(process_rate) / f64::from(in_rate) * in_frames as f64).ceil() as usize
}

/// Presence mask derived from a resolved channel index table.
fn presence_from_indices(indices: &[Option<usize>; CHANNEL_COUNT]) -> u32 {
    let mut flags = 0;
    for ch in AudioChannel::ALL {
        if indices[ch.slot()].is_some() {
            flags |= ch.presence_bit();
        }
    }
    flags
}

/// Borrow one stage buffer as source and a different one as
/// destination.
fn stage_pair(
    buffers: &mut [PlanarBuffer; STAGE_BUFFERS],
    src: usize,
    dst: usize,
) -> (&PlanarBuffer, &mut PlanarBuffer) {
    debug_assert_ne!(src, dst);
    if src < dst {
        let (head, tail) = buffers.split_at_mut(dst);
        (&head[src], &mut tail[0])
    } else {
        let (head, tail) = buffers.split_at_mut(src);
        (&tail[0], &mut head[dst])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_type_resolution() {
        assert_eq!(
            resolve_stream_type(StreamType::Auto, StreamType::Movie),
            StreamType::Movie
        );
        assert_eq!(
            resolve_stream_type(StreamType::Music, StreamType::Movie),
            StreamType::Music
        );
        assert_eq!(
            resolve_stream_type(StreamType::Invalid, StreamType::Movie),
            StreamType::Basic
        );
    }

    #[test]
    fn scaled_frames_rounds_up() {
        assert_eq!(scaled_frames(48000, 48000, 512), 512);
        assert_eq!(scaled_frames(96000, 48000, 512), 1024);
        assert_eq!(scaled_frames(44100, 48000, 512), 471); // 470.4 rounds up
    }

    #[test]
    fn presence_mask_from_index_table() {
        let mut indices = [None; CHANNEL_COUNT];
        indices[AudioChannel::FrontLeft.slot()] = Some(0);
        indices[AudioChannel::Lfe.slot()] = Some(3);
        let flags = presence_from_indices(&indices);
        assert_eq!(
            flags,
            AudioChannel::FrontLeft.presence_bit() | AudioChannel::Lfe.presence_bit()
        );
    }

    #[test]
    fn stage_pair_borrows_are_disjoint() {
        let mut buffers: [PlanarBuffer; STAGE_BUFFERS] =
            std::array::from_fn(|_| PlanarBuffer::new());
        buffers[BUF_INPUT].channel_mut(AudioChannel::FrontLeft)[0] = 0.5;

        let (src, dst) = stage_pair(&mut buffers, BUF_INPUT, BUF_MASTER);
        dst.channel_mut(AudioChannel::FrontLeft)[0] = src.channel(AudioChannel::FrontLeft)[0];
        assert_eq!(buffers[BUF_MASTER].channel(AudioChannel::FrontLeft)[0], 0.5);

        let (src, dst) = stage_pair(&mut buffers, BUF_MASTER, BUF_INPUT_RESAMPLE);
        dst.channel_mut(AudioChannel::FrontRight)[0] = src.channel(AudioChannel::FrontLeft)[0];
        assert_eq!(
            buffers[BUF_INPUT_RESAMPLE].channel(AudioChannel::FrontRight)[0],
            0.5
        );
    }
}
