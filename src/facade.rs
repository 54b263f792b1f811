//! The single mutation gateway between UI intent and the rendering engine.
//!
//! Every parameter write is validated, assigned, pushed to the engine and
//! announced, in that order. Structural work (geometry rebuilds, camera
//! moves) is derived from which keys changed.

use std::rc::Rc;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use thiserror::Error;

use crate::adaptive::{AdaptiveResolution, AdaptiveSettings, AdaptiveState};
use crate::animation::{AnimationLoop, AnimationSnapshot, Transition};
use crate::clock::{Clock, SystemClock};
use crate::config::EditorConfig;
use crate::debounce::{DebounceWindows, Debouncer};
use crate::engine::{Camera, ClearColor, EngineCapabilities, ShaderEngine, Surface};
use crate::error_codes::{find_coded_error, ErrorCode};
use crate::events::{
    EditorEvent, ErrorEvent, EventEmitter, EventKind, ExportComplete, ExportStarted, ExportType,
    GeometryChanged, ListenerId, ParameterChanged, PresetApplied, RenderComplete, UpdateSource,
};
use crate::export::{encode_frame, export_code, CodeExportOptions, ImageExport, ImageExportOptions};
use crate::geometry::GeometryDetail;
use crate::gradient::{validate_color_stops, ColorStop};
use crate::math::Vec3;
use crate::params::{GeometryType, ParamKey, ParamValue, ParameterSet};
use crate::presets::{Preset, PresetStore};
use crate::sync::{ParamSync, Reconciler, SyncReason};
use crate::validation::{RuleSet, ValidationResult};

const CAMERA_POSITION: [ParamKey; 3] = [
    ParamKey::CameraPosX,
    ParamKey::CameraPosY,
    ParamKey::CameraPosZ,
];
const CAMERA_TARGET: [ParamKey; 3] = [
    ParamKey::CameraTargetX,
    ParamKey::CameraTargetY,
    ParamKey::CameraTargetZ,
];

/// Failures returned to the caller. Everything else is reported on the
/// `error` channel and answered with `Ok(false)`.
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("shader facade is not initialized")]
    NotInitialized,
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("failed to initialize engine: {0:#}")]
    Initialize(anyhow::Error),
    #[error("image export failed: {0:#}")]
    ImageExport(anyhow::Error),
    #[error("code export failed: {0:#}")]
    CodeExport(anyhow::Error),
}

impl FacadeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized | Self::Initialize(_) => ErrorCode::NotInitialized,
            Self::UnknownParameter(_) => ErrorCode::InvalidParameter,
            Self::ImageExport(error) => coded_or(error, ErrorCode::ImageExportError),
            Self::CodeExport(error) => coded_or(error, ErrorCode::CodeExportError),
        }
    }
}

fn coded_or(error: &anyhow::Error, fallback: ErrorCode) -> ErrorCode {
    find_coded_error(error).map_or(fallback, |coded| coded.code)
}

/// Collaborators the facade needs, assembled once by the application root.
pub struct FacadeContext {
    pub rules: RuleSet,
    pub presets: PresetStore,
    pub clock: Rc<dyn Clock>,
    pub debounce: DebounceWindows,
    pub adaptive: AdaptiveSettings,
}

impl Default for FacadeContext {
    fn default() -> Self {
        Self {
            rules: RuleSet::standard(),
            presets: PresetStore::with_builtins(),
            clock: Rc::new(SystemClock),
            debounce: DebounceWindows::default(),
            adaptive: AdaptiveSettings::default(),
        }
    }
}

impl FacadeContext {
    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    /// Builds the context from a config file, loading user presets when a
    /// preset directory is configured.
    pub fn from_config(config: &EditorConfig) -> anyhow::Result<Self> {
        let rules = RuleSet::standard();
        let mut presets = PresetStore::with_builtins();
        if let Some(dir) = &config.presets.directory {
            let loaded = presets.load_directory(dir, &rules)?;
            tracing::debug!(dir = %dir.display(), loaded, "user presets loaded");
        }
        Ok(Self {
            rules,
            presets,
            clock: Rc::new(SystemClock),
            debounce: config.debounce.clone(),
            adaptive: config.adaptive.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    pub skip_validation: bool,
    /// Assign locally without pushing to the engine or rebuilding geometry.
    pub defer_update: bool,
    pub source: UpdateSource,
    pub recreate_geometry: bool,
    pub reset_camera: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            skip_validation: false,
            defer_update: false,
            source: UpdateSource::User,
            recreate_geometry: false,
            reset_camera: false,
        }
    }
}

impl UpdateOptions {
    pub fn deferred() -> Self {
        Self {
            defer_update: true,
            ..Self::default()
        }
    }
}

pub struct ShaderFacade<E: ShaderEngine> {
    engine: E,
    capabilities: EngineCapabilities,
    rules: RuleSet,
    presets: PresetStore,
    clock: Rc<dyn Clock>,
    emitter: EventEmitter,
    debouncer: Debouncer,
    adaptive: AdaptiveResolution,
    animation: AnimationLoop,
    reconciler: Reconciler,
    initialized: bool,
}

impl<E: ShaderEngine> ShaderFacade<E> {
    pub fn new(engine: E, context: FacadeContext) -> Self {
        let capabilities = engine.capabilities();
        let paused = engine.params().flag(ParamKey::PauseAnimation);
        Self {
            engine,
            capabilities,
            rules: context.rules,
            presets: context.presets,
            clock: context.clock,
            emitter: EventEmitter::new(),
            debouncer: Debouncer::new(context.debounce),
            adaptive: AdaptiveResolution::new(context.adaptive),
            animation: AnimationLoop::new(paused),
            reconciler: Reconciler::new(),
            initialized: false,
        }
    }

    // ---- lifecycle ----

    /// Mounts the engine, builds the mesh and pushes the initial uniforms.
    pub fn initialize(&mut self, surface: Surface) -> Result<(), FacadeError> {
        if self.initialized {
            tracing::warn!("initialize called on an initialized facade");
            return Ok(());
        }
        if let Err(error) = self.boot(&surface) {
            self.engine.dispose();
            return Err(FacadeError::Initialize(error));
        }

        self.animation = AnimationLoop::new(self.engine.params().flag(ParamKey::PauseAnimation));
        self.initialized = true;
        self.reconciler
            .run(self.engine.params(), &[], SyncReason::Initialization);
        tracing::info!(
            backend = self.capabilities.backend,
            width = surface.width,
            height = surface.height,
            "shader facade initialized"
        );
        Ok(())
    }

    fn boot(&mut self, surface: &Surface) -> anyhow::Result<()> {
        self.engine.mount(surface)?;
        let stats = self.engine.recreate_geometry(GeometryDetail::NORMAL)?;
        tracing::debug!(
            vertices = stats.vertex_count,
            triangles = stats.triangle_count,
            "initial geometry built"
        );
        self.engine.update_uniforms()
    }

    /// Tears everything down. Pending debounced updates are dropped and every
    /// later call fails with `NotInitialized`.
    pub fn dispose(&mut self) {
        if !self.initialized {
            return;
        }
        let dropped = self.debouncer.len();
        self.debouncer.clear();
        self.animation.halt();
        self.engine.dispose();
        self.emitter.clear_listeners(None);
        self.reconciler.clear();
        self.initialized = false;
        tracing::info!(dropped_updates = dropped, "shader facade disposed");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn ensure_initialized(&self) -> Result<(), FacadeError> {
        if self.initialized {
            Ok(())
        } else {
            Err(FacadeError::NotInitialized)
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    // ---- events ----

    pub fn on(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&EditorEvent) -> anyhow::Result<()> + 'static,
    ) -> ListenerId {
        self.emitter.on(kind, listener)
    }

    pub fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
        self.emitter.off(kind, id)
    }

    pub fn emit(&mut self, event: &EditorEvent) {
        self.emitter.emit(event);
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.emitter.has_listeners(kind)
    }

    pub fn clear_listeners(&mut self, kind: Option<EventKind>) {
        self.emitter.clear_listeners(kind);
    }

    /// Registers a target for the ordered reconciliation pass that follows
    /// every update, batch, preset application and color stop change.
    pub fn add_sync_target(&mut self, target: Box<dyn ParamSync>) {
        self.reconciler.add(target);
    }

    fn emit_error(&mut self, code: ErrorCode, message: impl Into<String>, source: &str) {
        let event = ErrorEvent::new(code, message, source);
        tracing::warn!(code = %code, source, "{}", event.message);
        self.emitter.emit(&EditorEvent::Error(event));
    }

    // ---- parameters ----

    pub fn get_param(&self, key: ParamKey) -> Result<ParamValue, FacadeError> {
        self.ensure_initialized()?;
        Ok(self.engine.params().get(key))
    }

    pub fn get_param_by_name(&self, name: &str) -> Result<ParamValue, FacadeError> {
        let key = name
            .parse::<ParamKey>()
            .map_err(|_| FacadeError::UnknownParameter(name.to_owned()))?;
        self.get_param(key)
    }

    /// A detached copy; writing to it never reaches the engine.
    pub fn get_all_params(&self) -> Result<ParameterSet, FacadeError> {
        self.ensure_initialized()?;
        Ok(self.engine.params().clone())
    }

    pub fn validate_param(&self, key: ParamKey, value: &ParamValue) -> ValidationResult {
        self.rules.validate(key, value)
    }

    pub fn update_param(
        &mut self,
        key: ParamKey,
        value: ParamValue,
        options: UpdateOptions,
    ) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;

        let verdict = self.check(key, &value, options);
        if !verdict.valid {
            let reason = verdict.message.unwrap_or_else(|| "invalid value".to_owned());
            self.emit_error(
                ErrorCode::InvalidParameter,
                format!("invalid value for {key}: {reason}"),
                "update_param",
            );
            return Ok(false);
        }

        // Assigned before the engine push; a failed push is not rolled back.
        let previous = self.engine.params_mut().set(key, value.clone());
        let changed = previous != value;

        if let Err(error) = self.push_to_engine(key.affects_geometry(), options) {
            self.emit_error(
                ErrorCode::UpdateError,
                format!("failed to apply {key}: {error:#}"),
                "update_param",
            );
            self.follow_pause_flag(&[key]);
            return Ok(false);
        }

        if changed {
            self.emitter
                .emit(&EditorEvent::ParameterChanged(ParameterChanged {
                    param_name: key,
                    value,
                    source: options.source,
                }));
        }
        self.follow_pause_flag(&[key]);
        if changed {
            self.reconciler
                .run(self.engine.params(), &[key], SyncReason::Update);
        }
        Ok(true)
    }

    /// All-or-nothing: one invalid entry rejects the batch before any key is
    /// written. Valid batches push to the engine once.
    pub fn batch_update_params(
        &mut self,
        updates: &[(ParamKey, ParamValue)],
        options: UpdateOptions,
    ) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        self.apply_batch(updates, options, SyncReason::Batch)
    }

    fn apply_batch(
        &mut self,
        updates: &[(ParamKey, ParamValue)],
        options: UpdateOptions,
        reason: SyncReason,
    ) -> Result<bool, FacadeError> {
        let invalid: Vec<String> = updates
            .iter()
            .filter_map(|(key, value)| {
                let verdict = self.check(*key, value, options);
                (!verdict.valid).then(|| match verdict.message {
                    Some(message) => format!("{key} ({message})"),
                    None => key.to_string(),
                })
            })
            .collect();
        if !invalid.is_empty() {
            self.emit_error(
                ErrorCode::InvalidParameters,
                format!("invalid parameters: {}", invalid.join(", ")),
                "batch_update_params",
            );
            return Ok(false);
        }

        let mut changed = Vec::new();
        for (key, value) in updates {
            let previous = self.engine.params_mut().set(*key, value.clone());
            if previous != *value {
                changed.push(*key);
                self.emitter
                    .emit(&EditorEvent::ParameterChanged(ParameterChanged {
                        param_name: *key,
                        value: value.clone(),
                        source: options.source,
                    }));
            }
        }
        let written: Vec<ParamKey> = updates.iter().map(|(key, _)| *key).collect();
        self.follow_pause_flag(&written);

        let geometry = updates.iter().any(|(key, _)| key.affects_geometry());
        if let Err(error) = self.push_to_engine(geometry, options) {
            self.emit_error(
                ErrorCode::BatchUpdateError,
                format!("failed to apply batch: {error:#}"),
                "batch_update_params",
            );
            return Ok(false);
        }

        self.reconciler.run(self.engine.params(), &changed, reason);
        Ok(true)
    }

    /// `skip_validation` drops range and pattern rules, never the type check.
    fn check(
        &self,
        key: ParamKey,
        value: &ParamValue,
        options: UpdateOptions,
    ) -> ValidationResult {
        if options.skip_validation {
            RuleSet::validate_type(key, value)
        } else {
            self.rules.validate(key, value)
        }
    }

    /// Keeps the animation loop in step with `pauseAnimation` and announces
    /// the transition, whichever path wrote the flag.
    fn follow_pause_flag(&mut self, written: &[ParamKey]) {
        if !written.contains(&ParamKey::PauseAnimation) {
            return;
        }
        if self.engine.params().flag(ParamKey::PauseAnimation) {
            if self.animation.stop() == Transition::Changed {
                self.emitter.emit(&EditorEvent::AnimationStopped);
            }
        } else if self.animation.start() == Transition::Changed {
            self.emitter.emit(&EditorEvent::AnimationStarted);
        }
    }

    /// Pushes the parameter bag into the engine and performs the structural
    /// follow-ups the update asked for.
    fn push_to_engine(
        &mut self,
        affects_geometry: bool,
        options: UpdateOptions,
    ) -> anyhow::Result<()> {
        if options.defer_update {
            return Ok(());
        }
        self.engine.update_uniforms()?;
        if options.reset_camera {
            self.reset_camera()?;
        }
        if affects_geometry || options.recreate_geometry {
            self.recreate_geometry(false)?;
        }
        Ok(())
    }

    /// Replaces the multi-stop gradient; `None` returns to the palette.
    pub fn set_color_stops(&mut self, stops: Option<Vec<ColorStop>>) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        if let Some(stops) = &stops {
            if let Err(error) = validate_color_stops(stops) {
                self.emit_error(
                    ErrorCode::InvalidParameter,
                    format!("invalid color stops: {error:#}"),
                    "set_color_stops",
                );
                return Ok(false);
            }
        }

        self.engine.params_mut().set_color_stops(stops);
        if let Err(error) = self.engine.update_uniforms() {
            self.emit_error(
                ErrorCode::UpdateError,
                format!("failed to apply color stops: {error:#}"),
                "set_color_stops",
            );
            return Ok(false);
        }
        self.reconciler
            .run(self.engine.params(), &[], SyncReason::ColorStops);
        Ok(true)
    }

    pub fn color_stops(&self) -> Result<Option<Vec<ColorStop>>, FacadeError> {
        self.ensure_initialized()?;
        Ok(self.engine.params().color_stops().map(<[ColorStop]>::to_vec))
    }

    // ---- debounced updates ----

    /// Queues an update behind the key's category window. A newer schedule
    /// for the same key replaces the queued value.
    pub fn schedule_update(&mut self, key: ParamKey, value: ParamValue) -> Result<(), FacadeError> {
        self.ensure_initialized()?;
        let deadline = self.debouncer.schedule(key, value, self.clock.now());
        tracing::trace!(param = %key, ?deadline, "update scheduled");
        Ok(())
    }

    /// Applies every queued update whose window has elapsed. Returns how many
    /// were accepted.
    pub fn flush_due_updates(&mut self) -> Result<usize, FacadeError> {
        self.ensure_initialized()?;
        let due = self.debouncer.take_due(self.clock.now());
        let mut applied = 0;
        for (key, value) in due {
            if self.update_param(key, value, UpdateOptions::default())? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    pub fn pending_update_count(&self) -> usize {
        self.debouncer.len()
    }

    // ---- presets ----

    pub fn get_available_presets(&self) -> Result<&[Preset], FacadeError> {
        self.ensure_initialized()?;
        Ok(self.presets.list())
    }

    /// Applies a preset as one batch. Keys the preset does not carry keep
    /// their current values.
    pub fn apply_preset(&mut self, name: &str) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        let Some(preset) = self.presets.get(name).cloned() else {
            self.emit_error(
                ErrorCode::PresetNotFound,
                format!("preset '{name}' not found"),
                "apply_preset",
            );
            return Ok(false);
        };
        if let Err(error) = preset.validate(&self.rules) {
            self.emit_error(
                ErrorCode::PresetApplyError,
                format!("{error:#}"),
                "apply_preset",
            );
            return Ok(false);
        }

        let before = self.engine.params().clone();
        if preset.color_stops.is_some() || preset.resets_color_stops() {
            self.engine
                .params_mut()
                .set_color_stops(preset.color_stops.clone());
        }
        let options = UpdateOptions {
            skip_validation: true,
            source: UpdateSource::Preset,
            ..UpdateOptions::default()
        };
        if !self.apply_batch(&preset.updates(), options, SyncReason::Preset(preset.name.clone()))? {
            self.emit_error(
                ErrorCode::PresetApplyError,
                format!("failed to apply preset '{name}'"),
                "apply_preset",
            );
            return Ok(false);
        }

        let affected_params = before.changed_keys(self.engine.params());
        tracing::debug!(preset = name, affected = affected_params.len(), "preset applied");
        self.emitter.emit(&EditorEvent::PresetApplied(PresetApplied {
            preset_name: preset.name,
            affected_params,
        }));
        Ok(true)
    }

    /// Saves the current parameters (and color stops) as a user preset.
    pub fn save_preset(&mut self, name: &str, description: &str) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        let preset = Preset::from_params(name, description, self.engine.params());
        let saved = preset
            .validate(&self.rules)
            .and_then(|()| self.presets.save(preset));
        match saved {
            Ok(()) => Ok(true),
            Err(error) => {
                let code = coded_or(&error, ErrorCode::PresetSaveError);
                self.emit_error(code, format!("{error:#}"), "save_preset");
                Ok(false)
            }
        }
    }

    pub fn delete_preset(&mut self, name: &str) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        match self.presets.delete(name) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.emit_error(
                    ErrorCode::PresetNotFound,
                    format!("preset '{name}' not found"),
                    "delete_preset",
                );
                Ok(false)
            }
            Err(error) => {
                let code = coded_or(&error, ErrorCode::PresetSaveError);
                self.emit_error(code, format!("{error:#}"), "delete_preset");
                Ok(false)
            }
        }
    }

    // ---- geometry ----

    /// Rebuilds the mesh. Failures are reported on the `error` channel only.
    pub fn recreate_geometry(&mut self, high_quality: bool) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        let detail = if high_quality {
            GeometryDetail::HIGH_QUALITY
        } else {
            let scale = self.adaptive.record_rebuild(self.clock.now());
            if scale < 1.0 {
                GeometryDetail::reduced(scale, self.adaptive.min_segments())
            } else {
                GeometryDetail::NORMAL
            }
        };
        Ok(self.rebuild_geometry(detail))
    }

    fn rebuild_geometry(&mut self, detail: GeometryDetail) -> bool {
        match self.engine.recreate_geometry(detail) {
            Ok(stats) => {
                tracing::debug!(
                    vertices = stats.vertex_count,
                    triangles = stats.triangle_count,
                    scale = detail.segment_scale,
                    high_quality = detail.high_quality,
                    "geometry rebuilt"
                );
                let geometry_type = self.engine.params().geometry_type().as_str().to_owned();
                self.emitter
                    .emit(&EditorEvent::GeometryChanged(GeometryChanged {
                        geometry_type,
                        recreated: true,
                    }));
                true
            }
            Err(error) => {
                self.emit_error(
                    ErrorCode::GeometryRecreateError,
                    format!("failed to recreate geometry: {error:#}"),
                    "recreate_geometry",
                );
                false
            }
        }
    }

    pub fn set_geometry_type(&mut self, geometry_type: GeometryType) -> Result<bool, FacadeError> {
        self.update_param(
            ParamKey::GeometryType,
            ParamValue::text(geometry_type.as_str()),
            UpdateOptions::default(),
        )
    }

    /// Adaptive resolution lowers segment counts during bursts of rebuilds.
    /// Turning it off while a reduction is active rebuilds at full resolution.
    pub fn set_adaptive_resolution(&mut self, enabled: bool) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        if self.adaptive.set_enabled(enabled) {
            return Ok(self.rebuild_geometry(GeometryDetail::NORMAL));
        }
        Ok(false)
    }

    pub fn adaptive_state(&self) -> AdaptiveState {
        self.adaptive.state()
    }

    // ---- camera ----

    /// Records the position as parameters and moves the live camera at once,
    /// so the next frame already uses it.
    pub fn set_camera_position(&mut self, x: f64, y: f64, z: f64) -> Result<bool, FacadeError> {
        self.move_camera(CAMERA_POSITION, [x, y, z], ErrorCode::CameraPositionError, |camera, to| {
            camera.position = to;
        })
    }

    pub fn set_camera_target(&mut self, x: f64, y: f64, z: f64) -> Result<bool, FacadeError> {
        self.move_camera(CAMERA_TARGET, [x, y, z], ErrorCode::CameraTargetError, |camera, to| {
            camera.target = to;
        })
    }

    fn move_camera(
        &mut self,
        keys: [ParamKey; 3],
        values: [f64; 3],
        code: ErrorCode,
        apply: impl FnOnce(&mut Camera, Vec3),
    ) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        let updates: Vec<(ParamKey, ParamValue)> = keys
            .iter()
            .zip(values)
            .map(|(key, value)| (*key, ParamValue::Number(value)))
            .collect();
        if !self.batch_update_params(&updates, UpdateOptions::deferred())? {
            return Ok(false);
        }

        let [x, y, z] = values;
        apply(self.engine.camera_mut(), Vec3::new(x as f32, y as f32, z as f32));
        if let Err(error) = self.engine.update_uniforms() {
            self.emit_error(code, format!("failed to move camera: {error:#}"), "camera");
            return Ok(false);
        }
        Ok(true)
    }

    /// Restores position, target and field of view to their defaults.
    pub fn reset_camera(&mut self) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        let updates: Vec<(ParamKey, ParamValue)> = ParamKey::ALL
            .iter()
            .filter(|key| key.affects_camera())
            .map(|key| (*key, key.default_value()))
            .collect();
        if !self.batch_update_params(&updates, UpdateOptions::deferred())? {
            return Ok(false);
        }

        let params = self.engine.params().clone();
        self.engine.camera_mut().sync_from(&params);
        if let Err(error) = self.engine.update_uniforms() {
            self.emit_error(
                ErrorCode::CameraResetError,
                format!("failed to reset camera: {error:#}"),
                "reset_camera",
            );
            return Ok(false);
        }
        Ok(true)
    }

    // ---- animation ----

    /// Clears `pauseAnimation`; the loop follows the flag. Returns whether
    /// the animation was stopped before.
    pub fn start_animation(&mut self) -> Result<bool, FacadeError> {
        self.set_paused(false)
    }

    pub fn stop_animation(&mut self) -> Result<bool, FacadeError> {
        self.set_paused(true)
    }

    fn set_paused(&mut self, paused: bool) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        if self.animation.is_running() != paused {
            return Ok(false);
        }
        self.update_param(
            ParamKey::PauseAnimation,
            ParamValue::Bool(paused),
            UpdateOptions::deferred(),
        )?;
        Ok(self.animation.is_running() != paused)
    }

    pub fn is_animating(&self) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        Ok(self.animation.is_running())
    }

    /// Moves the shader clock, e.g. to capture a specific moment.
    pub fn seek(&mut self, seconds: f32) -> Result<(), FacadeError> {
        self.ensure_initialized()?;
        self.engine.set_shader_time(seconds.max(0.0));
        Ok(())
    }

    pub fn frame_count(&self) -> u64 {
        self.animation.frame_count()
    }

    // ---- rendering ----

    /// Renders one frame. Failures are reported on the `error` channel.
    pub fn render_frame(&mut self) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        let started = self.clock.now();
        match self.engine.render() {
            Ok(()) => {
                let frame_count = self.animation.count_frame();
                let frame_time = self.clock.now().saturating_duration_since(started);
                self.emitter
                    .emit(&EditorEvent::RenderComplete(RenderComplete {
                        frame_time: frame_time.as_secs_f64() * 1000.0,
                        frame_count,
                    }));
                Ok(true)
            }
            Err(error) => {
                self.emit_error(
                    ErrorCode::RenderError,
                    format!("render failed: {error:#}"),
                    "render_frame",
                );
                Ok(false)
            }
        }
    }

    /// One step of the animation loop: applies due debounced updates,
    /// advances shader time while running, hands back full resolution after
    /// a quiet period, then renders.
    pub fn tick(&mut self) -> Result<bool, FacadeError> {
        self.ensure_initialized()?;
        self.flush_due_updates()?;

        let now = self.clock.now();
        if self.adaptive.needs_restore(now) {
            self.adaptive.reset();
            self.rebuild_geometry(GeometryDetail::NORMAL);
        }

        let delta = self.animation.advance(now);
        if delta > 0.0 {
            let speed = self.engine.params().number_f32(ParamKey::AnimationSpeed);
            let time = self.engine.shader_time() + speed * delta;
            self.engine.set_shader_time(time);
        }
        self.render_frame()
    }

    // ---- export ----

    /// Captures one frame. Renderer state changed for the capture is restored
    /// on every exit path, and a running animation resumes with its clock
    /// advanced by the time the export took.
    pub fn export_as_image(
        &mut self,
        options: ImageExportOptions,
    ) -> Result<ImageExport, FacadeError> {
        self.ensure_initialized()?;
        let settings = serde_json::to_value(options).unwrap_or(Value::Null);
        self.emitter.emit(&EditorEvent::ExportStarted(ExportStarted {
            export_type: ExportType::Image,
            settings,
        }));

        match self.capture_image(&options) {
            Ok(export) => {
                tracing::info!(
                    format = %export.format,
                    width = export.width,
                    height = export.height,
                    bytes = export.bytes.len(),
                    "image exported"
                );
                self.emitter
                    .emit(&EditorEvent::ExportComplete(ExportComplete {
                        export_type: ExportType::Image,
                        result: export.summary(),
                    }));
                Ok(export)
            }
            Err(error) => {
                self.emit_error(
                    ErrorCode::ImageExportError,
                    format!("image export failed: {error:#}"),
                    "export_as_image",
                );
                Err(FacadeError::ImageExport(error))
            }
        }
    }

    fn capture_image(&mut self, options: &ImageExportOptions) -> anyhow::Result<ImageExport> {
        let snapshot = AnimationSnapshot {
            speed: self.engine.params().number_f32(ParamKey::AnimationSpeed),
            shader_time: self.engine.shader_time(),
            was_running: self.animation.is_running(),
            captured_at: self.clock.now(),
        };
        if snapshot.was_running {
            self.stop_animation()?;
        }

        let captured = capture_with_restore(&mut self.engine, self.capabilities, options);

        self.engine
            .set_shader_time(snapshot.restored_time(self.clock.now()));
        if snapshot.was_running {
            self.start_animation()?;
        }
        captured
    }

    pub fn export_as_code(&mut self, options: CodeExportOptions) -> Result<String, FacadeError> {
        self.ensure_initialized()?;
        let settings = serde_json::to_value(options).unwrap_or(Value::Null);
        self.emitter.emit(&EditorEvent::ExportStarted(ExportStarted {
            export_type: ExportType::Code,
            settings,
        }));

        let generated = self
            .engine
            .shader_module()
            .and_then(|shader| export_code(options, self.engine.params(), &shader));
        match generated {
            Ok(code) => {
                self.emitter
                    .emit(&EditorEvent::ExportComplete(ExportComplete {
                        export_type: ExportType::Code,
                        result: json!({
                            "format": options.format.to_string(),
                            "minified": options.minify,
                            "code": code,
                        }),
                    }));
                Ok(code)
            }
            Err(error) => {
                self.emit_error(
                    ErrorCode::CodeExportError,
                    format!("code export failed: {error:#}"),
                    "export_as_code",
                );
                Err(FacadeError::CodeExport(error))
            }
        }
    }
}

/// Renderer state borrowed for a capture. Whatever was changed is put back
/// by `restore`, or by `Drop` when the capture bails early.
struct CaptureGuard<'a, E: ShaderEngine> {
    engine: &'a mut E,
    clear_color: Option<ClearColor>,
    geometry: Option<GeometryDetail>,
    size: Option<(u32, u32)>,
}

impl<'a, E: ShaderEngine> CaptureGuard<'a, E> {
    fn new(engine: &'a mut E) -> Self {
        Self {
            engine,
            clear_color: None,
            geometry: None,
            size: None,
        }
    }

    fn restore(mut self) -> anyhow::Result<()> {
        self.restore_state()
    }

    fn restore_state(&mut self) -> anyhow::Result<()> {
        if let Some(color) = self.clear_color.take() {
            self.engine.set_clear_color(color);
        }
        if let Some(detail) = self.geometry.take() {
            self.engine
                .recreate_geometry(detail)
                .context("failed to restore geometry resolution")?;
        }
        if let Some((width, height)) = self.size.take() {
            self.engine
                .resize(width, height)
                .context("failed to restore render size")?;
        }
        Ok(())
    }
}

impl<E: ShaderEngine> Drop for CaptureGuard<'_, E> {
    fn drop(&mut self) {
        if let Err(error) = self.restore_state() {
            tracing::error!("renderer state not restored after export: {error:#}");
        }
    }
}

fn capture_with_restore<E: ShaderEngine>(
    engine: &mut E,
    capabilities: EngineCapabilities,
    options: &ImageExportOptions,
) -> anyhow::Result<ImageExport> {
    let mut guard = CaptureGuard::new(engine);

    let original = guard.engine.clear_color();
    guard.clear_color = Some(original);
    let clear = if options.transparent {
        original.with_alpha(0.0)
    } else {
        original
    };
    guard.engine.set_clear_color(clear);

    let current = guard.engine.size();
    let requested = (
        options.width.unwrap_or(current.0),
        options.height.unwrap_or(current.1),
    );
    if requested != current {
        if !capabilities.resizable {
            bail!(
                "{} engine cannot capture at {}x{}",
                capabilities.backend,
                requested.0,
                requested.1
            );
        }
        guard.size = Some(current);
        guard.engine.resize(requested.0, requested.1)?;
    }

    if options.high_quality {
        guard.geometry = Some(GeometryDetail::NORMAL);
        guard
            .engine
            .recreate_geometry(GeometryDetail::HIGH_QUALITY)
            .context("failed to build high quality geometry")?;
    }

    guard.engine.render()?;
    let frame = guard.engine.capture_frame()?;
    let export = encode_frame(&frame, options.format, options.quality)?;

    guard.restore()?;
    Ok(export)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::SoftwareEngine;

    fn facade() -> (ShaderFacade<SoftwareEngine>, ManualClock) {
        let clock = ManualClock::new();
        let mut params = ParameterSet::defaults();
        params.set(ParamKey::PlaneSegments, ParamValue::Number(8.0));
        let mut facade = ShaderFacade::new(
            SoftwareEngine::new(params),
            FacadeContext::with_clock(Rc::new(clock.clone())),
        );
        facade
            .initialize(Surface::new("test", 32, 24))
            .expect("initialize");
        (facade, clock)
    }

    fn record(
        facade: &mut ShaderFacade<SoftwareEngine>,
        kind: EventKind,
    ) -> Rc<RefCell<Vec<EditorEvent>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        facade.on(kind, move |event| {
            sink.borrow_mut().push(event.clone());
            Ok(())
        });
        log
    }

    #[test]
    fn operations_fail_fast_before_initialize() {
        let mut facade = ShaderFacade::new(
            SoftwareEngine::new(ParameterSet::defaults()),
            FacadeContext::default(),
        );
        assert!(matches!(
            facade.get_param(ParamKey::Color1),
            Err(FacadeError::NotInitialized)
        ));
        assert!(matches!(
            facade.update_param(
                ParamKey::Color1,
                ParamValue::text("#ffffff"),
                UpdateOptions::default()
            ),
            Err(FacadeError::NotInitialized)
        ));
        assert!(facade.validate_param(ParamKey::CameraFov, &ParamValue::Number(60.0)).valid);
    }

    #[test]
    fn debounced_updates_coalesce_per_key() {
        let (mut facade, clock) = facade();
        let changes = record(&mut facade, EventKind::ParameterChanged);

        facade
            .schedule_update(ParamKey::LightDirX, ParamValue::Number(0.1))
            .expect("schedule");
        clock.advance_ms(50);
        facade
            .schedule_update(ParamKey::LightDirX, ParamValue::Number(0.2))
            .expect("schedule");
        clock.advance_ms(60);
        assert_eq!(facade.flush_due_updates().expect("flush"), 0);

        clock.advance_ms(50);
        assert_eq!(facade.flush_due_updates().expect("flush"), 1);
        assert_eq!(changes.borrow().len(), 1);
        assert_eq!(
            facade.get_param(ParamKey::LightDirX).expect("param"),
            ParamValue::Number(0.2)
        );
    }

    #[test]
    fn dispose_drops_pending_updates() {
        let (mut facade, _clock) = facade();
        facade
            .schedule_update(ParamKey::Color1, ParamValue::text("#00ff00"))
            .expect("schedule");
        assert_eq!(facade.pending_update_count(), 1);
        facade.dispose();
        assert_eq!(facade.pending_update_count(), 0);
        assert!(matches!(facade.tick(), Err(FacadeError::NotInitialized)));
    }

    #[test]
    fn rapid_rebuilds_reduce_then_restore_resolution() {
        let (mut facade, clock) = facade();
        for _ in 0..6 {
            facade.recreate_geometry(false).expect("rebuild");
            clock.advance_ms(100);
        }
        assert!(facade.adaptive_state().segment_scale < 1.0);

        clock.advance_ms(400);
        facade.tick().expect("tick");
        assert_eq!(facade.adaptive_state().segment_scale, 1.0);
    }

    #[test]
    fn tick_advances_shader_time_by_speed() {
        let (mut facade, clock) = facade();
        facade
            .update_param(
                ParamKey::AnimationSpeed,
                ParamValue::Number(2.0),
                UpdateOptions::default(),
            )
            .expect("speed");
        facade.tick().expect("first tick");
        clock.advance_ms(500);
        facade.tick().expect("second tick");
        assert!((facade.engine().shader_time() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn failed_capture_still_restores_clear_color() {
        let (mut facade, _clock) = facade();
        let before = facade.engine().clear_color();
        let options = ImageExportOptions {
            transparent: true,
            width: Some(0),
            ..ImageExportOptions::default()
        };
        let error = facade.export_as_image(options).unwrap_err();
        assert_eq!(error.code(), ErrorCode::ImageExportError);
        assert_eq!(facade.engine().clear_color(), before);
        assert!(facade.is_animating().expect("animating"));
    }
}
