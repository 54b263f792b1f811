use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::error_codes::{CodedError, ErrorCode};
use crate::params::{ParamKey, ParamValue};

/// The closed set of event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ParameterChanged,
    GeometryChanged,
    PresetApplied,
    RenderComplete,
    AnimationStarted,
    AnimationStopped,
    ExportStarted,
    ExportComplete,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        Self::ParameterChanged,
        Self::GeometryChanged,
        Self::PresetApplied,
        Self::RenderComplete,
        Self::AnimationStarted,
        Self::AnimationStopped,
        Self::ExportStarted,
        Self::ExportComplete,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParameterChanged => "parameter-changed",
            Self::GeometryChanged => "geometry-changed",
            Self::PresetApplied => "preset-applied",
            Self::RenderComplete => "render-complete",
            Self::AnimationStarted => "animation-started",
            Self::AnimationStopped => "animation-stopped",
            Self::ExportStarted => "export-started",
            Self::ExportComplete => "export-complete",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    User,
    Preset,
    Initialization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    Image,
    Code,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterChanged {
    pub param_name: ParamKey,
    pub value: ParamValue,
    pub source: UpdateSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryChanged {
    pub geometry_type: String,
    pub recreated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetApplied {
    pub preset_name: String,
    pub affected_params: Vec<ParamKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderComplete {
    /// Milliseconds spent rendering the frame.
    pub frame_time: f64,
    pub frame_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportStarted {
    #[serde(rename = "type")]
    pub export_type: ExportType,
    pub settings: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportComplete {
    #[serde(rename = "type")]
    pub export_type: ExportType,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
}

impl ErrorEvent {
    pub fn new(code: ErrorCode, message: impl Into<String>, source: &str) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            source: Some(source.to_owned()),
            recoverable: Some(true),
        }
    }
}

impl From<&CodedError> for ErrorEvent {
    fn from(error: &CodedError) -> Self {
        Self {
            message: error.message.clone(),
            code: Some(error.code),
            source: None,
            recoverable: Some(error.recoverable),
        }
    }
}

/// One emitted event with its channel-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum EditorEvent {
    ParameterChanged(ParameterChanged),
    GeometryChanged(GeometryChanged),
    PresetApplied(PresetApplied),
    RenderComplete(RenderComplete),
    AnimationStarted,
    AnimationStopped,
    ExportStarted(ExportStarted),
    ExportComplete(ExportComplete),
    Error(ErrorEvent),
}

impl EditorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ParameterChanged(_) => EventKind::ParameterChanged,
            Self::GeometryChanged(_) => EventKind::GeometryChanged,
            Self::PresetApplied(_) => EventKind::PresetApplied,
            Self::RenderComplete(_) => EventKind::RenderComplete,
            Self::AnimationStarted => EventKind::AnimationStarted,
            Self::AnimationStopped => EventKind::AnimationStopped,
            Self::ExportStarted(_) => EventKind::ExportStarted,
            Self::ExportComplete(_) => EventKind::ExportComplete,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Handle returned by `on`, used to remove that listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Box<dyn FnMut(&EditorEvent) -> Result<()>>;

/// Synchronous fan-out bus. Listeners run in registration order; a failing
/// or panicking listener is logged and never stops the ones after it.
#[derive(Default)]
pub struct EventEmitter {
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&EditorEvent) -> Result<()> + 'static,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    pub fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(listeners) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }

    pub fn emit(&mut self, event: &EditorEvent) {
        let kind = event.kind();
        let Some(listeners) = self.listeners.get_mut(&kind) else {
            return;
        };

        for (id, listener) in listeners.iter_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(
                        event = kind.as_str(),
                        listener = id.0,
                        "event listener failed: {error:#}"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        event = kind.as_str(),
                        listener = id.0,
                        "event listener panicked"
                    );
                }
            }
        }
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.listener_count(kind) > 0
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Clears one channel, or every channel when `kind` is `None`.
    pub fn clear_listeners(&mut self, kind: Option<EventKind>) {
        match kind {
            Some(kind) => {
                self.listeners.remove(&kind);
            }
            None => self.listeners.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use anyhow::bail;

    use super::*;

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> Listener {
        let log = Rc::clone(log);
        Box::new(move |_event| {
            log.borrow_mut().push(tag);
            Ok(())
        })
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut emitter = EventEmitter::new();
        emitter.on(EventKind::AnimationStarted, recorder(&log, "first"));
        emitter.on(EventKind::AnimationStarted, recorder(&log, "second"));
        emitter.on(EventKind::AnimationStopped, recorder(&log, "other"));

        emitter.emit(&EditorEvent::AnimationStarted);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn failing_and_panicking_listeners_do_not_stop_emission() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut emitter = EventEmitter::new();
        emitter.on(EventKind::AnimationStarted, |_| bail!("listener exploded"));
        emitter.on(EventKind::AnimationStarted, |_| panic!("listener panicked"));
        emitter.on(EventKind::AnimationStarted, recorder(&log, "survivor"));

        emitter.emit(&EditorEvent::AnimationStarted);
        assert_eq!(*log.borrow(), vec!["survivor"]);
    }

    #[test]
    fn off_removes_only_the_given_listener() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut emitter = EventEmitter::new();
        let first = emitter.on(EventKind::AnimationStarted, recorder(&log, "first"));
        emitter.on(EventKind::AnimationStarted, recorder(&log, "second"));

        assert!(emitter.off(EventKind::AnimationStarted, first));
        assert!(!emitter.off(EventKind::AnimationStarted, first));
        emitter.emit(&EditorEvent::AnimationStarted);
        assert_eq!(*log.borrow(), vec!["second"]);
    }

    #[test]
    fn clear_without_channel_clears_everything() {
        let mut emitter = EventEmitter::new();
        emitter.on(EventKind::Error, |_| Ok(()));
        emitter.on(EventKind::RenderComplete, |_| Ok(()));
        emitter.clear_listeners(Some(EventKind::Error));
        assert!(!emitter.has_listeners(EventKind::Error));
        assert!(emitter.has_listeners(EventKind::RenderComplete));
        emitter.clear_listeners(None);
        assert!(!emitter.has_listeners(EventKind::RenderComplete));
    }

    #[test]
    fn payload_shape_uses_wire_names() {
        let event = EditorEvent::ParameterChanged(ParameterChanged {
            param_name: ParamKey::Color1,
            value: ParamValue::text("#ff0000"),
            source: UpdateSource::User,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "parameter-changed");
        assert_eq!(value["payload"]["paramName"], "color1");
        assert_eq!(value["payload"]["source"], "user");
    }
}
