//! Ordered reconciliation of dependent state after a logical operation.
//!
//! Instead of every store subscribing to `parameter-changed` and re-querying
//! the facade, each target is called once per operation, in registration
//! order, with the final parameter set and the keys that changed.

use crate::params::{ParamKey, ParameterSet};

/// What caused a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReason {
    Update,
    Batch,
    Preset(String),
    ColorStops,
    Initialization,
}

pub trait ParamSync {
    fn reconcile(&mut self, params: &ParameterSet, changed: &[ParamKey], reason: &SyncReason);
}

impl<F> ParamSync for F
where
    F: FnMut(&ParameterSet, &[ParamKey], &SyncReason),
{
    fn reconcile(&mut self, params: &ParameterSet, changed: &[ParamKey], reason: &SyncReason) {
        self(params, changed, reason)
    }
}

#[derive(Default)]
pub struct Reconciler {
    targets: Vec<Box<dyn ParamSync>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, target: Box<dyn ParamSync>) {
        self.targets.push(target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Runs every target once. Plain updates that changed nothing are skipped;
    /// presets, color stops and initialization always reconcile.
    pub fn run(&mut self, params: &ParameterSet, changed: &[ParamKey], reason: SyncReason) {
        if changed.is_empty() && matches!(reason, SyncReason::Update | SyncReason::Batch) {
            return;
        }
        for target in &mut self.targets {
            target.reconcile(params, changed, &reason);
        }
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }
}
