use serde::Serialize;

use super::state::{AlertInstance, AlertState};

/// Why an instance snapshot is sent downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventKind {
    Fired,
    Refreshed,
    Resolved,
    Escalated,
}

/// State-machine output consumed by the grouping engine. Only Firing and
/// Resolved snapshots travel downstream; Pending stays private to the
/// state machine.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    pub instance: AlertInstance,
}

impl AlertEvent {
    pub fn new(kind: AlertEventKind, instance: AlertInstance) -> Self {
        Self { kind, instance }
    }

    pub fn status_str(&self) -> &'static str {
        match self.instance.state {
            AlertState::Resolved => "resolved",
            _ => "firing",
        }
    }
}
