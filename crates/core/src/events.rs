//! Synchronous progress events emitted by workspace operations.

use serde::Serialize;

use crate::conflict::ConflictType;
use crate::models::ChangeType;
use crate::paths::ServerPath;
use crate::status::GetOperation;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum WorkspaceEvent {
    /// A get, merge or rollback has worked out how many items it will touch.
    Planned { operation: String, items: usize },
    Operation(GetOperation),
    ConflictRecorded {
        id: i64,
        path: ServerPath,
        conflict_type: ConflictType,
    },
    Pended { path: ServerPath, change: ChangeType },
    Undone { path: ServerPath },
    CheckedIn { changeset: i64, changes: usize },
}

/// Receives events as they happen, on the caller's thread.
pub trait EventObserver {
    fn on_event(&mut self, event: &WorkspaceEvent);
}

impl<F: FnMut(&WorkspaceEvent)> EventObserver for F {
    fn on_event(&mut self, event: &WorkspaceEvent) {
        self(event)
    }
}

/// Discards every event.
pub struct NullObserver;

impl EventObserver for NullObserver {
    fn on_event(&mut self, _event: &WorkspaceEvent) {}
}

/// Keeps every event, in order.
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<WorkspaceEvent>,
}

impl EventObserver for EventLog {
    fn on_event(&mut self, event: &WorkspaceEvent) {
        self.events.push(event.clone());
    }
}
