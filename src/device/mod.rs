//! Drive enumeration and arrival watching.
//!
//! Enumeration is plain field projection over logical-disk queries; the
//! watcher wires the subscription engine to the fixed instance-creation
//! template and adapts each delivered disk object into a typed notification.

use crate::broker::{Broker, BrokerError, ObjectSnapshot, Query};
use crate::watch::{EngineError, NotificationEngine, NotificationListener};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Class exposing one object per mounted logical disk.
pub const LOGICAL_DISK_CLASS: &str = "Win32_LogicalDisk";
/// Event class delivering newly created instances.
pub const INSTANCE_CREATION_CLASS: &str = "__InstanceCreationEvent";

/// `DriveType` value marking removable media.
const DRIVE_TYPE_REMOVABLE: i64 = 2;

/// Letters of every mounted logical disk.
pub fn available_drive_letters(broker: &dyn Broker) -> Result<Vec<char>, BrokerError> {
    let disks = broker.query(&Query::all(LOGICAL_DISK_CLASS))?;
    Ok(project_letters(disks.iter().map(|d| d.snapshot()), |_| true))
}

/// Letters of removable logical disks only. The drive-type filter is applied
/// after retrieval, like every projection in this crate.
pub fn removable_drive_letters(broker: &dyn Broker) -> Result<Vec<char>, BrokerError> {
    let disks = broker.query(&Query::all(LOGICAL_DISK_CLASS))?;
    Ok(project_letters(disks.iter().map(|d| d.snapshot()), |s| {
        s.get("DriveType").as_int() == Some(DRIVE_TYPE_REMOVABLE)
    }))
}

fn project_letters<'a>(
    disks: impl Iterator<Item = &'a ObjectSnapshot>,
    keep: impl Fn(&ObjectSnapshot) -> bool,
) -> Vec<char> {
    disks
        .filter(|s| keep(s))
        .filter_map(|s| s.get("Name").as_str())
        .filter_map(|name| name.chars().next())
        .collect()
}

/// What happened to a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriveNotificationKind {
    Arrival,
}

/// One drive event, timestamped at adaptation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriveNotification {
    pub kind: DriveNotificationKind,
    pub letter: char,
    pub ts: DateTime<Utc>,
}

/// Receives drive notifications on the watcher's delivery context.
pub trait DriveListener: Send + Sync {
    fn notify(&self, notification: &DriveNotification);
}

/// Watches for drive arrivals. One listener at a time.
pub struct DriveWatcher {
    engine: NotificationEngine,
}

impl DriveWatcher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        DriveWatcher { engine: NotificationEngine::new(broker) }
    }

    pub fn with_queue_capacity(broker: Arc<dyn Broker>, capacity: usize) -> Self {
        DriveWatcher { engine: NotificationEngine::with_queue_capacity(broker, capacity) }
    }

    /// Start watching, delivering arrivals into `listener`.
    pub fn start(&mut self, listener: Arc<dyn DriveListener>) -> Result<(), EngineError> {
        let query =
            Query::where_eq(INSTANCE_CREATION_CLASS, "TargetInstance", LOGICAL_DISK_CLASS);
        self.engine.start(&query, Arc::new(Adapter { listener }))
    }

    pub fn stop(&mut self) -> Result<(), EngineError> {
        self.engine.stop()
    }

    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.engine.reset()
    }

    pub fn is_active(&self) -> bool {
        self.engine.is_listening()
    }
}

/// Maps delivered disk objects onto drive notifications. Objects without a
/// usable name are skipped, not errors.
struct Adapter {
    listener: Arc<dyn DriveListener>,
}

impl NotificationListener for Adapter {
    fn notify(&self, object: &ObjectSnapshot) {
        let Some(name) = object.get("Name").as_str() else {
            return;
        };
        let Some(letter) = name.chars().next() else {
            return;
        };
        let notification = DriveNotification {
            kind: DriveNotificationKind::Arrival,
            letter,
            ts: Utc::now(),
        };
        log::debug!("drive arrival: {letter}");
        self.listener.notify(&notification);
    }
}
