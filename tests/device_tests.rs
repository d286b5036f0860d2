// tests/device_tests.rs
//
// Drive enumeration projections and the arrival watcher.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use volmgr::broker::{Broker, DynamicValue, MemoryBroker, ObjectDef, ObjectSnapshot};
use volmgr::device::{
    DriveListener, DriveNotification, DriveNotificationKind, DriveWatcher, INSTANCE_CREATION_CLASS,
    LOGICAL_DISK_CLASS, available_drive_letters, removable_drive_letters,
};

fn disk_inventory() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.add_object(
        LOGICAL_DISK_CLASS,
        ObjectDef::at(r#"Win32_LogicalDisk.DeviceID="C:""#)
            .field("Name", "C:")
            .field("DriveType", DynamicValue::Int(3)),
    );
    broker.add_object(
        LOGICAL_DISK_CLASS,
        ObjectDef::at(r#"Win32_LogicalDisk.DeviceID="E:""#)
            .field("Name", "E:")
            .field("DriveType", DynamicValue::Int(2)),
    );
    broker.add_object(
        LOGICAL_DISK_CLASS,
        ObjectDef::at(r#"Win32_LogicalDisk.DeviceID="F:""#)
            .field("Name", "F:")
            .field("DriveType", DynamicValue::Int(2)),
    );
    broker
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn available_letters_project_every_disk() {
    let broker = disk_inventory();
    assert_eq!(available_drive_letters(&broker).unwrap(), vec!['C', 'E', 'F']);
    assert_eq!(broker.outstanding_handles(), 0);
}

#[test]
fn removable_letters_filter_by_drive_type_after_retrieval() {
    let broker = disk_inventory();
    assert_eq!(removable_drive_letters(&broker).unwrap(), vec!['E', 'F']);
}

struct ArrivalRecorder {
    seen: Mutex<Vec<DriveNotification>>,
}

impl DriveListener for ArrivalRecorder {
    fn notify(&self, notification: &DriveNotification) {
        self.seen.lock().unwrap().push(notification.clone());
    }
}

#[test]
fn watcher_maps_arrivals_and_skips_nameless_objects() {
    let broker = MemoryBroker::new();
    let mut watcher = DriveWatcher::new(Arc::new(broker.clone()) as Arc<dyn Broker>);
    let recorder = Arc::new(ArrivalRecorder { seen: Mutex::new(Vec::new()) });

    watcher.start(recorder.clone()).unwrap();
    assert!(watcher.is_active());

    broker.inject(
        INSTANCE_CREATION_CLASS,
        vec![
            ObjectSnapshot::new().with("Name", "E:"),
            ObjectSnapshot::new().with("Size", DynamicValue::Int(0)), // no name: skipped
            ObjectSnapshot::new().with("Name", "G:"),
        ],
    );

    assert!(wait_until(
        || recorder.seen.lock().unwrap().len() == 2,
        Duration::from_secs(2)
    ));
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen[0].kind, DriveNotificationKind::Arrival);
    assert_eq!(seen[0].letter, 'E');
    assert_eq!(seen[1].letter, 'G');
    drop(seen);

    watcher.stop().unwrap();
    assert!(!watcher.is_active());
    watcher.reset().unwrap();
}

#[test]
fn drive_notifications_serialize_for_logging() {
    let broker = MemoryBroker::new();
    let mut watcher = DriveWatcher::with_queue_capacity(Arc::new(broker.clone()), 8);
    let recorder = Arc::new(ArrivalRecorder { seen: Mutex::new(Vec::new()) });

    watcher.start(recorder.clone()).unwrap();
    broker.inject(INSTANCE_CREATION_CLASS, vec![ObjectSnapshot::new().with("Name", "H:")]);
    assert!(wait_until(
        || !recorder.seen.lock().unwrap().is_empty(),
        Duration::from_secs(2)
    ));

    let seen = recorder.seen.lock().unwrap();
    let json = serde_json::to_string(&seen[0]).unwrap();
    assert!(json.contains("\"Arrival\""));
    assert!(json.contains("\"H\""));
    drop(seen);

    watcher.stop().unwrap();
}
