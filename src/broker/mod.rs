//! Management-broker abstraction.
//!
//! The broker is an external service exposing a queryable, dynamically typed
//! object model plus named-method invocation (a WMI/COM-style service). This
//! module defines the client-side contract: the [`Broker`] trait, the fixed
//! query templates, materialized object snapshots, and the handle types whose
//! release-on-drop discipline the bridge relies on.
//!
//! A broker connection is a scarce, expensive-to-establish resource. It is an
//! explicitly constructed, explicitly owned object injected into callers —
//! never a hidden global — so independent instances can coexist (and tests
//! can run them concurrently).

pub mod bridge;
pub mod memory;
pub mod value;

pub use bridge::{InvocationResult, MethodBridge, RETURN_VALUE};
pub use memory::{MemoryBroker, MethodCall, MethodReply, ObjectDef};
pub use value::{ArgumentBag, DynamicValue};

use crate::watch::NotificationSink;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Reserved field carrying an object's dynamic class identity.
pub const CLASS_FIELD: &str = "__CLASS";
/// Reserved field carrying an object's persistent identity path.
pub const PATH_FIELD: &str = "__PATH";

/// Errors surfaced by broker operations and the invocation bridge.
///
/// These are all protocol-tier: the broker could not be reached or refused to
/// perform an operation. A method that *executed* but reported a non-success
/// status is not an error — the status comes back as data in
/// [`InvocationResult`].
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No usable connection; the component stays dead until re-initialized.
    #[error("broker unavailable")]
    Unavailable,

    /// The selector matched no object.
    #[error("no object matches the query")]
    NotFound,

    /// A broker object is missing or cannot resolve a required identity.
    #[error("malformed broker object: missing or unresolvable {0}")]
    Malformed(&'static str),

    /// The named method does not exist on the object's class.
    #[error("method '{0}' is not defined on the class")]
    MethodUnknown(String),

    /// The broker rejected performing the call itself.
    #[error("broker rejected the call: {0}")]
    Invocation(String),
}

/// A single-class query: either an unfiltered scan or one equality predicate.
/// Field projection happens after retrieval, never inside the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    class: String,
    filter: Option<(String, String)>,
}

impl Query {
    /// Full-collection scan of one class.
    pub fn all(class: impl Into<String>) -> Self {
        Query { class: class.into(), filter: None }
    }

    /// Single equality predicate on one string-valued field.
    pub fn where_eq(
        class: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Query {
            class: class.into(),
            filter: Some((field.into(), value.into())),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Whether an object's fields satisfy the predicate (trivially true for
    /// an unfiltered scan). Backends apply this after materializing fields.
    pub fn matches(&self, fields: &BTreeMap<String, DynamicValue>) -> bool {
        match &self.filter {
            None => true,
            Some((field, value)) => fields
                .get(field)
                .and_then(DynamicValue::as_str)
                .is_some_and(|s| s == value),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            None => write!(f, "SELECT * FROM {}", self.class),
            Some((field, value)) => {
                write!(f, "SELECT * FROM {} WHERE {}='{}'", self.class, field, value)
            }
        }
    }
}

/// Materialized view of one broker object: its fields at retrieval time,
/// including the reserved identity fields. Snapshots are fetched per call
/// and never cached across calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectSnapshot {
    fields: BTreeMap<String, DynamicValue>,
}

impl ObjectSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field set, used by backends and tests.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> &DynamicValue {
        static ABSENT: DynamicValue = DynamicValue::Absent;
        self.fields.get(name).unwrap_or(&ABSENT)
    }

    /// Dynamic class identity, if the broker returned one.
    pub fn class(&self) -> Option<&str> {
        self.get(CLASS_FIELD).as_str()
    }

    /// Persistent identity path, if the broker returned one.
    pub fn path(&self) -> Option<&str> {
        self.get(PATH_FIELD).as_str()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &DynamicValue)> {
        self.fields.iter()
    }
}

// ───── handle accounting ────────────────────────────────────────────────────
//
// Every broker-side resource handed to a client is paired with a guard
// registered in a ledger. Dropping the guard releases the handle, so every
// exit path — including early `?` returns — releases everything acquired so
// far. Tests assert `outstanding() == 0` after injected failures.

/// Ledger of live broker-side handles.
#[derive(Debug, Default)]
pub struct HandleLedger {
    next: AtomicU64,
    live: Mutex<BTreeSet<u64>>,
}

impl HandleLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of handles currently held by clients.
    pub fn outstanding(&self) -> usize {
        self.live.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub fn acquire(self: &Arc<Self>) -> HandleGuard {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut live) = self.live.lock() {
            live.insert(id);
        }
        HandleGuard { id, ledger: Arc::clone(self) }
    }

    fn release(&self, id: u64) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(&id);
        }
    }
}

/// Releases one ledger entry on drop.
#[derive(Debug)]
pub struct HandleGuard {
    id: u64,
    ledger: Arc<HandleLedger>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.ledger.release(self.id);
    }
}

/// A held broker object: snapshot plus its release guard.
#[derive(Debug)]
pub struct ObjectHandle {
    snapshot: ObjectSnapshot,
    _guard: HandleGuard,
}

impl ObjectHandle {
    pub fn new(snapshot: ObjectSnapshot, guard: HandleGuard) -> Self {
        ObjectHandle { snapshot, _guard: guard }
    }

    pub fn snapshot(&self) -> &ObjectSnapshot {
        &self.snapshot
    }
}

/// Formal input parameter declared by a class method.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub default: DynamicValue,
}

impl ParamDef {
    /// Parameter whose broker-declared default is the absent state.
    pub fn absent(name: impl Into<String>) -> Self {
        ParamDef { name: name.into(), default: DynamicValue::Absent }
    }

    pub fn with_default(name: impl Into<String>, default: impl Into<DynamicValue>) -> Self {
        ParamDef { name: name.into(), default: default.into() }
    }
}

/// A method's formal signature as declared on its class.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    /// `None` for a method that takes no input object at all.
    pub inputs: Option<Vec<ParamDef>>,
}

/// Held class metadata: method signatures plus the release guard.
#[derive(Debug)]
pub struct ClassHandle {
    name: String,
    methods: BTreeMap<String, MethodSignature>,
    _guard: HandleGuard,
}

impl ClassHandle {
    pub fn new(
        name: impl Into<String>,
        methods: BTreeMap<String, MethodSignature>,
        guard: HandleGuard,
    ) -> Self {
        ClassHandle { name: name.into(), methods, _guard: guard }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<&MethodSignature> {
        self.methods.get(name)
    }
}

/// Held method-output object.
#[derive(Debug)]
pub struct OutParams {
    fields: BTreeMap<String, DynamicValue>,
    _guard: HandleGuard,
}

impl OutParams {
    pub fn new(fields: BTreeMap<String, DynamicValue>, guard: HandleGuard) -> Self {
        OutParams { fields, _guard: guard }
    }

    /// `None` when the broker did not populate the name at all.
    pub fn get(&self, name: &str) -> Option<&DynamicValue> {
        self.fields.get(name)
    }
}

/// Identifies one notification subscription at the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Client contract against the management broker.
///
/// Synchronous and blocking; callable from any thread, but calls sharing one
/// connection are not serialized here — callers serialize access themselves.
pub trait Broker: Send + Sync {
    /// Run a query, materializing every matching object as a held handle.
    fn query(&self, query: &Query) -> Result<Vec<ObjectHandle>, BrokerError>;

    /// Fetch class metadata by name.
    fn class(&self, name: &str) -> Result<ClassHandle, BrokerError>;

    /// Execute a named method against the object at `path`. `inputs` is
    /// `None` for methods without a formal input object.
    fn exec_method(
        &self,
        path: &str,
        method: &str,
        inputs: Option<&ArgumentBag>,
    ) -> Result<OutParams, BrokerError>;

    /// Register a notification subscription delivering into `sink` from a
    /// broker-owned thread.
    fn subscribe(
        &self,
        query: &Query,
        sink: Arc<NotificationSink>,
    ) -> Result<SubscriptionId, BrokerError>;

    /// Cancel a subscription. The broker drops its sink reference; deliveries
    /// already in flight may still complete through their own clones.
    fn cancel(&self, id: SubscriptionId) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_renders_both_shapes() {
        assert_eq!(Query::all("Disk").to_string(), "SELECT * FROM Disk");
        assert_eq!(
            Query::where_eq("Disk", "Name", "C:").to_string(),
            "SELECT * FROM Disk WHERE Name='C:'"
        );
    }

    #[test]
    fn query_predicate_applies_after_retrieval() {
        let mut fields = BTreeMap::new();
        fields.insert("Name".to_string(), DynamicValue::from("C:"));
        assert!(Query::all("Disk").matches(&fields));
        assert!(Query::where_eq("Disk", "Name", "C:").matches(&fields));
        assert!(!Query::where_eq("Disk", "Name", "D:").matches(&fields));
        // An absent field never satisfies a predicate.
        assert!(!Query::where_eq("Disk", "Missing", "").matches(&fields));
    }

    #[test]
    fn ledger_counts_live_guards() {
        let ledger = HandleLedger::new();
        let a = ledger.acquire();
        let b = ledger.acquire();
        assert_eq!(ledger.outstanding(), 2);
        drop(a);
        assert_eq!(ledger.outstanding(), 1);
        drop(b);
        assert_eq!(ledger.outstanding(), 0);
    }
}
