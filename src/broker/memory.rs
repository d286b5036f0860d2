//! In-process broker.
//!
//! A scriptable [`Broker`] implementation: classes, objects and method
//! handlers are registered at runtime, subscriptions are fed by injected
//! event batches delivered from a thread this broker owns — the same
//! threading shape a live backend has. Used by the test suite and by local
//! callers that want the full client stack without a real management
//! service.
//!
//! Failure injection is structural rather than switch-based: register an
//! object without an identity path to provoke `Malformed`, leave a method
//! undefined for `MethodUnknown`, return an error from a handler for
//! `Invocation`, or take the broker offline for `Unavailable`.

use super::{
    ArgumentBag, Broker, BrokerError, CLASS_FIELD, ClassHandle, DynamicValue, HandleLedger,
    MethodSignature, ObjectHandle, ObjectSnapshot, OutParams, PATH_FIELD, ParamDef, Query,
    SubscriptionId,
};
use crate::watch::NotificationSink;
use crossbeam::channel::{Sender, unbounded};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// One method invocation as seen by a registered handler.
pub struct MethodCall<'a> {
    /// Identity path of the target object.
    pub path: &'a str,
    /// Marshaled input object; `None` when the method declares no inputs.
    pub args: Option<&'a ArgumentBag>,
}

impl MethodCall<'_> {
    /// Input argument by name; `Absent` when there is no input object or the
    /// name was never set.
    pub fn arg(&self, name: &str) -> &DynamicValue {
        static ABSENT: DynamicValue = DynamicValue::Absent;
        self.args.map(|bag| bag.get(name)).unwrap_or(&ABSENT)
    }
}

/// Output object produced by a method handler.
#[derive(Debug, Clone, Default)]
pub struct MethodReply {
    fields: BTreeMap<String, DynamicValue>,
}

impl MethodReply {
    /// Reply with the reserved status field set to `code`.
    pub fn status(code: i64) -> Self {
        MethodReply::default().with(super::RETURN_VALUE, code)
    }

    /// Success reply (status zero).
    pub fn ok() -> Self {
        Self::status(0)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

type MethodHandler = Arc<dyn Fn(MethodCall<'_>) -> anyhow::Result<MethodReply> + Send + Sync>;

/// Declaration of one object to register.
#[derive(Debug, Clone, Default)]
pub struct ObjectDef {
    path: Option<String>,
    class_identity: bool,
    fields: BTreeMap<String, DynamicValue>,
}

impl ObjectDef {
    /// Object with a persistent identity path.
    pub fn at(path: impl Into<String>) -> Self {
        ObjectDef { path: Some(path.into()), class_identity: true, fields: BTreeMap::new() }
    }

    /// Object lacking an identity path (methods cannot target it).
    pub fn pathless() -> Self {
        ObjectDef { path: None, class_identity: true, fields: BTreeMap::new() }
    }

    /// Suppress the class identity field on materialized snapshots.
    pub fn without_class_identity(mut self) -> Self {
        self.class_identity = false;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

struct MethodDef {
    inputs: Option<Vec<ParamDef>>,
    handler: MethodHandler,
}

#[derive(Default)]
struct ClassDef {
    methods: BTreeMap<String, MethodDef>,
    objects: Vec<ObjectDef>,
}

struct SubEntry {
    query: Query,
    sink: Arc<NotificationSink>,
}

struct Inner {
    online: AtomicBool,
    ledger: Arc<HandleLedger>,
    store: Mutex<BTreeMap<String, ClassDef>>,
    subs: Arc<Mutex<BTreeMap<u64, SubEntry>>>,
    next_sub: AtomicU64,
    delivery_tx: Sender<(String, Vec<ObjectSnapshot>)>,
}

/// Cheaply cloneable handle; clones share one broker instance.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_online(true)
    }

    /// A broker whose connection never came up; every operation fails with
    /// `Unavailable` until `set_online(true)`.
    pub fn offline() -> Self {
        Self::with_online(false)
    }

    fn with_online(online: bool) -> Self {
        let subs: Arc<Mutex<BTreeMap<u64, SubEntry>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let (delivery_tx, delivery_rx) = unbounded::<(String, Vec<ObjectSnapshot>)>();

        // Broker-owned delivery thread; exits when the last broker handle
        // (and with it the sender) is dropped.
        let thread_subs = Arc::clone(&subs);
        thread::spawn(move || {
            while let Ok((event_class, batch)) = delivery_rx.recv() {
                let sinks: Vec<Arc<NotificationSink>> = match thread_subs.lock() {
                    Ok(subs) => subs
                        .values()
                        .filter(|entry| entry.query.class() == event_class)
                        .map(|entry| Arc::clone(&entry.sink))
                        .collect(),
                    Err(_) => Vec::new(),
                };
                // Indicate outside the lock: a full queue must block this
                // thread, not every control operation on the broker.
                for sink in sinks {
                    sink.indicate(batch.clone());
                }
            }
        });

        MemoryBroker {
            inner: Arc::new(Inner {
                online: AtomicBool::new(online),
                ledger: HandleLedger::new(),
                store: Mutex::new(BTreeMap::new()),
                subs,
                next_sub: AtomicU64::new(1),
                delivery_tx,
            }),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    /// Handles currently held by clients; zero once every guard is dropped.
    pub fn outstanding_handles(&self) -> usize {
        self.inner.ledger.outstanding()
    }

    /// Register an object under `class` (creating the class on first use).
    pub fn add_object(&self, class: &str, object: ObjectDef) {
        if let Ok(mut store) = self.inner.store.lock() {
            store.entry(class.to_owned()).or_default().objects.push(object);
        }
    }

    /// Declare a method on `class`. `inputs` is `None` for a method without
    /// a formal input object; declared parameters carry their defaults.
    pub fn define_method<F>(
        &self,
        class: &str,
        method: &str,
        inputs: Option<Vec<ParamDef>>,
        handler: F,
    ) where
        F: Fn(MethodCall<'_>) -> anyhow::Result<MethodReply> + Send + Sync + 'static,
    {
        if let Ok(mut store) = self.inner.store.lock() {
            store
                .entry(class.to_owned())
                .or_default()
                .methods
                .insert(method.to_owned(), MethodDef { inputs, handler: Arc::new(handler) });
        }
    }

    /// Deliver an event batch to every subscription registered for
    /// `event_class`, on the broker's delivery thread.
    pub fn inject(&self, event_class: &str, batch: Vec<ObjectSnapshot>) {
        let _ = self.inner.delivery_tx.send((event_class.to_owned(), batch));
    }

    fn check_online(&self) -> Result<(), BrokerError> {
        if self.inner.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable)
        }
    }

    fn materialize(class: &str, object: &ObjectDef) -> BTreeMap<String, DynamicValue> {
        let mut fields = object.fields.clone();
        if object.class_identity {
            fields.insert(CLASS_FIELD.to_owned(), DynamicValue::from(class));
        }
        if let Some(path) = &object.path {
            fields.insert(PATH_FIELD.to_owned(), DynamicValue::from(path.clone()));
        }
        fields
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for MemoryBroker {
    fn query(&self, query: &Query) -> Result<Vec<ObjectHandle>, BrokerError> {
        self.check_online()?;
        let store = self
            .inner
            .store
            .lock()
            .map_err(|_| BrokerError::Invocation("broker state poisoned".into()))?;

        // An unknown class is an empty result, not a failure: the caller's
        // selector simply matched nothing.
        let Some(class_def) = store.get(query.class()) else {
            return Ok(Vec::new());
        };

        let mut matches = Vec::new();
        for object in &class_def.objects {
            let fields = Self::materialize(query.class(), object);
            if query.matches(&fields) {
                matches.push(ObjectHandle::new(
                    ObjectSnapshot { fields },
                    self.inner.ledger.acquire(),
                ));
            }
        }
        Ok(matches)
    }

    fn class(&self, name: &str) -> Result<ClassHandle, BrokerError> {
        self.check_online()?;
        let store = self
            .inner
            .store
            .lock()
            .map_err(|_| BrokerError::Invocation("broker state poisoned".into()))?;
        let class_def = store.get(name).ok_or(BrokerError::Malformed("class"))?;
        let methods = class_def
            .methods
            .iter()
            .map(|(name, def)| {
                (name.clone(), MethodSignature { inputs: def.inputs.clone() })
            })
            .collect();
        Ok(ClassHandle::new(name, methods, self.inner.ledger.acquire()))
    }

    fn exec_method(
        &self,
        path: &str,
        method: &str,
        inputs: Option<&ArgumentBag>,
    ) -> Result<OutParams, BrokerError> {
        self.check_online()?;

        // Resolve the handler under the lock, run it outside: handlers are
        // free to call back into the broker.
        let handler = {
            let store = self
                .inner
                .store
                .lock()
                .map_err(|_| BrokerError::Invocation("broker state poisoned".into()))?;
            let class_def = store
                .values()
                .find(|def| def.objects.iter().any(|o| o.path.as_deref() == Some(path)))
                .ok_or(BrokerError::NotFound)?;
            let def = class_def
                .methods
                .get(method)
                .ok_or_else(|| BrokerError::MethodUnknown(method.to_owned()))?;
            Arc::clone(&def.handler)
        };

        let reply = (*handler)(MethodCall { path, args: inputs })
            .map_err(|err| BrokerError::Invocation(err.to_string()))?;
        Ok(OutParams::new(reply.fields, self.inner.ledger.acquire()))
    }

    fn subscribe(
        &self,
        query: &Query,
        sink: Arc<NotificationSink>,
    ) -> Result<SubscriptionId, BrokerError> {
        self.check_online()?;
        let id = self.inner.next_sub.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subs
            .lock()
            .map_err(|_| BrokerError::Invocation("broker state poisoned".into()))?
            .insert(id, SubEntry { query: query.clone(), sink });
        Ok(SubscriptionId(id))
    }

    fn cancel(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        self.check_online()?;
        let removed = self
            .inner
            .subs
            .lock()
            .map_err(|_| BrokerError::Invocation("broker state poisoned".into()))?
            .remove(&id.0);
        match removed {
            Some(_) => Ok(()), // the broker's sink reference drops here
            None => Err(BrokerError::Invocation(format!("unknown subscription {}", id.0))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_materializes_identity_fields() {
        let broker = MemoryBroker::new();
        broker.add_object("Disk", ObjectDef::at("Disk.Name=\"C:\"").field("Name", "C:"));

        let handles = broker.query(&Query::all("Disk")).unwrap();
        assert_eq!(handles.len(), 1);
        let snapshot = handles[0].snapshot();
        assert_eq!(snapshot.class(), Some("Disk"));
        assert_eq!(snapshot.path(), Some("Disk.Name=\"C:\""));
        assert_eq!(snapshot.get("Name").as_str(), Some("C:"));

        drop(handles);
        assert_eq!(broker.outstanding_handles(), 0);
    }

    #[test]
    fn unknown_class_queries_come_back_empty() {
        let broker = MemoryBroker::new();
        assert!(broker.query(&Query::all("Nothing")).unwrap().is_empty());
    }

    #[test]
    fn offline_broker_refuses_everything() {
        let broker = MemoryBroker::offline();
        assert!(matches!(
            broker.query(&Query::all("Disk")),
            Err(BrokerError::Unavailable)
        ));
        broker.set_online(true);
        assert!(broker.query(&Query::all("Disk")).is_ok());
    }

    #[test]
    fn handler_errors_surface_as_invocation_failures() {
        let broker = MemoryBroker::new();
        broker.add_object("Disk", ObjectDef::at("disk-0"));
        broker.define_method("Disk", "Spin", None, |_| anyhow::bail!("spindle jammed"));

        let err = broker.exec_method("disk-0", "Spin", None).unwrap_err();
        assert!(matches!(err, BrokerError::Invocation(ref msg) if msg.contains("spindle")));
        assert_eq!(broker.outstanding_handles(), 0);
    }
}
