//! Dynamic method invocation bridge.
//!
//! Every domain operation against the broker — enabling protection, adding or
//! removing a key protector, polling conversion progress — reduces to one
//! call through this bridge with a method name and two small argument bags.
//! There is no per-method compiled contract: method and argument names are
//! caller-supplied strings matched against live class metadata at call time.
//! A typo yields [`BrokerError::MethodUnknown`] or a silently absent output.
//!
//! Concentrating the call sequence here also concentrates the
//! resource-lifetime risk: each step acquires broker-side handles that must
//! be released on every exit path. Handles are drop guards, so an early `?`
//! return releases everything acquired so far.

use super::{ArgumentBag, Broker, BrokerError, DynamicValue, Query};
use std::sync::Arc;

/// Reserved output field carrying the broker's status code for a call.
/// Always read in addition to the caller's requested outputs.
pub const RETURN_VALUE: &str = "ReturnValue";

/// Outcome of one bridged call.
///
/// Holds the reserved status field plus exactly the requested outputs the
/// broker actually populated. A requested name the broker did not populate is
/// simply missing — never an error, and never substituted with a default.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    status: DynamicValue,
    outputs: ArgumentBag,
}

impl InvocationResult {
    /// The broker's status code for the call, as returned. A non-success
    /// status is domain data, not a protocol failure: the broker executed the
    /// call and this is what it said.
    pub fn status(&self) -> &DynamicValue {
        &self.status
    }

    /// True when the status field came back as integer zero.
    pub fn succeeded(&self) -> bool {
        self.status.as_int() == Some(0)
    }

    /// Requested output by name; `Absent` when the broker did not populate it.
    pub fn output(&self, name: &str) -> &DynamicValue {
        self.outputs.get(name)
    }

    pub fn outputs(&self) -> &ArgumentBag {
        &self.outputs
    }
}

/// Invokes named methods with named in/out argument bags against a
/// dynamically typed queried object.
///
/// Synchronous and blocking. Not internally serialized: callers sharing one
/// bridge instance across threads serialize access themselves.
pub struct MethodBridge {
    broker: Arc<dyn Broker>,
}

impl MethodBridge {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        MethodBridge { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Resolve one object by `query`, invoke `method` on it with `inputs`,
    /// and read back `outputs` plus the reserved status field.
    ///
    /// The call sequence:
    /// 1. resolve exactly one object (first match wins; none ⇒ `NotFound`),
    /// 2. read its class identity and identity path (either missing ⇒
    ///    `Malformed`),
    /// 3. look up the method's formal input parameters on the class and
    ///    instantiate them — broker-declared parameters the caller did not
    ///    supply keep their declared default; a method with no formal input
    ///    object silently drops caller inputs,
    /// 4. invoke synchronously against the identity path,
    /// 5. project the requested output names plus [`RETURN_VALUE`].
    ///
    /// Every handle acquired along the way is released when this function
    /// returns, on success and on every failure path alike.
    pub fn invoke(
        &self,
        query: &Query,
        method: &str,
        inputs: &ArgumentBag,
        outputs: &[&str],
    ) -> Result<InvocationResult, BrokerError> {
        log::trace!("invoke {method} via {query}");

        // 1 ─ resolve exactly one object
        let mut matches = self.broker.query(query)?;
        if matches.is_empty() {
            return Err(BrokerError::NotFound);
        }
        let object = matches.swap_remove(0);
        drop(matches); // surplus matches released immediately

        // 2 ─ identity
        let snapshot = object.snapshot();
        let class_name = snapshot.class().ok_or(BrokerError::Malformed("class"))?;
        let path = snapshot.path().ok_or(BrokerError::Malformed("path"))?;

        // 3 ─ formal input parameters
        let class = self.broker.class(class_name)?;
        let signature = class
            .method(method)
            .ok_or_else(|| BrokerError::MethodUnknown(method.to_owned()))?;
        let call_args = signature.inputs.as_ref().map(|params| {
            let mut bag = ArgumentBag::new();
            for param in params {
                bag.insert(param.name.clone(), param.default.clone());
            }
            for (name, value) in inputs.iter() {
                bag.insert(name.clone(), value.clone());
            }
            bag
        });

        // 4 ─ invoke
        let out = self.broker.exec_method(path, method, call_args.as_ref())?;

        // 5 ─ project requested outputs + status
        let mut projected = ArgumentBag::new();
        for name in outputs {
            if *name == RETURN_VALUE {
                continue; // the status field is carried separately
            }
            if let Some(value) = out.get(name) {
                projected.insert(*name, value.clone());
            }
        }
        let status = out.get(RETURN_VALUE).cloned().unwrap_or(DynamicValue::Absent);

        log::debug!("invoke {method} on {path}: status={status}");
        Ok(InvocationResult { status, outputs: projected })
        // 6 ─ object, class and output handles released here by drop
    }
}
