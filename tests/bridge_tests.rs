// tests/bridge_tests.rs
//
// Invocation bridge against a scripted in-process broker: error tiers,
// argument marshaling, and the release-every-handle-on-every-exit-path
// invariant, with failure injected at each step of the call sequence.

use std::sync::Arc;
use volmgr::broker::{
    ArgumentBag, Broker, BrokerError, DynamicValue, MemoryBroker, MethodBridge, MethodReply,
    ObjectDef, ParamDef, Query,
};

fn bridge_over(broker: &MemoryBroker) -> MethodBridge {
    MethodBridge::new(Arc::new(broker.clone()) as Arc<dyn Broker>)
}

/// Broker with one volume object and a few scripted methods.
fn scripted_broker() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.add_object(
        "Volume",
        ObjectDef::at("Volume.DriveLetter=\"C:\"").field("DriveLetter", "C:"),
    );

    // Method with declared inputs carrying a broker-side default.
    broker.define_method(
        "Volume",
        "Resize",
        Some(vec![
            ParamDef::absent("NewSize"),
            ParamDef::with_default("Unit", "MB"),
        ]),
        |call| {
            let unit = call.arg("Unit").as_str().unwrap_or("?").to_owned();
            Ok(MethodReply::ok().with("AppliedUnit", unit))
        },
    );

    // Method with no formal input object at all.
    broker.define_method("Volume", "Flush", None, |call| {
        assert!(call.args.is_none(), "no-input method must get no input object");
        Ok(MethodReply::ok())
    });

    // Method returning a failure status as data.
    broker.define_method("Volume", "Eject", None, |_| Ok(MethodReply::status(-2147024891)));

    broker
}

#[test]
fn zero_matches_is_not_found_with_no_outstanding_handles() {
    let broker = scripted_broker();
    let bridge = bridge_over(&broker);

    let err = bridge
        .invoke(
            &Query::where_eq("Volume", "DriveLetter", "Z:"),
            "Flush",
            &ArgumentBag::new(),
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, BrokerError::NotFound));
    assert_eq!(broker.outstanding_handles(), 0);
}

#[test]
fn no_input_method_runs_with_an_empty_bag() {
    let broker = scripted_broker();
    let bridge = bridge_over(&broker);

    let result = bridge
        .invoke(&Query::all("Volume"), "Flush", &ArgumentBag::new(), &[])
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(broker.outstanding_handles(), 0);
}

#[test]
fn caller_inputs_to_a_no_input_method_are_silently_dropped() {
    let broker = scripted_broker();
    let bridge = bridge_over(&broker);

    // "Flush" asserts internally that it receives no input object.
    let inputs = ArgumentBag::new().with("Ignored", "value");
    let result = bridge.invoke(&Query::all("Volume"), "Flush", &inputs, &[]).unwrap();
    assert!(result.succeeded());
}

#[test]
fn declared_parameters_keep_their_defaults_when_not_supplied() {
    let broker = scripted_broker();
    let bridge = bridge_over(&broker);

    let result = bridge
        .invoke(&Query::all("Volume"), "Resize", &ArgumentBag::new(), &["AppliedUnit"])
        .unwrap();
    assert_eq!(result.output("AppliedUnit").as_str(), Some("MB"));

    let result = bridge
        .invoke(
            &Query::all("Volume"),
            "Resize",
            &ArgumentBag::new().with("Unit", "GB"),
            &["AppliedUnit"],
        )
        .unwrap();
    assert_eq!(result.output("AppliedUnit").as_str(), Some("GB"));
}

#[test]
fn unpopulated_requested_outputs_are_absent_not_errors() {
    let broker = scripted_broker();
    let bridge = bridge_over(&broker);

    let result = bridge
        .invoke(
            &Query::all("Volume"),
            "Resize",
            &ArgumentBag::new(),
            &["AppliedUnit", "NoSuchOutput"],
        )
        .unwrap();
    assert!(result.outputs().contains("AppliedUnit"));
    assert!(!result.outputs().contains("NoSuchOutput"));
    assert!(result.output("NoSuchOutput").is_absent());
}

#[test]
fn a_negative_status_is_data_not_a_protocol_failure() {
    let broker = scripted_broker();
    let bridge = bridge_over(&broker);

    let result = bridge
        .invoke(&Query::all("Volume"), "Eject", &ArgumentBag::new(), &[])
        .unwrap();
    assert!(!result.succeeded());
    assert_eq!(result.status().as_int(), Some(-2147024891));
}

#[test]
fn surplus_matches_are_released_after_taking_the_first() {
    let broker = scripted_broker();
    broker.add_object(
        "Volume",
        ObjectDef::at("Volume.DriveLetter=\"D:\"").field("DriveLetter", "D:"),
    );
    let bridge = bridge_over(&broker);

    let result = bridge
        .invoke(&Query::all("Volume"), "Flush", &ArgumentBag::new(), &[])
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(broker.outstanding_handles(), 0);
}

// ───── failure injected at each step of the sequence ───────────────────────

#[test]
fn step1_offline_broker_is_unavailable() {
    let broker = MemoryBroker::offline();
    let bridge = bridge_over(&broker);

    let err = bridge
        .invoke(&Query::all("Volume"), "Flush", &ArgumentBag::new(), &[])
        .unwrap_err();
    assert!(matches!(err, BrokerError::Unavailable));
    assert_eq!(broker.outstanding_handles(), 0);
}

#[test]
fn step2_missing_identity_path_is_malformed() {
    let broker = MemoryBroker::new();
    broker.add_object("Volume", ObjectDef::pathless().field("DriveLetter", "C:"));
    let bridge = bridge_over(&broker);

    let err = bridge
        .invoke(&Query::all("Volume"), "Flush", &ArgumentBag::new(), &[])
        .unwrap_err();
    assert!(matches!(err, BrokerError::Malformed("path")));
    assert_eq!(broker.outstanding_handles(), 0);
}

#[test]
fn step2_missing_class_identity_is_malformed() {
    let broker = MemoryBroker::new();
    broker.add_object("Volume", ObjectDef::at("vol-0").without_class_identity());
    let bridge = bridge_over(&broker);

    let err = bridge
        .invoke(&Query::all("Volume"), "Flush", &ArgumentBag::new(), &[])
        .unwrap_err();
    assert!(matches!(err, BrokerError::Malformed("class")));
    assert_eq!(broker.outstanding_handles(), 0);
}

#[test]
fn step3_unknown_method_is_method_unknown() {
    let broker = scripted_broker();
    let bridge = bridge_over(&broker);

    let err = bridge
        .invoke(&Query::all("Volume"), "Defragment", &ArgumentBag::new(), &[])
        .unwrap_err();
    assert!(matches!(err, BrokerError::MethodUnknown(ref name) if name == "Defragment"));
    assert_eq!(broker.outstanding_handles(), 0);
}

#[test]
fn step4_handler_rejection_is_invocation_failure() {
    let broker = scripted_broker();
    broker.define_method("Volume", "Shred", None, |_| anyhow::bail!("access denied"));
    let bridge = bridge_over(&broker);

    let err = bridge
        .invoke(&Query::all("Volume"), "Shred", &ArgumentBag::new(), &[])
        .unwrap_err();
    assert!(matches!(err, BrokerError::Invocation(ref msg) if msg.contains("access denied")));
    assert_eq!(broker.outstanding_handles(), 0);
}

#[test]
fn success_path_also_leaves_the_ledger_empty() {
    let broker = scripted_broker();
    let bridge = bridge_over(&broker);

    for _ in 0..10 {
        let inputs = ArgumentBag::new().with("NewSize", DynamicValue::Int(4096));
        bridge
            .invoke(&Query::all("Volume"), "Resize", &inputs, &["AppliedUnit"])
            .unwrap();
    }
    assert_eq!(broker.outstanding_handles(), 0);
}
