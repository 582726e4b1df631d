//! Tests for the command registry.

use modana_core::command::{
    CommandDescriptor, CommandError, CommandRegistry, CommandValue, ParameterSlot, ValueType,
};
use modana_core::event::EventType;
use modana_core::eventbus::EventBus;
use parking_lot::Mutex;
use std::sync::Arc;

fn surf_load(calls: Arc<Mutex<Vec<Vec<CommandValue>>>>) -> CommandDescriptor {
    CommandDescriptor::new("surf.load", move |args| {
        calls.lock().push(args.to_vec());
        Ok(CommandValue::Integer(1))
    })
    .with_description("Load a surface file")
    .param("path", ValueType::String)
    .returns(ValueType::Integer)
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let registry = CommandRegistry::new();
    registry
        .register(CommandDescriptor::new("viewer.reset", |_| Ok(CommandValue::Unit)))
        .unwrap();

    let second = CommandDescriptor::new("viewer.reset", |_| Ok(CommandValue::Boolean(true)))
        .returns(ValueType::Boolean);
    assert_eq!(
        registry.register(second),
        Err(CommandError::DuplicateName("viewer.reset".to_string()))
    );

    // The first registration is untouched.
    assert_eq!(registry.invoke("viewer.reset", vec![]), Ok(CommandValue::Unit));
}

#[test]
fn test_argument_mismatch_does_not_run_handler() {
    let registry = CommandRegistry::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    registry.register(surf_load(calls.clone())).unwrap();

    let err = registry
        .invoke("surf.load", vec![CommandValue::Integer(42)])
        .unwrap_err();
    assert!(matches!(err, CommandError::ArgumentMismatch { ref command, .. } if command == "surf.load"));

    let err = registry.invoke("surf.load", vec![]).unwrap_err();
    assert!(matches!(err, CommandError::ArgumentMismatch { .. }));

    let err = registry
        .invoke("surf.load", vec!["a".into(), "b".into()])
        .unwrap_err();
    assert!(matches!(err, CommandError::ArgumentMismatch { .. }));

    assert!(calls.lock().is_empty());

    assert_eq!(
        registry.invoke("surf.load", vec!["lh.white".into()]),
        Ok(CommandValue::Integer(1))
    );
    assert_eq!(calls.lock().len(), 1);
}

#[test]
fn test_defaults_fill_trailing_arguments() {
    let registry = CommandRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    registry
        .register(
            CommandDescriptor::new("filter.apply", move |args| {
                log.lock().push(args.to_vec());
                Ok(CommandValue::Unit)
            })
            .param("dataset", ValueType::String)
            .optional_param("low", ValueType::Float, 1.0)
            .with_parameter(ParameterSlot::optional("high", ValueType::Float, 40.0)),
        )
        .unwrap();

    registry.invoke("filter.apply", vec!["raw".into()]).unwrap();
    registry
        .invoke("filter.apply", vec!["raw".into(), CommandValue::Float(0.5)])
        .unwrap();

    let seen = seen.lock();
    assert_eq!(
        seen[0],
        vec![CommandValue::from("raw"), CommandValue::Float(1.0), CommandValue::Float(40.0)]
    );
    assert_eq!(
        seen[1],
        vec![CommandValue::from("raw"), CommandValue::Float(0.5), CommandValue::Float(40.0)]
    );
}

#[test]
fn test_handler_error_is_handler_failed() {
    let registry = CommandRegistry::new();
    registry
        .register(CommandDescriptor::new("io.read", |_| {
            Err(anyhow::anyhow!("file is locked"))
        }))
        .unwrap();

    match registry.invoke("io.read", vec![]) {
        Err(CommandError::HandlerFailed { command, message }) => {
            assert_eq!(command, "io.read");
            assert!(message.contains("file is locked"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_unregister_is_idempotent() {
    let registry = CommandRegistry::new();
    registry
        .register(CommandDescriptor::new("a.b", |_| Ok(CommandValue::Unit)))
        .unwrap();

    assert!(registry.unregister("a.b"));
    assert!(!registry.unregister("a.b"));
    assert!(!registry.unregister("never.registered"));
    assert_eq!(
        registry.invoke("a.b", vec![]),
        Err(CommandError::NotFound("a.b".to_string()))
    );
}

#[test]
fn test_list_and_describe() {
    let registry = CommandRegistry::new();
    registry.register(surf_load(Arc::new(Mutex::new(Vec::new())))).unwrap();
    registry
        .register(CommandDescriptor::new("annot.load", |_| Ok(CommandValue::Unit)))
        .unwrap();

    let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["annot.load", "surf.load"]);

    let sig = registry.describe("surf.load").unwrap();
    assert_eq!(sig.description, "Load a surface file");
    assert_eq!(sig.to_string(), "surf.load(path: string) -> integer");
    assert!(registry.describe("missing").is_none());
}

#[test]
fn test_registration_events() {
    let bus = Arc::new(EventBus::new());
    let registry = CommandRegistry::new().with_event_bus(bus.clone());
    let mut registered = bus.subscribe_channel(EventType::COMMAND_REGISTERED);
    let mut removed = bus.subscribe_channel(EventType::COMMAND_UNREGISTERED);

    registry
        .register(CommandDescriptor::new("x.y", |_| Ok(CommandValue::Unit)))
        .unwrap();
    registry.unregister("x.y");
    registry.unregister("x.y");

    assert!(registered.try_recv().is_some());
    assert!(removed.try_recv().is_some());
    assert!(removed.try_recv().is_none());
}
