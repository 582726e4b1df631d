//! Tests for point-to-point messaging between extensions.

use modana_core::command::{CommandDescriptor, CommandValue, ValueType};
use modana_core::communicator::{Communicator, CommunicatorError, Message};
use modana_core::config::CoreConfig;
use modana_core::datastore::{ActiveDatasetChanged, DatasetType};
use modana_core::event::{EventType, Payload};
use modana_core::extension::{Extension, ExtensionContext, ExtensionManager, InitError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Answers "selection?" with the current selection.
struct DataSource;

impl Extension for DataSource {
    fn name(&self) -> &str {
        "source"
    }

    fn init(&mut self, ctx: &ExtensionContext) -> Result<(), InitError> {
        ctx.channel().listen(|msg| match msg.kind() {
            "selection?" => Ok(Some(Arc::new(vec![4u32, 8, 15]) as Payload)),
            other => anyhow::bail!("unsupported message {other}"),
        })?;
        Ok(())
    }
}

/// Pushes active-dataset changes to every peer that declared interest.
struct Notifier;

impl Extension for Notifier {
    fn name(&self) -> &str {
        "notifier"
    }

    fn init(&mut self, ctx: &ExtensionContext) -> Result<(), InitError> {
        ctx.channel().listen(|_| Ok(None))?;
        let channel = ctx.channel().clone();
        ctx.subscribe(EventType::ACTIVE_DATASET_CHANGED, move |e| {
            if let Some(change) = e.payload::<ActiveDatasetChanged>() {
                channel.broadcast_to_interested(
                    Message::with_payload("active-changed", change.key.clone()),
                    |caps| caps.contains("active-dataset"),
                )?;
            }
            Ok(())
        });
        Ok(())
    }
}

/// Records pushed keys and asks the source for its selection on demand.
struct Viewer {
    name: &'static str,
    interested: bool,
    pushed: Arc<Mutex<Vec<Option<String>>>>,
}

impl Extension for Viewer {
    fn name(&self) -> &str {
        self.name
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["source".to_string()]
    }

    fn capabilities(&self) -> Vec<String> {
        if self.interested {
            vec!["active-dataset".to_string()]
        } else {
            Vec::new()
        }
    }

    fn init(&mut self, ctx: &ExtensionContext) -> Result<(), InitError> {
        let pushed = self.pushed.clone();
        ctx.channel().listen(move |msg| {
            pushed.lock().push(msg.payload::<Option<String>>().cloned().flatten());
            Ok(None)
        })?;

        let channel = ctx.channel().clone();
        ctx.register_command(
            CommandDescriptor::new(format!("{}.selection", self.name), move |_| {
                let reply = channel.send("source", Message::new("selection?"))?;
                let count = reply
                    .and_then(|r| r.downcast_ref::<Vec<u32>>().map(Vec::len))
                    .unwrap_or(0);
                Ok(CommandValue::Integer(count as i64))
            })
            .returns(ValueType::Integer),
        )?;
        Ok(())
    }
}

fn started() -> (ExtensionManager, Arc<Mutex<Vec<Option<String>>>>, Arc<Mutex<Vec<Option<String>>>>) {
    let plot = Arc::new(Mutex::new(Vec::new()));
    let table = Arc::new(Mutex::new(Vec::new()));

    let mut manager = ExtensionManager::new(CoreConfig::default());
    manager.register_builtin(DataSource).unwrap();
    manager.register_builtin(Notifier).unwrap();
    manager
        .register_builtin(Viewer {
            name: "plot",
            interested: true,
            pushed: plot.clone(),
        })
        .unwrap();
    manager
        .register_builtin(Viewer {
            name: "table",
            interested: false,
            pushed: table.clone(),
        })
        .unwrap();

    let summary = manager.start().unwrap();
    assert!(summary.is_clean(), "{summary}");
    (manager, plot, table)
}

#[test]
fn test_send_reaches_named_extension() {
    let (manager, _, _) = started();
    let commands = &manager.services().commands;

    assert_eq!(commands.invoke("plot.selection", vec![]), Ok(CommandValue::Integer(3)));
    assert_eq!(commands.invoke("table.selection", vec![]), Ok(CommandValue::Integer(3)));
}

#[test]
fn test_broadcast_reaches_only_interested_extensions() {
    let (manager, plot, table) = started();
    let store = &manager.services().datastore;

    store.insert("subjA/lh.white", 1u8, DatasetType::SURFACE);
    store.set_active("subjA/lh.white").unwrap();
    store.remove("subjA/lh.white");

    assert_eq!(
        *plot.lock(),
        vec![Some("subjA/lh.white".to_string()), None]
    );
    assert!(table.lock().is_empty());
}

#[test]
fn test_send_after_target_unloaded() {
    let (mut manager, _, _) = started();
    let outsider = manager
        .services()
        .communicator
        .open("outsider", Vec::<String>::new())
        .unwrap();

    assert!(outsider.send("plot", Message::new("ping")).is_ok());
    manager.unload("plot").unwrap();
    assert_eq!(
        outsider.send("plot", Message::new("ping")).unwrap_err(),
        CommunicatorError::TargetNotActive("plot".to_string())
    );
}

#[test]
fn test_listener_failure_is_reported_to_sender() {
    let comm = Arc::new(Communicator::new());
    let a = comm.open("a", Vec::<String>::new()).unwrap();
    let b = comm.open("b", Vec::<String>::new()).unwrap();
    b.listen(|_| anyhow::bail!("busy")).unwrap();
    comm.set_active("b", true);

    match a.send("b", Message::new("work")) {
        Err(CommunicatorError::HandlerFailed { target, message }) => {
            assert_eq!(target, "b");
            assert!(message.contains("busy"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
