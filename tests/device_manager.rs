mod common;

use std::time::Duration;

use common::{settings, ScriptedPort};
use projector_bridge_lib::commands::{CommandHandler, OperationRegistry};
use projector_bridge_lib::device::{self, DeviceError, DeviceFile, DeviceManager};
use projector_bridge_lib::serial::SerialError;

/// Answers power queries with "on" and acknowledges everything else.
fn projector() -> ScriptedPort {
    ScriptedPort::new(|frame| {
        if frame[7] == 0x02 && frame[9..11] == [0x00, 0x60] {
            vec![vec![0x1d, 0x01, 0x00]]
        } else {
            vec![vec![0x06]]
        }
    })
}

async fn connected() -> DeviceManager {
    let manager = DeviceManager::new(device::builtin("x55").unwrap());
    let (transport, _) = projector().into_interface(settings());
    manager.attach(transport).await.unwrap();
    manager
}

#[derive(Default)]
struct Collecting(Vec<CommandHandler>);

impl OperationRegistry for Collecting {
    type Error = std::convert::Infallible;

    fn register(&mut self, handler: CommandHandler) -> Result<(), Self::Error> {
        self.0.push(handler);
        Ok(())
    }
}

#[test]
fn test_builtin_lookup() {
    let x55 = device::builtin("X55").unwrap();
    assert_eq!(x55.name(), "x55");
    assert_eq!(x55.settings().baud_rate, 19200);
    assert_eq!(x55.settings().read_timeout, Duration::from_millis(100));

    assert!(matches!(
        device::builtin("x99"),
        Err(DeviceError::UnknownDevice(_))
    ));
}

#[tokio::test]
async fn test_invoke_decodes_labelled_reply() {
    let manager = connected().await;

    let reply = manager.invoke("power-get").await.unwrap();
    assert_eq!(reply.message, "1d0100");
    assert_eq!(reply.label.as_deref(), Some("on"));
    assert!(!reply.truncated);

    let reply = manager.invoke("power-on").await.unwrap();
    assert_eq!(reply.message, "06");
    assert_eq!(reply.label, None);
}

#[tokio::test]
async fn test_invoke_unknown_operation() {
    let manager = connected().await;
    assert!(matches!(
        manager.invoke("power-sideways").await,
        Err(DeviceError::UnknownOperation(id)) if id == "power-sideways"
    ));
}

#[tokio::test]
async fn test_invoke_without_transport() {
    let manager = DeviceManager::new(device::builtin("x55").unwrap());
    assert!(matches!(
        manager.invoke("power-on").await,
        Err(DeviceError::NotConnected)
    ));
}

#[tokio::test]
async fn test_attach_twice_rejected() {
    let manager = connected().await;
    let (second, _) = projector().into_interface(settings());
    assert!(matches!(
        manager.attach(second).await,
        Err(DeviceError::AlreadyConnected)
    ));
}

#[tokio::test]
async fn test_register_with_hands_over_every_operation() {
    let manager = connected().await;
    let mut registry = Collecting::default();

    let count = manager.register_with(&mut registry).await.unwrap();
    assert_eq!(count, manager.descriptor().commands().len());
    assert_eq!(registry.0.len(), count);

    let handler = registry
        .0
        .iter()
        .find(|h| h.descriptor().path == "/input/s-video")
        .unwrap();
    assert_eq!(handler.call().await.unwrap().message, "06");
}

#[tokio::test]
async fn test_failed_call_reports_frame() {
    let manager = connected().await;
    let handlers = manager.handlers().await.unwrap();
    manager.disconnect().await.unwrap();

    let power_on = handlers
        .iter()
        .find(|h| h.descriptor().id == "power-on")
        .unwrap();
    let err = power_on.call().await.unwrap_err();
    assert_eq!(err.operation, "power-on");
    assert_eq!(err.frame.to_hex(), "beef030600bad2010000600100");
    assert!(matches!(err.source, SerialError::Closed));
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let manager = connected().await;
    manager.shutdown(Duration::from_millis(100)).await.unwrap();
    manager.shutdown(Duration::from_millis(100)).await.unwrap();
    assert!(!manager.is_connected().await);
    assert!(matches!(
        manager.disconnect().await,
        Err(DeviceError::NotConnected)
    ));
}

#[test]
fn test_device_file() {
    let json = r#"{
        "name": "bench",
        "baud_rate": 9600,
        "commands": [
            { "name": "Freeze", "self_describing": true, "actions": [
                { "kind": "generic", "op": "execute",
                  "input": { "crc": "83d2", "class": "0030", "code": "0200" } }
            ] }
        ]
    }"#;
    let file: DeviceFile = serde_json::from_str(json).unwrap();
    let descriptor = file.into_descriptor().unwrap();

    assert_eq!(descriptor.settings().baud_rate, 9600);
    assert_eq!(descriptor.settings().read_timeout, Duration::from_millis(100));
    assert_eq!(descriptor.commands()[0].id(), "freeze-execute");
}

#[tokio::test]
async fn test_connect_to_missing_port_fails() {
    let manager = DeviceManager::new(device::builtin("x55").unwrap());
    match manager.connect("/nonexistent/tty").await {
        Err(DeviceError::SerialError(SerialError::Unavailable { path, .. })) => {
            assert_eq!(path, "/nonexistent/tty")
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert!(!manager.is_connected().await);
}
