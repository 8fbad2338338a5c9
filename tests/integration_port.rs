//! Port handle behaviour against the mock driver.

mod common;

use common::{mock_driver, open_mock_port};
use pretty_assertions::assert_eq;
use serial_bridge::native::{
    ClearBuffers, MockDevice, MockDriver, OpenMode, Transport, SP_ERR_FAIL,
};
use serial_bridge::port::{FlowControl, Parity, PortConfig};
use serial_bridge::{AsyncPortIo, SerialError, SerialPort};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_write_three_bytes() {
    let driver = mock_driver(&["MOCK0"]);
    let port = open_mock_port(&driver, "MOCK0", OpenMode::Write);

    let written = port.write(&[0x01, 0x02, 0x03], None).unwrap();

    assert_eq!(written, 3);
    assert_eq!(driver.write_log("MOCK0"), vec![vec![0x01, 0x02, 0x03]]);
}

#[test]
fn test_partial_write_is_reported_not_raised() {
    let driver = mock_driver(&["MOCK0"]);
    let port = open_mock_port(&driver, "MOCK0", OpenMode::ReadWrite);
    driver.set_write_limit("MOCK0", Some(4));

    let written = port
        .write(b"0123456789", Some(Duration::from_millis(100)))
        .unwrap();
    assert_eq!(written, 4);
}

#[test]
fn test_read_returns_only_available_bytes() {
    let driver = mock_driver(&["MOCK0"]);
    let port = open_mock_port(&driver, "MOCK0", OpenMode::Read);
    driver.enqueue_read("MOCK0", b"OK\r\n");

    assert_eq!(port.input_waiting().unwrap(), 4);
    assert_eq!(port.read(64, None).unwrap(), b"OK\r\n");
    assert_eq!(port.read(64, None).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_failed_call_surfaces_driver_record() {
    let driver = mock_driver(&["MOCK0"]);
    let port = open_mock_port(&driver, "MOCK0", OpenMode::ReadWrite);
    driver.fail_next("blocking_write", SP_ERR_FAIL, 110, "Connection timed out");

    let err = port.write(b"x", Some(Duration::from_millis(5))).unwrap_err();
    match err {
        SerialError::NativeCall { code, message } => {
            assert_eq!(code, 110);
            assert_eq!(message, "Connection timed out");
        }
        other => panic!("Expected NativeCall error, got: {:?}", other),
    }
}

#[test]
fn test_dispose_twice_is_state_error() {
    let driver = mock_driver(&["MOCK0"]);
    let mut port = SerialPort::with_driver(driver.clone(), "MOCK0").unwrap();
    let token = port.token();

    port.dispose().unwrap();
    assert!(port.is_disposed());
    assert!(matches!(port.dispose(), Err(SerialError::State(_))));

    drop(port);
    assert_eq!(driver.free_count(token), 1);
    assert_eq!(driver.live_ports(), 0);
}

#[test]
fn test_copies_are_freed_independently() {
    let driver = mock_driver(&["MOCK0"]);
    let original = SerialPort::with_driver(driver.clone(), "MOCK0").unwrap();
    let copies: Vec<SerialPort> = (0..3).map(|_| original.copy().unwrap()).collect();
    assert_eq!(driver.live_ports(), 4);

    drop(original);
    assert_eq!(driver.live_ports(), 3);
    drop(copies);
    assert_eq!(driver.live_ports(), 0);
}

#[test]
fn test_usb_info_snapshot_serializes() {
    let driver = Arc::new(MockDriver::new());
    driver.add_device(
        MockDevice::new("ttyACM0")
            .description("Arduino Uno")
            .usb(0x2341, 0x0043, 3, 12)
            .usb_strings("Arduino (www.arduino.cc)", "Uno", "8573531303235"),
    );
    let port = SerialPort::with_driver(driver, "ttyACM0").unwrap();

    let info = port.info().unwrap();
    assert_eq!(info.transport, Transport::Usb);
    assert_eq!(info.vendor_id, Some(0x2341));
    assert_eq!(info.usb_bus, Some(3));
    assert_eq!(info.mac_address, None);

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["transport"], "usb");
    assert_eq!(json["product"], "Uno");
    assert!(json.get("mac_address").is_none());
}

#[test]
fn test_config_get_mutate_set_round_trip() {
    let driver = mock_driver(&["MOCK0"]);
    let port = open_mock_port(&driver, "MOCK0", OpenMode::ReadWrite);

    let wanted = port
        .config()
        .unwrap()
        .with_baud_rate(57600)
        .with_parity(Parity::Even)
        .with_flow_control(FlowControl::Hardware);
    port.set_config(&wanted).unwrap();

    let actual: PortConfig = port.config().unwrap();
    assert_eq!(actual, wanted);
    assert_eq!(actual.flow_control(), FlowControl::Hardware);
}

#[test]
fn test_flush_records_selector() {
    let driver = mock_driver(&["MOCK0"]);
    let port = open_mock_port(&driver, "MOCK0", OpenMode::ReadWrite);
    port.flush(ClearBuffers::Both).unwrap();
    port.flush(ClearBuffers::Output).unwrap();
    assert_eq!(
        driver.flushes("MOCK0"),
        vec![ClearBuffers::Both, ClearBuffers::Output]
    );
}

#[test]
fn test_io_on_closed_port_fails() {
    let driver = mock_driver(&["MOCK0"]);
    let mut port = open_mock_port(&driver, "MOCK0", OpenMode::ReadWrite);
    port.close().unwrap();
    assert!(matches!(
        port.read(1, None),
        Err(SerialError::NativeCall { .. })
    ));
}

#[test]
fn test_vanished_device_fails_lookup() {
    let driver = mock_driver(&["MOCK0"]);
    driver.remove_device("MOCK0");
    assert!(SerialPort::with_driver(driver, "MOCK0").is_err());
}

#[tokio::test]
async fn test_async_write_then_read() {
    let driver = mock_driver(&["MOCK0"]);
    let port = open_mock_port(&driver, "MOCK0", OpenMode::ReadWrite);

    let written = port
        .write_async(b"AT\r\n", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(written, 4);

    driver.enqueue_read("MOCK0", b"OK\r\n");
    let reply = port.read_async(16, None).await.unwrap();
    assert_eq!(reply, b"OK\r\n");
}

#[tokio::test]
async fn test_concurrent_async_writes_on_copies() {
    let driver = mock_driver(&["MOCK0"]);
    let a = open_mock_port(&driver, "MOCK0", OpenMode::Write);
    let mut b = a.copy().unwrap();
    b.open(OpenMode::Write).unwrap();

    let (ra, rb) = tokio::join!(a.write_async(b"aa", None), b.write_async(b"bbb", None));
    assert_eq!(ra.unwrap() + rb.unwrap(), 5);
    assert_eq!(driver.write_log("MOCK0").len(), 2);
}
