//! Pseudo-terminal Tests
//!
//! Validates the master/slave shim over two unbuffered pipes.

use ipc::{DevCtl, ErrorCode, IoArgs, IoMode, OpenFlags, Operation};
use services_posix::PTMX_PATH;
use std::thread;
use tests_posix::{assert_parked, pty_slave_path, send_async, test_bootstrap, wait_reply};

/// Test: Bytes cross the pair in both directions once unlocked
#[test]
fn test_pty_round_trip() {
    let (kernel, server, client) = test_bootstrap();
    let master = client.open_path(PTMX_PATH, OpenFlags::read_write()).unwrap();
    let path = pty_slave_path(&server, master).expect("No slave path");
    assert!(path.starts_with("/dev/pts/"));

    let slave = client.lookup(&path).unwrap();
    let err = client.open(slave, OpenFlags::read_write()).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::PermissionDenied));

    client.devctl(master, DevCtl::Unlock).unwrap();
    client.open(slave, OpenFlags::read_write()).unwrap();

    // Master to slave: the write parks until the slave reads.
    let typed = send_async(&kernel, master, Operation::Write(IoArgs::write(b"ls\n".to_vec())));
    assert_parked(&typed);
    assert_eq!(client.read(slave, 16, IoMode::Blocking).unwrap(), b"ls\n");
    assert_eq!(wait_reply(&typed).result, Ok(3));

    // Slave to master, with the reader waiting first.
    let output = thread::spawn({
        let client = client.clone();
        move || client.read(master, 16, IoMode::Blocking)
    });
    assert_eq!(client.write(slave, b"a.txt\n", IoMode::Blocking).unwrap(), 6);
    assert_eq!(output.join().unwrap().unwrap(), b"a.txt\n");
}

/// Test: Slave open and close follow the lock and open state
#[test]
fn test_slave_permissions() {
    let (_kernel, server, client) = test_bootstrap();
    let master = client.open_path(PTMX_PATH, OpenFlags::read_write()).unwrap();
    let slave = client
        .lookup(&pty_slave_path(&server, master).unwrap())
        .unwrap();

    let err = client.close(slave, OpenFlags::read_write()).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::PermissionDenied));

    client.devctl(master, DevCtl::Unlock).unwrap();
    let err = client.devctl(master, DevCtl::Unlock).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));

    client.open(slave, OpenFlags::read_write()).unwrap();
    let err = client.open(slave, OpenFlags::read_write()).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::PermissionDenied));

    client.close(slave, OpenFlags::read_write()).unwrap();
    client.open(slave, OpenFlags::read_write()).unwrap();
}

/// Test: Each open of the multiplexer makes an independent pair
#[test]
fn test_independent_pairs() {
    let (_kernel, server, client) = test_bootstrap();
    let first = client.open_path(PTMX_PATH, OpenFlags::read_write()).unwrap();
    let second = client.open_path(PTMX_PATH, OpenFlags::read_write()).unwrap();
    assert_ne!(first, second);
    assert_ne!(
        pty_slave_path(&server, first).unwrap(),
        pty_slave_path(&server, second).unwrap()
    );
}

/// Test: Closing the master tears the whole pair down
#[test]
fn test_master_close_tears_down_pair() {
    let (kernel, server, client) = test_bootstrap();
    let baseline = server.context().registry().len();

    let master = client.open_path(PTMX_PATH, OpenFlags::read_write()).unwrap();
    let path = pty_slave_path(&server, master).unwrap();
    let slave = client.lookup(&path).unwrap();
    client.devctl(master, DevCtl::Unlock).unwrap();
    client.open(slave, OpenFlags::read_write()).unwrap();

    let reader = send_async(&kernel, slave, Operation::Read(IoArgs::read(8)));
    assert_parked(&reader);

    client.close(master, OpenFlags::read_write()).unwrap();
    assert_eq!(wait_reply(&reader).result, Err(ErrorCode::BrokenPipe));
    assert!(client.lookup(&path).is_err());

    let err = client.read(slave, 8, IoMode::Blocking).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotFound));
    assert_eq!(server.context().registry().len(), baseline);
}
