//! Connects against real loopback sockets through the tokio-backed platform.

use std::cell::RefCell;
use std::net::{SocketAddr, TcpListener};
use std::rc::Rc;
use std::time::Duration;

use pgmux_fiber::{ConnectError, Io, Scheduler, TokioPlatform};

fn connect(addr: SocketAddr) -> Result<(), ConnectError> {
    let scheduler = Scheduler::new(TokioPlatform::new().unwrap());
    let outcome = Rc::new(RefCell::new(None));
    let slot = outcome.clone();
    scheduler.spawn(move |handle| async move {
        let io = Io::new(&handle);
        let result = io.connect(addr, Some(Duration::from_secs(5))).await;
        if result.is_ok() {
            assert!(io.is_connected());
        }
        *slot.borrow_mut() = Some(result);
    });
    scheduler.run().unwrap();
    outcome.borrow_mut().take().unwrap()
}

#[test]
fn test_connect_to_listening_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    assert!(connect(addr).is_ok());
}

#[test]
fn test_connect_refused() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    match connect(addr) {
        Err(ConnectError::Failed(kind)) => {
            assert_eq!(kind, std::io::ErrorKind::ConnectionRefused);
        }
        other => panic!("expected refusal, got {other:?}"),
    }
}

#[test]
fn test_sleep_uses_wall_clock() {
    let scheduler = Scheduler::new(TokioPlatform::new().unwrap());
    scheduler.spawn(|handle| async move {
        let start = handle.now();
        handle.sleep(Duration::from_millis(20)).await.unwrap();
        assert!(handle.now() - start >= Duration::from_millis(20));
    });
    scheduler.run().unwrap();
}
