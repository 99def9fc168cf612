use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jsonwatch::ingest::{Disconnect, ReaderOptions};
use jsonwatch::{EditError, Event, Origin, Session, SessionError};
use serde_json::json;

/// Read half of an in-memory serial link. Times out like a port with a read
/// timeout and reports end of stream once the device side hangs up.
struct Pipe {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(bytes) => self.pending = bytes,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"));
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Write half; everything written stays inspectable.
#[derive(Clone, Default)]
struct Wire(Arc<Mutex<Vec<u8>>>);

impl Wire {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Wire {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Unplugged;

impl Write for Unplugged {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn link() -> (Sender<Vec<u8>>, Pipe) {
    let (tx, rx) = mpsc::channel();
    (tx, Pipe { rx, pending: Vec::new() })
}

fn poll_until(session: &mut Session, applied: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut total = 0;
    while total < applied {
        assert!(Instant::now() < deadline, "timed out after {total} lines");
        total += session.poll().unwrap().applied;
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn lines_arrive_in_order_across_chunks() {
    let (device, pipe) = link();
    let mut session = Session::new();
    session.connect(pipe, Wire::default()).unwrap();

    device.send(b"{\"temp\": 2".to_vec()).unwrap();
    device.send(b"35}\n{\"temp\": 236}\nnot json\n{\"pid\": {\"kp\": 55}}\n".to_vec()).unwrap();
    poll_until(&mut session, 3);

    assert_eq!(session.tree().view(), json!({"temp": 236, "pid": {"kp": 55}}));
    let changes = session
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::ValueChanged { .. }))
        .count();
    assert_eq!(changes, 3);
    assert!(session.disconnect());
}

#[test]
fn each_line_in_one_chunk_is_its_own_cycle() {
    let (device, pipe) = link();
    let mut session = Session::new();
    session.connect(pipe, Wire::default()).unwrap();
    let before = session.tree().cycle();

    device.send(b"{\"a\":1}\n{\"b\":1}\n".to_vec()).unwrap();
    poll_until(&mut session, 2);

    let tree = session.tree();
    assert_eq!(tree.cycle(), before + 2);
    assert!(!tree.item(tree.resolve("a").unwrap()).unwrap().fresh);
    assert!(tree.item(tree.resolve("b").unwrap()).unwrap().fresh);
}

#[test]
fn edits_go_out_and_mirror_locally() {
    let (_device, pipe) = link();
    let wire = Wire::default();
    let mut session = Session::new();
    session
        .load_config_str(r#"{"kp": {"type": "int", "scalefactor": 10, "min": 0, "max": 100},
                             "settings": {"children": {"kd": {"type": "float", "readonly": true}}}}"#)
        .unwrap();
    session.connect(pipe, wire.clone()).unwrap();

    assert!(matches!(session.edit("kp", 150.0), Err(EditError::OutOfRange { .. })));
    assert_eq!(session.edit("settings/kd", 1.0), Err(EditError::ReadOnly("settings/kd".into())));
    assert_eq!(wire.text(), "");

    let edit = session.edit("kp", 5.5).unwrap();
    assert_eq!(wire.text(), "{\"kp\":55}\n");
    let kp = session.tree().item(edit.id).unwrap();
    assert_eq!(kp.value.as_ref().and_then(|v| v.as_f64()), Some(5.5));
    assert!(!kp.fresh);
    assert!(matches!(
        session.drain_events().as_slice(),
        [Event::ValueChanged { origin: Origin::Local, .. }]
    ));

    session.send_reset().unwrap();
    assert_eq!(wire.text(), "{\"kp\":55}\n{\"resetpid\":1}\n");
}

#[test]
fn device_hangup_is_reported_once() {
    let (device, pipe) = link();
    let mut session = Session::new();
    session.connect(pipe, Wire::default()).unwrap();
    device.send(b"{\"t\": 1}\n".to_vec()).unwrap();
    drop(device);

    let deadline = Instant::now() + Duration::from_secs(5);
    let reason = loop {
        assert!(Instant::now() < deadline, "hangup never reported");
        match session.poll() {
            Ok(_) => std::thread::sleep(Duration::from_millis(5)),
            Err(SessionError::ConnectionLost(reason)) => break reason,
            Err(e) => panic!("unexpected {e}"),
        }
    };
    assert_eq!(reason, Disconnect::EndOfStream);
    assert!(!session.is_connected());
    assert_eq!(session.tree().view(), json!({"t": 1}));
    assert_eq!(session.edit("t", 2.0), Err(EditError::NotConnected));
}

#[test]
fn failed_write_drops_the_connection() {
    let (_device, pipe) = link();
    let mut session = Session::new();
    session.apply_line(r#"{"t": 1}"#).unwrap();
    session.connect(pipe, Unplugged).unwrap();
    assert_eq!(session.edit("t", 2.0), Err(EditError::ConnectionLost));
    assert!(!session.is_connected());
    // the edit was not mirrored
    let t = session.tree().item(session.tree().resolve("t").unwrap()).unwrap();
    assert_eq!(t.value.as_ref().and_then(|v| v.as_f64()), Some(1.0));
}

#[test]
fn disconnect_keeps_state_and_allows_reconnect() {
    let (device, pipe) = link();
    let options = ReaderOptions { queue_capacity: 4, ..ReaderOptions::default() };
    let mut session = Session::with_options(options);
    session.connect(pipe, Wire::default()).unwrap();
    assert!(matches!(
        session.connect(link().1, Wire::default()),
        Err(SessionError::AlreadyConnected)
    ));
    device.send(b"{\"t\": 1}\n".to_vec()).unwrap();
    poll_until(&mut session, 1);

    let started = Instant::now();
    assert!(session.disconnect());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(session.tree().len(), 1);

    session.connect(link().1, Wire::default()).unwrap();
    assert!(session.is_connected());
}
