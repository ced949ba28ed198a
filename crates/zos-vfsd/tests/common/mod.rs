//! Shared harness for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use zos_vfsd::testing::LoopbackTransport;
use zos_vfsd::{DispatchTable, Endpoint, Message, Vfsd, VfsdConfig};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A daemon with its message loop running on a background thread.
pub struct Harness {
    pub vfsd: Arc<Vfsd>,
    pub transport: Arc<LoopbackTransport>,
    runner: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn start(config: VfsdConfig, table: DispatchTable) -> Self {
        init_logging();
        let transport = Arc::new(LoopbackTransport::new());
        let vfsd = Arc::new(
            Vfsd::start(config, transport.clone(), table).expect("daemon should start"),
        );
        let runner = {
            let vfsd = vfsd.clone();
            thread::spawn(move || vfsd.run())
        };
        Self {
            vfsd,
            transport,
            runner: Some(runner),
        }
    }

    pub fn with_workers(workers: usize, table: DispatchTable) -> Self {
        Self::start(VfsdConfig::with_workers(workers), table)
    }

    /// Send a request from `client` to the daemon.
    pub fn call(&self, client: i32, call_nr: i32) {
        self.call_with(client, call_nr, Vec::new());
    }

    pub fn call_with(&self, client: i32, call_nr: i32, payload: Vec<u8>) {
        self.transport
            .inject(Message::request(Endpoint(client), call_nr, payload));
    }

    /// First reply sent to `client`.
    pub fn reply_to(&self, client: i32) -> Message {
        self.replies_to(client, 1).remove(0)
    }

    /// First `count` replies sent to `client`.
    pub fn replies_to(&self, client: i32, count: usize) -> Vec<Message> {
        let mut replies = self
            .transport
            .wait_for_sent(Endpoint(client), count, TIMEOUT)
            .unwrap_or_else(|| panic!("no {} replies to client {}", count, client));
        replies.truncate(count);
        replies
    }

    /// Whether anything reaches `endpoint` within a short grace period.
    pub fn quiet(&self, endpoint: Endpoint) -> bool {
        self.transport
            .wait_for_sent(endpoint, 1, Duration::from_millis(100))
            .is_none()
    }

    /// Stop the message loop, leaving the workers running.
    pub fn close(&mut self) {
        self.transport.close();
        if let Some(runner) = self.runner.take() {
            runner.join().expect("message loop panicked");
        }
    }

    /// Stop the message loop and shut the daemon down cleanly.
    pub fn finish(mut self) {
        self.close();
        self.vfsd.shutdown().expect("clean shutdown");
    }
}

/// One-shot barrier a handler can park on until the test opens it.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let open = self.open.lock().unwrap();
        let (open, timeout) = self
            .cond
            .wait_timeout_while(open, TIMEOUT, |open| !*open)
            .unwrap();
        assert!(*open && !timeout.timed_out(), "gate never opened");
    }
}

/// Ordered record of what handlers did.
#[derive(Default)]
pub struct Trace {
    events: Mutex<Vec<String>>,
}

impl Trace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| e == event)
    }
}

/// Poll `cond` until it holds; panic after `TIMEOUT`.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(2));
    }
}
