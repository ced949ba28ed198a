//! In-memory transport for tests.
//!
//! Messages injected with [`LoopbackTransport::inject`] come out of
//! `receive` in order. Every `send` is logged; if a responder is installed
//! for the destination it is run and its answer is queued as an incoming
//! message from that endpoint, which is how tests stand in for file-system
//! servers and drivers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use zos_vfsd_ipc::{Endpoint, Message};

use crate::error::TransportError;
use crate::transport::Transport;

/// Scripted remote endpoint: maps a request to an optional answer.
pub type Responder = Arc<dyn Fn(&Message) -> Option<Message> + Send + Sync>;

#[derive(Default)]
struct State {
    inbox: VecDeque<Message>,
    sent: Vec<(Endpoint, Message)>,
    responders: BTreeMap<Endpoint, Responder>,
    dead: BTreeSet<Endpoint>,
    closed: bool,
}

/// In-memory [`Transport`].
#[derive(Default)]
pub struct LoopbackTransport {
    state: Mutex<State>,
    changed: Condvar,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a message for the daemon, as if `msg.source` had sent it.
    pub fn inject(&self, msg: Message) {
        self.state().inbox.push_back(msg);
        self.changed.notify_all();
    }

    /// Answer requests sent to `endpoint` with `responder`.
    pub fn respond_with<F>(&self, endpoint: Endpoint, responder: F)
    where
        F: Fn(&Message) -> Option<Message> + Send + Sync + 'static,
    {
        self.state().responders.insert(endpoint, Arc::new(responder));
    }

    /// Make every later send to `endpoint` fail.
    pub fn kill(&self, endpoint: Endpoint) {
        let mut state = self.state();
        state.dead.insert(endpoint);
        state.responders.remove(&endpoint);
    }

    /// Close the transport: `receive` drains the inbox, then returns `None`.
    pub fn close(&self) {
        self.state().closed = true;
        self.changed.notify_all();
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<(Endpoint, Message)> {
        self.state().sent.clone()
    }

    /// Messages sent to `endpoint`, in order.
    pub fn sent_to(&self, endpoint: Endpoint) -> Vec<Message> {
        self.state()
            .sent
            .iter()
            .filter(|(to, _)| *to == endpoint)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Wait until `count` messages have been sent to `endpoint`.
    ///
    /// Returns them, or `None` on timeout.
    pub fn wait_for_sent(
        &self,
        endpoint: Endpoint,
        count: usize,
        timeout: Duration,
    ) -> Option<Vec<Message>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            let matching: Vec<Message> = state
                .sent
                .iter()
                .filter(|(to, _)| *to == endpoint)
                .map(|(_, msg)| msg.clone())
                .collect();
            if matching.len() >= count {
                return Some(matching);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, to: Endpoint, msg: Message) -> Result<(), TransportError> {
        let responder = {
            let mut state = self.state();
            if state.closed {
                return Err(TransportError::Closed);
            }
            if state.dead.contains(&to) {
                return Err(TransportError::DeadEndpoint(to));
            }
            state.sent.push((to, msg.clone()));
            state.responders.get(&to).cloned()
        };
        self.changed.notify_all();

        if let Some(answer) = responder.and_then(|respond| respond(&msg)) {
            self.inject(Message {
                source: to,
                ..answer
            });
        }
        Ok(())
    }

    fn receive(&self) -> Option<Message> {
        let mut state = self.state();
        loop {
            if let Some(msg) = state.inbox.pop_front() {
                return Some(msg);
            }
            if state.closed {
                return None;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zos_vfsd_ipc::{call, status, CorrelationTag};

    const FS: Endpoint = Endpoint(7);

    #[test]
    fn test_inject_then_receive() {
        let transport = LoopbackTransport::new();
        transport.inject(Message::request(Endpoint(100), call::VFS_READ, vec![]));
        let msg = transport.receive().unwrap();
        assert_eq!(msg.source, Endpoint(100));
        transport.close();
        assert!(transport.receive().is_none());
    }

    #[test]
    fn test_responder_answers_as_endpoint() {
        let transport = LoopbackTransport::new();
        transport.respond_with(FS, |req| Some(req.reply(status::OK, vec![9])));

        let tag = CorrelationTag::new(0, 1);
        let request = Message::request(Endpoint(1), call::REQ_LOOKUP, vec![]).with_tag(tag);
        transport.send(FS, request).unwrap();

        let reply = transport.receive().unwrap();
        assert_eq!(reply.source, FS);
        assert_eq!(reply.tag, Some(tag));
        assert_eq!(reply.payload, vec![9]);
        assert_eq!(transport.sent_to(FS).len(), 1);
    }

    #[test]
    fn test_dead_endpoint_refuses() {
        let transport = LoopbackTransport::new();
        transport.kill(FS);
        assert_eq!(
            transport.send(FS, Message::request(Endpoint(1), call::REQ_READ, vec![])),
            Err(TransportError::DeadEndpoint(FS))
        );
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_wait_for_sent_times_out() {
        let transport = LoopbackTransport::new();
        assert!(transport
            .wait_for_sent(FS, 1, Duration::from_millis(20))
            .is_none());
    }
}
