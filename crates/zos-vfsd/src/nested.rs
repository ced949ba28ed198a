//! Nested-call stack
//!
//! A file-system server answering one of our requests may first call back
//! into the daemon (pass-through mounts). The worker waiting on that server
//! services the callback itself: it saves its current call here, runs the
//! callback as a fresh call, then restores the saved call exactly and goes
//! back to waiting.

use std::mem;

use zos_vfsd_core::NestingError;

use crate::context::CallContext;

/// Saved outer calls of one worker, bounded in depth.
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<CallContext>,
    limit: usize,
}

impl CallStack {
    /// Stack holding at most `limit` saved calls.
    pub fn new(limit: usize) -> Self {
        Self {
            frames: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Save `current` and install `incoming` in its place.
    ///
    /// Fails without touching either context when the stack is full.
    pub fn push(
        &mut self,
        current: &mut CallContext,
        incoming: CallContext,
    ) -> Result<(), NestingError> {
        if self.frames.len() >= self.limit {
            return Err(NestingError::TooDeep { limit: self.limit });
        }
        self.frames.push(mem::replace(current, incoming));
        Ok(())
    }

    /// Restore the most recently saved call into `current`.
    ///
    /// Popping with nothing saved means the push/pop pairing is broken.
    pub fn pop(&mut self, current: &mut CallContext) {
        match self.frames.pop() {
            Some(frame) => *current = frame,
            None => fatal!("CallStack: pop of an empty nested-call stack"),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zos_vfsd_ipc::{call, Endpoint, Message};

    fn context(source: i32, call_nr: i32) -> CallContext {
        CallContext::new(Message::request(Endpoint(source), call_nr, vec![1, 2, 3]))
    }

    #[test]
    fn test_push_pop_restores_exactly() {
        let mut stack = CallStack::new(1);
        let mut current = context(100, call::VFS_OPEN);
        current.path.push_str("/mnt/data/file");
        current.reply.extend_from_slice(b"partial");
        current.credentials.uid = 42;
        let saved = current.clone();

        let incoming = context(7, call::VFS_STAT);
        stack.push(&mut current, incoming.clone()).unwrap();
        assert_eq!(current, incoming);
        assert_eq!(stack.depth(), 1);

        current.path.push_str("/scratch");
        stack.pop(&mut current);
        assert_eq!(current, saved);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_push_beyond_limit_is_rejected() {
        let mut stack = CallStack::new(1);
        let mut current = context(100, call::VFS_OPEN);
        stack.push(&mut current, context(7, call::VFS_STAT)).unwrap();

        let before = current.clone();
        assert_eq!(
            stack.push(&mut current, context(7, call::VFS_READ)),
            Err(NestingError::TooDeep { limit: 1 })
        );
        assert_eq!(current, before);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_deeper_limit() {
        let mut stack = CallStack::new(2);
        let mut current = context(100, call::VFS_OPEN);
        stack.push(&mut current, context(7, call::VFS_STAT)).unwrap();
        stack.push(&mut current, context(8, call::VFS_READ)).unwrap();
        stack.pop(&mut current);
        assert_eq!(current.call_nr, call::VFS_STAT);
        stack.pop(&mut current);
        assert_eq!(current.call_nr, call::VFS_OPEN);
    }

    #[test]
    #[should_panic(expected = "empty nested-call stack")]
    fn test_pop_empty_is_fatal() {
        let mut stack = CallStack::new(1);
        let mut current = context(100, call::VFS_OPEN);
        stack.pop(&mut current);
    }
}
