//! Synchronization primitives behind the worker event.
//!
//! With the `loom` feature the event is built on loom's model-checked types
//! so `loom_tests` can explore every interleaving of `signal` and `wait`.
//! Only run the loom-filtered tests with that feature enabled; everything
//! else expects real threads.

#[cfg(not(feature = "loom"))]
pub(crate) use std::sync::{Condvar, Mutex};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::{Condvar, Mutex};
