//! Testing support.
//!
//! - `LoopbackTransport` - In-memory transport with scripted remote endpoints

mod loopback;

pub use loopback::{LoopbackTransport, Responder};
