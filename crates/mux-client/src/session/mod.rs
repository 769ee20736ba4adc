//! Session implementations

mod loopback;

pub use loopback::{echo_responder, LoopbackFactory, LoopbackSession, Responder};
