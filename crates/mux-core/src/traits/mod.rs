//! Core trait definitions

mod destination;
mod session;

pub use destination::Destination;
pub use session::{noop, CloseCallback, Session, SessionFactory, SessionListener, StreamListener};
