//! mux-core: Collaborator contracts and configuration for h2mux
//!
//! This crate provides the identifier types, error taxonomy, traits and
//! configuration structures shared by the multiplexer and the session and
//! pool implementations it talks to.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    ConfigError, ConnectionFailure, DispatchError, ExchangeError, PoolError,
    SendFailure, SessionError,
};
pub use types::{ChannelId, ConnectionId, ConnectionStatus, ExchangeId};
