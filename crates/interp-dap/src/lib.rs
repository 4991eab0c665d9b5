//! Debug Adapter Protocol front end for an embedded interpreter.
//!
//! This crate provides:
//! - DAP framing and message types ([`dap`]) and the single outbound channel ([`outbox`]).
//! - The session dispatcher ([`adapter::Adapter`]) that turns requests into calls on an
//!   [`interp_debug::Debugger`].
//! - Engine event handling ([`events`]): per-thread retained stop events and the pump that
//!   turns engine callbacks into `stopped`/`thread`/`terminated` events.
//! - Short-lived frame and variable handles ([`handles`], [`variables`]) and the bounded value
//!   formatter ([`format`]).
//! - The stream/stdio server loop ([`server`]) and helpers for embedding binaries ([`cli`],
//!   [`hardening`]).

pub mod adapter;
pub mod breakpoints;
pub mod cli;
pub mod dap;
pub mod error;
pub mod events;
pub mod format;
pub mod handles;
pub mod hardening;
pub mod outbox;
pub mod server;
pub mod variables;

pub use crate::adapter::{Adapter, AdapterOptions, Flow, Phase};
pub use crate::error::{AdapterError, AdapterResult, TransportError};
pub use crate::outbox::Outbox;
