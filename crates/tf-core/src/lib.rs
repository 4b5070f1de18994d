//! Core of the Teleforge bulk engine.
//!
//! This crate is framework-agnostic. The messaging service lives behind the
//! `remote::port::RemoteClient` trait, implemented in adapter crates; media,
//! progress and reports go to the sinks in `sinks`.

pub mod bulk;
pub mod candidates;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod remote;
pub mod sinks;

pub use errors::{Error, Result};
