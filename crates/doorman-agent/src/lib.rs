//! Doorman client agent runtime.
//!
//! Production glue around [`doorman_core`]'s pure session logic: a tokio
//! TCP acceptor, 2-byte length-prefixed datagram framing, the
//! [`PubSubBus`] seam with an in-process implementation, and TOML
//! configuration. The [`ClientAgent`] supervisor owns the shared
//! registries and executes the actions each session handler returns.
//!
//! # Architecture
//!
//! - [`ClientAgent`]: acceptor + shared state + per-connection tasks
//! - [`PubSubBus`] / [`InProcessBus`]: the message-director seam
//! - [`AgentConfig`]: bind address, version, channel range, schema,
//!   uberdogs
//!
//! The real message director is an external service; deployments bridge
//! [`PubSubBus`] to it. The in-process implementation serves single-process
//! setups and the test harness.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod bus;
pub mod codec;
mod config;
mod error;

pub use agent::ClientAgent;
pub use bus::{InProcessBus, PubSubBus};
pub use config::{AgentConfig, ChannelRange, ClassDef, FieldDef, UberdogDef};
pub use error::AgentError;
