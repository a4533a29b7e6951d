//! Deterministic test harness for the client agent.
//!
//! [`SimAgent`] drives real [`doorman_core`] sessions against an in-memory
//! bus with no sockets or tasks involved: tests push client datagrams and
//! bus datagrams in, and inspect the datagrams that come out. Because the
//! core is Sans-IO, every scenario runs deterministically.
//!
//! The [`invariants`] module captures the agent's quantified properties
//! (refcount soundness, subscription mirroring, teardown cleanliness) as
//! checks over an [`AgentSnapshot`], so scenario and property tests can
//! assert them after every step.

pub mod invariants;
mod sim;

pub use invariants::{AgentSnapshot, Invariant, InvariantRegistry, InvariantResult, Violation};
pub use sim::SimAgent;
