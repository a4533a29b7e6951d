//! Client agent core logic.
//!
//! Everything in this crate is pure state-machine code in the action
//! pattern: handlers take an event plus the shared registries and return a
//! list of [`SessionAction`]s for the runtime to execute. No sockets, no
//! clocks, no logging side effects. The runtime (or a test harness) owns
//! all of that, which is what makes every protocol path deterministic and
//! directly testable.
//!
//! # Components
//!
//! - [`ChannelAllocator`]: hands out and recycles identity channels
//! - [`VisibilityTable`]: process-wide refcounted map of known objects
//! - [`UberdogRegistry`]: immutable catalog of well-known objects
//! - [`SchemaRegistry`]: classes, typed fields, send permissions
//! - [`ClientSession`]: the per-connection state machine and its interest
//!   engine

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod allocator;
mod interest;
mod schema;
mod session;
mod uberdog;
mod visibility;

pub use allocator::ChannelAllocator;
pub use interest::{Interest, ZoneState};
pub use schema::{ClassSpec, FieldSpec, FieldType, SchemaError, SchemaRegistry};
pub use session::{
    ClientSession, LogLevel, SessionAction, SessionContext, SessionState, Violation,
};
pub use uberdog::{Uberdog, UberdogRegistry};
pub use visibility::{DistributedObject, VisibilityTable};
