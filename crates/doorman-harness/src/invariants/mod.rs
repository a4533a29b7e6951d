//! Invariant checking for the client agent.
//!
//! Invariants capture properties that must hold after every event, not
//! specific scenarios: refcount soundness, the subscription mirror, and
//! bookkeeping consistency between a session's view and the bus's view.
//! Tests snapshot the simulated agent and run the registry after each
//! step.

mod checks;
mod snapshot;

pub use checks::{BusMirrorsSession, OwnedObjectsKnown, RefcountSoundness, SubscriptionMirror};
pub use snapshot::{AgentSnapshot, ObjectSnapshot, SessionSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property of agent state that must always hold.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &AgentSnapshot) -> InvariantResult;
}

/// Registry of invariants to run together.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with the standard agent invariants.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(RefcountSoundness);
        registry.add(SubscriptionMirror);
        registry.add(BusMirrorsSession);
        registry.add(OwnedObjectsKnown);
        registry
    }

    /// Add an invariant.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    ///
    /// # Errors
    ///
    /// - All violations found, if any invariant failed.
    pub fn check_all(&self, state: &AgentSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with context on violation.
    ///
    /// # Panics
    ///
    /// Panics if any invariant is violated.
    pub fn assert_all(&self, state: &AgentSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(Violation::to_string).collect();
            panic!("invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
