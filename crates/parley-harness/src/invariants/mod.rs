//! Delivery invariants.
//!
//! Invariants are properties that must always hold, whatever sequence of
//! messages, presence changes and failures led to the current state.
//!
//! # Architecture
//!
//! A [`DeliverySnapshot`] captures stored messages, their participant sets
//! and status rows, plus every broadcast a connection observed. Registered
//! [`Invariant`]s are checked against it.
//!
//! # Usage
//!
//! ```ignore
//! let snapshot = DeliverySnapshot::capture(&storage, &[conversation_id], observed)?;
//! InvariantRegistry::standard().assert_all(&snapshot, "after burst");
//! ```

mod checks;
mod snapshot;

pub use checks::{BroadcastsBackedByStatus, RecipientsMatchParticipants, StatusRowsComplete};
pub use snapshot::{DeliverySnapshot, MessageSnapshot, ObservedBroadcast};

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

/// A property checked against a [`DeliverySnapshot`].
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &DeliverySnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
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
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Invariants that hold whether or not storage calls fail.
    ///
    /// Includes:
    /// - [`BroadcastsBackedByStatus`]: nothing observed without status rows
    /// - [`RecipientsMatchParticipants`]: recipient lists match membership
    /// - [`StatusRowsComplete`]: every stored message has all its rows
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(BroadcastsBackedByStatus);
        registry.add(RecipientsMatchParticipants);
        registry.add(StatusRowsComplete);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, state: &DeliverySnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &DeliverySnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
