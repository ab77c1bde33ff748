use time::OffsetDateTime;

/// Capability for reading the current instant. Unlock decisions depend on the
/// real clock, so production code takes this as a parameter and tests supply
/// fixed instants.
pub trait TimeProvider: Clone + Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;
}
