use std::fmt;

/// Identity of one registered subscription inside an event dispatcher.
///
/// Ids are handed out from a monotonic counter, so ordering by id is
/// registration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The id that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}
