//! Transaction lifecycle states.

/// The possible states of a transaction. `Active` is the only state that
/// accepts operations; the other two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::RolledBack)
    }

    /// Returns true if the transaction is finished (committed or rolled back).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Moves to a terminal state.
    ///
    /// # Panics
    ///
    /// Panics unless the current state is `Active` and `next` is terminal.
    pub fn finish(&mut self, next: TransactionState) {
        assert!(self.is_active(), "Can only finish active transactions");
        assert!(next.is_finished(), "{} is not a terminal state", next);
        *self = next;
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committed => write!(f, "Committed"),
            Self::RolledBack => write!(f, "RolledBack"),
        }
    }
}
