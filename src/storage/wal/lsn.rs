use serde::{Deserialize, Serialize};
use std::fmt;

/// Log Sequence Number of a record appended in the current process.
///
/// LSNs start at 1 and increase by one per append. `Lsn(0)` means "nothing
/// appended yet". They are not persisted; after a restart numbering begins again.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const NONE: Lsn = Lsn(0);

    pub fn next(self) -> Self {
        Lsn(self.0 + 1)
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}
