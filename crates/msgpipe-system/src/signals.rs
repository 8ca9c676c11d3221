use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// A set of handle signals.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Signals(u32);

impl Signals {
    pub const NONE: Signals = Signals(0);
    /// At least one message is queued for reading.
    pub const READABLE: Signals = Signals(1 << 0);
    /// The peer is open, so writes can succeed.
    pub const WRITABLE: Signals = Signals(1 << 1);
    /// The peer endpoint has been closed.
    pub const PEER_CLOSED: Signals = Signals(1 << 2);

    const ALL: u32 = 0b111;

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits; unknown bits are dropped.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Signals(bits & Self::ALL)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Signals) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Signals) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Signals {
    type Output = Signals;

    fn bitor(self, rhs: Signals) -> Signals {
        Signals(self.0 | rhs.0)
    }
}

impl BitOrAssign for Signals {
    fn bitor_assign(&mut self, rhs: Signals) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Signals {
    type Output = Signals;

    fn bitand(self, rhs: Signals) -> Signals {
        Signals(self.0 & rhs.0)
    }
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Signals::READABLE) {
            names.push("READABLE");
        }
        if self.contains(Signals::WRITABLE) {
            names.push("WRITABLE");
        }
        if self.contains(Signals::PEER_CLOSED) {
            names.push("PEER_CLOSED");
        }
        if names.is_empty() {
            return f.write_str("Signals(NONE)");
        }
        write!(f, "Signals({})", names.join(" | "))
    }
}

/// Snapshot of a handle's signal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalsState {
    /// Signals currently satisfied.
    pub satisfied: Signals,
    /// Signals that could still become satisfied in the future.
    pub satisfiable: Signals,
}

impl SignalsState {
    pub fn is_satisfied(&self, signals: Signals) -> bool {
        self.satisfied.intersects(signals)
    }

    pub fn is_satisfiable(&self, signals: Signals) -> bool {
        self.satisfiable.intersects(signals)
    }
}
