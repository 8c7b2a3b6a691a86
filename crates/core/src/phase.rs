//! Pipeline phases and their fixed relative order

use std::fmt;

/// A named stage of the build pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Restore,
    Build,
    Rebuild,
    Sign,
    Pack,
    Publish,
    Test,
    Launch,
}

impl Phase {
    /// Every phase in execution order
    pub const ORDER: [Phase; 8] = [
        Phase::Restore,
        Phase::Build,
        Phase::Rebuild,
        Phase::Sign,
        Phase::Pack,
        Phase::Publish,
        Phase::Test,
        Phase::Launch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Restore => "restore",
            Phase::Build => "build",
            Phase::Rebuild => "rebuild",
            Phase::Sign => "sign",
            Phase::Pack => "pack",
            Phase::Publish => "publish",
            Phase::Test => "test",
            Phase::Launch => "launch",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of requested phases
///
/// Membership only; iteration always follows [`Phase::ORDER`] no matter the
/// order in which phases were inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSet {
    bits: u8,
}

impl PhaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn bit(phase: Phase) -> u8 {
        1 << (phase as u8)
    }

    pub fn insert(&mut self, phase: Phase) {
        self.bits |= Self::bit(phase);
    }

    pub fn with(mut self, phase: Phase, enabled: bool) -> Self {
        if enabled {
            self.insert(phase);
        }
        self
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.bits & Self::bit(phase) != 0
    }

    /// Requested phases in execution order
    pub fn ordered(&self) -> Vec<Phase> {
        Phase::ORDER
            .into_iter()
            .filter(|phase| self.contains(*phase))
            .collect()
    }
}

impl FromIterator<Phase> for PhaseSet {
    fn from_iter<I: IntoIterator<Item = Phase>>(iter: I) -> Self {
        let mut set = PhaseSet::new();
        for phase in iter {
            set.insert(phase);
        }
        set
    }
}
