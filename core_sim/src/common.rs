use std::fmt;

#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
/// to unify displaying byte addresses of the shared memory space
pub struct Addr(usize);

impl Addr {
    pub fn new(v: usize) -> Self {
        Self(v)
    }
    pub fn inner(self) -> usize {
        self.0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Identifies a processor and, equivalently, its private cache.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ProcId(usize);

impl ProcId {
    pub fn new(v: usize) -> Self {
        Self(v)
    }
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "R"),
            AccessKind::Write => write!(f, "W"),
        }
    }
}

/// Classified result of a single access against a cache.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessResult {
    ReadHit,
    ReadMiss,
    WriteHit,
    WriteMiss,
}

impl AccessResult {
    pub fn is_hit(self) -> bool {
        matches!(self, Self::ReadHit | Self::WriteHit)
    }
    pub fn is_miss(self) -> bool {
        !self.is_hit()
    }
    pub fn kind(self) -> AccessKind {
        match self {
            Self::ReadHit | Self::ReadMiss => AccessKind::Read,
            Self::WriteHit | Self::WriteMiss => AccessKind::Write,
        }
    }
}

impl fmt::Display for AccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadHit => write!(f, "READ_HIT"),
            Self::ReadMiss => write!(f, "READ_MISS"),
            Self::WriteHit => write!(f, "WRITE_HIT"),
            Self::WriteMiss => write!(f, "WRITE_MISS"),
        }
    }
}

/// Outcome tuple reported to the statistics tracker, one per access.
///
/// `coherence` marks a miss induced by another processor's access to the
/// same line, as opposed to a cold or conflict miss.
#[derive(Clone, Copy, Debug)]
pub struct AccessOutcome {
    pub proc: ProcId,
    pub addr: Addr,
    pub result: AccessResult,
    pub coherence: bool,
}
