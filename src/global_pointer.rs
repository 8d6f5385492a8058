use std::fmt;
use std::ops::Add;

/// Identifier of a team of units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TeamId(pub i16);

impl TeamId {
    /// The team containing every unit.
    pub const ALL: TeamId = TeamId(0);
}

/// Identifier of a memory segment within a team.
///
/// Segment `0` is the unit-local allocation pool, positive ids are collectively registered
/// segments. Negative ids name segments that cannot be reached through shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub i16);

impl SegmentId {
    pub const LOCAL_POOL: SegmentId = SegmentId(0);

    pub fn is_local_pool(&self) -> bool {
        self.0 == 0
    }

    /// Whether memory of this segment may be reached by a direct copy from a node neighbor.
    pub fn shareable(&self) -> bool {
        self.0 >= 0
    }
}

/// Opaque byte displacement into a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Displacement(u64);

impl Displacement {
    pub const fn new(bytes: u64) -> Displacement {
        Displacement(bytes)
    }

    pub fn checked_add(self, bytes: u64) -> Option<Displacement> {
        self.0.checked_add(bytes).map(Displacement)
    }

    /// `None` when the displacement does not fit the host address width.
    pub(crate) fn to_usize(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

/// Address of a byte in the global address space.
///
/// `unit` is the rank of the owning unit within `team`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalPointer {
    team: TeamId,
    segment: SegmentId,
    unit: usize,
    offset: u64,
}

impl GlobalPointer {
    pub fn new(team: TeamId, segment: SegmentId, unit: usize, offset: u64) -> GlobalPointer {
        GlobalPointer {
            team,
            segment,
            unit,
            offset,
        }
    }

    pub fn team(&self) -> TeamId {
        self.team
    }
    pub fn segment(&self) -> SegmentId {
        self.segment
    }
    pub fn unit(&self) -> usize {
        self.unit
    }
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Same address on another unit of the team.
    pub fn with_unit(&self, unit: usize) -> GlobalPointer {
        GlobalPointer { unit, ..*self }
    }

    /// Saturates at `u64::MAX`; a saturated pointer fails to resolve.
    pub fn byte_add(&self, bytes: u64) -> GlobalPointer {
        GlobalPointer {
            offset: self.offset.saturating_add(bytes),
            ..*self
        }
    }

    /// Advance by `count` elements of `T`.
    pub fn elem_add<T>(&self, count: usize) -> GlobalPointer {
        let bytes = count.saturating_mul(std::mem::size_of::<T>());
        self.byte_add(u64::try_from(bytes).unwrap_or(u64::MAX))
    }
}

impl Add<u64> for GlobalPointer {
    type Output = GlobalPointer;
    fn add(self, bytes: u64) -> GlobalPointer {
        self.byte_add(bytes)
    }
}

impl fmt::Debug for GlobalPointer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "gptr(team: {}, seg: {}, unit: {}, offset: {:#x})",
            self.team.0, self.segment.0, self.unit, self.offset
        )
    }
}
