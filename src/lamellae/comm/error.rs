use crate::datatype::Datatype;
use crate::global_pointer::{Displacement, SegmentId, TeamId};
use crate::lamellae::{CommId, RequestId, Window};

/// Failure reported by the transport itself.
#[derive(Debug, Clone)]
pub enum FabricError {
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
    /// `disp + bytes` leaves the addressable range.
    DisplacementOverflow {
        disp: Displacement,
        bytes: usize,
    },
    UnknownWindow(Window),
    UnknownComm(CommId),
    UnknownRequest(RequestId),
    NotAMember {
        unit: usize,
        comm: CommId,
    },
    RankOutOfRange {
        rank: usize,
        size: usize,
    },
    CountTooLarge {
        count: usize,
        max: usize,
    },
    BufferSize {
        expected: usize,
        actual: usize,
    },
    Truncated {
        sent: usize,
        capacity: usize,
    },
    UnsupportedOperation {
        op: &'static str,
        dtype: Datatype,
    },
    NotInitialized,
}

impl std::fmt::Display for FabricError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FabricError::OutOfBounds { offset, len, size } => {
                write!(
                    f,
                    "access of {} bytes at offset {} is outside a region of {} bytes",
                    len, offset, size
                )
            }
            FabricError::DisplacementOverflow { disp, bytes } => {
                write!(
                    f,
                    "displacement {:?} plus {} bytes is not addressable",
                    disp, bytes
                )
            }
            FabricError::UnknownWindow(win) => write!(f, "unknown window {:?}", win),
            FabricError::UnknownComm(comm) => {
                write!(f, "unknown communication domain {:?}", comm)
            }
            FabricError::UnknownRequest(req) => write!(f, "unknown request {:?}", req),
            FabricError::NotAMember { unit, comm } => {
                write!(f, "unit {} is not a member of {:?}", unit, comm)
            }
            FabricError::RankOutOfRange { rank, size } => {
                write!(f, "rank {} out of range for domain of size {}", rank, size)
            }
            FabricError::CountTooLarge { count, max } => {
                write!(
                    f,
                    "count {} exceeds the transport limit of {} elements",
                    count, max
                )
            }
            FabricError::BufferSize { expected, actual } => {
                write!(f, "expected a buffer of {} bytes, got {}", expected, actual)
            }
            FabricError::Truncated { sent, capacity } => {
                write!(
                    f,
                    "message of {} bytes truncated by receive buffer of {} bytes",
                    sent, capacity
                )
            }
            FabricError::UnsupportedOperation { op, dtype } => {
                write!(f, "operation {} is not defined on {}", op, dtype)
            }
            FabricError::NotInitialized => {
                write!(f, "fabric world has not been initialized")
            }
        }
    }
}

impl std::error::Error for FabricError {}

pub type FabricResult<T> = Result<T, FabricError>;

/// The two classes every failure of this layer falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller passed something that can never succeed; nothing was issued.
    InvalidArgument,
    /// The transport call itself failed.
    OperationFailed,
}

#[derive(Debug, Clone)]
pub enum RmaError {
    UnknownTeam(TeamId),
    UnitOutOfRange {
        unit: usize,
        size: usize,
    },
    UnknownSegment {
        team: TeamId,
        segment: SegmentId,
    },
    /// The pointer offset does not fit the target's address range.
    OffsetOutOfRange {
        offset: u64,
    },
    CountTooLarge {
        count: usize,
        max: usize,
    },
    UnsupportedDatatype {
        op: &'static str,
        dtype: Datatype,
    },
    BufferMismatch {
        expected: usize,
        actual: usize,
    },
    Fabric(FabricError),
}

impl RmaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RmaError::Fabric(_) => ErrorKind::OperationFailed,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

impl std::fmt::Display for RmaError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RmaError::UnknownTeam(team) => write!(f, "unknown team {}", team.0),
            RmaError::UnitOutOfRange { unit, size } => {
                write!(f, "unit {} out of range for team of size {}", unit, size)
            }
            RmaError::UnknownSegment { team, segment } => {
                write!(f, "segment {} not registered in team {}", segment.0, team.0)
            }
            RmaError::OffsetOutOfRange { offset } => {
                write!(f, "offset {} overflows the segment address range", offset)
            }
            RmaError::CountTooLarge { count, max } => {
                write!(
                    f,
                    "count {} is not representable, the limit is {}",
                    count, max
                )
            }
            RmaError::UnsupportedDatatype { op, dtype } => {
                write!(f, "{} is not supported on {}", op, dtype)
            }
            RmaError::BufferMismatch { expected, actual } => {
                write!(
                    f,
                    "buffer holds {} elements, {} are required",
                    actual, expected
                )
            }
            RmaError::Fabric(err) => write!(f, "transport operation failed: {}", err),
        }
    }
}

impl std::error::Error for RmaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RmaError::Fabric(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FabricError> for RmaError {
    fn from(err: FabricError) -> Self {
        RmaError::Fabric(err)
    }
}

pub type RmaResult<T> = Result<T, RmaError>;
