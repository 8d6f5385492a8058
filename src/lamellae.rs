use crate::config;

use std::fmt;

pub(crate) mod comm;
pub use comm::{ErrorKind, FabricError, FabricResult, RmaError, RmaResult, StatsSnapshot};
pub(crate) use comm::{
    Comm, CommAtomic, CommCollective, CommInfo, CommProgress, CommRdma, CommRequest, CommStats,
    Completion, RecvSpec, RemoteAddr, SendSpec, StatKind, WireType,
};

pub(crate) mod local_lamellae;
pub use local_lamellae::{LocalBuilder, LocalFabric};

/// The list of available transport backends, used to specify how data is transferred between units
#[derive(Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy)]
pub enum Backend {
    /// The Local backend -- every unit lives inside the calling process
    Local,
}

impl Default for Backend {
    fn default() -> Self {
        match config().backend.as_str() {
            "local" => Backend::Local,
            other => {
                tracing::debug!("unknown backend {other}, falling back to local");
                Backend::Local
            }
        }
    }
}

/// A communication domain: an ordered group of units that take part in collectives together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommId(pub(crate) usize);

impl CommId {
    /// The domain containing every unit, ranked by global unit id.
    pub const WORLD: CommId = CommId(0);
}

/// A transport registration of memory that can be targeted by one-sided operations.
///
/// Every rank of the window's communication domain contributes one region; one-sided operations
/// address a region by that rank and a byte displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window(pub(crate) usize);

/// Identifier of an in-flight request-based operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}
