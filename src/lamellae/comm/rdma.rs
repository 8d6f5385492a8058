use std::sync::Arc;

use enum_dispatch::enum_dispatch;

use super::error::{FabricError, FabricResult};
use crate::datatype::{Datatype, Operation};
use crate::global_pointer::Displacement;
use crate::lamellae::{RequestId, Window};
use crate::memregion::MemRegion;

/// The unit of data a transport call counts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum WireType {
    /// a single element
    Elem(Datatype),
    /// a contiguous block of the given number of elements treated as one item
    Chunk(Datatype, usize),
}

impl WireType {
    pub(crate) fn size(&self) -> usize {
        match self {
            WireType::Elem(dtype) => dtype.size(),
            WireType::Chunk(dtype, elems) => dtype.size() * elems,
        }
    }

    pub(crate) fn dtype(&self) -> Datatype {
        match self {
            WireType::Elem(dtype) | WireType::Chunk(dtype, _) => *dtype,
        }
    }

    pub(crate) fn is_chunk(&self) -> bool {
        matches!(self, WireType::Chunk(..))
    }
}

/// Transport address of a one-sided operation: a rank of a window and a byte displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RemoteAddr {
    pub(crate) rank: usize,
    pub(crate) window: Window,
    pub(crate) disp: Displacement,
}

impl RemoteAddr {
    pub(crate) fn byte_add(&self, bytes: usize) -> FabricResult<RemoteAddr> {
        let disp = u64::try_from(bytes)
            .ok()
            .and_then(|b| self.disp.checked_add(b))
            .ok_or(FabricError::DisplacementOverflow {
                disp: self.disp,
                bytes,
            })?;
        Ok(RemoteAddr { disp, ..*self })
    }
}

#[enum_dispatch]
pub(crate) trait CommRdma {
    /// Fails if `len` bytes at `addr` do not fit the target's part of the window. Issues nothing.
    fn check_span(&self, addr: RemoteAddr, len: usize) -> FabricResult<()>;
    /// Write `src` (`count` items of `wire`) to `dst`; locally complete after a local flush.
    fn put(&self, dst: RemoteAddr, src: &[u8], wire: WireType, count: usize) -> FabricResult<()>;
    /// Request based put, the request completes once `src` may be reused.
    fn rput(
        &self,
        dst: RemoteAddr,
        src: &[u8],
        wire: WireType,
        count: usize,
    ) -> FabricResult<RequestId>;
    /// Request based get, the fetched bytes are handed out when the request completes.
    fn rget(&self, src: RemoteAddr, wire: WireType, count: usize) -> FabricResult<RequestId>;
    /// Combine `src` into the target memory element-wise with `op`.
    fn accumulate(
        &self,
        dst: RemoteAddr,
        src: &[u8],
        wire: WireType,
        count: usize,
        op: &Operation,
    ) -> FabricResult<()>;
    /// The calling unit's own memory of `win`.
    fn local_region(&self, win: Window) -> FabricResult<Arc<MemRegion>>;
}
