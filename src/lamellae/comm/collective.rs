use enum_dispatch::enum_dispatch;

use super::error::FabricResult;
use super::rdma::WireType;
use crate::datatype::{Datatype, Operation};
use crate::lamellae::CommId;

/// Outgoing point-to-point message: `count` items of `wire` from `buf` to rank `peer`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SendSpec<'a> {
    pub(crate) buf: &'a [u8],
    pub(crate) wire: WireType,
    pub(crate) count: usize,
    pub(crate) tag: i32,
    pub(crate) peer: usize,
}

/// Incoming point-to-point message: up to `count` items of `wire` from rank `peer` into `buf`.
#[derive(Debug)]
pub(crate) struct RecvSpec<'a> {
    pub(crate) buf: &'a mut [u8],
    pub(crate) wire: WireType,
    pub(crate) count: usize,
    pub(crate) tag: i32,
    pub(crate) peer: usize,
}

/// Collective and point-to-point operations over a communication domain.
///
/// Ranks are positions within `comm`. Block structured calls (`scatter`, `gather`, `allgather`)
/// move `count` items of `wire` per rank, rank `i`'s block starting `i * stride` bytes into the
/// full buffer, so a chunked call and its remainder call can address sub-ranges of every block.
#[enum_dispatch]
#[allow(clippy::too_many_arguments)]
pub(crate) trait CommCollective {
    fn comm_rank(&self, comm: CommId) -> FabricResult<usize>;
    fn comm_size(&self, comm: CommId) -> FabricResult<usize>;
    fn barrier(&self, comm: CommId) -> FabricResult<()>;
    fn bcast(
        &self,
        comm: CommId,
        buf: &mut [u8],
        wire: WireType,
        count: usize,
        root: usize,
    ) -> FabricResult<()>;
    fn scatter(
        &self,
        comm: CommId,
        send: &[u8],
        recv: &mut [u8],
        wire: WireType,
        count: usize,
        stride: usize,
        root: usize,
    ) -> FabricResult<()>;
    fn gather(
        &self,
        comm: CommId,
        send: &[u8],
        recv: &mut [u8],
        wire: WireType,
        count: usize,
        stride: usize,
        root: usize,
    ) -> FabricResult<()>;
    /// `send == None` takes the caller's contribution from its own block of `recv`.
    fn allgather(
        &self,
        comm: CommId,
        send: Option<&[u8]>,
        recv: &mut [u8],
        wire: WireType,
        count: usize,
        stride: usize,
    ) -> FabricResult<()>;
    /// Counts and displacements are in elements of `dtype`.
    fn allgatherv(
        &self,
        comm: CommId,
        send: Option<&[u8]>,
        recv: &mut [u8],
        dtype: Datatype,
        counts: &[usize],
        displs: &[usize],
    ) -> FabricResult<()>;
    fn reduce(
        &self,
        comm: CommId,
        send: &[u8],
        recv: &mut [u8],
        dtype: Datatype,
        count: usize,
        op: &Operation,
        root: usize,
    ) -> FabricResult<()>;
    fn allreduce(
        &self,
        comm: CommId,
        send: &[u8],
        recv: &mut [u8],
        dtype: Datatype,
        count: usize,
        op: &Operation,
    ) -> FabricResult<()>;
    fn send(&self, comm: CommId, msg: SendSpec<'_>) -> FabricResult<()>;
    /// Returns the number of bytes received.
    fn recv(&self, comm: CommId, msg: RecvSpec<'_>) -> FabricResult<usize>;
    fn sendrecv(
        &self,
        comm: CommId,
        send: SendSpec<'_>,
        recv: RecvSpec<'_>,
    ) -> FabricResult<usize>;
}
