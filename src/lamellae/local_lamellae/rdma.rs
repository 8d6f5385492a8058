use super::comm::LocalComm;
use crate::datatype::{Datatype, Operation};
use crate::lamellae::{
    CommRdma, CommStats, Completion, FabricError, FabricResult, RemoteAddr, RequestId, StatKind,
    WireType, Window,
};
use crate::memregion::MemRegion;

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Transport state owned by one unit.
#[derive(Default)]
pub(crate) struct UnitState {
    pub(crate) pending: Mutex<VecDeque<PendingOp>>,
    pub(crate) requests: Mutex<HashMap<RequestId, RequestState>>,
    next_request: AtomicU64,
    pub(crate) stats: CommStats,
}

pub(crate) enum PendingKind {
    Put(Vec<u8>),
    Accumulate {
        data: Vec<u8>,
        dtype: Datatype,
        op: Operation,
    },
}

/// A write that has completed at the origin but not yet at the target.
pub(crate) struct PendingOp {
    pub(crate) addr: RemoteAddr,
    pub(crate) kind: PendingKind,
}

impl PendingOp {
    fn apply(self, comm: &LocalComm) -> FabricResult<()> {
        let window = comm.window(self.addr.window)?;
        match self.kind {
            PendingKind::Put(data) => {
                let (region, offset) = window.locate(&self.addr, data.len())?;
                region.write(offset, &data)
            }
            PendingKind::Accumulate { data, dtype, op } => {
                let (region, offset) = window.locate(&self.addr, data.len())?;
                region.update(offset, data.len(), |dst| op.apply(dtype, &data, dst))
            }
        }
    }
}

pub(crate) enum RequestKind {
    Put,
    Get {
        region: Arc<MemRegion>,
        offset: usize,
        len: usize,
    },
}

pub(crate) struct RequestState {
    pub(crate) polls_left: usize,
    kind: RequestKind,
}

impl RequestState {
    /// Gets read the target memory at completion time.
    pub(crate) fn complete(self) -> FabricResult<Completion> {
        match self.kind {
            RequestKind::Put => Ok(None),
            RequestKind::Get {
                region,
                offset,
                len,
            } => region.snapshot(offset, len).map(Some),
        }
    }
}

impl LocalComm {
    fn new_request(&self, kind: RequestKind) -> RequestId {
        let state = self.state();
        let id = RequestId(state.next_request.fetch_add(1, Ordering::Relaxed));
        state.requests.lock().insert(
            id,
            RequestState {
                polls_left: self.fabric.completion_delay,
                kind,
            },
        );
        id
    }

    fn enqueue(&self, addr: RemoteAddr, kind: PendingKind) {
        self.state().pending.lock().push_back(PendingOp { addr, kind });
    }

    /// Apply, in issue order, every pending operation selected by `filter`.
    pub(super) fn retire_pending(&self, filter: impl Fn(&PendingOp) -> bool) -> FabricResult<()> {
        let ready = {
            let mut pending = self.state().pending.lock();
            let (ready, rest): (VecDeque<_>, VecDeque<_>) = pending.drain(..).partition(&filter);
            *pending = rest;
            ready
        };
        trace!("unit {} retiring {} operations", self.unit, ready.len());
        for op in ready {
            op.apply(self)?;
        }
        Ok(())
    }

    fn check_put(&self, dst: &RemoteAddr, src: &[u8], wire: WireType, count: usize) -> FabricResult<()> {
        let len = self.check_buf(src.len(), wire, count)?;
        self.window(dst.window)?.locate(dst, len)?;
        Ok(())
    }
}

impl CommRdma for LocalComm {
    fn check_span(&self, addr: RemoteAddr, len: usize) -> FabricResult<()> {
        self.window(addr.window)?.locate(&addr, len).map(|_| ())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn put(&self, dst: RemoteAddr, src: &[u8], wire: WireType, count: usize) -> FabricResult<()> {
        self.check_put(&dst, src, wire, count)?;
        self.state().stats.record(StatKind::Put, Some((wire, count)));
        trace!(
            "unit {} put {} bytes to rank {} {:?} {:?}",
            self.unit,
            src.len(),
            dst.rank,
            dst.window,
            dst.disp
        );
        self.enqueue(dst, PendingKind::Put(src.to_vec()));
        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn rput(
        &self,
        dst: RemoteAddr,
        src: &[u8],
        wire: WireType,
        count: usize,
    ) -> FabricResult<RequestId> {
        self.check_put(&dst, src, wire, count)?;
        self.state().stats.record(StatKind::Put, Some((wire, count)));
        self.enqueue(dst, PendingKind::Put(src.to_vec()));
        Ok(self.new_request(RequestKind::Put))
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn rget(&self, src: RemoteAddr, wire: WireType, count: usize) -> FabricResult<RequestId> {
        let len = self.extent(wire, count)?;
        let (region, offset) = self.window(src.window)?.locate(&src, len)?;
        self.state().stats.record(StatKind::Get, Some((wire, count)));
        trace!(
            "unit {} get {} bytes from rank {} {:?} {:?}",
            self.unit,
            len,
            src.rank,
            src.window,
            src.disp
        );
        Ok(self.new_request(RequestKind::Get {
            region,
            offset,
            len,
        }))
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn accumulate(
        &self,
        dst: RemoteAddr,
        src: &[u8],
        wire: WireType,
        count: usize,
        op: &Operation,
    ) -> FabricResult<()> {
        let dtype = wire.dtype();
        if !op.supports(dtype) {
            return Err(FabricError::UnsupportedOperation {
                op: op.name(),
                dtype,
            });
        }
        self.check_put(&dst, src, wire, count)?;
        self.state()
            .stats
            .record(StatKind::Accumulate, Some((wire, count)));
        self.enqueue(
            dst,
            PendingKind::Accumulate {
                data: src.to_vec(),
                dtype,
                op: op.clone(),
            },
        );
        Ok(())
    }

    fn local_region(&self, win: Window) -> FabricResult<Arc<MemRegion>> {
        let window = self.window(win)?;
        let rank = self
            .fabric
            .comm_state(window.comm)?
            .rank_of(self.unit, window.comm)?;
        window.region(rank)
    }
}
