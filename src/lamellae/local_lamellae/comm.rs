use super::mem::WindowState;
use super::rdma::UnitState;
use super::LocalFabric;
use crate::datatype::Datatype;
use crate::lamellae::{
    Backend, CommId, CommInfo, CommProgress, CommRequest, Completion, FabricError, FabricResult,
    RequestId, StatKind, StatsSnapshot, WireType, Window,
};

use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

pub(crate) struct LocalComm {
    pub(super) unit: usize,
    pub(super) fabric: Arc<LocalFabric>,
    chunk_types: HashMap<Datatype, WireType>,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalComm {{ unit: {} }}", self.unit)
    }
}

impl LocalComm {
    pub(crate) fn new(unit: usize, fabric: Arc<LocalFabric>) -> LocalComm {
        let max = fabric.max_contig_elements;
        let chunk_types = Datatype::ALL
            .iter()
            .map(|dtype| (*dtype, WireType::Chunk(*dtype, max)))
            .collect();
        LocalComm {
            unit,
            fabric,
            chunk_types,
        }
    }

    pub(super) fn state(&self) -> &UnitState {
        &self.fabric.units[self.unit]
    }

    pub(super) fn window(&self, win: Window) -> FabricResult<Arc<WindowState>> {
        self.fabric
            .windows
            .read()
            .get(&win)
            .cloned()
            .ok_or(FabricError::UnknownWindow(win))
    }

    /// Validate a transport count and return the byte length it covers.
    pub(super) fn extent(&self, wire: WireType, count: usize) -> FabricResult<usize> {
        if count > self.fabric.max_contig_elements {
            return Err(FabricError::CountTooLarge {
                count,
                max: self.fabric.max_contig_elements,
            });
        }
        Ok(wire.size() * count)
    }

    /// Like [LocalComm::extent], additionally requiring `buf_len` to match exactly.
    pub(super) fn check_buf(&self, buf_len: usize, wire: WireType, count: usize) -> FabricResult<usize> {
        let len = self.extent(wire, count)?;
        if len != buf_len {
            return Err(FabricError::BufferSize {
                expected: len,
                actual: buf_len,
            });
        }
        Ok(len)
    }
}

impl CommInfo for LocalComm {
    fn my_unit(&self) -> usize {
        self.unit
    }
    fn num_units(&self) -> usize {
        self.fabric.num_units()
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
    fn max_contig_elements(&self) -> usize {
        self.fabric.max_contig_elements
    }
    fn chunk_type(&self, dtype: Datatype) -> WireType {
        self.chunk_types
            .get(&dtype)
            .copied()
            .unwrap_or(WireType::Chunk(dtype, self.fabric.max_contig_elements))
    }
    fn stats(&self) -> StatsSnapshot {
        self.state().stats.snapshot()
    }
}

impl CommRequest for LocalComm {
    #[tracing::instrument(skip_all, level = "debug")]
    fn wait_all(&self, requests: &[RequestId]) -> FabricResult<Vec<Completion>> {
        let mut reqs = self.state().requests.lock();
        if let Some(missing) = requests.iter().find(|id| !reqs.contains_key(id)) {
            return Err(FabricError::UnknownRequest(*missing));
        }
        let done = requests
            .iter()
            .filter_map(|id| reqs.remove(id))
            .collect::<Vec<_>>();
        drop(reqs);
        trace!("unit {} waited on {} requests", self.unit, done.len());
        done.into_iter().map(|req| req.complete()).collect()
    }

    fn test_all(&self, requests: &[RequestId]) -> FabricResult<Option<Vec<Completion>>> {
        if self.poll_all(requests)? {
            self.wait_all(requests).map(Some)
        } else {
            Ok(None)
        }
    }

    fn poll_all(&self, requests: &[RequestId]) -> FabricResult<bool> {
        let mut reqs = self.state().requests.lock();
        let mut ready = true;
        for id in requests {
            let req = reqs.get_mut(id).ok_or(FabricError::UnknownRequest(*id))?;
            if req.polls_left > 0 {
                req.polls_left -= 1;
                ready = false;
            }
        }
        Ok(ready)
    }

    fn free_request(&self, request: RequestId) {
        self.state().requests.lock().remove(&request);
    }
}

impl CommProgress for LocalComm {
    #[tracing::instrument(skip_all, level = "debug")]
    fn flush(&self, target: usize, win: Window) -> FabricResult<()> {
        self.window(win)?;
        self.state().stats.record(StatKind::Flush, None);
        self.retire_pending(|op| op.addr.window == win && op.addr.rank == target)
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn flush_all(&self, win: Window) -> FabricResult<()> {
        self.window(win)?;
        self.state().stats.record(StatKind::Flush, None);
        self.retire_pending(|op| op.addr.window == win)
    }

    fn flush_local(&self, _target: usize, win: Window) -> FabricResult<()> {
        // origin buffers are copied at issue, local completion is immediate
        self.window(win)?;
        self.state().stats.record(StatKind::LocalFlush, None);
        Ok(())
    }

    fn flush_local_all(&self, win: Window) -> FabricResult<()> {
        self.window(win)?;
        self.state().stats.record(StatKind::LocalFlush, None);
        Ok(())
    }

    fn win_sync(&self, win: Window) -> FabricResult<()> {
        self.window(win).map(|_| ())
    }

    fn iprobe(&self, comm: CommId) -> FabricResult<bool> {
        let rank = self.fabric.comm_state(comm)?.rank_of(self.unit, comm)?;
        self.state().stats.record(StatKind::Probe, None);
        Ok(self.fabric.mailbox.has_message(comm, rank))
    }
}
