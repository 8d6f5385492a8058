//! One-sided access to global memory.
//!
//! Every operation resolves its [GlobalPointer] against the caller's team registry, then either
//! copies directly (the calling unit itself or a shared-memory peer) or goes through the
//! transport, splitting the transfer into a bulk and a remainder call when it exceeds the
//! transport's count limit.
pub(crate) mod chunk;
pub(crate) mod handle;
pub(crate) mod locality;
pub(crate) mod resolve;
mod sync;

use crate::config;
use crate::datatype::{as_bytes, as_bytes_mut, Datatype, Dist, Operation};
use crate::global_pointer::{GlobalPointer, TeamId};
use crate::lamellae::{
    Backend, Comm, CommAtomic, CommInfo, CommProgress, CommRdma, RmaError, RmaResult,
    StatsSnapshot,
};
use crate::team::{TeamContext, TeamRegistry};
use chunk::ChunkPlan;
use handle::Handle;
use locality::Route;
use resolve::{resolve, Target};

use std::sync::Arc;
use tracing::debug;

/// A unit's entry point into the communication layer.
///
/// Cloning is cheap, clones share the same transport endpoint and team registry.
#[derive(Debug, Clone)]
pub struct GlobalComm {
    pub(crate) comm: Arc<Comm>,
    pub(crate) teams: Arc<TeamRegistry>,
    shared_windows: bool,
}

/// Reject operations that cannot be applied element-wise by the transport.
fn check_op(op: &Operation, dtype: Datatype) -> RmaResult<()> {
    if op.is_user() || !op.supports(dtype) {
        return Err(RmaError::UnsupportedDatatype {
            op: op.name(),
            dtype,
        });
    }
    Ok(())
}

impl GlobalComm {
    pub(crate) fn new(comm: Arc<Comm>, teams: Arc<TeamRegistry>) -> GlobalComm {
        GlobalComm {
            comm,
            teams,
            shared_windows: config().shared_windows,
        }
    }

    /// Enable or disable direct copies to node-local peers.
    pub fn with_shared_windows(mut self, enabled: bool) -> GlobalComm {
        self.shared_windows = enabled;
        self
    }

    /// Global id of the calling unit.
    pub fn my_unit(&self) -> usize {
        self.comm.my_unit()
    }

    pub fn num_units(&self) -> usize {
        self.comm.num_units()
    }

    pub fn backend(&self) -> Backend {
        self.comm.backend()
    }

    pub fn max_contig_elements(&self) -> usize {
        self.comm.max_contig_elements()
    }

    /// Counters of every call this unit handed to the transport.
    pub fn stats(&self) -> StatsSnapshot {
        self.comm.stats()
    }

    pub fn teams(&self) -> &Arc<TeamRegistry> {
        &self.teams
    }

    pub(crate) fn team(&self, team: TeamId) -> RmaResult<Arc<TeamContext>> {
        self.teams.resolve(team).ok_or(RmaError::UnknownTeam(team))
    }

    /// Rank of the calling unit within `team`.
    pub fn team_unit(&self, team: TeamId) -> RmaResult<usize> {
        Ok(self.team(team)?.my_unit())
    }

    pub fn team_size(&self, team: TeamId) -> RmaResult<usize> {
        Ok(self.team(team)?.size())
    }

    fn target(&self, gptr: GlobalPointer) -> RmaResult<(Target, Route)> {
        let target = resolve(&self.teams, gptr)?;
        let route = locality::select(&self.comm, &target, self.shared_windows)?;
        Ok((target, route))
    }

    /// Issue the plain puts of a transfer, returning whether anything was issued.
    fn put_pieces(&self, target: &Target, src: &[u8], dtype: Datatype) -> RmaResult<bool> {
        let plan = ChunkPlan::for_comm(&self.comm, dtype, src.len() / dtype.size())?;
        plan.check_target(&self.comm, target.addr)?;
        for piece in plan.pieces() {
            self.comm.put(
                target.addr.byte_add(piece.offset)?,
                &src[piece.offset..piece.offset + piece.len],
                piece.wire,
                piece.count,
            )?;
        }
        Ok(!plan.is_empty())
    }

    /// Copy `dst.len()` elements starting at `gptr` into `dst`.
    ///
    /// Returns once `dst` holds the data.
    pub fn get<T: Dist>(&self, dst: &mut [T], gptr: GlobalPointer) -> RmaResult<()> {
        debug!("get {} x {} from {:?}", dst.len(), T::DATATYPE, gptr);
        let (target, route) = self.target(gptr)?;
        let bytes = as_bytes_mut(dst);
        if let Some(base) = route.direct() {
            return Ok(base.copy_to(bytes)?);
        }
        let plan = ChunkPlan::for_comm(&self.comm, T::DATATYPE, bytes.len() / T::DATATYPE.size())?;
        handle::issue_get(&self.comm, target.addr, &plan, bytes)?.wait_local()
    }

    /// Write `src` to `gptr`.
    ///
    /// Returns once `src` may be reused. Other units are guaranteed to observe the write only after
    /// a flush of the target; use [GlobalComm::put_blocking] to include that step.
    pub fn put<T: Dist>(&self, gptr: GlobalPointer, src: &[T]) -> RmaResult<()> {
        debug!("put {} x {} to {:?}", src.len(), T::DATATYPE, gptr);
        let (target, route) = self.target(gptr)?;
        let bytes = as_bytes(src);
        if let Some(base) = route.direct() {
            return Ok(base.copy_from(bytes)?);
        }
        if self.put_pieces(&target, bytes, T::DATATYPE)? {
            self.comm.flush_local(target.addr.rank, target.addr.window)?;
        }
        Ok(())
    }

    /// Write `src` to `gptr` and wait until the write is visible to every unit.
    pub fn put_blocking<T: Dist>(&self, gptr: GlobalPointer, src: &[T]) -> RmaResult<()> {
        debug!("blocking put {} x {} to {:?}", src.len(), T::DATATYPE, gptr);
        let (target, route) = self.target(gptr)?;
        let bytes = as_bytes(src);
        if let Some(base) = route.direct() {
            return Ok(base.copy_from(bytes)?);
        }
        if self.put_pieces(&target, bytes, T::DATATYPE)? {
            self.comm.flush(target.addr.rank, target.addr.window)?;
        }
        Ok(())
    }

    /// Combine `src` element-wise into the memory at `gptr` with `op`.
    ///
    /// Accumulates always go through the transport so that concurrent accumulates from different
    /// units to the same element stay atomic. Like [GlobalComm::put], the result is guaranteed to
    /// be visible only after a flush of the target.
    pub fn accumulate<T: Dist>(
        &self,
        gptr: GlobalPointer,
        src: &[T],
        op: &Operation,
    ) -> RmaResult<()> {
        debug!(
            "accumulate {} x {} ({}) to {:?}",
            src.len(),
            T::DATATYPE,
            op.name(),
            gptr
        );
        check_op(op, T::DATATYPE)?;
        let target = resolve(&self.teams, gptr)?;
        let plan = ChunkPlan::for_comm(&self.comm, T::DATATYPE, src.len())?;
        let bytes = as_bytes(src);
        plan.check_target(&self.comm, target.addr)?;
        for piece in plan.pieces() {
            self.comm.accumulate(
                target.addr.byte_add(piece.offset)?,
                &bytes[piece.offset..piece.offset + piece.len],
                piece.wire,
                piece.count,
                op,
            )?;
        }
        if !plan.is_empty() {
            self.comm
                .flush_local(target.addr.rank, target.addr.window)?;
        }
        Ok(())
    }

    /// Atomically combine `value` into the element at `gptr` and return the element's previous
    /// value.
    pub fn fetch_and_op<T: Dist>(
        &self,
        gptr: GlobalPointer,
        value: T,
        op: &Operation,
    ) -> RmaResult<T> {
        debug!("fetch_and_op {} ({}) at {:?}", T::DATATYPE, op.name(), gptr);
        check_op(op, T::DATATYPE)?;
        let target = resolve(&self.teams, gptr)?;
        let mut result = vec![0u8; T::DATATYPE.size()];
        self.comm.fetch_and_op(
            target.addr,
            as_bytes(std::slice::from_ref(&value)),
            &mut result,
            T::DATATYPE,
            op,
        )?;
        Ok(T::load(&result))
    }

    /// Atomically replace the element at `gptr` with `value` if it equals `compare`.
    ///
    /// Returns the element's previous value. Only integral element types are supported.
    pub fn compare_and_swap<T: Dist>(
        &self,
        gptr: GlobalPointer,
        value: T,
        compare: T,
    ) -> RmaResult<T> {
        debug!("compare_and_swap {} at {:?}", T::DATATYPE, gptr);
        if !T::DATATYPE.is_integral() {
            return Err(RmaError::UnsupportedDatatype {
                op: "compare_and_swap",
                dtype: T::DATATYPE,
            });
        }
        let target = resolve(&self.teams, gptr)?;
        let mut result = vec![0u8; T::DATATYPE.size()];
        self.comm.compare_and_swap(
            target.addr,
            as_bytes(std::slice::from_ref(&value)),
            as_bytes(std::slice::from_ref(&compare)),
            &mut result,
            T::DATATYPE,
        )?;
        Ok(T::load(&result))
    }

    /// Start fetching `dst.len()` elements from `gptr` into `dst`.
    ///
    /// `dst` stays borrowed by the returned handle and holds the data once it completed.
    pub fn get_handle<'a, T: Dist>(
        &self,
        dst: &'a mut [T],
        gptr: GlobalPointer,
    ) -> RmaResult<Handle<'a>> {
        debug!("get handle {} x {} from {:?}", dst.len(), T::DATATYPE, gptr);
        let (target, route) = self.target(gptr)?;
        let bytes = as_bytes_mut(dst);
        if let Some(base) = route.direct() {
            base.copy_to(bytes)?;
            return Ok(Handle::null());
        }
        let plan = ChunkPlan::for_comm(&self.comm, T::DATATYPE, bytes.len() / T::DATATYPE.size())?;
        handle::issue_get(&self.comm, target.addr, &plan, bytes)
    }

    /// Start writing `src` to `gptr`; completing the returned handle with [Handle::wait] includes
    /// remote completion.
    pub fn put_handle<'a, T: Dist>(
        &self,
        gptr: GlobalPointer,
        src: &'a [T],
    ) -> RmaResult<Handle<'a>> {
        debug!("put handle {} x {} to {:?}", src.len(), T::DATATYPE, gptr);
        let (target, route) = self.target(gptr)?;
        let bytes = as_bytes(src);
        if let Some(base) = route.direct() {
            base.copy_from(bytes)?;
            return Ok(Handle::null());
        }
        let plan = ChunkPlan::for_comm(&self.comm, T::DATATYPE, src.len())?;
        handle::issue_put(&self.comm, target.addr, &plan, bytes)
    }
}
