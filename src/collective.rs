//! Collective and point-to-point operations of a team.
//!
//! Every call resolves the team to its communication domain and checks participant ranks before
//! anything is handed to the transport. Broadcast, scatter, gather and allgather are split into a
//! bulk and a remainder call like one-sided transfers; the remaining operations are passed through
//! in a single call and reject counts above the transport limit.
use crate::datatype::{as_bytes, as_bytes_mut, Datatype, Dist, Operation};
use crate::global_pointer::TeamId;
use crate::lamellae::{
    CommCollective, CommInfo, RecvSpec, RmaError, RmaResult, SendSpec, WireType,
};
use crate::rma::chunk::ChunkPlan;
use crate::rma::GlobalComm;
use crate::team::TeamContext;

use std::sync::Arc;
use tracing::debug;

fn check_unit(ctx: &TeamContext, unit: usize) -> RmaResult<()> {
    if unit < ctx.size() {
        Ok(())
    } else {
        Err(RmaError::UnitOutOfRange {
            unit,
            size: ctx.size(),
        })
    }
}

fn check_len(expected: usize, actual: usize) -> RmaResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(RmaError::BufferMismatch { expected, actual })
    }
}

impl GlobalComm {
    fn check_count(&self, count: usize) -> RmaResult<()> {
        let max = self.comm.max_contig_elements();
        if count > max {
            return Err(RmaError::CountTooLarge { count, max });
        }
        Ok(())
    }

    fn check_reduction(&self, op: &Operation, dtype: Datatype, count: usize) -> RmaResult<()> {
        if !op.supports(dtype) {
            return Err(RmaError::UnsupportedDatatype {
                op: op.name(),
                dtype,
            });
        }
        self.check_count(count)
    }

    /// The all-units team, addressing point-to-point peers by global id.
    fn world(&self, peers: &[usize]) -> RmaResult<Arc<TeamContext>> {
        let ctx = self.team(TeamId::ALL)?;
        for peer in peers {
            check_unit(&ctx, *peer)?;
        }
        Ok(ctx)
    }

    /// Block until every unit of `team` entered the barrier.
    pub fn barrier(&self, team: TeamId) -> RmaResult<()> {
        let ctx = self.team(team)?;
        debug!("barrier on team {}", team.0);
        Ok(self.comm.barrier(ctx.comm())?)
    }

    /// Replace `buf` on every unit of `team` with the contents of `buf` on `root`.
    pub fn bcast<T: Dist>(&self, team: TeamId, buf: &mut [T], root: usize) -> RmaResult<()> {
        let ctx = self.team(team)?;
        check_unit(&ctx, root)?;
        debug!(
            "bcast {} x {} from {} on team {}",
            buf.len(),
            T::DATATYPE,
            root,
            team.0
        );
        let plan = ChunkPlan::for_comm(&self.comm, T::DATATYPE, buf.len())?;
        let bytes = as_bytes_mut(buf);
        for piece in plan.pieces() {
            self.comm.bcast(
                ctx.comm(),
                &mut bytes[piece.offset..piece.offset + piece.len],
                piece.wire,
                piece.count,
                root,
            )?;
        }
        Ok(())
    }

    /// Hand block `i` of `send` on `root` to unit `i` of `team`.
    ///
    /// Blocks are `recv.len()` elements; `send` is only read on `root`, where it must hold one
    /// block per unit.
    pub fn scatter<T: Dist>(
        &self,
        team: TeamId,
        send: &[T],
        recv: &mut [T],
        root: usize,
    ) -> RmaResult<()> {
        let ctx = self.team(team)?;
        check_unit(&ctx, root)?;
        let nelem = recv.len();
        if ctx.my_unit() == root {
            check_len(nelem * ctx.size(), send.len())?;
        }
        debug!("scatter {} x {} from {} on team {}", nelem, T::DATATYPE, root, team.0);
        let plan = ChunkPlan::for_comm(&self.comm, T::DATATYPE, nelem)?;
        let stride = nelem * T::DATATYPE.size();
        let send = as_bytes(send);
        let recv = as_bytes_mut(recv);
        for piece in plan.pieces() {
            self.comm.scatter(
                ctx.comm(),
                send.get(piece.offset..).unwrap_or_default(),
                &mut recv[piece.offset..piece.offset + piece.len],
                piece.wire,
                piece.count,
                stride,
                root,
            )?;
        }
        Ok(())
    }

    /// Collect `send` of every unit of `team` into block `i` of `recv` on `root`.
    ///
    /// `recv` is only written on `root`, where it must hold `send.len()` elements per unit.
    pub fn gather<T: Dist>(
        &self,
        team: TeamId,
        send: &[T],
        recv: &mut [T],
        root: usize,
    ) -> RmaResult<()> {
        let ctx = self.team(team)?;
        check_unit(&ctx, root)?;
        let nelem = send.len();
        if ctx.my_unit() == root {
            check_len(nelem * ctx.size(), recv.len())?;
        }
        debug!("gather {} x {} to {} on team {}", nelem, T::DATATYPE, root, team.0);
        let plan = ChunkPlan::for_comm(&self.comm, T::DATATYPE, nelem)?;
        let stride = nelem * T::DATATYPE.size();
        let send = as_bytes(send);
        let recv = as_bytes_mut(recv);
        for piece in plan.pieces() {
            self.comm.gather(
                ctx.comm(),
                &send[piece.offset..piece.offset + piece.len],
                recv.get_mut(piece.offset..).unwrap_or_default(),
                piece.wire,
                piece.count,
                stride,
                root,
            )?;
        }
        Ok(())
    }

    /// Collect the contribution of every unit of `team` into block `i` of `recv` on every unit.
    ///
    /// `recv` holds one equally sized block per unit. With `send == None` the caller's
    /// contribution is taken from its own block of `recv`.
    pub fn allgather<T: Dist>(
        &self,
        team: TeamId,
        send: Option<&[T]>,
        recv: &mut [T],
    ) -> RmaResult<()> {
        let ctx = self.team(team)?;
        let nelem = recv.len() / ctx.size();
        check_len(nelem * ctx.size(), recv.len())?;
        if let Some(send) = send {
            check_len(nelem, send.len())?;
        }
        debug!(
            "allgather {} x {} on team {}{}",
            nelem,
            T::DATATYPE,
            team.0,
            if send.is_none() { " in place" } else { "" }
        );
        let plan = ChunkPlan::for_comm(&self.comm, T::DATATYPE, nelem)?;
        let stride = nelem * T::DATATYPE.size();
        let send = send.map(as_bytes);
        let recv = as_bytes_mut(recv);
        for piece in plan.pieces() {
            self.comm.allgather(
                ctx.comm(),
                send.map(|send| &send[piece.offset..piece.offset + piece.len]),
                &mut recv[piece.offset..],
                piece.wire,
                piece.count,
                stride,
            )?;
        }
        Ok(())
    }

    /// Collect `counts[i]` elements of unit `i` at element `displs[i]` of `recv` on every unit.
    ///
    /// Counts and displacements are handed to the transport as they are and must not exceed its
    /// count limit. With `send == None` the caller's contribution is taken from `recv`.
    pub fn allgatherv<T: Dist>(
        &self,
        team: TeamId,
        send: Option<&[T]>,
        recv: &mut [T],
        counts: &[usize],
        displs: &[usize],
    ) -> RmaResult<()> {
        let ctx = self.team(team)?;
        check_len(ctx.size(), counts.len())?;
        check_len(ctx.size(), displs.len())?;
        for value in counts.iter().chain(displs) {
            self.check_count(*value)?;
        }
        if let Some(send) = send {
            check_len(counts[ctx.my_unit()], send.len())?;
        }
        debug!("allgatherv {} on team {} counts {:?}", T::DATATYPE, team.0, counts);
        Ok(self.comm.allgatherv(
            ctx.comm(),
            send.map(as_bytes),
            as_bytes_mut(recv),
            T::DATATYPE,
            counts,
            displs,
        )?)
    }

    /// Combine `send` of every unit of `team` element-wise with `op` into `recv` on `root`.
    ///
    /// `recv` is only written on `root`, where it must be as long as `send`.
    pub fn reduce<T: Dist>(
        &self,
        team: TeamId,
        send: &[T],
        recv: &mut [T],
        op: &Operation,
        root: usize,
    ) -> RmaResult<()> {
        let ctx = self.team(team)?;
        check_unit(&ctx, root)?;
        self.check_reduction(op, T::DATATYPE, send.len())?;
        if ctx.my_unit() == root {
            check_len(send.len(), recv.len())?;
        }
        debug!(
            "reduce {} x {} ({}) to {} on team {}",
            send.len(),
            T::DATATYPE,
            op.name(),
            root,
            team.0
        );
        Ok(self.comm.reduce(
            ctx.comm(),
            as_bytes(send),
            as_bytes_mut(recv),
            T::DATATYPE,
            send.len(),
            op,
            root,
        )?)
    }

    /// Like [GlobalComm::reduce], leaving the result in `recv` on every unit.
    pub fn allreduce<T: Dist>(
        &self,
        team: TeamId,
        send: &[T],
        recv: &mut [T],
        op: &Operation,
    ) -> RmaResult<()> {
        let ctx = self.team(team)?;
        self.check_reduction(op, T::DATATYPE, send.len())?;
        check_len(send.len(), recv.len())?;
        debug!(
            "allreduce {} x {} ({}) on team {}",
            send.len(),
            T::DATATYPE,
            op.name(),
            team.0
        );
        Ok(self.comm.allreduce(
            ctx.comm(),
            as_bytes(send),
            as_bytes_mut(recv),
            T::DATATYPE,
            send.len(),
            op,
        )?)
    }

    /// Send `buf` to unit `dest`, matched by a [GlobalComm::recv] with the same tag.
    ///
    /// Sends are buffered and return without waiting for the receiver.
    pub fn send<T: Dist>(&self, dest: usize, tag: i32, buf: &[T]) -> RmaResult<()> {
        let ctx = self.world(&[dest])?;
        self.check_count(buf.len())?;
        debug!("send {} x {} to {} tag {}", buf.len(), T::DATATYPE, dest, tag);
        Ok(self.comm.send(
            ctx.comm(),
            SendSpec {
                buf: as_bytes(buf),
                wire: WireType::Elem(T::DATATYPE),
                count: buf.len(),
                tag,
                peer: dest,
            },
        )?)
    }

    /// Receive a message with `tag` from unit `source` into `buf`, returning the number of
    /// elements received.
    pub fn recv<T: Dist>(&self, source: usize, tag: i32, buf: &mut [T]) -> RmaResult<usize> {
        let ctx = self.world(&[source])?;
        self.check_count(buf.len())?;
        debug!("recv {} x {} from {} tag {}", buf.len(), T::DATATYPE, source, tag);
        let count = buf.len();
        let received = self.comm.recv(
            ctx.comm(),
            RecvSpec {
                buf: as_bytes_mut(buf),
                wire: WireType::Elem(T::DATATYPE),
                count,
                tag,
                peer: source,
            },
        )?;
        Ok(received / T::DATATYPE.size())
    }

    /// Send `send` to `dest` and receive from `source` into `recv` in one call.
    #[allow(clippy::too_many_arguments)]
    pub fn sendrecv<S: Dist, R: Dist>(
        &self,
        dest: usize,
        send_tag: i32,
        send: &[S],
        source: usize,
        recv_tag: i32,
        recv: &mut [R],
    ) -> RmaResult<usize> {
        let ctx = self.world(&[dest, source])?;
        self.check_count(send.len())?;
        self.check_count(recv.len())?;
        debug!("sendrecv to {} from {}", dest, source);
        let count = recv.len();
        let received = self.comm.sendrecv(
            ctx.comm(),
            SendSpec {
                buf: as_bytes(send),
                wire: WireType::Elem(S::DATATYPE),
                count: send.len(),
                tag: send_tag,
                peer: dest,
            },
            RecvSpec {
                buf: as_bytes_mut(recv),
                wire: WireType::Elem(R::DATATYPE),
                count,
                tag: recv_tag,
                peer: source,
            },
        )?;
        Ok(received / R::DATATYPE.size())
    }
}
