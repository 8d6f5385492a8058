use super::comm::LocalComm;
use super::CommState;
use crate::config;
use crate::datatype::{Datatype, Operation};
use crate::lamellae::{
    CommCollective, CommId, FabricError, FabricResult, RecvSpec, SendSpec, StatKind, WireType,
};
use crate::warnings::RuntimeWarning;

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn wait_with_timeout<T>(cvar: &Condvar, guard: &mut MutexGuard<'_, T>, timer: &mut Instant, name: &str) {
    cvar.wait_for(guard, POLL_INTERVAL);
    let elapsed = timer.elapsed().as_secs_f64();
    if elapsed > config().deadlock_timeout {
        RuntimeWarning::CollectiveTimeout(name, elapsed).print();
        *timer = Instant::now();
    }
}

#[derive(Default)]
struct Round {
    arrived: usize,
    departed: usize,
    releasing: bool,
    slots: Vec<Vec<u8>>,
    result: Arc<Vec<Vec<u8>>>,
}

/// Two phase exchange between every rank of a communication domain.
pub(crate) struct Rendezvous {
    size: usize,
    round: Mutex<Round>,
    cvar: Condvar,
}

impl Rendezvous {
    pub(crate) fn new(size: usize) -> Rendezvous {
        Rendezvous {
            size,
            round: Mutex::new(Round {
                slots: vec![Vec::new(); size],
                ..Default::default()
            }),
            cvar: Condvar::new(),
        }
    }

    /// Contribute `data` as `rank` and return the contributions of every rank, in rank order.
    pub(crate) fn exchange(&self, rank: usize, data: Vec<u8>, name: &str) -> Arc<Vec<Vec<u8>>> {
        let mut round = self.round.lock();
        let mut timer = Instant::now();
        // the previous round is still handing out its result
        while round.releasing {
            wait_with_timeout(&self.cvar, &mut round, &mut timer, name);
        }
        if let Some(slot) = round.slots.get_mut(rank) {
            *slot = data;
        }
        round.arrived += 1;
        if round.arrived == self.size {
            let slots = std::mem::replace(&mut round.slots, vec![Vec::new(); self.size]);
            round.result = Arc::new(slots);
            round.releasing = true;
            self.cvar.notify_all();
        } else {
            while !round.releasing {
                wait_with_timeout(&self.cvar, &mut round, &mut timer, name);
            }
        }
        let result = round.result.clone();
        round.departed += 1;
        if round.departed == self.size {
            round.arrived = 0;
            round.departed = 0;
            round.releasing = false;
            round.result = Arc::default();
            self.cvar.notify_all();
        }
        result
    }
}

type MailKey = (CommId, usize, usize, i32);

/// Eager point-to-point messages keyed by (domain, source, destination, tag).
#[derive(Default)]
pub(crate) struct Mailbox {
    queues: Mutex<HashMap<MailKey, VecDeque<Vec<u8>>>>,
    cvar: Condvar,
}

impl Mailbox {
    fn post(&self, key: MailKey, data: Vec<u8>) {
        self.queues.lock().entry(key).or_default().push_back(data);
        self.cvar.notify_all();
    }

    fn take(&self, key: MailKey) -> Vec<u8> {
        let mut queues = self.queues.lock();
        let mut timer = Instant::now();
        loop {
            if let Entry::Occupied(mut queue) = queues.entry(key) {
                let data = queue.get_mut().pop_front();
                if queue.get().is_empty() {
                    queue.remove();
                }
                if let Some(data) = data {
                    return data;
                }
            }
            wait_with_timeout(&self.cvar, &mut queues, &mut timer, "recv");
        }
    }

    pub(crate) fn has_message(&self, comm: CommId, dst: usize) -> bool {
        self.queues
            .lock()
            .iter()
            .any(|((c, _, d, _), q)| *c == comm && *d == dst && !q.is_empty())
    }
}

fn block(buf: &[u8], start: usize, len: usize) -> FabricResult<&[u8]> {
    buf.get(start..start + len).ok_or(FabricError::OutOfBounds {
        offset: start,
        len,
        size: buf.len(),
    })
}

fn block_mut(buf: &mut [u8], start: usize, len: usize) -> FabricResult<&mut [u8]> {
    let size = buf.len();
    buf.get_mut(start..start + len)
        .ok_or(FabricError::OutOfBounds {
            offset: start,
            len,
            size,
        })
}

fn check_rank(rank: usize, size: usize) -> FabricResult<()> {
    if rank < size {
        Ok(())
    } else {
        Err(FabricError::RankOutOfRange { rank, size })
    }
}

fn copy_exact(dst: &mut [u8], src: &[u8]) -> FabricResult<()> {
    if dst.len() != src.len() {
        return Err(FabricError::BufferSize {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}

fn fold(parts: &[Vec<u8>], dtype: Datatype, op: &Operation) -> Vec<u8> {
    let mut parts = parts.iter();
    let mut acc = parts.next().cloned().unwrap_or_default();
    for part in parts {
        op.apply(dtype, part, &mut acc);
    }
    acc
}

impl LocalComm {
    fn member(&self, comm: CommId) -> FabricResult<(usize, Arc<CommState>)> {
        let state = self.fabric.comm_state(comm)?;
        let rank = state.rank_of(self.unit, comm)?;
        Ok((rank, state))
    }

    fn check_reduce(&self, dtype: Datatype, count: usize, op: &Operation) -> FabricResult<usize> {
        if !op.supports(dtype) {
            return Err(FabricError::UnsupportedOperation {
                op: op.name(),
                dtype,
            });
        }
        self.extent(WireType::Elem(dtype), count)
    }
}

impl CommCollective for LocalComm {
    fn comm_rank(&self, comm: CommId) -> FabricResult<usize> {
        self.member(comm).map(|(rank, _)| rank)
    }

    fn comm_size(&self, comm: CommId) -> FabricResult<usize> {
        Ok(self.fabric.comm_state(comm)?.members.len())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn barrier(&self, comm: CommId) -> FabricResult<()> {
        let (rank, state) = self.member(comm)?;
        self.state().stats.record(StatKind::Collective, None);
        state.rendezvous.exchange(rank, Vec::new(), "barrier");
        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn bcast(
        &self,
        comm: CommId,
        buf: &mut [u8],
        wire: WireType,
        count: usize,
        root: usize,
    ) -> FabricResult<()> {
        let (rank, state) = self.member(comm)?;
        check_rank(root, state.members.len())?;
        self.check_buf(buf.len(), wire, count)?;
        self.state()
            .stats
            .record(StatKind::Collective, Some((wire, count)));
        let data = if rank == root { buf.to_vec() } else { Vec::new() };
        let parts = state.rendezvous.exchange(rank, data, "bcast");
        if rank != root {
            copy_exact(buf, &parts[root])?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn scatter(
        &self,
        comm: CommId,
        send: &[u8],
        recv: &mut [u8],
        wire: WireType,
        count: usize,
        stride: usize,
        root: usize,
    ) -> FabricResult<()> {
        let (rank, state) = self.member(comm)?;
        let size = state.members.len();
        check_rank(root, size)?;
        let len = self.check_buf(recv.len(), wire, count)?;
        self.state()
            .stats
            .record(StatKind::Collective, Some((wire, count)));
        let mut data = Vec::new();
        if rank == root {
            data.reserve(len * size);
            for i in 0..size {
                data.extend_from_slice(block(send, i * stride, len)?);
            }
        }
        let parts = state.rendezvous.exchange(rank, data, "scatter");
        copy_exact(recv, block(&parts[root], rank * len, len)?)
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn gather(
        &self,
        comm: CommId,
        send: &[u8],
        recv: &mut [u8],
        wire: WireType,
        count: usize,
        stride: usize,
        root: usize,
    ) -> FabricResult<()> {
        let (rank, state) = self.member(comm)?;
        check_rank(root, state.members.len())?;
        let len = self.check_buf(send.len(), wire, count)?;
        self.state()
            .stats
            .record(StatKind::Collective, Some((wire, count)));
        let parts = state.rendezvous.exchange(rank, send.to_vec(), "gather");
        if rank == root {
            for (i, part) in parts.iter().enumerate() {
                copy_exact(block_mut(recv, i * stride, len)?, part)?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn allgather(
        &self,
        comm: CommId,
        send: Option<&[u8]>,
        recv: &mut [u8],
        wire: WireType,
        count: usize,
        stride: usize,
    ) -> FabricResult<()> {
        let (rank, state) = self.member(comm)?;
        let len = self.extent(wire, count)?;
        let data = match send {
            Some(send) => {
                self.check_buf(send.len(), wire, count)?;
                send.to_vec()
            }
            None => block(recv, rank * stride, len)?.to_vec(),
        };
        self.state()
            .stats
            .record(StatKind::Collective, Some((wire, count)));
        let parts = state.rendezvous.exchange(rank, data, "allgather");
        for (i, part) in parts.iter().enumerate() {
            copy_exact(block_mut(recv, i * stride, len)?, part)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn allgatherv(
        &self,
        comm: CommId,
        send: Option<&[u8]>,
        recv: &mut [u8],
        dtype: Datatype,
        counts: &[usize],
        displs: &[usize],
    ) -> FabricResult<()> {
        let (rank, state) = self.member(comm)?;
        let size = state.members.len();
        for table in [counts, displs] {
            if table.len() != size {
                return Err(FabricError::BufferSize {
                    expected: size,
                    actual: table.len(),
                });
            }
        }
        let elem = dtype.size();
        for count in counts {
            self.extent(WireType::Elem(dtype), *count)?;
        }
        let data = match send {
            Some(send) => {
                self.check_buf(send.len(), WireType::Elem(dtype), counts[rank])?;
                send.to_vec()
            }
            None => block(recv, displs[rank] * elem, counts[rank] * elem)?.to_vec(),
        };
        self.state().stats.record(
            StatKind::Collective,
            Some((WireType::Elem(dtype), counts[rank])),
        );
        let parts = state.rendezvous.exchange(rank, data, "allgatherv");
        for (i, part) in parts.iter().enumerate() {
            copy_exact(block_mut(recv, displs[i] * elem, counts[i] * elem)?, part)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn reduce(
        &self,
        comm: CommId,
        send: &[u8],
        recv: &mut [u8],
        dtype: Datatype,
        count: usize,
        op: &Operation,
        root: usize,
    ) -> FabricResult<()> {
        let (rank, state) = self.member(comm)?;
        check_rank(root, state.members.len())?;
        let len = self.check_reduce(dtype, count, op)?;
        self.check_buf(send.len(), WireType::Elem(dtype), count)?;
        if rank == root && recv.len() != len {
            return Err(FabricError::BufferSize {
                expected: len,
                actual: recv.len(),
            });
        }
        self.state()
            .stats
            .record(StatKind::Collective, Some((WireType::Elem(dtype), count)));
        let parts = state.rendezvous.exchange(rank, send.to_vec(), "reduce");
        if rank == root {
            copy_exact(recv, &fold(&parts, dtype, op))?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn allreduce(
        &self,
        comm: CommId,
        send: &[u8],
        recv: &mut [u8],
        dtype: Datatype,
        count: usize,
        op: &Operation,
    ) -> FabricResult<()> {
        let (rank, state) = self.member(comm)?;
        self.check_reduce(dtype, count, op)?;
        self.check_buf(send.len(), WireType::Elem(dtype), count)?;
        self.check_buf(recv.len(), WireType::Elem(dtype), count)?;
        self.state()
            .stats
            .record(StatKind::Collective, Some((WireType::Elem(dtype), count)));
        let parts = state.rendezvous.exchange(rank, send.to_vec(), "allreduce");
        copy_exact(recv, &fold(&parts, dtype, op))
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn send(&self, comm: CommId, msg: SendSpec<'_>) -> FabricResult<()> {
        let (rank, state) = self.member(comm)?;
        check_rank(msg.peer, state.members.len())?;
        self.check_buf(msg.buf.len(), msg.wire, msg.count)?;
        self.state()
            .stats
            .record(StatKind::P2p, Some((msg.wire, msg.count)));
        trace!(
            "unit {} send {} bytes to rank {} tag {}",
            self.unit,
            msg.buf.len(),
            msg.peer,
            msg.tag
        );
        self.fabric
            .mailbox
            .post((comm, rank, msg.peer, msg.tag), msg.buf.to_vec());
        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn recv(&self, comm: CommId, msg: RecvSpec<'_>) -> FabricResult<usize> {
        let (rank, state) = self.member(comm)?;
        check_rank(msg.peer, state.members.len())?;
        let capacity = self.check_buf(msg.buf.len(), msg.wire, msg.count)?;
        self.state()
            .stats
            .record(StatKind::P2p, Some((msg.wire, msg.count)));
        let data = self.fabric.mailbox.take((comm, msg.peer, rank, msg.tag));
        if data.len() > capacity {
            return Err(FabricError::Truncated {
                sent: data.len(),
                capacity,
            });
        }
        msg.buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn sendrecv(
        &self,
        comm: CommId,
        send: SendSpec<'_>,
        recv: RecvSpec<'_>,
    ) -> FabricResult<usize> {
        CommCollective::send(self, comm, send)?;
        CommCollective::recv(self, comm, recv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drained_queues_are_dropped() {
        let mailbox = Mailbox::default();
        let first = (CommId::WORLD, 0, 1, 7);
        let second = (CommId::WORLD, 0, 1, 8);
        mailbox.post(first, vec![1]);
        mailbox.post(first, vec![2]);
        mailbox.post(second, vec![3]);
        assert_eq!(mailbox.take(first), vec![1]);
        assert_eq!(mailbox.queues.lock().len(), 2);
        assert_eq!(mailbox.take(first), vec![2]);
        assert_eq!(mailbox.take(second), vec![3]);
        assert!(mailbox.queues.lock().is_empty());
        assert!(!mailbox.has_message(CommId::WORLD, 1));
    }
}
