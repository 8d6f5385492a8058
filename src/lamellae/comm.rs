pub(crate) mod atomic;
pub(crate) mod collective;
pub(crate) mod error;
pub(crate) mod rdma;

pub(crate) use atomic::*;
pub(crate) use collective::*;
pub use error::*;
pub(crate) use rdma::*;

use super::{Backend, CommId, RequestId, Window};
use crate::datatype::{Datatype, Operation};
use crate::lamellae::local_lamellae::comm::LocalComm;
use crate::memregion::MemRegion;

use enum_dispatch::enum_dispatch;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A transport endpoint of one unit.
#[enum_dispatch(CommInfo, CommRdma, CommAtomic, CommRequest, CommProgress, CommCollective)]
#[derive(Debug)]
pub(crate) enum Comm {
    Local(LocalComm),
}

#[enum_dispatch]
pub(crate) trait CommInfo {
    /// Global id of the unit owning this endpoint.
    fn my_unit(&self) -> usize;
    fn num_units(&self) -> usize;
    fn backend(&self) -> Backend;
    /// Largest element count a single transport call accepts.
    fn max_contig_elements(&self) -> usize;
    /// The composite type moving exactly `max_contig_elements` elements of `dtype` as one unit.
    fn chunk_type(&self, dtype: Datatype) -> WireType;
    fn stats(&self) -> StatsSnapshot;
}

/// Data fetched by a completed request; `None` for requests that only push data.
pub(crate) type Completion = Option<Vec<u8>>;

#[enum_dispatch]
pub(crate) trait CommRequest {
    /// Block until every request completes locally, in one combined call.
    fn wait_all(&self, requests: &[RequestId]) -> FabricResult<Vec<Completion>>;
    /// Poll the requests; they are consumed only if all of them have completed.
    fn test_all(&self, requests: &[RequestId]) -> FabricResult<Option<Vec<Completion>>>;
    /// Advance every request and report whether all have completed. Nothing is consumed.
    fn poll_all(&self, requests: &[RequestId]) -> FabricResult<bool>;
    /// Release a request without waiting for it.
    fn free_request(&self, request: RequestId);
}

#[enum_dispatch]
pub(crate) trait CommProgress {
    /// Complete every operation to `target` on `win` at the target.
    fn flush(&self, target: usize, win: Window) -> FabricResult<()>;
    fn flush_all(&self, win: Window) -> FabricResult<()>;
    /// Complete every operation to `target` on `win` at the origin only.
    fn flush_local(&self, target: usize, win: Window) -> FabricResult<()>;
    fn flush_local_all(&self, win: Window) -> FabricResult<()>;
    /// Synchronize the public and private copies of the calling unit's window memory.
    fn win_sync(&self, win: Window) -> FabricResult<()>;
    /// Zero-size probe that lets the transport make progress, returns whether a message is pending.
    fn iprobe(&self, comm: CommId) -> FabricResult<bool>;
}

/// Per endpoint counters of everything handed to the transport.
#[derive(Debug, Default)]
pub(crate) struct CommStats {
    puts: AtomicUsize,
    gets: AtomicUsize,
    accumulates: AtomicUsize,
    atomics: AtomicUsize,
    chunked: AtomicUsize,
    flushes: AtomicUsize,
    local_flushes: AtomicUsize,
    probes: AtomicUsize,
    collectives: AtomicUsize,
    p2p: AtomicUsize,
    bytes: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum StatKind {
    Put,
    Get,
    Accumulate,
    Atomic,
    Flush,
    LocalFlush,
    Probe,
    Collective,
    P2p,
}

impl CommStats {
    /// Record one transport call moving `count` items of `wire`.
    pub(crate) fn record(&self, kind: StatKind, wire: Option<(WireType, usize)>) {
        let counter = match kind {
            StatKind::Put => &self.puts,
            StatKind::Get => &self.gets,
            StatKind::Accumulate => &self.accumulates,
            StatKind::Atomic => &self.atomics,
            StatKind::Flush => &self.flushes,
            StatKind::LocalFlush => &self.local_flushes,
            StatKind::Probe => &self.probes,
            StatKind::Collective => &self.collectives,
            StatKind::P2p => &self.p2p,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some((wire, count)) = wire {
            if wire.is_chunk() {
                self.chunked.fetch_add(1, Ordering::Relaxed);
            }
            self.bytes.fetch_add(wire.size() * count, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            puts: self.puts.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            accumulates: self.accumulates.load(Ordering::Relaxed),
            atomics: self.atomics.load(Ordering::Relaxed),
            chunked: self.chunked.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            local_flushes: self.local_flushes.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
            collectives: self.collectives.load(Ordering::Relaxed),
            p2p: self.p2p.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point in time copy of an endpoint's transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub puts: usize,
    pub gets: usize,
    pub accumulates: usize,
    pub atomics: usize,
    /// calls that used a composite chunk type
    pub chunked: usize,
    pub flushes: usize,
    pub local_flushes: usize,
    pub probes: usize,
    pub collectives: usize,
    pub p2p: usize,
    pub bytes: usize,
}

impl StatsSnapshot {
    /// Number of one-sided data movement calls (puts, gets, accumulates and atomics).
    pub fn transfers(&self) -> usize {
        self.puts + self.gets + self.accumulates + self.atomics
    }

    /// Counters accumulated since `earlier` was taken.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            puts: self.puts - earlier.puts,
            gets: self.gets - earlier.gets,
            accumulates: self.accumulates - earlier.accumulates,
            atomics: self.atomics - earlier.atomics,
            chunked: self.chunked - earlier.chunked,
            flushes: self.flushes - earlier.flushes,
            local_flushes: self.local_flushes - earlier.local_flushes,
            probes: self.probes - earlier.probes,
            collectives: self.collectives - earlier.collectives,
            p2p: self.p2p - earlier.p2p,
            bytes: self.bytes - earlier.bytes,
        }
    }
}
