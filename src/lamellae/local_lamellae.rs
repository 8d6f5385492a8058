//! In-process fabric: every unit of the runtime lives in the calling process.
//!
//! Each unit gets its own endpoint ([Comm::Local]) and is typically driven from its own thread.
//! Remote memory is simulated by per-rank [MemRegion]s, puts and accumulates are only applied to
//! the target when the origin flushes, units are grouped into simulated nodes that may share
//! memory, and collectives rendezvous every member of a communication domain.
pub(crate) mod atomic;
pub(crate) mod collective;
pub(crate) mod comm;
pub(crate) mod mem;
pub(crate) mod rdma;

use super::{Comm, CommId, FabricError, FabricResult, Window};
use crate::config;
use crate::global_pointer::{Displacement, SegmentId, TeamId};
use crate::memregion::{BasePtr, MemRegion};
use crate::rma::GlobalComm;
use crate::team::{LocalPeer, SegmentEntry, TeamContext, TeamRegistry};
use collective::{Mailbox, Rendezvous};
use comm::LocalComm;
use mem::WindowState;
use rdma::UnitState;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalBuilder {
    num_units: usize,
    units_per_node: Option<usize>,
    max_contig_elements: usize,
    completion_delay: usize,
}

impl LocalBuilder {
    /// A fabric of `num_units` units, every other setting taken from the environment.
    pub fn new(num_units: usize) -> LocalBuilder {
        LocalBuilder {
            num_units,
            units_per_node: config().units_per_node,
            max_contig_elements: config().max_contig_elements,
            completion_delay: config().completion_delay,
        }
    }

    /// Place units on simulated nodes of `units` consecutive global ids.
    pub fn units_per_node(mut self, units: usize) -> LocalBuilder {
        self.units_per_node = Some(units);
        self
    }

    pub fn max_contig_elements(mut self, max: usize) -> LocalBuilder {
        self.max_contig_elements = max;
        self
    }

    /// Number of polls a request reports as still in flight before it completes.
    pub fn completion_delay(mut self, polls: usize) -> LocalBuilder {
        self.completion_delay = polls;
        self
    }

    pub fn build(self) -> Arc<LocalFabric> {
        let num_units = self.num_units.max(1);
        let units_per_node = match self.units_per_node {
            Some(n) if n > 0 => n,
            _ => num_units,
        };
        let mut comms = HashMap::new();
        comms.insert(
            CommId::WORLD,
            Arc::new(CommState::new((0..num_units).collect())),
        );
        debug!(
            "local fabric: {} units, {} per node, max contig {}",
            num_units, units_per_node, self.max_contig_elements
        );
        Arc::new(LocalFabric {
            num_units,
            units_per_node,
            max_contig_elements: self.max_contig_elements.max(1),
            completion_delay: self.completion_delay,
            comms: RwLock::new(comms),
            windows: RwLock::new(HashMap::new()),
            units: (0..num_units).map(|_| UnitState::default()).collect(),
            registries: (0..num_units)
                .map(|_| Arc::new(TeamRegistry::new()))
                .collect(),
            mailbox: Mailbox::default(),
            pool_window: RwLock::new(None),
            next_comm: AtomicUsize::new(1),
            next_window: AtomicUsize::new(0),
        })
    }
}

/// A communication domain: its members by global id, in rank order.
pub(crate) struct CommState {
    pub(crate) members: Vec<usize>,
    pub(crate) rendezvous: Rendezvous,
}

impl CommState {
    fn new(members: Vec<usize>) -> CommState {
        let size = members.len();
        CommState {
            members,
            rendezvous: Rendezvous::new(size),
        }
    }

    pub(crate) fn rank_of(&self, unit: usize, comm: CommId) -> FabricResult<usize> {
        self.members
            .iter()
            .position(|m| *m == unit)
            .ok_or(FabricError::NotAMember { unit, comm })
    }
}

pub struct LocalFabric {
    num_units: usize,
    units_per_node: usize,
    pub(crate) max_contig_elements: usize,
    pub(crate) completion_delay: usize,
    comms: RwLock<HashMap<CommId, Arc<CommState>>>,
    pub(crate) windows: RwLock<HashMap<Window, Arc<WindowState>>>,
    pub(crate) units: Vec<UnitState>,
    registries: Vec<Arc<TeamRegistry>>,
    pub(crate) mailbox: Mailbox,
    pool_window: RwLock<Option<Window>>,
    next_comm: AtomicUsize,
    next_window: AtomicUsize,
}

impl std::fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LocalFabric {{ units: {}, per node: {} }}",
            self.num_units, self.units_per_node
        )
    }
}

impl LocalFabric {
    pub fn num_units(&self) -> usize {
        self.num_units
    }

    pub fn node_of(&self, unit: usize) -> usize {
        unit / self.units_per_node
    }

    pub fn same_node(&self, a: usize, b: usize) -> bool {
        self.node_of(a) == self.node_of(b)
    }

    fn check_unit(&self, unit: usize) -> FabricResult<()> {
        if unit < self.num_units {
            Ok(())
        } else {
            Err(FabricError::RankOutOfRange {
                rank: unit,
                size: self.num_units,
            })
        }
    }

    pub(crate) fn comm_state(&self, comm: CommId) -> FabricResult<Arc<CommState>> {
        self.comms
            .read()
            .get(&comm)
            .cloned()
            .ok_or(FabricError::UnknownComm(comm))
    }

    /// Create a communication domain of the given global units, ranked in the given order.
    pub fn create_comm(&self, members: &[usize]) -> FabricResult<CommId> {
        for unit in members {
            self.check_unit(*unit)?;
        }
        let comm = CommId(self.next_comm.fetch_add(1, Ordering::SeqCst));
        self.comms
            .write()
            .insert(comm, Arc::new(CommState::new(members.to_vec())));
        debug!("created {:?} with members {:?}", comm, members);
        Ok(comm)
    }

    /// Register `bytes_per_rank` zeroed bytes for every rank of `comm`.
    pub fn create_window(&self, comm: CommId, bytes_per_rank: usize) -> FabricResult<Window> {
        let state = self.comm_state(comm)?;
        let window = Window(self.next_window.fetch_add(1, Ordering::SeqCst));
        self.windows.write().insert(
            window,
            Arc::new(WindowState::new(comm, state.members.len(), bytes_per_rank)),
        );
        debug!(
            "created {:?} over {:?} with {} bytes per rank",
            window, comm, bytes_per_rank
        );
        Ok(window)
    }

    pub(crate) fn endpoint(self: &Arc<Self>, unit: usize) -> FabricResult<Arc<Comm>> {
        self.check_unit(unit)?;
        Ok(Arc::new(LocalComm::new(unit, self.clone()).into()))
    }

    /// The team contexts known to `unit`.
    pub fn registry(&self, unit: usize) -> FabricResult<Arc<TeamRegistry>> {
        self.registries
            .get(unit)
            .cloned()
            .ok_or(FabricError::RankOutOfRange {
                rank: unit,
                size: self.num_units,
            })
    }

    fn pool_window(&self) -> FabricResult<Window> {
        (*self.pool_window.read()).ok_or(FabricError::NotInitialized)
    }

    /// Set up the all-units team and return one [GlobalComm] per unit, in global id order.
    ///
    /// Every unit gets a local allocation pool of `pool_bytes` and `heap_bytes` of memory in the
    /// team window for collective segments.
    pub fn init_world(
        self: &Arc<Self>,
        pool_bytes: usize,
        heap_bytes: usize,
    ) -> FabricResult<Vec<GlobalComm>> {
        let pool = self.create_window(CommId::WORLD, pool_bytes)?;
        *self.pool_window.write() = Some(pool);
        let heap = self.create_window(CommId::WORLD, heap_bytes)?;
        let members = (0..self.num_units).collect::<Vec<_>>();
        self.register_team(TeamId::ALL, CommId::WORLD, heap, &members)?;
        (0..self.num_units)
            .map(|unit| Ok(GlobalComm::new(self.endpoint(unit)?, self.registry(unit)?)))
            .collect()
    }

    /// Form a team of the given global units, each contributing `heap_bytes` to the team window.
    pub fn create_team(
        &self,
        team: TeamId,
        members: &[usize],
        heap_bytes: usize,
    ) -> FabricResult<()> {
        let comm = self.create_comm(members)?;
        let window = self.create_window(comm, heap_bytes)?;
        self.register_team(team, comm, window, members)
    }

    /// Drop the team from every member's registry.
    pub fn disband_team(&self, team: TeamId, members: &[usize]) -> FabricResult<()> {
        for unit in members {
            self.registry(*unit)?.deregister(team);
        }
        Ok(())
    }

    fn register_team(
        &self,
        team: TeamId,
        comm: CommId,
        window: Window,
        members: &[usize],
    ) -> FabricResult<()> {
        let pool = self.pool_window()?;
        for (rank, unit) in members.iter().enumerate() {
            let sharedmem = self.shared_table(*unit, members, pool)?;
            let ctx = TeamContext::new(
                team,
                comm,
                window,
                pool,
                CommId::WORLD,
                rank,
                members.to_vec(),
                sharedmem,
            );
            self.registry(*unit)?.register(ctx);
        }
        debug!("registered team {:?} with members {:?}", team, members);
        Ok(())
    }

    /// Topology as seen by `viewer`: every member on its node, numbered in team order.
    fn shared_table(
        &self,
        viewer: usize,
        members: &[usize],
        pool: Window,
    ) -> FabricResult<Vec<Option<LocalPeer>>> {
        let mut local_id = 0;
        let mut table = Vec::with_capacity(members.len());
        for unit in members {
            if self.same_node(viewer, *unit) {
                table.push(Some(LocalPeer {
                    local_id,
                    pool_base: BasePtr::new(self.region(pool, *unit)?, Displacement::new(0)),
                }));
                local_id += 1;
            } else {
                table.push(None);
            }
        }
        Ok(table)
    }

    /// Publish a collectively allocated segment on every member of `team`.
    ///
    /// `disps` holds, for every team unit, where the segment starts in its part of the team window.
    pub fn publish_segment(
        &self,
        team: TeamId,
        segment: SegmentId,
        disps: &[Displacement],
    ) -> FabricResult<()> {
        let members = self.team_members(team)?;
        if disps.len() != members.len() {
            return Err(FabricError::BufferSize {
                expected: members.len(),
                actual: disps.len(),
            });
        }
        for unit in &members {
            let registry = self.registry(*unit)?;
            let ctx = registry.resolve(team).ok_or(FabricError::NotInitialized)?;
            let mut baseptrs = Vec::new();
            for (rank, disp) in disps.iter().enumerate() {
                if ctx.local_peer(rank).is_some() {
                    baseptrs.push(BasePtr::new(self.region(ctx.window(), rank)?, *disp));
                }
            }
            ctx.segments()
                .publish(segment, SegmentEntry::new(disps.to_vec(), baseptrs));
        }
        debug!("published segment {:?} on team {:?}", segment, team);
        Ok(())
    }

    pub fn retire_segment(&self, team: TeamId, segment: SegmentId) -> FabricResult<()> {
        for unit in self.team_members(team)? {
            if let Some(ctx) = self.registry(unit)?.resolve(team) {
                ctx.segments().remove(segment);
            }
        }
        Ok(())
    }

    fn team_members(&self, team: TeamId) -> FabricResult<Vec<usize>> {
        self.registries
            .iter()
            .find_map(|registry| registry.resolve(team))
            .and_then(|ctx| (0..ctx.size()).map(|rank| ctx.global_unit(rank)).collect())
            .ok_or(FabricError::NotInitialized)
    }

    /// Memory of `rank` in `window`, bypassing any pending operation.
    pub fn region(&self, window: Window, rank: usize) -> FabricResult<Arc<MemRegion>> {
        let state = self
            .windows
            .read()
            .get(&window)
            .cloned()
            .ok_or(FabricError::UnknownWindow(window))?;
        state.region(rank)
    }

    /// Requests of `unit` that have been issued and not yet completed or freed.
    pub fn outstanding_requests(&self, unit: usize) -> usize {
        self.units
            .get(unit)
            .map(|state| state.requests.lock().len())
            .unwrap_or(0)
    }

    /// Puts and accumulates of `unit` still waiting for remote completion.
    pub fn pending_operations(&self, unit: usize) -> usize {
        self.units
            .get(unit)
            .map(|state| state.pending.lock().len())
            .unwrap_or(0)
    }
}
