//! Team contexts, as handed to the communication layer by team management.
//!
//! A [TeamContext] is the calling unit's view of one team: its communication domain, the
//! windows backing collective and local allocations, its own rank, and the shared-memory table
//! listing which team members live on the same node. Contexts are created when a team is formed
//! and registered in the unit's [TeamRegistry]; the communication layer only ever reads them.
use crate::global_pointer::{Displacement, SegmentId, TeamId};
use crate::lamellae::{CommId, Window};
use crate::memregion::BasePtr;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A team member reachable through shared memory.
#[derive(Debug, Clone)]
pub struct LocalPeer {
    /// rank of the peer among the team members on the caller's node
    pub local_id: usize,
    /// start of the peer's local allocation pool
    pub pool_base: BasePtr,
}

/// Per-unit addressing of one collectively allocated segment.
#[derive(Debug)]
pub struct SegmentEntry {
    disps: Vec<Displacement>,
    baseptrs: Vec<BasePtr>,
}

impl SegmentEntry {
    /// `disps` holds the segment start for every team unit within the team window, `baseptrs`
    /// the segment start for every node-local peer, indexed by [LocalPeer::local_id].
    pub fn new(disps: Vec<Displacement>, baseptrs: Vec<BasePtr>) -> SegmentEntry {
        SegmentEntry { disps, baseptrs }
    }

    pub fn disp(&self, unit: usize) -> Option<Displacement> {
        self.disps.get(unit).copied()
    }

    pub fn baseptr(&self, local_id: usize) -> Option<&BasePtr> {
        self.baseptrs.get(local_id)
    }
}

/// Segments registered in a team, keyed by segment id.
///
/// Filled by the segment allocator between allocation barriers. An entry never changes while it
/// is published.
#[derive(Debug, Default)]
pub struct SegmentTable {
    entries: RwLock<HashMap<SegmentId, Arc<SegmentEntry>>>,
}

impl SegmentTable {
    pub fn publish(&self, segment: SegmentId, entry: SegmentEntry) {
        self.entries.write().insert(segment, Arc::new(entry));
    }

    pub fn remove(&self, segment: SegmentId) -> Option<Arc<SegmentEntry>> {
        self.entries.write().remove(&segment)
    }

    pub fn lookup(&self, segment: SegmentId) -> Option<Arc<SegmentEntry>> {
        self.entries.read().get(&segment).cloned()
    }
}

#[derive(Debug)]
pub struct TeamContext {
    id: TeamId,
    comm: CommId,
    window: Window,
    local_window: Window,
    world: CommId,
    my_unit: usize,
    members: Vec<usize>,
    sharedmem: Vec<Option<LocalPeer>>,
    segments: SegmentTable,
}

impl TeamContext {
    /// `members` lists the global id of every team unit in team rank order, `sharedmem` has one
    /// entry per team unit.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TeamId,
        comm: CommId,
        window: Window,
        local_window: Window,
        world: CommId,
        my_unit: usize,
        members: Vec<usize>,
        sharedmem: Vec<Option<LocalPeer>>,
    ) -> TeamContext {
        TeamContext {
            id,
            comm,
            window,
            local_window,
            world,
            my_unit,
            members,
            sharedmem,
            segments: SegmentTable::default(),
        }
    }

    pub fn id(&self) -> TeamId {
        self.id
    }

    /// Communication domain of the team, ranked in team order.
    pub fn comm(&self) -> CommId {
        self.comm
    }

    /// Window backing the team's collective segments.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Window backing every unit's local allocation pool, ranked by global unit id.
    pub fn local_window(&self) -> Window {
        self.local_window
    }

    /// Communication domain of the local window.
    pub fn world(&self) -> CommId {
        self.world
    }

    /// Rank of the calling unit within the team.
    pub fn my_unit(&self) -> usize {
        self.my_unit
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn global_unit(&self, unit: usize) -> Option<usize> {
        self.members.get(unit).copied()
    }

    pub fn local_peer(&self, unit: usize) -> Option<&LocalPeer> {
        self.sharedmem.get(unit).and_then(|peer| peer.as_ref())
    }

    pub fn segments(&self) -> &SegmentTable {
        &self.segments
    }
}

/// The team contexts known to one unit.
#[derive(Debug, Default)]
pub struct TeamRegistry {
    teams: RwLock<HashMap<TeamId, Arc<TeamContext>>>,
}

impl TeamRegistry {
    pub fn new() -> TeamRegistry {
        TeamRegistry::default()
    }

    pub fn register(&self, ctx: TeamContext) -> Arc<TeamContext> {
        let ctx = Arc::new(ctx);
        self.teams.write().insert(ctx.id(), ctx.clone());
        ctx
    }

    pub fn deregister(&self, team: TeamId) -> Option<Arc<TeamContext>> {
        self.teams.write().remove(&team)
    }

    pub fn resolve(&self, team: TeamId) -> Option<Arc<TeamContext>> {
        self.teams.read().get(&team).cloned()
    }
}
