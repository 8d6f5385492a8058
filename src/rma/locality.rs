use super::resolve::Target;
use crate::lamellae::{Comm, CommRdma, RmaError, RmaResult};
use crate::memregion::BasePtr;

use tracing::trace;

/// Where the bytes of a resolved target can be reached from the calling unit.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    /// the caller's own memory
    Local(BasePtr),
    /// a node-local peer's memory, mapped into the caller's address space
    Shared(BasePtr),
    /// only reachable through the transport
    Remote,
}

impl Route {
    /// Base pointer of a route that bypasses the transport.
    pub(crate) fn direct(&self) -> Option<&BasePtr> {
        match self {
            Route::Local(base) | Route::Shared(base) => Some(base),
            Route::Remote => None,
        }
    }
}

/// Pick the cheapest route to `target`.
///
/// Self targets always copy directly. Other targets are copied directly when `shared_windows` is
/// enabled, the segment may be shared and the topology lists the unit as a node-local peer whose
/// base pointer is known; everything else goes through the transport.
pub(crate) fn select(comm: &Comm, target: &Target, shared_windows: bool) -> RmaResult<Route> {
    if target.is_self() {
        let region = comm.local_region(target.addr.window)?;
        trace!("self route to {:?}", target.gptr);
        return Ok(Route::Local(BasePtr::new(region, target.addr.disp)));
    }
    if !shared_windows || !target.gptr.segment().shareable() {
        return Ok(Route::Remote);
    }
    let Some(peer) = target.team.local_peer(target.gptr.unit()) else {
        return Ok(Route::Remote);
    };
    let base = match &target.segment {
        None => Some(peer.pool_base.clone()),
        Some(entry) => entry.baseptr(peer.local_id).cloned(),
    };
    match base {
        Some(base) => {
            let offset = target.gptr.offset();
            let base = base
                .add(offset)
                .ok_or(RmaError::OffsetOutOfRange { offset })?;
            trace!("shared route to {:?}", target.gptr);
            Ok(Route::Shared(base))
        }
        None => Ok(Route::Remote),
    }
}
