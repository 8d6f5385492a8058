use super::resolve::{resolve, resolve_window};
use super::GlobalComm;
use crate::global_pointer::GlobalPointer;
use crate::lamellae::{CommProgress, RmaResult};

use tracing::debug;

impl GlobalComm {
    /// Wait until every operation this unit issued to the unit of `gptr`, on the window backing
    /// its segment, is complete at the target and visible to every unit.
    ///
    /// The trailing probe lets the transport process incoming events, which a peer's in-flight
    /// write may depend on.
    pub fn flush(&self, gptr: GlobalPointer) -> RmaResult<()> {
        let target = resolve(&self.teams, gptr)?;
        debug!("flush rank {} {:?}", target.addr.rank, target.addr.window);
        self.comm.flush(target.addr.rank, target.addr.window)?;
        self.comm.win_sync(target.addr.window)?;
        self.comm.iprobe(target.comm)?;
        Ok(())
    }

    /// Like [GlobalComm::flush] for every target of the window backing the segment of `gptr`.
    /// The unit of `gptr` is ignored.
    pub fn flush_all(&self, gptr: GlobalPointer) -> RmaResult<()> {
        let (window, comm) = resolve_window(&self.teams, &gptr)?;
        debug!("flush all {:?}", window);
        self.comm.flush_all(window)?;
        self.comm.win_sync(window)?;
        self.comm.iprobe(comm)?;
        Ok(())
    }

    /// Wait until every operation to the unit of `gptr` completed at the origin only; the source
    /// buffers may be reused but the target may not observe the writes yet.
    pub fn flush_local(&self, gptr: GlobalPointer) -> RmaResult<()> {
        let target = resolve(&self.teams, gptr)?;
        debug!("flush local rank {} {:?}", target.addr.rank, target.addr.window);
        self.comm
            .flush_local(target.addr.rank, target.addr.window)?;
        self.comm.iprobe(target.comm)?;
        Ok(())
    }

    pub fn flush_local_all(&self, gptr: GlobalPointer) -> RmaResult<()> {
        let (window, comm) = resolve_window(&self.teams, &gptr)?;
        debug!("flush local all {:?}", window);
        self.comm.flush_local_all(window)?;
        self.comm.iprobe(comm)?;
        Ok(())
    }
}
