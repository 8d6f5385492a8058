use crate::lamellae::{CommId, FabricError, FabricResult, RemoteAddr};
use crate::memregion::MemRegion;

use std::sync::Arc;

/// Memory registered in one window, one region per rank of its communication domain.
pub(crate) struct WindowState {
    pub(crate) comm: CommId,
    regions: Vec<Arc<MemRegion>>,
}

impl WindowState {
    pub(crate) fn new(comm: CommId, ranks: usize, bytes_per_rank: usize) -> WindowState {
        WindowState {
            comm,
            regions: (0..ranks)
                .map(|_| Arc::new(MemRegion::new(bytes_per_rank)))
                .collect(),
        }
    }

    pub(crate) fn region(&self, rank: usize) -> FabricResult<Arc<MemRegion>> {
        self.regions
            .get(rank)
            .cloned()
            .ok_or(FabricError::RankOutOfRange {
                rank,
                size: self.regions.len(),
            })
    }

    /// Region and byte offset addressed by `addr`, checked against `len` bytes of access.
    pub(crate) fn locate(
        &self,
        addr: &RemoteAddr,
        len: usize,
    ) -> FabricResult<(Arc<MemRegion>, usize)> {
        let region = self.region(addr.rank)?;
        let offset = addr
            .disp
            .to_usize()
            .ok_or(FabricError::DisplacementOverflow {
                disp: addr.disp,
                bytes: len,
            })?;
        match offset.checked_add(len) {
            Some(end) if end <= region.len() => Ok((region, offset)),
            _ => Err(FabricError::OutOfBounds {
                offset,
                len,
                size: region.len(),
            }),
        }
    }
}
