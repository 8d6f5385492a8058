use crate::datatype::Datatype;
use crate::lamellae::{
    Comm, CommInfo, CommRdma, FabricResult, RemoteAddr, RmaError, RmaResult, WireType,
};

/// One transport call of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Piece {
    pub(crate) wire: WireType,
    pub(crate) count: usize,
    /// byte offset of the piece within the transfer
    pub(crate) offset: usize,
    /// byte length of the piece
    pub(crate) len: usize,
}

/// Split of an element count into at most a bulk call and a remainder call.
///
/// The bulk call moves `nelem / max` items of the composite chunk type, the remainder call moves
/// `nelem % max` plain elements right after it. Either is absent when its count is zero, so an
/// empty transfer plans no call at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkPlan {
    bulk: Option<Piece>,
    remainder: Option<Piece>,
}

impl ChunkPlan {
    pub(crate) fn new(
        dtype: Datatype,
        nelem: usize,
        max: usize,
        chunk: WireType,
    ) -> RmaResult<ChunkPlan> {
        let max = max.max(1);
        let nchunks = nelem / max;
        let rest = nelem % max;
        if nchunks > max {
            return Err(RmaError::CountTooLarge {
                count: nelem,
                max: max.saturating_mul(max),
            });
        }
        let bulk_len = nchunks * max * dtype.size();
        let bulk = (nchunks > 0).then_some(Piece {
            wire: chunk,
            count: nchunks,
            offset: 0,
            len: bulk_len,
        });
        let remainder = (rest > 0).then_some(Piece {
            wire: WireType::Elem(dtype),
            count: rest,
            offset: bulk_len,
            len: rest * dtype.size(),
        });
        Ok(ChunkPlan { bulk, remainder })
    }

    /// Plan `nelem` elements of `dtype` against the limits of `comm`.
    pub(crate) fn for_comm(comm: &Comm, dtype: Datatype, nelem: usize) -> RmaResult<ChunkPlan> {
        ChunkPlan::new(
            dtype,
            nelem,
            comm.max_contig_elements(),
            comm.chunk_type(dtype),
        )
    }

    /// Bulk then remainder.
    pub(crate) fn slots(&self) -> [Option<Piece>; 2] {
        [self.bulk, self.remainder]
    }

    pub(crate) fn pieces(&self) -> impl Iterator<Item = Piece> {
        self.slots().into_iter().flatten()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bulk.is_none() && self.remainder.is_none()
    }

    /// Total bytes moved by all pieces.
    pub(crate) fn byte_len(&self) -> usize {
        self.pieces().map(|piece| piece.len).sum()
    }

    /// Check the whole transfer against the target window before any piece is issued, so a
    /// failing remainder never leaves the bulk call behind.
    pub(crate) fn check_target(&self, comm: &Comm, addr: RemoteAddr) -> FabricResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        comm.check_span(addr, self.byte_len())
    }
}
