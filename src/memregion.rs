//! Directly addressable memory backing a window on one unit.
//!
//! A [MemRegion] is what the transport exposes for one rank of a window: the calling unit's own
//! part through `local_region` and, for units on the same node, a peer's part through the base
//! pointers of the team's shared-memory table. A [BasePtr] is a position inside such a region;
//! the locality fast paths copy through it instead of issuing transport operations.
use crate::datatype::{as_bytes_mut, Dist};
use crate::global_pointer::Displacement;
use crate::lamellae::{FabricError, FabricResult};

use parking_lot::RwLock;
use std::sync::Arc;

pub struct MemRegion {
    data: RwLock<Box<[u8]>>,
}

impl std::fmt::Debug for MemRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemRegion({} bytes)", self.len())
    }
}

impl MemRegion {
    pub(crate) fn new(len: usize) -> MemRegion {
        MemRegion {
            data: RwLock::new(vec![0u8; len].into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, len: usize, offset: usize, size: usize) -> FabricResult<()> {
        match offset.checked_add(size) {
            Some(end) if end <= len => Ok(()),
            _ => Err(FabricError::OutOfBounds {
                offset,
                len: size,
                size: len,
            }),
        }
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> FabricResult<()> {
        let data = self.data.read();
        self.check(data.len(), offset, dst.len())?;
        dst.copy_from_slice(&data[offset..offset + dst.len()]);
        Ok(())
    }

    /// Copy `src` into the region starting at `offset`.
    pub fn write(&self, offset: usize, src: &[u8]) -> FabricResult<()> {
        let mut data = self.data.write();
        self.check(data.len(), offset, src.len())?;
        data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    pub(crate) fn snapshot(&self, offset: usize, len: usize) -> FabricResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }

    /// Run `op` on `len` bytes at `offset` while holding the region exclusively.
    pub(crate) fn update<R>(
        &self,
        offset: usize,
        len: usize,
        op: impl FnOnce(&mut [u8]) -> R,
    ) -> FabricResult<R> {
        let mut data = self.data.write();
        self.check(data.len(), offset, len)?;
        Ok(op(&mut data[offset..offset + len]))
    }

    /// Read `count` elements of `T` starting at byte `offset`.
    pub fn read_elems<T: Dist + Default>(&self, offset: usize, count: usize) -> FabricResult<Vec<T>> {
        let mut out = vec![T::default(); count];
        self.read(offset, as_bytes_mut(&mut out))?;
        Ok(out)
    }
}

/// A position inside a [MemRegion].
#[derive(Clone, Debug)]
pub struct BasePtr {
    region: Arc<MemRegion>,
    offset: Displacement,
}

impl BasePtr {
    pub fn new(region: Arc<MemRegion>, offset: Displacement) -> BasePtr {
        BasePtr { region, offset }
    }

    /// `None` if the advanced offset overflows.
    pub fn add(&self, bytes: u64) -> Option<BasePtr> {
        Some(BasePtr {
            region: self.region.clone(),
            offset: self.offset.checked_add(bytes)?,
        })
    }

    pub fn offset(&self) -> Displacement {
        self.offset
    }

    pub fn region(&self) -> &Arc<MemRegion> {
        &self.region
    }

    fn position(&self, len: usize) -> FabricResult<usize> {
        self.offset
            .to_usize()
            .ok_or(FabricError::DisplacementOverflow {
                disp: self.offset,
                bytes: len,
            })
    }

    pub(crate) fn copy_to(&self, dst: &mut [u8]) -> FabricResult<()> {
        self.region.read(self.position(dst.len())?, dst)
    }

    pub(crate) fn copy_from(&self, src: &[u8]) -> FabricResult<()> {
        self.region.write(self.position(src.len())?, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_checked() {
        let region = MemRegion::new(16);
        assert!(region.write(12, &[1, 2, 3, 4]).is_ok());
        assert!(matches!(
            region.write(13, &[1, 2, 3, 4]),
            Err(FabricError::OutOfBounds { .. })
        ));
        let mut buf = [0u8; 4];
        region.read(12, &mut buf).expect("in bounds");
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(region.read(usize::MAX, &mut buf).is_err());
    }

    #[test]
    fn base_ptr_offsets() {
        let region = Arc::new(MemRegion::new(32));
        let base = BasePtr::new(region.clone(), Displacement::new(8));
        base.add(4)
            .expect("offset")
            .copy_from(&7u32.to_ne_bytes())
            .expect("in bounds");
        assert_eq!(region.read_elems::<u32>(12, 1).expect("in bounds"), vec![7]);
        let mut out = [0u8; 4];
        base.add(4).expect("offset").copy_to(&mut out).expect("in bounds");
        assert_eq!(u32::from_ne_bytes(out), 7);
        assert!(base.add(u64::MAX).is_none());
    }
}
