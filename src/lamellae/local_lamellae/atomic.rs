use super::comm::LocalComm;
use crate::datatype::{Datatype, Operation};
use crate::lamellae::{
    CommAtomic, FabricError, FabricResult, RemoteAddr, StatKind, WireType,
};

impl LocalComm {
    /// Atomics are ordered after every earlier write of this unit to the same target.
    fn prepare_atomic(
        &self,
        dst: &RemoteAddr,
        dtype: Datatype,
        bufs: &[usize],
    ) -> FabricResult<()> {
        for len in bufs {
            if *len != dtype.size() {
                return Err(FabricError::BufferSize {
                    expected: dtype.size(),
                    actual: *len,
                });
            }
        }
        self.window(dst.window)?.locate(dst, dtype.size())?;
        self.retire_pending(|op| op.addr.window == dst.window && op.addr.rank == dst.rank)?;
        self.state()
            .stats
            .record(StatKind::Atomic, Some((WireType::Elem(dtype), 1)));
        Ok(())
    }
}

impl CommAtomic for LocalComm {
    #[tracing::instrument(skip_all, level = "debug")]
    fn fetch_and_op(
        &self,
        dst: RemoteAddr,
        value: &[u8],
        result: &mut [u8],
        dtype: Datatype,
        op: &Operation,
    ) -> FabricResult<()> {
        if !op.supports(dtype) {
            return Err(FabricError::UnsupportedOperation {
                op: op.name(),
                dtype,
            });
        }
        self.prepare_atomic(&dst, dtype, &[value.len(), result.len()])?;
        let (region, offset) = self.window(dst.window)?.locate(&dst, dtype.size())?;
        region.update(offset, dtype.size(), |target| {
            result.copy_from_slice(target);
            op.apply(dtype, value, target);
        })
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn compare_and_swap(
        &self,
        dst: RemoteAddr,
        value: &[u8],
        compare: &[u8],
        result: &mut [u8],
        dtype: Datatype,
    ) -> FabricResult<()> {
        if !dtype.is_integral() {
            return Err(FabricError::UnsupportedOperation {
                op: "compare_and_swap",
                dtype,
            });
        }
        self.prepare_atomic(&dst, dtype, &[value.len(), compare.len(), result.len()])?;
        let (region, offset) = self.window(dst.window)?.locate(&dst, dtype.size())?;
        region.update(offset, dtype.size(), |target| {
            result.copy_from_slice(target);
            if *target == *compare {
                target.copy_from_slice(value);
            }
        })
    }
}
