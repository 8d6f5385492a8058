use enum_dispatch::enum_dispatch;

use super::error::FabricResult;
use super::rdma::RemoteAddr;
use crate::datatype::{Datatype, Operation};

/// Single element atomics, executed at the target in one step.
#[enum_dispatch]
pub(crate) trait CommAtomic {
    /// Store `op(target, value)` at `dst` and return the previous value in `result`.
    fn fetch_and_op(
        &self,
        dst: RemoteAddr,
        value: &[u8],
        result: &mut [u8],
        dtype: Datatype,
        op: &Operation,
    ) -> FabricResult<()>;
    /// Store `value` at `dst` if it currently equals `compare`, the previous value lands in `result`.
    fn compare_and_swap(
        &self,
        dst: RemoteAddr,
        value: &[u8],
        compare: &[u8],
        result: &mut [u8],
        dtype: Datatype,
    ) -> FabricResult<()>;
}
