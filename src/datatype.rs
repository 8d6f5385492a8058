use std::fmt;
use std::sync::Arc;

/// The primitive element types the transport can move and combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl Datatype {
    pub const ALL: [Datatype; 10] = [
        Datatype::I8,
        Datatype::I16,
        Datatype::I32,
        Datatype::I64,
        Datatype::U8,
        Datatype::U16,
        Datatype::U32,
        Datatype::U64,
        Datatype::F32,
        Datatype::F64,
    ];

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Datatype::I8 | Datatype::U8 => 1,
            Datatype::I16 | Datatype::U16 => 2,
            Datatype::I32 | Datatype::U32 | Datatype::F32 => 4,
            Datatype::I64 | Datatype::U64 | Datatype::F64 => 8,
        }
    }

    pub fn is_integral(&self) -> bool {
        !matches!(self, Datatype::F32 | Datatype::F64)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

type UserFn = dyn Fn(&[u8], &mut [u8], Datatype) + Send + Sync;

/// A user supplied reduction.
///
/// The function receives the incoming operand bytes and the in/out accumulator bytes (both a whole
/// number of elements of the given datatype) and must leave `op(inout, input)` in `inout`.
#[derive(Clone)]
pub struct UserOp {
    name: &'static str,
    func: Arc<UserFn>,
}

impl UserOp {
    pub fn new<F>(name: &'static str, func: F) -> UserOp
    where
        F: Fn(&[u8], &mut [u8], Datatype) + Send + Sync + 'static,
    {
        UserOp {
            name,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for UserOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UserOp({})", self.name)
    }
}

/// Element-wise operations used by accumulate, fetch-and-op and the reductions.
///
/// Every operation combines an existing value `a` (the target or accumulator) with an incoming
/// value `b` and stores the result in place of `a`.
#[derive(Debug, Clone)]
pub enum Operation {
    Min,
    Max,
    Sum,
    Prod,
    BitAnd,
    BitOr,
    BitXor,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    /// store `b`
    Replace,
    /// keep `a`, used to atomically read through fetch-and-op
    NoOp,
    User(UserOp),
}

impl Operation {
    /// Whether this operation is defined on the given datatype.
    pub fn supports(&self, dtype: Datatype) -> bool {
        match self {
            Operation::BitAnd
            | Operation::BitOr
            | Operation::BitXor
            | Operation::LogicalAnd
            | Operation::LogicalOr
            | Operation::LogicalXor => dtype.is_integral(),
            _ => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Min => "min",
            Operation::Max => "max",
            Operation::Sum => "sum",
            Operation::Prod => "prod",
            Operation::BitAnd => "bit_and",
            Operation::BitOr => "bit_or",
            Operation::BitXor => "bit_xor",
            Operation::LogicalAnd => "logical_and",
            Operation::LogicalOr => "logical_or",
            Operation::LogicalXor => "logical_xor",
            Operation::Replace => "replace",
            Operation::NoOp => "no_op",
            Operation::User(user) => user.name,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Operation::User(_))
    }

    /// Combine `input` into `inout` element by element.
    ///
    /// Both buffers hold whole elements of `dtype`; any trailing partial element is left untouched.
    /// Callers check [Operation::supports] first, an unsupported pairing leaves `inout` unchanged.
    pub(crate) fn apply(&self, dtype: Datatype, input: &[u8], inout: &mut [u8]) {
        if let Operation::User(user) = self {
            (user.func)(input, inout, dtype);
            return;
        }
        match dtype {
            Datatype::I8 => combine_slices::<i8>(self, input, inout),
            Datatype::I16 => combine_slices::<i16>(self, input, inout),
            Datatype::I32 => combine_slices::<i32>(self, input, inout),
            Datatype::I64 => combine_slices::<i64>(self, input, inout),
            Datatype::U8 => combine_slices::<u8>(self, input, inout),
            Datatype::U16 => combine_slices::<u16>(self, input, inout),
            Datatype::U32 => combine_slices::<u32>(self, input, inout),
            Datatype::U64 => combine_slices::<u64>(self, input, inout),
            Datatype::F32 => combine_slices::<f32>(self, input, inout),
            Datatype::F64 => combine_slices::<f64>(self, input, inout),
        }
    }
}

fn combine_slices<T: Dist>(op: &Operation, input: &[u8], inout: &mut [u8]) {
    let size = std::mem::size_of::<T>();
    for (a, b) in inout.chunks_exact_mut(size).zip(input.chunks_exact(size)) {
        let res = T::combine(op, T::load(a), T::load(b));
        res.store(a);
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Element types that can be transferred through global memory.
///
/// Implemented for the fixed-width integer and floating point primitives, each mapped onto its
/// [Datatype] tag.
pub trait Dist: sealed::Sealed + Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    const DATATYPE: Datatype;
    #[doc(hidden)]
    fn load(bytes: &[u8]) -> Self;
    #[doc(hidden)]
    fn store(self, bytes: &mut [u8]);
    #[doc(hidden)]
    fn combine(op: &Operation, a: Self, b: Self) -> Self;
}

macro_rules! impl_dist_int {
    ($($t:ty => $dt:ident),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl Dist for $t {
                const DATATYPE: Datatype = Datatype::$dt;
                fn load(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }
                fn store(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes());
                }
                fn combine(op: &Operation, a: Self, b: Self) -> Self {
                    match op {
                        Operation::Min => a.min(b),
                        Operation::Max => a.max(b),
                        Operation::Sum => a.wrapping_add(b),
                        Operation::Prod => a.wrapping_mul(b),
                        Operation::BitAnd => a & b,
                        Operation::BitOr => a | b,
                        Operation::BitXor => a ^ b,
                        Operation::LogicalAnd => ((a != 0) && (b != 0)) as $t,
                        Operation::LogicalOr => ((a != 0) || (b != 0)) as $t,
                        Operation::LogicalXor => ((a != 0) ^ (b != 0)) as $t,
                        Operation::Replace => b,
                        Operation::NoOp | Operation::User(_) => a,
                    }
                }
            }
        )*
    };
}

macro_rules! impl_dist_float {
    ($($t:ty => $dt:ident),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl Dist for $t {
                const DATATYPE: Datatype = Datatype::$dt;
                fn load(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }
                fn store(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes());
                }
                fn combine(op: &Operation, a: Self, b: Self) -> Self {
                    match op {
                        Operation::Min => a.min(b),
                        Operation::Max => a.max(b),
                        Operation::Sum => a + b,
                        Operation::Prod => a * b,
                        Operation::Replace => b,
                        _ => a,
                    }
                }
            }
        )*
    };
}

impl_dist_int!(i8 => I8, i16 => I16, i32 => I32, i64 => I64, u8 => U8, u16 => U16, u32 => U32, u64 => U64);
impl_dist_float!(f32 => F32, f64 => F64);

/// View a slice of elements as its raw bytes.
pub(crate) fn as_bytes<T: Dist>(data: &[T]) -> &[u8] {
    // every Dist type is a plain primitive without padding
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data)) }
}

/// View a mutable slice of elements as its raw bytes.
pub(crate) fn as_bytes_mut<T: Dist>(data: &mut [T]) -> &mut [u8] {
    // any bit pattern is a valid value of every Dist type
    unsafe {
        std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut u8, std::mem::size_of_val(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_typed<T: Dist>(op: &Operation, input: &[T], inout: &mut [T]) {
        let input = as_bytes(input).to_vec();
        op.apply(T::DATATYPE, &input, as_bytes_mut(inout));
    }

    #[test]
    fn integer_kernels() {
        let mut acc = [5i32, -3, 0, 7];
        apply_typed(&Operation::Sum, &[1, 1, 1, 1], &mut acc);
        assert_eq!(acc, [6, -2, 1, 8]);
        apply_typed(&Operation::Max, &[0, 0, 0, 10], &mut acc);
        assert_eq!(acc, [6, 0, 1, 10]);
        apply_typed(&Operation::BitAnd, &[2, 0xff, 1, 3], &mut acc);
        assert_eq!(acc, [2, 0, 1, 2]);
        apply_typed(&Operation::LogicalOr, &[0, 0, 0, 0], &mut acc);
        assert_eq!(acc, [1, 0, 1, 1]);
        apply_typed(&Operation::NoOp, &[9, 9, 9, 9], &mut acc);
        assert_eq!(acc, [1, 0, 1, 1]);
        apply_typed(&Operation::Replace, &[9, 8, 7, 6], &mut acc);
        assert_eq!(acc, [9, 8, 7, 6]);
    }

    #[test]
    fn unsigned_sum_wraps() {
        let mut acc = [u8::MAX];
        apply_typed(&Operation::Sum, &[2u8], &mut acc);
        assert_eq!(acc, [1]);
    }

    #[test]
    fn float_kernels() {
        let mut acc = [1.5f64, -2.0];
        apply_typed(&Operation::Prod, &[2.0, 2.0], &mut acc);
        assert_eq!(acc, [3.0, -4.0]);
        apply_typed(&Operation::Min, &[0.0, 0.0], &mut acc);
        assert_eq!(acc, [0.0, -4.0]);
    }

    #[test]
    fn bitwise_rejected_for_floats() {
        assert!(!Operation::BitXor.supports(Datatype::F32));
        assert!(!Operation::LogicalAnd.supports(Datatype::F64));
        assert!(Operation::Sum.supports(Datatype::F32));
        assert!(Operation::BitXor.supports(Datatype::U16));
    }

    #[test]
    fn user_op_sees_raw_elements() {
        let op = Operation::User(UserOp::new("absmax", |input, inout, dtype| {
            assert_eq!(dtype, Datatype::I64);
            for (a, b) in inout.chunks_exact_mut(8).zip(input.chunks_exact(8)) {
                let x = i64::load(a).abs().max(i64::load(b).abs());
                x.store(a);
            }
        }));
        let mut acc = [-4i64, 2];
        apply_typed(&op, &[3, -7], &mut acc);
        assert_eq!(acc, [4, 7]);
    }

    #[test]
    fn sizes_match_primitives() {
        assert_eq!(u16::DATATYPE.size(), 2);
        assert_eq!(f32::DATATYPE.size(), 4);
        assert_eq!(i64::DATATYPE.size(), 8);
        assert!(!f64::DATATYPE.is_integral());
    }
}
