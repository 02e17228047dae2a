use std::{fmt, marker::PhantomData};

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

/// Reduction operation over container elements.
///
/// `None` means "overwrite with the incoming value" and is what plain
/// receives use when folding is not requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    #[default]
    None,
    Sum,
    Prod,
    Min,
    Max,
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReduceOp::None => "none",
            ReduceOp::Sum => "sum",
            ReduceOp::Prod => "prod",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        };
        f.write_str(name)
    }
}

/// Capability table of a container element type.
///
/// Reductions operate on raw byte buffers holding densely packed elements;
/// a type without the reduce capability participating in a reduction is a
/// configuration error and fatal.
pub trait ElemType: Send + Sync {
    fn name(&self) -> &'static str;

    /// Size of one element in bytes.
    fn size(&self) -> usize;

    fn has_reduce(&self) -> bool {
        false
    }

    /// Elementwise `acc = acc ⊕ rhs`; `ReduceOp::None` overwrites `acc`.
    fn reduce(&self, _acc: &mut [u8], _rhs: &[u8], _op: ReduceOp) {
        panic!("need reduce capability for type '{}', not set", self.name());
    }

    /// Fill `buf` with the identity of `op` (Sum→0, Prod→1, Min→+∞, Max→−∞).
    fn init(&self, _buf: &mut [u8], _op: ReduceOp) {
        panic!("need reduce capability for type '{}', not set", self.name());
    }
}

impl fmt::Debug for dyn ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElemType({}, {}B)", self.name(), self.size())
    }
}

/// Scalars that know their reduction algebra.
trait Scalar: Pod + Send + Sync {
    fn identity(op: ReduceOp) -> Self;
    fn combine(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_scalar_float {
    ($t:ty) => {
        impl Scalar for $t {
            fn identity(op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => 0.0,
                    ReduceOp::Prod => 1.0,
                    ReduceOp::Min => <$t>::INFINITY,
                    ReduceOp::Max => <$t>::NEG_INFINITY,
                    ReduceOp::None => panic!("no identity for ReduceOp::None"),
                }
            }

            fn combine(a: Self, b: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => a + b,
                    ReduceOp::Prod => a * b,
                    ReduceOp::Min => a.min(b),
                    ReduceOp::Max => a.max(b),
                    ReduceOp::None => b,
                }
            }
        }
    };
}

macro_rules! impl_scalar_int {
    ($t:ty) => {
        impl Scalar for $t {
            fn identity(op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => 0,
                    ReduceOp::Prod => 1,
                    ReduceOp::Min => <$t>::MAX,
                    ReduceOp::Max => <$t>::MIN,
                    ReduceOp::None => panic!("no identity for ReduceOp::None"),
                }
            }

            fn combine(a: Self, b: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => a.wrapping_add(b),
                    ReduceOp::Prod => a.wrapping_mul(b),
                    ReduceOp::Min => a.min(b),
                    ReduceOp::Max => a.max(b),
                    ReduceOp::None => b,
                }
            }
        }
    };
}

impl_scalar_float!(f32);
impl_scalar_float!(f64);
impl_scalar_int!(i32);
impl_scalar_int!(i64);

/// POD element type with full reduce capability.
pub struct PodType<T> {
    name: &'static str,
    _marker: PhantomData<T>,
}

impl<T> PodType<T> {
    const fn new(name: &'static str) -> Self {
        PodType {
            name,
            _marker: PhantomData,
        }
    }
}

impl<T: Scalar> ElemType for PodType<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn has_reduce(&self) -> bool {
        true
    }

    fn reduce(&self, acc: &mut [u8], rhs: &[u8], op: ReduceOp) {
        let acc: &mut [T] = bytemuck::cast_slice_mut(acc);
        let rhs: &[T] = bytemuck::cast_slice(rhs);
        assert_eq!(acc.len(), rhs.len(), "reduce length mismatch");
        if op == ReduceOp::None {
            acc.copy_from_slice(rhs);
        } else {
            for (a, b) in acc.iter_mut().zip(rhs) {
                *a = T::combine(*a, *b, op);
            }
        }
    }

    fn init(&self, buf: &mut [u8], op: ReduceOp) {
        let buf: &mut [T] = bytemuck::cast_slice_mut(buf);
        buf.fill(T::identity(op));
    }
}

/// Opaque POD type without reduce capability.
pub struct OpaqueType {
    name: &'static str,
    size: usize,
}

impl ElemType for OpaqueType {
    fn name(&self) -> &'static str {
        self.name
    }

    fn size(&self) -> usize {
        self.size
    }
}

pub static CHAR: OpaqueType = OpaqueType {
    name: "char",
    size: 1,
};
pub static INT32: PodType<i32> = PodType::new("int32");
pub static INT64: PodType<i64> = PodType::new("int64");
pub static FLOAT: PodType<f32> = PodType::new("float");
pub static DOUBLE: PodType<f64> = PodType::new("double");

#[cfg(test)]
mod tests {
    use super::*;

    fn as_bytes(v: &[f64]) -> &[u8] {
        bytemuck::cast_slice(v)
    }

    #[test]
    fn reduce_folds_elementwise() {
        let mut acc = [1.0f64, 2.0, 3.0];
        let rhs = [4.0f64, 1.0, 5.0];
        DOUBLE.reduce(bytemuck::cast_slice_mut(&mut acc), as_bytes(&rhs), ReduceOp::Sum);
        assert_eq!(acc, [5.0, 3.0, 8.0]);
        DOUBLE.reduce(bytemuck::cast_slice_mut(&mut acc), as_bytes(&rhs), ReduceOp::Min);
        assert_eq!(acc, [4.0, 1.0, 5.0]);
        DOUBLE.reduce(bytemuck::cast_slice_mut(&mut acc), as_bytes(&rhs), ReduceOp::None);
        assert_eq!(acc, rhs);
    }

    #[test]
    fn init_fills_identity() {
        let mut buf = [7.0f64; 4];
        DOUBLE.init(bytemuck::cast_slice_mut(&mut buf), ReduceOp::Sum);
        assert_eq!(buf, [0.0; 4]);
        DOUBLE.init(bytemuck::cast_slice_mut(&mut buf), ReduceOp::Min);
        assert_eq!(buf, [f64::INFINITY; 4]);

        let mut ints = [0i64; 2];
        INT64.init(bytemuck::cast_slice_mut(&mut ints), ReduceOp::Max);
        assert_eq!(ints, [i64::MIN; 2]);
    }

    #[test]
    #[should_panic(expected = "need reduce capability")]
    fn opaque_type_has_no_reduce() {
        let mut a = [0u8; 2];
        let b = [0u8; 2];
        CHAR.reduce(&mut a, &b, ReduceOp::Sum);
    }
}
