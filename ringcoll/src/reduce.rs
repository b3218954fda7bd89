//! Element-wise reduction primitives for [`crate::collective::allreduce_op`].

use crate::types::ReduceOp;

/// Element types that support the four built-in reduction operations.
pub trait Reducible: bytemuck::Pod {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, i32, i64, u8, u32, u64);
impl_reducible!(float: f32, f64);

/// Fold `incoming` into `acc` element by element.
///
/// Both slices must have the same length.
pub fn reduce_into<T: Reducible>(acc: &mut [T], incoming: &[T], op: ReduceOp) {
    debug_assert_eq!(acc.len(), incoming.len());
    for (a, &b) in acc.iter_mut().zip(incoming) {
        *a = T::reduce(*a, b, op);
    }
}
