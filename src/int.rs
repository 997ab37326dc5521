//! Provides `BinInteger`, a trait for types like `u8` and `u32`.
use core::{fmt, ops};

/// Integral types with efficient binary operations.
pub trait BinInteger:
    Copy
    + Clone
    + fmt::Debug
    + Eq
    + PartialEq
    + ops::BitAnd<Output = Self>
    + ops::BitOr<Output = Self>
    + ops::Not<Output = Self>
    + ops::Shl<u32, Output = Self>
    + ops::Shr<u32, Output = Self>
    + Send
    + Sync
    + 'static
{
    const ZERO: Self;
    const BITS: u32;

    fn get_bit(self, i: u32) -> bool;
    fn set_bit(&mut self, i: u32);
    fn clear_bit(&mut self, i: u32);

    fn trailing_zeros(self) -> u32;

    /// Find the least significant set bit (find-first-set). Returns `None` if
    /// `self` is zero.
    fn ffs(self) -> Option<u32>;

    /// Find the most significant set bit (find-last-set). Returns `None` if
    /// `self` is zero.
    fn fls(self) -> Option<u32>;

    /// Get the position of the first set bit starting from the specified
    /// position (inclusive). Returns `BITS` if there isn't one.
    fn bit_scan_forward(self, start: u32) -> u32;
}

macro_rules! impl_binary_integer {
    ($type:ty) => {
        impl BinInteger for $type {
            const ZERO: Self = 0;
            const BITS: u32 = <$type>::BITS;

            #[inline]
            fn get_bit(self, i: u32) -> bool {
                if i < Self::BITS {
                    self & ((1 as $type) << i) != 0
                } else {
                    false
                }
            }

            #[inline]
            fn set_bit(&mut self, i: u32) {
                if i < Self::BITS {
                    *self |= (1 as $type) << i;
                }
            }

            #[inline]
            fn clear_bit(&mut self, i: u32) {
                if i < Self::BITS {
                    *self &= !((1 as $type) << i);
                }
            }

            #[inline]
            fn trailing_zeros(self) -> u32 {
                <$type>::trailing_zeros(self)
            }

            #[inline]
            fn ffs(self) -> Option<u32> {
                if self == 0 {
                    None
                } else {
                    Some(<$type>::trailing_zeros(self))
                }
            }

            #[inline]
            fn fls(self) -> Option<u32> {
                if self == 0 {
                    None
                } else {
                    Some(Self::BITS - 1 - <$type>::leading_zeros(self))
                }
            }

            #[inline]
            fn bit_scan_forward(self, start: u32) -> u32 {
                if start >= Self::BITS {
                    Self::BITS
                } else {
                    (self & !(((1 as $type) << start).wrapping_sub(1))).trailing_zeros()
                }
            }
        }
    };
}

impl_binary_integer!(u8);
impl_binary_integer!(u16);
impl_binary_integer!(u32);
impl_binary_integer!(u64);
impl_binary_integer!(u128);
impl_binary_integer!(usize);
