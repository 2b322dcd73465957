//! Variable-width unsigned integer fields used for entity IDs and sequence numbers.
use core::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ByteConversionError {
    /// The passed slice is too small. Returns the passed slice length and expected minimum size.
    #[error("target slice with size {found} is too small, expected size of at least {expected}")]
    ToSliceTooSmall { found: usize, expected: usize },
    /// The provider buffer is too small. Returns the passed slice length and expected minimum size.
    #[error("source slice with size {found} too small, expected at least {expected} bytes")]
    FromSliceTooSmall { found: usize, expected: usize },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("value {value} too large for width {width}")]
pub struct UnsignedByteFieldError {
    pub value: u64,
    pub width: usize,
}

/// Unsigned big-endian integer with a width between 0 and 8 octets.
///
/// CFDP entity IDs and transaction sequence numbers are encoded this way. Equality and hashing
/// take the width into account, use [Self::value] to compare the numerical value only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnsignedByteField {
    width: usize,
    value: u64,
}

impl UnsignedByteField {
    /// The value must fit into `width` octets, which is only asserted in debug builds. Use
    /// [Self::new_checked] for values which are not known to fit.
    #[inline]
    pub const fn new(width: usize, value: u64) -> Self {
        debug_assert!(Self::fits(width, value), "value does not fit into byte field width");
        Self { width, value }
    }

    pub fn new_checked(width: usize, value: u64) -> Result<Self, UnsignedByteFieldError> {
        if !Self::fits(width, value) {
            return Err(UnsignedByteFieldError { value, width });
        }
        Ok(Self { width, value })
    }

    const fn fits(width: usize, value: u64) -> bool {
        width == 8 || (width < 8 && value < (1_u64 << (width * 8)))
    }

    /// Smallest width in `[1, 2, 4, 8]` which can hold the value.
    pub fn new_minimal(value: u64) -> Self {
        let width = if value <= u8::MAX as u64 {
            1
        } else if value <= u16::MAX as u64 {
            2
        } else if value <= u32::MAX as u64 {
            4
        } else {
            8
        };
        Self { width, value }
    }

    #[inline]
    pub const fn value_const(&self) -> u64 {
        self.value
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.width
    }

    pub fn new_from_be_bytes(width: usize, buf: &[u8]) -> Result<Self, ByteConversionError> {
        if buf.len() < width {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: width,
            });
        }
        let value = buf[0..width]
            .iter()
            .fold(0_u64, |acc, byte| (acc << 8) | *byte as u64);
        Ok(Self { width, value })
    }

    pub fn write_to_be_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.width {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.width,
            });
        }
        let raw = self.value.to_be_bytes();
        buf[0..self.width].copy_from_slice(&raw[8 - self.width..]);
        Ok(self.width)
    }
}

impl Default for UnsignedByteField {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

macro_rules! typed_byte_field {
    ($name: ident, $ty: ty) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub struct $name($ty);

        impl $name {
            pub const fn new(value: $ty) -> Self {
                Self(value)
            }

            pub const fn value(&self) -> $ty {
                self.0
            }
        }

        impl From<$name> for UnsignedByteField {
            fn from(field: $name) -> Self {
                UnsignedByteField::new(core::mem::size_of::<$ty>(), field.0 as u64)
            }
        }
    };
}

typed_byte_field!(UnsignedByteFieldU8, u8);
typed_byte_field!(UnsignedByteFieldU16, u16);
typed_byte_field!(UnsignedByteFieldU32, u32);
typed_byte_field!(UnsignedByteFieldU64, u64);
