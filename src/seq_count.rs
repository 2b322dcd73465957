//! Transaction sequence number providers.
//!
//! Sequence numbers are allocated by the sending entity and wrap around at the maximum value of
//! the underlying integer type.
use core::cell::Cell;
use std::sync::{
    atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering},
    Arc,
};

/// Core trait for objects which can provide a sequence count.
///
/// The [Self::MAX_BIT_WIDTH] determines the width of the sequence number field in generated
/// PDUs.
pub trait SequenceCounter {
    const MAX_BIT_WIDTH: usize;

    fn get(&self) -> u64;

    fn increment(&self);

    fn get_and_increment(&self) -> u64 {
        let val = self.get();
        self.increment();
        val
    }
}

/// Simple counter based on a [Cell]. Not thread-safe.
#[derive(Debug)]
pub struct SequenceCounterSimple<T: Copy> {
    seq_count: Cell<T>,
    max_val: T,
}

macro_rules! impl_simple_counter {
    ($ty: ty) => {
        impl SequenceCounterSimple<$ty> {
            pub const fn new_custom_max_val(max_val: $ty) -> Self {
                Self {
                    seq_count: Cell::new(0),
                    max_val,
                }
            }

            pub const fn new() -> Self {
                Self::new_custom_max_val(<$ty>::MAX)
            }
        }

        impl Default for SequenceCounterSimple<$ty> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl SequenceCounter for SequenceCounterSimple<$ty> {
            const MAX_BIT_WIDTH: usize = core::mem::size_of::<$ty>() * 8;

            fn get(&self) -> u64 {
                self.seq_count.get() as u64
            }

            fn increment(&self) {
                let current = self.seq_count.get();
                if current >= self.max_val {
                    self.seq_count.set(0);
                } else {
                    self.seq_count.set(current + 1);
                }
            }
        }
    };
}

impl_simple_counter!(u8);
impl_simple_counter!(u16);
impl_simple_counter!(u32);
impl_simple_counter!(u64);

macro_rules! atomic_counter {
    ($name: ident, $atomic: ty, $ty: ty) => {
        /// Thread-safe counter which wraps around at the maximum value of the integer type.
        #[derive(Debug, Default)]
        pub struct $name(pub $atomic);

        impl $name {
            pub const fn new(start: $ty) -> Self {
                Self(<$atomic>::new(start))
            }
        }

        impl SequenceCounter for $name {
            const MAX_BIT_WIDTH: usize = core::mem::size_of::<$ty>() * 8;

            fn get(&self) -> u64 {
                self.0.load(Ordering::Relaxed) as u64
            }

            fn increment(&self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }

            fn get_and_increment(&self) -> u64 {
                // Atomic types wrap around on overflow.
                self.0.fetch_add(1, Ordering::Relaxed) as u64
            }
        }
    };
}

atomic_counter!(SequenceCounterAtomicU8, AtomicU8, u8);
atomic_counter!(SequenceCounterAtomicU16, AtomicU16, u16);
atomic_counter!(SequenceCounterAtomicU32, AtomicU32, u32);
atomic_counter!(SequenceCounterAtomicU64, AtomicU64, u64);

impl<T: SequenceCounter> SequenceCounter for Arc<T> {
    const MAX_BIT_WIDTH: usize = T::MAX_BIT_WIDTH;

    fn get(&self) -> u64 {
        self.as_ref().get()
    }

    fn increment(&self) {
        self.as_ref().increment()
    }

    fn get_and_increment(&self) -> u64 {
        self.as_ref().get_and_increment()
    }
}
