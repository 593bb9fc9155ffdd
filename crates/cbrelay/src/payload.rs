// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload contract: a type with a known native size and a decode step.
//!
//! cbrelay never interprets payload contents. The native library hands over
//! a contiguous block of [`Payload::SIZE`] bytes; [`Payload::decode`] turns
//! it into the typed value delivered to the handler.

/// A payload type the native library can deliver.
pub trait Payload: Sized + 'static {
    /// Type name used for identity lookup and diagnostics.
    const TYPE_NAME: &'static str;

    /// Size in bytes of the native payload block.
    const SIZE: usize;

    /// Decode the native block.
    ///
    /// `bytes` is exactly [`Self::SIZE`] bytes long.
    fn decode(bytes: &[u8]) -> Self;
}

/// Read a plain `#[repr(C)]` value out of a native payload block.
///
/// # Safety
///
/// Every bit pattern of `size_of::<T>()` bytes must be a valid `T`
/// (no `bool`, enum, reference or `NonNull` fields), and `bytes` must be at
/// least `size_of::<T>()` long.
#[inline]
pub unsafe fn decode_plain<T: Copy>(bytes: &[u8]) -> T {
    debug_assert!(bytes.len() >= std::mem::size_of::<T>());
    std::ptr::read_unaligned(bytes.as_ptr().cast::<T>())
}

/// View a plain `#[repr(C)]` value as the bytes the native library would send.
///
/// Used by simulated boundaries and tests to produce payload blocks.
///
/// # Safety
///
/// `T` must contain no padding bytes.
#[inline]
pub unsafe fn encode_plain<T: Copy>(value: &T) -> Vec<u8> {
    std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>())
        .to_vec()
}

/// Implement [`Payload`] for a `#[repr(C)]` plain-data struct.
///
/// The struct's `size_of` becomes [`Payload::SIZE`] and decoding is an
/// unaligned read. Invoking the macro asserts that every bit pattern is a
/// valid value of the struct.
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, Debug, PartialEq)]
/// struct Ping { value: i32 }
///
/// cbrelay::native_payload!(Ping);
/// ```
#[macro_export]
macro_rules! native_payload {
    ($ty:ty) => {
        $crate::native_payload!($ty, stringify!($ty));
    };
    ($ty:ty, $name:expr) => {
        impl $crate::Payload for $ty {
            const TYPE_NAME: &'static str = $name;
            const SIZE: usize = ::std::mem::size_of::<$ty>();

            fn decode(bytes: &[u8]) -> Self {
                // SAFETY: the macro invoker guarantees plain-data layout.
                unsafe { $crate::payload::decode_plain::<$ty>(bytes) }
            }
        }
    };
}
