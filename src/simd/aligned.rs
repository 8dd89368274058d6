use std::alloc::{self, Layout};
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::constants::CACHE_LINE_SIZE;
use crate::error::{Result, TelemetryError};

/// Fixed-size array whose storage starts on a cache-line boundary
///
/// Indexing through `Deref` to a slice is bounds-checked; hot loops can use
/// the slice's `get_unchecked` once they have validated their indices.
pub struct CacheAlignedBuffer<T: Copy + Default> {
	ptr: NonNull<T>,
	len: usize,
	/// None when nothing was allocated (zero bytes)
	layout: Option<Layout>,
}

// SAFETY: the buffer uniquely owns its allocation, like a Box<[T]>
unsafe impl<T: Copy + Default + Send> Send for CacheAlignedBuffer<T> {}
unsafe impl<T: Copy + Default + Sync> Sync for CacheAlignedBuffer<T> {}

impl<T: Copy + Default> CacheAlignedBuffer<T> {
	/// Alignment used for the backing storage
	pub const ALIGNMENT: usize = if mem::align_of::<T>() > CACHE_LINE_SIZE {
		mem::align_of::<T>()
	} else {
		CACHE_LINE_SIZE
	};

	/// Allocates `len` elements initialised to `T::default()`
	///
	/// A size overflow is an error; allocator exhaustion aborts through
	/// `handle_alloc_error`.
	pub fn new(len: usize) -> Result<Self> {
		let size = mem::size_of::<T>()
			.checked_mul(len)
			.ok_or_else(|| TelemetryError::InvalidArgument(format!("buffer of {} elements overflows", len)))?;

		if size == 0 {
			return Ok(Self {
				ptr: NonNull::dangling(),
				len,
				layout: None,
			});
		}

		let layout = Layout::from_size_align(size, Self::ALIGNMENT)
			.map_err(|e| TelemetryError::InvalidArgument(format!("buffer of {} elements: {}", len, e)))?;

		// SAFETY: layout has a non-zero size
		let raw = unsafe { alloc::alloc(layout) } as *mut T;
		let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));

		for i in 0..len {
			// SAFETY: i < len and the allocation holds len elements
			unsafe { ptr.as_ptr().add(i).write(T::default()) };
		}

		Ok(Self { ptr, len, layout: Some(layout) })
	}

	/// Allocates an aligned copy of `values`
	pub fn from_slice(values: &[T]) -> Result<Self> {
		let mut buffer = Self::new(values.len())?;
		buffer.copy_from_slice(values);
		Ok(buffer)
	}

	pub fn as_slice(&self) -> &[T] {
		// SAFETY: ptr is valid (or dangling for zero bytes) for len initialised elements
		unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
	}

	pub fn as_mut_slice(&mut self) -> &mut [T] {
		// SAFETY: as above, and &mut self guarantees uniqueness
		unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
	}
}

impl<T: Copy + Default> Deref for CacheAlignedBuffer<T> {
	type Target = [T];

	fn deref(&self) -> &[T] {
		self.as_slice()
	}
}

impl<T: Copy + Default> DerefMut for CacheAlignedBuffer<T> {
	fn deref_mut(&mut self) -> &mut [T] {
		self.as_mut_slice()
	}
}

impl<T: Copy + Default> Drop for CacheAlignedBuffer<T> {
	fn drop(&mut self) {
		if let Some(layout) = self.layout {
			// SAFETY: allocated in new() with this exact layout
			unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) };
		}
	}
}

impl<T: Copy + Default + fmt::Debug> fmt::Debug for CacheAlignedBuffer<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CacheAlignedBuffer")
			.field("len", &self.len)
			.field("data", &self.as_slice())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_storage_is_cache_line_aligned() {
		for len in [1usize, 3, 100, 4097] {
			let buffer = CacheAlignedBuffer::<f64>::new(len).unwrap();
			assert_eq!(buffer.as_ptr() as usize % CACHE_LINE_SIZE, 0);
			assert_eq!(buffer.len(), len);
			assert!(buffer.iter().all(|&v| v == 0.0));
		}
	}

	#[test]
	fn test_index_and_write() {
		let mut buffer = CacheAlignedBuffer::<i32>::new(100).unwrap();
		buffer[0] = 42;
		buffer[99] = -7;
		assert_eq!(buffer[0], 42);
		assert_eq!(buffer[99], -7);
		assert_eq!(buffer.get(100), None);
	}

	#[test]
	#[should_panic]
	fn test_out_of_bounds_index_panics() {
		let buffer = CacheAlignedBuffer::<u8>::new(4).unwrap();
		let _value = buffer[4];
	}

	#[test]
	fn test_empty_and_from_slice() {
		let empty = CacheAlignedBuffer::<f64>::new(0).unwrap();
		assert!(empty.is_empty());

		let copy = CacheAlignedBuffer::from_slice(&[1u64, 2, 3]).unwrap();
		assert_eq!(copy.as_slice(), &[1, 2, 3]);
	}

	#[test]
	fn test_size_overflow_is_an_error() {
		assert!(CacheAlignedBuffer::<u64>::new(usize::MAX).is_err());
	}
}
