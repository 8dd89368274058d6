use crate::constants::PREFETCH_DISTANCE;

/// Hints that the cache line holding `ptr` will be read soon
///
/// Prefetching never faults and has no observable effect besides timing. On
/// targets without a prefetch instruction this is a no-op.
#[inline(always)]
pub fn prefetch_read<T>(ptr: *const T) {
	#[cfg(target_arch = "x86_64")]
	{
		use std::arch::x86_64::{_MM_HINT_T0, _mm_prefetch};
		// SAFETY: prefetch does not dereference the address architecturally
		unsafe { _mm_prefetch::<_MM_HINT_T0>(ptr as *const i8) };
	}
	#[cfg(not(target_arch = "x86_64"))]
	{
		let _ = ptr;
	}
}

/// Applies `f` to every element in place, prefetching `PREFETCH_DISTANCE` ahead
pub fn transform_with_prefetch<T: Copy, F: FnMut(T) -> T>(data: &mut [T], mut f: F) {
	let len = data.len();

	for i in 0..len {
		if i + PREFETCH_DISTANCE < len {
			prefetch_read(&data[i + PREFETCH_DISTANCE] as *const T);
		}

		data[i] = f(data[i]);
	}
}

/// Maps every element to `x * 2 + 1` (wrapping) with prefetching
pub fn process_with_prefetch(data: &mut [i32]) {
	transform_with_prefetch(data, |x| x.wrapping_mul(2).wrapping_add(1));
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_process_matches_plain_loop() {
		for size in [0usize, 1, PREFETCH_DISTANCE, PREFETCH_DISTANCE + 1, 1000] {
			let mut data: Vec<i32> = (0..size as i32).collect();
			process_with_prefetch(&mut data);

			let expected: Vec<i32> = (0..size as i32).map(|x| x * 2 + 1).collect();
			assert_eq!(data, expected);
		}
	}

	#[test]
	fn test_process_wraps_on_overflow() {
		let mut data = [i32::MAX, i32::MIN];
		process_with_prefetch(&mut data);
		assert_eq!(data, [-1, 1]);
	}

	#[test]
	fn test_transform_with_custom_function() {
		let mut data = vec![1.5f64; 20];
		transform_with_prefetch(&mut data, |x| x * x);
		assert!(data.iter().all(|&x| x == 2.25));
	}
}
