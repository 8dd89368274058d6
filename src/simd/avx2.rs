use std::arch::x86_64::*;

use crate::simd::{SimdLevel, VectorBackend};

/// 32-byte aligned landing area for one 256-bit result
///
/// Vector results are only ever stored with aligned stores, then copied out.
#[repr(C, align(32))]
struct Lanes([f64; 4]);

/// 256-bit AVX2 kernels, four doubles per operation
#[derive(Debug, Clone, Copy)]
pub struct Avx2Backend {
	_private: (),
}

impl Avx2Backend {
	/// Returns the backend only if the running CPU supports AVX2
	pub fn new() -> Option<Self> {
		if is_x86_feature_detected!("avx2") {
			Some(Self { _private: () })
		} else {
			None
		}
	}
}

impl VectorBackend for Avx2Backend {
	fn level(&self) -> SimdLevel {
		SimdLevel::Avx2
	}

	fn sum(&self, values: &[f64]) -> f64 {
		// SAFETY: an Avx2Backend only exists after AVX2 was detected
		unsafe { sum_avx2(values) }
	}

	fn matmul(&self, a: &[f64], b: &[f64], c: &mut [f64], m: usize, k: usize, n: usize) {
		// SAFETY: AVX2 was detected at construction and the caller checked
		// the slice lengths against the dimensions
		unsafe { matmul_avx2(a, b, c, m, k, n) }
	}
}

#[target_feature(enable = "avx2")]
unsafe fn sum_avx2(values: &[f64]) -> f64 {
	let len = values.len();
	let ptr = values.as_ptr();
	let mut i = 0;
	let mut lanes = Lanes([0.0; 4]);

	// SAFETY: every load reads values[i..i + 4] with i + 4 <= len
	unsafe {
		let mut acc = _mm256_setzero_pd();
		while i + 4 <= len {
			let data = _mm256_loadu_pd(ptr.add(i));
			acc = _mm256_add_pd(acc, data);
			i += 4;
		}
		_mm256_store_pd(lanes.0.as_mut_ptr(), acc);
	}

	// Horizontal reduction, then the tail
	let mut sum = lanes.0[0] + lanes.0[1] + lanes.0[2] + lanes.0[3];
	for &value in &values[i..] {
		sum += value;
	}

	sum
}

#[target_feature(enable = "avx2")]
unsafe fn matmul_avx2(a: &[f64], b: &[f64], c: &mut [f64], m: usize, k: usize, n: usize) {
	let vector_cols = n - n % 4;
	let b_ptr = b.as_ptr();

	for i in 0..m {
		let a_row = &a[i * k..(i + 1) * k];
		let c_row = &mut c[i * n..(i + 1) * n];

		let mut j = 0;
		while j < vector_cols {
			let mut lanes = Lanes([0.0; 4]);

			// SAFETY: b has k * n elements and j + 4 <= n, so each load of
			// b[p * n + j..p * n + j + 4] stays in bounds
			unsafe {
				let mut acc = _mm256_setzero_pd();
				for (p, &a_ip) in a_row.iter().enumerate() {
					let a_vec = _mm256_set1_pd(a_ip);
					let b_vec = _mm256_loadu_pd(b_ptr.add(p * n + j));
					acc = _mm256_add_pd(acc, _mm256_mul_pd(a_vec, b_vec));
				}
				_mm256_store_pd(lanes.0.as_mut_ptr(), acc);
			}

			c_row[j..j + 4].copy_from_slice(&lanes.0);
			j += 4;
		}

		// Columns left over when n is not a multiple of 4
		for j in vector_cols..n {
			let mut sum = 0.0;
			for (p, &a_ip) in a_row.iter().enumerate() {
				sum += a_ip * b[p * n + j];
			}
			c_row[j] = sum;
		}
	}
}
