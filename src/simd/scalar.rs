use crate::simd::{SimdLevel, VectorBackend};

/// Plain loops, available everywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarBackend;

impl VectorBackend for ScalarBackend {
	fn level(&self) -> SimdLevel {
		SimdLevel::Scalar
	}

	fn sum(&self, values: &[f64]) -> f64 {
		let mut sum = 0.0;
		for &value in values {
			sum += value;
		}
		sum
	}

	fn matmul(&self, a: &[f64], b: &[f64], c: &mut [f64], m: usize, k: usize, n: usize) {
		for i in 0..m {
			for j in 0..n {
				let mut sum = 0.0;
				for p in 0..k {
					sum += a[i * k + p] * b[p * n + j];
				}
				c[i * n + j] = sum;
			}
		}
	}
}
