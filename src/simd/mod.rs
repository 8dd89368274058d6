//! Capability-gated numeric kernels
//!
//! The SIMD level is detected once when [`VectorKernels`] is built and a
//! [`VectorBackend`] is chosen for it. Both the AVX2 and the scalar backend
//! sit behind the same trait, so correctness tests run identically on either.

pub mod aligned;
#[cfg(target_arch = "x86_64")]
pub mod avx2;
pub mod prefetch;
pub mod scalar;

use std::fmt::Debug;

use tracing::info;

pub use crate::simd::aligned::CacheAlignedBuffer;
pub use crate::simd::prefetch::{prefetch_read, process_with_prefetch, transform_with_prefetch};

use crate::error::{Result, TelemetryError};
use crate::simd::scalar::ScalarBackend;

/// Widest vector extension usable by the kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimdLevel {
	Scalar,
	Avx2,
	Avx512,
}

impl SimdLevel {
	/// Queries the CPU feature flags
	pub fn detect() -> Self {
		#[cfg(target_arch = "x86_64")]
		{
			if is_x86_feature_detected!("avx512f") && is_x86_feature_detected!("avx2") {
				SimdLevel::Avx512
			} else if is_x86_feature_detected!("avx2") {
				SimdLevel::Avx2
			} else {
				SimdLevel::Scalar
			}
		}
		#[cfg(not(target_arch = "x86_64"))]
		{
			SimdLevel::Scalar
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			SimdLevel::Scalar => "scalar",
			SimdLevel::Avx2 => "AVX2",
			SimdLevel::Avx512 => "AVX-512",
		}
	}
}

/// One implementation strategy for the numeric kernels
pub trait VectorBackend: Debug + Send + Sync {
	/// Level this backend executes at
	fn level(&self) -> SimdLevel;

	/// Sum of all values
	fn sum(&self, values: &[f64]) -> f64;

	/// `c = a * b` for row-major `a` (m x k), `b` (k x n) and `c` (m x n)
	///
	/// Slice lengths have already been checked against the dimensions.
	fn matmul(&self, a: &[f64], b: &[f64], c: &mut [f64], m: usize, k: usize, n: usize);
}

/// Factory function to create the backend for a SIMD level
///
/// Fails when the level is not supported by the running CPU.
pub fn create_backend(level: SimdLevel) -> Result<Box<dyn VectorBackend>> {
	match level {
		SimdLevel::Scalar => Ok(Box::new(ScalarBackend)),
		#[cfg(target_arch = "x86_64")]
		SimdLevel::Avx2 | SimdLevel::Avx512 => avx2::Avx2Backend::new()
			.map(|backend| Box::new(backend) as Box<dyn VectorBackend>)
			.ok_or_else(|| TelemetryError::InvalidArgument(format!("{} is not supported by this CPU", level.as_str()))),
		#[cfg(not(target_arch = "x86_64"))]
		_ => Err(TelemetryError::InvalidArgument(format!(
			"{} is not available on this architecture",
			level.as_str()
		))),
	}
}

/// Vector kernels bound to the best backend available at construction
#[derive(Debug)]
pub struct VectorKernels {
	avx2_supported: bool,
	avx512_supported: bool,
	backend: Box<dyn VectorBackend>,
}

impl Default for VectorKernels {
	fn default() -> Self {
		Self::new()
	}
}

impl VectorKernels {
	/// Detects CPU capabilities once and selects the matching backend
	pub fn new() -> Self {
		let detected = SimdLevel::detect();
		let backend = create_backend(detected).unwrap_or_else(|_| Box::new(ScalarBackend));

		let kernels = Self {
			avx2_supported: detected >= SimdLevel::Avx2,
			avx512_supported: detected == SimdLevel::Avx512,
			backend,
		};

		info!(
			avx2 = kernels.avx2_supported,
			avx512 = kernels.avx512_supported,
			backend = kernels.backend.level().as_str(),
			"Vector kernels initialized"
		);

		kernels
	}

	/// Forces a specific backend, failing if the CPU cannot run it
	pub fn with_level(level: SimdLevel) -> Result<Self> {
		let detected = SimdLevel::detect();
		Ok(Self {
			avx2_supported: detected >= SimdLevel::Avx2,
			avx512_supported: detected == SimdLevel::Avx512,
			backend: create_backend(level)?,
		})
	}

	pub fn avx2_supported(&self) -> bool {
		self.avx2_supported
	}

	pub fn avx512_supported(&self) -> bool {
		self.avx512_supported
	}

	/// Level of the backend in use
	pub fn level(&self) -> SimdLevel {
		self.backend.level()
	}

	/// Sum of `values`
	pub fn vector_sum(&self, values: &[f64]) -> f64 {
		self.backend.sum(values)
	}

	/// Multiplies row-major `a` (m x k) by `b` (k x n) into a new aligned buffer
	pub fn matrix_multiply(&self, a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Result<CacheAlignedBuffer<f64>> {
		let len = m
			.checked_mul(n)
			.ok_or_else(|| TelemetryError::InvalidArgument(format!("{}x{} result overflows", m, n)))?;
		let mut c = CacheAlignedBuffer::new(len)?;
		self.matrix_multiply_into(a, b, &mut c, m, k, n)?;
		Ok(c)
	}

	/// Multiplies row-major `a` (m x k) by `b` (k x n) into `c` (m x n)
	pub fn matrix_multiply_into(&self, a: &[f64], b: &[f64], c: &mut [f64], m: usize, k: usize, n: usize) -> Result<()> {
		check_len("A", a.len(), m, k)?;
		check_len("B", b.len(), k, n)?;
		check_len("C", c.len(), m, n)?;

		self.backend.matmul(a, b, c, m, k, n);
		Ok(())
	}
}

fn check_len(name: &str, len: usize, rows: usize, cols: usize) -> Result<()> {
	match rows.checked_mul(cols) {
		Some(expected) if expected == len => Ok(()),
		_ => Err(TelemetryError::InvalidArgument(format!(
			"matrix {} has {} elements, expected {}x{}",
			name, len, rows, cols
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	/// Every backend this CPU can run
	fn backends() -> Vec<VectorKernels> {
		[SimdLevel::Scalar, SimdLevel::Avx2]
			.into_iter()
			.filter_map(|level| VectorKernels::with_level(level).ok())
			.collect()
	}

	fn naive_sum(values: &[f64]) -> f64 {
		let mut sum = 0.0;
		for &v in values {
			sum += v;
		}
		sum
	}

	fn assert_close(actual: f64, expected: f64) {
		let scale = expected.abs().max(1.0);
		assert!(
			(actual - expected).abs() / scale <= 1e-9,
			"{} differs from {}",
			actual,
			expected
		);
	}

	#[test]
	fn test_sum_matches_scalar_for_remainder_sizes() {
		for size in [0usize, 1, 3, 4, 1000, 1_000_003] {
			let values: Vec<f64> = (0..size).map(|i| (i % 977) as f64 * 0.25 + 1.0).collect();
			let expected = naive_sum(&values);
			for kernels in backends() {
				assert_close(kernels.vector_sum(&values), expected);
			}
		}
	}

	#[test]
	fn test_sum_of_sequence() {
		let values: Vec<f64> = (0..1000).map(|i| i as f64).collect();
		for kernels in backends() {
			assert_eq!(kernels.vector_sum(&values), 499_500.0);
		}
	}

	#[test]
	fn test_matrix_multiply_with_column_remainder() {
		// 2x3 * 3x5
		let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
		let b: Vec<f64> = (1..=15).map(|v| v as f64).collect();
		let expected = [
			46.0, 52.0, 58.0, 64.0, 70.0, //
			100.0, 115.0, 130.0, 145.0, 160.0,
		];

		for kernels in backends() {
			let c = kernels.matrix_multiply(&a, &b, 2, 3, 5).unwrap();
			assert_eq!(c.as_slice(), &expected, "backend {}", kernels.level().as_str());
		}
	}

	#[test]
	fn test_matrix_multiply_rejects_bad_dimensions() {
		let kernels = VectorKernels::with_level(SimdLevel::Scalar).unwrap();
		let err = kernels.matrix_multiply(&[1.0; 6], &[1.0; 6], 2, 3, 3).unwrap_err();
		assert!(matches!(err, TelemetryError::InvalidArgument(_)));

		let mut c = [0.0; 3];
		assert!(kernels.matrix_multiply_into(&[1.0; 6], &[1.0; 6], &mut c, 2, 3, 2).is_err());
	}

	#[test]
	fn test_detected_flags_are_consistent() {
		let kernels = VectorKernels::new();
		assert!(!kernels.avx512_supported() || kernels.avx2_supported());
		assert_eq!(kernels.level() >= SimdLevel::Avx2, kernels.avx2_supported());
	}

	proptest! {
		#[test]
		fn prop_backends_agree_on_sum(values in proptest::collection::vec(0.0f64..1000.0, 0..300)) {
			let expected = naive_sum(&values);
			for kernels in backends() {
				let actual = kernels.vector_sum(&values);
				prop_assert!((actual - expected).abs() <= expected.abs().max(1.0) * 1e-9);
			}
		}

		#[test]
		fn prop_backends_agree_on_matmul(m in 1usize..6, k in 1usize..6, n in 1usize..11, seed in 0u64..1000) {
			let a: Vec<f64> = (0..m * k).map(|i| ((i as u64 * 31 + seed) % 17) as f64 - 8.0).collect();
			let b: Vec<f64> = (0..k * n).map(|i| ((i as u64 * 7 + seed) % 13) as f64 - 6.0).collect();

			let scalar = VectorKernels::with_level(SimdLevel::Scalar).unwrap();
			let expected = scalar.matrix_multiply(&a, &b, m, k, n).unwrap();

			for kernels in backends() {
				let c = kernels.matrix_multiply(&a, &b, m, k, n).unwrap();
				prop_assert_eq!(c.as_slice(), expected.as_slice());
			}
		}
	}
}
