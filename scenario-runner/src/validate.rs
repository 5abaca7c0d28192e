//! Numeric comparison of runtime outputs against reference data.
//!
//! A comparison that cannot be made is reported as
//! [`ValidationStatus::NotValidated`], never as a pass.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use scenario_compiler::OptimizationProfile;

use crate::error::RunnerError;

/// Largest absolute element difference still counted as a match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance(pub f64);

impl Tolerance {
    pub const FP32: Tolerance = Tolerance(1e-4);
    pub const FP16: Tolerance = Tolerance(1e-2);

    pub fn for_profile(profile: &OptimizationProfile) -> Tolerance {
        if profile.use_fp16 {
            Tolerance::FP16
        } else {
            Tolerance::FP32
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed { max_difference: f64 },
    Failed { max_difference: f64 },
    NotValidated { reason: String },
}

impl ValidationStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, ValidationStatus::Passed { .. })
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Passed { max_difference } => {
                write!(f, "passed (max difference {max_difference:.2e})")
            }
            ValidationStatus::Failed { max_difference } => {
                write!(f, "FAILED (max difference {max_difference:.2e})")
            }
            ValidationStatus::NotValidated { reason } => write!(f, "not validated: {reason}"),
        }
    }
}

/// Compare element-wise; a NaN on either side counts as an infinite difference.
pub fn compare(reference: &[f32], actual: &[f32], tolerance: Tolerance) -> ValidationStatus {
    if reference.is_empty() {
        return ValidationStatus::NotValidated {
            reason: "reference is empty".to_string(),
        };
    }
    if reference.len() != actual.len() {
        return ValidationStatus::NotValidated {
            reason: format!(
                "length mismatch: reference has {} elements, output has {}",
                reference.len(),
                actual.len()
            ),
        };
    }

    let max_difference = reference
        .iter()
        .zip(actual)
        .map(|(&r, &a)| {
            let diff = (f64::from(r) - f64::from(a)).abs();
            if diff.is_nan() {
                f64::INFINITY
            } else {
                diff
            }
        })
        .fold(0.0, f64::max);

    if max_difference <= tolerance.0 {
        ValidationStatus::Passed { max_difference }
    } else {
        ValidationStatus::Failed { max_difference }
    }
}

/// Read a raw little-endian f32 buffer, as the runtime dumps its outputs.
pub fn read_f32_file(path: &Path) -> Result<Vec<f32>, RunnerError> {
    let bytes = fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "{}: {} bytes is not a whole number of f32 values",
                path.display(),
                bytes.len()
            ),
        )
        .into());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn compare_files(
    reference: &Path,
    actual: &Path,
    tolerance: Tolerance,
) -> Result<ValidationStatus, RunnerError> {
    let reference = read_f32_file(reference)?;
    let actual = read_f32_file(actual)?;
    Ok(compare(&reference, &actual, tolerance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_tolerance_passes() {
        let status = compare(&[1.0, 2.0, 3.0], &[1.0, 2.00005, 3.0], Tolerance::FP32);
        assert!(status.is_passed(), "got: {status}");
    }

    #[test]
    fn beyond_tolerance_fails() {
        let status = compare(&[1.0, 2.0], &[1.0, 2.5], Tolerance::FP32);
        match status {
            ValidationStatus::Failed { max_difference } => {
                assert!((max_difference - 0.5).abs() < 1e-6)
            }
            other => panic!("expected failure, got: {other}"),
        }
    }

    #[test]
    fn fp16_tolerance_is_looser() {
        assert_eq!(Tolerance::for_profile(&OptimizationProfile::APPLE_SILICON), Tolerance::FP16);
        assert_eq!(Tolerance::for_profile(&OptimizationProfile::GENERIC), Tolerance::FP32);
        let status = compare(&[1.0], &[1.005], Tolerance::FP16);
        assert!(status.is_passed());
        assert!(!compare(&[1.0], &[1.005], Tolerance::FP32).is_passed());
    }

    #[test]
    fn mismatched_lengths_are_not_validated() {
        let status = compare(&[1.0, 2.0], &[1.0], Tolerance::FP32);
        assert!(matches!(status, ValidationStatus::NotValidated { .. }));
        assert!(!status.is_passed());
    }

    #[test]
    fn empty_reference_is_not_validated() {
        assert!(matches!(
            compare(&[], &[], Tolerance::FP32),
            ValidationStatus::NotValidated { .. }
        ));
    }

    #[test]
    fn nan_output_fails() {
        let status = compare(&[1.0], &[f32::NAN], Tolerance::FP16);
        assert_eq!(
            status,
            ValidationStatus::Failed {
                max_difference: f64::INFINITY
            }
        );
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(ValidationStatus::NotValidated {
            reason: "x".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "not_validated");
        assert_eq!(json["reason"], "x");
    }

    #[test]
    fn reads_raw_f32_files() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.bin");
        let output = dir.path().join("out.bin");
        let bytes: Vec<u8> = [0.5f32, -1.25].iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(&reference, &bytes).unwrap();
        fs::write(&output, &bytes).unwrap();

        assert_eq!(read_f32_file(&reference).unwrap(), [0.5, -1.25]);
        let status = compare_files(&reference, &output, Tolerance::FP32).unwrap();
        assert_eq!(status, ValidationStatus::Passed { max_difference: 0.0 });

        fs::write(&output, [0u8; 3]).unwrap();
        assert!(matches!(
            compare_files(&reference, &output, Tolerance::FP32),
            Err(RunnerError::Io(_))
        ));
    }
}
