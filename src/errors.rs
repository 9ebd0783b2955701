//! Error types and validation functions for detection power estimation.
//!
//! Every fallible operation in the crate returns [`DetectionPowerResult`]. Scenario
//! level failures are captured into the scenario's result row by the batch runner,
//! so only batch shape problems and cancellation ever abort a whole batch.

use std::sync::Arc;
use thiserror::Error;

/// Error types for detection power operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum DetectionPowerError {
    /// Inconsistent or out-of-range configuration value.
    #[error("Invalid configuration: {parameter}: {reason}")]
    Configuration {
        /// Offending parameter name
        parameter: String,
        /// What is wrong with it
        reason: String,
    },

    /// A series is too short for the requested test.
    #[error("Insufficient data: need at least {required} points, got {actual}")]
    InsufficientData {
        /// Minimum required data points
        required: usize,
        /// Actual number of data points provided
        actual: usize,
    },

    /// The lumped-parameter transport model could not produce a receptor series.
    #[error("Transport model failed: {reason}")]
    TransportModel {
        /// Detailed reason for the failure
        reason: String,
    },

    /// Numerical computation error.
    #[error("Numerical computation failed: {reason}")]
    NumericalError {
        /// Detailed reason for numerical failure
        reason: String,
    },

    /// Columnar batch input with columns of different lengths.
    #[error("Batch column `{field}` has {actual} rows, expected {expected}")]
    BatchShape {
        /// Column name
        field: String,
        /// Number of rows in the `idv` column
        expected: usize,
        /// Number of rows in this column
        actual: usize,
    },

    /// Two scenarios in one batch share an identifier.
    #[error("Duplicate scenario id: {idv}")]
    DuplicateScenario {
        /// The repeated identifier
        idv: String,
    },

    /// Cancellation was requested through a [`crate::CancelToken`].
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O operation error.
    #[error("I/O operation failed: {operation}")]
    IoError {
        /// I/O operation that failed
        operation: String,
        /// Underlying error if available
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// Serialization/deserialization error.
    #[error("Serialization failed ({format}): {reason}")]
    SerializationError {
        /// Format that failed
        format: String,
        /// Underlying message
        reason: String,
    },
}

/// Result type for detection power operations.
pub type DetectionPowerResult<T> = Result<T, DetectionPowerError>;

impl DetectionPowerError {
    /// Shorthand for a [`DetectionPowerError::Configuration`] error.
    pub fn configuration(parameter: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that only mean "this series is too short".
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}

impl From<csv::Error> for DetectionPowerError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            if let csv::ErrorKind::Io(io) = err.into_kind() {
                return Self::IoError {
                    operation: "csv".to_string(),
                    source: Some(Arc::new(io)),
                };
            }
            return Self::IoError {
                operation: "csv".to_string(),
                source: None,
            };
        }
        Self::SerializationError {
            format: "csv".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Validates that data has sufficient length.
///
/// # Example
/// ```rust
/// use gw_detect_power::errors::validate_data_length;
///
/// let data = vec![1.0, 2.0, 3.0];
/// assert!(validate_data_length(&data, 2).is_ok());
/// assert!(validate_data_length(&data, 5).is_err());
/// ```
pub fn validate_data_length(data: &[f64], min_required: usize) -> DetectionPowerResult<()> {
    if data.len() < min_required {
        Err(DetectionPowerError::InsufficientData {
            required: min_required,
            actual: data.len(),
        })
    } else {
        Ok(())
    }
}

/// Validates that a parameter lies in `[min, max]`.
///
/// # Example
/// ```rust
/// use gw_detect_power::errors::validate_parameter;
///
/// assert!(validate_parameter(0.5, 0.0, 1.0, "frac_p1").is_ok());
/// assert!(validate_parameter(1.5, 0.0, 1.0, "frac_p1").is_err());
/// ```
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> DetectionPowerResult<()> {
    if value.is_nan() {
        return Err(DetectionPowerError::configuration(name, "must not be NaN"));
    }
    if value < min || value > max {
        return Err(DetectionPowerError::configuration(
            name,
            format!("{} outside [{}, {}]", value, min, max),
        ));
    }
    Ok(())
}

/// Validates that a value is finite and not NaN.
///
/// # Example
/// ```rust
/// use gw_detect_power::errors::validate_finite;
///
/// assert!(validate_finite(1.0, "test").is_ok());
/// assert!(validate_finite(f64::NAN, "test").is_err());
/// ```
pub fn validate_finite(value: f64, name: &str) -> DetectionPowerResult<()> {
    if !value.is_finite() {
        Err(DetectionPowerError::configuration(
            name,
            format!("must be finite, got {}", value),
        ))
    } else {
        Ok(())
    }
}

/// Validates that all values in a slice are finite.
///
/// Returns on the first non-finite value, naming its index.
pub fn validate_all_finite(data: &[f64], name: &str) -> DetectionPowerResult<()> {
    if let Some((i, value)) = data.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(DetectionPowerError::NumericalError {
            reason: format!("{} contains non-finite value at index {}: {}", name, i, value),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_data_length_insufficient() {
        let data = vec![1.0, 2.0];
        match validate_data_length(&data, 5) {
            Err(DetectionPowerError::InsufficientData { required, actual }) => {
                assert_eq!(required, 5);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected InsufficientData, got {:?}", other),
        }
        assert!(validate_data_length(&[], 0).is_ok());
    }

    #[test]
    fn test_validate_parameter_bounds() {
        assert!(validate_parameter(0.0, 0.0, 1.0, "p").is_ok());
        assert!(validate_parameter(1.0, 0.0, 1.0, "p").is_ok());
        assert!(matches!(
            validate_parameter(-0.1, 0.0, 1.0, "p"),
            Err(DetectionPowerError::Configuration { .. })
        ));
        assert!(validate_parameter(f64::NAN, 0.0, 1.0, "p").is_err());
    }

    #[test]
    fn test_validate_all_finite_reports_index() {
        let err = validate_all_finite(&[1.0, 2.0, f64::INFINITY], "conc").unwrap_err();
        assert!(err.to_string().contains("index 2"), "got: {}", err);
        assert!(validate_all_finite(&[], "conc").is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = DetectionPowerError::BatchShape {
            field: "mrt".to_string(),
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Batch column `mrt` has 2 rows, expected 3");
        assert!(DetectionPowerError::InsufficientData {
            required: 3,
            actual: 1
        }
        .is_insufficient_data());
        assert!(!DetectionPowerError::Cancelled.is_insufficient_data());
    }
}
