/*!
 * Error handling for the ReferralGuard pipeline
 *
 * Provides detailed error types with context, suggestions, and recovery guidance.
 */

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use serde::{Serialize, Deserialize};

/// ReferralGuard library result type
pub type Result<T> = std::result::Result<T, ReferralGuardError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum ReferralGuardError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV parsing errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<usize>,
        column: Option<String>,
        context: ErrorContext,
    },

    /// Data validation errors with detailed information
    #[error("Data validation error: {message}")]
    DataValidation {
        message: String,
        field: Option<String>,
        value: Option<String>,
        context: ErrorContext,
    },

    /// Source file not found with suggestions
    #[error("File not found: {path}")]
    FileNotFound {
        path: PathBuf,
        suggestion: String,
    },

    /// Invalid NPI with format guidance
    #[error("Invalid NPI '{npi}': {reason}")]
    InvalidNpi {
        npi: String,
        reason: String,
        suggestion: String,
    },

    /// Schema mismatch with details
    #[error("Schema mismatch: {message}")]
    SchemaMismatch {
        message: String,
        expected_columns: Option<usize>,
        found_columns: Option<usize>,
        mismatched_column: Option<(usize, String, String)>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// Artifact export/persistence errors
    #[error("Export error: {message}")]
    Export {
        message: String,
        artifact: ArtifactKind,
        suggestion: Option<String>,
    },

    /// Model training failures (empty cohort, degenerate labels, bad artifact)
    #[error("Model error: {message}")]
    Model {
        message: String,
        suggestion: Option<String>,
    },

    /// No trained model artifact available; callers should degrade to
    /// rule-based scoring rather than surfacing this to the API consumer
    #[error("No trained model available at {path}")]
    ModelUnavailable {
        path: PathBuf,
        suggestion: String,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<usize>,
    pub column_name: Option<String>,
    pub record_npi: Option<String>,
}

/// Persisted artifact kinds for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ArtifactKind {
    #[default]
    Insights,
    ModelArtifact,
    PerformanceReport,
    ScoringOutput,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Insights => write!(f, "insights"),
            ArtifactKind::ModelArtifact => write!(f, "model artifact"),
            ArtifactKind::PerformanceReport => write!(f, "performance report"),
            ArtifactKind::ScoringOutput => write!(f, "scoring output"),
        }
    }
}

impl ReferralGuardError {
    /// Create a file not found error with a helpful suggestion
    pub fn file_not_found_with_suggestion(path: PathBuf) -> Self {
        let suggestion = if path.to_string_lossy().contains("MUP_PHY") {
            format!(
                "Check if the file exists at '{}'. Medicare utilization files follow the pattern \
                'MUP_PHY_RXX_PXX_VXX_DXX_Prov_Svc.csv' and can be downloaded from data.cms.gov.",
                path.display()
            )
        } else if path.to_string_lossy().contains("npidata") {
            format!(
                "Check if the file exists at '{}'. NPPES files follow the pattern \
                'npidata_pfile_YYYYMMDD-YYYYMMDD.csv'. \
                You can download the latest file from https://download.cms.gov/nppes/NPI_Files.html",
                path.display()
            )
        } else if path.to_string_lossy().contains("endpoint") {
            format!(
                "Check if the endpoint file exists at '{}'. The NPPES endpoint file follows the \
                pattern 'endpoint_pfile_YYYYMMDD-YYYYMMDD.csv'.",
                path.display()
            )
        } else {
            format!(
                "Check if the file exists at '{}'. Make sure the path is correct and you have read permissions.",
                path.display()
            )
        };

        Self::FileNotFound { path, suggestion }
    }

    /// Create an invalid NPI error with validation details
    pub fn invalid_npi(npi: &str) -> Self {
        let (reason, suggestion) = if npi.is_empty() {
            ("NPI cannot be empty".to_string(),
             "Provide a valid 10-digit NPI number".to_string())
        } else if npi.len() != 10 {
            (format!("NPI must be exactly 10 digits, found {}", npi.len()),
             "Ensure the NPI is exactly 10 digits without spaces or special characters".to_string())
        } else if !npi.chars().all(|c| c.is_ascii_digit()) {
            ("NPI must contain only digits".to_string(),
             "Remove any non-numeric characters from the NPI".to_string())
        } else {
            ("Invalid NPI format".to_string(),
             "Verify the NPI number is correct".to_string())
        };

        Self::InvalidNpi {
            npi: npi.to_string(),
            reason,
            suggestion,
        }
    }

    /// Create a schema mismatch error with detailed information
    pub fn schema_mismatch_detailed(
        expected_columns: usize,
        found_columns: usize,
        mismatched_column: Option<(usize, String, String)>,
    ) -> Self {
        let message = if let Some((index, expected, found)) = &mismatched_column {
            format!(
                "Column {} mismatch: expected '{}', found '{}'",
                index, expected, found
            )
        } else {
            format!(
                "Expected {} columns, found {}",
                expected_columns, found_columns
            )
        };

        Self::SchemaMismatch {
            message,
            expected_columns: Some(expected_columns),
            found_columns: Some(found_columns),
            mismatched_column,
        }
    }

    /// Create a malformed-numeric-field validation error
    pub fn malformed_numeric(field: &str, value: &str, line_number: Option<usize>) -> Self {
        Self::DataValidation {
            message: format!("Cannot parse '{}' as a number for field '{}'", value, field),
            field: Some(field.to_string()),
            value: Some(value.to_string()),
            context: ErrorContext {
                line_number,
                ..Default::default()
            },
        }
    }

    /// Create a model-unavailable error pointing at the missing artifact
    pub fn model_unavailable(path: PathBuf) -> Self {
        Self::ModelUnavailable {
            suggestion: format!(
                "Train a model with 'rgcli train' to create '{}', or continue with \
                rule-based scoring.",
                path.display()
            ),
            path,
        }
    }

    /// Create a model training error
    pub fn model_training(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
            suggestion: None,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::InvalidNpi { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::ModelUnavailable { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::Configuration { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for ReferralGuardError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for ReferralGuardError {
    fn from(err: csv::Error) -> Self {
        let (line, message) = match err.position() {
            Some(pos) => (Some(pos.line() as usize), err.to_string()),
            None => (None, err.to_string()),
        };

        Self::CsvParse {
            message,
            line,
            column: None,
            context: ErrorContext::default(),
        }
    }
}

impl From<serde_json::Error> for ReferralGuardError {
    fn from(err: serde_json::Error) -> Self {
        ReferralGuardError::Export {
            message: err.to_string(),
            artifact: ArtifactKind::Insights,
            suggestion: Some("Check if the data is serializable to JSON.".to_string()),
        }
    }
}
