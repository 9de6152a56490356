//! Input hardening for values that reach SQL text or numeric kernels.
//!
//! Column and table names supplied by callers are interpolated into the
//! DataFusion query that loads a dataset, so they are validated and quoted
//! here. Detector parameters pass through [`InputValidator`] before any
//! computation runs.

use crate::error::{OutlierError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// SQL identifier validation and escaping utilities.
pub struct SqlSecurity;

impl SqlSecurity {
    /// Validates and escapes a SQL identifier (table or column name).
    ///
    /// # Examples
    /// ```rust
    /// use term_outlier::security::SqlSecurity;
    ///
    /// assert_eq!(SqlSecurity::escape_identifier("amount").unwrap(), "\"amount\"");
    /// assert!(SqlSecurity::escape_identifier("id; DROP TABLE users--").is_err());
    /// assert!(SqlSecurity::escape_identifier(&"very_long_name_".repeat(100)).is_err());
    /// ```
    pub fn escape_identifier(identifier: &str) -> Result<String> {
        Self::validate_identifier(identifier)?;

        // Qualified names are quoted part by part.
        let escaped: Vec<String> = identifier
            .split('.')
            .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
            .collect();
        Ok(escaped.join("."))
    }

    /// Validates a SQL identifier without escaping it.
    pub fn validate_identifier(identifier: &str) -> Result<()> {
        if identifier.trim().is_empty() {
            return Err(OutlierError::SecurityError(
                "SQL identifier cannot be empty or whitespace-only".to_string(),
            ));
        }

        if identifier.len() > 128 {
            return Err(OutlierError::SecurityError(
                "SQL identifier too long (max 128 characters)".to_string(),
            ));
        }

        if identifier.contains('\0') {
            return Err(OutlierError::SecurityError(
                "SQL identifier cannot contain null bytes".to_string(),
            ));
        }

        static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
            #[allow(clippy::expect_used)]
            Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*$")
                .expect("Hard-coded regex pattern should be valid")
        });

        if !IDENTIFIER_REGEX.is_match(identifier) {
            return Err(OutlierError::SecurityError(format!(
                "Invalid SQL identifier format: '{identifier}'. Identifiers must start with a letter or underscore and contain only letters, numbers, underscores, and dots"
            )));
        }

        Ok(())
    }
}

/// Validation of numeric detector parameters.
///
/// Every failure is a configuration error, so an invalid parameter aborts an
/// ensemble run before any detector executes.
pub struct InputValidator;

impl InputValidator {
    /// Validates that a parameter is finite.
    pub fn validate_finite(value: f64, name: &str) -> Result<()> {
        if !value.is_finite() {
            return Err(OutlierError::configuration(format!(
                "Invalid {name} value: must be finite (not NaN or infinite)"
            )));
        }
        Ok(())
    }

    /// Validates that a parameter is finite and strictly positive.
    pub fn validate_positive(value: f64, name: &str) -> Result<()> {
        Self::validate_finite(value, name)?;
        if value <= 0.0 {
            return Err(OutlierError::configuration(format!(
                "Invalid {name} value: must be greater than 0, got {value}"
            )));
        }
        Ok(())
    }

    /// Validates that a parameter is finite and not negative.
    pub fn validate_non_negative(value: f64, name: &str) -> Result<()> {
        Self::validate_finite(value, name)?;
        if value < 0.0 {
            return Err(OutlierError::configuration(format!(
                "Invalid {name} value: must be non-negative, got {value}"
            )));
        }
        Ok(())
    }

    /// Validates a contamination rate, which must lie in (0.0, 0.5].
    pub fn validate_contamination(value: f64) -> Result<()> {
        Self::validate_finite(value, "contamination")?;
        if value <= 0.0 || value > 0.5 {
            return Err(OutlierError::configuration(format!(
                "Invalid contamination value: must be in (0.0, 0.5], got {value}"
            )));
        }
        Ok(())
    }

    /// Validates that a count parameter reaches a minimum.
    pub fn validate_min_count(value: usize, min: usize, name: &str) -> Result<()> {
        if value < min {
            return Err(OutlierError::configuration(format!(
                "Invalid {name} value: must be at least {min}, got {value}"
            )));
        }
        Ok(())
    }
}
