//! Compile options for Futhark generation

use serde::{Deserialize, Serialize};

use crate::ast::sanitize_identifier;
use crate::error::{CompileError, CompileResult};

/// Central difference step `h`
pub const DEFAULT_DERIVATIVE_STEP: f64 = 1e-4;
/// Second difference step for the Laplacian
pub const DEFAULT_LAPLACIAN_STEP: f64 = 1e-3;
/// Intervals of the one-dimensional Simpson rule
pub const DEFAULT_QUADRATURE_STEPS: usize = 100_000;
/// Intervals per axis of the tensor-product Simpson rule
pub const DEFAULT_MULTI_QUADRATURE_STEPS: usize = 300;
pub const DEFAULT_FUNCTION_NAME: &str = "compute";

/// Largest accepted one-dimensional interval count
pub const MAX_QUADRATURE_STEPS: usize = 100_000_000;
/// Largest accepted per-axis interval count
pub const MAX_MULTI_QUADRATURE_STEPS: usize = 100_000;

/// Options controlling code generation and program assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Name of the generated pure function
    pub function_name: String,
    pub derivative_step: f64,
    pub laplacian_step: f64,
    pub quadrature_steps: usize,
    pub multi_quadrature_steps: usize,
    /// Fail on the first construct without a lowering rule
    pub strict: bool,
    /// Put the source formula in a comment at the top of the program
    pub emit_source_comment: bool,
}

impl CompileOptions {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            ..Self::default()
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Load options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> CompileResult<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| CompileError::config(format!("invalid options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> CompileResult<()> {
        if sanitize_identifier(&self.function_name).as_deref() != Some(self.function_name.as_str())
        {
            return Err(CompileError::config(format!(
                "`{}` is not a usable Futhark function name",
                self.function_name
            )));
        }
        if self.function_name == "main" {
            return Err(CompileError::config(
                "the function name `main` is reserved for the entry point",
            ));
        }
        if !(self.derivative_step > 0.0) || !(self.laplacian_step > 0.0) {
            return Err(CompileError::config("finite difference steps must be positive"));
        }
        if self.quadrature_steps == 0 || self.multi_quadrature_steps == 0 {
            return Err(CompileError::config("quadrature step counts must be positive"));
        }
        if self.quadrature_steps > MAX_QUADRATURE_STEPS {
            return Err(CompileError::config(format!(
                "quadrature_steps {} exceeds the maximum of {}",
                self.quadrature_steps, MAX_QUADRATURE_STEPS
            )));
        }
        if self.multi_quadrature_steps > MAX_MULTI_QUADRATURE_STEPS {
            return Err(CompileError::config(format!(
                "multi_quadrature_steps {} exceeds the maximum of {}",
                self.multi_quadrature_steps, MAX_MULTI_QUADRATURE_STEPS
            )));
        }
        Ok(())
    }

    /// Simpson intervals, rounded up to an even count
    pub fn simpson_intervals(&self) -> usize {
        round_up_even(self.quadrature_steps)
    }

    /// Per-axis tensor Simpson intervals, rounded up to an even count
    pub fn multi_simpson_intervals(&self) -> usize {
        round_up_even(self.multi_quadrature_steps)
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            function_name: DEFAULT_FUNCTION_NAME.to_string(),
            derivative_step: DEFAULT_DERIVATIVE_STEP,
            laplacian_step: DEFAULT_LAPLACIAN_STEP,
            quadrature_steps: DEFAULT_QUADRATURE_STEPS,
            multi_quadrature_steps: DEFAULT_MULTI_QUADRATURE_STEPS,
            strict: false,
            emit_source_comment: true,
        }
    }
}

fn round_up_even(n: usize) -> usize {
    n.checked_add(n % 2).unwrap_or(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let options = CompileOptions::default();
        assert_eq!(options.function_name, "compute");
        assert_eq!(options.derivative_step, 1e-4);
        assert_eq!(options.laplacian_step, 1e-3);
        assert_eq!(options.simpson_intervals(), 100_000);
        assert_eq!(options.multi_simpson_intervals(), 300);
        assert!(!options.strict);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let options =
            CompileOptions::from_json(r#"{"function_name": "energy", "quadrature_steps": 1001}"#)
                .unwrap();
        assert_eq!(options.function_name, "energy");
        assert_eq!(options.simpson_intervals(), 1002);
        assert_eq!(options.derivative_step, DEFAULT_DERIVATIVE_STEP);
    }

    #[test]
    fn test_invalid_options() {
        assert!(CompileOptions::new("main").validate().is_err());
        assert!(CompileOptions::new("2fast").validate().is_err());
        assert!(CompileOptions::new("let").validate().is_err());
        assert!(matches!(
            CompileOptions::from_json("{\"strict\": 3}"),
            Err(CompileError::Config { .. })
        ));
    }

    #[test]
    fn test_step_counts_are_capped() {
        assert!(matches!(
            CompileOptions::from_json(r#"{"quadrature_steps": 18446744073709551615}"#),
            Err(CompileError::Config { .. })
        ));
        assert!(matches!(
            CompileOptions::from_json(r#"{"multi_quadrature_steps": 100001}"#),
            Err(CompileError::Config { .. })
        ));

        let largest = CompileOptions {
            quadrature_steps: MAX_QUADRATURE_STEPS,
            multi_quadrature_steps: MAX_MULTI_QUADRATURE_STEPS - 1,
            ..CompileOptions::default()
        };
        assert!(largest.validate().is_ok());
        assert_eq!(largest.simpson_intervals(), MAX_QUADRATURE_STEPS);
        assert_eq!(largest.multi_simpson_intervals(), MAX_MULTI_QUADRATURE_STEPS);
    }

    #[test]
    fn test_round_up_even_never_overflows() {
        assert_eq!(round_up_even(0), 0);
        assert_eq!(round_up_even(7), 8);
        assert_eq!(round_up_even(usize::MAX), usize::MAX - 1);
    }

    #[test]
    fn test_json_round_trip() {
        let options = CompileOptions::new("f").strict();
        let json = options.to_json().unwrap();
        assert_eq!(CompileOptions::from_json(&json).unwrap(), options);
    }
}
