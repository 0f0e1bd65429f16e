//! Futhark program assembly
//!
//! These types describe the emitted program: the pure function over the
//! free parameters, the library routines it calls, and the `main` entry
//! point that unpacks a flat `[]f64` input.

use std::collections::HashSet;
use std::fmt;

use log::debug;
use serde::Serialize;

use crate::analyzer::{free_parameters, infer_program_type, SymbolTable, ValueType};
use crate::ast::{sanitize_identifier, Program};
use crate::codegen::GeneratedCode;
use crate::config::CompileOptions;
use crate::error::Diagnostic;

/// Gaussian elimination with partial pivoting
const DETERMINANT_SOURCE: &str = "\
def det [n] (a: [n][n]f64): f64 =
  let (m, sign) =
    loop (m, sign) = (copy a, 1.0f64) for i < n do
      let (p, _) =
        loop (p, best) = (i, f64.abs m[i, i]) for j in (i + 1)..<n do
          let v = f64.abs m[j, i]
          in if v > best then (j, v) else (p, best)
      in if m[p, i] == 0.0f64 then (m, 0.0f64)
         else
           let (m, sign) =
             if p == i then (m, sign)
             else
               let row_i = copy m[i]
               let row_p = copy m[p]
               let m = m with [i] = row_p
               let m = m with [p] = row_i
               in (m, -sign)
           let pivot_row = copy m[i]
           let pivot = pivot_row[i]
           let m =
             loop m for j in (i + 1)..<n do
               let factor = m[j, i] / pivot
               let row = map2 (\\x y -> x - factor * y) m[j] pivot_row
               in m with [j] = row
           in (m, sign)
  in sign * reduce (*) 1.0f64 (map (\\k -> m[k, k]) (iota n))
";

/// Library routine injected ahead of the generated function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Routine {
    Determinant,
}

impl Routine {
    /// Name the generated code calls
    pub fn name(&self) -> &'static str {
        match self {
            Routine::Determinant => "det",
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Routine::Determinant => DETERMINANT_SOURCE,
        }
    }
}

/// Declared return type of the generated function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnType {
    Scalar,
    Vector,
    Matrix,
    Bool,
    /// Unconstrained; the annotation is omitted
    Auto,
}

impl ReturnType {
    pub fn from_value_type(ty: ValueType) -> Self {
        match ty {
            ValueType::Scalar => ReturnType::Scalar,
            ValueType::Bool => ReturnType::Bool,
            ValueType::Array { rank: 1 } => ReturnType::Vector,
            ValueType::Array { rank: 2 } => ReturnType::Matrix,
            ValueType::Array { .. } => ReturnType::Auto,
        }
    }

    /// Futhark type annotation, if any
    pub fn annotation(&self) -> Option<&'static str> {
        match self {
            ReturnType::Scalar => Some("f64"),
            ReturnType::Vector => Some("[]f64"),
            ReturnType::Matrix => Some("[][]f64"),
            ReturnType::Bool => Some("bool"),
            ReturnType::Auto => None,
        }
    }
}

/// A complete Futhark program
#[derive(Debug, Clone, Serialize)]
pub struct FutharkProgram {
    /// Name of the pure function
    pub function_name: String,
    /// Parameter identifiers, in declaration and unpacking order
    pub parameters: Vec<String>,
    pub return_type: ReturnType,
    /// Body expression of the pure function
    pub body: String,
    pub routines: Vec<Routine>,
    /// LaTeX the program was compiled from
    pub source: String,
    #[serde(skip)]
    pub emit_source_comment: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl FutharkProgram {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Whether any sub-expression was replaced by a placeholder
    pub fn has_placeholders(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_unhandled)
    }

    /// Name of the entry point's input array; never shadows a parameter
    fn input_name(&self) -> &'static str {
        if self.parameters.iter().any(|p| p == "params") {
            "params'"
        } else {
            "params"
        }
    }

    fn return_annotation(&self) -> String {
        self.return_type
            .annotation()
            .map(|ty| format!(": {}", ty))
            .unwrap_or_default()
    }
}

impl fmt::Display for FutharkProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.emit_source_comment {
            writeln!(f, "-- Generated from LaTeX:")?;
            for line in self.source.trim().lines() {
                writeln!(f, "--   {}", line)?;
            }
            writeln!(f)?;
        }

        for routine in &self.routines {
            writeln!(f, "{}", routine.source())?;
        }

        let signature: String = self
            .parameters
            .iter()
            .map(|p| format!(" ({}: f64)", p))
            .collect();
        writeln!(
            f,
            "def {}{}{} =",
            self.function_name,
            signature,
            self.return_annotation()
        )?;
        writeln!(f, "  {}", self.body)?;
        writeln!(f)?;

        let input = self.input_name();
        writeln!(f, "entry main ({}: []f64){} =", input, self.return_annotation())?;
        if self.parameters.is_empty() {
            return writeln!(f, "  {}", self.function_name);
        }
        for (i, param) in self.parameters.iter().enumerate() {
            writeln!(f, "  let {} = {}[{}]", param, input, i)?;
        }
        writeln!(f, "  in {} {}", self.function_name, self.parameters.join(" "))
    }
}

/// Wraps generated code into a program with an entry point
pub struct ProgramAssembler {
    options: CompileOptions,
}

impl ProgramAssembler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn assemble(
        &self,
        source: &str,
        program: &Program,
        symbols: &SymbolTable,
        generated: GeneratedCode,
    ) -> FutharkProgram {
        let mut seen = HashSet::new();
        let mut parameters: Vec<String> = free_parameters(symbols)
            .iter()
            .filter_map(|name| sanitize_identifier(name))
            .filter(|ident| seen.insert(ident.clone()))
            .collect();
        parameters.sort();

        let mut diagnostics = generated.diagnostics;
        let return_type = match (generated.ty, infer_program_type(program)) {
            (None, _) | (_, None) => ReturnType::Auto,
            (Some(generated_ty), Some(structural)) if generated_ty == structural => {
                ReturnType::from_value_type(generated_ty)
            }
            (Some(generated_ty), Some(structural)) => {
                debug!(
                    "return type disagreement: generated {:?}, inferred {:?}",
                    generated_ty, structural
                );
                diagnostics.push(Diagnostic::fallback("return type", program.to_string()));
                ReturnType::Auto
            }
        };

        FutharkProgram {
            function_name: self.options.function_name.clone(),
            parameters,
            return_type,
            body: generated.body,
            routines: generated.routines.into_iter().collect(),
            source: source.to_string(),
            emit_source_comment: self.options.emit_source_comment,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use crate::error::DiagnosticKind;
    use pretty_assertions::assert_eq;

    fn compile_default(source: &str) -> FutharkProgram {
        compile(source, &CompileOptions::default()).unwrap()
    }

    #[test]
    fn test_render_polynomial() {
        let program = compile_default("x^2 + 1");
        let expected = "\
-- Generated from LaTeX:
--   x^2 + 1

def compute (x: f64): f64 =
  ((x ** 2.0f64) + 1.0f64)

entry main (params: []f64): f64 =
  let x = params[0]
  in compute x
";
        assert_eq!(program.to_string(), expected);
        assert_eq!(program.return_type, ReturnType::Scalar);
        assert!(!program.has_placeholders());
    }

    #[test]
    fn test_render_without_parameters() {
        let mut options = CompileOptions::new("constant");
        options.emit_source_comment = false;
        let program = compile("1 + 2", &options).unwrap();
        let expected = "\
def constant: f64 =
  (1.0f64 + 2.0f64)

entry main (params: []f64): f64 =
  constant
";
        assert_eq!(program.to_string(), expected);
    }

    #[test]
    fn test_parameters_sorted() {
        let program = compile_default("y \\cdot x + b");
        assert_eq!(program.parameters, vec!["b", "x", "y"]);
        let text = program.to_string();
        assert!(text.contains("def compute (b: f64) (x: f64) (y: f64): f64 ="));
        assert!(text.contains("  let b = params[0]\n  let x = params[1]\n  let y = params[2]\n"));
        assert!(text.contains("  in compute b x y\n"));
    }

    #[test]
    fn test_tuple_is_unconstrained() {
        let program = compile_default("x + 1\nx - 1");
        assert_eq!(program.return_type, ReturnType::Auto);
        assert!(program.to_string().contains("entry main (params: []f64) =\n"));
        assert!(program.to_string().contains("def compute (x: f64) =\n"));
    }

    #[test]
    fn test_matrix_return_type() {
        let program = compile_default("x + \\begin{pmatrix} 1 \\\\ 2 \\end{pmatrix}");
        assert_eq!(program.return_type, ReturnType::Matrix);
        assert_eq!(ReturnType::from_value_type(ValueType::Array { rank: 1 }), ReturnType::Vector);
        assert_eq!(ReturnType::from_value_type(ValueType::Array { rank: 3 }), ReturnType::Auto);
    }

    #[test]
    fn test_determinant_injected_only_when_used() {
        let program = compile_default("\\det\\begin{pmatrix} a & b \\\\ c & d \\end{pmatrix}");
        assert_eq!(program.routines, vec![Routine::Determinant]);
        assert_eq!(program.parameters, vec!["a", "b", "c", "d"]);
        let text = program.to_string();
        assert!(text.contains("def det [n] (a: [n][n]f64): f64 ="));
        assert!(text.contains("(det [[a, b], [c, d]])"));
        assert!(text.find("def det").unwrap() < text.find("def compute").unwrap());

        let plain = compile_default("a + b");
        assert!(plain.routines.is_empty());
        assert!(!plain.to_string().contains("def det"));
    }

    /// Rust mirror of `DETERMINANT_SOURCE`
    fn det_mirror(a: &[Vec<f64>]) -> f64 {
        let n = a.len();
        let mut m = a.to_vec();
        let mut sign = 1.0;
        for i in 0..n {
            let (mut p, mut best) = (i, m[i][i].abs());
            for j in (i + 1)..n {
                let v = m[j][i].abs();
                if v > best {
                    p = j;
                    best = v;
                }
            }
            if m[p][i] == 0.0 {
                sign = 0.0;
                continue;
            }
            if p != i {
                m.swap(i, p);
                sign = -sign;
            }
            let pivot_row = m[i].clone();
            let pivot = pivot_row[i];
            for j in (i + 1)..n {
                let factor = m[j][i] / pivot;
                for (x, y) in m[j].iter_mut().zip(&pivot_row) {
                    *x -= factor * y;
                }
            }
        }
        sign * (0..n).map(|k| m[k][k]).product::<f64>()
    }

    #[test]
    fn test_determinant_scheme() {
        let close = |a: f64, b: f64| (a - b).abs() < 1e-12;
        assert!(close(det_mirror(&[vec![1.0, 2.0], vec![3.0, 4.0]]), -2.0));
        assert!(close(det_mirror(&[vec![0.0, 1.0], vec![1.0, 0.0]]), -1.0));
        assert!(close(det_mirror(&[vec![1.0, 2.0], vec![2.0, 4.0]]), 0.0));
        assert!(close(
            det_mirror(&[
                vec![2.0, 0.0, 1.0],
                vec![1.0, 3.0, 2.0],
                vec![1.0, 1.0, 2.0],
            ]),
            6.0
        ));
    }

    #[test]
    fn test_json_fields() {
        let program = compile_default("\\sin(t)");
        let json: serde_json::Value = serde_json::from_str(&program.to_json().unwrap()).unwrap();
        assert_eq!(json["function_name"], "compute");
        assert_eq!(json["parameters"], serde_json::json!(["t"]));
        assert_eq!(json["return_type"], "scalar");
        assert_eq!(json["body"], "(f64.sin t)");
        assert_eq!(json["source"], "\\sin(t)");
        assert!(json.get("emit_source_comment").is_none());
    }

    #[test]
    fn test_type_disagreement_falls_back_to_auto() {
        let program = compile_default("x \\in S");
        assert_eq!(program.return_type, ReturnType::Auto);
        assert!(program.has_placeholders());
        assert!(program
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::TypeInferenceFallback));
    }

    #[test]
    fn test_parameter_named_params() {
        let program = compile_default("params + 1");
        let text = program.to_string();
        assert!(text.contains("entry main (params': []f64): f64 =\n"));
        assert!(text.contains("  let params = params'[0]\n"));
    }
}
