//! LaTeX to Futhark Compiler
//!
//! This library compiles a single LaTeX math formula into a Futhark
//! program: a pure function over the formula's free symbols plus a `main`
//! entry point that unpacks a flat `[]f64` input.
//!
//! # Example
//!
//! ```rust
//! use latex_to_futhark::{compile, CompileOptions};
//!
//! let program = compile("\\frac{d}{dx} x^3 + \\sin(x)", &CompileOptions::default()).unwrap();
//! assert_eq!(program.parameters, vec!["x"]);
//! println!("{}", program);
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod reducer;
pub mod analyzer;
pub mod codegen;
pub mod target;
pub mod config;
pub mod normalize;
pub mod error;

pub use ast::*;
pub use parser::Parser;
pub use analyzer::{Analyzer, SymbolTable, ValueType};
pub use codegen::{CodeGenerator, GeneratedCode};
pub use target::{FutharkProgram, ProgramAssembler, ReturnType, Routine};
pub use config::CompileOptions;
pub use normalize::normalize;
pub use error::{CompileError, CompileResult, Diagnostic, DiagnosticKind};

use std::thread;

/// Stack size of the thread each compilation runs on. Every pass recurses
/// over the tree, and the parser caps trees at [`parser::MAX_TREE_DEPTH`]
/// levels, which fits in this much stack even in unoptimized builds.
pub const COMPILER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Run `stage` on a dedicated thread with [`COMPILER_STACK_SIZE`] of stack
fn on_compiler_stack<T, F>(stage: F) -> CompileResult<T>
where
    T: Send,
    F: FnOnce() -> CompileResult<T> + Send,
{
    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("latex2futhark-compile".to_string())
            .stack_size(COMPILER_STACK_SIZE)
            .spawn_scoped(scope, stage)
            .map_err(|e| CompileError::thread(format!("cannot start compiler thread: {}", e)))?;
        match worker.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

fn parse_source(source: &str) -> CompileResult<Program> {
    let mut parser = Parser::new(source)?;
    let tree = parser.parse_program()?;
    reducer::reduce(tree)
}

/// Parse LaTeX source into an AST
pub fn parse(source: &str) -> CompileResult<Program> {
    on_compiler_stack(|| parse_source(source))
}

/// Main compilation function that takes a LaTeX formula and produces a Futhark program
pub fn compile(source: &str, options: &CompileOptions) -> CompileResult<FutharkProgram> {
    options.validate()?;

    on_compiler_stack(|| {
        // Parse and rewrite into the AST
        let program = parse_source(source)?;

        // Collect free parameters
        let symbols = Analyzer::new().analyze(&program);

        // Lower to Futhark
        let mut codegen = CodeGenerator::new(options.clone());
        let generated = codegen.generate(&program)?;

        let assembler = ProgramAssembler::new(options.clone());
        Ok(assembler.assemble(source, &program, &symbols, generated))
    })
}

/// Normalize notational variants, then compile
pub fn compile_normalized(source: &str, options: &CompileOptions) -> CompileResult<FutharkProgram> {
    compile(&normalize(source), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compile_pipeline() {
        let program = compile("\\sum_{n=1}^{10} \\frac{1}{n^2}", &CompileOptions::default()).unwrap();
        assert!(program.parameters.is_empty());
        assert_eq!(program.return_type, ReturnType::Scalar);
        assert!(program.body.contains("reduce (+) 0.0f64"));
    }

    #[test]
    fn test_grammar_error_is_fatal() {
        assert!(matches!(
            compile("x + ", &CompileOptions::default()),
            Err(CompileError::Grammar { .. })
        ));
    }

    #[test]
    fn test_ragged_matrix_is_fatal() {
        assert!(matches!(
            compile("\\begin{pmatrix} 1 & 2 \\\\ 3 \\end{pmatrix}", &CompileOptions::default()),
            Err(CompileError::MatrixShape { .. })
        ));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = CompileOptions::new("main");
        assert!(matches!(compile("x", &options), Err(CompileError::Config { .. })));
    }

    #[test]
    fn test_strict_mode() {
        let source = "\\int x \\, dx";
        let lenient = compile(source, &CompileOptions::default()).unwrap();
        assert!(lenient.has_placeholders());
        assert!(lenient.body.contains("-- L2F-UNHANDLED"));

        let strict = compile(source, &CompileOptions::default().strict());
        assert!(matches!(strict, Err(CompileError::UnhandledConstruct { .. })));
    }

    #[test]
    fn test_compile_normalized() {
        let options = CompileOptions::default();
        let program = compile_normalized("\\dfrac{1}{x}", &options).unwrap();
        assert_eq!(program.body, "(1.0f64 / x)");

        let det = compile_normalized(
            "\\operatorname{det} \\begin{bmatrix} a & b \\\\ c & d \\end{bmatrix}",
            &options,
        )
        .unwrap();
        assert_eq!(det.routines, vec![Routine::Determinant]);
    }

    #[test]
    fn test_exponent_literal_is_one_number() {
        let program = compile("2e3 + x", &CompileOptions::default()).unwrap();
        assert_eq!(program.parameters, vec!["x"]);
        assert_eq!(program.body, "(2000.0f64 + x)");

        // A bare `e` is still Euler's constant
        let program = compile("2e", &CompileOptions::default()).unwrap();
        assert!(program.parameters.is_empty());
        assert_eq!(program.body, "(2.0f64 * f64.e)");
    }

    fn nested_parens(depth: usize) -> String {
        format!("{}x{}", "(".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn test_grouping_depth_limit() {
        let options = CompileOptions::default();
        let program = compile(&nested_parens(parser::MAX_NESTING_DEPTH), &options).unwrap();
        assert_eq!(program.parameters, vec!["x"]);

        assert!(matches!(
            compile(&nested_parens(parser::MAX_NESTING_DEPTH + 1), &options),
            Err(CompileError::Grammar { .. })
        ));
        assert!(matches!(
            compile(&nested_parens(20_000), &options),
            Err(CompileError::Grammar { .. })
        ));
    }

    #[test]
    fn test_operator_chain_depth_limit() {
        let options = CompileOptions::default();
        let chain = |operators: usize| format!("{}x", "x + ".repeat(operators));

        // A left-leaning chain of n operators is n + 1 levels tall
        let program = compile(&chain(parser::MAX_TREE_DEPTH - 1), &options).unwrap();
        assert_eq!(program.parameters, vec!["x"]);

        assert!(matches!(
            compile(&chain(parser::MAX_TREE_DEPTH), &options),
            Err(CompileError::Grammar { .. })
        ));
        assert!(matches!(
            compile(&chain(20_000), &options),
            Err(CompileError::Grammar { .. })
        ));
        assert!(matches!(
            compile(&format!("{}x", "x \\cdot ".repeat(20_000)), &options),
            Err(CompileError::Grammar { .. })
        ));
    }

    #[test]
    fn test_deep_juxtaposition_is_rejected() {
        let source = "x ".repeat(20_000);
        assert!(matches!(
            parse(&source),
            Err(CompileError::Grammar { .. })
        ));
    }
}
