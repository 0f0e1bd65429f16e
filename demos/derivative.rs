//! Example: Numerical Calculus
//!
//! Demonstrates compiling derivatives, integrals and sums into
//! finite-difference and quadrature code.
//!
//! Run with: cargo run --example derivative

use latex_to_futhark::{compile, parse, Analyzer, CodeGenerator, CompileOptions};

fn main() {
    println!("=== Numerical Calculus Example ===\n");

    let options = CompileOptions::default();

    // Example 1: full program for a first derivative
    println!("Example 1: \\frac{{d}}{{dx}} x^3");
    println!("Central difference with h = {}\n", options.derivative_step);

    let program = compile("\\frac{d}{dx} x^3", &options).unwrap();
    println!("{}", program);

    // Example 2: the pipeline stage by stage
    println!("Example 2: \\int_0^1 x^2 \\, dx (Simpson's rule)\n");

    let ast = parse("\\int_0^1 x^2 \\, dx").unwrap();
    println!("Canonical form: {}", ast);

    let symbols = Analyzer::new().analyze(&ast);
    println!("Free parameters: {:?}", symbols.keys().collect::<Vec<_>>());

    let mut coarse = CompileOptions::new("area");
    coarse.quadrature_steps = 10;
    let generated = CodeGenerator::new(coarse).generate(&ast).unwrap();
    println!("Body with 10 intervals:\n  {}\n", generated.body);

    // Example 3: a sum with its bound index removed from the parameters
    println!("Example 3: \\sum_{{n=1}}^{{N}} \\frac{{1}}{{n^2}}\n");

    let program = compile("\\sum_{n=1}^{N} \\frac{1}{n^2}", &CompileOptions::new("basel")).unwrap();
    println!("Parameters: {:?}", program.parameters);
    println!("JSON output:");
    println!("{}", program.to_json().unwrap());
}
