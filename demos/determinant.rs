//! Example: Matrix Expressions
//!
//! Demonstrates determinant injection, broadcasting and the
//! normalization pass on legacy matrix notation.
//!
//! Run with: cargo run --example determinant

use latex_to_futhark::{compile, compile_normalized, normalize, CompileOptions};

fn main() {
    println!("=== Matrix Expressions Example ===\n");

    let options = CompileOptions::default();

    // Example 1: determinant of a symbolic 2x2 matrix
    let source = "\\det\\begin{pmatrix} a & b \\\\ c & d \\end{pmatrix}";
    println!("Example 1: {}\n", source);

    let program = compile(source, &options).unwrap();
    println!("{}", program);

    // Expected at a=1, b=2, c=3, d=4:
    // | 1 2 |
    // | 3 4 | = 1*4 - 2*3 = -2
    println!("Expected result at (1, 2, 3, 4): -2\n");

    // Example 2: scalar broadcast over a column vector
    let source = "x + \\begin{pmatrix} 1 \\\\ 2 \\end{pmatrix}";
    println!("Example 2: {}\n", source);

    let program = compile(source, &options).unwrap();
    println!("Return type: {:?}", program.return_type);
    println!("Body: {}\n", program.body);

    // Example 3: legacy wrappers go through the normalizer first
    let source = "\\det \\left[\\begin{matrix} 2 & 0 \\\\ 0 & 3 \\end{matrix}\\right]";
    println!("Example 3: {}", source);
    println!("Normalized: {}\n", normalize(source));

    let program = compile_normalized(source, &options).unwrap();
    println!("Routines: {:?}", program.routines);
    println!("Body: {}", program.body);
}
