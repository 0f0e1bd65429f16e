//! Scope tracking and structural type inference
//!
//! The analyzer walks the AST once and records every free variable as a
//! future function parameter. Index variables of sums and products, and
//! integration variables, are bound for the syntactic extent of the
//! construct that introduces them.

use indexmap::IndexMap;
use serde::Serialize;

use crate::ast::*;

/// Type tag carried by generated fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Scalar,
    Bool,
    Array { rank: usize },
}

impl ValueType {
    pub fn is_array(&self) -> bool {
        matches!(self, ValueType::Array { .. })
    }

    pub fn rank(&self) -> usize {
        match self {
            ValueType::Array { rank } => *rank,
            _ => 0,
        }
    }
}

/// Free variable name -> inferred type, in first-seen order
pub type SymbolTable = IndexMap<String, ValueType>;

/// Collects free variables, respecting bound scopes
pub struct Analyzer {
    /// Stack of currently bound names
    bound: Vec<String>,
    symbols: SymbolTable,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            bound: Vec::new(),
            symbols: SymbolTable::new(),
        }
    }

    /// Analyze a program and return its symbol table
    pub fn analyze(mut self, program: &Program) -> SymbolTable {
        for statement in &program.statements {
            self.visit(statement);
        }
        self.symbols
    }

    /// Analyze a single expression
    pub fn analyze_expr(mut self, expr: &Expr) -> SymbolTable {
        self.visit(expr);
        self.symbols
    }

    fn is_bound(&self, name: &str) -> bool {
        self.bound.iter().any(|b| b == name)
    }

    fn register(&mut self, name: &str) {
        // `\mathbb{R}` and friends name sets, not values
        if is_reserved(name) || name.starts_with('\\') || self.is_bound(name) {
            return;
        }
        if !self.symbols.contains_key(name) {
            self.symbols.insert(name.to_string(), ValueType::Scalar);
        }
    }

    /// Visit `exprs` with `names` bound, then release them
    fn with_bound(&mut self, names: &[&str], exprs: &[&Expr]) {
        let depth = self.bound.len();
        self.bound.extend(names.iter().map(|n| n.to_string()));
        for expr in exprs {
            self.visit(expr);
        }
        self.bound.truncate(depth);
    }

    fn visit_domain(&mut self, domain: &IntegralDomain) {
        match domain {
            IntegralDomain::Indefinite => {}
            IntegralDomain::Region(region) => self.visit(region),
            IntegralDomain::Bounds { lower, upper } => {
                self.visit(lower);
                self.visit(upper);
            }
        }
    }

    fn visit(&mut self, expr: &Expr) {
        if let Some(name) = expr.variable_name() {
            self.register(&name);
            return;
        }

        match expr {
            Expr::Number(_) | Expr::Infinity | Expr::EmptySet | Expr::Symbol(_) => {}

            // Only simple subscripts name variables
            Expr::Subscript { .. } => {}

            // `A^T` names no variable `T`
            Expr::BinaryOp {
                op: BinOp::Pow,
                left,
                right,
            } if is_transpose(left, right) => self.visit(left),

            Expr::BinaryOp { left, right, .. }
            | Expr::Relation { left, right, .. }
            | Expr::SetOp { left, right, .. }
            | Expr::LogicOp { left, right, .. }
            | Expr::Mod { left, right } => {
                self.visit(left);
                self.visit(right);
            }

            Expr::Fraction {
                numerator,
                denominator,
            } => {
                self.visit(numerator);
                self.visit(denominator);
            }

            Expr::Sqrt { radicand, index } => {
                self.visit(radicand);
                if let Some(index) = index {
                    self.visit(index);
                }
            }

            Expr::FunctionCall {
                args, power, base, ..
            } => {
                for arg in args {
                    self.visit(arg);
                }
                for extra in power.iter().chain(base.iter()) {
                    self.visit(extra);
                }
            }

            Expr::Sum {
                body,
                var,
                lower,
                upper,
            }
            | Expr::Product {
                body,
                var,
                lower,
                upper,
            } => self.with_bound(&[var.as_str()], &[lower.as_ref(), upper.as_ref(), body.as_ref()]),

            Expr::Integral {
                integrand,
                var,
                domain,
            } => {
                self.bound.push(var.clone());
                self.visit_domain(domain);
                self.visit(integrand);
                self.bound.pop();
            }

            Expr::MultiIntegral {
                integrand,
                vars,
                domain,
                ..
            } => {
                let depth = self.bound.len();
                self.bound.extend(vars.iter().cloned());
                self.visit_domain(domain);
                self.visit(integrand);
                self.bound.truncate(depth);
            }

            // Differentiation variables stay free
            Expr::Derivative { body, vars, .. } => {
                for var in vars {
                    self.register(&var.var);
                    self.visit(&var.order);
                }
                self.visit(body);
            }

            Expr::Gradient { body, vars } => {
                for var in vars {
                    self.register(var);
                }
                self.visit(body);
            }

            Expr::Laplacian { body, vars, power } => {
                for var in vars {
                    self.register(var);
                }
                self.visit(power);
                self.visit(body);
            }

            Expr::Matrix { rows, .. } => {
                for cell in rows.iter().flatten() {
                    self.visit(cell);
                }
            }

            Expr::Abs(inner) | Expr::Not(inner) => self.visit(inner),

            Expr::Norm { body, order } => {
                self.visit(body);
                if let Some(order) = order {
                    self.visit(order);
                }
            }

            Expr::InnerProduct(items) | Expr::Set(items) => {
                for item in items {
                    self.visit(item);
                }
            }

            Expr::SetBuilder {
                bindings,
                predicate,
            } => self.visit_binder(bindings, predicate),

            Expr::Quantifier { bindings, body, .. } => self.visit_binder(bindings, body),

            Expr::Piecewise(branches) => {
                for branch in branches {
                    self.visit(&branch.value);
                    if let Some(condition) = &branch.condition {
                        self.visit(condition);
                    }
                }
            }

            Expr::Accent { base, .. } => self.visit(base),

            Expr::ArgExtremum { body, sub, sup, .. } => {
                let var = sub.as_deref().and_then(Expr::variable_name);
                if let Some(sup) = sup {
                    self.visit(sup);
                }
                match var {
                    Some(var) => self.with_bound(&[var.as_str()], &[body.as_ref()]),
                    None => {
                        if let Some(sub) = sub {
                            self.visit(sub);
                        }
                        self.visit(body);
                    }
                }
            }
        }
    }

    fn visit_binder(&mut self, bindings: &[Binding], body: &Expr) {
        for binding in bindings {
            if let Some(domain) = &binding.domain {
                self.visit(domain);
            }
        }
        let names: Vec<&str> = bindings.iter().map(|b| b.var.as_str()).collect();
        self.with_bound(&names, &[body]);
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Free parameters in canonical (byte-wise sorted) order
pub fn free_parameters(symbols: &SymbolTable) -> Vec<String> {
    let mut names: Vec<String> = symbols.keys().cloned().collect();
    names.sort();
    names
}

/// Free variables of one expression, sorted
pub fn free_variables(expr: &Expr) -> Vec<String> {
    free_parameters(&Analyzer::new().analyze_expr(expr))
}

/// Lightweight structural type of an expression; `None` when inconclusive
pub fn infer_type(expr: &Expr) -> Option<ValueType> {
    use ValueType::*;

    match expr {
        Expr::Number(_)
        | Expr::Infinity
        | Expr::Symbol(_)
        | Expr::Subscript { .. }
        | Expr::Accent { .. } => Some(Scalar),

        Expr::BinaryOp { op, left, right } => {
            let left_ty = infer_type(left)?;
            match op {
                BinOp::Pow if left_ty.is_array() => Some(left_ty),
                BinOp::Cross => None,
                _ => combine(left_ty, infer_type(right)?),
            }
        }
        Expr::Mod { left, right } => combine(infer_type(left)?, infer_type(right)?),
        Expr::Fraction {
            numerator,
            denominator,
        } => combine(infer_type(numerator)?, infer_type(denominator)?),

        Expr::Sqrt { radicand, .. } => infer_type(radicand),
        Expr::Abs(inner) => infer_type(inner),

        Expr::FunctionCall { name, args, .. } => {
            match name.trim_start_matches('\\') {
                "det" | "min" | "max" => Some(Scalar),
                _ => match args.as_slice() {
                    [single] => infer_type(single),
                    _ => Some(Scalar),
                },
            }
        }

        Expr::Sum { body, .. } | Expr::Product { body, .. } => {
            match infer_type(body)? {
                Scalar => Some(Scalar),
                _ => None,
            }
        }

        Expr::Integral { .. }
        | Expr::MultiIntegral { .. }
        | Expr::Derivative { .. }
        | Expr::Laplacian { .. }
        | Expr::Norm { .. }
        | Expr::InnerProduct(_) => Some(Scalar),

        Expr::Gradient { .. } => Some(Array { rank: 1 }),

        Expr::Matrix { .. } => Some(Array { rank: 2 }),

        Expr::Piecewise(branches) => {
            let mut types = branches.iter().map(|b| infer_type(&b.value));
            let first = types.next()??;
            types.all(|ty| ty == Some(first)).then_some(first)
        }

        Expr::Relation { .. } | Expr::LogicOp { .. } | Expr::Not(_) => Some(Bool),

        // Lowered to scalar placeholders
        Expr::EmptySet
        | Expr::Set(_)
        | Expr::SetBuilder { .. }
        | Expr::SetOp { .. }
        | Expr::Quantifier { .. }
        | Expr::ArgExtremum { .. } => Some(Scalar),
    }
}

/// `A^T` on an array-valued base
pub fn is_transpose(base: &Expr, exponent: &Expr) -> bool {
    matches!(exponent, Expr::Symbol(name) if name == "T")
        && infer_type(base).map_or(false, |ty| ty.is_array())
}

/// Result type of an elementwise binary operation
fn combine(left: ValueType, right: ValueType) -> Option<ValueType> {
    match (left, right) {
        (ValueType::Scalar, ValueType::Scalar) => Some(ValueType::Scalar),
        (ValueType::Array { .. }, ValueType::Scalar) => Some(left),
        (ValueType::Scalar, ValueType::Array { .. }) => Some(right),
        (ValueType::Array { rank: l }, ValueType::Array { rank: r }) if l == r => Some(left),
        _ => None,
    }
}

/// Structural type of a whole program; multi-statement programs are inconclusive
pub fn infer_program_type(program: &Program) -> Option<ValueType> {
    match program.statements.as_slice() {
        [single] => infer_type(single),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use pretty_assertions::assert_eq;

    fn parameters(source: &str) -> Vec<String> {
        let program = parse(source).unwrap();
        free_parameters(&Analyzer::new().analyze(&program))
    }

    #[test]
    fn test_polynomial_parameters() {
        assert_eq!(parameters("x^2 + 1"), vec!["x"]);
        assert_eq!(parameters("y \\cdot x + a"), vec!["a", "x", "y"]);
    }

    #[test]
    fn test_sum_binds_index() {
        assert!(parameters("\\sum_{n=1}^{10} \\frac{1}{n^2}").is_empty());
        assert_eq!(parameters("\\sum_{n=1}^{N} a n"), vec!["N", "a"]);
        // The index is free again after the sum
        assert_eq!(parameters("\\left( \\sum_{n=1}^{3} n \\right) + n"), vec!["n"]);
    }

    #[test]
    fn test_integral_binds_variable() {
        assert_eq!(parameters("\\int_{0}^{b} x t \\, dx"), vec!["b", "t"]);
        assert!(parameters("\\iint_{0}^{1} x y \\, dx \\, dy").is_empty());
    }

    #[test]
    fn test_derivative_keeps_variables_free() {
        assert_eq!(parameters("\\frac{d}{dx} x^3"), vec!["x"]);
        assert_eq!(parameters("\\nabla_{x, y} (x y)"), vec!["x", "y"]);
    }

    #[test]
    fn test_reserved_and_composite_names() {
        assert_eq!(parameters("e^{x} + \\pi"), vec!["x"]);
        assert_eq!(parameters("x_1 + \\hat{v}"), vec!["v_hat", "x_1"]);
        assert!(parameters("\\{x \\in \\mathbb{R} : x > 0\\}").is_empty());
        assert!(parameters("\\begin{pmatrix} 1 & 2 \\end{pmatrix}^T").is_empty());
        assert_eq!(parameters("x^T"), vec!["T", "x"]);
    }

    #[test]
    fn test_symbol_table_insertion_order() {
        let program = parse("z + a").unwrap();
        let table = Analyzer::new().analyze(&program);
        let order: Vec<&String> = table.keys().collect();
        assert_eq!(order, vec!["z", "a"]);
        assert_eq!(table["z"], ValueType::Scalar);
    }

    #[test]
    fn test_infer_types() {
        let ty = |source: &str| infer_program_type(&parse(source).unwrap());
        assert_eq!(ty("x^2 + 1"), Some(ValueType::Scalar));
        assert_eq!(
            ty("x + \\begin{pmatrix} 1 \\\\ 2 \\end{pmatrix}"),
            Some(ValueType::Array { rank: 2 })
        );
        assert_eq!(ty("\\nabla_{x, y} (x y)"), Some(ValueType::Array { rank: 1 }));
        assert_eq!(ty("\\det\\begin{pmatrix} a & b \\\\ c & d \\end{pmatrix}"), Some(ValueType::Scalar));
        assert_eq!(ty("x > 0"), Some(ValueType::Bool));
        assert_eq!(ty("x\ny"), None);
        assert_eq!(
            ty("\\begin{cases} x & x > 0 \\\\ \\begin{pmatrix} 1 \\end{pmatrix} & \\text{otherwise} \\end{cases}"),
            None
        );
    }
}
