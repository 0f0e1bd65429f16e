//! Reduction of parse trees into the AST
//!
//! One rule per [`Production`]. The context-sensitive cases live here:
//! caret orders and prime runs on function heads become total derivatives,
//! every derivative spelling collapses into one `Derivative` node, and a
//! unary minus on a literal folds into a negative number.

use crate::ast::{
    BinOp, Binding, Branch, DerivativeKind, Expr, IntegralDomain, MatrixKind, Program, VarOrder,
};
use crate::error::{CompileError, CompileResult};
use crate::lexer::Token;
use crate::parser::{ParseChild, ParseNode, Production};

/// Reduce a `Program` parse tree
pub fn reduce(tree: ParseNode) -> CompileResult<Program> {
    if tree.production != Production::Program {
        return Err(malformed(tree.production));
    }
    let statements = tree
        .children
        .into_iter()
        .map(|child| reduce_node(into_node(child)?))
        .collect::<CompileResult<Vec<_>>>()?;
    Ok(Program { statements })
}

fn malformed(production: Production) -> CompileError {
    CompileError::grammar(format!("malformed {:?} node", production))
}

fn into_node(child: ParseChild) -> CompileResult<ParseNode> {
    match child {
        ParseChild::Node(node) => Ok(node),
        ParseChild::Token(tok) => Err(CompileError::grammar(format!(
            "expected a sub-expression, found `{}`",
            tok
        ))),
    }
}

/// Sequential access to a node's children
struct Children {
    production: Production,
    items: std::iter::Peekable<std::vec::IntoIter<ParseChild>>,
}

impl Children {
    fn new(node: ParseNode) -> Self {
        Self {
            production: node.production,
            items: node.children.into_iter().peekable(),
        }
    }

    fn token(&mut self) -> CompileResult<Token> {
        match self.items.next() {
            Some(ParseChild::Token(tok)) => Ok(tok),
            _ => Err(malformed(self.production)),
        }
    }

    fn name(&mut self) -> CompileResult<String> {
        match self.token()? {
            Token::Symbol(name) | Token::Command(name) => Ok(name),
            _ => Err(malformed(self.production)),
        }
    }

    fn node(&mut self) -> CompileResult<ParseNode> {
        match self.items.next() {
            Some(ParseChild::Node(node)) => Ok(node),
            _ => Err(malformed(self.production)),
        }
    }

    fn expr(&mut self) -> CompileResult<Expr> {
        reduce_node(self.node()?)
    }

    /// Next child if it is a node labelled `production`
    fn optional(&mut self, production: Production) -> Option<ParseNode> {
        let matches = matches!(
            self.items.peek(),
            Some(ParseChild::Node(node)) if node.production == production
        );
        if !matches {
            return None;
        }
        match self.items.next() {
            Some(ParseChild::Node(node)) => Some(node),
            _ => None,
        }
    }

    /// Consecutive children labelled `production`
    fn repeated(&mut self, production: Production) -> Vec<ParseNode> {
        let mut nodes = Vec::new();
        while let Some(node) = self.optional(production) {
            nodes.push(node);
        }
        nodes
    }

    fn remaining_exprs(&mut self) -> CompileResult<Vec<Expr>> {
        let mut exprs = Vec::new();
        while self.items.peek().is_some() {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn remaining_names(&mut self) -> CompileResult<Vec<String>> {
        let mut names = Vec::new();
        while let Some(ParseChild::Token(_)) = self.items.peek() {
            names.push(self.name()?);
        }
        Ok(names)
    }
}

/// Reduce the single child of a wrapper node such as `Superscript`
fn unwrap_single(node: ParseNode) -> CompileResult<Expr> {
    Children::new(node).expr()
}

fn reduce_arguments(node: ParseNode) -> CompileResult<Vec<Expr>> {
    if node.production != Production::Arguments {
        return Err(malformed(node.production));
    }
    Children::new(node).remaining_exprs()
}

fn prime_count(node: &ParseNode) -> usize {
    node.children.len()
}

/// `S(v)` differentiated `order` times with respect to `v`
fn total_derivative(function: &str, var: &str, order: usize) -> Expr {
    Expr::Derivative {
        body: Box::new(Expr::call(function, vec![Expr::symbol(var)])),
        vars: vec![VarOrder::new(var, Expr::Number(order as f64))],
        kind: DerivativeKind::Total,
    }
}

fn primed(name: &str, count: usize) -> String {
    format!("{}{}", name, "'".repeat(count))
}

fn reduce_node(node: ParseNode) -> CompileResult<Expr> {
    let production = node.production;

    match production {
        Production::Number => match Children::new(node).token()? {
            Token::Number(v) => Ok(Expr::Number(v)),
            _ => Err(malformed(production)),
        },

        Production::Symbol => Ok(Expr::Symbol(Children::new(node).name()?)),

        Production::CommandSymbol => Ok(Expr::Symbol(Children::new(node).name()?)),

        Production::Infinity => Ok(Expr::Infinity),

        Production::Group => unwrap_single(node),

        Production::PrimeRun => Ok(Expr::Number(prime_count(&node) as f64)),

        Production::Relation | Production::SetOp | Production::LogicOp => {
            let mut children = Children::new(node);
            let left = Box::new(children.expr()?);
            let op = children.token()?;
            let right = Box::new(children.expr()?);
            match op {
                Token::Relation(op) => Ok(Expr::Relation { op, left, right }),
                Token::SetOp(op) => Ok(Expr::SetOp { op, left, right }),
                Token::Logic(op) => Ok(Expr::LogicOp { op, left, right }),
                _ => Err(malformed(production)),
            }
        }

        Production::Add
        | Production::Sub
        | Production::Mul
        | Production::Div
        | Production::Cross
        | Production::Hadamard => {
            let op = match production {
                Production::Add => BinOp::Add,
                Production::Sub => BinOp::Sub,
                Production::Mul => BinOp::Mul,
                Production::Div => BinOp::Div,
                Production::Cross => BinOp::Cross,
                _ => BinOp::Hadamard,
            };
            let mut children = Children::new(node);
            let left = children.expr()?;
            let right = children.expr()?;
            Ok(Expr::binary(op, left, right))
        }

        Production::Mod => {
            let mut children = Children::new(node);
            Ok(Expr::Mod {
                left: Box::new(children.expr()?),
                right: Box::new(children.expr()?),
            })
        }

        Production::Juxtapose => reduce_juxtapose(node),

        Production::Negate => Ok(Expr::negate(unwrap_single(node)?)),

        Production::Not => Ok(Expr::Not(Box::new(unwrap_single(node)?))),

        Production::Power => {
            let mut children = Children::new(node);
            let base = children.node()?;
            let exponent = children.node()?;
            // `f^{\prime}` without a call is a renamed symbol
            if exponent.production == Production::PrimeRun {
                if let Some(name) = head_name(&base) {
                    return Ok(Expr::Symbol(primed(&name, prime_count(&exponent))));
                }
            }
            Ok(Expr::binary(
                BinOp::Pow,
                reduce_node(base)?,
                reduce_node(exponent)?,
            ))
        }

        Production::PowerCall => reduce_power_call(node),

        Production::SymbolCall => {
            let mut children = Children::new(node);
            let name = children.name()?;
            let args = reduce_arguments(children.node()?)?;
            Ok(Expr::call(name, args))
        }

        Production::PrimeCall => {
            let mut children = Children::new(node);
            let name = children.name()?;
            let primes = prime_count(&children.node()?);
            let args = match children.optional(Production::Arguments) {
                Some(args) => reduce_arguments(args)?,
                None => return Ok(Expr::Symbol(primed(&name, primes))),
            };
            match args.as_slice() {
                [Expr::Symbol(var)] => Ok(total_derivative(&name, var, primes)),
                _ => Ok(Expr::call(primed(&name, primes), args)),
            }
        }

        Production::Subscript => {
            let mut children = Children::new(node);
            let base = children.name()?;
            let index = children.remaining_exprs()?;
            Ok(Expr::Subscript { base, index })
        }

        Production::StyledSymbol | Production::StyledCall => {
            let mut children = Children::new(node);
            let style = children.name()?;
            let word = children.name()?;
            if let Some(args) = children.optional(Production::Arguments) {
                return Ok(Expr::call(word, reduce_arguments(args)?));
            }
            match style.as_str() {
                "mathbb" | "mathcal" => Ok(Expr::Symbol(format!("\\{}{{{}}}", style, word))),
                _ => Ok(Expr::Symbol(word)),
            }
        }

        Production::NamedFunction => {
            let mut children = Children::new(node);
            let name = children.name()?;
            let power = children
                .optional(Production::Superscript)
                .map(unwrap_single)
                .transpose()?;
            let base = children
                .optional(Production::LowerScript)
                .map(unwrap_single)
                .transpose()?;
            let args = reduce_arguments(children.node()?)?;
            Ok(Expr::FunctionCall {
                name: format!("\\{}", name),
                args,
                power: power.map(Box::new),
                base: base.map(Box::new),
            })
        }

        Production::GenericFunction => {
            let mut children = Children::new(node);
            let name = children.name()?;
            let args = reduce_arguments(children.node()?)?;
            Ok(Expr::call(format!("\\{}", name), args))
        }

        Production::Fraction => {
            let mut children = Children::new(node);
            Ok(Expr::Fraction {
                numerator: Box::new(children.expr()?),
                denominator: Box::new(children.expr()?),
            })
        }

        Production::FracDerivative | Production::SubscriptDerivative => {
            reduce_derivative(node)
        }

        Production::Gradient => {
            let mut children = Children::new(node);
            let vars = children.remaining_names()?;
            let body = Box::new(children.expr()?);
            Ok(Expr::Gradient { body, vars })
        }

        Production::Laplacian => {
            let mut children = Children::new(node);
            let power = match children.optional(Production::Superscript) {
                Some(power) => unwrap_single(power)?,
                None => return Err(malformed(production)),
            };
            let vars = children.remaining_names()?;
            let body = Box::new(children.expr()?);
            Ok(Expr::Laplacian {
                body,
                vars,
                power: Box::new(power),
            })
        }

        Production::Sum | Production::Product => {
            let mut children = Children::new(node);
            let var = children.name()?;
            let lower = Box::new(children.expr()?);
            let upper = Box::new(children.expr()?);
            let body = Box::new(children.expr()?);
            if production == Production::Sum {
                Ok(Expr::Sum {
                    body,
                    var,
                    lower,
                    upper,
                })
            } else {
                Ok(Expr::Product {
                    body,
                    var,
                    lower,
                    upper,
                })
            }
        }

        Production::Integral => {
            let mut children = Children::new(node);
            let domain = reduce_domain(&mut children)?;
            let integrand = Box::new(children.expr()?);
            let var = Children::new(children.node()?).name()?;
            Ok(Expr::Integral {
                integrand,
                var,
                domain,
            })
        }

        Production::MultiIntegral => {
            let mut children = Children::new(node);
            let kind = match children.token()? {
                Token::MultiInt(kind) => kind,
                _ => return Err(malformed(production)),
            };
            let domain = reduce_domain(&mut children)?;
            let integrand = Box::new(children.expr()?);
            let vars = children
                .repeated(Production::Differential)
                .into_iter()
                .map(|differential| Children::new(differential).name())
                .collect::<CompileResult<Vec<_>>>()?;
            Ok(Expr::MultiIntegral {
                kind,
                integrand,
                vars,
                domain,
            })
        }

        Production::Sqrt => {
            let mut children = Children::new(node);
            let index = children
                .optional(Production::Superscript)
                .map(unwrap_single)
                .transpose()?;
            Ok(Expr::Sqrt {
                radicand: Box::new(children.expr()?),
                index: index.map(Box::new),
            })
        }

        Production::Matrix => {
            let mut children = Children::new(node);
            let environment = children.name()?;
            let kind = MatrixKind::from_environment(&environment).ok_or_else(|| {
                CompileError::grammar(format!("unknown matrix environment `{}`", environment))
            })?;
            let rows = children
                .repeated(Production::MatrixRow)
                .into_iter()
                .map(|row| Children::new(row).remaining_exprs())
                .collect::<CompileResult<Vec<_>>>()?;
            Expr::matrix(rows, kind)
        }

        Production::Cases => {
            let branches = Children::new(node)
                .repeated(Production::CasesRow)
                .into_iter()
                .map(|row| {
                    let mut cells = Children::new(row);
                    let value = cells.expr()?;
                    let condition = match cells.remaining_exprs()?.pop() {
                        Some(Expr::Symbol(word)) if word == "otherwise" => None,
                        other => other,
                    };
                    Ok(Branch { value, condition })
                })
                .collect::<CompileResult<Vec<_>>>()?;
            Ok(Expr::Piecewise(branches))
        }

        Production::Abs => Ok(Expr::Abs(Box::new(unwrap_single(node)?))),

        Production::Norm => {
            let mut children = Children::new(node);
            let body = Box::new(children.expr()?);
            let order = children
                .optional(Production::LowerScript)
                .map(unwrap_single)
                .transpose()?;
            Ok(Expr::Norm {
                body,
                order: order.map(Box::new),
            })
        }

        Production::InnerProduct => Ok(Expr::InnerProduct(
            Children::new(node).remaining_exprs()?,
        )),

        Production::EmptySet => Ok(Expr::EmptySet),

        Production::SetLiteral => Ok(Expr::Set(Children::new(node).remaining_exprs()?)),

        Production::SetBuilder => {
            let mut children = Children::new(node);
            let bindings = reduce_bindings(&mut children)?;
            let predicate = Box::new(children.expr()?);
            Ok(Expr::SetBuilder {
                bindings,
                predicate,
            })
        }

        Production::Quantifier => {
            let mut children = Children::new(node);
            let kind = match children.token()? {
                Token::Quantifier(kind) => kind,
                _ => return Err(malformed(production)),
            };
            let bindings = reduce_bindings(&mut children)?;
            let body = Box::new(children.expr()?);
            Ok(Expr::Quantifier {
                kind,
                bindings,
                body,
            })
        }

        Production::Accent => {
            let mut children = Children::new(node);
            let kind = match children.token()? {
                Token::Accent(kind) => kind,
                _ => return Err(malformed(production)),
            };
            Ok(Expr::Accent {
                kind,
                base: Box::new(children.expr()?),
            })
        }

        Production::ArgExtremum => {
            let mut children = Children::new(node);
            let kind = match children.token()? {
                Token::ArgExtremum(kind) => kind,
                _ => return Err(malformed(production)),
            };
            let sub = children
                .optional(Production::LowerScript)
                .map(unwrap_single)
                .transpose()?;
            let sup = children
                .optional(Production::Superscript)
                .map(unwrap_single)
                .transpose()?;
            Ok(Expr::ArgExtremum {
                kind,
                body: Box::new(children.expr()?),
                sub: sub.map(Box::new),
                sup: sup.map(Box::new),
            })
        }

        // Structural nodes are consumed by their parents
        Production::Program
        | Production::Arguments
        | Production::Superscript
        | Production::LowerScript
        | Production::DerivativeVariable
        | Production::Differential
        | Production::Bounds
        | Production::Region
        | Production::MatrixRow
        | Production::CasesRow
        | Production::Binding => Err(malformed(production)),
    }
}

/// Name of a symbol-like function head: `f`, `\phi`
fn head_name(node: &ParseNode) -> Option<String> {
    match (node.production, node.children.as_slice()) {
        (Production::Symbol, [ParseChild::Token(Token::Symbol(name))])
        | (Production::CommandSymbol, [ParseChild::Token(Token::Command(name))]) => {
            Some(name.clone())
        }
        _ => None,
    }
}

/// Derivative order carried by a `^` exponent, if it is one
fn exponent_order(exponent: &ParseNode, reduced: &Expr) -> Option<usize> {
    if exponent.production == Production::PrimeRun {
        return Some(prime_count(exponent));
    }
    reduced.as_count().filter(|order| *order >= 1)
}

/// `S^{k}(args)(more)...`
fn reduce_power_call(node: ParseNode) -> CompileResult<Expr> {
    let mut children = Children::new(node);
    let base = children.node()?;
    let exponent_node = children.node()?;
    let mut calls = children
        .repeated(Production::Arguments)
        .into_iter()
        .map(reduce_arguments)
        .collect::<CompileResult<Vec<_>>>()?
        .into_iter();
    let first = calls.next().ok_or_else(|| malformed(Production::PowerCall))?;

    let is_prime_run = exponent_node.production == Production::PrimeRun;
    let exponent = reduce_node(exponent_node.clone())?;

    let mut result = match head_name(&base) {
        Some(name) => match (exponent_order(&exponent_node, &exponent), first.as_slice()) {
            (Some(order), [Expr::Symbol(var)]) => total_derivative(&name, var, order),
            _ if is_prime_run => Expr::call(primed(&name, prime_count(&exponent_node)), first),
            _ => Expr::FunctionCall {
                name,
                args: first,
                power: Some(Box::new(exponent)),
                base: None,
            },
        },
        None => {
            let power = Expr::binary(BinOp::Pow, reduce_node(base)?, exponent);
            Expr::binary(BinOp::Mul, power, single_argument(first)?)
        }
    };

    // Further argument lists are implicit multiplication
    for args in calls {
        result = Expr::binary(BinOp::Mul, result, single_argument(args)?);
    }
    Ok(result)
}

fn single_argument(mut args: Vec<Expr>) -> CompileResult<Expr> {
    if args.len() != 1 {
        return Err(CompileError::grammar(format!(
            "a parenthesized list of {} items cannot be multiplied",
            args.len()
        )));
    }
    args.pop().ok_or_else(|| malformed(Production::Arguments))
}

/// `S^{\prime} v` is the derivative of `S(v)`; anything else multiplies
fn reduce_juxtapose(node: ParseNode) -> CompileResult<Expr> {
    let mut children = Children::new(node);
    let left = children.node()?;
    let right = children.node()?;

    if let Some(derivative) = primed_juxtaposition(&left, &right) {
        return Ok(derivative);
    }

    Ok(Expr::binary(
        BinOp::Mul,
        reduce_node(left)?,
        reduce_node(right)?,
    ))
}

fn primed_juxtaposition(left: &ParseNode, right: &ParseNode) -> Option<Expr> {
    if left.production != Production::Power || right.production != Production::Symbol {
        return None;
    }
    let (base, exponent) = match left.children.as_slice() {
        [ParseChild::Node(base), ParseChild::Node(exponent)] => (base, exponent),
        _ => return None,
    };
    if exponent.production != Production::PrimeRun {
        return None;
    }
    let name = head_name(base)?;
    let var = head_name(right)?;
    Some(total_derivative(&name, &var, prime_count(exponent)))
}

fn reduce_derivative(node: ParseNode) -> CompileResult<Expr> {
    let production = node.production;
    let mut children = Children::new(node);
    let kind = match children.token()? {
        Token::Partial => DerivativeKind::Partial,
        Token::Symbol(_) => DerivativeKind::Total,
        _ => return Err(malformed(production)),
    };
    let numerator_order = children
        .optional(Production::Superscript)
        .map(unwrap_single)
        .transpose()?;

    let mut vars = children
        .repeated(Production::DerivativeVariable)
        .into_iter()
        .map(|item| {
            let mut item = Children::new(item);
            let var = item.name()?;
            let order = item.remaining_exprs()?.pop().unwrap_or(Expr::Number(1.0));
            Ok(VarOrder::new(var, order))
        })
        .collect::<CompileResult<Vec<_>>>()?;

    // `\frac{d^2 y}{dx}` takes the order from the numerator
    if let (Some(order), [only]) = (numerator_order, vars.as_mut_slice()) {
        if only.order == Expr::Number(1.0) {
            only.order = order;
        }
    }

    let body = Box::new(children.expr()?);
    Ok(Expr::Derivative { body, vars, kind })
}

fn reduce_domain(children: &mut Children) -> CompileResult<IntegralDomain> {
    if let Some(bounds) = children.optional(Production::Bounds) {
        let mut limits = Children::new(bounds);
        return Ok(IntegralDomain::Bounds {
            lower: Box::new(limits.expr()?),
            upper: Box::new(limits.expr()?),
        });
    }
    if let Some(region) = children.optional(Production::Region) {
        return Ok(IntegralDomain::Region(Box::new(unwrap_single(region)?)));
    }
    Ok(IntegralDomain::Indefinite)
}

fn reduce_bindings(children: &mut Children) -> CompileResult<Vec<Binding>> {
    children
        .repeated(Production::Binding)
        .into_iter()
        .map(|binding| {
            let mut binding = Children::new(binding);
            let var = binding.name()?;
            let domain = binding.remaining_exprs()?.pop();
            Ok(Binding { var, domain })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AccentKind, IntegralKind, RelOp};
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn reduce_source(source: &str) -> CompileResult<Program> {
        let tree = Parser::new(source)?.parse_program()?;
        reduce(tree)
    }

    fn single(source: &str) -> Expr {
        let mut program = reduce_source(source).unwrap();
        assert_eq!(program.statements.len(), 1);
        program.statements.remove(0)
    }

    fn sym(name: &str) -> Expr {
        Expr::symbol(name)
    }

    fn num(v: f64) -> Expr {
        Expr::Number(v)
    }

    #[test]
    fn test_reduce_polynomial() {
        assert_eq!(
            single("x^2 + 1"),
            Expr::binary(
                BinOp::Add,
                Expr::binary(BinOp::Pow, sym("x"), num(2.0)),
                num(1.0)
            )
        );
    }

    #[test]
    fn test_negative_literal_folds() {
        assert_eq!(single("-3"), num(-3.0));
        assert_eq!(
            single("-x"),
            Expr::binary(BinOp::Sub, num(0.0), sym("x"))
        );
    }

    #[test]
    fn test_derivative_spellings_agree() {
        let expected = Expr::Derivative {
            body: Box::new(Expr::binary(BinOp::Pow, sym("x"), num(3.0))),
            vars: vec![VarOrder::first("x")],
            kind: DerivativeKind::Total,
        };
        assert_eq!(single("\\frac{d}{dx} x^3"), expected);
        assert_eq!(single("\\frac{d}{d x} x^3"), expected);
        assert_eq!(single("d_x x^3"), expected);
    }

    #[test]
    fn test_mixed_partial_orders() {
        let expr = single("\\frac{\\partial^3}{\\partial x \\partial y^2} f");
        assert_eq!(
            expr,
            Expr::Derivative {
                body: Box::new(sym("f")),
                vars: vec![VarOrder::first("x"), VarOrder::new("y", num(2.0))],
                kind: DerivativeKind::Partial,
            }
        );

        let expr = single("\\frac{d^2 y}{dx}");
        assert!(matches!(
            expr,
            Expr::Derivative { ref vars, .. } if vars[0].order == num(2.0)
        ));
    }

    #[test]
    fn test_caret_order_on_call() {
        assert_eq!(single("f^{2}(x)"), total_derivative("f", "x", 2));
        assert_eq!(single("f^{\\prime\\prime}(t)"), total_derivative("f", "t", 2));
        assert_eq!(single("f^{\\prime} x"), total_derivative("f", "x", 1));

        // Not a bare symbol argument: power of a call
        assert_eq!(
            single("f^{2}(x + 1)"),
            Expr::FunctionCall {
                name: "f".to_string(),
                args: vec![Expr::binary(BinOp::Add, sym("x"), num(1.0))],
                power: Some(Box::new(num(2.0))),
                base: None,
            }
        );

        // A plain juxtaposed power stays multiplication
        assert_eq!(
            single("x^2 y"),
            Expr::binary(
                BinOp::Mul,
                Expr::binary(BinOp::Pow, sym("x"), num(2.0)),
                sym("y")
            )
        );
    }

    #[test]
    fn test_apostrophes() {
        assert_eq!(single("y''(t)"), total_derivative("y", "t", 2));
        assert_eq!(
            single("f'(x, y)"),
            Expr::call("f'", vec![sym("x"), sym("y")])
        );
        assert_eq!(single("y'"), sym("y'"));
    }

    #[test]
    fn test_named_functions() {
        assert_eq!(
            single("\\log_{2}(x)"),
            Expr::FunctionCall {
                name: "\\log".to_string(),
                args: vec![sym("x")],
                power: None,
                base: Some(Box::new(num(2.0))),
            }
        );
        let det = single("\\det\\begin{pmatrix} a & b \\\\ c & d \\end{pmatrix}");
        match det {
            Expr::FunctionCall { name, args, .. } => {
                assert_eq!(name, "\\det");
                assert!(matches!(args[0], Expr::Matrix { kind: MatrixKind::Paren, .. }));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_ragged_matrix_is_shape_error() {
        let err = reduce_source("\\begin{bmatrix} 1 & 2 \\\\ 3 \\end{bmatrix}").unwrap_err();
        assert!(matches!(err, CompileError::MatrixShape { row: 1, .. }));
    }

    #[test]
    fn test_integrals() {
        let expr = single("\\int_{0}^{1} x^2 \\, dx");
        assert!(matches!(
            expr,
            Expr::Integral { ref var, domain: IntegralDomain::Bounds { .. }, .. } if var == "x"
        ));

        let expr = single("\\iint_{D} f \\, dA");
        match expr {
            Expr::MultiIntegral {
                kind, vars, domain, ..
            } => {
                assert_eq!(kind, IntegralKind::Double);
                assert_eq!(vars, vec!["A".to_string()]);
                assert!(matches!(domain, IntegralDomain::Region(_)));
            }
            other => panic!("expected multi-integral, got {:?}", other),
        }
    }

    #[test]
    fn test_cases_otherwise() {
        let expr = single("\\begin{cases} x & x > 0 \\\\ 0 & \\text{otherwise} \\end{cases}");
        assert_eq!(
            expr,
            Expr::Piecewise(vec![
                Branch {
                    value: sym("x"),
                    condition: Some(Expr::Relation {
                        op: RelOp::Gt,
                        left: Box::new(sym("x")),
                        right: Box::new(num(0.0)),
                    }),
                },
                Branch {
                    value: num(0.0),
                    condition: None,
                },
            ])
        );
    }

    #[test]
    fn test_sets_and_quantifiers() {
        let expr = single("\\{x \\in \\mathbb{R} : x > 0\\}");
        match expr {
            Expr::SetBuilder { bindings, .. } => {
                assert_eq!(bindings[0].var, "x");
                assert_eq!(bindings[0].domain, Some(sym("\\mathbb{R}")));
            }
            other => panic!("expected set-builder, got {:?}", other),
        }

        let expr = single("\\forall x \\in S, x \\ge 0");
        assert!(matches!(expr, Expr::Quantifier { ref bindings, .. } if bindings.len() == 1));

        assert_eq!(single("\\{1, 2\\}"), Expr::Set(vec![num(1.0), num(2.0)]));
    }

    #[test]
    fn test_accent_and_nabla() {
        assert_eq!(
            single("\\hat{x}"),
            Expr::Accent {
                kind: AccentKind::Hat,
                base: Box::new(sym("x"))
            }
        );
        assert_eq!(
            single("\\nabla^{2}_{x, y} u"),
            Expr::Laplacian {
                body: Box::new(sym("u")),
                vars: vec!["x".to_string(), "y".to_string()],
                power: Box::new(num(2.0)),
            }
        );
        assert_eq!(
            single("\\nabla_{x} u"),
            Expr::Gradient {
                body: Box::new(sym("u")),
                vars: vec!["x".to_string()],
            }
        );
    }

    #[test]
    fn test_round_trip_through_display() {
        let sources = [
            "x^2 + 1",
            "\\frac{a + b}{2 \\cdot c}",
            "\\sin^{-1}(x) - \\log_{2}(y)",
            "f(x, y) / g(x)",
            "\\begin{bmatrix} 1 & -2 \\\\ x^2 & y \\end{bmatrix}",
            "a - (b - c)",
            "(-2)^2",
            "2^{x^2}",
        ];
        for source in sources {
            let first = single(source);
            let printed = first.to_string();
            let second = single(&printed);
            assert_eq!(first, second, "round trip of {:?} via {:?}", source, printed);
            assert_eq!(printed, second.to_string());
        }
    }
}
