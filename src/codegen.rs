//! Futhark code generator
//!
//! Walks the AST bottom-up and emits one Futhark expression per node,
//! tagged with its value type. Calculus operators become central
//! differences and Simpson quadrature. Constructs without a lowering
//! become inert placeholders carrying the `L2F-UNHANDLED` marker.
//!
//! Every fragment's code is atomic: anything longer than a literal or an
//! identifier is wrapped in parentheses, so parents can splice it freely.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::analyzer::{free_variables, is_transpose, ValueType};
use crate::ast::*;
use crate::config::CompileOptions;
use crate::error::{CompileError, CompileResult, Diagnostic};
use crate::target::Routine;

/// Marker carried by every placeholder in generated code
pub const UNHANDLED_MARKER: &str = "L2F-UNHANDLED";

/// Largest literal `\nabla` power expanded into repeated second differences
pub const MAX_LAPLACIAN_POWER: usize = 16;

/// A generated Futhark expression and its type
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub code: String,
    pub ty: ValueType,
}

impl Fragment {
    pub fn new(code: impl Into<String>, ty: ValueType) -> Self {
        Self {
            code: code.into(),
            ty,
        }
    }

    pub fn scalar(code: impl Into<String>) -> Self {
        Self::new(code, ValueType::Scalar)
    }

    pub fn boolean(code: impl Into<String>) -> Self {
        Self::new(code, ValueType::Bool)
    }
}

/// Result of one generation call
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub body: String,
    /// Type of the body; `None` for a tuple of several statements
    pub ty: Option<ValueType>,
    pub routines: BTreeSet<Routine>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binder {
    /// `i64` loop index, cast to `f64` on use
    Index,
    /// `f64` lambda or local function parameter
    Real,
}

/// A name bound in the code being emitted
#[derive(Debug, Clone)]
struct Bound {
    name: String,
    ident: String,
    binder: Binder,
}

impl Bound {
    fn new(name: &str, binder: Binder) -> Option<Self> {
        Some(Self {
            name: name.to_string(),
            ident: sanitize_identifier(name)?,
            binder,
        })
    }
}

/// A local `f64` function wrapping an expression, the starting point of
/// every finite-difference operator
struct LocalFunction {
    name: String,
    params: Vec<Bound>,
    definitions: Vec<String>,
}

impl LocalFunction {
    fn signature(&self) -> String {
        self.params
            .iter()
            .map(|p| format!("({}: f64)", p.ident))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn position(&self, axis: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == axis)
    }

    /// `(f x y)`, optionally with one argument shifted: `(f (x + h) y)`
    fn invoke(&self, function: &str, shift: Option<(usize, &str)>) -> String {
        let args: Vec<String> = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| match shift {
                Some((k, delta)) if k == i => format!("({} {})", p.ident, delta),
                _ => p.ident.clone(),
            })
            .collect();
        format!("({} {})", function, args.join(" "))
    }

    fn define(&mut self, name: String, body: String) {
        self.definitions
            .push(format!("let {} {}: f64 = {}", name, self.signature(), body));
        self.name = name;
    }
}

/// Futhark code generator
pub struct CodeGenerator {
    options: CompileOptions,
    scopes: Vec<Bound>,
    fresh_counter: usize,
    routines: BTreeSet<Routine>,
    diagnostics: Vec<Diagnostic>,
}

impl CodeGenerator {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            scopes: Vec::new(),
            fresh_counter: 0,
            routines: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Generate the body of the program's function
    pub fn generate(&mut self, program: &Program) -> CompileResult<GeneratedCode> {
        self.scopes.clear();
        self.fresh_counter = 0;

        let fragments = program
            .statements
            .iter()
            .map(|statement| self.gen(statement))
            .collect::<CompileResult<Vec<_>>>()?;

        let (body, ty) = match fragments.as_slice() {
            [] => return Err(CompileError::grammar("empty program")),
            [single] => (single.code.clone(), Some(single.ty)),
            many => {
                let codes: Vec<&str> = many.iter().map(|f| f.code.as_str()).collect();
                (format!("({})", codes.join(", ")), None)
            }
        };

        Ok(GeneratedCode {
            body,
            ty,
            routines: std::mem::take(&mut self.routines),
            diagnostics: std::mem::take(&mut self.diagnostics),
        })
    }

    /// Generate a single expression
    pub fn generate_expr(&mut self, expr: &Expr) -> CompileResult<Fragment> {
        self.gen(expr)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn fresh(&mut self, base: &str) -> String {
        let name = format!("{}'{}", base, self.fresh_counter);
        self.fresh_counter += 1;
        name
    }

    fn scoped<T>(
        &mut self,
        bindings: Vec<Bound>,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        let depth = self.scopes.len();
        self.scopes.extend(bindings);
        let result = f(self);
        self.scopes.truncate(depth);
        result
    }

    fn unhandled(&mut self, construct: &str, expr: &Expr) -> CompileResult<Fragment> {
        let latex = expr.to_string();
        if self.options.strict {
            return Err(CompileError::unhandled(construct, latex));
        }
        warn!("no lowering for {}: {}", construct, latex);
        let code = placeholder(construct, &latex);
        self.diagnostics.push(Diagnostic::unhandled(construct, latex));
        Ok(Fragment::scalar(code))
    }

    fn fallback(&mut self, construct: &str, expr: &Expr) {
        let latex = expr.to_string();
        debug!("{} defaults to scalar: {}", construct, latex);
        self.diagnostics.push(Diagnostic::fallback(construct, latex));
    }

    fn gen(&mut self, expr: &Expr) -> CompileResult<Fragment> {
        if let Some(name) = expr.variable_name() {
            return self.gen_variable(&name, expr);
        }

        match expr {
            Expr::Number(v) => Ok(Fragment::scalar(float_literal(*v))),
            Expr::Infinity => Ok(Fragment::scalar("f64.inf")),
            Expr::Symbol(name) => match name.as_str() {
                "e" | "E" => Ok(Fragment::scalar("f64.e")),
                "pi" | "π" => Ok(Fragment::scalar("f64.pi")),
                "infty" => Ok(Fragment::scalar("f64.inf")),
                _ => self.unhandled("symbol", expr),
            },
            Expr::Subscript { .. } => self.unhandled("subscript expression", expr),
            Expr::Accent { .. } => self.unhandled("accent on an expression", expr),

            Expr::BinaryOp { op, left, right } => self.gen_binary(expr, *op, left, right),
            Expr::Fraction {
                numerator,
                denominator,
            } => {
                let left = self.gen(numerator)?;
                let right = self.gen(denominator)?;
                self.broadcast(expr, "/", left, right)
            }
            Expr::Mod { left, right } => {
                let l = self.gen(left)?;
                let r = self.gen(right)?;
                self.broadcast(expr, "%", l, r)
            }

            Expr::Sqrt { radicand, index } => {
                let operand = self.gen(radicand)?;
                match index {
                    None => self.elementwise(expr, operand, &|x: &str| format!("(f64.sqrt {})", x)),
                    Some(index) => {
                        let n = self.gen_scalar(index)?;
                        self.elementwise(expr, operand, &|x: &str| {
                            format!("({} ** (1.0f64 / {}))", x, n.code)
                        })
                    }
                }
            }
            Expr::Abs(inner) => {
                let operand = self.gen(inner)?;
                self.elementwise(expr, operand, &|x: &str| format!("(f64.abs {})", x))
            }

            Expr::FunctionCall {
                name,
                args,
                power,
                base,
            } => self.gen_call(expr, name, args, power.as_deref(), base.as_deref()),

            Expr::Sum {
                body,
                var,
                lower,
                upper,
            } => self.gen_reduction(expr, body, var, lower, upper, false),
            Expr::Product {
                body,
                var,
                lower,
                upper,
            } => self.gen_reduction(expr, body, var, lower, upper, true),

            Expr::Integral {
                integrand,
                var,
                domain,
            } => self.gen_integral(expr, integrand, var, domain),
            Expr::MultiIntegral {
                integrand,
                vars,
                domain,
                ..
            } => self.gen_multi_integral(expr, integrand, vars, domain),

            Expr::Derivative { body, vars, .. } => self.gen_derivative(expr, body, vars),
            Expr::Gradient { body, vars } => self.gen_gradient(expr, body, vars),
            Expr::Laplacian { body, vars, power } => self.gen_laplacian(expr, body, vars, power),

            Expr::Matrix { rows, .. } => self.gen_matrix(expr, rows),
            Expr::Norm { body, order } => self.gen_norm(expr, body, order.as_deref()),
            Expr::InnerProduct(items) => self.gen_inner_product(expr, items),

            Expr::Piecewise(branches) => self.gen_piecewise(expr, branches),
            Expr::Relation { op, left, right } => self.gen_relation(expr, *op, left, right),
            Expr::LogicOp { op, left, right } => {
                let a = self.gen_condition(left)?;
                let b = self.gen_condition(right)?;
                let code = match op {
                    LogicOpKind::And => format!("({} && {})", a, b),
                    LogicOpKind::Or => format!("({} || {})", a, b),
                    LogicOpKind::Implies => format!("(!{} || {})", a, b),
                    LogicOpKind::Iff => format!("({} == {})", a, b),
                };
                Ok(Fragment::boolean(code))
            }
            Expr::Not(inner) => {
                let operand = self.gen_condition(inner)?;
                Ok(Fragment::boolean(format!("(!{})", operand)))
            }

            Expr::EmptySet => self.unhandled("empty set", expr),
            Expr::Set(_) => self.unhandled("set literal", expr),
            Expr::SetBuilder { .. } => self.unhandled("set-builder", expr),
            Expr::SetOp { .. } => self.unhandled("set operation", expr),
            Expr::Quantifier { .. } => self.unhandled("quantifier", expr),
            Expr::ArgExtremum { kind, .. } => {
                let construct = match kind {
                    ExtremumKind::ArgMax => "argmax",
                    ExtremumKind::ArgMin => "argmin",
                };
                self.unhandled(construct, expr)
            }
        }
    }

    /// Futhark code for a variable reference in the current scope
    fn variable_code(&self, name: &str) -> Option<String> {
        if let Some(bound) = self.scopes.iter().rev().find(|b| b.name == name) {
            return Some(match bound.binder {
                Binder::Index => format!("(f64.i64 {})", bound.ident),
                Binder::Real => bound.ident.clone(),
            });
        }
        sanitize_identifier(name)
    }

    fn gen_variable(&mut self, name: &str, expr: &Expr) -> CompileResult<Fragment> {
        match self.variable_code(name) {
            Some(code) => Ok(Fragment::scalar(code)),
            None if name.starts_with('\\') => self.unhandled("set symbol", expr),
            None => self.unhandled("identifier", expr),
        }
    }

    fn gen_scalar(&mut self, expr: &Expr) -> CompileResult<Fragment> {
        let fragment = self.gen(expr)?;
        if fragment.ty == ValueType::Scalar {
            Ok(fragment)
        } else {
            self.unhandled("non-scalar operand", expr)
        }
    }

    /// Boolean code for a condition; scalars compare against zero
    fn gen_condition(&mut self, expr: &Expr) -> CompileResult<String> {
        let fragment = match self.gen(expr)? {
            f if f.ty.is_array() => self.unhandled("array used as a condition", expr)?,
            f => f,
        };
        Ok(match fragment.ty {
            ValueType::Bool => fragment.code,
            _ => format!("({} != 0.0f64)", fragment.code),
        })
    }

    fn gen_binary(
        &mut self,
        expr: &Expr,
        op: BinOp,
        left: &Expr,
        right: &Expr,
    ) -> CompileResult<Fragment> {
        if op == BinOp::Cross {
            return self.unhandled("cross product", expr);
        }

        let l = self.gen(left)?;
        if op == BinOp::Pow && is_transpose(left, right) {
            return Ok(match l.ty.rank() {
                2 => Fragment::new(format!("(transpose {})", l.code), l.ty),
                _ => l,
            });
        }

        let r = self.gen(right)?;
        let symbol = match op {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul | BinOp::Hadamard => "*",
            BinOp::Div => "/",
            BinOp::Pow => "**",
            BinOp::Cross => return self.unhandled("cross product", expr),
        };
        self.broadcast(expr, symbol, l, r)
    }

    /// Apply a binary operator, mapping over array operands
    fn broadcast(
        &mut self,
        expr: &Expr,
        op: &str,
        left: Fragment,
        right: Fragment,
    ) -> CompileResult<Fragment> {
        use ValueType::*;

        match (left.ty, right.ty) {
            (Scalar, Scalar) => Ok(Fragment::scalar(format!(
                "({} {} {})",
                left.code, op, right.code
            ))),
            (Array { rank }, Scalar) => {
                let code = self.map_unary(rank, &left.code, &|v: &str| {
                    format!("({} {} {})", v, op, right.code)
                });
                Ok(Fragment::new(code, left.ty))
            }
            (Scalar, Array { rank }) => {
                let code = self.map_unary(rank, &right.code, &|v: &str| {
                    format!("({} {} {})", left.code, op, v)
                });
                Ok(Fragment::new(code, right.ty))
            }
            (Array { rank: l }, Array { rank: r }) if l == r => {
                let code = self.map_binary(l, &left.code, &right.code, &|a: &str, b: &str| {
                    format!("({} {} {})", a, op, b)
                });
                Ok(Fragment::new(code, left.ty))
            }
            (Array { .. }, Array { .. }) => self.unhandled("operands of different rank", expr),
            _ => self.unhandled("arithmetic on a truth value", expr),
        }
    }

    fn map_unary<F: Fn(&str) -> String>(&mut self, rank: usize, array: &str, apply: &F) -> String {
        let elem = self.fresh("v");
        let inner = if rank <= 1 {
            apply(&elem)
        } else {
            self.map_unary(rank - 1, &elem, apply)
        };
        format!("(map (\\{} -> {}) {})", elem, inner, array)
    }

    fn map_binary<F: Fn(&str, &str) -> String>(
        &mut self,
        rank: usize,
        left: &str,
        right: &str,
        apply: &F,
    ) -> String {
        let a = self.fresh("a");
        let b = self.fresh("b");
        let inner = if rank <= 1 {
            apply(&a, &b)
        } else {
            self.map_binary(rank - 1, &a, &b, apply)
        };
        format!("(map2 (\\{} {} -> {}) {} {})", a, b, inner, left, right)
    }

    /// Apply a scalar function to a scalar, or to every element of an array
    fn elementwise<F: Fn(&str) -> String>(
        &mut self,
        expr: &Expr,
        operand: Fragment,
        apply: &F,
    ) -> CompileResult<Fragment> {
        match operand.ty {
            ValueType::Scalar => Ok(Fragment::scalar(apply(&operand.code))),
            ValueType::Array { rank } => {
                let code = self.map_unary(rank, &operand.code, apply);
                Ok(Fragment::new(code, operand.ty))
            }
            ValueType::Bool => self.unhandled("function of a truth value", expr),
        }
    }

    fn apply_power(
        &mut self,
        expr: &Expr,
        fragment: Fragment,
        power: Option<&Expr>,
    ) -> CompileResult<Fragment> {
        match power {
            None => Ok(fragment),
            Some(power) => {
                let p = self.gen_scalar(power)?;
                self.elementwise(expr, fragment, &|x: &str| format!("({} ** {})", x, p.code))
            }
        }
    }

    fn gen_call(
        &mut self,
        expr: &Expr,
        name: &str,
        args: &[Expr],
        power: Option<&Expr>,
        base: Option<&Expr>,
    ) -> CompileResult<Fragment> {
        let builtin = match name.strip_prefix('\\') {
            Some(builtin) => builtin,
            None => return self.unhandled("undefined function", expr),
        };

        match builtin {
            "det" => self.gen_determinant(expr, args, power),
            "min" | "max" => self.gen_min_max(expr, builtin, args, power),
            _ => self.gen_elementwise_call(expr, builtin, args, power, base),
        }
    }

    fn gen_elementwise_call(
        &mut self,
        expr: &Expr,
        builtin: &str,
        args: &[Expr],
        power: Option<&Expr>,
        base: Option<&Expr>,
    ) -> CompileResult<Fragment> {
        let arg = match args {
            [single] => single,
            _ => return self.unhandled("function arity", expr),
        };

        // `\sin^{-1}` is the inverse, not a reciprocal
        let inverse = matches!(power, Some(Expr::Number(p)) if *p == -1.0);
        let (lowering, power) = match (builtin, inverse) {
            ("sin", true) => (Lowering::Direct("f64.asin"), None),
            ("cos", true) => (Lowering::Direct("f64.acos"), None),
            ("tan", true) => (Lowering::Direct("f64.atan"), None),
            _ => match Lowering::of(builtin) {
                Some(lowering) => (lowering, power),
                None => return self.unhandled("function", expr),
            },
        };

        let operand = self.gen(arg)?;
        let result = match (lowering, base) {
            (Lowering::Direct("f64.log"), Some(base)) => {
                let b = self.gen_scalar(base)?;
                self.elementwise(expr, operand, &|x: &str| {
                    format!("(f64.log {} / f64.log {})", x, b.code)
                })?
            }
            (_, Some(_)) => return self.unhandled("function with a subscript", expr),
            (Lowering::Direct(function), None) => {
                self.elementwise(expr, operand, &|x: &str| format!("({} {})", function, x))?
            }
            (Lowering::Reciprocal(function), None) => self.elementwise(expr, operand, &|x: &str| {
                format!("(1.0f64 / {} {})", function, x)
            })?,
        };
        self.apply_power(expr, result, power)
    }

    fn gen_determinant(
        &mut self,
        expr: &Expr,
        args: &[Expr],
        power: Option<&Expr>,
    ) -> CompileResult<Fragment> {
        let matrix = match args {
            [single] => self.gen(single)?,
            _ => return self.unhandled("determinant arity", expr),
        };
        if matrix.ty.rank() != 2 {
            return self.unhandled("determinant of a non-matrix", expr);
        }
        self.routines.insert(Routine::Determinant);
        let det = Fragment::scalar(format!("({} {})", Routine::Determinant.name(), matrix.code));
        self.apply_power(expr, det, power)
    }

    /// Binary min/max fold over scalars, or a reduction over one array
    fn gen_min_max(
        &mut self,
        expr: &Expr,
        which: &str,
        args: &[Expr],
        power: Option<&Expr>,
    ) -> CompileResult<Fragment> {
        let fragments = args
            .iter()
            .map(|arg| self.gen(arg))
            .collect::<CompileResult<Vec<_>>>()?;
        let function = format!("f64.{}", which);

        let result = match fragments.as_slice() {
            [single] if single.ty.is_array() => {
                let neutral = if which == "min" { "f64.inf" } else { "(-f64.inf)" };
                Fragment::scalar(format!(
                    "(reduce {} {} {})",
                    function,
                    neutral,
                    flatten(&single.code, single.ty.rank())
                ))
            }
            [single] if single.ty == ValueType::Scalar => single.clone(),
            many if many.iter().all(|f| f.ty == ValueType::Scalar) => match many.split_last() {
                Some((last, rest)) => Fragment::scalar(rest.iter().rev().fold(
                    last.code.clone(),
                    |acc, f| format!("({} {} {})", function, f.code, acc),
                )),
                None => return self.unhandled("empty argument list", expr),
            },
            _ => return self.unhandled("mixed scalar and array arguments", expr),
        };
        self.apply_power(expr, result, power)
    }

    fn gen_reduction(
        &mut self,
        expr: &Expr,
        body: &Expr,
        var: &str,
        lower: &Expr,
        upper: &Expr,
        product: bool,
    ) -> CompileResult<Fragment> {
        if mentions_any(&[lower, upper], &[var]) {
            return self.unhandled("index variable in its own bounds", expr);
        }
        let lower = self.gen_scalar(lower)?;
        let upper = self.gen_scalar(upper)?;
        let index = match Bound::new(var, Binder::Index) {
            Some(index) => index,
            None => return self.unhandled("index variable", expr),
        };
        let ident = index.ident.clone();

        let body = self.scoped(vec![index], |gen| gen.gen(body))?;
        if body.ty != ValueType::Scalar {
            return self.unhandled("non-scalar summand", expr);
        }

        let (operator, neutral) = if product {
            ("*", "1.0f64")
        } else {
            ("+", "0.0f64")
        };
        let lo = self.fresh("lo");
        let hi = self.fresh("hi");
        Ok(Fragment::scalar(format!(
            "(let {lo} = i64.f64 (f64.floor {lower}) \
             let {hi} = i64.f64 (f64.floor {upper}) \
             in reduce ({operator}) {neutral} \
             (map (\\({ident}: i64) -> {body}) (map (+ {lo}) (iota (i64.max 0 ({hi} - {lo} + 1))))))",
            lo = lo,
            hi = hi,
            lower = lower.code,
            upper = upper.code,
            operator = operator,
            neutral = neutral,
            ident = ident,
            body = body.code,
        )))
    }

    /// Bounds of a definite integral, evaluated outside its scope
    fn gen_bounds(&mut self, domain: &IntegralDomain) -> CompileResult<Option<(Fragment, Fragment)>> {
        match domain {
            IntegralDomain::Bounds { lower, upper } => {
                let lower = self.gen_scalar(lower)?;
                let upper = self.gen_scalar(upper)?;
                Ok(Some((lower, upper)))
            }
            IntegralDomain::Indefinite | IntegralDomain::Region(_) => Ok(None),
        }
    }

    fn gen_integral(
        &mut self,
        expr: &Expr,
        integrand: &Expr,
        var: &str,
        domain: &IntegralDomain,
    ) -> CompileResult<Fragment> {
        if bounds_mention(domain, &[var]) {
            return self.unhandled("integration variable in its own bounds", expr);
        }
        let (lower, upper) = match self.gen_bounds(domain)? {
            Some(bounds) => bounds,
            None => return self.unhandled(domain_construct(domain), expr),
        };
        let axis = match Bound::new(var, Binder::Real) {
            Some(axis) => axis,
            None => return self.unhandled("integration variable", expr),
        };
        let x = axis.ident.clone();

        let integrand = self.scoped(vec![axis], |gen| gen.gen(integrand))?;
        if integrand.ty != ValueType::Scalar {
            return self.unhandled("non-scalar integrand", expr);
        }

        let n = self.options.simpson_intervals();
        let a = self.fresh("a");
        let b = self.fresh("b");
        let h = self.fresh("h");
        let i = self.fresh("i");
        let w = self.fresh("w");
        Ok(Fragment::scalar(format!(
            "(let {a} = {lower} let {b} = {upper} let {h} = ({b} - {a}) / {steps} \
             in ({h} / 3.0f64) * reduce (+) 0.0f64 \
             (map (\\({i}: i64) -> let {x} = {a} + f64.i64 {i} * {h} let {w} = {weight} in {w} * {integrand}) \
             (iota {count})))",
            a = a,
            b = b,
            h = h,
            i = i,
            w = w,
            x = x,
            lower = lower.code,
            upper = upper.code,
            steps = float_literal(n as f64),
            weight = simpson_weight(&i, n),
            integrand = integrand.code,
            count = n + 1,
        )))
    }

    /// Tensor-product Simpson rule with one accumulation loop per axis
    fn gen_multi_integral(
        &mut self,
        expr: &Expr,
        integrand: &Expr,
        vars: &[String],
        domain: &IntegralDomain,
    ) -> CompileResult<Fragment> {
        match vars {
            [] => return self.unhandled("integral without differentials", expr),
            [single] => return self.gen_integral(expr, integrand, single, domain),
            _ => {}
        }

        let names: Vec<&str> = vars.iter().map(String::as_str).collect();
        if bounds_mention(domain, &names) {
            return self.unhandled("integration variable in its own bounds", expr);
        }
        let (lower, upper) = match self.gen_bounds(domain)? {
            Some(bounds) => bounds,
            None => return self.unhandled(domain_construct(domain), expr),
        };
        let axes = match vars
            .iter()
            .map(|var| Bound::new(var, Binder::Real))
            .collect::<Option<Vec<_>>>()
        {
            Some(axes) => axes,
            None => return self.unhandled("integration variable", expr),
        };
        let idents: Vec<String> = axes.iter().map(|axis| axis.ident.clone()).collect();

        let integrand = self.scoped(axes, |gen| gen.gen(integrand))?;
        if integrand.ty != ValueType::Scalar {
            return self.unhandled("non-scalar integrand", expr);
        }

        let n = self.options.multi_simpson_intervals();
        let a = self.fresh("a");
        let b = self.fresh("b");
        let h = self.fresh("h");

        let mut inner = integrand.code;
        for x in idents.iter().rev() {
            let acc = self.fresh("acc");
            let i = self.fresh("i");
            let w = self.fresh("w");
            inner = format!(
                "(loop {acc} = 0.0f64 for {i} < {count} do \
                 let {x} = {a} + f64.i64 {i} * {h} let {w} = {weight} in {acc} + {w} * {inner})",
                acc = acc,
                i = i,
                w = w,
                x = x,
                a = a,
                h = h,
                count = n + 1,
                weight = simpson_weight(&i, n),
                inner = inner,
            );
        }

        Ok(Fragment::scalar(format!(
            "(let {a} = {lower} let {b} = {upper} let {h} = ({b} - {a}) / {steps} \
             in ({h} / 3.0f64) ** {dims} * {inner})",
            a = a,
            b = b,
            h = h,
            lower = lower.code,
            upper = upper.code,
            steps = float_literal(n as f64),
            dims = float_literal(vars.len() as f64),
            inner = inner,
        )))
    }

    /// Wrap `body` in a local function of its free variables and `axes`.
    /// `Err` names the construct that prevented it.
    fn local_function(
        &mut self,
        body: &Expr,
        axes: &[String],
    ) -> CompileResult<Result<LocalFunction, &'static str>> {
        let mut names = free_variables(body);
        names.extend(axes.iter().cloned());
        names.sort();
        names.dedup();

        let params: Vec<Bound> = names
            .iter()
            .filter_map(|name| Bound::new(name, Binder::Real))
            .collect();
        if params.is_empty() {
            return Ok(Err("differential operator without variables"));
        }
        if !axes.iter().all(|axis| params.iter().any(|p| &p.name == axis)) {
            return Ok(Err("differentiation variable"));
        }

        let fragment = self.scoped(params.clone(), |gen| gen.gen(body))?;
        if fragment.ty != ValueType::Scalar {
            return Ok(Err("differentiation of a non-scalar"));
        }

        let mut function = LocalFunction {
            name: String::new(),
            params,
            definitions: Vec::new(),
        };
        let name = self.fresh("f");
        function.define(name, fragment.code);
        Ok(Ok(function))
    }

    /// Arguments for calling a local function from the current scope
    fn call_arguments(&self, function: &LocalFunction) -> String {
        function
            .params
            .iter()
            .map(|p| self.variable_code(&p.name).unwrap_or_else(|| p.ident.clone()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `(f(.., v + h, ..) - f(.., v - h, ..)) / 2h`
    fn central_difference(&self, function: &LocalFunction, current: &str, k: usize) -> String {
        let h = float_literal(self.options.derivative_step);
        let forward = function.invoke(current, Some((k, &format!("+ {}", h))));
        let backward = function.invoke(current, Some((k, &format!("- {}", h))));
        format!("({} - {}) / (2.0f64 * {})", forward, backward, h)
    }

    fn gen_derivative(
        &mut self,
        expr: &Expr,
        body: &Expr,
        vars: &[VarOrder],
    ) -> CompileResult<Fragment> {
        let mut steps: Vec<&str> = Vec::new();
        for entry in vars {
            match entry.order.as_count() {
                Some(order) => steps.extend(std::iter::repeat(entry.var.as_str()).take(order)),
                None => return self.unhandled("symbolic derivative order", expr),
            }
        }
        let axes: Vec<String> = vars.iter().map(|v| v.var.clone()).collect();

        let mut function = match self.local_function(body, &axes)? {
            Ok(function) => function,
            Err(construct) => return self.unhandled(construct, expr),
        };

        // Pairs apply in listed order, once per unit of order
        for axis in steps {
            let k = match function.position(axis) {
                Some(k) => k,
                None => return self.unhandled("differentiation variable", expr),
            };
            let current = function.name.clone();
            let difference = self.central_difference(&function, &current, k);
            let next = self.fresh("f");
            function.define(next, difference);
        }

        Ok(Fragment::scalar(format!(
            "({} in ({} {}))",
            function.definitions.join(" "),
            function.name,
            self.call_arguments(&function)
        )))
    }

    fn gen_gradient(&mut self, expr: &Expr, body: &Expr, vars: &[String]) -> CompileResult<Fragment> {
        let axes = if vars.is_empty() {
            free_variables(body)
        } else {
            vars.to_vec()
        };
        if axes.is_empty() {
            return self.unhandled("gradient without variables", expr);
        }

        let mut function = match self.local_function(body, &axes)? {
            Ok(function) => function,
            Err(construct) => return self.unhandled(construct, expr),
        };
        let base = function.name.clone();
        let args = self.call_arguments(&function);

        let mut components = Vec::new();
        for axis in &axes {
            let k = match function.position(axis) {
                Some(k) => k,
                None => return self.unhandled("differentiation variable", expr),
            };
            let difference = self.central_difference(&function, &base, k);
            let name = self.fresh("f");
            function.define(name.clone(), difference);
            components.push(format!("({} {})", name, args));
        }

        Ok(Fragment::new(
            format!(
                "({} in [{}])",
                function.definitions.join(" "),
                components.join(", ")
            ),
            ValueType::Array { rank: 1 },
        ))
    }

    /// `\nabla^{p}` re-applies the second-difference Laplacian `p` times
    fn gen_laplacian(
        &mut self,
        expr: &Expr,
        body: &Expr,
        vars: &[String],
        power: &Expr,
    ) -> CompileResult<Fragment> {
        let repetitions = match power.as_count() {
            Some(p) if (1..=MAX_LAPLACIAN_POWER).contains(&p) => p,
            Some(p) if p > MAX_LAPLACIAN_POWER => {
                return self.unhandled("Laplacian power too large", expr)
            }
            _ => return self.unhandled("symbolic Laplacian power", expr),
        };
        let axes = if vars.is_empty() {
            free_variables(body)
        } else {
            vars.to_vec()
        };
        if axes.is_empty() {
            return self.unhandled("Laplacian without variables", expr);
        }

        let mut function = match self.local_function(body, &axes)? {
            Ok(function) => function,
            Err(construct) => return self.unhandled(construct, expr),
        };
        let positions = match axes
            .iter()
            .map(|axis| function.position(axis))
            .collect::<Option<Vec<_>>>()
        {
            Some(positions) => positions,
            None => return self.unhandled("differentiation variable", expr),
        };

        let h = float_literal(self.options.laplacian_step);
        for _ in 0..repetitions {
            let current = function.name.clone();
            let center = function.invoke(&current, None);
            let terms: Vec<String> = positions
                .iter()
                .map(|&k| {
                    format!(
                        "(({} - 2.0f64 * {} + {}) / ({} * {}))",
                        function.invoke(&current, Some((k, &format!("+ {}", h)))),
                        center,
                        function.invoke(&current, Some((k, &format!("- {}", h)))),
                        h,
                        h
                    )
                })
                .collect();
            let next = self.fresh("f");
            function.define(next, terms.join(" + "));
        }

        Ok(Fragment::scalar(format!(
            "({} in ({} {}))",
            function.definitions.join(" "),
            function.name,
            self.call_arguments(&function)
        )))
    }

    fn gen_matrix(&mut self, expr: &Expr, rows: &[Vec<Expr>]) -> CompileResult<Fragment> {
        if rows.first().map_or(true, |row| row.is_empty()) {
            return self.unhandled("empty matrix", expr);
        }

        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = Vec::with_capacity(row.len());
            for cell in row {
                let fragment = self.gen(cell)?;
                if fragment.ty != ValueType::Scalar {
                    return self.unhandled("non-scalar matrix entry", expr);
                }
                cells.push(fragment.code);
            }
            lines.push(format!("[{}]", cells.join(", ")));
        }
        Ok(Fragment::new(
            format!("[{}]", lines.join(", ")),
            ValueType::Array { rank: 2 },
        ))
    }

    fn gen_norm(&mut self, expr: &Expr, body: &Expr, order: Option<&Expr>) -> CompileResult<Fragment> {
        let operand = self.gen(body)?;
        let flat = match operand.ty {
            ValueType::Scalar => return Ok(Fragment::scalar(format!("(f64.abs {})", operand.code))),
            ValueType::Array { rank } => flatten(&operand.code, rank),
            ValueType::Bool => return self.unhandled("norm of a truth value", expr),
        };

        let v = self.fresh("v");
        let euclidean = format!(
            "(f64.sqrt (reduce (+) 0.0f64 (map (\\{v} -> {v} * {v}) {flat})))",
            v = v,
            flat = flat
        );
        let code = match order {
            None => euclidean,
            Some(Expr::Number(p)) if *p == 2.0 => euclidean,
            Some(Expr::Number(p)) if *p == 1.0 => {
                format!("(reduce (+) 0.0f64 (map f64.abs {}))", flat)
            }
            Some(Expr::Infinity) => format!("(reduce f64.max 0.0f64 (map f64.abs {}))", flat),
            Some(p) => {
                let p = self.gen_scalar(p)?;
                format!(
                    "((reduce (+) 0.0f64 (map (\\{v} -> f64.abs {v} ** {p}) {flat})) ** (1.0f64 / {p}))",
                    v = v,
                    p = p.code,
                    flat = flat
                )
            }
        };
        Ok(Fragment::scalar(code))
    }

    fn gen_inner_product(&mut self, expr: &Expr, items: &[Expr]) -> CompileResult<Fragment> {
        let (left, right) = match items {
            [left, right] => (self.gen(left)?, self.gen(right)?),
            _ => return self.unhandled("inner product of more than two operands", expr),
        };
        match (left.ty, right.ty) {
            (ValueType::Scalar, ValueType::Scalar) => Ok(Fragment::scalar(format!(
                "({} * {})",
                left.code, right.code
            ))),
            (ValueType::Array { rank: l }, ValueType::Array { rank: r }) if l == r => {
                Ok(Fragment::scalar(format!(
                    "(reduce (+) 0.0f64 (map2 (*) {} {}))",
                    flatten(&left.code, l),
                    flatten(&right.code, r)
                )))
            }
            _ => self.unhandled("inner product of mismatched operands", expr),
        }
    }

    fn gen_piecewise(&mut self, expr: &Expr, branches: &[Branch]) -> CompileResult<Fragment> {
        let mut arms = Vec::new();
        let mut otherwise = None;
        for branch in branches {
            match &branch.condition {
                Some(condition) => {
                    let condition = self.gen_condition(condition)?;
                    let value = self.gen(&branch.value)?;
                    arms.push((condition, value));
                }
                // Rows after the first unconditioned one are unreachable
                None => {
                    otherwise = Some(self.gen(&branch.value)?);
                    break;
                }
            }
        }

        let types: Vec<ValueType> = arms
            .iter()
            .map(|(_, value)| value.ty)
            .chain(otherwise.iter().map(|value| value.ty))
            .collect();
        let ty = match types.split_first() {
            None => ValueType::Scalar,
            Some((first, rest)) if rest.iter().all(|ty| ty == first) => *first,
            Some(_) => {
                self.fallback("piecewise branches of different types", expr);
                ValueType::Scalar
            }
        };

        // NaN only fills in for scalar branches
        let mut code = match otherwise {
            Some(value) => value.code,
            None if ty == ValueType::Scalar => "f64.nan".to_string(),
            None => return self.unhandled("non-scalar cases without an otherwise row", expr),
        };
        for (condition, value) in arms.into_iter().rev() {
            code = format!("if {} then {} else {}", condition, value.code, code);
        }
        Ok(Fragment::new(format!("({})", code), ty))
    }

    fn gen_relation(
        &mut self,
        expr: &Expr,
        op: RelOp,
        left: &Expr,
        right: &Expr,
    ) -> CompileResult<Fragment> {
        let symbol = match op {
            RelOp::Eq | RelOp::Equiv => "==",
            RelOp::Neq => "!=",
            RelOp::Lt => "<",
            RelOp::Gt => ">",
            RelOp::Le => "<=",
            RelOp::Ge => ">=",
            RelOp::In
            | RelOp::Approx
            | RelOp::Sim
            | RelOp::Subset
            | RelOp::SubsetEq
            | RelOp::Supset
            | RelOp::SupsetEq => return self.unhandled("relation", expr),
        };

        let l = self.gen(left)?;
        let r = self.gen(right)?;
        if l.ty != ValueType::Scalar || r.ty != ValueType::Scalar {
            return self.unhandled("comparison of non-scalars", expr);
        }
        Ok(Fragment::boolean(format!("({} {} {})", l.code, symbol, r.code)))
    }
}

/// How a builtin command lowers to a Futhark function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lowering {
    Direct(&'static str),
    /// `1 / f x`
    Reciprocal(&'static str),
}

impl Lowering {
    fn of(builtin: &str) -> Option<Self> {
        let lowering = match builtin {
            "sin" => Lowering::Direct("f64.sin"),
            "cos" => Lowering::Direct("f64.cos"),
            "tan" => Lowering::Direct("f64.tan"),
            "arcsin" => Lowering::Direct("f64.asin"),
            "arccos" => Lowering::Direct("f64.acos"),
            "arctan" => Lowering::Direct("f64.atan"),
            "sinh" => Lowering::Direct("f64.sinh"),
            "cosh" => Lowering::Direct("f64.cosh"),
            "tanh" => Lowering::Direct("f64.tanh"),
            "exp" => Lowering::Direct("f64.exp"),
            "ln" | "log" => Lowering::Direct("f64.log"),
            "sqrt" => Lowering::Direct("f64.sqrt"),
            "abs" => Lowering::Direct("f64.abs"),
            "floor" => Lowering::Direct("f64.floor"),
            "ceil" => Lowering::Direct("f64.ceil"),
            "sgn" => Lowering::Direct("f64.sgn"),
            "cot" => Lowering::Reciprocal("f64.tan"),
            "sec" => Lowering::Reciprocal("f64.cos"),
            "csc" => Lowering::Reciprocal("f64.sin"),
            _ => return None,
        };
        Some(lowering)
    }
}

fn domain_construct(domain: &IntegralDomain) -> &'static str {
    match domain {
        IntegralDomain::Indefinite => "indefinite integral",
        IntegralDomain::Region(_) => "integral over a region",
        IntegralDomain::Bounds { .. } => "integral",
    }
}

/// Whether any of `exprs` refers to one of `names`
fn mentions_any(exprs: &[&Expr], names: &[&str]) -> bool {
    exprs
        .iter()
        .flat_map(|expr| free_variables(expr))
        .any(|free| names.contains(&free.as_str()))
}

/// Bounds are lowered outside the integral's scope, so they must not use its variables
fn bounds_mention(domain: &IntegralDomain, names: &[&str]) -> bool {
    match domain {
        IntegralDomain::Bounds { lower, upper } => {
            mentions_any(&[lower.as_ref(), upper.as_ref()], names)
        }
        IntegralDomain::Indefinite | IntegralDomain::Region(_) => false,
    }
}

/// Inert zero carrying the unhandled marker in a line comment
pub fn placeholder(construct: &str, latex: &str) -> String {
    format!("(0.0f64 -- {} {}: {}\n)", UNHANDLED_MARKER, construct, latex)
}

/// Futhark `f64` literal; negative values are parenthesized
pub fn float_literal(v: f64) -> String {
    if v.is_nan() {
        return "f64.nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "f64.inf" } else { "(-f64.inf)" }.to_string();
    }

    let mut text = format!("{:?}", v.abs());
    if !text.contains('.') {
        text = match text.split_once('e') {
            Some((mantissa, exponent)) => format!("{}.0e{}", mantissa, exponent),
            None => format!("{}.0", text),
        };
    }
    if v < 0.0 {
        format!("(-{}f64)", text)
    } else {
        format!("{}f64", text)
    }
}

/// Simpson weight of grid point `i` out of `n` intervals: 1, 4, 2, ..., 4, 1
fn simpson_weight(i: &str, n: usize) -> String {
    format!(
        "(if {i} == 0 || {i} == {n} then 1.0f64 else if {i} % 2 == 1 then 4.0f64 else 2.0f64)",
        i = i,
        n = n
    )
}

fn flatten(code: &str, rank: usize) -> String {
    let mut flat = code.to_string();
    for _ in 1..rank {
        flat = format!("(flatten {})", flat);
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use pretty_assertions::assert_eq;

    fn generate_with(source: &str, options: CompileOptions) -> GeneratedCode {
        let program = parse(source).unwrap();
        CodeGenerator::new(options).generate(&program).unwrap()
    }

    fn generate(source: &str) -> GeneratedCode {
        generate_with(source, CompileOptions::default())
    }

    fn body(source: &str) -> String {
        generate(source).body
    }

    #[test]
    fn test_polynomial() {
        let code = generate("x^2 + 1");
        assert_eq!(code.body, "((x ** 2.0f64) + 1.0f64)");
        assert_eq!(code.ty, Some(ValueType::Scalar));
        assert!(code.diagnostics.is_empty());
        assert!(code.routines.is_empty());
    }

    #[test]
    fn test_constants_and_identifiers() {
        assert_eq!(body("e^{x} + \\pi"), "((f64.e ** x) + f64.pi)");
        assert_eq!(body("\\alpha + in"), "(alpha + in_)");
        assert_eq!(body("x_1 \\cdot \\hat{v}"), "(x_1 * v_hat)");
        assert_eq!(body("x - 3"), "(x - 3.0f64)");
    }

    #[test]
    fn test_float_literals() {
        assert_eq!(float_literal(2.0), "2.0f64");
        assert_eq!(float_literal(0.5), "0.5f64");
        assert_eq!(float_literal(-3.0), "(-3.0f64)");
        assert_eq!(float_literal(1e-4), "0.0001f64");
        assert_eq!(float_literal(1e-10), "1.0e-10f64");
        assert_eq!(float_literal(f64::INFINITY), "f64.inf");
    }

    #[test]
    fn test_sum_runs_over_integer_range() {
        let code = body("\\sum_{n=1}^{10} \\frac{1}{n^2}");
        assert!(code.contains("i64.f64 (f64.floor 1.0f64)"));
        assert!(code.contains("i64.f64 (f64.floor 10.0f64)"));
        assert!(code.contains("reduce (+) 0.0f64"));
        assert!(code.contains("\\(n: i64) -> (1.0f64 / ((f64.i64 n) ** 2.0f64))"));

        // Same reduction in Rust: inclusive integer range
        let total: f64 = (1..=10).map(|n| 1.0 / (n as f64).powi(2)).sum();
        assert!((total - 1.549768).abs() < 1e-6);
    }

    #[test]
    fn test_product() {
        let code = body("\\prod_{k=1}^{4} k");
        assert!(code.contains("reduce (*) 1.0f64"));
        assert!(code.contains("\\(k: i64) -> (f64.i64 k)"));
    }

    #[test]
    fn test_derivative_central_difference() {
        assert_eq!(
            body("\\frac{d}{dx} x^3"),
            "(let f'0 (x: f64): f64 = (x ** 3.0f64) \
             let f'1 (x: f64): f64 = ((f'0 (x + 0.0001f64)) - (f'0 (x - 0.0001f64))) / (2.0f64 * 0.0001f64) \
             in (f'1 x))"
        );

        let h = crate::config::DEFAULT_DERIVATIVE_STEP;
        let f = |x: f64| x.powi(3);
        let slope = (f(2.0 + h) - f(2.0 - h)) / (2.0 * h);
        assert!((slope - 12.0).abs() < 1e-3);
    }

    #[test]
    fn test_mixed_partial_applies_each_order() {
        let code = body("\\frac{\\partial^3}{\\partial x \\partial y^2} (x y^2)");
        // One base function plus three difference layers
        assert!(code.contains("let f'3 (x: f64) (y: f64): f64"));
        assert!(!code.contains("f'4"));
        assert!(code.contains("(f'0 (x + 0.0001f64) y)"));
        assert!(code.contains("(f'1 x (y + 0.0001f64))"));
        assert!(code.ends_with("in (f'3 x y))"));
    }

    #[test]
    fn test_derivative_inside_sum_casts_index() {
        let code = body("\\sum_{n=1}^{3} \\frac{d}{dx} (n x)");
        assert!(code.contains("let f'0 (n: f64) (x: f64): f64 = (n * x)"));
        assert!(code.contains("in (f'1 (f64.i64 n) x))"));
    }

    #[test]
    fn test_gradient_and_laplacian() {
        let gradient = generate("\\nabla_{x, y} (x y)");
        assert_eq!(gradient.ty, Some(ValueType::Array { rank: 1 }));
        assert!(gradient.body.starts_with("(let f'0 (x: f64) (y: f64): f64 = (x * y)"));
        assert!(gradient.body.ends_with("in [(f'1 x y), (f'2 x y)])"));

        // The operator is applied once per unit of the power
        let laplacian = body("\\nabla^{2}_{x} x^2");
        assert!(laplacian.contains("- 2.0f64 * (f'0 x) +"));
        assert!(laplacian.contains("- 2.0f64 * (f'1 x) +"));
        assert!(laplacian.contains("/ (0.001f64 * 0.001f64)"));
        assert!(laplacian.ends_with("in (f'2 x))"));

        let cubed = generate("\\nabla^{3}_{x, y} (x y)");
        assert!(cubed.diagnostics.is_empty());
        assert_eq!(cubed.body.matches("let f'").count(), 4);
        assert!(cubed.body.contains("((f'2 (x + 0.001f64) y) - 2.0f64 * (f'2 x y)"));
        assert!(cubed.body.ends_with("in (f'3 x y))"));

        let once = body("\\nabla^{1}_{x} x^2");
        assert!(once.ends_with("in (f'1 x))"));

        let symbolic = generate("\\nabla^{k}_{x} x");
        assert!(symbolic.body.contains("L2F-UNHANDLED symbolic Laplacian power"));

        let huge = generate("\\nabla^{100}_{x} x");
        assert!(huge.body.contains("L2F-UNHANDLED Laplacian power too large"));
    }

    #[test]
    fn test_variable_in_its_own_bounds() {
        for source in [
            "\\int_{0}^{x} x \\, dx",
            "\\sum_{n=1}^{n} n",
            "\\prod_{k=k}^{3} k",
            "\\iint_{0}^{y} x y \\, dx \\, dy",
        ] {
            let code = generate(source);
            assert!(code.body.contains("L2F-UNHANDLED"), "{}", source);
            assert!(code.body.contains("in its own bounds"), "{}", source);
            assert_eq!(code.diagnostics.len(), 1);

            let program = parse(source).unwrap();
            let strict = CodeGenerator::new(CompileOptions::default().strict()).generate(&program);
            assert!(matches!(strict, Err(CompileError::UnhandledConstruct { .. })));
        }

        // Other free symbols in the bounds stay parameters
        let code = generate("\\int_{0}^{t} x \\, dx");
        assert!(code.diagnostics.is_empty());
        assert!(code.body.contains("let b'1 = t"));
    }

    #[test]
    fn test_simpson_integral() {
        let code = body("\\int_{0}^{1} x^2 \\, dx");
        assert!(code.contains("/ 100000.0f64"));
        assert!(code.contains("(iota 100001)"));
        assert!(code.contains("let x = a'0 + f64.i64 i'3 * h'2"));
        assert!(code.contains("(if i'3 == 0 || i'3 == 100000 then 1.0f64"));

        // Composite Simpson with the same interval count
        let n = CompileOptions::default().simpson_intervals();
        let h = 1.0 / n as f64;
        let sum: f64 = (0..=n)
            .map(|i| {
                let w = if i == 0 || i == n { 1.0 } else if i % 2 == 1 { 4.0 } else { 2.0 };
                let x = i as f64 * h;
                w * x * x
            })
            .sum();
        assert!((h / 3.0 * sum - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_tensor_simpson() {
        let code = body("\\iint_{0}^{1} x y \\, dx \\, dy");
        assert_eq!(code.matches("loop acc'").count(), 2);
        assert!(code.contains("for i'"));
        assert!(code.contains("< 301 do"));
        assert!(code.contains("** 2.0f64 *"));

        let n = CompileOptions::default().multi_simpson_intervals();
        let h = 1.0 / n as f64;
        let weight = |i: usize| if i == 0 || i == n { 1.0 } else if i % 2 == 1 { 4.0 } else { 2.0 };
        let mut acc = 0.0;
        for i in 0..=n {
            for j in 0..=n {
                acc += weight(i) * weight(j) * (i as f64 * h) * (j as f64 * h);
            }
        }
        assert!(((h / 3.0).powi(2) * acc - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_unhandled_placeholders() {
        let code = generate("\\int x \\, dx");
        assert_eq!(code.body, "(0.0f64 -- L2F-UNHANDLED indefinite integral: \\int x \\, dx\n)");
        assert_eq!(code.diagnostics.len(), 1);
        assert!(code.diagnostics[0].is_unhandled());

        // A gap degrades only its own subtree
        let code = generate("x + \\{1, 2\\}");
        assert!(code.body.starts_with("(x + (0.0f64 -- L2F-UNHANDLED set literal"));
    }

    #[test]
    fn test_strict_mode_fails_on_unhandled() {
        let program = parse("\\langle a, b, c \\rangle").unwrap();
        let err = CodeGenerator::new(CompileOptions::default().strict())
            .generate(&program)
            .unwrap_err();
        assert!(matches!(err, CompileError::UnhandledConstruct { .. }));
    }

    #[test]
    fn test_functions() {
        assert_eq!(body("\\sin^{-1}(x)"), "(f64.asin x)");
        assert_eq!(body("\\sin^2(x)"), "((f64.sin x) ** 2.0f64)");
        assert_eq!(body("\\log_{2}(x)"), "(f64.log x / f64.log 2.0f64)");
        assert_eq!(body("\\cot(x)"), "(1.0f64 / f64.tan x)");
        assert_eq!(body("\\max(x, y, z)"), "(f64.max x (f64.max y z))");
        assert_eq!(body("\\sqrt[3]{x}"), "(x ** (1.0f64 / 3.0f64))");
        assert!(body("f(x)").contains("L2F-UNHANDLED undefined function"));
    }

    #[test]
    fn test_determinant() {
        let code = generate("\\det\\begin{pmatrix} a & b \\\\ c & d \\end{pmatrix}");
        assert_eq!(code.body, "(det [[a, b], [c, d]])");
        assert_eq!(code.ty, Some(ValueType::Scalar));
        assert!(code.routines.contains(&Routine::Determinant));
    }

    #[test]
    fn test_scalar_array_broadcast() {
        let code = generate("x + \\begin{pmatrix} 1 \\\\ 2 \\end{pmatrix}");
        assert_eq!(
            code.body,
            "(map (\\v'0 -> (map (\\v'1 -> (x + v'1)) v'0)) [[1.0f64], [2.0f64]])"
        );
        assert_eq!(code.ty, Some(ValueType::Array { rank: 2 }));
    }

    #[test]
    fn test_array_pairs_and_transpose() {
        assert_eq!(
            body("\\begin{pmatrix} 1 \\end{pmatrix} + \\begin{pmatrix} 2 \\end{pmatrix}"),
            "(map2 (\\a'0 b'1 -> (map2 (\\a'2 b'3 -> (a'2 + b'3)) a'0 b'1)) [[1.0f64]] [[2.0f64]])"
        );
        assert_eq!(
            body("\\begin{pmatrix} 1 & 2 \\end{pmatrix}^T"),
            "(transpose [[1.0f64, 2.0f64]])"
        );
        assert!(body("\\begin{pmatrix} 1 \\end{pmatrix} \\times \\begin{pmatrix} 2 \\end{pmatrix}")
            .contains("L2F-UNHANDLED cross product"));
    }

    #[test]
    fn test_elementwise_function_on_matrix() {
        let code = generate("\\sin(\\begin{pmatrix} 1 & 2 \\end{pmatrix})");
        assert_eq!(
            code.body,
            "(map (\\v'0 -> (map (\\v'1 -> (f64.sin v'1)) v'0)) [[1.0f64, 2.0f64]])"
        );
        assert_eq!(code.ty, Some(ValueType::Array { rank: 2 }));
    }

    #[test]
    fn test_norms_and_inner_product() {
        let euclidean = body("\\|\\begin{pmatrix} 3 & 4 \\end{pmatrix}\\|");
        assert!(euclidean.starts_with("(f64.sqrt (reduce (+) 0.0f64"));
        assert!(euclidean.contains("(flatten [[3.0f64, 4.0f64]])"));

        let taxicab = body("\\|\\begin{pmatrix} 3 & 4 \\end{pmatrix}\\|_1");
        assert_eq!(taxicab, "(reduce (+) 0.0f64 (map f64.abs (flatten [[3.0f64, 4.0f64]])))");

        assert_eq!(body("\\langle a, b \\rangle"), "(a * b)");
    }

    #[test]
    fn test_piecewise() {
        assert_eq!(
            body("\\begin{cases} x & x > 0 \\\\ 0 & \\text{otherwise} \\end{cases}"),
            "(if (x > 0.0f64) then x else 0.0f64)"
        );
        assert_eq!(
            body("\\begin{cases} 1 & x < 0 \\end{cases}"),
            "(if (x < 0.0f64) then 1.0f64 else f64.nan)"
        );

        let matrix = generate("\\begin{cases} \\begin{pmatrix} 1 \\end{pmatrix} & x > 0 \\end{cases}");
        assert!(!matrix.body.contains("f64.nan"));
        assert!(matrix.body.contains("L2F-UNHANDLED non-scalar cases without an otherwise row"));
        assert_eq!(matrix.ty, Some(ValueType::Scalar));
        assert_eq!(matrix.diagnostics.len(), 1);

        let flags = generate("\\begin{cases} x > 1 & x > 0 \\end{cases}");
        assert!(flags.body.contains("L2F-UNHANDLED"));

        let with_otherwise = generate(
            "\\begin{cases} \\begin{pmatrix} 1 \\end{pmatrix} & x > 0 \\\\ \\begin{pmatrix} 2 \\end{pmatrix} & \\text{otherwise} \\end{cases}",
        );
        assert_eq!(with_otherwise.body, "(if (x > 0.0f64) then [[1.0f64]] else [[2.0f64]])");
        assert_eq!(with_otherwise.ty, Some(ValueType::Array { rank: 2 }));
    }

    #[test]
    fn test_logic() {
        assert_eq!(
            body("(x > 0) \\land (y < 1)"),
            "((x > 0.0f64) && (y < 1.0f64))"
        );
        assert_eq!(
            body("(x > 0) \\implies (y \\neq 0)"),
            "(!(x > 0.0f64) || (y != 0.0f64))"
        );
        assert_eq!(body("\\lnot (x = y)"), "(!(x == y))");
        assert_eq!(generate("x \\ge y").ty, Some(ValueType::Bool));
    }

    #[test]
    fn test_multiple_statements_form_a_tuple() {
        let code = generate("x\ny^2");
        assert_eq!(code.body, "(x, (y ** 2.0f64))");
        assert_eq!(code.ty, None);
    }

    #[test]
    fn test_custom_steps() {
        let options = CompileOptions {
            derivative_step: 0.5,
            quadrature_steps: 9,
            ..CompileOptions::default()
        };
        let code = generate_with("\\frac{d}{dx} x + \\int_{0}^{1} t \\, dt", options);
        assert!(code.body.contains("(x + 0.5f64)"));
        assert!(code.body.contains("/ 10.0f64"));
        assert!(code.body.contains("(iota 11)"));
    }
}
