//! Abstract Syntax Tree definitions for LaTeX formulas
//!
//! Every node owns its children outright. `Display` produces the canonical
//! LaTeX form of a node; reparsing that text yields an equal tree for the
//! arithmetic, fraction, call and matrix variants.

use std::fmt;

use serde::Serialize;

use crate::error::{CompileError, CompileResult};

/// A complete program consisting of newline-separated statements
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Expr>,
}

/// Expression types
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal: `2`, `0.5`
    Number(f64),

    /// `\infty`
    Infinity,

    /// Bare or command symbol: `x`, `\alpha`
    Symbol(String),

    /// Subscripted symbol: `x_1`, `a_{i, j}`
    Subscript { base: String, index: Vec<Expr> },

    /// Binary arithmetic: `a + b`, `a \cdot b`, `a^b`
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `\frac{a}{b}`
    Fraction {
        numerator: Box<Expr>,
        denominator: Box<Expr>,
    },

    /// `\sqrt{x}` or `\sqrt[n]{x}`
    Sqrt {
        radicand: Box<Expr>,
        index: Option<Box<Expr>>,
    },

    /// Function call: `f(x)`, `\sin^2(x)`, `\log_{b}(x)`
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        power: Option<Box<Expr>>,
        base: Option<Box<Expr>>,
    },

    /// `\sum_{var=lower}^{upper} body`
    Sum {
        body: Box<Expr>,
        var: String,
        lower: Box<Expr>,
        upper: Box<Expr>,
    },

    /// `\prod_{var=lower}^{upper} body`
    Product {
        body: Box<Expr>,
        var: String,
        lower: Box<Expr>,
        upper: Box<Expr>,
    },

    /// `\int_{a}^{b} integrand \, dx`
    Integral {
        integrand: Box<Expr>,
        var: String,
        domain: IntegralDomain,
    },

    /// `\iint`, `\iiint`, `\oint`, ... with one differential per axis
    MultiIntegral {
        kind: IntegralKind,
        integrand: Box<Expr>,
        vars: Vec<String>,
        domain: IntegralDomain,
    },

    /// Ordinary or partial derivative with an ordered (variable, order) list
    Derivative {
        body: Box<Expr>,
        vars: Vec<VarOrder>,
        kind: DerivativeKind,
    },

    /// `\nabla_{x, y} body`
    Gradient { body: Box<Expr>, vars: Vec<String> },

    /// `\nabla^{2}_{x, y} body`
    Laplacian {
        body: Box<Expr>,
        vars: Vec<String>,
        power: Box<Expr>,
    },

    /// Rectangular matrix literal, see [`Expr::matrix`]
    Matrix { rows: Vec<Vec<Expr>>, kind: MatrixKind },

    /// `|x|`
    Abs(Box<Expr>),

    /// `\|x\|_p`
    Norm {
        body: Box<Expr>,
        order: Option<Box<Expr>>,
    },

    /// `\langle a, b \rangle`
    InnerProduct(Vec<Expr>),

    /// `\emptyset`
    EmptySet,

    /// `\{a, b\}`
    Set(Vec<Expr>),

    /// `\{x \in S : p\}`
    SetBuilder {
        bindings: Vec<Binding>,
        predicate: Box<Expr>,
    },

    /// `\begin{cases} ... \end{cases}`
    Piecewise(Vec<Branch>),

    /// `a = b`, `a < b`, `x \in S`, ...
    Relation {
        op: RelOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `A \cup B`, `A \cap B`
    SetOp {
        op: SetOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `p \land q`, `p \implies q`, ...
    LogicOp {
        op: LogicOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `\lnot p`
    Not(Box<Expr>),

    /// `\forall x \in S : body`
    Quantifier {
        kind: QuantifierKind,
        bindings: Vec<Binding>,
        body: Box<Expr>,
    },

    /// `\hat{x}`, `\vec{v}`, ...
    Accent { kind: AccentKind, base: Box<Expr> },

    /// `a \operatorname{mod} b`
    Mod { left: Box<Expr>, right: Box<Expr> },

    /// `\operatorname{argmax}_{x} f(x)`
    ArgExtremum {
        kind: ExtremumKind,
        body: Box<Expr>,
        sub: Option<Box<Expr>>,
        sup: Option<Box<Expr>>,
    },
}

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    /// `\times`
    Cross,
    /// `\odot`
    Hadamard,
}

impl BinOp {
    pub fn latex(&self) -> &'static str {
        match self {
            BinOp::Add => " + ",
            BinOp::Sub => " - ",
            BinOp::Mul => " \\cdot ",
            BinOp::Div => "/",
            BinOp::Pow => "^",
            BinOp::Cross => " \\times ",
            BinOp::Hadamard => " \\odot ",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div | BinOp::Cross | BinOp::Hadamard => 2,
            BinOp::Pow => 4,
        }
    }
}

/// Relational operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    Equiv,
    Approx,
    Sim,
    Subset,
    SubsetEq,
    Supset,
    SupsetEq,
}

impl RelOp {
    pub fn latex(&self) -> &'static str {
        match self {
            RelOp::Eq => "=",
            RelOp::Neq => "\\neq",
            RelOp::Lt => "<",
            RelOp::Gt => ">",
            RelOp::Le => "\\le",
            RelOp::Ge => "\\ge",
            RelOp::In => "\\in",
            RelOp::Equiv => "\\equiv",
            RelOp::Approx => "\\approx",
            RelOp::Sim => "\\sim",
            RelOp::Subset => "\\subset",
            RelOp::SubsetEq => "\\subseteq",
            RelOp::Supset => "\\supset",
            RelOp::SupsetEq => "\\supseteq",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    Intersection,
}

impl SetOpKind {
    pub fn latex(&self) -> &'static str {
        match self {
            SetOpKind::Union => "\\cup",
            SetOpKind::Intersection => "\\cap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOpKind {
    And,
    Or,
    Implies,
    Iff,
}

impl LogicOpKind {
    pub fn latex(&self) -> &'static str {
        match self {
            LogicOpKind::And => "\\land",
            LogicOpKind::Or => "\\lor",
            LogicOpKind::Implies => "\\implies",
            LogicOpKind::Iff => "\\iff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    ForAll,
    Exists,
}

impl QuantifierKind {
    pub fn latex(&self) -> &'static str {
        match self {
            QuantifierKind::ForAll => "\\forall",
            QuantifierKind::Exists => "\\exists",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccentKind {
    Hat,
    Bar,
    Vec,
    Tilde,
}

impl AccentKind {
    pub fn latex(&self) -> &'static str {
        match self {
            AccentKind::Hat => "\\hat",
            AccentKind::Bar => "\\bar",
            AccentKind::Vec => "\\vec",
            AccentKind::Tilde => "\\tilde",
        }
    }

    /// Suffix used when an accented symbol becomes an identifier
    pub fn suffix(&self) -> &'static str {
        match self {
            AccentKind::Hat => "hat",
            AccentKind::Bar => "bar",
            AccentKind::Vec => "vec",
            AccentKind::Tilde => "tilde",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumKind {
    ArgMax,
    ArgMin,
}

impl ExtremumKind {
    pub fn latex(&self) -> &'static str {
        match self {
            ExtremumKind::ArgMax => "\\operatorname{argmax}",
            ExtremumKind::ArgMin => "\\operatorname{argmin}",
        }
    }
}

/// Matrix environment flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatrixKind {
    /// `matrix`
    Plain,
    /// `pmatrix`
    Paren,
    /// `bmatrix`
    Bracket,
}

impl MatrixKind {
    pub fn from_environment(name: &str) -> Option<Self> {
        match name {
            "matrix" => Some(MatrixKind::Plain),
            "pmatrix" => Some(MatrixKind::Paren),
            "bmatrix" => Some(MatrixKind::Bracket),
            _ => None,
        }
    }

    pub fn environment(&self) -> &'static str {
        match self {
            MatrixKind::Plain => "matrix",
            MatrixKind::Paren => "pmatrix",
            MatrixKind::Bracket => "bmatrix",
        }
    }
}

/// Multi-dimensional and contour integral heads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegralKind {
    Double,
    Triple,
    Contour,
    SurfaceContour,
    VolumeContour,
}

impl IntegralKind {
    pub fn latex(&self) -> &'static str {
        match self {
            IntegralKind::Double => "\\iint",
            IntegralKind::Triple => "\\iiint",
            IntegralKind::Contour => "\\oint",
            IntegralKind::SurfaceContour => "\\oiint",
            IntegralKind::VolumeContour => "\\oiiint",
        }
    }

    /// Number of differentials the head expects
    pub fn dimensions(&self) -> usize {
        match self {
            IntegralKind::Contour => 1,
            IntegralKind::Double | IntegralKind::SurfaceContour => 2,
            IntegralKind::Triple | IntegralKind::VolumeContour => 3,
        }
    }
}

/// Limits attached to an integral sign
#[derive(Debug, Clone, PartialEq)]
pub enum IntegralDomain {
    Indefinite,
    /// `\iint_{D}`
    Region(Box<Expr>),
    /// `\int_{lower}^{upper}`
    Bounds { lower: Box<Expr>, upper: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeKind {
    Partial,
    Total,
}

/// One entry of a derivative's variable list
#[derive(Debug, Clone, PartialEq)]
pub struct VarOrder {
    pub var: String,
    pub order: Expr,
}

impl VarOrder {
    pub fn new(var: impl Into<String>, order: Expr) -> Self {
        Self {
            var: var.into(),
            order,
        }
    }

    pub fn first(var: impl Into<String>) -> Self {
        Self::new(var, Expr::Number(1.0))
    }
}

/// `x \in S` inside a quantifier or set-builder
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub var: String,
    pub domain: Option<Expr>,
}

/// A row of a cases environment; no condition means "otherwise"
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub value: Expr,
    pub condition: Option<Expr>,
}

/// Names that denote constants rather than parameters
pub const RESERVED_NAMES: &[&str] = &["e", "E", "pi", "π", "infty"];

const GREEK_LETTERS: &[&str] = &[
    "alpha", "beta", "gamma", "delta", "epsilon", "varepsilon", "zeta", "eta", "theta",
    "vartheta", "iota", "kappa", "lambda", "mu", "nu", "xi", "pi", "varpi", "rho", "varrho",
    "sigma", "varsigma", "tau", "upsilon", "phi", "varphi", "chi", "psi", "omega", "Gamma",
    "Delta", "Theta", "Lambda", "Xi", "Pi", "Sigma", "Upsilon", "Phi", "Psi", "Omega",
];

/// Futhark keywords and primitive type names that cannot be bound
const FUTHARK_KEYWORDS: &[&str] = &[
    "case", "def", "do", "else", "entry", "for", "if", "import", "in", "include", "let", "local",
    "loop", "match", "module", "open", "then", "type", "val", "while", "with", "assert", "true",
    "false", "f64", "i64", "f32", "i32", "bool",
];

const GREEK_UNICODE: &[(char, &str)] = &[
    ('α', "alpha"),
    ('β', "beta"),
    ('γ', "gamma"),
    ('δ', "delta"),
    ('ε', "epsilon"),
    ('ζ', "zeta"),
    ('η', "eta"),
    ('θ', "theta"),
    ('ι', "iota"),
    ('κ', "kappa"),
    ('λ', "lambda"),
    ('μ', "mu"),
    ('ν', "nu"),
    ('ξ', "xi"),
    ('ρ', "rho"),
    ('σ', "sigma"),
    ('τ', "tau"),
    ('υ', "upsilon"),
    ('φ', "phi"),
    ('χ', "chi"),
    ('ψ', "psi"),
    ('ω', "omega"),
    ('Γ', "Gamma"),
    ('Δ', "Delta"),
    ('Θ', "Theta"),
    ('Λ', "Lambda"),
    ('Σ', "Sigma"),
    ('Φ', "Phi"),
    ('Ψ', "Psi"),
    ('Ω', "Omega"),
];

/// Whether `name` spells out a Greek letter, as in `theta`
pub fn is_greek_name(name: &str) -> bool {
    GREEK_UNICODE.iter().any(|(_, spelled)| *spelled == name)
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Turn a variable name into a Futhark identifier.
///
/// Greek letters written as unicode are spelled out and names that clash
/// with Futhark keywords get a trailing `_`. Returns `None` when the name
/// cannot be expressed as an identifier at all.
pub fn sanitize_identifier(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match GREEK_UNICODE.iter().find(|(g, _)| *g == c) {
            Some((_, spelled)) => out.push_str(spelled),
            None if c.is_ascii_alphanumeric() || c == '_' || c == '\'' => out.push(c),
            None => return None,
        }
    }
    if !out.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    if FUTHARK_KEYWORDS.contains(&out.as_str()) {
        out.push('_');
    }
    Some(out)
}

impl Expr {
    pub fn symbol(name: impl Into<String>) -> Self {
        Expr::Symbol(name.into())
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Unary minus: literals fold, anything else becomes `0 - e`
    pub fn negate(operand: Expr) -> Self {
        match operand {
            Expr::Number(v) => Expr::Number(-v),
            other => Expr::binary(BinOp::Sub, Expr::Number(0.0), other),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FunctionCall {
            name: name.into(),
            args,
            power: None,
            base: None,
        }
    }

    /// Build a matrix literal, rejecting ragged rows
    pub fn matrix(rows: Vec<Vec<Expr>>, kind: MatrixKind) -> CompileResult<Self> {
        if let Some(first) = rows.first() {
            let expected = first.len();
            for (i, row) in rows.iter().enumerate() {
                if row.len() != expected {
                    return Err(CompileError::matrix_shape(i, expected, row.len()));
                }
            }
        }
        Ok(Expr::Matrix { rows, kind })
    }

    /// `0 - e` where `e` is not a literal, i.e. the reduced form of `-e`
    pub fn as_negation(&self) -> Option<&Expr> {
        match self {
            Expr::BinaryOp {
                op: BinOp::Sub,
                left,
                right,
            } if **left == Expr::Number(0.0) && !matches!(**right, Expr::Number(_)) => {
                Some(right)
            }
            _ => None,
        }
    }

    /// Non-negative integer value of a literal, used for orders and powers
    pub fn as_count(&self) -> Option<usize> {
        match self {
            Expr::Number(v) if *v >= 0.0 && v.fract() == 0.0 && *v < 1e6 => Some(*v as usize),
            _ => None,
        }
    }

    /// Identifier this expression denotes when it is used as a variable:
    /// plain symbols, simple subscripts (`x_1` -> `x_1`) and accented
    /// symbols (`\hat{x}` -> `x_hat`).
    pub fn variable_name(&self) -> Option<String> {
        match self {
            Expr::Symbol(name) if !is_reserved(name) => Some(name.clone()),
            Expr::Subscript { base, index } => {
                let mut name = base.clone();
                for part in index {
                    match part {
                        Expr::Symbol(s) => name.push_str(&format!("_{}", s)),
                        Expr::Number(_) => match part.as_count() {
                            Some(n) => name.push_str(&format!("_{}", n)),
                            None => return None,
                        },
                        _ => return None,
                    }
                }
                Some(name)
            }
            Expr::Accent { kind, base } => match base.as_ref() {
                Expr::Symbol(name) => Some(format!("{}_{}", name, kind.suffix())),
                _ => None,
            },
            _ => None,
        }
    }

    /// Binding strength used when printing operands
    fn precedence(&self) -> u8 {
        match self {
            Expr::Relation { .. } | Expr::SetOp { .. } | Expr::LogicOp { .. } => 0,
            // Greedy bodies extend to the right and must always be wrapped
            Expr::Sum { .. }
            | Expr::Product { .. }
            | Expr::Integral { .. }
            | Expr::MultiIntegral { .. }
            | Expr::Quantifier { .. } => 0,
            Expr::BinaryOp { op, .. } => {
                if self.as_negation().is_some() {
                    3
                } else {
                    op.precedence()
                }
            }
            Expr::Mod { .. } => 2,
            Expr::Number(v) if *v < 0.0 => 3,
            Expr::Not(_)
            | Expr::Derivative { .. }
            | Expr::Gradient { .. }
            | Expr::Laplacian { .. }
            | Expr::ArgExtremum { .. } => 3,
            _ => 5,
        }
    }

    /// Exponents and scripts that need no braces
    fn is_simple_script(&self) -> bool {
        match self {
            Expr::Number(v) => *v >= 0.0 && self.to_string().len() == 1,
            Expr::Symbol(name) => name.chars().count() == 1,
            _ => false,
        }
    }
}

fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn format_symbol(name: &str) -> String {
    if GREEK_LETTERS.contains(&name) {
        format!("\\{}", name)
    } else {
        name.to_string()
    }
}

/// `^2`, `_x`, or `^{...}` for anything longer
fn script(marker: char, expr: &Expr) -> String {
    if expr.is_simple_script() {
        format!("{}{}", marker, expr)
    } else {
        format!("{}{{{}}}", marker, expr)
    }
}

/// Print `expr` as an operand that must bind at least as tightly as `min`
fn operand(expr: &Expr, min: u8) -> String {
    if expr.precedence() >= min {
        expr.to_string()
    } else if expr.precedence() == 0 && !matches!(expr, Expr::Relation { .. } | Expr::SetOp { .. } | Expr::LogicOp { .. }) {
        format!("\\left( {} \\right)", expr)
    } else {
        format!("({})", expr)
    }
}

fn join(items: &[Expr], sep: &str) -> String {
    items
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

fn format_bindings(bindings: &[Binding]) -> String {
    bindings
        .iter()
        .map(|b| match &b.domain {
            Some(domain) => format!("{} \\in {}", format_symbol(&b.var), domain),
            None => format_symbol(&b.var),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_domain(domain: &IntegralDomain) -> String {
    match domain {
        IntegralDomain::Indefinite => String::new(),
        IntegralDomain::Region(region) => format!("_{{{}}}", region),
        IntegralDomain::Bounds { lower, upper } => format!("_{{{}}}^{{{}}}", lower, upper),
    }
}

fn format_binary(f: &mut fmt::Formatter<'_>, op: &str, prec: u8, left: &Expr, right: &Expr) -> fmt::Result {
    // Left-associative: the right operand must bind strictly tighter
    write!(f, "{}{}{}", operand(left, prec), op, operand(right, prec + 1))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(v) => write!(f, "{}", format_number(*v)),
            Expr::Infinity => write!(f, "\\infty"),
            Expr::Symbol(name) => write!(f, "{}", format_symbol(name)),
            Expr::Subscript { base, index } => {
                write!(f, "{}", format_symbol(base))?;
                match index.as_slice() {
                    [single] => write!(f, "{}", script('_', single)),
                    parts => write!(f, "_{{{}}}", join(parts, ", ")),
                }
            }
            Expr::BinaryOp { op, left, right } => {
                if let Some(inner) = self.as_negation() {
                    return write!(f, "-{}", operand(inner, 4));
                }
                match op {
                    BinOp::Pow => write!(f, "{}{}", operand(left, 5), script('^', right)),
                    _ => format_binary(f, op.latex(), op.precedence(), left, right),
                }
            }
            Expr::Fraction {
                numerator,
                denominator,
            } => write!(f, "\\frac{{{}}}{{{}}}", numerator, denominator),
            Expr::Sqrt { radicand, index } => match index {
                Some(index) => write!(f, "\\sqrt[{}]{{{}}}", index, radicand),
                None => write!(f, "\\sqrt{{{}}}", radicand),
            },
            Expr::FunctionCall {
                name,
                args,
                power,
                base,
            } => {
                write!(f, "{}", name)?;
                if let Some(base) = base {
                    write!(f, "_{{{}}}", base)?;
                }
                if let Some(power) = power {
                    write!(f, "{}", script('^', power))?;
                }
                write!(f, "({})", join(args, ", "))
            }
            Expr::Sum {
                body,
                var,
                lower,
                upper,
            } => write!(
                f,
                "\\sum_{{{}={}}}^{{{}}} {}",
                format_symbol(var),
                lower,
                upper,
                operand(body, 2)
            ),
            Expr::Product {
                body,
                var,
                lower,
                upper,
            } => write!(
                f,
                "\\prod_{{{}={}}}^{{{}}} {}",
                format_symbol(var),
                lower,
                upper,
                operand(body, 2)
            ),
            Expr::Integral {
                integrand,
                var,
                domain,
            } => write!(
                f,
                "\\int{} {} \\, d{}",
                format_domain(domain),
                integrand,
                format_symbol(var)
            ),
            Expr::MultiIntegral {
                kind,
                integrand,
                vars,
                domain,
            } => {
                write!(f, "{}{} {}", kind.latex(), format_domain(domain), integrand)?;
                for var in vars {
                    write!(f, " \\, d{}", format_symbol(var))?;
                }
                Ok(())
            }
            Expr::Derivative { body, vars, kind } => {
                let op = match kind {
                    DerivativeKind::Partial => "\\partial",
                    DerivativeKind::Total => "d",
                };
                let total: Option<usize> = vars.iter().map(|v| v.order.as_count()).sum();
                write!(f, "\\frac{{{}", op)?;
                if let Some(total) = total.filter(|t| *t > 1) {
                    write!(f, "^{}", script_count(total))?;
                }
                write!(f, "}}{{")?;
                let denominator: Vec<String> = vars
                    .iter()
                    .map(|v| {
                        if v.order == Expr::Number(1.0) {
                            format!("{} {}", op, format_symbol(&v.var))
                        } else {
                            format!("{} {}{}", op, format_symbol(&v.var), script('^', &v.order))
                        }
                    })
                    .collect();
                write!(f, "{}}} {}", denominator.join(" "), operand(body, 3))
            }
            Expr::Gradient { body, vars } => write!(
                f,
                "\\nabla_{{{}}} {}",
                vars.iter().map(|v| format_symbol(v)).collect::<Vec<_>>().join(", "),
                operand(body, 3)
            ),
            Expr::Laplacian { body, vars, power } => write!(
                f,
                "\\nabla{}_{{{}}} {}",
                script('^', power),
                vars.iter().map(|v| format_symbol(v)).collect::<Vec<_>>().join(", "),
                operand(body, 3)
            ),
            Expr::Matrix { rows, kind } => {
                let body = rows
                    .iter()
                    .map(|row| join(row, " & "))
                    .collect::<Vec<_>>()
                    .join(" \\\\ ");
                write!(
                    f,
                    "\\begin{{{env}}} {} \\end{{{env}}}",
                    body,
                    env = kind.environment()
                )
            }
            Expr::Abs(inner) => write!(f, "|{}|", inner),
            Expr::Norm { body, order } => {
                write!(f, "\\|{}\\|", body)?;
                if let Some(order) = order {
                    write!(f, "{}", script('_', order))?;
                }
                Ok(())
            }
            Expr::InnerProduct(items) => write!(f, "\\langle {} \\rangle", join(items, ", ")),
            Expr::EmptySet => write!(f, "\\emptyset"),
            Expr::Set(items) => write!(f, "\\{{{}\\}}", join(items, ", ")),
            Expr::SetBuilder {
                bindings,
                predicate,
            } => write!(f, "\\{{{} : {}\\}}", format_bindings(bindings), predicate),
            Expr::Piecewise(branches) => {
                let rows = branches
                    .iter()
                    .map(|b| match &b.condition {
                        Some(cond) => format!("{} & {}", b.value, cond),
                        None => b.value.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" \\\\ ");
                write!(f, "\\begin{{cases}} {} \\end{{cases}}", rows)
            }
            Expr::Relation { op, left, right } => {
                format_binary(f, &format!(" {} ", op.latex()), 0, left, right)
            }
            Expr::SetOp { op, left, right } => {
                format_binary(f, &format!(" {} ", op.latex()), 0, left, right)
            }
            Expr::LogicOp { op, left, right } => {
                format_binary(f, &format!(" {} ", op.latex()), 0, left, right)
            }
            Expr::Not(inner) => write!(f, "\\lnot {}", operand(inner, 3)),
            Expr::Quantifier {
                kind,
                bindings,
                body,
            } => write!(f, "{} {} : {}", kind.latex(), format_bindings(bindings), body),
            Expr::Accent { kind, base } => write!(f, "{}{{{}}}", kind.latex(), base),
            Expr::Mod { left, right } => {
                format_binary(f, " \\operatorname{mod} ", 2, left, right)
            }
            Expr::ArgExtremum {
                kind,
                body,
                sub,
                sup,
            } => {
                write!(f, "{}", kind.latex())?;
                if let Some(sub) = sub {
                    write!(f, "_{{{}}}", sub)?;
                }
                if let Some(sup) = sup {
                    write!(f, "^{{{}}}", sup)?;
                }
                write!(f, " {}", operand(body, 3))
            }
        }
    }
}

fn script_count(n: usize) -> String {
    if n < 10 {
        n.to_string()
    } else {
        format!("{{{}}}", n)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.statements.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sym(name: &str) -> Expr {
        Expr::symbol(name)
    }

    fn num(v: f64) -> Expr {
        Expr::Number(v)
    }

    #[test]
    fn test_display_arithmetic() {
        let expr = Expr::binary(
            BinOp::Add,
            Expr::binary(BinOp::Pow, sym("x"), num(2.0)),
            num(1.0),
        );
        assert_eq!(expr.to_string(), "x^2 + 1");

        let expr = Expr::binary(
            BinOp::Mul,
            num(2.0),
            Expr::binary(BinOp::Add, sym("x"), sym("y")),
        );
        assert_eq!(expr.to_string(), "2 \\cdot (x + y)");
    }

    #[test]
    fn test_display_right_operand_parentheses() {
        let expr = Expr::binary(
            BinOp::Sub,
            sym("a"),
            Expr::binary(BinOp::Sub, sym("b"), sym("c")),
        );
        assert_eq!(expr.to_string(), "a - (b - c)");

        let expr = Expr::binary(
            BinOp::Sub,
            Expr::binary(BinOp::Sub, sym("a"), sym("b")),
            sym("c"),
        );
        assert_eq!(expr.to_string(), "a - b - c");
    }

    #[test]
    fn test_display_power_base_and_exponent() {
        let expr = Expr::binary(BinOp::Pow, num(-2.0), num(2.0));
        assert_eq!(expr.to_string(), "(-2)^2");

        let expr = Expr::binary(
            BinOp::Pow,
            Expr::binary(BinOp::Add, sym("x"), num(1.0)),
            Expr::binary(BinOp::Sub, sym("n"), num(1.0)),
        );
        assert_eq!(expr.to_string(), "(x + 1)^{n - 1}");

        let expr = Expr::binary(BinOp::Pow, sym("x"), num(10.0));
        assert_eq!(expr.to_string(), "x^{10}");
    }

    #[test]
    fn test_display_negation() {
        assert_eq!(Expr::negate(num(3.0)), num(-3.0));
        let neg = Expr::negate(sym("x"));
        assert_eq!(neg.to_string(), "-x");
        let neg_sum = Expr::negate(Expr::binary(BinOp::Add, sym("x"), sym("y")));
        assert_eq!(neg_sum.to_string(), "-(x + y)");
        // A literal zero minus a literal is not a negation
        let diff = Expr::binary(BinOp::Sub, num(0.0), num(2.0));
        assert_eq!(diff.to_string(), "0 - 2");
    }

    #[test]
    fn test_display_function_call() {
        let expr = Expr::FunctionCall {
            name: "\\log".to_string(),
            args: vec![sym("x")],
            power: None,
            base: Some(Box::new(num(2.0))),
        };
        assert_eq!(expr.to_string(), "\\log_{2}(x)");

        let expr = Expr::FunctionCall {
            name: "\\sin".to_string(),
            args: vec![sym("x")],
            power: Some(Box::new(num(-1.0))),
            base: None,
        };
        assert_eq!(expr.to_string(), "\\sin^{-1}(x)");
    }

    #[test]
    fn test_display_calculus() {
        let sum = Expr::Sum {
            body: Box::new(Expr::Fraction {
                numerator: Box::new(num(1.0)),
                denominator: Box::new(Expr::binary(BinOp::Pow, sym("n"), num(2.0))),
            }),
            var: "n".to_string(),
            lower: Box::new(num(1.0)),
            upper: Box::new(num(10.0)),
        };
        assert_eq!(sum.to_string(), "\\sum_{n=1}^{10} \\frac{1}{n^2}");

        let derivative = Expr::Derivative {
            body: Box::new(Expr::binary(BinOp::Mul, sym("x"), sym("y"))),
            vars: vec![VarOrder::first("x"), VarOrder::new("y", num(2.0))],
            kind: DerivativeKind::Partial,
        };
        assert_eq!(
            derivative.to_string(),
            "\\frac{\\partial^3}{\\partial x \\partial y^2} (x \\cdot y)"
        );

        let integral = Expr::Integral {
            integrand: Box::new(Expr::binary(BinOp::Pow, sym("x"), num(2.0))),
            var: "x".to_string(),
            domain: IntegralDomain::Bounds {
                lower: Box::new(num(0.0)),
                upper: Box::new(num(1.0)),
            },
        };
        assert_eq!(integral.to_string(), "\\int_{0}^{1} x^2 \\, dx");
    }

    #[test]
    fn test_display_greedy_operand_is_wrapped() {
        let sum = Expr::Sum {
            body: Box::new(sym("n")),
            var: "n".to_string(),
            lower: Box::new(num(1.0)),
            upper: Box::new(num(3.0)),
        };
        let expr = Expr::binary(BinOp::Add, sum, num(1.0));
        assert_eq!(expr.to_string(), "\\left( \\sum_{n=1}^{3} n \\right) + 1");
    }

    #[test]
    fn test_display_matrix_and_sets() {
        let matrix = Expr::matrix(
            vec![vec![num(1.0), num(2.0)], vec![num(3.0), num(4.0)]],
            MatrixKind::Paren,
        )
        .unwrap();
        assert_eq!(
            matrix.to_string(),
            "\\begin{pmatrix} 1 & 2 \\\\ 3 & 4 \\end{pmatrix}"
        );

        let set = Expr::Set(vec![num(1.0), sym("alpha")]);
        assert_eq!(set.to_string(), "\\{1, \\alpha\\}");
    }

    #[test]
    fn test_matrix_rejects_ragged_rows() {
        let err = Expr::matrix(
            vec![vec![num(1.0), num(2.0)], vec![num(3.0)]],
            MatrixKind::Bracket,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::MatrixShape {
                row: 1,
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_variable_names() {
        assert_eq!(sym("x").variable_name(), Some("x".to_string()));
        assert_eq!(sym("pi").variable_name(), None);
        let sub = Expr::Subscript {
            base: "x".to_string(),
            index: vec![num(1.0)],
        };
        assert_eq!(sub.variable_name(), Some("x_1".to_string()));
        assert_eq!(sub.to_string(), "x_1");
        let accent = Expr::Accent {
            kind: AccentKind::Hat,
            base: Box::new(sym("v")),
        };
        assert_eq!(accent.variable_name(), Some("v_hat".to_string()));
        let complex = Expr::Subscript {
            base: "x".to_string(),
            index: vec![Expr::binary(BinOp::Add, sym("i"), num(1.0))],
        };
        assert_eq!(complex.variable_name(), None);
        assert_eq!(complex.to_string(), "x_{i + 1}");
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("x_1"), Some("x_1".to_string()));
        assert_eq!(sanitize_identifier("f'"), Some("f'".to_string()));
        assert_eq!(sanitize_identifier("θ"), Some("theta".to_string()));
        assert_eq!(sanitize_identifier("in"), Some("in_".to_string()));
        assert_eq!(sanitize_identifier("let"), Some("let_".to_string()));
        assert_eq!(sanitize_identifier("1x"), None);
        assert_eq!(sanitize_identifier("_x"), None);
        assert_eq!(sanitize_identifier("\\mathbb{R}"), None);
        assert_eq!(sanitize_identifier(""), None);
    }
}
