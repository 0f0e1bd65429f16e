//! Parser for the LaTeX math subset
//!
//! Parses formulas like:
//! - `x^2 + 1`
//! - `\frac{d}{dx} x^3 + \sin(x)`
//! - `\sum_{n=1}^{10} \frac{1}{n^2}`
//! - `\det\begin{pmatrix} a & b \\ c & d \end{pmatrix}`
//!
//! The parser produces a generic parse tree labelled by grammar production.
//! [`crate::reducer`] turns that tree into the AST. Precedence, loosest first:
//! relations/set/logic, additive, multiplicative (including juxtaposition),
//! unary, and right-associative `^`.

use log::trace;

use crate::ast::{is_greek_name, RelOp};
use crate::error::{CompileError, CompileResult};
use crate::lexer::{Lexer, Token};

/// Deepest grouping the parser accepts before reporting a grammar error
pub const MAX_NESTING_DEPTH: usize = 128;

/// Tallest parse tree accepted, counting operator chains as well as
/// grouping. Every pass after parsing recurses at most this deep.
pub const MAX_TREE_DEPTH: usize = 256;

/// Commands parsed as builtin function heads
const NAMED_FUNCTIONS: &[&str] = &[
    "sin", "cos", "tan", "cot", "sec", "csc", "arcsin", "arccos", "arctan", "sinh", "cosh",
    "tanh", "log", "ln", "exp", "det", "min", "max", "floor", "ceil", "sgn",
];

/// Commands of the form `\style{word}`
const STYLE_COMMANDS: &[&str] = &[
    "operatorname", "mathrm", "text", "textrm", "mathit", "mathbf", "mathbb", "mathcal",
    "mathsf", "boldsymbol",
];

/// Grammar production that labels a parse node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Production {
    Program,
    Relation,
    SetOp,
    LogicOp,
    Add,
    Sub,
    Mul,
    Div,
    Cross,
    Hadamard,
    Mod,
    Juxtapose,
    Negate,
    Not,
    Power,
    /// `S^{k}(args)...`
    PowerCall,
    Number,
    Symbol,
    SymbolCall,
    /// `f'(x)`, `y''`
    PrimeCall,
    /// Apostrophes or a braced `\prime` run
    PrimeRun,
    Subscript,
    Infinity,
    CommandSymbol,
    StyledSymbol,
    StyledCall,
    Group,
    NamedFunction,
    GenericFunction,
    Arguments,
    Superscript,
    LowerScript,
    Fraction,
    FracDerivative,
    SubscriptDerivative,
    DerivativeVariable,
    Gradient,
    Laplacian,
    Sum,
    Product,
    Integral,
    MultiIntegral,
    Differential,
    Bounds,
    Region,
    Sqrt,
    Matrix,
    MatrixRow,
    Cases,
    CasesRow,
    Abs,
    Norm,
    InnerProduct,
    EmptySet,
    SetLiteral,
    SetBuilder,
    Binding,
    Quantifier,
    Accent,
    ArgExtremum,
}

/// Child of a parse node
#[derive(Debug, Clone, PartialEq)]
pub enum ParseChild {
    Token(Token),
    Node(ParseNode),
}

/// Parse tree node; discarded after reduction
#[derive(Debug, Clone, PartialEq)]
pub struct ParseNode {
    pub production: Production,
    pub children: Vec<ParseChild>,
    height: usize,
}

impl ParseNode {
    pub fn new(production: Production, children: Vec<ParseChild>) -> Self {
        let height = 1 + children
            .iter()
            .filter_map(|child| match child {
                ParseChild::Node(node) => Some(node.height),
                ParseChild::Token(_) => None,
            })
            .max()
            .unwrap_or(0);
        Self {
            production,
            children,
            height,
        }
    }

    /// Levels from this node down to its deepest leaf
    pub fn height(&self) -> usize {
        self.height
    }

    fn leaf(production: Production, token: Token) -> Self {
        Self::new(production, vec![ParseChild::Token(token)])
    }

    fn unary(production: Production, child: ParseNode) -> Self {
        Self::new(production, vec![ParseChild::Node(child)])
    }

    fn binary(production: Production, left: ParseNode, right: ParseNode) -> Self {
        Self::new(
            production,
            vec![ParseChild::Node(left), ParseChild::Node(right)],
        )
    }

    /// Child nodes, skipping tokens
    pub fn nodes(&self) -> impl Iterator<Item = &ParseNode> {
        self.children.iter().filter_map(|child| match child {
            ParseChild::Node(node) => Some(node),
            ParseChild::Token(_) => None,
        })
    }
}

fn node(node: ParseNode) -> ParseChild {
    ParseChild::Node(node)
}

/// Variable of a fused differential: `dx` -> `x`, `dtheta` -> `theta`.
/// Longer names such as `dist` are ordinary symbols.
fn fused_differential(name: &str) -> Option<&str> {
    let var = name.strip_prefix('d')?;
    let mut chars = var.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Some(var),
        (Some(_), Some(_)) if is_greek_name(var) => Some(var),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    pos: usize,
    depth: usize,
    in_integrand: bool,
}

/// Parser for LaTeX formulas
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    /// Set while parsing an integrand so `dx` ends juxtaposition
    in_integrand: bool,
}

impl Parser {
    pub fn new(source: &str) -> CompileResult<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self::from_tokens(tokens))
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            in_integrand: false,
        }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match self.current() {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_relation(&mut self, op: RelOp) -> bool {
        if matches!(self.current(), Some(Token::Relation(r)) if *r == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> CompileResult<Token> {
        if self.check(&expected) {
            self.advance().ok_or_else(|| self.unexpected())
        } else {
            Err(CompileError::grammar(format!(
                "expected `{}`, found {}",
                expected,
                self.describe_current()
            )))
        }
    }

    fn describe_current(&self) -> String {
        match self.current() {
            Some(Token::Newline) => "a line break".to_string(),
            Some(tok) => format!("`{}`", tok),
            None => "end of input".to_string(),
        }
    }

    fn unexpected(&self) -> CompileError {
        CompileError::grammar(format!("unexpected {}", self.describe_current()))
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            depth: self.depth,
            in_integrand: self.in_integrand,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.depth = checkpoint.depth;
        self.in_integrand = checkpoint.in_integrand;
    }

    /// Run `f`, rewinding to the current position if it fails
    fn attempt<T>(&mut self, f: impl FnOnce(&mut Self) -> CompileResult<T>) -> Option<T> {
        let checkpoint = self.checkpoint();
        match f(self) {
            Ok(value) => Some(value),
            Err(err) => {
                trace!("backtracking to token {}: {}", checkpoint.pos, err);
                self.restore(checkpoint);
                None
            }
        }
    }

    /// Run `f` one nesting level deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CompileError::grammar(format!(
                "expression nesting exceeds {} levels",
                MAX_NESTING_DEPTH
            )));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Reject trees taller than [`MAX_TREE_DEPTH`]
    fn bounded(&self, tree: ParseNode) -> CompileResult<ParseNode> {
        if tree.height > MAX_TREE_DEPTH {
            return Err(CompileError::grammar(format!(
                "expression nesting exceeds {} tree levels",
                MAX_TREE_DEPTH
            )));
        }
        Ok(tree)
    }

    /// Like [`Parser::nested`], for delimited groups where no differential can occur
    fn grouped<T>(&mut self, f: impl FnOnce(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
        let saved = self.in_integrand;
        self.in_integrand = false;
        let result = self.nested(f);
        self.in_integrand = saved;
        result
    }

    /// Parse a complete program (newline-separated statements)
    pub fn parse_program(&mut self) -> CompileResult<ParseNode> {
        let mut statements = Vec::new();

        while self.current().is_some() {
            let statement = self.parse_expr()?;
            statements.push(node(self.bounded(statement)?));

            match self.current() {
                None => break,
                Some(Token::Newline) => self.pos += 1,
                Some(_) => return Err(self.unexpected()),
            }
        }

        if statements.is_empty() {
            return Err(CompileError::grammar("empty input"));
        }
        Ok(ParseNode::new(Production::Program, statements))
    }

    /// Parse an expression: relations, set operators and logic connectives
    pub fn parse_expr(&mut self) -> CompileResult<ParseNode> {
        let mut left = self.parse_additive()?;

        loop {
            let (production, op) = match self.current() {
                Some(tok @ Token::Relation(_)) => (Production::Relation, tok.clone()),
                Some(tok @ Token::SetOp(_)) => (Production::SetOp, tok.clone()),
                Some(tok @ Token::Logic(_)) => (Production::LogicOp, tok.clone()),
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = self.bounded(ParseNode::new(
                production,
                vec![node(left), ParseChild::Token(op), node(right)],
            ))?;
        }

        Ok(left)
    }

    /// Parse additive expressions: a + b, a - b
    fn parse_additive(&mut self) -> CompileResult<ParseNode> {
        let mut left = self.parse_term()?;

        loop {
            let production = match self.current() {
                Some(Token::Plus) => Production::Add,
                Some(Token::Minus) => Production::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = self.bounded(ParseNode::binary(production, left, right))?;
        }

        Ok(left)
    }

    /// Parse multiplicative expressions, including implicit juxtaposition
    fn parse_term(&mut self) -> CompileResult<ParseNode> {
        let mut left = self.parse_unary()?;

        loop {
            let production = match self.current() {
                Some(Token::Star) | Some(Token::Cdot) => Some(Production::Mul),
                Some(Token::Slash) => Some(Production::Div),
                Some(Token::Times) => Some(Production::Cross),
                Some(Token::Odot) => Some(Production::Hadamard),
                Some(Token::Mod) => Some(Production::Mod),
                _ => None,
            };

            if let Some(production) = production {
                self.pos += 1;
                let right = self.parse_unary()?;
                left = self.bounded(ParseNode::binary(production, left, right))?;
            } else if self.starts_juxtaposition() {
                let right = self.parse_power()?;
                left = self.bounded(ParseNode::binary(Production::Juxtapose, left, right))?;
            } else {
                break;
            }
        }

        Ok(left)
    }

    /// Whether the current token can begin an implicitly multiplied factor
    fn starts_juxtaposition(&self) -> bool {
        match self.current() {
            Some(Token::Symbol(_)) => !(self.in_integrand && self.at_differential()),
            Some(
                Token::Number(_)
                | Token::Command(_)
                | Token::LParen
                | Token::LBracket
                | Token::Frac
                | Token::Sqrt
                | Token::Sum
                | Token::Prod
                | Token::Int
                | Token::MultiInt(_)
                | Token::Partial
                | Token::Nabla
                | Token::Infinity
                | Token::Accent(_)
                | Token::ArgExtremum(_)
                | Token::Begin
                | Token::LAngle
                | Token::LVert
                | Token::LNorm
                | Token::EmptySet,
            ) => true,
            _ => false,
        }
    }

    /// `dx`, `dtheta`, or `d` followed by a variable
    fn at_differential(&self) -> bool {
        match self.current() {
            Some(Token::Symbol(name)) if name == "d" => {
                matches!(self.peek_at(1), Some(Token::Symbol(_)) | Some(Token::Command(_)))
            }
            Some(Token::Symbol(name)) => fused_differential(name).is_some(),
            _ => false,
        }
    }

    /// Parse unary expressions: -a, \lnot a
    fn parse_unary(&mut self) -> CompileResult<ParseNode> {
        let production = match self.current() {
            Some(Token::Minus) => Production::Negate,
            Some(Token::Not) => Production::Not,
            _ => return self.parse_power(),
        };
        self.pos += 1;
        let operand = self.nested(|p| p.parse_unary())?;
        Ok(ParseNode::unary(production, operand))
    }

    /// Parse `atom [^ exponent] [(args)]*`
    fn parse_power(&mut self) -> CompileResult<ParseNode> {
        let base = self.parse_atom()?;
        if !self.eat(&Token::Caret) {
            return Ok(base);
        }

        let exponent = self.parse_exponent()?;
        let mut children = vec![node(base), node(exponent)];
        while self.check(&Token::LParen) {
            children.push(node(self.parse_arguments()?));
        }

        let production = if children.len() > 2 {
            Production::PowerCall
        } else {
            Production::Power
        };
        Ok(ParseNode::new(production, children))
    }

    /// Exponent after `^`: braced expression, prime run, or a single atom
    fn parse_exponent(&mut self) -> CompileResult<ParseNode> {
        if self.check(&Token::LBrace) && matches!(self.peek_at(1), Some(Token::Prime)) {
            let primes = self.attempt(|p| {
                p.pos += 1;
                let mut primes = Vec::new();
                while p.eat(&Token::Prime) {
                    primes.push(ParseChild::Token(Token::Prime));
                }
                p.expect(Token::RBrace)?;
                Ok(ParseNode::new(Production::PrimeRun, primes))
            });
            if let Some(primes) = primes {
                return Ok(primes);
            }
        }
        if self.eat(&Token::Prime) {
            return Ok(ParseNode::leaf(Production::PrimeRun, Token::Prime));
        }
        if self.check(&Token::LBrace) {
            return self.parse_braced();
        }
        self.nested(|p| p.parse_power())
    }

    /// `{expr}` or a single atom, used for scripts and command operands
    fn parse_script_operand(&mut self) -> CompileResult<ParseNode> {
        if self.check(&Token::LBrace) {
            self.parse_braced()
        } else {
            self.nested(|p| p.parse_atom())
        }
    }

    fn parse_braced(&mut self) -> CompileResult<ParseNode> {
        self.expect(Token::LBrace)?;
        let inner = self.grouped(|p| p.parse_expr())?;
        self.expect(Token::RBrace)?;
        Ok(inner)
    }

    /// Parse function arguments: (arg1, arg2, ...)
    fn parse_arguments(&mut self) -> CompileResult<ParseNode> {
        self.expect(Token::LParen)?;
        let args = self.grouped(|p| {
            let mut args = Vec::new();
            if !p.check(&Token::RParen) {
                args.push(node(p.parse_expr()?));
                while p.eat(&Token::Comma) {
                    args.push(node(p.parse_expr()?));
                }
            }
            Ok(args)
        })?;
        self.expect(Token::RParen)?;
        Ok(ParseNode::new(Production::Arguments, args))
    }

    /// Plain or command variable name: `x`, `\theta`
    fn parse_var_name(&mut self) -> CompileResult<String> {
        match self.current().cloned() {
            Some(Token::Symbol(name)) | Some(Token::Command(name)) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Subscript that is part of a variable name: `_1`, `_i`, `_{0}`
    fn parse_simple_index(&mut self) -> CompileResult<String> {
        let braced = self.eat(&Token::LBrace);
        let index = match self.advance() {
            Some(Token::Symbol(s)) | Some(Token::Command(s)) => s,
            Some(Token::Number(n)) => n.to_string(),
            Some(tok) => {
                return Err(CompileError::grammar(format!(
                    "unsupported variable subscript `{}`",
                    tok
                )))
            }
            None => return Err(self.unexpected()),
        };
        if braced {
            self.expect(Token::RBrace)?;
        }
        Ok(index)
    }

    /// Parse primary expressions
    fn parse_atom(&mut self) -> CompileResult<ParseNode> {
        trace!("atom at token {}: {:?}", self.pos, self.current());

        match self.current().cloned() {
            Some(tok @ Token::Number(_)) => {
                self.pos += 1;
                Ok(ParseNode::leaf(Production::Number, tok))
            }

            Some(Token::Symbol(name)) => {
                if name == "d" && matches!(self.peek_at(1), Some(Token::Underscore)) {
                    if let Some(derivative) = self.attempt(|p| p.parse_subscript_derivative()) {
                        return Ok(derivative);
                    }
                }
                self.pos += 1;
                self.parse_symbol_tail(name)
            }

            Some(Token::Command(name)) => {
                if NAMED_FUNCTIONS.contains(&name.as_str()) {
                    return self.parse_named_function(name);
                }
                if STYLE_COMMANDS.contains(&name.as_str()) {
                    return self.parse_styled(name);
                }
                self.pos += 1;
                if self.check(&Token::LParen) {
                    let args = self.parse_arguments()?;
                    return Ok(ParseNode::new(
                        Production::GenericFunction,
                        vec![ParseChild::Token(Token::Command(name)), node(args)],
                    ));
                }
                if self.eat(&Token::Underscore) {
                    return self.parse_subscript(name);
                }
                Ok(ParseNode::leaf(
                    Production::CommandSymbol,
                    Token::Command(name),
                ))
            }

            Some(Token::Infinity) => {
                self.pos += 1;
                Ok(ParseNode::leaf(Production::Infinity, Token::Infinity))
            }

            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.grouped(|p| p.parse_expr())?;
                self.expect(Token::RParen)?;
                Ok(ParseNode::unary(Production::Group, inner))
            }

            Some(Token::LBracket) => {
                self.pos += 1;
                let inner = self.grouped(|p| p.parse_expr())?;
                self.expect(Token::RBracket)?;
                Ok(ParseNode::unary(Production::Group, inner))
            }

            Some(Token::LBrace) => self.parse_brace_set(),

            Some(Token::Frac) => {
                self.pos += 1;
                if let Some(derivative) = self.attempt(|p| p.parse_frac_derivative()) {
                    return Ok(derivative);
                }
                let numerator = self.parse_braced()?;
                let denominator = self.parse_braced()?;
                Ok(ParseNode::binary(
                    Production::Fraction,
                    numerator,
                    denominator,
                ))
            }

            Some(Token::Sqrt) => {
                self.pos += 1;
                let mut children = Vec::new();
                if self.eat(&Token::LBracket) {
                    let index = self.grouped(|p| p.parse_expr())?;
                    self.expect(Token::RBracket)?;
                    children.push(node(ParseNode::unary(Production::Superscript, index)));
                }
                children.push(node(self.parse_script_operand()?));
                Ok(ParseNode::new(Production::Sqrt, children))
            }

            Some(Token::Sum) => self.parse_big_operator(Production::Sum),
            Some(Token::Prod) => self.parse_big_operator(Production::Product),

            Some(Token::Int) => {
                self.pos += 1;
                let mut children = Vec::new();
                if let Some(domain) = self.parse_integral_limits()? {
                    children.push(node(domain));
                }
                children.push(node(self.parse_integrand()?));
                children.push(node(self.parse_differential()?));
                Ok(ParseNode::new(Production::Integral, children))
            }

            Some(Token::MultiInt(kind)) => {
                self.pos += 1;
                let mut children = vec![ParseChild::Token(Token::MultiInt(kind))];
                if let Some(domain) = self.parse_integral_limits()? {
                    children.push(node(domain));
                }
                children.push(node(self.parse_integrand()?));
                let mut differentials = 0;
                while differentials < kind.dimensions() && self.at_differential() {
                    children.push(node(self.parse_differential()?));
                    differentials += 1;
                }
                if differentials == 0 {
                    return Err(CompileError::grammar(format!(
                        "`{}` needs at least one differential",
                        kind.latex()
                    )));
                }
                Ok(ParseNode::new(Production::MultiIntegral, children))
            }

            Some(Token::Partial) => self.parse_subscript_derivative(),
            Some(Token::Nabla) => self.parse_nabla(),
            Some(Token::Begin) => self.parse_environment(),

            Some(Token::Bar) => self.parse_delimited(Token::Bar, Token::Bar, Production::Abs),
            Some(Token::LVert) => {
                self.parse_delimited(Token::LVert, Token::RVert, Production::Abs)
            }
            Some(Token::DoubleBar) => self.parse_norm(Token::DoubleBar, Token::DoubleBar),
            Some(Token::LNorm) => self.parse_norm(Token::LNorm, Token::RNorm),

            Some(Token::LAngle) => {
                self.pos += 1;
                let items = self.grouped(|p| {
                    let mut items = vec![node(p.parse_expr()?)];
                    while p.eat(&Token::Comma) {
                        items.push(node(p.parse_expr()?));
                    }
                    Ok(items)
                })?;
                self.expect(Token::RAngle)?;
                Ok(ParseNode::new(Production::InnerProduct, items))
            }

            Some(Token::EmptySet) => {
                self.pos += 1;
                Ok(ParseNode::new(Production::EmptySet, Vec::new()))
            }

            Some(Token::Quantifier(kind)) => {
                self.pos += 1;
                let mut children = vec![ParseChild::Token(Token::Quantifier(kind))];
                children.extend(self.parse_bindings()?);
                if !(self.eat(&Token::Colon) || self.eat(&Token::Comma)) {
                    return Err(self.unexpected());
                }
                children.push(node(self.nested(|p| p.parse_expr())?));
                Ok(ParseNode::new(Production::Quantifier, children))
            }

            Some(Token::Accent(kind)) => {
                self.pos += 1;
                let base = self.parse_script_operand()?;
                Ok(ParseNode::new(
                    Production::Accent,
                    vec![ParseChild::Token(Token::Accent(kind)), node(base)],
                ))
            }

            Some(Token::ArgExtremum(kind)) => {
                self.pos += 1;
                let mut children = vec![ParseChild::Token(Token::ArgExtremum(kind))];
                let mut sub = None;
                let mut sup = None;
                for _ in 0..2 {
                    if sub.is_none() && self.eat(&Token::Underscore) {
                        sub = Some(self.parse_script_operand()?);
                    } else if sup.is_none() && self.eat(&Token::Caret) {
                        sup = Some(self.parse_exponent()?);
                    }
                }
                if let Some(sub) = sub {
                    children.push(node(ParseNode::unary(Production::LowerScript, sub)));
                }
                if let Some(sup) = sup {
                    children.push(node(ParseNode::unary(Production::Superscript, sup)));
                }
                children.push(node(self.nested(|p| p.parse_unary())?));
                Ok(ParseNode::new(Production::ArgExtremum, children))
            }

            _ => Err(self.unexpected()),
        }
    }

    /// Continue after a bare symbol: primes, calls and subscripts
    fn parse_symbol_tail(&mut self, name: String) -> CompileResult<ParseNode> {
        let symbol = ParseChild::Token(Token::Symbol(name.clone()));

        if self.check(&Token::Apostrophe) {
            let mut primes = Vec::new();
            while self.eat(&Token::Apostrophe) {
                primes.push(ParseChild::Token(Token::Apostrophe));
            }
            let mut children = vec![symbol, node(ParseNode::new(Production::PrimeRun, primes))];
            if self.check(&Token::LParen) {
                children.push(node(self.parse_arguments()?));
            }
            return Ok(ParseNode::new(Production::PrimeCall, children));
        }

        if self.check(&Token::LParen) {
            let args = self.parse_arguments()?;
            return Ok(ParseNode::new(
                Production::SymbolCall,
                vec![symbol, node(args)],
            ));
        }

        if self.eat(&Token::Underscore) {
            return self.parse_subscript(name);
        }

        Ok(ParseNode::new(Production::Symbol, vec![symbol]))
    }

    /// Subscript after `_`: `x_1`, `x_i`, `a_{i, j}`
    fn parse_subscript(&mut self, base: String) -> CompileResult<ParseNode> {
        let mut children = vec![ParseChild::Token(Token::Symbol(base))];

        if self.eat(&Token::LBrace) {
            let indices = self.grouped(|p| {
                let mut indices = vec![node(p.parse_expr()?)];
                while p.eat(&Token::Comma) {
                    indices.push(node(p.parse_expr()?));
                }
                Ok(indices)
            })?;
            self.expect(Token::RBrace)?;
            children.extend(indices);
        } else {
            let index = match self.current().cloned() {
                Some(tok @ Token::Number(_)) => ParseNode::leaf(Production::Number, tok),
                Some(tok @ Token::Symbol(_)) => ParseNode::leaf(Production::Symbol, tok),
                Some(tok @ Token::Command(_)) => ParseNode::leaf(Production::CommandSymbol, tok),
                _ => return Err(self.unexpected()),
            };
            self.pos += 1;
            children.push(node(index));
        }

        Ok(ParseNode::new(Production::Subscript, children))
    }

    /// `\sin(x)`, `\sin^2(x)`, `\log_{b}(x)`, `\det\begin{pmatrix}...`
    fn parse_named_function(&mut self, name: String) -> CompileResult<ParseNode> {
        self.pos += 1;
        let mut children = vec![ParseChild::Token(Token::Command(name.clone()))];

        let mut power = None;
        let mut base = None;
        for _ in 0..2 {
            if power.is_none() && self.eat(&Token::Caret) {
                power = Some(ParseNode::unary(Production::Superscript, self.parse_exponent()?));
            } else if base.is_none() && self.eat(&Token::Underscore) {
                base = Some(ParseNode::unary(
                    Production::LowerScript,
                    self.parse_script_operand()?,
                ));
            }
        }
        children.extend(power.into_iter().chain(base).map(node));

        let args = if name == "det" && self.check(&Token::Begin) {
            let matrix = self.parse_environment()?;
            ParseNode::unary(Production::Arguments, matrix)
        } else if self.check(&Token::LParen) {
            self.parse_arguments()?
        } else {
            return Err(CompileError::grammar(format!(
                "expected `(` after `\\{}`, found {}",
                name,
                self.describe_current()
            )));
        };
        children.push(node(args));

        Ok(ParseNode::new(Production::NamedFunction, children))
    }

    /// `\operatorname{name}(args)`, `\mathrm{x}`, `\text{otherwise}`
    fn parse_styled(&mut self, style: String) -> CompileResult<ParseNode> {
        self.pos += 1;
        self.expect(Token::LBrace)?;

        let mut word = String::new();
        loop {
            match self.current() {
                Some(Token::Symbol(s)) => word.push_str(s),
                Some(Token::Number(n)) => word.push_str(&n.to_string()),
                Some(Token::RBrace) => break,
                _ => return Err(self.unexpected()),
            }
            self.pos += 1;
        }
        self.expect(Token::RBrace)?;

        if word.is_empty() {
            return Err(CompileError::grammar(format!("empty `\\{}` group", style)));
        }

        let mut children = vec![
            ParseChild::Token(Token::Command(style)),
            ParseChild::Token(Token::Symbol(word)),
        ];
        if self.check(&Token::LParen) {
            children.push(node(self.parse_arguments()?));
            return Ok(ParseNode::new(Production::StyledCall, children));
        }
        Ok(ParseNode::new(Production::StyledSymbol, children))
    }

    /// Derivative head inside `\frac`; the caller backtracks to a plain fraction
    fn parse_frac_derivative(&mut self) -> CompileResult<ParseNode> {
        self.expect(Token::LBrace)?;

        let (op, fused) = match self.current().cloned() {
            Some(Token::Partial) => (Token::Partial, None),
            Some(Token::Symbol(s)) if s == "d" => (Token::Symbol(s), None),
            Some(Token::Symbol(s)) => match fused_differential(&s) {
                Some(var) => (Token::Symbol("d".to_string()), Some(var.to_string())),
                None => return Err(self.unexpected()),
            },
            _ => return Err(self.unexpected()),
        };
        self.pos += 1;
        let partial = matches!(op, Token::Partial);
        let mut children = vec![ParseChild::Token(op)];

        // `\frac{dy}{dx}` carries its body in the numerator
        let mut body = fused.map(|name| ParseNode::leaf(Production::Symbol, Token::Symbol(name)));
        if body.is_none() {
            if self.eat(&Token::Caret) {
                let order = self.parse_exponent()?;
                children.push(node(ParseNode::unary(Production::Superscript, order)));
            }
            if !self.check(&Token::RBrace) {
                body = Some(self.grouped(|p| p.parse_expr())?);
            }
        }
        self.expect(Token::RBrace)?;

        self.expect(Token::LBrace)?;
        let mut variables = 0;
        while !self.check(&Token::RBrace) {
            children.push(node(self.parse_derivative_variable(partial)?));
            variables += 1;
        }
        self.expect(Token::RBrace)?;
        if variables == 0 {
            return Err(CompileError::grammar("derivative denominator names no variable"));
        }

        let body = match body {
            Some(body) => body,
            None => self.nested(|p| p.parse_unary())?,
        };
        children.push(node(body));

        Ok(ParseNode::new(Production::FracDerivative, children))
    }

    /// One `\partial x^2`, `d x`, or `dx` item of a derivative denominator
    fn parse_derivative_variable(&mut self, partial: bool) -> CompileResult<ParseNode> {
        let var = match self.current().cloned() {
            Some(Token::Partial) if partial => {
                self.pos += 1;
                self.parse_var_name()?
            }
            Some(Token::Symbol(s)) if !partial && s == "d" => {
                self.pos += 1;
                self.parse_var_name()?
            }
            Some(Token::Symbol(s)) if !partial && fused_differential(&s).is_some() => {
                self.pos += 1;
                s[1..].to_string()
            }
            _ => return Err(self.unexpected()),
        };

        let var = if self.eat(&Token::Underscore) {
            format!("{}_{}", var, self.parse_simple_index()?)
        } else {
            var
        };

        let mut children = vec![ParseChild::Token(Token::Symbol(var))];
        if self.eat(&Token::Caret) {
            children.push(node(self.parse_exponent()?));
        }
        Ok(ParseNode::new(Production::DerivativeVariable, children))
    }

    /// `\partial_x E`, `\partial_{x y^2} E`, `d_t E`
    fn parse_subscript_derivative(&mut self) -> CompileResult<ParseNode> {
        let op = match self.advance() {
            Some(tok @ Token::Partial) => tok,
            Some(Token::Symbol(s)) if s == "d" => Token::Symbol(s),
            _ => return Err(CompileError::grammar("expected a derivative operator")),
        };
        self.expect(Token::Underscore)?;

        let mut children = vec![ParseChild::Token(op)];
        if self.eat(&Token::LBrace) {
            while !self.check(&Token::RBrace) {
                let var = self.parse_var_name()?;
                let mut item = vec![ParseChild::Token(Token::Symbol(var))];
                if self.eat(&Token::Caret) {
                    item.push(node(self.parse_exponent()?));
                }
                children.push(node(ParseNode::new(Production::DerivativeVariable, item)));
                self.eat(&Token::Comma);
            }
            self.expect(Token::RBrace)?;
        } else {
            let var = self.parse_var_name()?;
            children.push(node(ParseNode::leaf(
                Production::DerivativeVariable,
                Token::Symbol(var),
            )));
        }

        if children.len() == 1 {
            return Err(CompileError::grammar("derivative subscript names no variable"));
        }

        children.push(node(self.nested(|p| p.parse_unary())?));
        Ok(ParseNode::new(Production::SubscriptDerivative, children))
    }

    /// `\nabla_{x, y} E` or `\nabla^{2}_{x, y} E`
    fn parse_nabla(&mut self) -> CompileResult<ParseNode> {
        self.pos += 1;

        let mut power = None;
        let mut vars: Option<Vec<ParseChild>> = None;
        for _ in 0..2 {
            if power.is_none() && self.eat(&Token::Caret) {
                power = Some(self.parse_exponent()?);
            } else if vars.is_none() && self.eat(&Token::Underscore) {
                vars = Some(self.parse_nabla_vars()?);
            }
        }

        let body = self.nested(|p| p.parse_unary())?;

        let mut children = Vec::new();
        let production = match power {
            Some(power) => {
                children.push(node(ParseNode::unary(Production::Superscript, power)));
                Production::Laplacian
            }
            None => Production::Gradient,
        };
        children.extend(vars.unwrap_or_default());
        children.push(node(body));
        Ok(ParseNode::new(production, children))
    }

    fn parse_nabla_vars(&mut self) -> CompileResult<Vec<ParseChild>> {
        if !self.eat(&Token::LBrace) {
            let var = self.parse_var_name()?;
            return Ok(vec![ParseChild::Token(Token::Symbol(var))]);
        }

        let mut vars = Vec::new();
        while !self.check(&Token::RBrace) {
            vars.push(ParseChild::Token(Token::Symbol(self.parse_var_name()?)));
            self.eat(&Token::Comma);
        }
        self.expect(Token::RBrace)?;

        if vars.is_empty() {
            return Err(CompileError::grammar("`\\nabla` subscript names no variable"));
        }
        Ok(vars)
    }

    /// `\sum_{n=1}^{N} body` and `\prod_{n=1}^{N} body`
    fn parse_big_operator(&mut self, production: Production) -> CompileResult<ParseNode> {
        self.pos += 1;

        let mut lower = None;
        let mut upper = None;
        for _ in 0..2 {
            if lower.is_none() && self.eat(&Token::Underscore) {
                self.expect(Token::LBrace)?;
                let bound = self.grouped(|p| {
                    let var = p.parse_var_name()?;
                    if !p.eat_relation(RelOp::Eq) {
                        return Err(p.unexpected());
                    }
                    Ok((var, p.parse_expr()?))
                })?;
                self.expect(Token::RBrace)?;
                lower = Some(bound);
            } else if upper.is_none() && self.eat(&Token::Caret) {
                upper = Some(self.parse_script_operand()?);
            }
        }

        let ((var, lower), upper) = match (lower, upper) {
            (Some(lower), Some(upper)) => (lower, upper),
            _ => {
                return Err(CompileError::grammar(
                    "`\\sum` and `\\prod` need `_{var=lower}` and `^{upper}` limits",
                ))
            }
        };

        let body = self.nested(|p| p.parse_expr())?;
        Ok(ParseNode::new(
            production,
            vec![
                ParseChild::Token(Token::Symbol(var)),
                node(lower),
                node(upper),
                node(body),
            ],
        ))
    }

    /// Optional `_{lower}^{upper}` (either order) or a region `_{R}`
    fn parse_integral_limits(&mut self) -> CompileResult<Option<ParseNode>> {
        let mut lower = None;
        let mut upper = None;
        for _ in 0..2 {
            if lower.is_none() && self.eat(&Token::Underscore) {
                lower = Some(self.parse_script_operand()?);
            } else if upper.is_none() && self.eat(&Token::Caret) {
                upper = Some(self.parse_script_operand()?);
            }
        }

        match (lower, upper) {
            (Some(lower), Some(upper)) => {
                Ok(Some(ParseNode::binary(Production::Bounds, lower, upper)))
            }
            (Some(region), None) => Ok(Some(ParseNode::unary(Production::Region, region))),
            (None, Some(_)) => Err(CompileError::grammar(
                "integral has an upper limit but no lower limit",
            )),
            (None, None) => Ok(None),
        }
    }

    fn parse_integrand(&mut self) -> CompileResult<ParseNode> {
        // `\int_0^1 dx` integrates the constant one
        if self.at_differential() {
            return Ok(ParseNode::leaf(Production::Number, Token::Number(1.0)));
        }
        let saved = self.in_integrand;
        self.in_integrand = true;
        let body = self.nested(|p| p.parse_expr());
        self.in_integrand = saved;
        body
    }

    fn parse_differential(&mut self) -> CompileResult<ParseNode> {
        let var = match self.current().cloned() {
            Some(Token::Symbol(s)) if s == "d" => {
                self.pos += 1;
                self.parse_var_name()?
            }
            Some(Token::Symbol(s)) if fused_differential(&s).is_some() => {
                self.pos += 1;
                s[1..].to_string()
            }
            _ => {
                return Err(CompileError::grammar(format!(
                    "expected a differential such as `dx`, found {}",
                    self.describe_current()
                )))
            }
        };
        let var = if self.eat(&Token::Underscore) {
            format!("{}_{}", var, self.parse_simple_index()?)
        } else {
            var
        };
        Ok(ParseNode::leaf(Production::Differential, Token::Symbol(var)))
    }

    /// `\begin{T} ... \end{T}` for matrices and cases
    fn parse_environment(&mut self) -> CompileResult<ParseNode> {
        self.expect(Token::Begin)?;
        let name = self.parse_environment_name()?;
        trace!("environment `{}`", name);

        let body = self.grouped(|p| match name.as_str() {
            "matrix" | "pmatrix" | "bmatrix" => p.parse_matrix_body(&name),
            "cases" => p.parse_cases_body(),
            _ => Err(CompileError::grammar(format!(
                "unsupported environment `{}`",
                name
            ))),
        })?;

        self.expect(Token::End)?;
        let closing = self.parse_environment_name()?;
        if closing != name {
            return Err(CompileError::grammar(format!(
                "environment `{}` closed by `\\end{{{}}}`",
                name, closing
            )));
        }
        Ok(body)
    }

    fn parse_environment_name(&mut self) -> CompileResult<String> {
        self.expect(Token::LBrace)?;
        let name = match self.advance() {
            Some(Token::Symbol(name)) => name,
            _ => return Err(CompileError::grammar("expected an environment name")),
        };
        self.expect(Token::RBrace)?;
        Ok(name)
    }

    fn parse_matrix_body(&mut self, environment: &str) -> CompileResult<ParseNode> {
        let mut children = vec![ParseChild::Token(Token::Symbol(environment.to_string()))];
        let mut row = Vec::new();

        while !self.check(&Token::End) {
            row.push(node(self.parse_expr()?));

            if self.eat(&Token::Ampersand) {
                continue;
            }
            if self.eat(&Token::RowSep) {
                children.push(node(ParseNode::new(
                    Production::MatrixRow,
                    std::mem::take(&mut row),
                )));
                continue;
            }
            if !self.check(&Token::End) {
                return Err(self.unexpected());
            }
        }

        if !row.is_empty() {
            children.push(node(ParseNode::new(Production::MatrixRow, row)));
        }
        Ok(ParseNode::new(Production::Matrix, children))
    }

    fn parse_cases_body(&mut self) -> CompileResult<ParseNode> {
        let mut rows = Vec::new();

        while !self.check(&Token::End) {
            let mut row = vec![node(self.parse_expr()?)];
            self.eat(&Token::Comma);
            if self.eat(&Token::Ampersand) {
                self.skip_condition_word();
                row.push(node(self.parse_expr()?));
            }
            rows.push(node(ParseNode::new(Production::CasesRow, row)));

            if !self.eat(&Token::RowSep) && !self.check(&Token::End) {
                return Err(self.unexpected());
            }
        }

        if rows.is_empty() {
            return Err(CompileError::grammar("empty cases environment"));
        }
        Ok(ParseNode::new(Production::Cases, rows))
    }

    /// Skip a leading `\text{if}` in a cases condition
    fn skip_condition_word(&mut self) {
        let is_word = matches!(self.current(), Some(Token::Command(c)) if c == "text" || c == "mathrm" || c == "textrm")
            && matches!(self.peek_at(1), Some(Token::LBrace))
            && matches!(self.peek_at(2), Some(Token::Symbol(w)) if w == "if" || w == "for" || w == "when")
            && matches!(self.peek_at(3), Some(Token::RBrace));
        if is_word {
            self.pos += 4;
        }
    }

    fn parse_delimited(
        &mut self,
        open: Token,
        close: Token,
        production: Production,
    ) -> CompileResult<ParseNode> {
        self.expect(open)?;
        let inner = self.grouped(|p| p.parse_expr())?;
        self.expect(close)?;
        Ok(ParseNode::unary(production, inner))
    }

    /// `\|x\|`, `\|x\|_p`, `\lVert x \rVert_\infty`
    fn parse_norm(&mut self, open: Token, close: Token) -> CompileResult<ParseNode> {
        let mut norm = self.parse_delimited(open, close, Production::Norm)?;
        if self.eat(&Token::Underscore) {
            let order = self.parse_script_operand()?;
            norm.children
                .push(node(ParseNode::unary(Production::LowerScript, order)));
        }
        Ok(norm)
    }

    /// `{a, b}` set literal or `{x \in S : p}` set-builder
    fn parse_brace_set(&mut self) -> CompileResult<ParseNode> {
        self.expect(Token::LBrace)?;
        let set = self.grouped(|p| {
            if let Some(builder) = p.attempt(|q| q.parse_set_builder()) {
                return Ok(builder);
            }
            let mut items = Vec::new();
            if !p.check(&Token::RBrace) {
                items.push(node(p.parse_expr()?));
                while p.eat(&Token::Comma) {
                    items.push(node(p.parse_expr()?));
                }
            }
            Ok(ParseNode::new(Production::SetLiteral, items))
        })?;
        self.expect(Token::RBrace)?;
        Ok(set)
    }

    fn parse_set_builder(&mut self) -> CompileResult<ParseNode> {
        let mut children = self.parse_bindings()?;
        if !(self.eat(&Token::Colon) || self.eat(&Token::Bar)) {
            return Err(self.unexpected());
        }
        children.push(node(self.parse_expr()?));
        Ok(ParseNode::new(Production::SetBuilder, children))
    }

    /// Comma-separated `x [\in S]` bindings
    fn parse_bindings(&mut self) -> CompileResult<Vec<ParseChild>> {
        let mut bindings = vec![node(self.parse_binding()?)];

        while self.check(&Token::Comma) {
            let checkpoint = self.checkpoint();
            self.pos += 1;
            let continues = matches!(self.current(), Some(Token::Symbol(_)) | Some(Token::Command(_)))
                && matches!(
                    self.peek_at(1),
                    Some(Token::Relation(RelOp::In)) | Some(Token::Comma) | Some(Token::Colon)
                );
            if !continues {
                // The comma separates the bindings from the body
                self.restore(checkpoint);
                break;
            }
            bindings.push(node(self.parse_binding()?));
        }

        Ok(bindings)
    }

    fn parse_binding(&mut self) -> CompileResult<ParseNode> {
        let var = self.parse_var_name()?;
        let mut children = vec![ParseChild::Token(Token::Symbol(var))];
        if self.eat_relation(RelOp::In) {
            children.push(node(self.parse_additive()?));
        }
        Ok(ParseNode::new(Production::Binding, children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> ParseNode {
        Parser::new(source).unwrap().parse_program().unwrap()
    }

    fn statement(source: &str) -> ParseNode {
        let program = parse(source);
        assert_eq!(program.children.len(), 1);
        let node = program.nodes().next().unwrap().clone();
        node
    }

    fn productions(node: &ParseNode) -> Vec<Production> {
        node.nodes().map(|n| n.production).collect()
    }

    #[test]
    fn test_parse_polynomial() {
        let tree = statement("x^2 + 1");
        assert_eq!(tree.production, Production::Add);
        assert_eq!(productions(&tree), vec![Production::Power, Production::Number]);
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        let tree = statement("a + b \\cdot c");
        assert_eq!(tree.production, Production::Add);
        assert_eq!(productions(&tree), vec![Production::Symbol, Production::Mul]);

        let tree = statement("2 x^2");
        assert_eq!(tree.production, Production::Juxtapose);
        assert_eq!(productions(&tree), vec![Production::Number, Production::Power]);
    }

    #[test]
    fn test_relation_is_loosest() {
        let tree = statement("x + 1 = y");
        assert_eq!(tree.production, Production::Relation);
        assert!(matches!(
            tree.children[1],
            ParseChild::Token(Token::Relation(RelOp::Eq))
        ));
    }

    #[test]
    fn test_frac_derivative_and_fallback() {
        let tree = statement("\\frac{d}{dx} x^3");
        assert_eq!(tree.production, Production::FracDerivative);
        assert_eq!(
            productions(&tree),
            vec![Production::DerivativeVariable, Production::Power]
        );

        let tree = statement("\\frac{\\partial^2 u}{\\partial x^2}");
        assert_eq!(tree.production, Production::FracDerivative);
        assert_eq!(
            productions(&tree),
            vec![
                Production::Superscript,
                Production::DerivativeVariable,
                Production::Symbol
            ]
        );

        let tree = statement("\\frac{d}{2}");
        assert_eq!(tree.production, Production::Fraction);
    }

    #[test]
    fn test_integral_stops_at_differential() {
        let tree = statement("\\int_0^1 x^2 \\, dx + 1");
        assert_eq!(tree.production, Production::Add);
        let integral = tree.nodes().next().unwrap();
        assert_eq!(integral.production, Production::Integral);
        assert_eq!(
            productions(integral),
            vec![Production::Bounds, Production::Power, Production::Differential]
        );
    }

    #[test]
    fn test_double_integral_differentials() {
        let tree = statement("\\iint_{0}^{1} x y \\, dx \\, dy");
        assert_eq!(tree.production, Production::MultiIntegral);
        let differentials = tree
            .nodes()
            .filter(|n| n.production == Production::Differential)
            .count();
        assert_eq!(differentials, 2);
    }

    #[test]
    fn test_sum_body_is_greedy() {
        let tree = statement("\\sum_{n=1}^{10} \\frac{1}{n^2} + 1");
        assert_eq!(tree.production, Production::Sum);
        assert_eq!(tree.children[0], ParseChild::Token(Token::Symbol("n".to_string())));
        assert_eq!(
            productions(&tree),
            vec![Production::Number, Production::Number, Production::Add]
        );
    }

    #[test]
    fn test_matrix_environment() {
        let tree = statement("\\begin{pmatrix} a & b \\\\ c & d \\end{pmatrix}");
        assert_eq!(tree.production, Production::Matrix);
        assert_eq!(
            productions(&tree),
            vec![Production::MatrixRow, Production::MatrixRow]
        );
    }

    #[test]
    fn test_mismatched_environment_is_error() {
        let err = Parser::new("\\begin{pmatrix} 1 \\end{bmatrix}")
            .unwrap()
            .parse_program()
            .unwrap_err();
        assert!(matches!(err, CompileError::Grammar { .. }));
    }

    #[test]
    fn test_subscript_derivative_backtracks() {
        let tree = statement("d_x f");
        assert_eq!(tree.production, Production::SubscriptDerivative);

        let tree = statement("d_1");
        assert_eq!(tree.production, Production::Subscript);
    }

    #[test]
    fn test_newline_separates_statements() {
        let program = parse("x + 1\ny");
        assert_eq!(program.children.len(), 2);

        let program = parse("\\begin{bmatrix} 1 \\\\\n 2 \\end{bmatrix}");
        assert_eq!(program.children.len(), 1);
    }

    #[test]
    fn test_nesting_limit() {
        // Deep inputs go through the library entry point, which owns a large stack
        let ok = format!("{}x{}", "(".repeat(64), ")".repeat(64));
        assert!(crate::parse(&ok).is_ok());

        let deep = format!("{}x{}", "(".repeat(200), ")".repeat(200));
        let err = crate::parse(&deep).unwrap_err();
        assert!(err.to_string().contains("nesting exceeds 128 levels"));
    }

    #[test]
    fn test_tree_height() {
        let tree = statement("a + b \\cdot c");
        assert_eq!(tree.height(), 3);
        assert_eq!(statement("x").height(), 1);

        let chain = format!("{}x", "x - ".repeat(MAX_TREE_DEPTH));
        let err = crate::parse(&chain).unwrap_err();
        assert!(err.to_string().contains("nesting exceeds 256 tree levels"));
    }

    #[test]
    fn test_fused_differentials() {
        assert_eq!(fused_differential("dx"), Some("x"));
        assert_eq!(fused_differential("dtheta"), Some("theta"));
        assert_eq!(fused_differential("d"), None);
        assert_eq!(fused_differential("dist"), None);
        assert_eq!(fused_differential("dx2"), None);
        assert_eq!(fused_differential("x"), None);

        // `dist` is a name, not a differential of `ist`
        let tree = statement("\\frac{dist}{dt}");
        assert_eq!(tree.production, Production::Fraction);
        assert_eq!(productions(&tree), vec![Production::Symbol, Production::Symbol]);

        let tree = statement("\\frac{dy}{dx}");
        assert_eq!(tree.production, Production::FracDerivative);

        let tree = statement("\\int_0^1 x \\, dtheta");
        assert_eq!(tree.nodes().last().unwrap().children, vec![
            ParseChild::Token(Token::Symbol("theta".to_string()))
        ]);

        let tree = statement("\\int_0^1 y_1 \\, dy_1");
        assert_eq!(tree.nodes().last().unwrap().children, vec![
            ParseChild::Token(Token::Symbol("y_1".to_string()))
        ]);
    }

    #[test]
    fn test_grammar_errors() {
        for source in ["x )", "\\frac{1}", "\\sin x", "x +", "\\int x"] {
            let result = Parser::new(source).and_then(|mut p| p.parse_program());
            assert!(result.is_err(), "expected failure for {:?}", source);
        }
    }
}
