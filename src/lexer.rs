//! Lexer for the LaTeX math subset using logos
//!
//! Supports tokens like:
//! - Numbers: 1, 2.5, 2e3
//! - Symbols: x, dx, alpha2
//! - Literal commands: \frac, \sum, \int, \begin, \partial, \nabla, ...
//! - Generic commands: \sin, \alpha, \operatorname, ...
//! - Relations, set and logic operators: =, \in, \cup, \land, ...
//! - Punctuation: { } ( ) [ ] _ ^ & , | ' and the row separator \\
//!
//! `\left`, `\right` and the spacing commands are dropped here, so the parser
//! never sees them.

use logos::Logos;

use crate::ast::{
    AccentKind, ExtremumKind, IntegralKind, LogicOpKind, QuantifierKind, RelOp, SetOpKind,
};
use crate::error::{CompileError, CompileResult};

/// Token types for the LaTeX math subset
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\f]+")]
pub enum Token {
    // Literals
    /// Decimal literal with an optional `e[+-]digits` exponent
    #[regex(r"[0-9]+(\.[0-9]+)?", number)]
    Number(f64),

    #[regex(r"[a-zA-Z][a-zA-Z0-9]*", |lex| lex.slice().to_string())]
    #[regex(r"[α-ωΑ-Ω]", |lex| lex.slice().to_string())]
    Symbol(String),

    /// Any `\name` that is not one of the literal commands below
    #[regex(r"\\[a-zA-Z]+", |lex| lex.slice()[1..].to_string())]
    Command(String),

    // Structural commands
    #[token("\\frac")]
    Frac,

    #[token("\\sqrt")]
    Sqrt,

    #[token("\\sum")]
    Sum,

    #[token("\\prod")]
    Prod,

    #[token("\\int")]
    Int,

    #[token("\\iint", |_| IntegralKind::Double)]
    #[token("\\iiint", |_| IntegralKind::Triple)]
    #[token("\\oint", |_| IntegralKind::Contour)]
    #[token("\\oiint", |_| IntegralKind::SurfaceContour)]
    #[token("\\oiiint", |_| IntegralKind::VolumeContour)]
    MultiInt(IntegralKind),

    #[token("\\begin")]
    Begin,

    #[token("\\end")]
    End,

    #[token("\\partial")]
    Partial,

    #[token("\\nabla")]
    Nabla,

    #[token("\\prime")]
    Prime,

    #[token("\\infty")]
    #[token("\\infinity")]
    Infinity,

    // Operators
    #[token("\\cdot")]
    Cdot,

    #[token("\\times")]
    Times,

    #[token("\\odot")]
    Odot,

    #[token("\\operatorname{mod}")]
    #[token("\\mod")]
    Mod,

    #[token("\\operatorname{argmax}", |_| ExtremumKind::ArgMax)]
    #[token("\\operatorname{argmin}", |_| ExtremumKind::ArgMin)]
    ArgExtremum(ExtremumKind),

    #[token("=", |_| RelOp::Eq)]
    #[token("\\neq", |_| RelOp::Neq)]
    #[token("\\ne", |_| RelOp::Neq)]
    #[token("<", |_| RelOp::Lt)]
    #[token("\\lt", |_| RelOp::Lt)]
    #[token(">", |_| RelOp::Gt)]
    #[token("\\gt", |_| RelOp::Gt)]
    #[token("\\le", |_| RelOp::Le)]
    #[token("\\leq", |_| RelOp::Le)]
    #[token("\\ge", |_| RelOp::Ge)]
    #[token("\\geq", |_| RelOp::Ge)]
    #[token("\\in", |_| RelOp::In)]
    #[token("\\equiv", |_| RelOp::Equiv)]
    #[token("\\approx", |_| RelOp::Approx)]
    #[token("\\sim", |_| RelOp::Sim)]
    #[token("\\subset", |_| RelOp::Subset)]
    #[token("\\subseteq", |_| RelOp::SubsetEq)]
    #[token("\\supset", |_| RelOp::Supset)]
    #[token("\\supseteq", |_| RelOp::SupsetEq)]
    Relation(RelOp),

    #[token("\\cup", |_| SetOpKind::Union)]
    #[token("\\cap", |_| SetOpKind::Intersection)]
    SetOp(SetOpKind),

    #[token("\\land", |_| LogicOpKind::And)]
    #[token("\\wedge", |_| LogicOpKind::And)]
    #[token("\\lor", |_| LogicOpKind::Or)]
    #[token("\\vee", |_| LogicOpKind::Or)]
    #[token("\\implies", |_| LogicOpKind::Implies)]
    #[token("\\Rightarrow", |_| LogicOpKind::Implies)]
    #[token("\\iff", |_| LogicOpKind::Iff)]
    #[token("\\Leftrightarrow", |_| LogicOpKind::Iff)]
    Logic(LogicOpKind),

    #[token("\\lnot")]
    #[token("\\neg")]
    Not,

    #[token("\\forall", |_| QuantifierKind::ForAll)]
    #[token("\\exists", |_| QuantifierKind::Exists)]
    Quantifier(QuantifierKind),

    #[token("\\emptyset")]
    #[token("\\varnothing")]
    EmptySet,

    #[token("\\hat", |_| AccentKind::Hat)]
    #[token("\\bar", |_| AccentKind::Bar)]
    #[token("\\vec", |_| AccentKind::Vec)]
    #[token("\\tilde", |_| AccentKind::Tilde)]
    Accent(AccentKind),

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("^")]
    Caret,

    #[token("_")]
    Underscore,

    #[token("'")]
    Apostrophe,

    // Delimiters
    #[token("{")]
    #[token("\\{")]
    LBrace,

    #[token("}")]
    #[token("\\}")]
    RBrace,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("|")]
    Bar,

    #[token("\\|")]
    DoubleBar,

    #[token("\\lvert")]
    LVert,

    #[token("\\rvert")]
    RVert,

    #[token("\\lVert")]
    LNorm,

    #[token("\\rVert")]
    RNorm,

    #[token("\\langle")]
    LAngle,

    #[token("\\rangle")]
    RAngle,

    // Punctuation
    #[token("&")]
    Ampersand,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    /// `\\`, or a lone backslash followed by whitespace
    #[token("\\\\")]
    #[regex(r"\\[ \t\n]")]
    RowSep,

    #[token("\n")]
    Newline,

    /// Delimiter sizing and spacing commands, never emitted
    #[token("\\left", logos::skip)]
    #[token("\\right", logos::skip)]
    #[token("\\,", logos::skip)]
    #[token("\\!", logos::skip)]
    #[token("\\:", logos::skip)]
    #[token("\\;", logos::skip)]
    #[token("\\quad", logos::skip)]
    #[token("\\qquad", logos::skip)]
    #[token("\\displaystyle", logos::skip)]
    Ignored,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Symbol(s) => write!(f, "{}", s),
            Token::Command(name) => write!(f, "\\{}", name),
            Token::Frac => write!(f, "\\frac"),
            Token::Sqrt => write!(f, "\\sqrt"),
            Token::Sum => write!(f, "\\sum"),
            Token::Prod => write!(f, "\\prod"),
            Token::Int => write!(f, "\\int"),
            Token::MultiInt(kind) => write!(f, "{}", kind.latex()),
            Token::Begin => write!(f, "\\begin"),
            Token::End => write!(f, "\\end"),
            Token::Partial => write!(f, "\\partial"),
            Token::Nabla => write!(f, "\\nabla"),
            Token::Prime => write!(f, "\\prime"),
            Token::Infinity => write!(f, "\\infty"),
            Token::Cdot => write!(f, "\\cdot"),
            Token::Times => write!(f, "\\times"),
            Token::Odot => write!(f, "\\odot"),
            Token::Mod => write!(f, "\\operatorname{{mod}}"),
            Token::ArgExtremum(kind) => write!(f, "{}", kind.latex()),
            Token::Relation(op) => write!(f, "{}", op.latex()),
            Token::SetOp(op) => write!(f, "{}", op.latex()),
            Token::Logic(op) => write!(f, "{}", op.latex()),
            Token::Not => write!(f, "\\lnot"),
            Token::Quantifier(kind) => write!(f, "{}", kind.latex()),
            Token::EmptySet => write!(f, "\\emptyset"),
            Token::Accent(kind) => write!(f, "{}", kind.latex()),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Caret => write!(f, "^"),
            Token::Underscore => write!(f, "_"),
            Token::Apostrophe => write!(f, "'"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Bar => write!(f, "|"),
            Token::DoubleBar => write!(f, "\\|"),
            Token::LVert => write!(f, "\\lvert"),
            Token::RVert => write!(f, "\\rvert"),
            Token::LNorm => write!(f, "\\lVert"),
            Token::RNorm => write!(f, "\\rVert"),
            Token::LAngle => write!(f, "\\langle"),
            Token::RAngle => write!(f, "\\rangle"),
            Token::Ampersand => write!(f, "&"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::RowSep => write!(f, "\\\\"),
            Token::Newline => write!(f, "newline"),
            Token::Ignored => Ok(()),
        }
    }
}

/// Lexer wrapper that provides a stream of tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Lex the whole input up front.
    ///
    /// Newlines separate statements only at the top level: inside an open
    /// group or environment they are dropped, as are leading, trailing and
    /// repeated newlines.
    pub fn tokenize(mut self) -> CompileResult<Vec<Token>> {
        let mut tokens: Vec<Token> = Vec::new();
        let mut depth = 0usize;

        while let Some(result) = self.next() {
            let token = result.map_err(|_| {
                CompileError::grammar(format!("unrecognized input `{}`", self.inner.slice()))
            })?;

            match token {
                Token::LBrace | Token::LParen | Token::LBracket | Token::Begin => depth += 1,
                Token::RBrace | Token::RParen | Token::RBracket | Token::End => {
                    depth = depth.saturating_sub(1)
                }
                Token::Newline => {
                    if depth > 0 || matches!(tokens.last(), None | Some(Token::Newline)) {
                        continue;
                    }
                }
                _ => {}
            }
            tokens.push(token);
        }

        if tokens.last() == Some(&Token::Newline) {
            tokens.pop();
        }
        Ok(tokens)
    }
}

/// Number callback: takes an exponent suffix when digits follow the `e`,
/// so `2e3` is one literal while `2e` stays `2` times Euler's constant
fn number(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    lex.bump(exponent_len(lex.remainder()));
    lex.slice().parse().ok()
}

fn exponent_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    if !matches!(bytes.first(), Some(b'e' | b'E')) {
        return 0;
    }
    let sign = usize::from(matches!(bytes.get(1), Some(b'+' | b'-')));
    let digits = bytes[1 + sign..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        0
    } else {
        1 + sign + digits
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
