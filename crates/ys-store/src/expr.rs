//! Compiled selection/weight/variable expressions over named columns.
//!
//! Supports arithmetic (`+ - * /`), comparisons (`== != < <= > >=`),
//! boolean operators (`&& || !`), unary minus, and the built-in functions
//! `abs`, `sqrt`, `log`, `exp`, `pow`, `min`, `max`. Boolean results are
//! encoded numerically: true is 1.0, false is 0.0, and any value > 0 is
//! treated as true.

use rayon::prelude::*;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    /// Left binding power; higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 3,
            BinOp::Add | BinOp::Sub => 4,
            BinOp::Mul | BinOp::Div => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Builtin {
    fn lookup(name: &str) -> Option<(Builtin, usize)> {
        Some(match name {
            "abs" => (Builtin::Abs, 1),
            "sqrt" => (Builtin::Sqrt, 1),
            "log" => (Builtin::Log, 1),
            "exp" => (Builtin::Exp, 1),
            "pow" => (Builtin::Pow, 2),
            "min" => (Builtin::Min, 2),
            "max" => (Builtin::Max, 2),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    /// Index into [`Formula::columns`].
    Column(usize),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(Builtin, Vec<Node>),
}

/// A parsed expression ready for row-wise or bulk evaluation.
#[derive(Debug, Clone)]
pub struct Formula {
    root: Node,
    /// Column names referenced by the expression, ordered by first use.
    pub columns: Vec<String>,
}

impl Formula {
    /// Parse and compile an expression string.
    ///
    /// Identifiers that are not built-in function names become column
    /// references.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = Lexer::new(input).run()?;
        let mut parser = Parser { tokens: &tokens, pos: 0, columns: Vec::new() };
        let root = parser.expression(0)?;
        if let Some(tok) = parser.peek() {
            return Err(StoreError::Expression(format!(
                "unexpected trailing token: {tok:?}"
            )));
        }
        Ok(Formula { root, columns: parser.columns })
    }

    /// Evaluate for a single row; `values` matches [`Formula::columns`].
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        eval(&self.root, values)
    }

    /// Evaluate for all rows. `columns` matches [`Formula::columns`] and
    /// all slices must have equal length. A constant expression produces a
    /// single value.
    pub fn eval_bulk(&self, columns: &[&[f64]]) -> Vec<f64> {
        if columns.is_empty() {
            return vec![eval(&self.root, &[])];
        }
        let n = columns[0].len();
        (0..n)
            .into_par_iter()
            .map_init(
                || vec![0.0f64; columns.len()],
                |row, i| {
                    for (slot, col) in row.iter_mut().zip(columns) {
                        *slot = col[i];
                    }
                    eval(&self.root, row)
                },
            )
            .collect()
    }

    /// Whether the expression references no columns.
    pub fn is_constant(&self) -> bool {
        self.columns.is_empty()
    }
}

fn truthy(x: f64) -> bool {
    x > 0.0
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval(node: &Node, values: &[f64]) -> f64 {
    match node {
        Node::Const(c) => *c,
        Node::Column(i) => values[*i],
        Node::Neg(inner) => -eval(inner, values),
        Node::Not(inner) => bool_to_f64(!truthy(eval(inner, values))),
        Node::Binary(op, lhs, rhs) => {
            let a = eval(lhs, values);
            let b = eval(rhs, values);
            match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Eq => bool_to_f64(a == b),
                BinOp::Ne => bool_to_f64(a != b),
                BinOp::Lt => bool_to_f64(a < b),
                BinOp::Le => bool_to_f64(a <= b),
                BinOp::Gt => bool_to_f64(a > b),
                BinOp::Ge => bool_to_f64(a >= b),
                BinOp::And => bool_to_f64(truthy(a) && truthy(b)),
                BinOp::Or => bool_to_f64(truthy(a) || truthy(b)),
            }
        }
        Node::Call(f, args) => {
            let x = eval(&args[0], values);
            match f {
                Builtin::Abs => x.abs(),
                Builtin::Sqrt => x.sqrt(),
                Builtin::Log => x.ln(),
                Builtin::Exp => x.exp(),
                Builtin::Pow => x.powf(eval(&args[1], values)),
                Builtin::Min => x.min(eval(&args[1], values)),
                Builtin::Max => x.max(eval(&args[1], values)),
            }
        }
    }
}

// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(BinOp),
    Bang,
    LParen,
    RParen,
    Comma,
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, bytes: src.as_bytes(), pos: 0 }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut out = Vec::new();
        while let Some(tok) = self.next_token()? {
            out.push(tok);
        }
        Ok(out)
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        while matches!(self.peek_byte(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        let Some(b) = self.peek_byte() else {
            return Ok(None);
        };

        let two = self.bytes.get(self.pos..self.pos + 2);
        let double = match two {
            Some(b"&&") => Some(BinOp::And),
            Some(b"||") => Some(BinOp::Or),
            Some(b"==") => Some(BinOp::Eq),
            Some(b"!=") => Some(BinOp::Ne),
            Some(b"<=") => Some(BinOp::Le),
            Some(b">=") => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = double {
            self.pos += 2;
            return Ok(Some(Token::Op(op)));
        }

        let single = match b {
            b'+' => Some(Token::Op(BinOp::Add)),
            b'-' => Some(Token::Op(BinOp::Sub)),
            b'*' => Some(Token::Op(BinOp::Mul)),
            b'/' => Some(Token::Op(BinOp::Div)),
            b'<' => Some(Token::Op(BinOp::Lt)),
            b'>' => Some(Token::Op(BinOp::Gt)),
            b'!' => Some(Token::Bang),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b',' => Some(Token::Comma),
            _ => None,
        };
        if let Some(tok) = single {
            self.pos += 1;
            return Ok(Some(tok));
        }

        if b.is_ascii_digit() || b == b'.' {
            return self.number().map(Some);
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            return self.ident().map(Some);
        }
        Err(StoreError::Expression(format!(
            "unexpected character '{}' at offset {}",
            b as char, self.pos
        )))
    }

    fn number(&mut self) -> Result<Token> {
        let start = self.pos;
        while let Some(b) = self.peek_byte() {
            let is_exp_sign = (b == b'+' || b == b'-')
                && matches!(self.bytes.get(self.pos.wrapping_sub(1)), Some(b'e') | Some(b'E'));
            if b.is_ascii_digit() || b == b'.' || b == b'e' || b == b'E' || is_exp_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| StoreError::Expression(format!("invalid number: '{text}'")))
    }

    fn ident(&mut self) -> Result<Token> {
        let start = self.pos;
        while matches!(self.peek_byte(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        Ok(Token::Ident(self.src[start..self.pos].to_string()))
    }
}

// Parser, precedence climbing

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    columns: Vec<String>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &Token) -> Result<()> {
        match self.bump() {
            Some(ref tok) if tok == want => Ok(()),
            other => Err(StoreError::Expression(format!("expected {want:?}, got {other:?}"))),
        }
    }

    fn column_index(&mut self, name: &str) -> usize {
        match self.columns.iter().position(|c| c == name) {
            Some(i) => i,
            None => {
                self.columns.push(name.to_string());
                self.columns.len() - 1
            }
        }
    }

    fn expression(&mut self, min_prec: u8) -> Result<Node> {
        let mut lhs = self.prefix()?;
        while let Some(&Token::Op(op)) = self.peek() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.bump();
            let rhs = self.expression(prec + 1)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Node> {
        match self.peek() {
            Some(Token::Op(BinOp::Sub)) => {
                self.bump();
                Ok(Node::Neg(Box::new(self.prefix()?)))
            }
            Some(Token::Bang) => {
                self.bump();
                Ok(Node::Not(Box::new(self.prefix()?)))
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Node> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Node::Const(n)),
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.call(&name)
                } else {
                    let idx = self.column_index(&name);
                    Ok(Node::Column(idx))
                }
            }
            other => Err(StoreError::Expression(format!(
                "expected number, identifier, or '(', got {other:?}"
            ))),
        }
    }

    fn call(&mut self, name: &str) -> Result<Node> {
        let Some((builtin, arity)) = Builtin::lookup(name) else {
            return Err(StoreError::Expression(format!("unknown function: '{name}'")));
        };
        self.expect(&Token::LParen)?;
        let mut args = vec![self.expression(0)?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.bump();
            args.push(self.expression(0)?);
        }
        self.expect(&Token::RParen)?;
        if args.len() != arity {
            return Err(StoreError::Expression(format!(
                "'{name}' takes {arity} argument(s), got {}",
                args.len()
            )));
        }
        Ok(Node::Call(builtin, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn precedence_and_constants() {
        let f = Formula::compile("2 + 3 * 4").unwrap();
        assert!(f.is_constant());
        assert_abs_diff_eq!(f.eval_row(&[]), 14.0, epsilon = 1e-12);

        let f = Formula::compile("(1 + 2) * (3 + 4)").unwrap();
        assert_abs_diff_eq!(f.eval_row(&[]), 21.0, epsilon = 1e-12);
    }

    #[test]
    fn column_references_in_first_use_order() {
        let f = Formula::compile("pt * weight_mc").unwrap();
        assert_eq!(f.columns, vec!["pt", "weight_mc"]);
        assert_abs_diff_eq!(f.eval_row(&[100.0, 0.5]), 50.0, epsilon = 1e-12);
    }

    #[test]
    fn boolean_selection() {
        let f = Formula::compile("njet >= 4 && pt_lead > 25.0").unwrap();
        assert_eq!(f.columns, vec!["njet", "pt_lead"]);
        assert_eq!(f.eval_row(&[4.0, 30.0]), 1.0);
        assert_eq!(f.eval_row(&[3.0, 30.0]), 0.0);
        assert_eq!(f.eval_row(&[4.0, 20.0]), 0.0);
    }

    #[test]
    fn or_and_not() {
        let f = Formula::compile("x > 5 || y < 2").unwrap();
        assert_eq!(f.eval_row(&[6.0, 3.0]), 1.0);
        assert_eq!(f.eval_row(&[3.0, 1.0]), 1.0);
        assert_eq!(f.eval_row(&[3.0, 3.0]), 0.0);

        let f = Formula::compile("!(x > 3)").unwrap();
        assert_eq!(f.eval_row(&[2.0]), 1.0);
        assert_eq!(f.eval_row(&[5.0]), 0.0);
    }

    #[test]
    fn builtins() {
        let f = Formula::compile("sqrt(x)").unwrap();
        assert_abs_diff_eq!(f.eval_row(&[9.0]), 3.0, epsilon = 1e-12);

        let f = Formula::compile("pow(x, 2)").unwrap();
        assert_abs_diff_eq!(f.eval_row(&[3.0]), 9.0, epsilon = 1e-12);

        let f = Formula::compile("max(a, b) + min(a, b)").unwrap();
        assert_abs_diff_eq!(f.eval_row(&[3.0, 7.0]), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn unary_minus() {
        let f = Formula::compile("-x + 1").unwrap();
        assert_abs_diff_eq!(f.eval_row(&[5.0]), -4.0, epsilon = 1e-12);
    }

    #[test]
    fn scientific_notation() {
        let f = Formula::compile("1.5e2 + 3.0E-1").unwrap();
        assert_abs_diff_eq!(f.eval_row(&[]), 150.3, epsilon = 1e-12);
    }

    #[test]
    fn bulk_evaluation() {
        let f = Formula::compile("a + b").unwrap();
        let a = [1.0, 2.0, 3.0];
        let b = [10.0, 20.0, 30.0];
        assert_eq!(f.eval_bulk(&[&a, &b]), vec![11.0, 22.0, 33.0]);
    }

    #[test]
    fn arity_is_checked() {
        assert!(Formula::compile("pow(x)").is_err());
        assert!(Formula::compile("abs(x, y)").is_err());
    }

    #[test]
    fn malformed_inputs_rejected() {
        assert!(Formula::compile("x +").is_err());
        assert!(Formula::compile("(x").is_err());
        assert!(Formula::compile("x $ y").is_err());
        assert!(Formula::compile("foo(x)").is_err());
        assert!(Formula::compile("1 2").is_err());
    }
}
