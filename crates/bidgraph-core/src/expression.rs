//! Fixed-grammar arithmetic expressions used by formulas, metrics and
//! inclusion comparisons.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := comparison ( "&&" comparison )*
//! comparison := additive ( ( "<" | "<=" | ">" | ">=" | "==" | "!=" ) additive )?
//! additive   := term ( ( "+" | "-" ) term )*
//! term       := power ( ( "*" | "/" | "%" ) power )*
//! power      := unary ( "^" power )?
//! unary      := ( "-" | "!" ) unary | primary
//! primary    := number | ident | ident "(" args ")" | "(" expr ")"
//! ```
//!
//! Booleans are numbers: comparisons yield 1 or 0 and any non-zero value is true.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unexpected token {found} at {pos}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        pos: usize,
    },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("empty expression")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    fn apply(self, l: f64, r: f64) -> f64 {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            BinaryOp::Rem => l % r,
            BinaryOp::Pow => l.powf(r),
            BinaryOp::Lt => truth(l < r),
            BinaryOp::Le => truth(l <= r),
            BinaryOp::Gt => truth(l > r),
            BinaryOp::Ge => truth(l >= r),
            BinaryOp::Eq => truth(l == r),
            BinaryOp::Ne => truth(l != r),
            BinaryOp::And => truth(l != 0.0 && r != 0.0),
            BinaryOp::Or => truth(l != 0.0 || r != 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(s) => write!(f, "'{}'", s),
            Token::Op(op) => write!(f, "'{}'", op),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

const TWO_CHAR_OPS: [&str; 6] = ["<=", ">=", "==", "!=", "&&", "||"];
const ONE_CHAR_OPS: [&str; 9] = ["+", "-", "*", "/", "%", "^", "<", ">", "!"];

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // scientific notation: 1e-3
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| ExpressionError::UnexpectedChar { ch: c, pos: start })?;
            out.push((Token::Number(value), start));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            out.push((Token::Ident(chars[start..i].iter().collect()), start));
            continue;
        }
        match c {
            '(' => out.push((Token::LParen, i)),
            ')' => out.push((Token::RParen, i)),
            ',' => out.push((Token::Comma, i)),
            _ => {
                let pair: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                    out.push((Token::Op(*op), i));
                    i += 2;
                    continue;
                }
                let single = c.to_string();
                match ONE_CHAR_OPS.iter().find(|op| **op == single) {
                    Some(op) => out.push((Token::Op(*op), i)),
                    None => return Err(ExpressionError::UnexpectedChar { ch: c, pos: i }),
                }
            }
        }
        i += 1;
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        if let Some(Token::Op(op)) = self.peek() {
            if let Some(found) = ops.iter().find(|o| *o == op) {
                self.pos += 1;
                return Some(*found);
            }
        }
        None
    }

    fn expect(&mut self, want: Token, label: &str) -> Result<(), ExpressionError> {
        match self.next() {
            Some((tok, _)) if tok == want => Ok(()),
            Some((tok, pos)) => Err(ExpressionError::UnexpectedToken {
                found: tok.to_string(),
                expected: label.to_string(),
                pos,
            }),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn binary_chain(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<Expr, ExpressionError>,
    ) -> Result<Expr, ExpressionError> {
        let mut left = next(self)?;
        while let Some(op) = self.eat_op(ops) {
            let right = next(self)?;
            left = Expr::Binary(op_from_str(op), Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_chain(&["||"], Self::and)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_chain(&["&&"], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.additive()?;
        if let Some(op) = self.eat_op(&["<=", ">=", "==", "!=", "<", ">"]) {
            let right = self.additive()?;
            return Ok(Expr::Binary(op_from_str(op), Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_chain(&["+", "-"], Self::term)
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_chain(&["*", "/", "%"], Self::power)
    }

    fn power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.unary()?;
        if self.eat_op(&["^"]).is_some() {
            let exp = self.power()?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_op(&["-"]).is_some() {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat_op(&["!"]).is_some() {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat_op(&["+"]).is_some() {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            Some((Token::Number(n), _)) => Ok(Expr::Number(n)),
            Some((Token::Ident(name), _)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.or()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(Token::RParen, "')'")?;
                    check_call(&name, args.len())?;
                    Ok(Expr::Call(name.to_lowercase(), args))
                } else {
                    match name.to_lowercase().as_str() {
                        "true" => Ok(Expr::Number(1.0)),
                        "false" => Ok(Expr::Number(0.0)),
                        _ => Ok(Expr::Variable(name)),
                    }
                }
            }
            Some((Token::LParen, _)) => {
                let inner = self.or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some((tok, pos)) => Err(ExpressionError::UnexpectedToken {
                found: tok.to_string(),
                expected: "a number, name or '('".to_string(),
                pos,
            }),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

fn op_from_str(op: &str) -> BinaryOp {
    match op {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "^" => BinaryOp::Pow,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "&&" => BinaryOp::And,
        _ => BinaryOp::Or,
    }
}

fn check_call(name: &str, got: usize) -> Result<(), ExpressionError> {
    let expected = match name.to_lowercase().as_str() {
        "abs" | "round" | "ceil" | "floor" | "sqrt" | "ln" | "exp" => 1,
        "pow" | "log" => 2,
        "if" => 3,
        "min" | "max" => {
            if got == 0 {
                return Err(ExpressionError::Arity {
                    name: name.to_string(),
                    expected: 1,
                    got,
                });
            }
            return Ok(());
        }
        _ => return Err(ExpressionError::UnknownFunction(name.to_string())),
    };
    if got != expected {
        return Err(ExpressionError::Arity {
            name: name.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}

/// A parsed expression, ready to evaluate against any variable source.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.or()?;
        if let Some((tok, pos)) = parser.next() {
            return Err(ExpressionError::UnexpectedToken {
                found: tok.to_string(),
                expected: "end of expression".to_string(),
                pos,
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of every variable referenced by the expression.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_vars(&self.root, &mut out);
        out
    }

    /// Evaluate with `lookup` supplying variable values. The result may be
    /// non-finite (e.g. division by zero); callers decide how to treat it.
    pub fn evaluate<F>(&self, lookup: F) -> Result<f64, ExpressionError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        eval(&self.root, &lookup)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_vars(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Variable(name) => {
            out.insert(name.clone());
        }
        Expr::Neg(inner) | Expr::Not(inner) => collect_vars(inner, out),
        Expr::Binary(_, l, r) => {
            collect_vars(l, out);
            collect_vars(r, out);
        }
        Expr::Call(_, args) => args.iter().for_each(|a| collect_vars(a, out)),
    }
}

fn eval<F>(expr: &Expr, lookup: &F) -> Result<f64, ExpressionError>
where
    F: Fn(&str) -> Option<f64>,
{
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Variable(name) => {
            lookup(name).ok_or_else(|| ExpressionError::UnknownVariable(name.clone()))
        }
        Expr::Neg(inner) => Ok(-eval(inner, lookup)?),
        Expr::Not(inner) => Ok(if eval(inner, lookup)? == 0.0 { 1.0 } else { 0.0 }),
        Expr::Binary(op, l, r) => {
            let left = eval(l, lookup)?;
            let right = eval(r, lookup)?;
            Ok(op.apply(left, right))
        }
        Expr::Call(name, args) => {
            if name == "if" {
                let cond = eval(&args[0], lookup)?;
                return if cond != 0.0 {
                    eval(&args[1], lookup)
                } else {
                    eval(&args[2], lookup)
                };
            }
            let values = args
                .iter()
                .map(|a| eval(a, lookup))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match name.as_str() {
                "abs" => values[0].abs(),
                "round" => values[0].round(),
                "ceil" => values[0].ceil(),
                "floor" => values[0].floor(),
                "sqrt" => values[0].sqrt(),
                "ln" => values[0].ln(),
                "exp" => values[0].exp(),
                "pow" => values[0].powf(values[1]),
                "log" => values[0].log(values[1]),
                "min" => values.iter().copied().fold(f64::INFINITY, f64::min),
                "max" => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                other => return Err(ExpressionError::UnknownFunction(other.to_string())),
            })
        }
    }
}
