//! Expression language for rule conditions and custom operations.
//!
//! ```text
//! region == "emea" && len(items) > 0
//! not (risk_score >= 80) or override = true
//! revenue - cost
//! ```
//!
//! Paths resolve against the working data; missing paths are null.
//! `and`/`or`/`not` are accepted as keywords (any case) next to
//! `&&`/`||`/`!`, and a single `=` compares like `==`.

use std::fmt;
use std::str::FromStr;
use tally_core::DataValue;

/// Maximum expression tree depth: parentheses, unary operators and each
/// chained binary operator all count against it
const MAX_DEPTH: usize = 64;

/// Expression errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    /// Malformed source
    #[error("Syntax error at {position}: {message}")]
    Syntax {
        /// Byte offset into the source
        position: usize,
        /// What went wrong
        message: String,
    },
    /// Source ended mid-expression
    #[error("Unexpected end of expression")]
    UnexpectedEnd,
    /// Call to a function other than `len`/`exists`
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    /// Operator applied to values it is not defined for
    #[error("Type mismatch: cannot apply '{operator}' to {found}")]
    TypeMismatch {
        /// Operator symbol
        operator: String,
        /// Kinds of the operands
        found: String,
    },
    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==` or `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Operator symbol
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
        }
    }
}

/// Arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl ArithOp {
    /// Operator symbol
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Built-in function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Element count of the value at a path (text length for text)
    Len,
    /// Whether a path resolves to a non-null value
    Exists,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "len" => Some(Self::Len),
            "exists" => Some(Self::Exists),
            _ => None,
        }
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant
    Literal(DataValue),
    /// Dotted path into the data
    Path(String),
    /// Logical and (short-circuit)
    And(Box<Expr>, Box<Expr>),
    /// Logical or (short-circuit)
    Or(Box<Expr>, Box<Expr>),
    /// Logical not
    Not(Box<Expr>),
    /// Comparison
    Compare {
        /// Operator
        op: CompareOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Arithmetic
    Arith {
        /// Operator
        op: ArithOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Numeric negation
    Neg(Box<Expr>),
    /// Function applied to a path
    Call {
        /// Function
        func: Function,
        /// Argument path
        path: String,
    },
}

impl Expr {
    /// Evaluate against `data`
    ///
    /// # Errors
    ///
    /// Returns error on arithmetic over non-numbers or division by zero
    pub fn eval(&self, data: &DataValue) -> Result<DataValue, ConditionError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Path(path) => Ok(data.lookup(path).cloned().unwrap_or_default()),
            Self::And(left, right) => {
                let value = left.eval(data)?.is_truthy() && right.eval(data)?.is_truthy();
                Ok(DataValue::bool(value))
            }
            Self::Or(left, right) => {
                let value = left.eval(data)?.is_truthy() || right.eval(data)?.is_truthy();
                Ok(DataValue::bool(value))
            }
            Self::Not(inner) => Ok(DataValue::bool(!inner.eval(data)?.is_truthy())),
            Self::Compare { op, left, right } => {
                let l = left.eval(data)?;
                let r = right.eval(data)?;
                Ok(DataValue::bool(compare(*op, &l, &r)))
            }
            Self::Arith { op, left, right } => {
                let l = left.eval(data)?;
                let r = right.eval(data)?;
                arith(*op, &l, &r)
            }
            Self::Neg(inner) => {
                let value = inner.eval(data)?;
                value
                    .as_f64()
                    .map(|n| DataValue::number(-n))
                    .ok_or_else(|| ConditionError::TypeMismatch {
                        operator: "-".to_string(),
                        found: value.kind().to_string(),
                    })
            }
            Self::Call { func, path } => {
                let target = data.lookup(path);
                Ok(match func {
                    Function::Exists => DataValue::bool(target.is_some_and(|v| !v.is_null())),
                    Function::Len => {
                        let len = match target {
                            Some(v) => v.as_str().map_or_else(|| v.element_count(), |s| s.chars().count()),
                            None => 0,
                        };
                        DataValue::from(len)
                    }
                })
            }
        }
    }
}

fn compare(op: CompareOp, left: &DataValue, right: &DataValue) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l.partial_cmp(&r).is_some_and(|ord| op.holds(ord));
    }
    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return op.holds(l.cmp(r));
    }
    match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        _ => false,
    }
}

fn arith(op: ArithOp, left: &DataValue, right: &DataValue) -> Result<DataValue, ConditionError> {
    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return Err(ConditionError::TypeMismatch {
            operator: op.symbol().to_string(),
            found: format!("{} and {}", left.kind(), right.kind()),
        });
    };
    let value = match op {
        ArithOp::Add => l + r,
        ArithOp::Sub => l - r,
        ArithOp::Mul => l * r,
        ArithOp::Div => {
            if r == 0.0 {
                return Err(ConditionError::DivisionByZero);
            }
            l / r
        }
    };
    Ok(DataValue::number(value))
}

/// A parsed expression together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parse an expression
    ///
    /// # Errors
    ///
    /// Returns error if the source is not a well-formed expression
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            end: source.len(),
        };
        let root = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(ConditionError::Syntax {
                position: token.position,
                message: format!("unexpected {}", token.kind.describe()),
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Source text
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expression tree
    #[must_use]
    pub const fn root(&self) -> &Expr {
        &self.root
    }

    /// Evaluate to a value
    ///
    /// # Errors
    ///
    /// Returns error if evaluation fails
    pub fn evaluate(&self, data: &DataValue) -> Result<DataValue, ConditionError> {
        self.root.eval(data)
    }

    /// Evaluate and test truthiness
    ///
    /// # Errors
    ///
    /// Returns error if evaluation fails
    pub fn holds(&self, data: &DataValue) -> Result<bool, ConditionError> {
        Ok(self.evaluate(data)?.is_truthy())
    }
}

impl FromStr for Expression {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Compare(CompareOp),
    Arith(ArithOp),
    LParen,
    RParen,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            Self::Number(n) => format!("number {n}"),
            Self::Str(s) => format!("string \"{s}\""),
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::True => "'true'".to_string(),
            Self::False => "'false'".to_string(),
            Self::Null => "'null'".to_string(),
            Self::And => "'&&'".to_string(),
            Self::Or => "'||'".to_string(),
            Self::Not => "'!'".to_string(),
            Self::Compare(op) => format!("'{}'", op.symbol()),
            Self::Arith(op) => format!("'{}'", op.symbol()),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ConditionError> {
        let mut tokens = Vec::new();
        while let Some(&(position, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            let kind = match c {
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '+' => self.single(TokenKind::Arith(ArithOp::Add)),
                '-' => self.single(TokenKind::Arith(ArithOp::Sub)),
                '*' => self.single(TokenKind::Arith(ArithOp::Mul)),
                '/' => self.single(TokenKind::Arith(ArithOp::Div)),
                '=' => {
                    self.chars.next();
                    self.eat('=');
                    TokenKind::Compare(CompareOp::Eq)
                }
                '!' => {
                    self.chars.next();
                    if self.eat('=') {
                        TokenKind::Compare(CompareOp::Ne)
                    } else {
                        TokenKind::Not
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.eat('=') {
                        TokenKind::Compare(CompareOp::Le)
                    } else {
                        TokenKind::Compare(CompareOp::Lt)
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.eat('=') {
                        TokenKind::Compare(CompareOp::Ge)
                    } else {
                        TokenKind::Compare(CompareOp::Gt)
                    }
                }
                '&' | '|' => {
                    self.chars.next();
                    if !self.eat(c) {
                        return Err(ConditionError::Syntax {
                            position,
                            message: format!("expected '{c}{c}'"),
                        });
                    }
                    if c == '&' { TokenKind::And } else { TokenKind::Or }
                }
                '"' | '\'' => self.string(position, c)?,
                c if c.is_ascii_digit() => self.number(position)?,
                c if c.is_alphabetic() || c == '_' => self.word(position),
                other => {
                    return Err(ConditionError::Syntax {
                        position,
                        message: format!("unexpected character '{other}'"),
                    });
                }
            };
            tokens.push(Token { kind, position });
        }
        Ok(tokens)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.chars.next();
        kind
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek().is_some_and(|&(_, c)| c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn take_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> &'a str {
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            end = i + c.len_utf8();
            self.chars.next();
        }
        &self.source[start..end]
    }

    fn number(&mut self, start: usize) -> Result<TokenKind, ConditionError> {
        let text = self.take_while(start, |c| c.is_ascii_digit() || c == '.');
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ConditionError::Syntax {
                position: start,
                message: format!("invalid number '{text}'"),
            })
    }

    fn word(&mut self, start: usize) -> TokenKind {
        let text = self.take_while(start, |c| c.is_alphanumeric() || c == '_' || c == '.');
        match text.to_ascii_lowercase().as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            _ => TokenKind::Ident(text.to_string()),
        }
    }

    fn string(&mut self, start: usize, quote: char) -> Result<TokenKind, ConditionError> {
        self.chars.next();
        let mut value = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '\\' => match self.chars.next() {
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                c if c == quote => return Ok(TokenKind::Str(value)),
                c => value.push(c),
            }
        }
        Err(ConditionError::Syntax {
            position: start,
            message: "unterminated string".to_string(),
        })
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self) -> Result<Token, ConditionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ConditionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn position(&self) -> usize {
        self.peek().map_or(self.end, |t| t.position)
    }

    fn nest(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::Syntax {
                position: self.position(),
                message: "expression nested too deeply".to_string(),
            });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        let depth = self.depth;
        while self.peek_kind() == Some(&TokenKind::Or) {
            self.pos += 1;
            self.nest()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_not()?;
        let depth = self.depth;
        while self.peek_kind() == Some(&TokenKind::And) {
            self.pos += 1;
            self.nest()?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        if self.peek_kind() == Some(&TokenKind::Not) {
            self.pos += 1;
            self.nest()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_sum()?;
        if let Some(TokenKind::Compare(op)) = self.peek_kind() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_sum()?;
            return Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_sum(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_product()?;
        let depth = self.depth;
        while let Some(TokenKind::Arith(op @ (ArithOp::Add | ArithOp::Sub))) = self.peek_kind() {
            let op = *op;
            self.pos += 1;
            self.nest()?;
            let right = self.parse_product()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary()?;
        let depth = self.depth;
        while let Some(TokenKind::Arith(op @ (ArithOp::Mul | ArithOp::Div))) = self.peek_kind() {
            let op = *op;
            self.pos += 1;
            self.nest()?;
            let right = self.parse_unary()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek_kind() == Some(&TokenKind::Arith(ArithOp::Sub)) {
            self.pos += 1;
            self.nest()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, ConditionError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(DataValue::number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(DataValue::text(s))),
            TokenKind::True => Ok(Expr::Literal(DataValue::bool(true))),
            TokenKind::False => Ok(Expr::Literal(DataValue::bool(false))),
            TokenKind::Null => Ok(Expr::Literal(DataValue::null())),
            TokenKind::LParen => {
                self.nest()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                self.expect_rparen()?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if self.peek_kind() != Some(&TokenKind::LParen) {
                    return Ok(Expr::Path(name));
                }
                let func = Function::from_name(&name)
                    .ok_or_else(|| ConditionError::UnknownFunction(name.clone()))?;
                self.pos += 1;
                let arg = self.next()?;
                let TokenKind::Ident(path) = arg.kind else {
                    return Err(ConditionError::Syntax {
                        position: arg.position,
                        message: format!("{name}() expects a path argument"),
                    });
                };
                self.expect_rparen()?;
                Ok(Expr::Call { func, path })
            }
            other => Err(ConditionError::Syntax {
                position: token.position,
                message: format!("unexpected {}", other.describe()),
            }),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ConditionError> {
        let token = self.next()?;
        if token.kind == TokenKind::RParen {
            Ok(())
        } else {
            Err(ConditionError::Syntax {
                position: token.position,
                message: format!("expected ')', found {}", token.kind.describe()),
            })
        }
    }
}
