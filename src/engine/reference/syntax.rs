//! Lexer and parser for the reference engine's scripting dialect.
//!
//! The dialect is deliberately small: global and field assignments, named
//! function definitions, `return` with multiple values, calls, arithmetic,
//! string concatenation (`..`), table constructors, and the usual literals.
//! Line comments start with `--`.

use super::ScriptFn;
use crate::engine::EngineFault;
use std::rc::Rc;

// ============================================================================
// AST
// ============================================================================

#[derive(Debug)]
pub(crate) enum Stmt {
    /// `target = expr`
    Assign(Target, Expr),
    /// `return e1, e2, ...`
    Return(Vec<Expr>),
    /// A bare call used for its side effects.
    Expr(Expr),
}

#[derive(Debug)]
pub(crate) enum Target {
    Global(String),
    /// `base.field = expr`
    Field(Expr, String),
}

#[derive(Debug)]
pub(crate) enum Expr {
    Nil,
    True,
    False,
    Number(f64),
    Text(String),
    Name(String),
    Field(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    TableCtor(Vec<(FieldKey, Expr)>),
    Function(Rc<ScriptFn>),
}

#[derive(Debug)]
pub(crate) enum FieldKey {
    Named(String),
    /// Consecutive positional entries become numeric keys 1, 2, ...
    Positional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Number(f64),
    Text(String),
    // Keywords.
    Function,
    End,
    Return,
    Nil,
    True,
    False,
    // Punctuation.
    Assign,
    Dot,
    Concat,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
}

struct Lexed {
    token: Token,
    line: usize,
}

fn lex(source: &str, chunk_name: &str) -> Result<Vec<Lexed>, EngineFault> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    let err = |line: usize, msg: String| {
        EngineFault::Compile(format!("{chunk_name}:{line}: {msg}"))
    };

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '-' => {
                chars.next();
                if chars.peek() == Some(&'-') {
                    // Line comment.
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            break;
                        }
                    }
                } else {
                    tokens.push(Lexed { token: Token::Minus, line });
                }
            }
            '.' => {
                chars.next();
                if chars.peek() == Some(&'.') {
                    chars.next();
                    tokens.push(Lexed { token: Token::Concat, line });
                } else {
                    tokens.push(Lexed { token: Token::Dot, line });
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None => return Err(err(line, "unterminated string".to_string())),
                        Some(c) if c == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('\\') => text.push('\\'),
                            Some(c @ ('"' | '\'')) => text.push(c),
                            other => {
                                return Err(err(
                                    line,
                                    format!("invalid escape sequence {other:?}"),
                                ))
                            }
                        },
                        Some('\n') => {
                            return Err(err(line, "unterminated string".to_string()))
                        }
                        Some(c) => text.push(c),
                    }
                }
                tokens.push(Lexed { token: Token::Text(text), line });
            }
            c if c.is_ascii_digit() => {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        // `..` after a number is the concat operator.
                        if c == '.' && number.contains('.') {
                            break;
                        }
                        if c == '.' {
                            let mut lookahead = chars.clone();
                            lookahead.next();
                            if lookahead.peek() == Some(&'.') {
                                break;
                            }
                        }
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = number
                    .parse::<f64>()
                    .map_err(|_| err(line, format!("malformed number '{number}'")))?;
                tokens.push(Lexed { token: Token::Number(value), line });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match name.as_str() {
                    "function" => Token::Function,
                    "end" => Token::End,
                    "return" => Token::Return,
                    "nil" => Token::Nil,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Name(name),
                };
                tokens.push(Lexed { token, line });
            }
            _ => {
                chars.next();
                let token = match c {
                    '=' => Token::Assign,
                    ',' => Token::Comma,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '+' => Token::Plus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    _ => return Err(err(line, format!("unexpected character '{c}'"))),
                };
                tokens.push(Lexed { token, line });
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

/// Parse a chunk into its statement list.
pub(crate) fn parse(source: &str, chunk_name: &str) -> Result<Vec<Stmt>, EngineFault> {
    let tokens = lex(source, chunk_name)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        chunk_name,
    };
    let block = parser.parse_block()?;
    if let Some(t) = parser.peek() {
        return Err(parser.error(format!("unexpected token {t:?}")));
    }
    Ok(block)
}

struct Parser<'a> {
    tokens: Vec<Lexed>,
    pos: usize,
    chunk_name: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|l| l.token.clone());
        self.pos += 1;
        t
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map_or(0, |l| l.line)
    }

    fn error(&self, msg: String) -> EngineFault {
        EngineFault::Compile(format!("{}:{}: {}", self.chunk_name, self.line(), msg))
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), EngineFault> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(self.error(format!("expected {what}, found {other:?}"))),
        }
    }

    fn take_name(&mut self, what: &str) -> Result<String, EngineFault> {
        match self.next() {
            Some(Token::Name(n)) => Ok(n),
            other => Err(self.error(format!("expected {what}, found {other:?}"))),
        }
    }

    /// Parse statements until `end` or end of input; does not consume `end`.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, EngineFault> {
        let mut stmts = Vec::new();
        while let Some(token) = self.peek() {
            match token {
                Token::End => break,
                Token::Function => stmts.push(self.parse_function()?),
                Token::Return => {
                    self.pos += 1;
                    let mut values = Vec::new();
                    if !matches!(self.peek(), None | Some(Token::End)) {
                        values.push(self.parse_expr()?);
                        while self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                            values.push(self.parse_expr()?);
                        }
                    }
                    stmts.push(Stmt::Return(values));
                }
                _ => stmts.push(self.parse_assign_or_call()?),
            }
        }
        Ok(stmts)
    }

    /// `function name(p1, p2) body end`, sugar for a global assignment.
    fn parse_function(&mut self) -> Result<Stmt, EngineFault> {
        self.pos += 1; // function
        let name = self.take_name("function name")?;
        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            params.push(self.take_name("parameter name")?);
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                params.push(self.take_name("parameter name")?);
            }
        }
        self.expect(Token::RParen, "')'")?;
        let body = self.parse_block()?;
        self.expect(Token::End, "'end'")?;
        let func = Rc::new(ScriptFn {
            name: name.clone(),
            params,
            body,
        });
        Ok(Stmt::Assign(Target::Global(name), Expr::Function(func)))
    }

    fn parse_assign_or_call(&mut self) -> Result<Stmt, EngineFault> {
        let expr = self.parse_suffixed()?;
        if self.peek() == Some(&Token::Assign) {
            self.pos += 1;
            let value = self.parse_expr()?;
            let target = match expr {
                Expr::Name(n) => Target::Global(n),
                Expr::Field(base, field) => Target::Field(*base, field),
                _ => return Err(self.error("cannot assign to this expression".to_string())),
            };
            return Ok(Stmt::Assign(target, value));
        }
        match expr {
            Expr::Call(..) => Ok(Stmt::Expr(expr)),
            _ => Err(self.error("expected statement".to_string())),
        }
    }

    // Expression grammar, loosest binding first: concat, additive,
    // multiplicative, unary minus, suffixes.

    fn parse_expr(&mut self) -> Result<Expr, EngineFault> {
        let mut lhs = self.parse_arith()?;
        while self.peek() == Some(&Token::Concat) {
            self.pos += 1;
            let rhs = self.parse_arith()?;
            lhs = Expr::Binary(BinOp::Concat, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_arith(&mut self) -> Result<Expr, EngineFault> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, EngineFault> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EngineFault> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_suffixed()
    }

    /// An atom followed by any number of `.name` and call suffixes.
    fn parse_suffixed(&mut self) -> Result<Expr, EngineFault> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let field = self.take_name("field name")?;
                    expr = Expr::Field(Box::new(expr), field);
                }
                Some(Token::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        args.push(self.parse_expr()?);
                        while self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(Token::RParen, "')'")?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<Expr, EngineFault> {
        match self.next() {
            Some(Token::Nil) => Ok(Expr::Nil),
            Some(Token::True) => Ok(Expr::True),
            Some(Token::False) => Ok(Expr::False),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::Name(n)) => Ok(Expr::Name(n)),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::LBrace) => self.parse_table_ctor(),
            other => Err(self.error(format!("expected expression, found {other:?}"))),
        }
    }

    fn parse_table_ctor(&mut self) -> Result<Expr, EngineFault> {
        let mut fields = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            // `name = expr` is a named entry; anything else is positional.
            let named = matches!(self.peek(), Some(Token::Name(_)))
                && self.tokens.get(self.pos + 1).map(|l| &l.token) == Some(&Token::Assign);
            if named {
                let name = self.take_name("field name")?;
                self.pos += 1; // =
                let value = self.parse_expr()?;
                fields.push((FieldKey::Named(name), value));
            } else {
                let value = self.parse_expr()?;
                fields.push((FieldKey::Positional, value));
            }
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(Expr::TableCtor(fields))
    }
}
