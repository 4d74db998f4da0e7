//! Recursive-descent parser producing the expression AST.
//!
//! Precedence, loosest to tightest: pipe, alternative (`//`), `or`, `and`,
//! comparison, additive, multiplicative, unary minus, postfix
//! (field access, indexing), primary.

use grantor_types::error::Problem;

use super::lexer::{tokenize, StrSegment, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    /// `.`, the current input.
    Identity,
    /// `<base>.field`
    Field(Box<Ast>, String),
    /// `<base>[expr]`
    Index(Box<Ast>, Box<Ast>),
    /// `$name`
    Var(String),
    Lit(serde_json::Value),
    /// String literal with `\( … )` interpolations.
    StrInterp(Vec<Segment>),
    /// `[a, b, …]`
    Array(Vec<Ast>),
    /// `{key: expr, …}`
    Object(Vec<(String, Ast)>),
    Neg(Box<Ast>),
    Not(Box<Ast>),
    BinOp(BinOp, Box<Ast>, Box<Ast>),
    Pipe(Box<Ast>, Box<Ast>),
    /// `if c then a (elif c2 then b)* (else d)? end`
    If(Vec<(Ast, Ast)>, Option<Box<Ast>>),
    /// Builtin invocation: `length`, `map(f)`, `join(";")`…
    Call(String, Vec<Ast>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Expr(Box<Ast>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Alt,
}

/// Parse a full expression source (the text inside `${ … }`).
pub fn parse(source: &str) -> Result<Ast, Problem> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(Problem::expression("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_pipe()?;
    if parser.pos != parser.tokens.len() {
        return Err(Problem::expression(format!(
            "unexpected trailing tokens in expression '{source}'"
        )));
    }
    Ok(ast)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), Problem> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(Problem::expression(format!(
                "expected {expected:?} {context}, found {:?}",
                self.peek()
            )))
        }
    }

    fn parse_pipe(&mut self) -> Result<Ast, Problem> {
        let mut left = self.parse_alt()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_alt()?;
            left = Ast::Pipe(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_alt(&mut self) -> Result<Ast, Problem> {
        let mut left = self.parse_or()?;
        while self.eat(&Token::Alt) {
            let right = self.parse_or()?;
            left = Ast::BinOp(BinOp::Alt, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Ast, Problem> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Ast::BinOp(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, Problem> {
        let mut left = self.parse_comparison()?;
        while self.eat(&Token::And) {
            let right = self.parse_comparison()?;
            left = Ast::BinOp(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Ast, Problem> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_additive()?;
        Ok(Ast::BinOp(op, Box::new(left), Box::new(right)))
    }

    fn parse_additive(&mut self) -> Result<Ast, Problem> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Ast::BinOp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, Problem> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Ast::BinOp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Ast, Problem> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Ast::Neg(Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Ast, Problem> {
        let mut base = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    // Only a field access when followed by an identifier;
                    // a bare trailing dot is an error here.
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(name)) => {
                            base = Ast::Field(Box::new(base), name);
                        }
                        other => {
                            return Err(Problem::expression(format!(
                                "expected field name after '.', found {other:?}"
                            )));
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_pipe()?;
                    self.expect(&Token::RBracket, "to close index")?;
                    base = Ast::Index(Box::new(base), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Ast, Problem> {
        let token = self
            .next()
            .ok_or_else(|| Problem::expression("unexpected end of expression"))?;
        match token {
            Token::Dot => {
                // `.`, `.field`, `.["key"]`, `.[0]`
                match self.peek() {
                    Some(Token::Ident(_)) => {
                        let Some(Token::Ident(name)) = self.next() else {
                            unreachable!()
                        };
                        Ok(Ast::Field(Box::new(Ast::Identity), name))
                    }
                    Some(Token::LBracket) => {
                        self.pos += 1;
                        let index = self.parse_pipe()?;
                        self.expect(&Token::RBracket, "to close index")?;
                        Ok(Ast::Index(Box::new(Ast::Identity), Box::new(index)))
                    }
                    _ => Ok(Ast::Identity),
                }
            }
            Token::Var(name) => Ok(Ast::Var(name)),
            Token::Num(n) => Ok(Ast::Lit(number(n))),
            Token::True => Ok(Ast::Lit(serde_json::Value::Bool(true))),
            Token::False => Ok(Ast::Lit(serde_json::Value::Bool(false))),
            Token::Null => Ok(Ast::Lit(serde_json::Value::Null)),
            Token::Str(segments) => parse_string(segments),
            Token::Not => {
                // jq's `| not` applies to the piped input; the prefix form
                // takes an explicit operand.
                match self.peek() {
                    None
                    | Some(Token::Pipe)
                    | Some(Token::RParen)
                    | Some(Token::RBracket)
                    | Some(Token::RBrace)
                    | Some(Token::Comma)
                    | Some(Token::Semi)
                    | Some(Token::Then)
                    | Some(Token::Elif)
                    | Some(Token::Else)
                    | Some(Token::End) => Ok(Ast::Call("not".to_string(), Vec::new())),
                    _ => {
                        let operand = self.parse_postfix()?;
                        Ok(Ast::Not(Box::new(operand)))
                    }
                }
            }
            Token::LParen => {
                let inner = self.parse_pipe()?;
                self.expect(&Token::RParen, "to close group")?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_pipe()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RBracket, "to close array")?;
                        break;
                    }
                }
                Ok(Ast::Array(items))
            }
            Token::LBrace => {
                let mut fields = Vec::new();
                if !self.eat(&Token::RBrace) {
                    loop {
                        let key = match self.next() {
                            Some(Token::Ident(name)) => name,
                            Some(Token::Str(segments)) => literal_string(&segments)?,
                            other => {
                                return Err(Problem::expression(format!(
                                    "expected object key, found {other:?}"
                                )));
                            }
                        };
                        self.expect(&Token::Colon, "after object key")?;
                        let value = self.parse_pipe()?;
                        fields.push((key, value));
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RBrace, "to close object")?;
                        break;
                    }
                }
                Ok(Ast::Object(fields))
            }
            Token::If => {
                let mut arms = Vec::new();
                let cond = self.parse_pipe()?;
                self.expect(&Token::Then, "after if condition")?;
                let then = self.parse_pipe()?;
                arms.push((cond, then));
                loop {
                    if self.eat(&Token::Elif) {
                        let cond = self.parse_pipe()?;
                        self.expect(&Token::Then, "after elif condition")?;
                        let then = self.parse_pipe()?;
                        arms.push((cond, then));
                        continue;
                    }
                    break;
                }
                let else_arm = if self.eat(&Token::Else) {
                    Some(Box::new(self.parse_pipe()?))
                } else {
                    None
                };
                self.expect(&Token::End, "to close if expression")?;
                Ok(Ast::If(arms, else_arm))
            }
            Token::Ident(name) => {
                // Builtin invocation, with or without arguments.
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.parse_pipe()?);
                            if self.eat(&Token::Semi) || self.eat(&Token::Comma) {
                                continue;
                            }
                            self.expect(&Token::RParen, "to close arguments")?;
                            break;
                        }
                    }
                    Ok(Ast::Call(name, args))
                } else {
                    Ok(Ast::Call(name, Vec::new()))
                }
            }
            other => Err(Problem::expression(format!(
                "unexpected token {other:?} in expression"
            ))),
        }
    }
}

fn parse_string(segments: Vec<StrSegment>) -> Result<Ast, Problem> {
    let interpolated = segments
        .iter()
        .any(|s| matches!(s, StrSegment::Interp(_)));
    if !interpolated {
        return Ok(Ast::Lit(serde_json::Value::String(literal_text(&segments))));
    }
    let mut parsed = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment {
            StrSegment::Literal(text) => parsed.push(Segment::Literal(text)),
            StrSegment::Interp(source) => {
                let inner = parse(&source)?;
                parsed.push(Segment::Expr(Box::new(inner)));
            }
        }
    }
    Ok(Ast::StrInterp(parsed))
}

fn literal_string(segments: &[StrSegment]) -> Result<String, Problem> {
    if segments.iter().any(|s| matches!(s, StrSegment::Interp(_))) {
        return Err(Problem::expression(
            "interpolation is not allowed in object keys",
        ));
    }
    Ok(literal_text(segments))
}

fn literal_text(segments: &[StrSegment]) -> String {
    segments
        .iter()
        .map(|s| match s {
            StrSegment::Literal(text) => text.as_str(),
            StrSegment::Interp(_) => "",
        })
        .collect()
}

/// Represent an f64 as a JSON number, preferring integers when exact.
pub fn number(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Value::from(n)
    }
}
