//! Parser for Kern code fragments.
//!
//! A hand-written recursive descent parser over the logos token stream.
//! Binary operators are parsed by precedence level, lowest first:
//!
//! | Level | Operators |
//! |---|---|
//! | or | `\|\|` |
//! | and | `&&` |
//! | equality | `==` `!=` |
//! | comparison | `<` `<=` `>` `>=` |
//! | additive | `+` `-` |
//! | multiplicative | `*` `/` `//` `%` |
//! | unary | `-` `!` |
//! | power | `**` (right associative) |
//! | postfix | call, index, member |

use std::fmt;

use logos::Span;

use crate::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp, Value};
use crate::lexer::{tokenize, Spanned, Token};

/// Maximum nesting depth for expressions, both of parser recursion and of
/// the resulting tree. Keeps inputs like `((((...` or `1+1+1+...` from
/// overflowing the stack in the parser or the evaluator.
const MAX_DEPTH: usize = 256;

/// An expression together with the depth of its tree.
type Parsed = Result<(Expr, usize), ParseError>;

/// A parse failure with the byte span it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}..{}", self.message, self.span.start, self.span.end)
    }
}

impl std::error::Error for ParseError {}

/// Parse a code fragment into a program.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    Parser::new(source)?.parse_program()
}

/// Parse a source string that must be exactly one expression.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(source)?;
    let (expr, _) = parser.parse_expr()?;
    parser.expect_end()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned<Token>>,
    pos: usize,
    depth: usize,
    source_len: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(source).map_err(|errors| {
            // Report the first lexing error; the rest are usually fallout.
            let first = &errors[0];
            ParseError::new(first.token.to_string(), first.span.clone())
        })?;
        Ok(Self {
            tokens,
            pos: 0,
            depth: 0,
            source_len: source.len(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|s| s.span.clone())
            .unwrap_or(self.source_len..self.source_len)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{token}'")))
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ParseError::new(
                format!("unexpected '{token}' after expression"),
                self.span(),
            )),
        }
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::new(format!("expected {wanted}, found '{token}'"), self.span()),
            None => ParseError::new(format!("expected {wanted}, found end of input"), self.span()),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new(
                format!("nesting depth exceeded (max {MAX_DEPTH})"),
                self.span(),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while self.peek().is_some() {
            if self.eat(&Token::Semi) {
                continue;
            }
            statements.push(self.parse_statement()?);
            if self.peek().is_some() {
                self.expect(Token::Semi)?;
            }
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        if self.eat(&Token::Del) {
            return match self.advance() {
                Some(Token::Ident(name)) => Ok(Stmt::Delete(name)),
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    Err(self.unexpected("variable name after 'del'"))
                }
            };
        }

        if let (Some(Token::Ident(name)), Some(Token::Eq)) = (self.peek(), self.peek_at(1)) {
            let name = name.clone();
            self.pos += 2;
            let (value, _) = self.parse_expr()?;
            return Ok(Stmt::Assign { name, value });
        }

        Ok(Stmt::Expr(self.parse_expr()?.0))
    }

    fn parse_expr(&mut self) -> Parsed {
        self.enter()?;
        let expr = self.parse_or();
        self.leave();
        expr
    }

    /// Wrap a new node whose deepest child has depth `child`.
    ///
    /// Left-associative chains grow the tree without recursing in the
    /// parser, so tree depth is bounded here rather than in `enter`.
    fn node(&self, expr: Expr, child: usize, span: Span) -> Parsed {
        let depth = child + 1;
        if depth > MAX_DEPTH {
            return Err(ParseError::new(
                format!("expression nesting depth exceeded (max {MAX_DEPTH})"),
                span,
            ));
        }
        Ok((expr, depth))
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Parsed,
        op_for: fn(&Token) -> Option<BinaryOp>,
    ) -> Parsed {
        let (mut left, mut depth) = next(self)?;
        while let Some(op) = self.peek().and_then(op_for) {
            let span = self.span();
            self.pos += 1;
            let (right, right_depth) = next(self)?;
            let expr = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
            (left, depth) = self.node(expr, depth.max(right_depth), span)?;
        }
        Ok((left, depth))
    }

    fn parse_or(&mut self) -> Parsed {
        self.binary_level(Self::parse_and, |t| matches!(t, Token::Or).then_some(BinaryOp::Or))
    }

    fn parse_and(&mut self) -> Parsed {
        self.binary_level(Self::parse_equality, |t| {
            matches!(t, Token::And).then_some(BinaryOp::And)
        })
    }

    fn parse_equality(&mut self) -> Parsed {
        self.binary_level(Self::parse_comparison, |t| match t {
            Token::EqEq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::NotEq),
            _ => None,
        })
    }

    fn parse_comparison(&mut self) -> Parsed {
        self.binary_level(Self::parse_additive, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::LtEq => Some(BinaryOp::LtEq),
            Token::Gt => Some(BinaryOp::Gt),
            Token::GtEq => Some(BinaryOp::GtEq),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Parsed {
        self.binary_level(Self::parse_term, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn parse_term(&mut self) -> Parsed {
        self.binary_level(Self::parse_unary, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            Token::SlashSlash => Some(BinaryOp::FloorDiv),
            Token::Percent => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> Parsed {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Bang) => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        let span = self.span();
        self.pos += 1;
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        let (operand, depth) = operand?;
        let expr = Expr::Unary {
            op,
            operand: Box::new(operand),
        };
        self.node(expr, depth, span)
    }

    fn parse_power(&mut self) -> Parsed {
        let (base, base_depth) = self.parse_postfix()?;
        let span = self.span();
        if self.eat(&Token::StarStar) {
            // Right associative, and binds tighter than a unary minus on its left.
            self.enter()?;
            let exponent = self.parse_unary();
            self.leave();
            let (exponent, exponent_depth) = exponent?;
            let expr = Expr::Binary {
                left: Box::new(base),
                op: BinaryOp::Pow,
                right: Box::new(exponent),
            };
            return self.node(expr, base_depth.max(exponent_depth), span);
        }
        Ok((base, base_depth))
    }

    fn parse_postfix(&mut self) -> Parsed {
        let (mut expr, mut depth) = self.parse_primary()?;
        loop {
            let span = self.span();
            match self.peek() {
                Some(Token::LParen) => {
                    self.pos += 1;
                    let (args, args_depth) = self.parse_list(Token::RParen)?;
                    let call = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                    (expr, depth) = self.node(call, depth.max(args_depth), span)?;
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let (index, index_depth) = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    let indexed = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                    (expr, depth) = self.node(indexed, depth.max(index_depth), span)?;
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Ident(name)) => {
                            let member = Expr::Member {
                                target: Box::new(expr),
                                name,
                            };
                            (expr, depth) = self.node(member, depth, span)?;
                        }
                        _ => {
                            self.pos = self.pos.saturating_sub(1);
                            return Err(self.unexpected("field name after '.'"));
                        }
                    }
                }
                _ => return Ok((expr, depth)),
            }
        }
    }

    fn parse_primary(&mut self) -> Parsed {
        let span = self.span();
        let literal = |value| -> Parsed { Ok((Expr::Literal(value), 1)) };
        match self.advance() {
            Some(Token::Null) => literal(Value::Null),
            Some(Token::True) => literal(Value::Bool(true)),
            Some(Token::False) => literal(Value::Bool(false)),
            Some(Token::Int(i)) => literal(Value::Int(i)),
            Some(Token::Float(f)) => literal(Value::Float(f)),
            Some(Token::String(s)) => literal(Value::String(s)),
            Some(Token::Ident(name)) => Ok((Expr::Var(name), 1)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let (items, depth) = self.parse_list(Token::RBracket)?;
                self.node(Expr::Array(items), depth, span)
            }
            Some(Token::LBrace) => self.parse_object(span),
            Some(token) => Err(ParseError::new(format!("unexpected '{token}'"), span)),
            None => Err(ParseError::new("unexpected end of input", span)),
        }
    }

    /// Parse comma-separated expressions up to `close`, allowing a trailing comma.
    /// Also returns the depth of the deepest item.
    fn parse_list(&mut self, close: Token) -> Result<(Vec<Expr>, usize), ParseError> {
        let mut items = Vec::new();
        let mut depth = 0;
        loop {
            if self.eat(&close) {
                return Ok((items, depth));
            }
            let (item, item_depth) = self.parse_expr()?;
            items.push(item);
            depth = depth.max(item_depth);
            if !self.eat(&Token::Comma) {
                self.expect(close)?;
                return Ok((items, depth));
            }
        }
    }

    fn parse_object(&mut self, span: Span) -> Parsed {
        let mut entries = Vec::new();
        let mut depth = 0;
        loop {
            if self.eat(&Token::RBrace) {
                break;
            }
            let key = match self.advance() {
                Some(Token::Ident(name)) => name,
                Some(Token::String(s)) => s,
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.unexpected("object key"));
                }
            };
            self.expect(Token::Colon)?;
            let (value, value_depth) = self.parse_expr()?;
            entries.push((key, value));
            depth = depth.max(value_depth);
            if !self.eat(&Token::Comma) {
                self.expect(Token::RBrace)?;
                break;
            }
        }
        self.node(Expr::Object(entries), depth, span)
    }
}
