// Expression Parser - Recursive descent over the token stream
//
// Precedence, lowest first:
//   or ||
//   and &&
//   == !=
//   < <= > >= contains startsWith endsWith in matches
//   + -
//   * / %
//   ! not -(unary)
//   .member [index] call()

use serde_json::Value;

use super::lexer::{Spanned, Token};
use super::{BinaryOp, Expr, ExprError, ExprResult, UnaryOp, number_value};

const RESERVED: &[&str] = &[
    "and", "or", "not", "contains", "startsWith", "endsWith", "in", "matches",
];

/// Deepest tree the parser will build
pub(crate) const MAX_DEPTH: usize = 128;

pub(crate) struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    end: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Parse a complete expression
    pub(crate) fn parse(tokens: &'a [Spanned], source_len: usize) -> ExprResult<Expr> {
        let mut parser = Self {
            tokens,
            pos: 0,
            end: source_len,
            depth: 0,
        };

        if tokens.is_empty() {
            return Err(parser.error_at(0, "empty expression"));
        }

        let expr = parser.parse_or()?;
        if let Some(extra) = parser.peek() {
            return Err(parser.error_at(
                extra.pos,
                format!("unexpected {}", extra.token.describe()),
            ));
        }
        Ok(expr)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Token helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Spanned> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().is_some_and(|s| &s.token == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self
            .peek()
            .is_some_and(|s| matches!(&s.token, Token::Ident(name) if name == keyword))
        {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> ExprResult<()> {
        if self.eat(&expected) {
            return Ok(());
        }
        let (pos, found) = match self.peek() {
            Some(s) => (s.pos, s.token.describe()),
            None => (self.end, "end of expression".to_string()),
        };
        Err(self.error_at(pos, format!("expected {}, found {}", expected.describe(), found)))
    }

    /// One level deeper; bounds both recursion and the depth of the tree
    fn descend(&mut self) -> ExprResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let pos = self.peek().map_or(self.end, |s| s.pos);
            return Err(self.error_at(pos, "expression nested too deeply"));
        }
        Ok(())
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            pos,
            message: message.into(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grammar
    // ─────────────────────────────────────────────────────────────────────────

    fn parse_or(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_and()?;
        let mut chained = 0;
        while self.eat(&Token::OrOr) || self.eat_keyword("or") {
            self.descend()?;
            chained += 1;
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_and(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_equality()?;
        let mut chained = 0;
        while self.eat(&Token::AndAnd) || self.eat_keyword("and") {
            self.descend()?;
            chained += 1;
            let right = self.parse_equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_equality(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_comparison()?;
        let mut chained = 0;
        loop {
            let op = if self.eat(&Token::EqEq) {
                BinaryOp::Eq
            } else if self.eat(&Token::NotEq) {
                BinaryOp::Ne
            } else {
                break;
            };
            self.descend()?;
            chained += 1;
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_comparison(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_additive()?;
        let mut chained = 0;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Ident(word)) => match word.as_str() {
                    "contains" => BinaryOp::Contains,
                    "startsWith" => BinaryOp::StartsWith,
                    "endsWith" => BinaryOp::EndsWith,
                    "in" => BinaryOp::In,
                    "matches" => BinaryOp::Matches,
                    _ => break,
                },
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            chained += 1;
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_additive(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        let mut chained = 0;
        loop {
            let op = if self.eat(&Token::Plus) {
                BinaryOp::Add
            } else if self.eat(&Token::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            self.descend()?;
            chained += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_unary()?;
        let mut chained = 0;
        loop {
            let op = if self.eat(&Token::Star) {
                BinaryOp::Mul
            } else if self.eat(&Token::Slash) {
                BinaryOp::Div
            } else if self.eat(&Token::Percent) {
                BinaryOp::Rem
            } else {
                break;
            };
            self.descend()?;
            chained += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_unary(&mut self) -> ExprResult<Expr> {
        self.descend()?;
        let expr = self.parse_unary_operand()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_unary_operand(&mut self) -> ExprResult<Expr> {
        if self.eat(&Token::Bang) || self.eat_keyword("not") {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            // Fold negative literals
            if let Expr::Literal(Value::Number(n)) = &operand {
                if let Some(f) = n.as_f64() {
                    return Ok(Expr::Literal(number_value(-f)));
                }
            }
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ExprResult<Expr> {
        let mut expr = self.parse_primary()?;
        let mut chained = 0;
        loop {
            if self.peek().is_some_and(|s| matches!(s.token, Token::Dot | Token::LBracket | Token::LParen)) {
                self.descend()?;
                chained += 1;
            }
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Spanned {
                        token: Token::Ident(name),
                        ..
                    }) => {
                        expr = Expr::Member(Box::new(expr), name.clone());
                    }
                    Some(other) => {
                        return Err(self.error_at(
                            other.pos,
                            format!("expected a field name after '.', found {}", other.token.describe()),
                        ));
                    }
                    None => return Err(self.error_at(self.end, "expected a field name after '.'")),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_or()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if let Some(open) = self.peek().filter(|s| s.token == Token::LParen) {
                let name = match &expr {
                    Expr::Ident(name) => name.clone(),
                    Expr::Member(base, name) if matches!(base.as_ref(), Expr::Ident(root) if root == "helpers") => {
                        name.clone()
                    }
                    _ => return Err(self.error_at(open.pos, "only helpers can be called")),
                };
                self.pos += 1;
                let args = self.parse_args()?;
                expr = Expr::Call(name, args);
            } else {
                break;
            }
        }
        self.depth -= chained;
        Ok(expr)
    }

    fn parse_args(&mut self) -> ExprResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            return Ok(args);
        }
    }

    fn parse_primary(&mut self) -> ExprResult<Expr> {
        let Some(spanned) = self.advance() else {
            return Err(self.error_at(self.end, "unexpected end of expression"));
        };

        match &spanned.token {
            Token::Number(n) => Ok(Expr::Literal(number_value(*n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                word if RESERVED.contains(&word) => Err(self.error_at(
                    spanned.pos,
                    format!("'{}' is an operator and cannot start an operand", word),
                )),
                _ => Ok(Expr::Ident(name.clone())),
            },
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::Array(items));
                }
                loop {
                    items.push(self.parse_or()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(Token::RBracket)?;
                    return Ok(Expr::Array(items));
                }
            }
            other => Err(self.error_at(spanned.pos, format!("unexpected {}", other.describe()))),
        }
    }
}
