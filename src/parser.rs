//! Parser for the textual IR
//!
//! Parses programs like:
//! - `realize V.shreg<i32>([0, 100]) { ... }`
//! - `serial for (V.s0.x, 0, 100) { ... }`
//! - `write_shift_reg("V.shreg", V.s0.x, read_shift_reg("V.shreg", V.s0.x - 1) + 1);`

use crate::error::{CompileError, CompileResult};
use crate::ir::{BinOp, Expr, ForType, Range, RegId, RegRole, ScalarType, Stmt};
use crate::lexer::{Lexer, Token};

/// Parser for IR text
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Element types of the realizations enclosing the current position
    realized: Vec<(RegId, ScalarType)>,
}

impl Parser {
    pub fn new(source: &str) -> CompileResult<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            tokens,
            pos: 0,
            realized: Vec::new(),
        })
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    /// Advance to the next token
    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match self.current() {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    /// Consume token if it matches
    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> CompileResult<Token> {
        if self.check(&expected) {
            self.advance()
                .ok_or_else(|| CompileError::parse_error("Unexpected end of input"))
        } else {
            Err(CompileError::parse_error(format!(
                "Expected '{}', got {}",
                expected,
                self.describe_current()
            )))
        }
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(CompileError::parse_error(format!(
                "Expected a name, got {}",
                other.map_or("end of input".to_string(), |t| format!("'{}'", t))
            ))),
        }
    }

    fn describe_current(&self) -> String {
        self.current()
            .map_or("end of input".to_string(), |t| format!("'{}'", t))
    }

    /// Parse a complete program
    pub fn parse_program(&mut self) -> CompileResult<Stmt> {
        let mut stmts = Vec::new();
        while self.current().is_some() {
            stmts.push(self.parse_statement()?);
        }
        Ok(Stmt::block(stmts))
    }

    /// Parse `{ stmt* }`
    fn parse_block(&mut self) -> CompileResult<Stmt> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.current().is_none() {
                return Err(CompileError::parse_error("Unterminated block"));
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(Token::RBrace)?;
        Ok(Stmt::block(stmts))
    }

    /// Parse a single statement
    fn parse_statement(&mut self) -> CompileResult<Stmt> {
        match self.current() {
            Some(Token::Realize) => self.parse_realize(),
            Some(Token::Produce) => {
                self.advance();
                let name = self.expect_ident()?;
                let body = self.parse_block()?;
                Ok(Stmt::produce(name, body))
            }
            Some(Token::Serial) | Some(Token::Unrolled) | Some(Token::Vectorized) => self.parse_for(),
            Some(Token::Ident(_)) if self.is_provide() => self.parse_provide(),
            _ => {
                let expr = self.parse_expr()?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Evaluate(expr))
            }
        }
    }

    fn parse_realize(&mut self) -> CompileResult<Stmt> {
        self.expect(Token::Realize)?;
        let name = self.expect_ident()?;
        let reg = RegId::parse(&name).ok_or_else(|| {
            CompileError::parse_error(format!("Realized buffer {} must end in .shreg or .temp", name))
        })?;
        self.expect(Token::Lt)?;
        let ty_name = self.expect_ident()?;
        let ty = ScalarType::parse(&ty_name)
            .ok_or_else(|| CompileError::parse_error(format!("Unknown type {}", ty_name)))?;
        self.expect(Token::Gt)?;

        self.expect(Token::LParen)?;
        let mut bounds = Vec::new();
        while !self.check(&Token::RParen) {
            self.expect(Token::LBracket)?;
            let min = self.parse_expr()?;
            self.expect(Token::Comma)?;
            let extent = self.parse_expr()?;
            self.expect(Token::RBracket)?;
            bounds.push(Range { min, extent });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;

        self.realized.push((reg.clone(), ty));
        let body = self.parse_block();
        self.realized.pop();
        Ok(Stmt::realize(reg, ty, bounds, body?))
    }

    fn parse_for(&mut self) -> CompileResult<Stmt> {
        let for_type = match self.advance() {
            Some(Token::Serial) => ForType::Serial,
            Some(Token::Unrolled) => ForType::Unrolled,
            Some(Token::Vectorized) => ForType::Vectorized,
            _ => return Err(CompileError::parse_error("Expected a loop kind")),
        };
        self.expect(Token::For)?;
        self.expect(Token::LParen)?;
        let name = self.expect_ident()?;
        self.expect(Token::Comma)?;
        let min = self.parse_expr()?;
        self.expect(Token::Comma)?;
        let extent = self.parse_expr()?;
        self.expect(Token::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::for_loop(name, min, extent, for_type, body))
    }

    /// Is the statement at the cursor `NAME(args) = value;`?
    fn is_provide(&self) -> bool {
        if !matches!(self.peek_at(1), Some(Token::LParen)) {
            return false;
        }
        let mut depth = 0usize;
        let mut offset = 1;
        while let Some(tok) = self.peek_at(offset) {
            match tok {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(self.peek_at(offset + 1), Some(Token::Assign));
                    }
                }
                _ => {}
            }
            offset += 1;
        }
        false
    }

    fn parse_provide(&mut self) -> CompileResult<Stmt> {
        let name = self.expect_ident()?;
        let buf = match RegId::parse(&name) {
            Some(reg) if reg.role == RegRole::Temp => reg,
            _ => {
                return Err(CompileError::parse_error(format!(
                    "Only .temp buffers can be assigned directly, got {}",
                    name
                )))
            }
        };
        let indices = self.parse_args()?;
        self.expect(Token::Assign)?;
        let value = self.parse_expr()?;
        self.expect(Token::Semicolon)?;
        Ok(Stmt::Provide { buf, indices, value })
    }

    /// Parse `( expr, ... )`
    fn parse_args(&mut self) -> CompileResult<Vec<Expr>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            args.push(self.parse_expr()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// Parse an expression (handles operator precedence)
    pub fn parse_expr(&mut self) -> CompileResult<Expr> {
        self.parse_binary(1)
    }

    fn binary_op(tok: &Token) -> Option<(BinOp, u8)> {
        let op = match tok {
            Token::OrOr => (BinOp::Or, 1),
            Token::AndAnd => (BinOp::And, 2),
            Token::EqEq => (BinOp::Eq, 3),
            Token::NotEq => (BinOp::Ne, 3),
            Token::Lt => (BinOp::Lt, 4),
            Token::Le => (BinOp::Le, 4),
            Token::Gt => (BinOp::Gt, 4),
            Token::Ge => (BinOp::Ge, 4),
            Token::Plus => (BinOp::Add, 5),
            Token::Minus => (BinOp::Sub, 5),
            Token::Star => (BinOp::Mul, 6),
            Token::Slash => (BinOp::Div, 6),
            Token::Percent => (BinOp::Mod, 6),
            _ => return None,
        };
        Some(op)
    }

    /// Precedence climbing over left-associative infix operators
    fn parse_binary(&mut self, min_prec: u8) -> CompileResult<Expr> {
        let mut left = self.parse_unary()?;
        while let Some((op, prec)) = self.current().and_then(Self::binary_op) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_binary(prec + 1)?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    /// Parse unary expressions: -a, !a
    fn parse_unary(&mut self) -> CompileResult<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            Ok(match operand {
                Expr::IntImm(v) => Expr::IntImm(-v),
                other => Expr::int(0) - other,
            })
        } else if self.eat(&Token::Bang) {
            let operand = self.parse_unary()?;
            Ok(Expr::Not(Box::new(operand)))
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> CompileResult<Expr> {
        match self.advance() {
            Some(Token::Int(v)) => Ok(Expr::IntImm(v)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.check(&Token::LParen) {
                    self.parse_call(name)
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => Err(CompileError::parse_error(format!(
                "Expected an expression, got {}",
                other.map_or("end of input".to_string(), |t| format!("'{}'", t))
            ))),
        }
    }

    fn parse_call(&mut self, name: String) -> CompileResult<Expr> {
        match name.as_str() {
            "read_shift_reg" | "write_shift_reg" => {
                self.expect(Token::LParen)?;
                let reg_name = match self.advance() {
                    Some(Token::Str(s)) => s,
                    _ => {
                        return Err(CompileError::parse_error(format!(
                            "{} expects a register name string first",
                            name
                        )))
                    }
                };
                let reg = RegId::parse(&reg_name)
                    .filter(|r| r.role == RegRole::Shreg)
                    .ok_or_else(|| {
                        CompileError::parse_error(format!("{} is not a shift register", reg_name))
                    })?;
                let ty = self.realized_type(&reg)?;
                let mut args = Vec::new();
                while self.eat(&Token::Comma) {
                    args.push(self.parse_expr()?);
                }
                self.expect(Token::RParen)?;
                if name == "read_shift_reg" {
                    Ok(Expr::read(reg, ty, args))
                } else {
                    let value = args.pop().ok_or_else(|| {
                        CompileError::parse_error("write_shift_reg needs a value to write")
                    })?;
                    Ok(Expr::write(reg, ty, args, value))
                }
            }
            "select" => {
                let mut args = self.parse_args()?;
                if args.len() != 3 {
                    return Err(CompileError::parse_error("select takes 3 arguments"));
                }
                let otherwise = args.pop();
                let then = args.pop();
                let cond = args.pop();
                match (cond, then, otherwise) {
                    (Some(c), Some(t), Some(o)) => Ok(Expr::select(c, t, o)),
                    _ => Err(CompileError::parse_error("select takes 3 arguments")),
                }
            }
            "min" | "max" => {
                let args = self.parse_args()?;
                let op = if name == "min" { BinOp::Min } else { BinOp::Max };
                match <[Expr; 2]>::try_from(args) {
                    Ok([a, b]) => Ok(Expr::binary(op, a, b)),
                    Err(_) => Err(CompileError::parse_error(format!("{} takes 2 arguments", name))),
                }
            }
            _ => {
                let args = self.parse_args()?;
                match RegId::parse(&name) {
                    Some(buf) if buf.role == RegRole::Temp => {
                        let ty = self.realized_type(&buf)?;
                        Ok(Expr::Load { buf, ty, indices: args })
                    }
                    _ => Ok(Expr::Call { name, ty: ScalarType::default(), args }),
                }
            }
        }
    }

    fn realized_type(&self, reg: &RegId) -> CompileResult<ScalarType> {
        self.realized
            .iter()
            .rev()
            .find(|(r, _)| r == reg)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| CompileError::parse_error(format!("{} used outside its realize", reg)))
    }
}

/// Parse IR text into a statement tree.
pub fn parse(source: &str) -> CompileResult<Stmt> {
    Parser::new(source)?.parse_program()
}
