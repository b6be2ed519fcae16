use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};
use crate::types::Ty;

/// Recursive-descent parser over the lexer's token sequence.
///
/// Parsing aborts on the first structural error; the returned diagnostic
/// carries the span of the offending token or clause.
pub struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    file_name: String,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned<Lexeme>>, file_name: &str) -> Self {
        Self {
            tokens,
            pos: 0,
            file_name: file_name.to_string(),
        }
    }

    pub fn parse_file(mut self) -> Result<SourceFile, Diagnostic> {
        let mut declarations = Vec::new();
        while !self.at(&Lexeme::Eof) {
            declarations.push(self.parse_declaration()?);
        }
        Ok(SourceFile {
            name: self.file_name,
            declarations,
        })
    }

    fn parse_declaration(&mut self) -> Result<Spanned<Declaration>, Diagnostic> {
        let start = self.current_span();
        let decl = if self.at(&Lexeme::Fn) {
            Declaration::Fn(self.parse_fn()?)
        } else if self.at(&Lexeme::Let) {
            Declaration::Let(self.parse_let()?)
        } else {
            return Err(self.unexpected_token("declaration"));
        };
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(decl, span))
    }

    fn parse_fn(&mut self) -> Result<FnDecl, Diagnostic> {
        self.expect(&Lexeme::Fn)?;
        let name = self.expect_ident()?;

        self.expect(&Lexeme::LParen)?;
        let mut params = Vec::new();
        if !self.at(&Lexeme::RParen) {
            loop {
                let param_name = self.expect_ident()?;
                self.expect(&Lexeme::Colon)?;
                let ty = self.parse_type()?;
                params.push(Param {
                    name: param_name,
                    ty,
                });
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
        }
        self.expect(&Lexeme::RParen)?;

        let return_ty = if self.peek().as_type().is_some() {
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = if self.at(&Lexeme::LBrace) {
            Some(self.parse_block()?)
        } else if self.eat(&Lexeme::Semicolon) {
            None
        } else {
            return Err(self.unexpected_token("function body or ';'"));
        };

        Ok(FnDecl {
            name,
            params,
            return_ty,
            body,
        })
    }

    fn parse_let(&mut self) -> Result<LetDecl, Diagnostic> {
        self.expect(&Lexeme::Let)?;
        let name = self.expect_ident()?;
        self.expect(&Lexeme::Colon)?;

        if self.peek().as_type().is_none() {
            return Err(Diagnostic::error(
                "variable type missing".to_string(),
                self.current_span(),
            ));
        }
        let ty = self.parse_type()?;

        let init = if self.eat(&Lexeme::Eq) {
            match self.parse_expr()? {
                Some(expr) => Some(expr),
                None => {
                    return Err(Diagnostic::error(
                        "variable initializer missing".to_string(),
                        self.current_span(),
                    ))
                }
            }
        } else {
            None
        };

        self.expect(&Lexeme::Semicolon)?;

        Ok(LetDecl { name, ty, init })
    }

    fn parse_type(&mut self) -> Result<Spanned<Ty>, Diagnostic> {
        match self.peek().as_type() {
            Some(ty) => {
                let span = self.current_span();
                self.advance();
                Ok(Spanned::new(ty, span))
            }
            None => Err(self.unexpected_token("type")),
        }
    }

    fn parse_block(&mut self) -> Result<Spanned<Block>, Diagnostic> {
        let start = self.expect(&Lexeme::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        let end = self.expect(&Lexeme::RBrace)?;
        Ok(Spanned::new(Block { stmts }, start.merge(end)))
    }

    fn parse_stmt(&mut self) -> Result<Spanned<Stmt>, Diagnostic> {
        let start = self.current_span();

        if self.eat(&Lexeme::If) {
            let cond = self.require_expr("if condition missing")?;
            if !self.at(&Lexeme::LBrace) {
                return Err(Diagnostic::error(
                    "if block missing".to_string(),
                    self.current_span(),
                ));
            }
            let then_block = self.parse_block()?;
            let else_block = if self.eat(&Lexeme::Else) {
                if !self.at(&Lexeme::LBrace) {
                    return Err(Diagnostic::error(
                        "else block missing".to_string(),
                        self.current_span(),
                    ));
                }
                Some(self.parse_block()?)
            } else {
                None
            };
            let span = start.merge(self.prev_span());
            return Ok(Spanned::new(
                Stmt::If {
                    cond,
                    then_block,
                    else_block,
                },
                span,
            ));
        }

        if self.eat(&Lexeme::While) {
            let cond = self.require_expr("while condition missing")?;
            if !self.at(&Lexeme::LBrace) {
                return Err(Diagnostic::error(
                    "while block missing".to_string(),
                    self.current_span(),
                ));
            }
            let body = self.parse_block()?;
            let span = start.merge(self.prev_span());
            return Ok(Spanned::new(Stmt::While { cond, body }, span));
        }

        if self.at(&Lexeme::LBrace) {
            let block = self.parse_block()?;
            let span = block.span;
            return Ok(Spanned::new(Stmt::Block(block), span));
        }

        if self.at(&Lexeme::Fn) || self.at(&Lexeme::Let) {
            let decl = self.parse_declaration()?;
            let span = decl.span;
            return Ok(Spanned::new(Stmt::Decl(decl.node), span));
        }

        match self.parse_expr()? {
            Some(expr) => {
                self.expect(&Lexeme::Semicolon)?;
                let span = start.merge(self.prev_span());
                Ok(Spanned::new(Stmt::Expr(expr), span))
            }
            None => Err(self.unexpected_token("statement")),
        }
    }

    // ── Expressions ───────────────────────────────────────────────
    //
    // Precedence, loosest to tightest: assignment, comparison, additive,
    // multiplicative, postfix (call / `as` conversion).

    /// Parse an expression, or `None` if the current token cannot begin one.
    fn parse_expr(&mut self) -> Result<Option<Spanned<Expr>>, Diagnostic> {
        // assignment: IDENT ('='|'+='|'-='|'*='|'/=') expr
        if let Lexeme::Ident(name) = self.peek().clone() {
            let op = match self.peek_next() {
                Lexeme::Eq => Some(AssignOp::Plain),
                Lexeme::PlusEq => Some(AssignOp::Add),
                Lexeme::MinusEq => Some(AssignOp::Sub),
                Lexeme::StarEq => Some(AssignOp::Mul),
                Lexeme::SlashEq => Some(AssignOp::Div),
                _ => None,
            };
            if let Some(op) = op {
                let dest_span = self.current_span();
                self.advance(); // identifier
                self.advance(); // operator
                let value = match self.parse_expr()? {
                    Some(expr) => expr,
                    None => {
                        return Err(Diagnostic::error(
                            "assignment value missing".to_string(),
                            self.current_span(),
                        ))
                    }
                };
                let span = dest_span.merge(value.span);
                return Ok(Some(Spanned::new(
                    Expr::Assignment {
                        dest: Spanned::new(name, dest_span),
                        op,
                        value: Box::new(value),
                    },
                    span,
                )));
            }
        }

        self.parse_comparison()
    }

    fn require_expr(&mut self, missing: &str) -> Result<Spanned<Expr>, Diagnostic> {
        match self.parse_expr()? {
            Some(expr) => Ok(expr),
            None => Err(Diagnostic::error(missing.to_string(), self.current_span())),
        }
    }

    fn parse_comparison(&mut self) -> Result<Option<Spanned<Expr>>, Diagnostic> {
        let ops = |token: &Lexeme| match token {
            Lexeme::Lt => Some(BinOp::Lt),
            Lexeme::LtEq => Some(BinOp::Le),
            Lexeme::Gt => Some(BinOp::Gt),
            Lexeme::GtEq => Some(BinOp::Ge),
            Lexeme::EqEq => Some(BinOp::Eq),
            Lexeme::NotEq => Some(BinOp::Ne),
            _ => None,
        };
        self.parse_binary_level(ops, Self::parse_sum)
    }

    fn parse_sum(&mut self) -> Result<Option<Spanned<Expr>>, Diagnostic> {
        let ops = |token: &Lexeme| match token {
            Lexeme::Plus => Some(BinOp::Add),
            Lexeme::Minus => Some(BinOp::Sub),
            _ => None,
        };
        self.parse_binary_level(ops, Self::parse_product)
    }

    fn parse_product(&mut self) -> Result<Option<Spanned<Expr>>, Diagnostic> {
        let ops = |token: &Lexeme| match token {
            Lexeme::Star => Some(BinOp::Mul),
            Lexeme::Slash => Some(BinOp::Div),
            _ => None,
        };
        self.parse_binary_level(ops, Self::parse_value)
    }

    /// One left-associative binary precedence level.
    fn parse_binary_level(
        &mut self,
        op_for: impl Fn(&Lexeme) -> Option<BinOp>,
        mut operand: impl FnMut(&mut Self) -> Result<Option<Spanned<Expr>>, Diagnostic>,
    ) -> Result<Option<Spanned<Expr>>, Diagnostic> {
        let mut root = match operand(self)? {
            Some(expr) => expr,
            None => return Ok(None),
        };

        while let Some(op) = op_for(self.peek()) {
            let op_span = self.current_span();
            self.advance();
            let rhs = match operand(self)? {
                Some(expr) => expr,
                None => {
                    return Err(Diagnostic::error(
                        "expression right-hand side missing".to_string(),
                        root.span.merge(op_span),
                    ))
                }
            };
            let span = root.span.merge(rhs.span);
            root = Spanned::new(
                Expr::Binary {
                    op,
                    lhs: Box::new(root),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }

        Ok(Some(root))
    }

    /// `value := atom postfix*` where postfix is a call argument list or
    /// an `as` conversion.
    fn parse_value(&mut self) -> Result<Option<Spanned<Expr>>, Diagnostic> {
        let mut root = match self.parse_atom()? {
            Some(expr) => expr,
            None => return Ok(None),
        };

        loop {
            if self.eat(&Lexeme::LParen) {
                let mut args = Vec::new();
                while let Some(arg) = self.parse_expr()? {
                    args.push(arg);
                    if !self.eat(&Lexeme::Comma) {
                        break;
                    }
                }
                let end = self.expect(&Lexeme::RParen)?;
                let span = root.span.merge(end);
                root = Spanned::new(
                    Expr::Call {
                        callee: Box::new(root),
                        args,
                    },
                    span,
                );
                continue;
            }

            if self.eat(&Lexeme::As) {
                let ty = self.parse_type()?;
                let span = root.span.merge(ty.span);
                root = Spanned::new(
                    Expr::Conversion {
                        inner: Box::new(root),
                        ty,
                    },
                    span,
                );
                continue;
            }

            break;
        }

        Ok(Some(root))
    }

    fn parse_atom(&mut self) -> Result<Option<Spanned<Expr>>, Diagnostic> {
        let span = self.current_span();
        let expr = match self.peek().clone() {
            Lexeme::Integer(value) => {
                self.advance();
                Expr::Integer(value)
            }
            Lexeme::Floating(value) => {
                self.advance();
                Expr::Floating(value)
            }
            Lexeme::Ident(name) => {
                self.advance();
                Expr::Ident(name)
            }
            Lexeme::LParen => {
                let start = self.current_span();
                self.advance();
                let inner = match self.parse_expr()? {
                    Some(expr) => expr,
                    None => {
                        return Err(Diagnostic::error(
                            "bracket internals missing".to_string(),
                            start.merge(self.current_span()),
                        ))
                    }
                };
                let end = self.expect(&Lexeme::RParen)?;
                return Ok(Some(Spanned::new(inner.node, start.merge(end))));
            }
            _ => return Ok(None),
        };
        Ok(Some(Spanned::new(expr, span)))
    }

    // ── Token helpers ─────────────────────────────────────────────

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].node
    }

    fn peek_next(&self) -> &Lexeme {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            return self.current_span();
        }
        self.tokens[(self.pos - 1).min(self.tokens.len() - 1)].span
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn at(&self, token: &Lexeme) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Lexeme) -> Result<Span, Diagnostic> {
        if self.at(token) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(self.unexpected_token(token.description()))
        }
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>, Diagnostic> {
        if let Lexeme::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Ok(Spanned::new(name, span))
        } else {
            Err(self.unexpected_token("identifier"))
        }
    }

    fn unexpected_token(&self, expected: &str) -> Diagnostic {
        Diagnostic::error(
            format!(
                "unexpected token type (expected {}, got {})",
                expected,
                self.peek().description()
            ),
            self.current_span(),
        )
    }
}
