//! AST -> TIR building: name resolution and type checking in two passes.
//!
//! Pass 1 walks the top-level declarations and registers every function
//! with a prototype id, rejecting global variables and mismatched
//! re-declarations. Pass 2 builds each function body inside a stack of
//! lexical scopes, producing fully-typed expressions.

use std::collections::HashMap;

use crate::ast;
use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};
use crate::types::Ty;

use super::{
    BinaryOp, Block, ExprKind, Expression, Function, FunctionId, LocalId, LocalVariable,
    Prototype, Statement, Tir,
};

/// Build TIR from a parsed source file. Fails on the first semantic error.
pub fn build(file: &ast::SourceFile) -> Result<Tir, Diagnostic> {
    let mut builder = TirBuilder {
        prototypes: Vec::new(),
        functions: Vec::new(),
        fn_ids: HashMap::new(),
    };

    builder.discover_functions(file)?;
    builder.build_bodies(file)?;

    Ok(Tir {
        source_name: file.name.clone(),
        prototypes: builder.prototypes,
        functions: builder.functions,
    })
}

struct TirBuilder {
    prototypes: Vec<Prototype>,
    functions: Vec<Function>,
    fn_ids: HashMap<String, FunctionId>,
}

impl TirBuilder {
    // ── Pass 1: function discovery ────────────────────────────────

    fn discover_functions(&mut self, file: &ast::SourceFile) -> Result<(), Diagnostic> {
        for decl in &file.declarations {
            match &decl.node {
                ast::Declaration::Let(var) => {
                    return Err(Diagnostic::error(
                        "global variables not allowed".to_string(),
                        var.name.span,
                    )
                    .with_help(format!(
                        "move '{}' into a function body",
                        var.name.node
                    )));
                }
                ast::Declaration::Fn(func) => self.register_function(func)?,
            }
        }
        Ok(())
    }

    fn register_function(&mut self, func: &ast::FnDecl) -> Result<(), Diagnostic> {
        let prototype = Prototype {
            inputs: func.params.iter().map(|p| p.ty.node).collect(),
            output: func.return_ty.as_ref().map(|t| t.node).unwrap_or(Ty::Void),
        };

        if let Some(&id) = self.fn_ids.get(&func.name.node) {
            let existing = &self.functions[id as usize];
            if self.prototypes[existing.prototype as usize] != prototype {
                return Err(Diagnostic::error(
                    "unmatched function prototypes".to_string(),
                    func.name.span,
                )
                .with_note(format!(
                    "'{}' was already declared with a different signature",
                    func.name.node
                )));
            }
            return Ok(());
        }

        let prototype_id = self.prototypes.len() as u32;
        self.prototypes.push(prototype);

        let id = self.functions.len() as FunctionId;
        self.functions.push(Function {
            prototype: prototype_id,
            name: func.name.node.clone(),
            name_span: func.name.span,
            body: None,
        });
        self.fn_ids.insert(func.name.node.clone(), id);
        Ok(())
    }

    // ── Pass 2: body building ─────────────────────────────────────

    fn build_bodies(&mut self, file: &ast::SourceFile) -> Result<(), Diagnostic> {
        for decl in &file.declarations {
            let func = match &decl.node {
                ast::Declaration::Fn(func) => func,
                ast::Declaration::Let(_) => continue,
            };
            let Some(ast_body) = &func.body else {
                continue;
            };

            let id = self.fn_ids[&func.name.node];
            let prototype = self.prototypes[self.functions[id as usize].prototype as usize].clone();

            let mut fb = FunctionBuilder {
                tir: self,
                scopes: vec![HashMap::new()],
                locals: Vec::new(),
            };

            // Parameters occupy the first local ids and start initialised.
            for (param, ty) in func.params.iter().zip(prototype.inputs.iter()) {
                fb.declare_local(&param.name.node, *ty, true);
            }

            let body = fb.build_block(&ast_body.node)?;
            self.functions[id as usize].body = Some(body);
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct LocalMeta {
    ty: Ty,
    initialized: bool,
}

struct FunctionBuilder<'a> {
    tir: &'a TirBuilder,
    /// Lexical scope stack; lookups walk it back to front.
    scopes: Vec<HashMap<String, LocalId>>,
    /// Per-function local table indexed by id. Ids are never reused,
    /// keeping them unique within the function.
    locals: Vec<LocalMeta>,
}

impl FunctionBuilder<'_> {
    fn declare_local(&mut self, name: &str, ty: Ty, initialized: bool) -> LocalId {
        let id = self.locals.len() as LocalId;
        self.locals.push(LocalMeta { ty, initialized });
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_string(), id);
        id
    }

    fn lookup_local(&self, name: &str) -> Option<LocalId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn build_block(&mut self, block: &ast::Block) -> Result<Block, Diagnostic> {
        self.scopes.push(HashMap::new());
        let result = self.build_block_inner(block);
        self.scopes.pop();
        result
    }

    fn build_block_inner(&mut self, block: &ast::Block) -> Result<Block, Diagnostic> {
        let mut locals = Vec::new();
        let mut statements = Vec::new();

        for stmt in &block.stmts {
            match &stmt.node {
                ast::Stmt::Expr(expr) => {
                    statements.push(Statement::Expression(self.build_expr(expr)?));
                }

                ast::Stmt::Decl(ast::Declaration::Fn(func)) => {
                    return Err(Diagnostic::error(
                        "local functions not allowed".to_string(),
                        func.name.span,
                    )
                    .with_help(format!(
                        "move '{}' to the top level",
                        func.name.node
                    )));
                }

                ast::Stmt::Decl(ast::Declaration::Let(var)) => {
                    let ty = var.ty.node;
                    let id = self.declare_local(&var.name.node, ty, var.init.is_some());
                    locals.push(LocalVariable {
                        id,
                        name: var.name.node.clone(),
                        ty,
                    });

                    if let Some(init) = &var.init {
                        let value = self.build_expr(init)?;
                        if value.ty != ty {
                            return Err(Diagnostic::error(
                                format!(
                                    "unexpected initializer type (expected {}, actual {})",
                                    ty, value.ty
                                ),
                                init.span,
                            ));
                        }
                        statements.push(Statement::Expression(Expression {
                            kind: ExprKind::Assignment {
                                destination: id,
                                value: Box::new(value),
                            },
                            ty: Ty::Void,
                            span: stmt.span,
                        }));
                    }
                }

                ast::Stmt::Block(inner) => {
                    statements.push(Statement::Block(self.build_block(&inner.node)?));
                }

                ast::Stmt::If {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let condition = self.build_expr(cond)?;
                    if condition.ty != Ty::U32 {
                        return Err(Diagnostic::error(
                            format!(
                                "if condition type must be u32 (actual {})",
                                condition.ty
                            ),
                            cond.span,
                        ));
                    }
                    let then_block = self.build_block(&then_block.node)?;
                    let else_block = match else_block {
                        Some(block) => self.build_block(&block.node)?,
                        None => Block::empty(),
                    };
                    statements.push(Statement::If {
                        condition,
                        then_block,
                        else_block,
                    });
                }

                ast::Stmt::While { cond, body } => {
                    let condition = self.build_expr(cond)?;
                    if condition.ty != Ty::U32 {
                        return Err(Diagnostic::error(
                            format!(
                                "while condition type must be u32 (actual {})",
                                condition.ty
                            ),
                            cond.span,
                        ));
                    }
                    let body = self.build_block(&body.node)?;
                    statements.push(Statement::Loop {
                        condition: Some(condition),
                        body,
                    });
                }
            }
        }

        Ok(Block { locals, statements })
    }

    fn build_expr(&mut self, expr: &Spanned<ast::Expr>) -> Result<Expression, Diagnostic> {
        let span = expr.span;
        match &expr.node {
            ast::Expr::Integer(_) | ast::Expr::Floating(_) => Err(Diagnostic::error(
                "cannot deduce literal type".to_string(),
                span,
            )
            .with_help("annotate the literal, e.g. `1 as i32`".to_string())),

            ast::Expr::Ident(name) => {
                let id = self.resolve_variable(name, span)?;
                let meta = self.locals[id as usize];
                if !meta.initialized {
                    return Err(Diagnostic::error(
                        format!("use of uninitialized variable '{}'", name),
                        span,
                    ));
                }
                Ok(Expression {
                    kind: ExprKind::Local(id),
                    ty: meta.ty,
                    span,
                })
            }

            ast::Expr::Call { callee, args } => self.build_call(callee, args, span),

            ast::Expr::Conversion { inner, ty } => self.build_conversion(inner, ty, span),

            ast::Expr::Assignment { dest, op, value } => {
                self.build_assignment(dest, *op, value, span)
            }

            ast::Expr::Binary { op, lhs, rhs } => {
                let lhs = self.build_expr(lhs)?;
                let rhs = self.build_expr(rhs)?;
                self.build_binary(*op, lhs, rhs, span)
            }
        }
    }

    fn build_call(
        &mut self,
        callee: &Spanned<ast::Expr>,
        args: &[Spanned<ast::Expr>],
        span: Span,
    ) -> Result<Expression, Diagnostic> {
        let ast::Expr::Ident(name) = &callee.node else {
            return Err(Diagnostic::error(
                "expression is not callable".to_string(),
                callee.span,
            ));
        };

        let Some(&id) = self.tir.fn_ids.get(name) else {
            return Err(Diagnostic::error(
                format!("function '{}' does not exist", name),
                callee.span,
            ));
        };
        let function = &self.tir.functions[id as usize];
        let prototype = &self.tir.prototypes[function.prototype as usize];

        if args.len() != prototype.inputs.len() {
            return Err(Diagnostic::error(
                format!(
                    "unexpected argument number (expected {}, actual {})",
                    prototype.inputs.len(),
                    args.len()
                ),
                span,
            ));
        }

        let mut built_args = Vec::with_capacity(args.len());
        for (index, (arg, expected)) in args.iter().zip(prototype.inputs.iter()).enumerate() {
            let built = self.build_expr(arg)?;
            if built.ty != *expected {
                return Err(Diagnostic::error(
                    format!(
                        "unexpected argument type (parameter {}, expected {}, actual {})",
                        index, expected, built.ty
                    ),
                    arg.span,
                ));
            }
            built_args.push(built);
        }

        Ok(Expression {
            kind: ExprKind::Call {
                function: id,
                args: built_args,
            },
            ty: prototype.output,
            span,
        })
    }

    fn build_conversion(
        &mut self,
        inner: &Spanned<ast::Expr>,
        ty: &Spanned<Ty>,
        span: Span,
    ) -> Result<Expression, Diagnostic> {
        let target = ty.node;

        // Literal conversions are evaluated at build time; this is the only
        // context that gives a literal its type.
        match &inner.node {
            ast::Expr::Integer(value) => {
                return Ok(Expression {
                    kind: fold_literal_cast(*value as f64, *value, target),
                    ty: target,
                    span,
                })
            }
            ast::Expr::Floating(value) => {
                return Ok(Expression {
                    kind: fold_literal_cast(*value, *value as u64, target),
                    ty: target,
                    span,
                })
            }
            _ => {}
        }

        let built = self.build_expr(inner)?;
        if built.ty == Ty::Void && target != Ty::Void {
            return Err(Diagnostic::error(
                format!("impossible cast (from {}, to {})", built.ty, target),
                span,
            ));
        }

        Ok(Expression {
            kind: ExprKind::Cast {
                inner: Box::new(built),
                to: target,
            },
            ty: target,
            span,
        })
    }

    fn build_assignment(
        &mut self,
        dest: &Spanned<String>,
        op: ast::AssignOp,
        value: &Spanned<ast::Expr>,
        span: Span,
    ) -> Result<Expression, Diagnostic> {
        let id = self.resolve_variable(&dest.node, dest.span)?;
        let dest_ty = self.locals[id as usize].ty;

        // Compound forms desugar to `dest = dest op value`; the destination
        // read goes through the normal initialisation check.
        let value = match op {
            ast::AssignOp::Plain => self.build_expr(value)?,
            compound => {
                if !self.locals[id as usize].initialized {
                    return Err(Diagnostic::error(
                        format!("use of uninitialized variable '{}'", dest.node),
                        dest.span,
                    ));
                }
                let lhs = Expression {
                    kind: ExprKind::Local(id),
                    ty: dest_ty,
                    span: dest.span,
                };
                let rhs = self.build_expr(value)?;
                let bin_op = match compound {
                    ast::AssignOp::Add => ast::BinOp::Add,
                    ast::AssignOp::Sub => ast::BinOp::Sub,
                    ast::AssignOp::Mul => ast::BinOp::Mul,
                    ast::AssignOp::Div => ast::BinOp::Div,
                    ast::AssignOp::Plain => unreachable!("plain handled above"),
                };
                self.build_binary(bin_op, lhs, rhs, span)?
            }
        };

        if value.ty != dest_ty {
            return Err(Diagnostic::error(
                format!(
                    "unexpected assignment value type (expected {}, actual {})",
                    dest_ty, value.ty
                ),
                span,
            ));
        }

        self.locals[id as usize].initialized = true;

        Ok(Expression {
            kind: ExprKind::Assignment {
                destination: id,
                value: Box::new(value),
            },
            ty: Ty::Void,
            span,
        })
    }

    fn build_binary(
        &mut self,
        op: ast::BinOp,
        lhs: Expression,
        rhs: Expression,
        span: Span,
    ) -> Result<Expression, Diagnostic> {
        if lhs.ty != rhs.ty {
            return Err(Diagnostic::error(
                "operand types unmatched".to_string(),
                span,
            )
            .with_note(format!("left operand is {}", lhs.ty))
            .with_note(format!("right operand is {}", rhs.ty)));
        }
        if lhs.ty == Ty::Void {
            return Err(Diagnostic::error(
                format!("operator is not defined for type {}", lhs.ty),
                span,
            ));
        }

        let op = match op {
            ast::BinOp::Add => BinaryOp::Add,
            ast::BinOp::Sub => BinaryOp::Sub,
            ast::BinOp::Mul => BinaryOp::Mul,
            ast::BinOp::Div => BinaryOp::Div,
            ast::BinOp::Lt => BinaryOp::Lt,
            ast::BinOp::Le => BinaryOp::Le,
            ast::BinOp::Gt => BinaryOp::Gt,
            ast::BinOp::Ge => BinaryOp::Ge,
            ast::BinOp::Eq => BinaryOp::Eq,
            ast::BinOp::Ne => BinaryOp::Ne,
        };

        let ty = if op.is_comparison() { Ty::U32 } else { lhs.ty };

        Ok(Expression {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            span,
        })
    }

    fn resolve_variable(&self, name: &str, span: Span) -> Result<LocalId, Diagnostic> {
        self.lookup_local(name).ok_or_else(|| {
            Diagnostic::error(
                format!("unknown variable '{}' referenced", name),
                span,
            )
        })
    }
}

/// Evaluate `literal as target` at build time. The caller provides the
/// literal in both float and integer form; the target picks the cast.
fn fold_literal_cast(as_float: f64, as_int: u64, target: Ty) -> ExprKind {
    match target {
        Ty::I32 => ExprKind::ConstI32(as_int as i32),
        Ty::U32 => ExprKind::ConstU32(as_int as u32),
        Ty::F32 => ExprKind::ConstF32(as_float as f32),
        Ty::Void => ExprKind::Void,
    }
}
