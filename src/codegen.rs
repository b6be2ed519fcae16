//! TIR -> bytecode lowering, producing a relocatable object.
//!
//! Calling convention: `fx` is the frame pointer, `ex` the top of the
//! locals area. A function pops its arguments into slots below the entry
//! `ex`, saves the caller's `fx` on the operand stack, sets `fx = ex`, and
//! advances `ex` over its argument slots; every block advances `ex` over
//! its own locals on entry and retreats on exit. A local in slot `s` lives
//! at `fx - 4*(s+1)`. Every expression leaves exactly one 32-bit value on
//! the operand stack.

use std::collections::HashMap;

use crate::bytecode::{Opcode, PushPopInfo, Register};
use crate::diagnostic::Diagnostic;
use crate::object::{Label, Link, Object, NAME_MAX};
use crate::span::Span;
use crate::tir::{BinaryOp, Block, ExprKind, Expression, LocalId, Statement, Tir};
use crate::types::Ty;

/// Lower a TIR program into a relocatable object.
pub fn generate(tir: &Tir) -> Result<Object, Diagnostic> {
    let mut generator = CodeGenerator {
        tir,
        code: Vec::new(),
        labels: Vec::new(),
        links: Vec::new(),
        current_function: String::new(),
        current_span: Span::dummy(),
        condition_counter: 0,
        loop_counter: 0,
        compare_counter: 0,
        slots: HashMap::new(),
        depth: 0,
    };

    generator.gen_prelude()?;
    for function in &tir.functions {
        generator.gen_function(function)?;
    }

    Ok(Object {
        source_name: tir.source_name.clone(),
        code: generator.code,
        labels: generator.labels,
        links: generator.links,
    })
}

struct CodeGenerator<'a> {
    tir: &'a Tir,
    code: Vec<u8>,
    labels: Vec<Label>,
    links: Vec<Link>,

    current_function: String,
    current_span: Span,
    condition_counter: u32,
    loop_counter: u32,
    compare_counter: u32,
    /// Local id -> frame slot index. Sibling blocks reuse slots, ids don't.
    slots: HashMap<LocalId, u32>,
    /// Count of live slots (arguments plus enclosing block locals).
    depth: u32,
}

impl CodeGenerator<'_> {
    // ── Emission primitives ───────────────────────────────────────

    fn emit_opcode(&mut self, opcode: Opcode) {
        self.code.push(opcode as u8);
    }

    fn emit_push(&mut self, info: PushPopInfo, imm: u32) {
        self.emit_push_pop(Opcode::Push, info, imm);
    }

    fn emit_pop(&mut self, info: PushPopInfo, imm: u32) {
        self.emit_push_pop(Opcode::Pop, info, imm);
    }

    fn emit_push_pop(&mut self, opcode: Opcode, info: PushPopInfo, imm: u32) {
        self.code.push(opcode as u8);
        self.code.push(info.to_byte());
        if info.use_imm {
            self.code.extend_from_slice(&imm.to_le_bytes());
        }
    }

    /// Push a 32-bit constant: `push cz` for zero, `push cz + imm` otherwise.
    fn emit_push_const(&mut self, value: u32) {
        if value == 0 {
            self.emit_push(PushPopInfo::register(Register::Cz), 0);
        } else {
            self.emit_push(PushPopInfo::register_imm(Register::Cz), value);
        }
    }

    fn check_name(&self, name: &str) -> Result<(), Diagnostic> {
        if name.len() > NAME_MAX {
            return Err(Diagnostic::error(
                format!("too long name '{}'", name),
                self.current_span,
            ));
        }
        Ok(())
    }

    fn add_label(&mut self, name: &str) -> Result<(), Diagnostic> {
        self.check_name(name)?;
        self.labels.push(Label {
            source_line: 0,
            value: self.code.len() as u32,
            is_relative: true,
            name: name.to_string(),
        });
        Ok(())
    }

    /// Record a link at the current offset and write its 4-byte placeholder.
    fn add_link(&mut self, name: &str) -> Result<(), Diagnostic> {
        self.check_name(name)?;
        self.links.push(Link {
            source_line: 0,
            code_offset: self.code.len() as u32,
            name: name.to_string(),
        });
        self.code.extend_from_slice(&[0xFF; 4]);
        Ok(())
    }

    /// Adjust `ex` by a signed byte amount via `push ex + delta; pop ex`.
    fn emit_adjust_ex(&mut self, delta: i32) {
        self.emit_push(PushPopInfo::register_imm(Register::Ex), delta as u32);
        self.emit_pop(PushPopInfo::register(Register::Ex), 0);
    }

    // ── Program structure ─────────────────────────────────────────

    /// Initialise `ex`/`fx` to the memory size, call `main`, halt.
    fn gen_prelude(&mut self) -> Result<(), Diagnostic> {
        self.emit_opcode(Opcode::Mgs);
        self.emit_pop(PushPopInfo::register(Register::Ex), 0);
        self.emit_opcode(Opcode::Mgs);
        self.emit_pop(PushPopInfo::register(Register::Fx), 0);
        self.emit_opcode(Opcode::Call);
        self.add_link("main")?;
        self.emit_opcode(Opcode::Halt);
        Ok(())
    }

    fn gen_function(&mut self, function: &crate::tir::Function) -> Result<(), Diagnostic> {
        let Some(body) = &function.body else {
            return Ok(());
        };

        self.current_function = function.name.clone();
        self.current_span = function.name_span;
        self.condition_counter = 0;
        self.loop_counter = 0;
        self.compare_counter = 0;
        self.slots.clear();
        self.depth = 0;

        self.add_label(&function.name)?;

        let arg_count = self.tir.prototype(function.prototype).inputs.len() as u32;

        // Arguments come off the operand stack into slots below entry `ex`;
        // parameter ids are the first ids of the function.
        for i in 0..arg_count {
            self.emit_pop(PushPopInfo::memory_imm(Register::Ex), slot_offset(i));
            self.slots.insert(i, i);
        }
        self.depth = arg_count;

        // Save caller frame pointer, establish the new frame.
        self.emit_push(PushPopInfo::register(Register::Fx), 0);
        self.emit_push(PushPopInfo::register(Register::Ex), 0);
        self.emit_pop(PushPopInfo::register(Register::Fx), 0);
        self.emit_adjust_ex(arg_count as i32 * 4);

        self.gen_block(body)?;

        self.gen_epilogue();
        Ok(())
    }

    /// Restore `ex` from `fx`, pop the caller's `fx`, return.
    fn gen_epilogue(&mut self) {
        self.emit_push(PushPopInfo::register(Register::Fx), 0);
        self.emit_pop(PushPopInfo::register(Register::Ex), 0);
        self.emit_pop(PushPopInfo::register(Register::Fx), 0);
        self.emit_opcode(Opcode::Ret);
    }

    fn gen_block(&mut self, block: &Block) -> Result<(), Diagnostic> {
        let local_count = block.locals.len() as u32;
        for (index, local) in block.locals.iter().enumerate() {
            self.slots.insert(local.id, self.depth + index as u32);
        }
        self.depth += local_count;
        self.emit_adjust_ex(local_count as i32 * 4);

        for statement in &block.statements {
            self.gen_statement(statement)?;
        }

        self.emit_adjust_ex(-(local_count as i32) * 4);
        self.depth -= local_count;
        Ok(())
    }

    fn gen_statement(&mut self, statement: &Statement) -> Result<(), Diagnostic> {
        match statement {
            Statement::Expression(expr) => {
                self.gen_expression(expr)?;
                // every expression leaves one value; drop it
                self.emit_pop(PushPopInfo::register(Register::Cz), 0);
            }

            Statement::Block(block) => self.gen_block(block)?,

            Statement::Return(expr) => {
                self.gen_expression(expr)?;
                self.emit_pop(PushPopInfo::register(Register::Ax), 0);
                self.gen_epilogue();
            }

            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                let index = self.condition_counter;
                self.condition_counter += 1;
                let else_label = format!("__{}__else_{}", self.current_function, index);
                let end_label = format!("__{}__if_end_{}", self.current_function, index);

                self.gen_expression(condition)?;
                self.emit_push_const(0);
                self.emit_opcode(Opcode::Cmp);
                self.emit_opcode(Opcode::Je);
                self.add_link(&else_label)?;

                self.gen_block(then_block)?;
                self.emit_opcode(Opcode::Jmp);
                self.add_link(&end_label)?;

                self.add_label(&else_label)?;
                self.gen_block(else_block)?;
                self.add_label(&end_label)?;
            }

            Statement::Loop { condition, body } => {
                let index = self.loop_counter;
                self.loop_counter += 1;
                let loop_label = format!("__{}__loop_{}", self.current_function, index);
                let end_label = format!("__{}__loop_end_{}", self.current_function, index);

                self.add_label(&loop_label)?;

                if let Some(condition) = condition {
                    self.gen_expression(condition)?;
                    self.emit_push_const(0);
                    self.emit_opcode(Opcode::Cmp);
                    self.emit_opcode(Opcode::Je);
                    self.add_link(&end_label)?;
                }

                self.gen_block(body)?;
                self.emit_opcode(Opcode::Jmp);
                self.add_link(&loop_label)?;
                self.add_label(&end_label)?;
            }
        }
        Ok(())
    }

    // ── Expressions ───────────────────────────────────────────────

    fn gen_expression(&mut self, expr: &Expression) -> Result<(), Diagnostic> {
        match &expr.kind {
            ExprKind::ConstI32(value) => self.emit_push_const(*value as u32),
            ExprKind::ConstU32(value) => self.emit_push_const(*value),
            ExprKind::ConstF32(value) => {
                self.emit_push(PushPopInfo::register_imm(Register::Cz), value.to_bits())
            }
            ExprKind::Void => self.emit_push_const(0),

            ExprKind::Local(id) => {
                let offset = slot_offset(self.slots[id]);
                self.emit_push(PushPopInfo::memory_imm(Register::Fx), offset);
            }

            ExprKind::Assignment { destination, value } => {
                self.gen_expression(value)?;
                let offset = slot_offset(self.slots[destination]);
                self.emit_pop(PushPopInfo::memory_imm(Register::Fx), offset);
                // the assignment itself is void, which still has a value
                self.emit_push_const(0);
            }

            ExprKind::Binary { op, lhs, rhs } => {
                self.gen_expression(lhs)?;
                self.gen_expression(rhs)?;
                if op.is_comparison() {
                    self.gen_comparison(*op, lhs.ty)?;
                } else {
                    self.emit_opcode(arithmetic_opcode(*op, expr.ty));
                }
            }

            ExprKind::Call { function, args } => {
                for arg in args.iter().rev() {
                    self.gen_expression(arg)?;
                }
                let name = self.tir.function(*function).name.clone();
                self.emit_opcode(Opcode::Call);
                self.add_link(&name)?;
                self.emit_push(PushPopInfo::register(Register::Ax), 0);
            }

            ExprKind::Cast { inner, to } => {
                self.gen_expression(inner)?;
                self.gen_cast(inner.ty, *to);
            }
        }
        Ok(())
    }

    /// Materialise the comparison flags into a `u32` 0/1 value.
    fn gen_comparison(&mut self, op: BinaryOp, operand_ty: Ty) -> Result<(), Diagnostic> {
        let compare = match operand_ty {
            Ty::I32 => Opcode::Icmp,
            Ty::U32 => Opcode::Cmp,
            Ty::F32 => Opcode::Fcmp,
            Ty::Void => unreachable!("void operands are rejected by the TIR builder"),
        };
        self.emit_opcode(compare);

        let jump = match op {
            BinaryOp::Lt => Opcode::Jl,
            BinaryOp::Le => Opcode::Jle,
            BinaryOp::Gt => Opcode::Jg,
            BinaryOp::Ge => Opcode::Jge,
            BinaryOp::Eq => Opcode::Je,
            BinaryOp::Ne => Opcode::Jne,
            _ => unreachable!("arithmetic operators are handled separately"),
        };

        let index = self.compare_counter;
        self.compare_counter += 1;
        let set_label = format!("__{}__set_{}", self.current_function, index);
        let end_label = format!("__{}__set_end_{}", self.current_function, index);

        self.emit_opcode(jump);
        self.add_link(&set_label)?;
        self.emit_push_const(0);
        self.emit_opcode(Opcode::Jmp);
        self.add_link(&end_label)?;
        self.add_label(&set_label)?;
        self.emit_push_const(1);
        self.add_label(&end_label)?;
        Ok(())
    }

    fn gen_cast(&mut self, from: Ty, to: Ty) {
        if to == Ty::Void {
            // drop the value, leave the synthetic void value instead
            self.emit_pop(PushPopInfo::register(Register::Cz), 0);
            self.emit_push_const(0);
            return;
        }
        if from == to || (from.is_integer() && to.is_integer()) {
            return;
        }
        if to == Ty::F32 {
            self.emit_opcode(Opcode::Itof);
        } else {
            self.emit_opcode(Opcode::Ftoi);
        }
    }
}

/// Byte offset of a frame slot relative to `fx` (slots grow downward).
fn slot_offset(slot: u32) -> u32 {
    ((slot + 1) * 4).wrapping_neg()
}

fn arithmetic_opcode(op: BinaryOp, ty: Ty) -> Opcode {
    match (op, ty) {
        (BinaryOp::Add, Ty::F32) => Opcode::Fadd,
        (BinaryOp::Add, _) => Opcode::Add,
        (BinaryOp::Sub, Ty::F32) => Opcode::Fsub,
        (BinaryOp::Sub, _) => Opcode::Sub,
        (BinaryOp::Mul, Ty::I32) => Opcode::Imul,
        (BinaryOp::Mul, Ty::F32) => Opcode::Fmul,
        (BinaryOp::Mul, _) => Opcode::Mul,
        (BinaryOp::Div, Ty::I32) => Opcode::Idiv,
        (BinaryOp::Div, Ty::F32) => Opcode::Fdiv,
        (BinaryOp::Div, _) => Opcode::Div,
        _ => unreachable!("comparisons do not reach arithmetic selection"),
    }
}
