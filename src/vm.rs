//! The stack-machine interpreter.
//!
//! Eight 32-bit registers, a byte-addressed linear memory, a 32-bit
//! operand stack and a call stack of return offsets. The instruction
//! counter is a byte offset into the code image. Execution is strictly
//! in-order on one thread; the sandbox is only entered at suspension
//! points, and every memory access is bounds-checked.

use std::fmt;

use crate::bytecode::{Key, Opcode, PushPopInfo, VideoStorageFormat, VideoUpdateMode};
use crate::executable::Executable;
use crate::sandbox::{ExecContext, Sandbox};

/// Typical RAM size: 1 MiB.
pub const DEFAULT_MEMORY_SIZE: u32 = 1 << 20;

const REGISTER_COUNT: usize = 8;
const REG_FL: usize = 1;
const REG_AX: usize = 2;

const FL_IS_LT: u32 = 1 << 0;
const FL_IS_EQ: u32 = 1 << 1;
const FL_STORAGE_SHIFT: u32 = 2;
const FL_STORAGE_MASK: u32 = 0x7 << FL_STORAGE_SHIFT;
const FL_UPDATE_BIT: u32 = 1 << 5;

/// Why execution stopped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TermReason {
    Halt,
    SandboxError,
    InternalError,
    UnknownSyscall { index: u32 },
    UnknownOpcode { opcode: u8 },
    UnexpectedCodeEnd,
    UnknownRegister { index: u32 },
    Unreachable,
    NoOperands,
    StackUnderflow,
    CallStackUnderflow,
    InvalidIc { target: u32 },
    SegmentationFault { addr: u32, memory_size: u32 },
    InvalidPopInfo,
    InvalidVideoMode { bits: u32 },
    DivisionByZero,
}

impl fmt::Display for TermReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermReason::Halt => write!(f, "halt"),
            TermReason::SandboxError => write!(f, "sandbox error"),
            TermReason::InternalError => write!(f, "internal error"),
            TermReason::UnknownSyscall { index } => write!(f, "unknown syscall {}", index),
            TermReason::UnknownOpcode { opcode } => write!(f, "unknown opcode {:#04x}", opcode),
            TermReason::UnexpectedCodeEnd => write!(f, "unexpected code end"),
            TermReason::UnknownRegister { index } => write!(f, "unknown register {}", index),
            TermReason::Unreachable => write!(f, "unreachable executed"),
            TermReason::NoOperands => write!(f, "no operands on stack"),
            TermReason::StackUnderflow => write!(f, "operand stack underflow"),
            TermReason::CallStackUnderflow => write!(f, "call stack underflow"),
            TermReason::InvalidIc { target } => {
                write!(f, "invalid instruction counter {:#x}", target)
            }
            TermReason::SegmentationFault { addr, memory_size } => write!(
                f,
                "segmentation fault (addr {:#x}, memory size {:#x})",
                addr, memory_size
            ),
            TermReason::InvalidPopInfo => write!(f, "invalid pop info"),
            TermReason::InvalidVideoMode { bits } => {
                write!(f, "invalid video mode {:#x}", bits)
            }
            TermReason::DivisionByZero => write!(f, "division by zero"),
        }
    }
}

/// Termination description: the reason and the byte offset of the
/// instruction at which it occurred.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TermInfo {
    pub reason: TermReason,
    pub offset: usize,
}

impl fmt::Display for TermInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {:#x}", self.reason, self.offset)
    }
}

/// Run an executable against `memory_size` bytes of zeroed RAM and the
/// given sandbox. Always returns the termination info; the sandbox's
/// `terminate` callback sees the same value unless `initialize` failed.
pub fn execute(executable: &Executable, memory_size: u32, sandbox: &mut dyn Sandbox) -> TermInfo {
    let mut vm = Vm {
        code: &executable.code,
        ic: 0,
        instruction_start: 0,
        registers: [0; REGISTER_COUNT],
        memory: vec![0; memory_size as usize],
        memory_size,
        operand_stack: Vec::new(),
        call_stack: Vec::new(),
        sandbox,
    };

    let ctx = ExecContext {
        memory: &vm.memory,
        memory_size,
    };
    if !vm.sandbox.initialize(ctx) {
        // no terminate callback after a failed initialize
        return TermInfo {
            reason: TermReason::SandboxError,
            offset: 0,
        };
    }

    let reason = vm.run();
    let info = TermInfo {
        reason,
        offset: vm.instruction_start,
    };
    vm.sandbox.terminate(&info);
    info
}

struct Vm<'a> {
    code: &'a [u8],
    ic: usize,
    /// Offset of the instruction currently executing, reported on exit.
    instruction_start: usize,
    registers: [u32; REGISTER_COUNT],
    memory: Vec<u8>,
    memory_size: u32,
    operand_stack: Vec<u32>,
    call_stack: Vec<u32>,
    sandbox: &'a mut dyn Sandbox,
}

impl Vm<'_> {
    fn run(&mut self) -> TermReason {
        loop {
            self.instruction_start = self.ic;
            if let Err(reason) = self.step() {
                return reason;
            }
        }
    }

    fn step(&mut self) -> Result<(), TermReason> {
        let opcode_byte = self.read_u8()?;
        let opcode = Opcode::from_u8(opcode_byte).ok_or(TermReason::UnknownOpcode {
            opcode: opcode_byte,
        })?;

        match opcode {
            Opcode::Unreachable => return Err(TermReason::Unreachable),
            Opcode::Halt => return Err(TermReason::Halt),

            Opcode::Syscall => self.syscall()?,

            Opcode::Add => self.binary_u32(|l, r| Ok(l.wrapping_add(r)))?,
            Opcode::Sub => self.binary_u32(|l, r| Ok(l.wrapping_sub(r)))?,
            Opcode::Shl => self.binary_u32(|l, r| Ok(l.wrapping_shl(r)))?,
            Opcode::Shr => self.binary_u32(|l, r| Ok(l.wrapping_shr(r)))?,
            Opcode::Sar => self.binary_i32(|l, r| Ok(l.wrapping_shr(r as u32)))?,
            Opcode::Or => self.binary_u32(|l, r| Ok(l | r))?,
            Opcode::Xor => self.binary_u32(|l, r| Ok(l ^ r))?,
            Opcode::And => self.binary_u32(|l, r| Ok(l & r))?,

            Opcode::Mul => self.binary_u32(|l, r| Ok(l.wrapping_mul(r)))?,
            Opcode::Imul => self.binary_i32(|l, r| Ok(l.wrapping_mul(r)))?,
            Opcode::Div => self.binary_u32(|l, r| {
                if r == 0 {
                    Err(TermReason::DivisionByZero)
                } else {
                    Ok(l / r)
                }
            })?,
            Opcode::Idiv => self.binary_i32(|l, r| {
                if r == 0 {
                    Err(TermReason::DivisionByZero)
                } else {
                    Ok(l.wrapping_div(r))
                }
            })?,

            Opcode::Fadd => self.binary_f32(|l, r| l + r)?,
            Opcode::Fsub => self.binary_f32(|l, r| l - r)?,
            Opcode::Fmul => self.binary_f32(|l, r| l * r)?,
            Opcode::Fdiv => self.binary_f32(|l, r| l / r)?,

            Opcode::Ftoi => {
                let value = f32::from_bits(self.pop_operand()?);
                self.push_operand(value as i32 as u32);
            }
            Opcode::Itof => {
                let value = self.pop_operand()? as i32;
                self.push_operand((value as f32).to_bits());
            }

            Opcode::Fsin => self.unary_f32(f32::sin)?,
            Opcode::Fcos => self.unary_f32(f32::cos)?,
            Opcode::Fneg => self.unary_f32(|v| -v)?,
            Opcode::Fsqrt => self.unary_f32(f32::sqrt)?,

            Opcode::Cmp => {
                let rhs = self.pop_operand()?;
                let lhs = self.pop_operand()?;
                self.set_comparison_flags(lhs < rhs, lhs == rhs);
            }
            Opcode::Icmp => {
                let rhs = self.pop_operand()? as i32;
                let lhs = self.pop_operand()? as i32;
                self.set_comparison_flags(lhs < rhs, lhs == rhs);
            }
            Opcode::Fcmp => {
                let rhs = f32::from_bits(self.pop_operand()?);
                let lhs = f32::from_bits(self.pop_operand()?);
                self.set_comparison_flags(lhs < rhs, lhs == rhs);
            }

            Opcode::Jmp => self.conditional_jump(true)?,
            Opcode::Jle => self.conditional_jump(self.flag(FL_IS_LT) || self.flag(FL_IS_EQ))?,
            Opcode::Jl => self.conditional_jump(self.flag(FL_IS_LT))?,
            Opcode::Jge => self.conditional_jump(!self.flag(FL_IS_LT))?,
            Opcode::Jg => self.conditional_jump(!self.flag(FL_IS_LT) && !self.flag(FL_IS_EQ))?,
            Opcode::Je => self.conditional_jump(self.flag(FL_IS_EQ))?,
            Opcode::Jne => self.conditional_jump(!self.flag(FL_IS_EQ))?,

            Opcode::Call => {
                let target = self.read_u32()?;
                self.call_stack.push(self.ic as u32);
                self.jump(target)?;
            }
            Opcode::Ret => {
                let target = self
                    .call_stack
                    .pop()
                    .ok_or(TermReason::CallStackUnderflow)?;
                self.ic = target as usize;
            }

            Opcode::Push => {
                let info = PushPopInfo::from_byte(self.read_u8()?);
                let mut value = if info.use_imm { self.read_u32()? } else { 0 };
                value = value.wrapping_add(self.read_register(info.register)?);
                if info.memory_access {
                    value = self.load_memory(value)?;
                }
                self.push_operand(value);
            }
            Opcode::Pop => {
                let info = PushPopInfo::from_byte(self.read_u8()?);
                let value = self.pop_operand()?;
                if info.memory_access {
                    let imm = if info.use_imm { self.read_u32()? } else { 0 };
                    let addr = self.read_register(info.register)?.wrapping_add(imm);
                    self.store_memory(addr, value)?;
                } else {
                    if info.use_imm {
                        return Err(TermReason::InvalidPopInfo);
                    }
                    self.write_register(info.register, value)?;
                }
            }

            Opcode::Vsm => {
                self.check_cancelled()?;
                let bits = self.pop_operand()?;
                let format = VideoStorageFormat::from_bits(bits & 0x7)
                    .ok_or(TermReason::InvalidVideoMode { bits })?;
                let mode = VideoUpdateMode::from_bits((bits >> 3) & 0x1)
                    .ok_or(TermReason::InvalidVideoMode { bits })?;

                let fl = self.registers[REG_FL] & !(FL_STORAGE_MASK | FL_UPDATE_BIT);
                self.registers[REG_FL] = fl
                    | ((format as u32) << FL_STORAGE_SHIFT)
                    | if mode == VideoUpdateMode::Manual {
                        FL_UPDATE_BIT
                    } else {
                        0
                    };

                if !self.sandbox.set_video_mode(format, mode) {
                    return Err(TermReason::SandboxError);
                }
            }
            Opcode::Vrs => {
                self.check_cancelled()?;
                if !self.sandbox.refresh_screen(&self.memory) {
                    return Err(TermReason::SandboxError);
                }
            }

            Opcode::Time => {
                self.check_cancelled()?;
                let time = self
                    .sandbox
                    .get_execution_time()
                    .ok_or(TermReason::SandboxError)?;
                self.push_operand(time.to_bits());
            }
            Opcode::Mgs => self.push_operand(self.memory_size),

            Opcode::Iwkd => {
                self.check_cancelled()?;
                let key = self.sandbox.wait_key_down().ok_or(TermReason::SandboxError)?;
                self.push_operand(key.code());
            }
            Opcode::Igks => {
                self.check_cancelled()?;
                let value = self.pop_operand()?;
                let state = match Key::from_u32(value) {
                    None => 0,
                    Some(key) => {
                        let pressed = self
                            .sandbox
                            .get_key_state(key)
                            .ok_or(TermReason::SandboxError)?;
                        pressed as u32
                    }
                };
                self.push_operand(state);
            }
        }

        Ok(())
    }

    fn syscall(&mut self) -> Result<(), TermReason> {
        self.check_cancelled()?;
        let index = self.read_u32()?;
        match index {
            // read_float64
            0 => {
                let value = self.sandbox.read_float64() as f32;
                self.push_operand(value.to_bits());
            }
            // write_float64
            1 => {
                let value = f32::from_bits(self.pop_operand()?);
                self.sandbox.write_float64(value as f64);
            }
            _ => return Err(TermReason::UnknownSyscall { index }),
        }
        Ok(())
    }

    // ── Instruction stream ────────────────────────────────────────

    fn read_u8(&mut self) -> Result<u8, TermReason> {
        let byte = *self
            .code
            .get(self.ic)
            .ok_or(TermReason::UnexpectedCodeEnd)?;
        self.ic += 1;
        Ok(byte)
    }

    fn read_u32(&mut self) -> Result<u32, TermReason> {
        if self.ic + 4 > self.code.len() {
            return Err(TermReason::UnexpectedCodeEnd);
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.code[self.ic..self.ic + 4]);
        self.ic += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    fn jump(&mut self, target: u32) -> Result<(), TermReason> {
        if target as usize >= self.code.len() {
            return Err(TermReason::InvalidIc { target });
        }
        self.ic = target as usize;
        Ok(())
    }

    fn conditional_jump(&mut self, condition: bool) -> Result<(), TermReason> {
        let target = self.read_u32()?;
        if condition {
            self.jump(target)?;
        }
        Ok(())
    }

    // ── Operand stack ─────────────────────────────────────────────

    fn push_operand(&mut self, value: u32) {
        self.operand_stack.push(value);
    }

    fn pop_operand(&mut self) -> Result<u32, TermReason> {
        self.operand_stack.pop().ok_or(TermReason::NoOperands)
    }

    fn binary_u32(
        &mut self,
        op: impl FnOnce(u32, u32) -> Result<u32, TermReason>,
    ) -> Result<(), TermReason> {
        let rhs = self.pop_operand()?;
        let lhs = self.pop_operand()?;
        let result = op(lhs, rhs)?;
        self.push_operand(result);
        Ok(())
    }

    fn binary_i32(
        &mut self,
        op: impl FnOnce(i32, i32) -> Result<i32, TermReason>,
    ) -> Result<(), TermReason> {
        let rhs = self.pop_operand()? as i32;
        let lhs = self.pop_operand()? as i32;
        let result = op(lhs, rhs)?;
        self.push_operand(result as u32);
        Ok(())
    }

    fn binary_f32(&mut self, op: impl FnOnce(f32, f32) -> f32) -> Result<(), TermReason> {
        let rhs = f32::from_bits(self.pop_operand()?);
        let lhs = f32::from_bits(self.pop_operand()?);
        self.push_operand(op(lhs, rhs).to_bits());
        Ok(())
    }

    fn unary_f32(&mut self, op: impl FnOnce(f32) -> f32) -> Result<(), TermReason> {
        let value = f32::from_bits(self.pop_operand()?);
        self.push_operand(op(value).to_bits());
        Ok(())
    }

    // ── Registers and flags ───────────────────────────────────────

    fn read_register(&self, index: u8) -> Result<u32, TermReason> {
        self.registers
            .get(index as usize)
            .copied()
            .ok_or(TermReason::UnknownRegister {
                index: index as u32,
            })
    }

    fn write_register(&mut self, index: u8, value: u32) -> Result<(), TermReason> {
        if index as usize >= REGISTER_COUNT {
            return Err(TermReason::UnknownRegister {
                index: index as u32,
            });
        }
        // cz and fl silently discard direct writes
        if index as usize >= REG_AX {
            self.registers[index as usize] = value;
        }
        Ok(())
    }

    fn flag(&self, bit: u32) -> bool {
        self.registers[REG_FL] & bit != 0
    }

    fn set_comparison_flags(&mut self, is_lt: bool, is_eq: bool) {
        let mut fl = self.registers[REG_FL] & !(FL_IS_LT | FL_IS_EQ);
        if is_lt {
            fl |= FL_IS_LT;
        }
        if is_eq {
            fl |= FL_IS_EQ;
        }
        self.registers[REG_FL] = fl;
    }

    // ── Memory ────────────────────────────────────────────────────

    fn check_memory_access(&self, addr: u32) -> Result<usize, TermReason> {
        // an access touches [addr, addr + 4)
        if addr as u64 + 4 > self.memory_size as u64 {
            return Err(TermReason::SegmentationFault {
                addr,
                memory_size: self.memory_size,
            });
        }
        Ok(addr as usize)
    }

    fn load_memory(&self, addr: u32) -> Result<u32, TermReason> {
        let addr = self.check_memory_access(addr)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.memory[addr..addr + 4]);
        Ok(u32::from_le_bytes(bytes))
    }

    fn store_memory(&mut self, addr: u32, value: u32) -> Result<(), TermReason> {
        let addr = self.check_memory_access(addr)?;
        self.memory[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), TermReason> {
        if self.sandbox.should_terminate() {
            return Err(TermReason::SandboxError);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;
    use crate::linker::link;

    /// Records sandbox traffic and feeds scripted inputs.
    #[derive(Default)]
    struct TestSandbox {
        initialized: bool,
        terminated: Option<TermInfo>,
        reads: Vec<f64>,
        writes: Vec<f64>,
        video_modes: Vec<(VideoStorageFormat, VideoUpdateMode)>,
        refreshes: u32,
        keys: Vec<Key>,
        pressed: Vec<Key>,
        cancelled: bool,
    }

    impl Sandbox for TestSandbox {
        fn initialize(&mut self, ctx: ExecContext<'_>) -> bool {
            assert_eq!(ctx.memory.len(), ctx.memory_size as usize);
            self.initialized = true;
            true
        }

        fn terminate(&mut self, info: &TermInfo) {
            assert!(
                self.terminated.is_none(),
                "terminate must be called exactly once"
            );
            self.terminated = Some(*info);
        }

        fn get_execution_time(&mut self) -> Option<f32> {
            Some(0.25)
        }

        fn set_video_mode(&mut self, format: VideoStorageFormat, mode: VideoUpdateMode) -> bool {
            self.video_modes.push((format, mode));
            true
        }

        fn refresh_screen(&mut self, _memory: &[u8]) -> bool {
            self.refreshes += 1;
            true
        }

        fn wait_key_down(&mut self) -> Option<Key> {
            self.keys.pop()
        }

        fn get_key_state(&mut self, key: Key) -> Option<bool> {
            Some(self.pressed.contains(&key))
        }

        fn read_float64(&mut self) -> f64 {
            self.reads.pop().unwrap_or(0.0)
        }

        fn write_float64(&mut self, value: f64) {
            self.writes.push(value);
        }

        fn should_terminate(&self) -> bool {
            self.cancelled
        }
    }

    fn run_asm(source: &str, sandbox: &mut TestSandbox) -> TermInfo {
        let object = assemble(source, "test.cfasm").unwrap();
        let exe = link(&[object]).unwrap();
        execute(&exe, DEFAULT_MEMORY_SIZE, sandbox)
    }

    #[test]
    fn test_halt() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("halt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(info.offset, 0);
        assert_eq!(sandbox.terminated, Some(info));
    }

    #[test]
    fn test_unreachable() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("unreachable\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Unreachable);
    }

    #[test]
    fn test_float_arithmetic_reaches_sandbox() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("push 1.5\npush 2.5\nfadd\nsyscall 1\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![4.0]);
    }

    #[test]
    fn test_read_float_syscall() {
        let mut sandbox = TestSandbox {
            reads: vec![6.5],
            ..Default::default()
        };
        let info = run_asm("syscall 0\nsyscall 1\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![6.5]);
    }

    #[test]
    fn test_unknown_syscall() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("syscall 7\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::UnknownSyscall { index: 7 });
        assert_eq!(info.offset, 0);
    }

    #[test]
    fn test_signed_vs_unsigned_division() {
        // -6 / 2 signed is -3; observe via itof -> write
        let mut sandbox = TestSandbox::default();
        let info = run_asm(
            "push 0xFFFFFFFA\npush 2\nidiv\nitof\nsyscall 1\nhalt\n",
            &mut sandbox,
        );
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![-3.0]);
    }

    #[test]
    fn test_division_by_zero() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("push 1\npush 0\ndiv\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::DivisionByZero);
    }

    #[test]
    fn test_memory_round_trip() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm(
            "push 42\npop [cz + 16]\npush [cz + 16]\nitof\nsyscall 1\nhalt\n",
            &mut sandbox,
        );
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![42.0]);
    }

    #[test]
    fn test_segmentation_fault_payload() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("push 0\npop [cz + 0xFFFFFFFC]\n", &mut sandbox);
        assert_eq!(
            info.reason,
            TermReason::SegmentationFault {
                addr: 0xFFFFFFFC,
                memory_size: DEFAULT_MEMORY_SIZE,
            }
        );
        // offset of the pop instruction, not of the fault computation
        assert_eq!(info.offset, 6);
    }

    #[test]
    fn test_last_word_is_accessible() {
        // addr == memory_size - 4 touches [size-4, size) and is legal
        let source = format!("push 1\npop [cz + {}]\nhalt\n", DEFAULT_MEMORY_SIZE - 4);
        let mut sandbox = TestSandbox::default();
        let info = run_asm(&source, &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
    }

    #[test]
    fn test_word_past_end_faults() {
        let source = format!("push 1\npop [cz + {}]\n", DEFAULT_MEMORY_SIZE - 3);
        let mut sandbox = TestSandbox::default();
        let info = run_asm(&source, &mut sandbox);
        assert!(matches!(
            info.reason,
            TermReason::SegmentationFault { .. }
        ));
    }

    #[test]
    fn test_invalid_pop_info() {
        let mut sandbox = TestSandbox::default();
        // pop into a bare immediate is illegal
        let info = run_asm("push 1\npop 4\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::InvalidPopInfo);
    }

    #[test]
    fn test_pop_empty_stack() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("pop ax\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::NoOperands);
    }

    #[test]
    fn test_ret_without_call() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("ret\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::CallStackUnderflow);
    }

    #[test]
    fn test_jump_out_of_code() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("jmp 0x00001000\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::InvalidIc { target: 0x1000 });
    }

    #[test]
    fn test_truncated_instruction() {
        let exe = crate::executable::Executable {
            code: vec![Opcode::Push as u8],
        };
        let mut sandbox = TestSandbox::default();
        let info = execute(&exe, DEFAULT_MEMORY_SIZE, &mut sandbox);
        assert_eq!(info.reason, TermReason::UnexpectedCodeEnd);
    }

    #[test]
    fn test_unknown_opcode() {
        let exe = crate::executable::Executable { code: vec![0xEE] };
        let mut sandbox = TestSandbox::default();
        let info = execute(&exe, DEFAULT_MEMORY_SIZE, &mut sandbox);
        assert_eq!(info.reason, TermReason::UnknownOpcode { opcode: 0xEE });
    }

    #[test]
    fn test_call_and_ret() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm(
            "call f\npush 3.0\nsyscall 1\nhalt\nf:\nret\n",
            &mut sandbox,
        );
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![3.0]);
    }

    #[test]
    fn test_signed_comparison_and_jl() {
        // -1 < 1 signed, so jl is taken and we halt before unreachable
        let mut sandbox = TestSandbox::default();
        let info = run_asm(
            "push 0xFFFFFFFF\npush 1\nicmp\njl ok\nunreachable\nok:\nhalt\n",
            &mut sandbox,
        );
        assert_eq!(info.reason, TermReason::Halt);
    }

    #[test]
    fn test_unsigned_comparison_of_same_bits() {
        // 0xFFFFFFFF > 1 unsigned, so jl falls through to halt
        let mut sandbox = TestSandbox::default();
        let info = run_asm(
            "push 0xFFFFFFFF\npush 1\ncmp\njl bad\nhalt\nbad:\nunreachable\n",
            &mut sandbox,
        );
        assert_eq!(info.reason, TermReason::Halt);
    }

    #[test]
    fn test_jump_family_on_equal() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm(
            "push 5\npush 5\ncmp\nje eq\nunreachable\neq:\npush 5\npush 5\ncmp\njg bad\njge ok\nunreachable\nbad:\nunreachable\nok:\nhalt\n",
            &mut sandbox,
        );
        assert_eq!(info.reason, TermReason::Halt);
    }

    #[test]
    fn test_mgs_pushes_memory_size() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("mgs\nitof\nsyscall 1\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![DEFAULT_MEMORY_SIZE as f64]);
    }

    #[test]
    fn test_time_pushes_sandbox_time() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("time\nsyscall 1\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![0.25]);
    }

    #[test]
    fn test_cz_and_fl_writes_are_discarded() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm(
            "push 99\npop cz\npush cz\nitof\nsyscall 1\nhalt\n",
            &mut sandbox,
        );
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![0.0], "cz must still read as zero");
    }

    #[test]
    fn test_vsm_sets_mode_and_flags() {
        let mut sandbox = TestSandbox::default();
        // storage format 3 (true color) | update mode manual (bit 3)
        let info = run_asm("push 11\nvsm\nvrs\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(
            sandbox.video_modes,
            vec![(VideoStorageFormat::TrueColor, VideoUpdateMode::Manual)]
        );
        assert_eq!(sandbox.refreshes, 1);
    }

    #[test]
    fn test_vsm_invalid_storage_format() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("push 7\nvsm\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::InvalidVideoMode { bits: 7 });
    }

    #[test]
    fn test_iwkd_pushes_key_code() {
        let mut sandbox = TestSandbox {
            keys: vec![Key::Ascii(b'A')],
            ..Default::default()
        };
        let info = run_asm("iwkd\nitof\nsyscall 1\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![65.0]);
    }

    #[test]
    fn test_igks_invalid_key_pushes_zero() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("push 1\nigks\nitof\nsyscall 1\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![0.0]);
    }

    #[test]
    fn test_igks_pressed_key() {
        let mut sandbox = TestSandbox {
            pressed: vec![Key::Ascii(b'W')],
            ..Default::default()
        };
        let info = run_asm("push 87\nigks\nitof\nsyscall 1\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![1.0]);
    }

    #[test]
    fn test_cancellation_observed_at_sandbox_call() {
        let mut sandbox = TestSandbox {
            cancelled: true,
            ..Default::default()
        };
        // arithmetic executes fine, the first sandbox call exits
        let info = run_asm("push 1\npush 2\nadd\ntime\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::SandboxError);
    }

    #[test]
    fn test_failed_initialize_skips_terminate() {
        struct FailingInit(TestSandbox);
        impl Sandbox for FailingInit {
            fn initialize(&mut self, _ctx: ExecContext<'_>) -> bool {
                false
            }
            fn terminate(&mut self, info: &TermInfo) {
                self.0.terminate(info)
            }
            fn get_execution_time(&mut self) -> Option<f32> {
                None
            }
            fn set_video_mode(
                &mut self,
                _format: VideoStorageFormat,
                _mode: VideoUpdateMode,
            ) -> bool {
                false
            }
            fn refresh_screen(&mut self, _memory: &[u8]) -> bool {
                false
            }
            fn wait_key_down(&mut self) -> Option<Key> {
                None
            }
            fn get_key_state(&mut self, _key: Key) -> Option<bool> {
                None
            }
            fn read_float64(&mut self) -> f64 {
                0.0
            }
            fn write_float64(&mut self, _value: f64) {}
        }

        let exe = crate::executable::Executable {
            code: vec![Opcode::Halt as u8],
        };
        let mut sandbox = FailingInit(TestSandbox::default());
        let info = execute(&exe, 64, &mut sandbox);
        assert_eq!(info.reason, TermReason::SandboxError);
        assert!(sandbox.0.terminated.is_none());
    }

    #[test]
    fn test_shift_counts_wrap() {
        // shl by 33 behaves as shl by 1 (count masked to the word width)
        let mut sandbox = TestSandbox::default();
        let info = run_asm(
            "push 1\npush 33\nshl\nitof\nsyscall 1\nhalt\n",
            &mut sandbox,
        );
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![2.0]);
    }

    #[test]
    fn test_sar_keeps_sign() {
        // -8 >> 1 arithmetic is -4
        let mut sandbox = TestSandbox::default();
        let info = run_asm(
            "push 0xFFFFFFF8\npush 1\nsar\nitof\nsyscall 1\nhalt\n",
            &mut sandbox,
        );
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![-4.0]);
    }

    #[test]
    fn test_fsqrt() {
        let mut sandbox = TestSandbox::default();
        let info = run_asm("push 9.0\nfsqrt\nsyscall 1\nhalt\n", &mut sandbox);
        assert_eq!(info.reason, TermReason::Halt);
        assert_eq!(sandbox.writes, vec![3.0]);
    }
}
