//! Core virtual machine implementation.

use crate::bytecode::header::{ProgramHeader, ProgramType};
use crate::bytecode::program::Program;
use crate::memory::object::MethodId;
use crate::vm::arena::{HeapId, ProgramId, Runtime};
use crate::vm::errors::VmError;
use crate::vm::isa::Opcode;
use std::cmp::Ordering;
use std::path::Path;

/// Lifecycle of a VM instance.
///
/// `Idle` → `Ready` (program bound, `ip = 0`) → `Running` → `Halted` or
/// `Faulted`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Idle,
    Ready,
    Running,
    Halted,
    Faulted,
}

/// What a halted program left in the result register `r1`.
///
/// With identifier-based addressing an object-valued result is an
/// identifier: if `r1`'s bit pattern is registered in the bound GC's pmap
/// the result names that object, otherwise it is a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Int(i64),
    Object(u64),
}

/// A register-based virtual machine bound to one program and one heap.
///
/// The VM holds handles into the embedding [`Runtime`]'s arenas rather
/// than references, so its own memory layout is pointer-free and several
/// VMs can share a program or heap by handle. Execution is strictly
/// sequential: one [`tick`](Vm::tick) at a time, no suspension points
/// inside a tick. [`run`](Vm::run) blocks the caller; a host wanting a
/// step budget drives `tick` itself.
#[derive(Debug)]
pub struct Vm {
    /// Instruction pointer: byte offset into the program body.
    ip: usize,
    /// Frame pointer; holds the caller's `ip` across a method dispatch.
    fp: usize,
    /// Stack pointer.
    sp: usize,
    r1: i64,
    r2: i64,
    r3: i64,
    /// Opcode latched by the current fetch.
    curr_op: Option<Opcode>,
    /// Condition flag set by `CMP`, consumed by conditional jumps.
    cond: Option<Ordering>,
    prog_id: ProgramId,
    heap_id: HeapId,
    state: VmState,
}

impl Vm {
    /// Constructs an idle VM bound to the given heap. A program is bound
    /// separately via [`load_program`](Vm::load_program).
    pub fn new(heap_id: HeapId) -> Self {
        Self {
            ip: 0,
            fp: 0,
            sp: 0,
            r1: 0,
            r2: 0,
            r3: 0,
            curr_op: None,
            cond: None,
            prog_id: 0,
            heap_id,
            state: VmState::Idle,
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn heap_id(&self) -> HeapId {
        self.heap_id
    }

    /// Handle of the bound program. Meaningless while `Idle`.
    pub fn prog_id(&self) -> ProgramId {
        self.prog_id
    }

    /// Register file contents, `[r1, r2, r3]`.
    pub fn registers(&self) -> [i64; 3] {
        [self.r1, self.r2, self.r3]
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn fp(&self) -> usize {
        self.fp
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    /// The opcode latched by the most recent fetch, if any.
    pub fn current_op(&self) -> Option<Opcode> {
        self.curr_op
    }

    /// Binds a program image to this VM.
    ///
    /// Validates at bind time, not at first tick: the header must decode,
    /// carry the turtl signature (this layer is the policy caller the
    /// codec leaves that to), match its body digest, and must not be a
    /// `Library`. On success the program enters the runtime's arena and
    /// the VM becomes `Ready` with `ip = 0`.
    pub fn load_program(&mut self, rt: &mut Runtime, bytes: Vec<u8>) -> Result<(), VmError> {
        let program = Program::from_bytes(bytes)?;
        let header = program.header()?;
        if !header.has_valid_signature() {
            return Err(VmError::SignatureMismatch(header.sign));
        }
        if !program.verify_program_id() {
            return Err(VmError::ProgramIdMismatch);
        }
        if header.ptype == ProgramType::Library {
            return Err(VmError::LibraryNotRunnable);
        }
        let body_len = program.body().len();
        self.prog_id = rt.add_program(program)?;
        self.ip = 0;
        self.curr_op = None;
        self.cond = None;
        self.state = VmState::Ready;
        log::info!(
            "program {} bound: {} body bytes, id {:02x?}",
            self.prog_id,
            body_len,
            header.prog_id
        );
        Ok(())
    }

    /// Reads a compiled program from disk and binds it. See
    /// [`load_program`](Vm::load_program).
    pub fn load_program_file(
        &mut self,
        rt: &mut Runtime,
        path: impl AsRef<Path>,
    ) -> Result<(), VmError> {
        let bytes = std::fs::read(path)?;
        self.load_program(rt, bytes)
    }

    /// Decodes the bound program's header.
    pub fn read_header(&self, rt: &Runtime) -> Result<ProgramHeader, VmError> {
        if self.state == VmState::Idle {
            return Err(VmError::NoProgram);
        }
        Ok(rt.program(self.prog_id)?.header()?)
    }

    /// Runs the bound program to completion.
    ///
    /// Loops [`tick`](Vm::tick) until `Halted` or `Faulted`. On halt the
    /// designated result register `r1` is returned as a [`RunResult`]; on
    /// fault the VM stays `Faulted` and the error carries the faulting
    /// `ip`.
    pub fn run(&mut self, rt: &Runtime) -> Result<RunResult, VmError> {
        if self.state != VmState::Ready {
            return Err(VmError::NotRunnable { state: self.state });
        }
        while self.tick(rt)? {}

        let value = self.r1;
        if rt.gc(self.heap_id)?.contains(value as u64) {
            Ok(RunResult::Object(value as u64))
        } else {
            Ok(RunResult::Int(value))
        }
    }

    /// Runs the VM forward one clock cycle: fetch the opcode at `ip`,
    /// decode its operands, dispatch, and advance `ip` past the consumed
    /// bytes unless a taken jump set it directly.
    ///
    /// Returns `Ok(false)` once halted. Public so an embedding host can
    /// impose an external step budget instead of calling [`run`](Vm::run).
    pub fn tick(&mut self, rt: &Runtime) -> Result<bool, VmError> {
        match self.state {
            VmState::Ready | VmState::Running => self.state = VmState::Running,
            state => return Err(VmError::NotRunnable { state }),
        }
        match self.step(rt) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.state = VmState::Halted;
                Ok(false)
            }
            Err(err) => {
                self.state = VmState::Faulted;
                log::warn!("vm fault at ip {}: {}", self.ip, err);
                Err(err)
            }
        }
    }

    fn step(&mut self, rt: &Runtime) -> Result<bool, VmError> {
        let program = rt.program(self.prog_id)?;
        let body = program.body();
        let at = self.ip;

        let opcode = *body.get(at).ok_or(VmError::UnexpectedEnd { ip: at })?;
        let op = Opcode::try_from(opcode).map_err(|_| VmError::IllegalOpcode { opcode, ip: at })?;
        self.curr_op = Some(op);
        let mut pos = at + 1;

        let mut jumped = false;
        match op {
            Opcode::Halt => return Ok(false),
            Opcode::Add => {
                let (rd, rs1, rs2) = self.fetch_rrr(body, &mut pos, at)?;
                self.set_reg(rd, rs1.wrapping_add(rs2), at)?;
            }
            Opcode::Sub => {
                let (rd, rs1, rs2) = self.fetch_rrr(body, &mut pos, at)?;
                self.set_reg(rd, rs1.wrapping_sub(rs2), at)?;
            }
            Opcode::Mul => {
                let (rd, rs1, rs2) = self.fetch_rrr(body, &mut pos, at)?;
                self.set_reg(rd, rs1.wrapping_mul(rs2), at)?;
            }
            Opcode::Div => {
                let (rd, rs1, rs2) = self.fetch_rrr(body, &mut pos, at)?;
                if rs2 == 0 {
                    return Err(VmError::DivisionByZero { ip: at });
                }
                self.set_reg(rd, rs1.wrapping_div(rs2), at)?;
            }
            Opcode::Load => {
                let rd = fetch_u8(body, &mut pos, at)?;
                let id = fetch_u64(body, &mut pos, at)?;
                let offset = fetch_u64(body, &mut pos, at)?;
                let word = rt
                    .gc(self.heap_id)?
                    .read_word(id, offset)
                    .map_err(|source| VmError::Memory { source, ip: at })?;
                self.set_reg(rd, word, at)?;
            }
            Opcode::Loadi => {
                let rd = fetch_u8(body, &mut pos, at)?;
                let imm = fetch_i64(body, &mut pos, at)?;
                self.set_reg(rd, imm, at)?;
            }
            Opcode::Mov => {
                let rd = fetch_u8(body, &mut pos, at)?;
                let rs = fetch_u8(body, &mut pos, at)?;
                let value = self.reg(rs, at)?;
                self.set_reg(rd, value, at)?;
            }
            Opcode::Inc => {
                let r = fetch_u8(body, &mut pos, at)?;
                let value = self.reg(r, at)?;
                self.set_reg(r, value.wrapping_add(1), at)?;
            }
            Opcode::Dec => {
                let r = fetch_u8(body, &mut pos, at)?;
                let value = self.reg(r, at)?;
                self.set_reg(r, value.wrapping_sub(1), at)?;
            }
            Opcode::Cmp => {
                let rs1 = fetch_u8(body, &mut pos, at)?;
                let rs2 = fetch_u8(body, &mut pos, at)?;
                let (a, b) = (self.reg(rs1, at)?, self.reg(rs2, at)?);
                self.cond = Some(a.cmp(&b));
            }
            Opcode::And => {
                let (rd, rs1, rs2) = self.fetch_rrr(body, &mut pos, at)?;
                self.set_reg(rd, rs1 & rs2, at)?;
            }
            Opcode::Or => {
                let (rd, rs1, rs2) = self.fetch_rrr(body, &mut pos, at)?;
                self.set_reg(rd, rs1 | rs2, at)?;
            }
            Opcode::Xor => {
                let (rd, rs1, rs2) = self.fetch_rrr(body, &mut pos, at)?;
                self.set_reg(rd, rs1 ^ rs2, at)?;
            }
            Opcode::Not => {
                let rd = fetch_u8(body, &mut pos, at)?;
                let rs = fetch_u8(body, &mut pos, at)?;
                let value = self.reg(rs, at)?;
                self.set_reg(rd, !value, at)?;
            }
            Opcode::Jmp => {
                let target = fetch_u64(body, &mut pos, at)?;
                self.jump(target, body.len(), at)?;
                jumped = true;
            }
            Opcode::Jeq | Opcode::Jne | Opcode::Jgt | Opcode::Jge | Opcode::Jlt | Opcode::Jle => {
                let target = fetch_u64(body, &mut pos, at)?;
                let cond = self.cond.ok_or(VmError::ConditionUnset { ip: at })?;
                let taken = match op {
                    Opcode::Jeq => cond == Ordering::Equal,
                    Opcode::Jne => cond != Ordering::Equal,
                    Opcode::Jgt => cond == Ordering::Greater,
                    Opcode::Jge => cond != Ordering::Less,
                    Opcode::Jlt => cond == Ordering::Less,
                    _ => cond != Ordering::Greater,
                };
                if taken {
                    self.jump(target, body.len(), at)?;
                    jumped = true;
                }
            }
        }

        if !jumped {
            self.ip = pos;
        }
        Ok(true)
    }

    /// Dispatches a method on the object registered under `id`.
    ///
    /// Reuses this VM: a call, not a separate interpreter. The method ID
    /// resolves through the object's function table; up to three
    /// arguments are marshaled into `r1..r3` in order; the caller's `ip`
    /// is saved in `fp`; execution continues from the resolved code
    /// address until `HALT`, and `r1` is returned.
    pub fn run_method(
        &mut self,
        rt: &Runtime,
        id: u64,
        method: MethodId,
        args: &[i64],
    ) -> Result<i64, VmError> {
        match self.state {
            VmState::Ready | VmState::Halted => {}
            state => return Err(VmError::NotRunnable { state }),
        }
        if args.len() > 3 {
            return Err(VmError::TooManyArguments { given: args.len() });
        }

        let target = rt
            .gc(self.heap_id)?
            .method_addr(id, method)
            .map_err(|source| VmError::Memory {
                source,
                ip: self.ip,
            })?;
        let body_len = rt.program(self.prog_id)?.body().len();

        for (slot, arg) in args.iter().enumerate() {
            self.set_reg(slot as u8 + 1, *arg, self.ip)?;
        }
        self.fp = self.ip;
        self.cond = None;
        self.state = VmState::Running;
        if let Err(err) = self.jump(target, body_len, self.fp) {
            self.state = VmState::Faulted;
            return Err(err);
        }

        while self.tick(rt)? {}
        Ok(self.r1)
    }

    fn reg(&self, index: u8, ip: usize) -> Result<i64, VmError> {
        match index {
            1 => Ok(self.r1),
            2 => Ok(self.r2),
            3 => Ok(self.r3),
            _ => Err(VmError::InvalidRegister { index, ip }),
        }
    }

    fn set_reg(&mut self, index: u8, value: i64, ip: usize) -> Result<(), VmError> {
        match index {
            1 => self.r1 = value,
            2 => self.r2 = value,
            3 => self.r3 = value,
            _ => return Err(VmError::InvalidRegister { index, ip }),
        }
        Ok(())
    }

    /// Decodes a three-register operand group, resolving the sources.
    fn fetch_rrr(
        &self,
        body: &[u8],
        pos: &mut usize,
        ip: usize,
    ) -> Result<(u8, i64, i64), VmError> {
        let rd = fetch_u8(body, pos, ip)?;
        let rs1 = fetch_u8(body, pos, ip)?;
        let rs2 = fetch_u8(body, pos, ip)?;
        Ok((rd, self.reg(rs1, ip)?, self.reg(rs2, ip)?))
    }

    fn jump(&mut self, target: u64, body_len: usize, ip: usize) -> Result<(), VmError> {
        if target as usize >= body_len {
            return Err(VmError::JumpOutOfRange { target, ip });
        }
        self.ip = target as usize;
        Ok(())
    }
}

fn fetch_u8(body: &[u8], pos: &mut usize, ip: usize) -> Result<u8, VmError> {
    let byte = *body.get(*pos).ok_or(VmError::UnexpectedEnd { ip })?;
    *pos += 1;
    Ok(byte)
}

fn fetch_u64(body: &[u8], pos: &mut usize, ip: usize) -> Result<u64, VmError> {
    let bytes = body
        .get(*pos..*pos + 8)
        .ok_or(VmError::UnexpectedEnd { ip })?;
    *pos += 8;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap_or_default()))
}

fn fetch_i64(body: &[u8], pos: &mut usize, ip: usize) -> Result<i64, VmError> {
    fetch_u64(body, pos, ip).map(|v| v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::builder::ProgramBuilder;
    use crate::memory::gc::intern;
    use crate::memory::heap::HeapConfig;
    use crate::memory::MemoryError;

    fn fresh_vm() -> (Runtime, Vm) {
        let mut rt = Runtime::new();
        let heap = rt.add_heap(HeapConfig::default()).unwrap();
        (rt, Vm::new(heap))
    }

    fn load(build: impl FnOnce(&mut ProgramBuilder)) -> (Runtime, Vm) {
        let mut builder = ProgramBuilder::new(ProgramType::Execute);
        build(&mut builder);
        let (mut rt, mut vm) = fresh_vm();
        vm.load_program(&mut rt, builder.finish().into_bytes())
            .unwrap();
        (rt, vm)
    }

    fn run(build: impl FnOnce(&mut ProgramBuilder)) -> (Runtime, Vm, RunResult) {
        let (rt, mut vm) = load(build);
        let result = vm.run(&rt).expect("vm run failed");
        (rt, vm, result)
    }

    fn run_expect_err(build: impl FnOnce(&mut ProgramBuilder)) -> (Vm, VmError) {
        let (rt, mut vm) = load(build);
        let err = vm.run(&rt).expect_err("expected fault");
        (vm, err)
    }

    // ==================== Arithmetic ====================

    #[test]
    fn add() {
        let (_, vm, result) = run(|b| {
            b.loadi(2, 3).loadi(3, 4).add(1, 2, 3).halt();
        });
        assert_eq!(vm.registers(), [7, 3, 4]);
        assert_eq!(result, RunResult::Int(7));
        assert_eq!(vm.state(), VmState::Halted);
    }

    #[test]
    fn sub() {
        let (_, vm, _) = run(|b| {
            b.loadi(2, 10).loadi(3, 4).sub(1, 2, 3).halt();
        });
        assert_eq!(vm.registers()[0], 6);
    }

    #[test]
    fn mul_and_div() {
        let (_, vm, _) = run(|b| {
            b.loadi(2, 6).loadi(3, 7).mul(1, 2, 3).halt();
        });
        assert_eq!(vm.registers()[0], 42);

        let (_, vm, _) = run(|b| {
            b.loadi(2, 84).loadi(3, 2).div(1, 2, 3).halt();
        });
        assert_eq!(vm.registers()[0], 42);
    }

    #[test]
    fn add_wraps() {
        let (_, vm, _) = run(|b| {
            b.loadi(2, i64::MAX).loadi(3, 1).add(1, 2, 3).halt();
        });
        assert_eq!(vm.registers()[0], i64::MIN);
    }

    #[test]
    fn div_by_zero_faults() {
        let (vm, err) = run_expect_err(|b| {
            b.loadi(2, 1).loadi(3, 0).div(1, 2, 3).halt();
        });
        assert!(matches!(err, VmError::DivisionByZero { ip: 20 }));
        assert_eq!(vm.state(), VmState::Faulted);
    }

    #[test]
    fn inc_dec() {
        let (_, vm, _) = run(|b| {
            b.loadi(1, 41).inc(1).loadi(2, 1).dec(2).dec(2).halt();
        });
        assert_eq!(vm.registers(), [42, -1, 0]);
    }

    // ==================== Bitwise ====================

    #[test]
    fn bitwise_ops() {
        let (_, vm, _) = run(|b| {
            b.loadi(2, 0b1100).loadi(3, 0b1010).and(1, 2, 3).halt();
        });
        assert_eq!(vm.registers()[0], 0b1000);

        let (_, vm, _) = run(|b| {
            b.loadi(2, 0b1100).loadi(3, 0b1010).or(1, 2, 3).halt();
        });
        assert_eq!(vm.registers()[0], 0b1110);

        let (_, vm, _) = run(|b| {
            b.loadi(2, 0b1100).loadi(3, 0b1010).xor(1, 2, 3).halt();
        });
        assert_eq!(vm.registers()[0], 0b0110);

        let (_, vm, _) = run(|b| {
            b.loadi(2, 0).not(1, 2).halt();
        });
        assert_eq!(vm.registers()[0], -1);
    }

    // ==================== Data movement ====================

    #[test]
    fn mov_copies_source_into_destination() {
        let (_, vm, _) = run(|b| {
            b.loadi(3, 99).mov(1, 3).halt();
        });
        assert_eq!(vm.registers(), [99, 0, 99]);
    }

    #[test]
    fn loadi_negative() {
        let (_, vm, _) = run(|b| {
            b.loadi(1, -123456789).halt();
        });
        assert_eq!(vm.registers()[0], -123456789);
    }

    #[test]
    fn load_reads_object_word() {
        let id = intern("cell");
        let (rt, mut vm) = load(|b| {
            b.load(1, id, 8).halt();
        });
        let gc = rt.gc(vm.heap_id()).unwrap();
        let address = gc.allocate(16).unwrap();
        gc.register(id, address).unwrap();
        gc.write_word(id, 8, 1234).unwrap();

        vm.run(&rt).unwrap();
        assert_eq!(vm.registers()[0], 1234);
    }

    #[test]
    fn load_unknown_identifier_faults() {
        let id = intern("missing");
        let (vm, err) = run_expect_err(|b| {
            b.load(1, id, 0).halt();
        });
        assert!(matches!(
            err,
            VmError::Memory {
                source: MemoryError::UnknownIdentifier(found),
                ip: 0,
            } if found == id
        ));
        assert_eq!(vm.state(), VmState::Faulted);
    }

    // ==================== Control flow ====================

    #[test]
    fn jmp_skips_instructions() {
        // JMP is 9 bytes, LOADI is 10: jump over the first LOADI.
        let (_, vm, _) = run(|b| {
            b.jmp(19).loadi(1, 99).loadi(2, 42).halt();
        });
        assert_eq!(vm.registers(), [0, 42, 0]);
    }

    #[test]
    fn conditional_jumps() {
        // taken: 5 == 5
        let (_, vm, _) = run(|b| {
            b.loadi(1, 5).loadi(2, 5).cmp(1, 2);
            b.jeq(42).loadi(3, 99).halt(); // target: the final HALT
        });
        assert_eq!(vm.registers()[2], 0);

        // not taken: 5 != 6 fails JEQ, falls through
        let (_, vm, _) = run(|b| {
            b.loadi(1, 5).loadi(2, 6).cmp(1, 2);
            b.jeq(42).loadi(3, 99).halt();
        });
        assert_eq!(vm.registers()[2], 99);
    }

    #[test]
    fn conditional_jump_directions() {
        // (a, b, emit, expect_taken)
        type Emit = fn(&mut ProgramBuilder, u64) -> &mut ProgramBuilder;
        let cases: &[(i64, i64, Emit, bool)] = &[
            (1, 2, ProgramBuilder::jne, true),
            (2, 2, ProgramBuilder::jne, false),
            (3, 2, ProgramBuilder::jgt, true),
            (2, 2, ProgramBuilder::jgt, false),
            (2, 2, ProgramBuilder::jge, true),
            (1, 2, ProgramBuilder::jge, false),
            (1, 2, ProgramBuilder::jlt, true),
            (2, 2, ProgramBuilder::jlt, false),
            (2, 2, ProgramBuilder::jle, true),
            (3, 2, ProgramBuilder::jle, false),
        ];
        for &(a, b_val, emit, expect_taken) in cases {
            let (_, vm, _) = run(|b| {
                b.loadi(1, a).loadi(2, b_val).cmp(1, 2);
                emit(b, 42).loadi(3, 99).halt();
            });
            let taken = vm.registers()[2] == 0;
            assert_eq!(taken, expect_taken, "CMP {a} {b_val}");
        }
    }

    #[test]
    fn backward_jump_loops() {
        // r1 counts down from 3; loop body starts after the two LOADIs.
        let (_, vm, _) = run(|b| {
            b.loadi(1, 3).loadi(2, 0);
            let top = b.here();
            b.dec(1).cmp(1, 2).jgt(top).halt();
        });
        assert_eq!(vm.registers()[0], 0);
    }

    #[test]
    fn jump_out_of_range_faults() {
        let (vm, err) = run_expect_err(|b| {
            b.jmp(1000).halt();
        });
        assert!(matches!(
            err,
            VmError::JumpOutOfRange {
                target: 1000,
                ip: 0,
            }
        ));
        assert_eq!(vm.state(), VmState::Faulted);
    }

    #[test]
    fn conditional_jump_without_cmp_faults() {
        let (vm, err) = run_expect_err(|b| {
            b.jeq(0).halt();
        });
        assert!(matches!(err, VmError::ConditionUnset { ip: 0 }));
        assert_eq!(vm.state(), VmState::Faulted);
    }

    #[test]
    fn cmp_leaves_registers_untouched() {
        let (_, vm, _) = run(|b| {
            b.loadi(1, 8).loadi(2, 9).cmp(1, 2).halt();
        });
        assert_eq!(vm.registers(), [8, 9, 0]);
    }

    // ==================== Faults ====================

    #[test]
    fn illegal_opcode_faults() {
        let mut program = Program::new(ProgramType::Execute);
        program.extend_body(&[0xEE]);
        program.set_program_id();

        let (mut rt, mut vm) = fresh_vm();
        vm.load_program(&mut rt, program.into_bytes()).unwrap();
        let err = vm.run(&rt).unwrap_err();
        assert!(matches!(
            err,
            VmError::IllegalOpcode { opcode: 0xEE, ip: 0 }
        ));
        assert_eq!(vm.state(), VmState::Faulted);
    }

    #[test]
    fn truncated_operand_faults() {
        let mut program = Program::new(ProgramType::Execute);
        program.extend_body(&[Opcode::Loadi as u8, 1, 0xAA]); // 2 of 8 imm bytes
        program.set_program_id();

        let (mut rt, mut vm) = fresh_vm();
        vm.load_program(&mut rt, program.into_bytes()).unwrap();
        assert!(matches!(
            vm.run(&rt).unwrap_err(),
            VmError::UnexpectedEnd { ip: 0 }
        ));
    }

    #[test]
    fn running_off_the_end_faults() {
        let (vm, err) = run_expect_err(|b| {
            b.loadi(1, 1); // no HALT
        });
        assert!(matches!(err, VmError::UnexpectedEnd { ip: 10 }));
        assert_eq!(vm.state(), VmState::Faulted);
    }

    #[test]
    fn invalid_register_faults() {
        let (vm, err) = run_expect_err(|b| {
            b.loadi(0, 1).halt();
        });
        assert!(matches!(
            err,
            VmError::InvalidRegister { index: 0, ip: 0 }
        ));
        assert_eq!(vm.state(), VmState::Faulted);

        let (_, err) = run_expect_err(|b| {
            b.loadi(4, 1).halt();
        });
        assert!(matches!(err, VmError::InvalidRegister { index: 4, .. }));
    }

    // ==================== Binding ====================

    #[test]
    fn library_program_rejected_before_first_tick() {
        let mut builder = ProgramBuilder::new(ProgramType::Library);
        builder.halt();
        let (mut rt, mut vm) = fresh_vm();
        let err = vm
            .load_program(&mut rt, builder.finish().into_bytes())
            .unwrap_err();
        assert!(matches!(err, VmError::LibraryNotRunnable));
        // Bind-time rejection: the VM never left Idle.
        assert_eq!(vm.state(), VmState::Idle);
        assert!(matches!(vm.run(&rt), Err(VmError::NotRunnable { .. })));
    }

    #[test]
    fn foreign_signature_rejected() {
        let mut builder = ProgramBuilder::new(ProgramType::Execute);
        builder.halt();
        let mut bytes = builder.finish().into_bytes();
        bytes[..4].copy_from_slice(b"ELF\x7f");

        let (mut rt, mut vm) = fresh_vm();
        assert!(matches!(
            vm.load_program(&mut rt, bytes).unwrap_err(),
            VmError::SignatureMismatch(_)
        ));
    }

    #[test]
    fn stale_program_id_rejected() {
        let mut program = Program::new(ProgramType::Execute);
        program.extend_body(&[Opcode::Halt as u8]);
        // set_program_id never called: the zeroed ID does not match.
        let (mut rt, mut vm) = fresh_vm();
        assert!(matches!(
            vm.load_program(&mut rt, program.into_bytes()).unwrap_err(),
            VmError::ProgramIdMismatch
        ));
    }

    #[test]
    fn truncated_image_rejected() {
        let (mut rt, mut vm) = fresh_vm();
        let err = vm.load_program(&mut rt, vec![0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            VmError::Header(crate::bytecode::HeaderError::Malformed { len: 10 })
        ));
    }

    #[test]
    fn read_header_of_bound_program() {
        let (rt, vm) = load(|b| {
            b.halt();
        });
        let header = vm.read_header(&rt).unwrap();
        assert_eq!(header.ptype, ProgramType::Execute);
        assert_eq!((header.major, header.minor, header.patch), (0, 1, 0));
    }

    #[test]
    fn read_header_without_program() {
        let (rt, vm) = fresh_vm();
        assert!(matches!(vm.read_header(&rt), Err(VmError::NoProgram)));
    }

    #[test]
    fn load_program_file_roundtrip() {
        let mut builder = ProgramBuilder::new(ProgramType::Execute);
        builder.loadi(1, 21).loadi(2, 21).add(1, 1, 2).halt();
        let program = builder.finish();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("answer{}", crate::bytecode::BINARY_SUFFIX));
        std::fs::write(&path, program.as_bytes()).unwrap();

        let (mut rt, mut vm) = fresh_vm();
        vm.load_program_file(&mut rt, &path).unwrap();
        assert_eq!(vm.run(&rt).unwrap(), RunResult::Int(42));
    }

    #[test]
    fn load_program_file_missing() {
        let (mut rt, mut vm) = fresh_vm();
        assert!(matches!(
            vm.load_program_file(&mut rt, "/no/such/file.turtlc"),
            Err(VmError::Io(_))
        ));
    }

    // ==================== Run lifecycle ====================

    #[test]
    fn run_requires_ready() {
        let (rt, mut vm) = fresh_vm();
        assert!(matches!(
            vm.run(&rt),
            Err(VmError::NotRunnable {
                state: VmState::Idle
            })
        ));
    }

    #[test]
    fn halted_vm_does_not_rerun() {
        let (rt, mut vm, _) = run(|b| {
            b.halt();
        });
        assert!(matches!(
            vm.run(&rt),
            Err(VmError::NotRunnable {
                state: VmState::Halted
            })
        ));
    }

    #[test]
    fn external_step_budget_via_tick() {
        let (rt, mut vm) = load(|b| {
            b.loadi(1, 1).loadi(2, 2).add(3, 1, 2).halt();
        });
        let mut steps = 0;
        while vm.tick(&rt).unwrap() {
            steps += 1;
            assert!(steps < 10, "program should halt within budget");
        }
        assert_eq!(steps, 3);
        assert_eq!(vm.state(), VmState::Halted);
        assert_eq!(vm.registers()[2], 3);
    }

    #[test]
    fn run_returns_object_handle_for_registered_identifier() {
        let id = intern("result-object");
        let (rt, mut vm) = load(move |b| {
            b.loadi(1, id as i64).halt();
        });
        let gc = rt.gc(vm.heap_id()).unwrap();
        let address = gc.allocate(8).unwrap();
        gc.register(id, address).unwrap();

        assert_eq!(vm.run(&rt).unwrap(), RunResult::Object(id));
    }

    // ==================== Method dispatch ====================

    #[test]
    fn run_method_dispatches_through_func_table() {
        let id = intern("adder");
        // Body: entry HALT at 0, method code at 1: r1 = r1 + r2; HALT.
        let (rt, mut vm) = load(|b| {
            b.halt().add(1, 1, 2).halt();
        });
        let gc = rt.gc(vm.heap_id()).unwrap();
        let address = gc.allocate(8).unwrap();
        gc.register(id, address).unwrap();
        gc.with_mut(|gc| {
            gc.lookup_id_mut(id).unwrap().define_method(0, 1);
        });

        let result = vm.run_method(&rt, id, 0, &[30, 12]).unwrap();
        assert_eq!(result, 42);
        assert_eq!(vm.state(), VmState::Halted);
        // The caller's ip was parked in fp.
        assert_eq!(vm.fp(), 0);
    }

    #[test]
    fn run_method_unknown_method() {
        let id = intern("bare");
        let (rt, mut vm) = load(|b| {
            b.halt();
        });
        let gc = rt.gc(vm.heap_id()).unwrap();
        let address = gc.allocate(8).unwrap();
        gc.register(id, address).unwrap();

        assert!(matches!(
            vm.run_method(&rt, id, 5, &[]).unwrap_err(),
            VmError::Memory {
                source: MemoryError::UnknownMethod(5),
                ..
            }
        ));
    }

    #[test]
    fn run_method_out_of_range_address_faults() {
        let id = intern("broken");
        let (rt, mut vm) = load(|b| {
            b.halt();
        });
        let gc = rt.gc(vm.heap_id()).unwrap();
        let address = gc.allocate(8).unwrap();
        gc.register(id, address).unwrap();
        gc.with_mut(|gc| {
            gc.lookup_id_mut(id).unwrap().define_method(0, 500);
        });

        assert!(matches!(
            vm.run_method(&rt, id, 0, &[]).unwrap_err(),
            VmError::JumpOutOfRange { target: 500, .. }
        ));
        assert_eq!(vm.state(), VmState::Faulted);
    }

    #[test]
    fn run_method_rejects_extra_arguments() {
        let (rt, mut vm) = load(|b| {
            b.halt();
        });
        assert!(matches!(
            vm.run_method(&rt, intern("x"), 0, &[1, 2, 3, 4]).unwrap_err(),
            VmError::TooManyArguments { given: 4 }
        ));
    }
}
