//! CPU execution engine for the X16.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.
//!
//! PC is incremented right after the fetch and before the instruction body
//! runs, so every PC-relative address (BR, JSR, LD, LDI, LEA, ST, STI) and
//! the JSR/JSRR return address are relative to the *next* instruction.

use crate::asm::disasm::disassemble_instruction;
use crate::asm::image::Image;
use crate::cpu::decode::{self, DecodeError, Instruction, Opcode, Operand};
use crate::cpu::memory::{Memory, MemoryError};
use crate::cpu::registers::{CondCode, Reg, Registers};
use crate::cpu::trap::{Flow, TrapError, TrapHandler};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (HALT trap).
    Halted,
    /// CPU hit a fatal error (reserved opcode or failed trap).
    Error,
}

/// The X16 CPU.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count.
    pub cycles: u64,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

/// Serializable view of everything but memory.
#[derive(Debug, Serialize)]
pub struct CpuSnapshot<'a> {
    pub regs: &'a Registers,
    pub state: CpuState,
    pub cycles: u64,
}

impl Cpu {
    /// Create a new CPU with zeroed state.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
            last_instr: None,
        }
    }

    /// Reset the CPU to initial state.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
    }

    /// Load words at `origin` and point PC at the first one.
    pub fn load_program(&mut self, origin: u16, program: &[u16]) -> Result<(), MemoryError> {
        self.mem.load_program(origin, program)?;
        self.regs.pc = origin;
        Ok(())
    }

    /// Load a program image and point PC at its origin.
    pub fn load_image(&mut self, image: &Image) -> Result<(), MemoryError> {
        tracing::debug!(
            origin = format!("x{:04X}", image.origin),
            words = image.words.len(),
            "loading image"
        );
        self.load_program(image.origin, &image.words)
    }

    /// Execute a single instruction.
    ///
    /// Returns [`Flow::Halt`] when the trap handler stops the machine.
    /// Reserved opcodes and trap failures are fatal: the CPU moves to
    /// [`CpuState::Error`] and refuses to step again.
    pub fn step<T: TrapHandler + ?Sized>(&mut self, traps: &mut T) -> Result<Flow, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        // Fetch, then advance PC before anything else looks at it
        let pc = self.regs.advance_pc();
        let word = self.mem.read(pc);

        tracing::trace!(
            pc = format!("x{:04X}", pc),
            word = format!("x{:04X}", word),
            "{}",
            disassemble_instruction(word)
        );

        let result = match decode::decode(word) {
            Ok(instr) => self
                .execute(instr, word, traps)
                .map(|flow| (instr, flow))
                .map_err(|source| CpuError::Trap { addr: pc, source }),
            Err(DecodeError::ReservedOpcode { opcode, word }) => {
                Err(CpuError::ReservedOpcode { opcode, word, addr: pc })
            }
        };

        match result {
            Ok((instr, flow)) => {
                self.cycles += 1;
                self.last_instr = Some(instr);
                if flow == Flow::Halt {
                    self.state = CpuState::Halted;
                    tracing::info!(cycles = self.cycles, "machine halted");
                }
                Ok(flow)
            }
            Err(e) => {
                self.state = CpuState::Error;
                tracing::error!(cycles = self.cycles, "{}", e);
                Err(e)
            }
        }
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed.
    pub fn run<T: TrapHandler + ?Sized>(&mut self, traps: &mut T) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step(traps)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited<T: TrapHandler + ?Sized>(
        &mut self,
        traps: &mut T,
        max_cycles: u64,
    ) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit {
            self.step(traps)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Execute a decoded instruction. PC has already been advanced.
    fn execute<T: TrapHandler + ?Sized>(
        &mut self,
        instr: Instruction,
        word: u16,
        traps: &mut T,
    ) -> Result<Flow, TrapError> {
        match instr {
            // ==================== Operate ====================

            Instruction::Add { dst, src1, src2 } => {
                let value = self.regs.get(src1).wrapping_add(self.operand(src2));
                self.define(dst, value);
            }

            Instruction::And { dst, src1, src2 } => {
                let value = self.regs.get(src1) & self.operand(src2);
                self.define(dst, value);
            }

            Instruction::Not { dst, src } => {
                let value = !self.regs.get(src);
                self.define(dst, value);
            }

            // ==================== Control Flow ====================

            Instruction::Br { n, z, p, offset } => {
                let cond = self.regs.cond;
                let taken = (n && cond == CondCode::Neg)
                    || (z && cond == CondCode::Zro)
                    || (p && cond == CondCode::Pos)
                    || (!n && !z && !p);
                if taken {
                    self.regs.pc = self.regs.pc_relative(offset as u16);
                }
            }

            Instruction::Jmp { base } => {
                self.regs.pc = self.regs.get(base);
            }

            Instruction::Jsr { offset } => {
                self.regs.set(Reg::R7, self.regs.pc);
                self.regs.pc = self.regs.pc_relative(offset as u16);
            }

            Instruction::Jsrr { base } => {
                // R7 first: JSRR R7 jumps to its own return address
                self.regs.set(Reg::R7, self.regs.pc);
                self.regs.pc = self.regs.get(base);
            }

            Instruction::Trap { .. } => {
                return traps.trap(&mut self.regs, &mut self.mem, word);
            }

            // ==================== Data Movement ====================

            Instruction::Ld { dst, offset } => {
                let addr = self.regs.pc_relative(offset as u16);
                let value = self.mem.read(addr);
                self.define(dst, value);
            }

            Instruction::Ldi { dst, offset } => {
                let addr = self.regs.pc_relative(offset as u16);
                let ptr = self.mem.read(addr);
                let value = self.mem.read(ptr);
                self.define(dst, value);
            }

            Instruction::Ldr { dst, base, offset } => {
                let addr = self.regs.get(base).wrapping_add(offset as u16);
                let value = self.mem.read(addr);
                self.define(dst, value);
            }

            Instruction::Lea { dst, offset } => {
                let addr = self.regs.pc_relative(offset as u16);
                self.define(dst, addr);
            }

            Instruction::St { src, offset } => {
                let addr = self.regs.pc_relative(offset as u16);
                self.mem.write(addr, self.regs.get(src));
            }

            Instruction::Sti { src, offset } => {
                let addr = self.regs.pc_relative(offset as u16);
                let ptr = self.mem.read(addr);
                self.mem.write(ptr, self.regs.get(src));
            }

            Instruction::Str { src, base, offset } => {
                let addr = self.regs.get(base).wrapping_add(offset as u16);
                self.mem.write(addr, self.regs.get(src));
            }
        }

        Ok(Flow::Continue)
    }

    /// Write a result register and update COND from it.
    fn define(&mut self, dst: Reg, value: u16) {
        self.regs.set(dst, value);
        self.regs.update_cond(dst);
    }

    fn operand(&self, src2: Operand) -> u16 {
        match src2 {
            Operand::Reg(r) => self.regs.get(r),
            Operand::Imm(v) => v as u16,
        }
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Registers, state and cycle count, for serialization.
    pub fn snapshot(&self) -> CpuSnapshot<'_> {
        CpuSnapshot {
            regs: &self.regs,
            state: self.state,
            cycles: self.cycles,
        }
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("reserved opcode {opcode:?} (x{word:04X}) at x{addr:04X}")]
    ReservedOpcode { opcode: Opcode, word: u16, addr: u16 },

    #[error("trap at x{addr:04X} failed: {source}")]
    Trap {
        addr: u16,
        #[source]
        source: TrapError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;
    use crate::cpu::trap::{Console, TRAP_HALT, TRAP_OUT, TRAP_PUTS};

    const ORIGIN: u16 = 0x3000;

    fn make_program(instructions: &[Instruction]) -> Vec<u16> {
        instructions.iter().map(encode).collect()
    }

    fn cpu_with(instructions: &[Instruction]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load_program(ORIGIN, &make_program(instructions)).unwrap();
        cpu
    }

    fn console() -> Console<&'static [u8], Vec<u8>> {
        Console::new(&b""[..], Vec::new())
    }

    /// Records every trap word it sees and keeps running.
    #[derive(Default)]
    struct RecordingTraps {
        seen: Vec<u16>,
    }

    impl TrapHandler for RecordingTraps {
        fn trap(
            &mut self,
            _: &mut Registers,
            _: &mut Memory,
            instruction: u16,
        ) -> Result<Flow, TrapError> {
            self.seen.push(instruction);
            Ok(Flow::Continue)
        }
    }

    const HALT: Instruction = Instruction::Trap { vector: TRAP_HALT };

    #[test]
    fn test_cpu_halt() {
        let mut cpu = cpu_with(&[HALT]);

        let executed = cpu.run(&mut console()).unwrap();

        assert_eq!(executed, 1);
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.pc, ORIGIN + 1);
    }

    #[test]
    fn test_add_immediate_minus_one() {
        let mut cpu = cpu_with(&[Instruction::Add {
            dst: Reg::R2,
            src1: Reg::R1,
            src2: Operand::Imm(-1),
        }]);
        cpu.regs.set(Reg::R1, 10);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R2), 9);
        assert_eq!(cpu.regs.cond, CondCode::Pos);
    }

    #[test]
    fn test_add_register_wraps() {
        let mut cpu = cpu_with(&[Instruction::Add {
            dst: Reg::R0,
            src1: Reg::R1,
            src2: Operand::Reg(Reg::R2),
        }]);
        cpu.regs.set(Reg::R1, 0xFFFF);
        cpu.regs.set(Reg::R2, 2);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R0), 1);
        assert_eq!(cpu.regs.cond, CondCode::Pos);
    }

    #[test]
    fn test_and_with_zero_immediate() {
        let mut cpu = cpu_with(&[Instruction::And {
            dst: Reg::R3,
            src1: Reg::R3,
            src2: Operand::Imm(0),
        }]);
        cpu.regs.set(Reg::R3, 0xFFFF);
        cpu.regs.cond = CondCode::Neg;

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R3), 0);
        assert_eq!(cpu.regs.cond, CondCode::Zro);
    }

    #[test]
    fn test_not_sets_negative() {
        let mut cpu = cpu_with(&[Instruction::Not { dst: Reg::R4, src: Reg::R5 }]);
        cpu.regs.set(Reg::R5, 0x00FF);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R4), 0xFF00);
        assert_eq!(cpu.regs.cond, CondCode::Neg);
    }

    #[test]
    fn test_br_unconditional_when_no_flags() {
        let mut cpu = cpu_with(&[Instruction::Br { n: false, z: false, p: false, offset: 4 }]);
        cpu.regs.cond = CondCode::Pos;

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.pc, ORIGIN + 1 + 4);
    }

    #[test]
    fn test_br_taken_and_not_taken() {
        let br_z = Instruction::Br { n: false, z: true, p: false, offset: -3 };

        let mut cpu = cpu_with(&[br_z]);
        cpu.regs.cond = CondCode::Zro;
        cpu.step(&mut console()).unwrap();
        assert_eq!(cpu.regs.pc, ORIGIN + 1 - 3);

        let mut cpu = cpu_with(&[br_z]);
        cpu.regs.cond = CondCode::Neg;
        cpu.step(&mut console()).unwrap();
        assert_eq!(cpu.regs.pc, ORIGIN + 1);
    }

    #[test]
    fn test_br_leaves_cond_alone() {
        let mut cpu = cpu_with(&[Instruction::Br { n: true, z: true, p: true, offset: 0 }]);
        cpu.regs.cond = CondCode::Neg;
        cpu.step(&mut console()).unwrap();
        assert_eq!(cpu.regs.cond, CondCode::Neg);
    }

    #[test]
    fn test_jmp_any_register() {
        let mut cpu = cpu_with(&[Instruction::Jmp { base: Reg::R7 }]);
        cpu.regs.set(Reg::R7, 0x4444);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.pc, 0x4444);
    }

    #[test]
    fn test_jsr_links_incremented_pc() {
        let mut cpu = cpu_with(&[Instruction::Jsr { offset: 5 }]);
        assert_eq!(cpu.regs.pc, 0x3000);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R7), 0x3001);
        assert_eq!(cpu.regs.pc, 0x3006);
    }

    #[test]
    fn test_jsrr_jumps_to_base() {
        let mut cpu = cpu_with(&[Instruction::Jsrr { base: Reg::R3 }]);
        cpu.regs.set(Reg::R3, 0x5000);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R7), 0x3001);
        assert_eq!(cpu.regs.pc, 0x5000);
    }

    #[test]
    fn test_jsrr_r7_writes_link_first() {
        let mut cpu = cpu_with(&[Instruction::Jsrr { base: Reg::R7 }]);
        cpu.regs.set(Reg::R7, 0x5000);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.pc, 0x3001);
    }

    #[test]
    fn test_ld_uses_incremented_pc() {
        let mut cpu = cpu_with(&[Instruction::Ld { dst: Reg::R0, offset: 1 }]);
        // PC+1 after increment is 0x3002, not 0x3001
        cpu.mem.write(0x3001, 0x1111);
        cpu.mem.write(0x3002, 0x8002);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R0), 0x8002);
        assert_eq!(cpu.regs.cond, CondCode::Neg);
    }

    #[test]
    fn test_ldi_double_indirection() {
        let mut cpu = cpu_with(&[Instruction::Ldi { dst: Reg::R1, offset: 2 }]);
        cpu.mem.write(0x3003, 0x3100);
        cpu.mem.write(0x3100, 0x1234);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R1), 0x1234);
        assert_eq!(cpu.regs.cond, CondCode::Pos);
    }

    #[test]
    fn test_ldr_base_plus_offset() {
        let mut cpu = cpu_with(&[Instruction::Ldr { dst: Reg::R2, base: Reg::R6, offset: -2 }]);
        cpu.regs.set(Reg::R6, 0x4002);
        cpu.mem.write(0x4000, 0);
        cpu.regs.cond = CondCode::Pos;

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R2), 0);
        assert_eq!(cpu.regs.cond, CondCode::Zro);
    }

    #[test]
    fn test_lea_no_memory_access() {
        let mut cpu = cpu_with(&[Instruction::Lea { dst: Reg::R5, offset: -1 }]);

        cpu.step(&mut console()).unwrap();

        assert_eq!(cpu.regs.get(Reg::R5), 0x3000);
        assert_eq!(cpu.regs.cond, CondCode::Pos);
    }

    #[test]
    fn test_stores_do_not_touch_cond() {
        let mut cpu = cpu_with(&[
            Instruction::St { src: Reg::R1, offset: 10 },
            Instruction::Sti { src: Reg::R1, offset: 10 },
            Instruction::Str { src: Reg::R1, base: Reg::R2, offset: 3 },
        ]);
        cpu.regs.set(Reg::R1, 0xBEEF);
        cpu.regs.set(Reg::R2, 0x5000);
        cpu.regs.cond = CondCode::Zro;
        // STI at 0x3001 reads its pointer from 0x3002 + 10
        cpu.mem.write(0x300C, 0x6000);

        let mut con = console();
        cpu.step(&mut con).unwrap();
        cpu.step(&mut con).unwrap();
        cpu.step(&mut con).unwrap();

        assert_eq!(cpu.mem.read(0x300B), 0xBEEF);
        assert_eq!(cpu.mem.read(0x6000), 0xBEEF);
        assert_eq!(cpu.mem.read(0x5003), 0xBEEF);
        assert_eq!(cpu.regs.cond, CondCode::Zro);
    }

    #[test]
    fn test_trap_delegates_raw_word() {
        let mut cpu = cpu_with(&[Instruction::Trap { vector: 0x42 }]);
        let mut traps = RecordingTraps::default();
        let before = cpu.regs.clone();

        let flow = cpu.step(&mut traps).unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(traps.seen, vec![0xF042]);
        assert_eq!(cpu.regs.pc, before.pc + 1);
        assert_eq!(cpu.regs.general(), before.general());
        assert_eq!(cpu.regs.cond, before.cond);
    }

    #[test]
    fn test_reserved_opcode_is_fatal() {
        let mut cpu = Cpu::new();
        cpu.load_program(ORIGIN, &[0xD000, encode(&HALT)]).unwrap();

        let err = cpu.run(&mut console()).unwrap_err();

        assert!(matches!(
            err,
            CpuError::ReservedOpcode { opcode: Opcode::Res, addr: 0x3000, .. }
        ));
        assert_eq!(cpu.state, CpuState::Error);
        assert_eq!(cpu.cycles, 0);
        assert!(matches!(cpu.step(&mut console()), Err(CpuError::NotRunning(CpuState::Error))));
    }

    #[test]
    fn test_rti_is_fatal() {
        let mut cpu = Cpu::new();
        cpu.load_program(ORIGIN, &[0x8000]).unwrap();

        assert!(cpu.step(&mut console()).is_err());
        assert!(!cpu.is_running());
    }

    #[test]
    fn test_failed_trap_stops_cpu() {
        let mut cpu = cpu_with(&[Instruction::Trap { vector: 0x20 }]);

        let err = cpu.step(&mut console()).unwrap_err();

        assert!(matches!(err, CpuError::Trap { addr: 0x3000, source: TrapError::InputClosed }));
        assert_eq!(cpu.state, CpuState::Error);
    }

    #[test]
    fn test_hello_program() {
        // LEA R0, msg ; PUTS ; HALT ; msg: "ok\0"
        let mut program = make_program(&[
            Instruction::Lea { dst: Reg::R0, offset: 2 },
            Instruction::Trap { vector: TRAP_PUTS },
            HALT,
        ]);
        program.extend([u16::from(b'o'), u16::from(b'k'), 0]);

        let mut cpu = Cpu::new();
        cpu.load_program(ORIGIN, &program).unwrap();
        let mut con = console();

        let executed = cpu.run(&mut con).unwrap();

        assert_eq!(executed, 3);
        assert_eq!(con.output(), b"ok");
    }

    #[test]
    fn test_countdown_loop() {
        // R1 = 3; loop: OUT '*'; R1 -= 1; BRp loop; HALT
        let program = make_program(&[
            Instruction::And { dst: Reg::R1, src1: Reg::R1, src2: Operand::Imm(0) },
            Instruction::Add { dst: Reg::R1, src1: Reg::R1, src2: Operand::Imm(3) },
            Instruction::Ld { dst: Reg::R0, offset: 5 },
            Instruction::Trap { vector: TRAP_OUT },
            Instruction::Add { dst: Reg::R1, src1: Reg::R1, src2: Operand::Imm(-1) },
            Instruction::Br { n: false, z: false, p: true, offset: -3 },
            HALT,
        ]);
        let mut cpu = Cpu::new();
        cpu.load_program(ORIGIN, &program).unwrap();
        cpu.mem.write(0x3008, u16::from(b'*'));
        let mut con = console();

        cpu.run(&mut con).unwrap();

        assert_eq!(con.output(), b"***");
        assert_eq!(cpu.regs.get(Reg::R1), 0);
    }

    #[test]
    fn test_run_limited_stops_at_limit() {
        // BR #-1 spins forever
        let mut cpu = cpu_with(&[Instruction::Br { n: false, z: false, p: false, offset: -1 }]);

        let executed = cpu.run_limited(&mut console(), 100).unwrap();

        assert_eq!(executed, 100);
        assert!(cpu.is_running());
        assert_eq!(cpu.regs.pc, ORIGIN);
    }

    #[test]
    fn test_load_image_sets_pc() {
        let image = Image { origin: 0x4000, words: vec![encode(&HALT)] };
        let mut cpu = Cpu::new();
        cpu.load_image(&image).unwrap();

        assert_eq!(cpu.regs.pc, 0x4000);
        cpu.run(&mut console()).unwrap();
        assert_eq!(cpu.last_instruction(), Some(HALT));
    }

    #[test]
    fn test_oversized_program_is_a_load_error() {
        let mut cpu = Cpu::new();
        let err = cpu.load_program(0xFFFF, &[encode(&HALT), encode(&HALT)]).unwrap_err();

        assert_eq!(err, MemoryError::ProgramTooLarge { origin: 0xFFFF, size: 2, available: 1 });
        assert_eq!(cpu.regs.pc, 0);
        assert!(cpu.is_running());
    }
}
