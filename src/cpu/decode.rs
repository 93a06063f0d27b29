//! Instruction decoder for the X16.
//!
//! Every instruction is one 16-bit word. Bits 15-12 hold the opcode; the
//! remaining twelve bits are operand fields whose layout depends on the
//! opcode.

use crate::bits;
use crate::cpu::registers::Reg;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// The 16 opcode values. Two of them (RTI and RES) are reserved and have
/// no behavior on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Br = 0x0,
    Add = 0x1,
    Ld = 0x2,
    St = 0x3,
    Jsr = 0x4,
    And = 0x5,
    Ldr = 0x6,
    Str = 0x7,
    /// Reserved
    Rti = 0x8,
    Not = 0x9,
    Ldi = 0xA,
    Sti = 0xB,
    Jmp = 0xC,
    /// Reserved
    Res = 0xD,
    Lea = 0xE,
    Trap = 0xF,
}

impl Opcode {
    /// Indexed by the 4-bit opcode field.
    const TABLE: [Opcode; 16] = [
        Opcode::Br,
        Opcode::Add,
        Opcode::Ld,
        Opcode::St,
        Opcode::Jsr,
        Opcode::And,
        Opcode::Ldr,
        Opcode::Str,
        Opcode::Rti,
        Opcode::Not,
        Opcode::Ldi,
        Opcode::Sti,
        Opcode::Jmp,
        Opcode::Res,
        Opcode::Lea,
        Opcode::Trap,
    ];

    /// Opcode of an instruction word (bits 15-12).
    #[inline]
    pub fn of(word: u16) -> Self {
        Self::TABLE[bits::get_bits(word, 12, 4) as usize]
    }

    /// The 4-bit opcode value.
    #[inline]
    pub const fn bits(self) -> u16 {
        self as u16
    }

    /// True for the two opcodes without defined behavior.
    pub fn is_reserved(self) -> bool {
        matches!(self, Opcode::Rti | Opcode::Res)
    }
}

/// Second source operand of ADD and AND.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Register mode (bit 5 = 0): bits 2-0.
    Reg(Reg),
    /// Immediate mode (bit 5 = 1): bits 4-0, sign-extended.
    Imm(i16),
}

/// A decoded X16 instruction.
///
/// Offsets are stored already sign-extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Operate ====================

    /// dst := src1 + src2
    Add { dst: Reg, src1: Reg, src2: Operand },

    /// dst := src1 & src2
    And { dst: Reg, src1: Reg, src2: Operand },

    /// dst := !src
    Not { dst: Reg, src: Reg },

    // ==================== Control ====================

    /// Branch if any requested flag matches COND, or always when none is requested.
    Br { n: bool, z: bool, p: bool, offset: i16 },

    /// PC := base
    Jmp { base: Reg },

    /// R7 := PC; PC := PC + offset
    Jsr { offset: i16 },

    /// R7 := PC; PC := base
    Jsrr { base: Reg },

    /// Call the trap handler.
    Trap { vector: u8 },

    // ==================== Data Movement ====================

    /// dst := mem[PC + offset]
    Ld { dst: Reg, offset: i16 },

    /// dst := mem[mem[PC + offset]]
    Ldi { dst: Reg, offset: i16 },

    /// dst := mem[base + offset]
    Ldr { dst: Reg, base: Reg, offset: i16 },

    /// dst := PC + offset
    Lea { dst: Reg, offset: i16 },

    /// mem[PC + offset] := src
    St { src: Reg, offset: i16 },

    /// mem[mem[PC + offset]] := src
    Sti { src: Reg, offset: i16 },

    /// mem[base + offset] := src
    Str { src: Reg, base: Reg, offset: i16 },
}

impl Instruction {
    /// The opcode this instruction encodes to.
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Add { .. } => Opcode::Add,
            Instruction::And { .. } => Opcode::And,
            Instruction::Not { .. } => Opcode::Not,
            Instruction::Br { .. } => Opcode::Br,
            Instruction::Jmp { .. } => Opcode::Jmp,
            Instruction::Jsr { .. } | Instruction::Jsrr { .. } => Opcode::Jsr,
            Instruction::Trap { .. } => Opcode::Trap,
            Instruction::Ld { .. } => Opcode::Ld,
            Instruction::Ldi { .. } => Opcode::Ldi,
            Instruction::Ldr { .. } => Opcode::Ldr,
            Instruction::Lea { .. } => Opcode::Lea,
            Instruction::St { .. } => Opcode::St,
            Instruction::Sti { .. } => Opcode::Sti,
            Instruction::Str { .. } => Opcode::Str,
        }
    }
}

/// Sign-extended `width`-bit field at bit 0.
#[inline]
fn offset(word: u16, width: u32) -> i16 {
    bits::sign_extend(bits::get_bits(word, 0, width), width) as i16
}

/// ADD/AND second operand.
fn operand(word: u16) -> Operand {
    if bits::get_bit(word, 5) == 0 {
        Operand::Reg(Reg::from_field(word, 0))
    } else {
        Operand::Imm(offset(word, 5))
    }
}

/// Decode a 16-bit instruction word.
pub fn decode(word: u16) -> Result<Instruction, DecodeError> {
    let dr = Reg::from_field(word, 9);
    let sr1 = Reg::from_field(word, 6);

    let instruction = match Opcode::of(word) {
        Opcode::Add => Instruction::Add { dst: dr, src1: sr1, src2: operand(word) },
        Opcode::And => Instruction::And { dst: dr, src1: sr1, src2: operand(word) },
        Opcode::Not => Instruction::Not { dst: dr, src: sr1 },
        Opcode::Br => Instruction::Br {
            n: bits::get_bit(word, 11) == 1,
            z: bits::get_bit(word, 10) == 1,
            p: bits::get_bit(word, 9) == 1,
            offset: offset(word, 9),
        },
        Opcode::Jmp => Instruction::Jmp { base: sr1 },
        Opcode::Jsr => {
            if bits::get_bit(word, 11) == 0 {
                Instruction::Jsrr { base: sr1 }
            } else {
                Instruction::Jsr { offset: offset(word, 11) }
            }
        }
        Opcode::Trap => Instruction::Trap { vector: bits::get_bits(word, 0, 8) as u8 },
        Opcode::Ld => Instruction::Ld { dst: dr, offset: offset(word, 9) },
        Opcode::Ldi => Instruction::Ldi { dst: dr, offset: offset(word, 9) },
        Opcode::Ldr => Instruction::Ldr { dst: dr, base: sr1, offset: offset(word, 6) },
        Opcode::Lea => Instruction::Lea { dst: dr, offset: offset(word, 9) },
        Opcode::St => Instruction::St { src: dr, offset: offset(word, 9) },
        Opcode::Sti => Instruction::Sti { src: dr, offset: offset(word, 9) },
        Opcode::Str => Instruction::Str { src: dr, base: sr1, offset: offset(word, 6) },
        op @ (Opcode::Rti | Opcode::Res) => {
            return Err(DecodeError::ReservedOpcode { opcode: op, word });
        }
    };

    Ok(instruction)
}

/// Encode an instruction back to a word.
///
/// Offsets and immediates are truncated to their field widths; range
/// checking is the assembler's job.
pub fn encode(instr: &Instruction) -> u16 {
    let op = instr.opcode().bits() << 12;
    let field = |value: i16, width: u32| (value as u16) & ((1u16 << width) - 1);
    let operate = |dst: Reg, src1: Reg, src2: Operand| {
        let low = match src2 {
            Operand::Reg(r) => r.bits(),
            Operand::Imm(v) => (1 << 5) | field(v, 5),
        };
        (dst.bits() << 9) | (src1.bits() << 6) | low
    };

    op | match *instr {
        Instruction::Add { dst, src1, src2 } => operate(dst, src1, src2),
        Instruction::And { dst, src1, src2 } => operate(dst, src1, src2),
        Instruction::Not { dst, src } => (dst.bits() << 9) | (src.bits() << 6) | 0x3F,
        Instruction::Br { n, z, p, offset } => {
            (u16::from(n) << 11) | (u16::from(z) << 10) | (u16::from(p) << 9) | field(offset, 9)
        }
        Instruction::Jmp { base } => base.bits() << 6,
        Instruction::Jsr { offset } => (1 << 11) | field(offset, 11),
        Instruction::Jsrr { base } => base.bits() << 6,
        Instruction::Trap { vector } => u16::from(vector),
        Instruction::Ld { dst, offset }
        | Instruction::Ldi { dst, offset }
        | Instruction::Lea { dst, offset } => (dst.bits() << 9) | field(offset, 9),
        Instruction::St { src, offset } | Instruction::Sti { src, offset } => {
            (src.bits() << 9) | field(offset, 9)
        }
        Instruction::Ldr { dst: reg, base, offset }
        | Instruction::Str { src: reg, base, offset } => {
            (reg.bits() << 9) | (base.bits() << 6) | field(offset, 6)
        }
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("reserved opcode {opcode:?} in instruction x{word:04X}")]
    ReservedOpcode { opcode: Opcode, word: u16 },
}
