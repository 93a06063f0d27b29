//! X16 register file.
//!
//! The X16 has:
//! - R0-R7: eight 16-bit general purpose registers
//! - PC: 16-bit program counter
//! - COND: a condition code that is always one of NEG, ZRO or POS

use crate::bits;
use serde::{Serialize, Deserialize};
use std::fmt;

/// A general purpose register id (0-7).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8")]
pub struct Reg(u8);

impl Reg {
    pub const R0: Reg = Reg(0);
    pub const R1: Reg = Reg(1);
    pub const R2: Reg = Reg(2);
    pub const R3: Reg = Reg(3);
    pub const R4: Reg = Reg(4);
    pub const R5: Reg = Reg(5);
    pub const R6: Reg = Reg(6);
    /// Link register written by JSR/JSRR.
    pub const R7: Reg = Reg(7);

    /// Register ids in order.
    pub const ALL: [Reg; 8] = [
        Reg::R0, Reg::R1, Reg::R2, Reg::R3, Reg::R4, Reg::R5, Reg::R6, Reg::R7,
    ];

    /// Create from a register number.
    ///
    /// # Panics
    /// Panics if `id` is not in 0-7.
    pub fn new(id: u8) -> Self {
        assert!(id < 8, "register id {} out of range (0-7)", id);
        Reg(id)
    }

    /// Take the 3-bit register field starting at bit `n` of an instruction.
    #[inline]
    pub fn from_field(word: u16, n: u32) -> Self {
        Reg(bits::get_bits(word, n, 3) as u8)
    }

    /// The register number.
    #[inline]
    pub const fn id(self) -> u8 {
        self.0
    }

    /// The register number as a 16-bit field.
    #[inline]
    pub const fn bits(self) -> u16 {
        self.0 as u16
    }
}

impl TryFrom<u8> for Reg {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        if id < 8 {
            Ok(Reg(id))
        } else {
            Err(format!("register id {} out of range (0-7)", id))
        }
    }
}

impl fmt::Debug for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%r{}", self.0)
    }
}

/// The tri-state condition code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CondCode {
    /// Last result was negative (bit 15 set).
    Neg,
    /// Last result was zero.
    #[default]
    Zro,
    /// Last result was positive.
    Pos,
}

impl CondCode {
    /// Classify a result value.
    pub fn from_value(value: u16) -> Self {
        if value == 0 {
            CondCode::Zro
        } else if bits::is_negative(value) {
            CondCode::Neg
        } else {
            CondCode::Pos
        }
    }

    /// Short mnemonic used by front ends.
    pub fn as_str(self) -> &'static str {
        match self {
            CondCode::Neg => "NEG",
            CondCode::Zro => "ZRO",
            CondCode::Pos => "POS",
        }
    }
}

/// The X16 register file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// R0-R7
    r: [u16; 8],

    /// Program counter
    pub pc: u16,

    /// Condition code, derived from the last register-defining instruction.
    pub cond: CondCode,
}

impl Registers {
    /// Create a register file with every register zeroed and COND = ZRO.
    pub fn new() -> Self {
        Self {
            r: [0; 8],
            pc: 0,
            cond: CondCode::Zro,
        }
    }

    /// Reset all registers.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Read a general purpose register.
    #[inline]
    pub fn get(&self, reg: Reg) -> u16 {
        self.r[reg.0 as usize]
    }

    /// Write a general purpose register.
    #[inline]
    pub fn set(&mut self, reg: Reg, value: u16) {
        self.r[reg.0 as usize] = value;
    }

    /// All eight general purpose registers.
    pub fn general(&self) -> &[u16; 8] {
        &self.r
    }

    /// Set COND from the current value of `reg`.
    pub fn update_cond(&mut self, reg: Reg) {
        self.cond = CondCode::from_value(self.get(reg));
    }

    /// Increment the program counter by 1 (wrapping).
    /// Returns the old value.
    pub fn advance_pc(&mut self) -> u16 {
        let old = self.pc;
        self.pc = self.pc.wrapping_add(1);
        old
    }

    /// PC-relative address: the current (already incremented) PC plus a
    /// sign-extended offset.
    #[inline]
    pub fn pc_relative(&self, offset: u16) -> u16 {
        self.pc.wrapping_add(offset)
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.r.iter().enumerate() {
            write!(f, "R{}=x{:04X} ", i, value)?;
        }
        write!(f, "PC=x{:04X} COND={}", self.pc, self.cond.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_deserialize_checks_range() {
        let reg: Reg = serde_json::from_str("3").unwrap();
        assert_eq!(reg, Reg::R3);
        assert!(serde_json::from_str::<Reg>("9").is_err());
        assert_eq!(serde_json::to_string(&Reg::R7).unwrap(), "7");
    }

    #[test]
    fn test_cond_from_value() {
        assert_eq!(CondCode::from_value(0), CondCode::Zro);
        assert_eq!(CondCode::from_value(1), CondCode::Pos);
        assert_eq!(CondCode::from_value(0x7FFF), CondCode::Pos);
        assert_eq!(CondCode::from_value(0x8000), CondCode::Neg);
        assert_eq!(CondCode::from_value(0xFFFF), CondCode::Neg);
    }

    #[test]
    fn test_update_cond_reads_register() {
        let mut regs = Registers::new();
        regs.set(Reg::R3, 0xFFFE);
        regs.update_cond(Reg::R3);
        assert_eq!(regs.cond, CondCode::Neg);

        regs.set(Reg::R3, 0);
        regs.update_cond(Reg::R3);
        assert_eq!(regs.cond, CondCode::Zro);
    }

    #[test]
    fn test_advance_pc_wraps() {
        let mut regs = Registers::new();
        regs.pc = 0xFFFF;

        let old = regs.advance_pc();
        assert_eq!(old, 0xFFFF);
        assert_eq!(regs.pc, 0);
    }

    #[test]
    fn test_pc_relative_negative_offset() {
        let mut regs = Registers::new();
        regs.pc = 0x3001;
        assert_eq!(regs.pc_relative(0xFFFF), 0x3000);
        assert_eq!(regs.pc_relative(5), 0x3006);
    }

    #[test]
    fn test_reg_from_field() {
        // dst field of 0x1642 (ADD R3, R1, R2)
        assert_eq!(Reg::from_field(0x1642, 9), Reg::R3);
        assert_eq!(Reg::from_field(0x1642, 6), Reg::R1);
        assert_eq!(Reg::from_field(0x1642, 0), Reg::R2);
    }

    #[test]
    #[should_panic(expected = "register id")]
    fn test_reg_new_out_of_range() {
        Reg::new(8);
    }
}
