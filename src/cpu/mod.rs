//! CPU emulation for the X16.
//!
//! This module implements the complete X16 architecture:
//! - 65,536 sixteen-bit memory cells
//! - 8 general purpose registers, a program counter and a condition code
//! - 14 instructions plus a trap mechanism for I/O

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;
pub mod trap;

pub use memory::{Memory, MemoryError};
pub use registers::{CondCode, Reg, Registers};
pub use decode::{Instruction, Opcode, Operand, DecodeError};
pub use execute::{Cpu, CpuError, CpuSnapshot, CpuState};
pub use trap::{Console, Flow, TrapError, TrapHandler};
