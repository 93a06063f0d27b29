//! # X16 Emulator
//!
//! An emulator for the X16, a small 16-bit word-addressed teaching
//! computer with eight registers, a three-state condition code and a trap
//! instruction for console I/O.
//!
//! The crate contains the CPU core, a console trap handler, a two-pass
//! assembler, a disassembler and the program image format, plus an optional
//! terminal debugger and WebAssembly bindings.

pub mod bits;
pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use cpu::{Cpu, CpuState, CpuError, Memory, Registers, Reg, CondCode, Instruction};
pub use cpu::{Console, Flow, TrapHandler, TrapError};
pub use asm::{assemble, disassemble, disassemble_instruction, AssemblerError};
pub use asm::{Image, load_image, save_image};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
