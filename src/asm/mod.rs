//! Assembler, disassembler and image format for X16 programs.
//!
//! This module provides:
//! - A two-pass assembler (text → program image)
//! - A disassembler (words → readable text)
//! - The big-endian program image reader/writer

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, assemble_at, AssemblerError, DEFAULT_ORIGIN};
pub use disasm::{disassemble, disassemble_instruction};
pub use image::{Image, ImageError, load_image, save_image};
