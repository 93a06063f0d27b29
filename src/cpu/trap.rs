//! Trap service routines.
//!
//! A TRAP instruction hands the whole instruction word to a [`TrapHandler`];
//! the CPU does nothing else for it. [`Console`] implements the standard
//! character I/O vectors over any reader/writer pair, which lets the CLI use
//! stdin/stdout while tests and the debugger use in-memory buffers.

use crate::bits;
use crate::cpu::memory::Memory;
use crate::cpu::registers::{Reg, Registers};
use std::io::{Read, Write};
use thiserror::Error;

/// Read one character into R0.
pub const TRAP_GETC: u8 = 0x20;
/// Write the character in R0.
pub const TRAP_OUT: u8 = 0x21;
/// Write the string at R0, one character per word.
pub const TRAP_PUTS: u8 = 0x22;
/// Prompt, read and echo one character into R0.
pub const TRAP_IN: u8 = 0x23;
/// Write the string at R0, two characters per word.
pub const TRAP_PUTSP: u8 = 0x24;
/// Stop the machine.
pub const TRAP_HALT: u8 = 0x25;

/// What the machine should do after an instruction completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Fetch the next instruction.
    Continue,
    /// Stop running.
    Halt,
}

/// Services TRAP instructions on behalf of the CPU.
pub trait TrapHandler {
    /// Handle the trap encoded in `instruction`.
    ///
    /// The handler owns any register conventions it needs; the CPU has
    /// already advanced PC and will not touch state after this returns.
    fn trap(
        &mut self,
        regs: &mut Registers,
        mem: &mut Memory,
        instruction: u16,
    ) -> Result<Flow, TrapError>;
}

/// Errors raised by trap service routines.
#[derive(Debug, Error)]
pub enum TrapError {
    #[error("unknown trap vector x{0:02X}")]
    UnknownVector(u8),

    #[error("input closed while waiting for a character")]
    InputClosed,

    #[error("console I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Console trap handler over a byte reader and writer.
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: Read, W: Write> Console<R, W> {
    /// Create a console reading from `input` and writing to `output`.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Shared access to the input source.
    pub fn input(&self) -> &R {
        &self.input
    }

    /// Mutable access to the input source (to queue keystrokes, for example).
    pub fn input_mut(&mut self) -> &mut R {
        &mut self.input
    }

    /// Shared access to the output sink.
    pub fn output(&self) -> &W {
        &self.output
    }

    /// Mutable access to the output sink.
    pub fn output_mut(&mut self) -> &mut W {
        &mut self.output
    }

    /// Split back into reader and writer.
    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }

    fn read_char(&mut self) -> Result<u8, TrapError> {
        let mut buf = [0u8; 1];
        match self.input.read(&mut buf)? {
            0 => Err(TrapError::InputClosed),
            _ => Ok(buf[0]),
        }
    }

    fn puts(&mut self, mem: &Memory, mut addr: u16) -> Result<(), TrapError> {
        loop {
            let word = mem.read(addr);
            if word == 0 {
                return Ok(());
            }
            self.output.write_all(&[(word & 0xFF) as u8])?;
            addr = addr.wrapping_add(1);
        }
    }

    fn putsp(&mut self, mem: &Memory, mut addr: u16) -> Result<(), TrapError> {
        loop {
            let word = mem.read(addr);
            let low = bits::get_bits(word, 0, 8) as u8;
            let high = bits::get_bits(word, 8, 8) as u8;
            if low == 0 {
                return Ok(());
            }
            self.output.write_all(&[low])?;
            if high == 0 {
                return Ok(());
            }
            self.output.write_all(&[high])?;
            addr = addr.wrapping_add(1);
        }
    }
}

impl<R: Read, W: Write> TrapHandler for Console<R, W> {
    fn trap(
        &mut self,
        regs: &mut Registers,
        mem: &mut Memory,
        instruction: u16,
    ) -> Result<Flow, TrapError> {
        let vector = bits::get_bits(instruction, 0, 8) as u8;
        tracing::debug!(vector = format!("x{:02X}", vector), "servicing trap");

        let flow = match vector {
            TRAP_GETC => {
                let ch = self.read_char()?;
                regs.set(Reg::R0, u16::from(ch));
                Flow::Continue
            }
            TRAP_OUT => {
                let ch = bits::get_bits(regs.get(Reg::R0), 0, 8) as u8;
                self.output.write_all(&[ch])?;
                Flow::Continue
            }
            TRAP_PUTS => {
                self.puts(mem, regs.get(Reg::R0))?;
                Flow::Continue
            }
            TRAP_IN => {
                self.output.write_all(b"Enter a character: ")?;
                self.output.flush()?;
                let ch = self.read_char()?;
                self.output.write_all(&[ch])?;
                regs.set(Reg::R0, u16::from(ch));
                Flow::Continue
            }
            TRAP_PUTSP => {
                self.putsp(mem, regs.get(Reg::R0))?;
                Flow::Continue
            }
            TRAP_HALT => {
                tracing::info!("HALT trap");
                Flow::Halt
            }
            other => return Err(TrapError::UnknownVector(other)),
        };

        self.output.flush()?;
        Ok(flow)
    }
}
