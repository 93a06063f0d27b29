//! WebAssembly bindings for the X16 emulator.
//!
//! This module provides JavaScript-friendly wrappers around the core emulator.

use wasm_bindgen::prelude::*;
use crate::{Console, Cpu, Image};
use crate::asm::assembler::assemble;
use crate::asm::disasm::disassemble_instruction;
use std::collections::VecDeque;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly CPU wrapper.
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu,
    console: Console<VecDeque<u8>, Vec<u8>>,
    program: Option<Image>,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            console: Console::new(VecDeque::new(), Vec::new()),
            program: None,
        }
    }

    /// Load a program from assembly source code. Returns the word count.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let image = assemble(source)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        self.install(image)
    }

    /// Load a program from raw image bytes. Returns the word count.
    #[wasm_bindgen]
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<usize, JsError> {
        let image = Image::from_bytes(bytes)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        self.install(image)
    }

    fn install(&mut self, image: Image) -> Result<usize, JsError> {
        let len = image.len();
        self.cpu = Cpu::new();
        self.console = Console::new(VecDeque::new(), Vec::new());
        self.cpu.load_image(&image)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        self.program = Some(image);
        Ok(len)
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        if !self.cpu.is_running() {
            return Err(JsError::new("CPU is not running"));
        }

        let word = self.cpu.mem.read(self.cpu.regs.pc);
        self.cpu.step(&mut self.console)
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        Ok(disassemble_instruction(word))
    }

    /// Run until halt, error or max cycles. Returns the total cycle count.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> Result<u64, JsError> {
        self.cpu.run_limited(&mut self.console, u64::from(max_cycles))
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        Ok(self.cpu.cycles)
    }

    /// Reset CPU to initial state with loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        self.console = Console::new(VecDeque::new(), Vec::new());
        if let Some(image) = &self.program {
            let _ = self.cpu.load_image(image);
        }
    }

    /// Queue characters for GETC/IN.
    #[wasm_bindgen]
    pub fn push_input(&mut self, text: &str) {
        self.console.input_mut().extend(text.bytes());
    }

    /// Take everything printed since the last call.
    #[wasm_bindgen]
    pub fn take_output(&mut self) -> String {
        let bytes = std::mem::take(self.console.output_mut());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Check if CPU is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    /// Check if CPU is halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get program counter.
    #[wasm_bindgen]
    pub fn pc(&self) -> u16 {
        self.cpu.regs.pc
    }

    /// Get a general purpose register (0-7).
    #[wasm_bindgen]
    pub fn register(&self, id: u8) -> Result<u16, JsError> {
        self.cpu.regs.general()
            .get(usize::from(id))
            .copied()
            .ok_or_else(|| JsError::new(&format!("no register R{}", id)))
    }

    /// Get condition code as string.
    #[wasm_bindgen]
    pub fn cond(&self) -> String {
        self.cpu.regs.cond.as_str().to_string()
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.cpu.state)
    }

    /// Get memory cell value.
    #[wasm_bindgen]
    pub fn memory_at(&self, addr: u16) -> u16 {
        self.cpu.mem.read(addr)
    }

    /// Get `count` memory cells starting at `start`.
    #[wasm_bindgen]
    pub fn memory_range(&self, start: u16, count: usize) -> Vec<u16> {
        self.cpu.mem.dump(start, count).into_iter().map(|(_, w)| w).collect()
    }

    /// Get registers, state and cycle count as JSON.
    #[wasm_bindgen]
    pub fn registers_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.cpu.snapshot())
            .map_err(|e| JsError::new(&format!("{}", e)))
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the image bytes.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<Vec<u8>, JsError> {
    let image = assemble(source)
        .map_err(|e| JsError::new(&format!("{}", e)))?;
    Ok(image.to_bytes())
}

/// Disassemble a single instruction word.
#[wasm_bindgen]
pub fn wasm_disassemble(word: u16) -> String {
    disassemble_instruction(word)
}
