//! TUI debugger for the X16 emulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and condition code view
//! - Scrollable memory view
//! - Step/run/breakpoint controls
//! - Disassembly view and program console

mod app;
mod ui;

pub use app::{DebugConsole, DebuggerApp, run_debugger};
