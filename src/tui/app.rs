//! Debugger application state and logic.

use crate::asm::disasm::disassemble_instruction;
use crate::cpu::trap::{TRAP_GETC, TRAP_IN};
use crate::cpu::decode::{decode, Instruction};
use crate::{Console, Cpu, Image};
use std::collections::{HashSet, VecDeque};

/// Console whose input is a queue of typed bytes and whose output is kept.
pub type DebugConsole = Console<VecDeque<u8>, Vec<u8>>;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Trap handler with captured program output.
    pub console: DebugConsole,
    /// Loaded program, reinstalled on reset.
    pub program: Image,
    /// Breakpoints (by address).
    pub breakpoints: HashSet<u16>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Are keystrokes going to the program instead of the debugger?
    pub input_mode: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// First address shown in the memory view.
    pub mem_scroll: u16,
    /// Breakpoint address to run past on the next tick.
    resume_from: Option<u16>,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Image) -> Self {
        let mut cpu = Cpu::new();
        let status = match cpu.load_image(&program) {
            Ok(()) => "Ready. Press 's' to step, 'r' to run, 'q' to quit.".to_string(),
            Err(e) => format!("Load failed: {}", e),
        };

        Self {
            cpu,
            console: Console::new(VecDeque::new(), Vec::new()),
            mem_scroll: program.origin,
            program,
            breakpoints: HashSet::new(),
            running: false,
            input_mode: false,
            should_quit: false,
            status,
            resume_from: None,
        }
    }

    /// True when the next instruction reads a character and none is queued.
    pub fn needs_input(&self) -> bool {
        let word = self.cpu.mem.read(self.cpu.regs.pc);
        matches!(
            decode(word),
            Ok(Instruction::Trap { vector: TRAP_GETC | TRAP_IN })
        ) && self.console.input().is_empty()
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        if self.needs_input() {
            self.running = false;
            self.input_mode = true;
            self.status = "Program is waiting for input. Type, then Tab to resume.".into();
            return;
        }

        let pc = self.cpu.regs.pc;
        let word = self.cpu.mem.read(pc);
        match self.cpu.step(&mut self.console) {
            Ok(_) => {
                self.status = format!("x{:04X}: {}", pc, disassemble_instruction(word));
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or error.
    pub fn run(&mut self) {
        self.running = true;
        self.resume_from = Some(self.cpu.regs.pc);
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Halted after {} cycles", self.cpu.cycles);
            return;
        }

        // Check for breakpoint, except the one we are resuming from
        let pc = self.cpu.regs.pc;
        let resuming = self.resume_from.take() == Some(pc);
        if !resuming && self.breakpoints.contains(&pc) {
            self.running = false;
            self.status = format!("Breakpoint at x{:04X}", pc);
            return;
        }

        self.step();
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.cpu.regs.pc;
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at x{:04X}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at x{:04X}", pc);
        }
    }

    /// Queue a byte for GETC/IN.
    pub fn push_input(&mut self, byte: u8) {
        self.console.input_mut().push_back(byte);
    }

    /// Everything the program has printed so far.
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(self.console.output()).into_owned()
    }

    /// Reset CPU to initial state.
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        self.console = Console::new(VecDeque::new(), Vec::new());
        if let Err(e) = self.cpu.load_image(&self.program) {
            self.status = format!("Load failed: {}", e);
        } else {
            self.status = "Reset. Ready.".into();
        }
        self.running = false;
        self.input_mode = false;
        self.resume_from = None;
    }

    /// Get disassembly around current PC.
    pub fn get_disassembly(&self, lines: usize) -> Vec<(u16, String, bool)> {
        let pc = self.cpu.regs.pc;
        let start = pc.saturating_sub((lines / 2) as u16);

        (0..lines)
            .filter_map(|i| {
                let addr = start.checked_add(i as u16)?;
                let word = self.cpu.mem.read(addr);
                Some((addr, disassemble_instruction(word), addr == pc))
            })
            .collect()
    }
}

/// Run the debugger with a program.
pub fn run_debugger(program: Image) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create app
    let mut app = DebuggerApp::new(program);

    // Main loop
    loop {
        // Draw
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        // Handle input
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if app.input_mode {
                        match key.code {
                            KeyCode::Tab | KeyCode::Esc => {
                                app.input_mode = false;
                                app.status = "Input queued.".into();
                            }
                            KeyCode::Enter => app.push_input(b'\n'),
                            KeyCode::Char(c) if c.is_ascii() => app.push_input(c as u8),
                            _ => {}
                        }
                        continue;
                    }

                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Tab => {
                            app.input_mode = true;
                            app.status = "Typing program input. Tab to return.".into();
                        }
                        KeyCode::Up => app.mem_scroll = app.mem_scroll.saturating_sub(1),
                        KeyCode::Down => app.mem_scroll = app.mem_scroll.saturating_add(1),
                        KeyCode::PageUp => app.mem_scroll = app.mem_scroll.saturating_sub(16),
                        KeyCode::PageDown => app.mem_scroll = app.mem_scroll.saturating_add(16),
                        _ => {}
                    }
                }
            }
        }

        // Tick for continuous running
        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
