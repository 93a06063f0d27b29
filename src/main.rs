//! X16 Emulator - CLI Entry Point
//!
//! Commands:
//! - `x16-emu run <program>` - Run an image or assembly file
//! - `x16-emu debug <program>` - Interactive debugger
//! - `x16-emu asm <source>` - Assemble to an image
//! - `x16-emu disasm <image>` - Disassemble an image

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use x16::Image;

#[derive(Parser)]
#[command(name = "x16-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "An emulator for the X16 16-bit teaching computer")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the image or assembly file to execute
        program: String,
        /// Maximum number of cycles to run
        #[arg(short, long, default_value = "1000000")]
        max_cycles: u64,
        /// Print every executed instruction to stderr
        #[arg(short, long)]
        trace: bool,
        /// Print the final machine state as JSON
        #[arg(long)]
        dump_state: bool,
    },
    /// Interactive debugger
    #[cfg(feature = "tui")]
    Debug {
        /// Path to the image or assembly file to debug
        program: String,
    },
    /// Assemble source to an image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
        /// Load address, in hex
        #[arg(long, value_parser = parse_hex, default_value = "3000")]
        origin: u16,
    },
    /// Disassemble an image to readable text
    Disasm {
        /// Path to the image file
        image: String,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace, dump_state }) => {
            run_program(&program, max_cycles, trace, dump_state);
        }
        #[cfg(feature = "tui")]
        Some(Commands::Debug { program }) => {
            debug_program(&program);
        }
        Some(Commands::Asm { source, output, origin }) => {
            assemble_file(&source, output, origin);
        }
        Some(Commands::Disasm { image }) => {
            disassemble_file(&image);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("X16 Emulator v0.1.0");
            println!("A 16-bit teaching computer emulator");
            println!();
            println!("Use --help for available commands");
        }
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_hex(s: &str) -> Result<u16, String> {
    let digits = s
        .trim_start_matches("0x")
        .trim_start_matches('x')
        .trim_start_matches('X');
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address '{}': {}", s, e))
}

fn is_source(path: &str) -> bool {
    path.ends_with(".asm") || path.ends_with(".s")
}

/// Load a program, assembling it first if it is source. Exits on failure.
fn load_program(path: &str) -> Image {
    use x16::{assemble, load_image};

    let image = if is_source(path) {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match assemble(&source) {
            Ok(image) => {
                eprintln!("📝 Assembled {} words at x{:04X}", image.len(), image.origin);
                image
            }
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_image(path) {
            Ok(image) => {
                eprintln!("📂 Loaded {} words at x{:04X}", image.len(), image.origin);
                image
            }
            Err(e) => {
                eprintln!("❌ Failed to load image: {}", e);
                std::process::exit(1);
            }
        }
    };

    if image.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }

    image
}

fn run_program(path: &str, max_cycles: u64, trace: bool, dump_state: bool) {
    use x16::{Console, Cpu};
    use x16::asm::disasm::disassemble_instruction;

    eprintln!("🔧 Running: {}", path);
    let image = load_program(path);

    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load_image(&image) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }

    let stdin = std::io::stdin();
    let mut console = Console::new(stdin.lock(), std::io::stdout());

    let mut failed = false;
    while cpu.is_running() && cpu.cycles < max_cycles {
        let pc = cpu.regs.pc;
        let word = cpu.mem.read(pc);

        if let Err(e) = cpu.step(&mut console) {
            eprintln!("❌ CPU error: {}", e);
            failed = true;
            break;
        }

        if trace {
            eprintln!("x{:04X}: {:04X}  {:<20} {:?}",
                pc, word, disassemble_instruction(word), cpu.regs);
        }
    }

    eprintln!();
    eprintln!("━━━ Result ━━━");
    eprintln!("Cycles: {}", cpu.cycles);
    eprintln!("State: {:?}", cpu.state);
    eprintln!("Registers: {:?}", cpu.regs);

    if cpu.is_running() && cpu.cycles >= max_cycles {
        eprintln!();
        eprintln!("⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.", max_cycles);
    }

    if dump_state {
        match serde_json::to_string_pretty(&cpu.snapshot()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("❌ Failed to serialize state: {}", e),
        }
    }

    if failed {
        std::process::exit(1);
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str) {
    use x16::tui::run_debugger;

    eprintln!("🔍 Loading: {}", path);
    let image = load_program(path);

    eprintln!("🚀 Launching debugger...");

    if let Err(e) = run_debugger(image) {
        eprintln!("❌ Debugger error: {}", e);
        std::process::exit(1);
    }
}

fn assemble_file(source_path: &str, output: Option<String>, origin: u16) {
    use x16::asm::{assemble_at, save_image};

    let out_path = output.unwrap_or_else(|| {
        match source_path.rsplit_once('.') {
            Some((stem, _)) => format!("{}.obj", stem),
            None => format!("{}.obj", source_path),
        }
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let image = match assemble_at(&source, origin) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} words at x{:04X}", image.len(), image.origin);

    if let Err(e) = save_image(&out_path, &image) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str) {
    use x16::{disassemble, load_image};

    let image = match load_image(image_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", disassemble(&image));
}

/// Assemble and run a program with queued input, returning its output.
fn run_captured(source: &str, input: &str) -> Result<(x16::Cpu, String), String> {
    use std::collections::VecDeque;
    use x16::{assemble, Console, Cpu};

    let image = assemble(source).map_err(|e| e.to_string())?;
    let mut cpu = Cpu::new();
    cpu.load_image(&image).map_err(|e| e.to_string())?;

    let mut console = Console::new(VecDeque::from(input.as_bytes().to_vec()), Vec::new());
    cpu.run_limited(&mut console, 10_000).map_err(|e| e.to_string())?;

    let (_, output) = console.into_parts();
    Ok((cpu, String::from_utf8_lossy(&output).into_owned()))
}

fn run_self_test() {
    use x16::bits::sign_extend;
    use x16::{CondCode, Reg};

    println!("━━━ X16 Emulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    let mut check = |name: &str, ok: bool, detail: String| {
        print!("{}... ", name);
        if ok {
            println!("✓");
            passed += 1;
        } else {
            println!("✗ ({})", detail);
            failed += 1;
        }
    };

    // Test 1: Sign extension
    let ext = sign_extend(0x1F, 5);
    check("Sign extension of a 5-bit field", ext == 0xFFFF, format!("got x{:04X}", ext));

    // Test 2: ADD with negative immediate
    match run_captured("add %r0, %r0, $10\nadd %r0, %r0, $-1\nhalt", "") {
        Ok((cpu, _)) => {
            let r0 = cpu.regs.get(Reg::R0);
            check("ADD immediate -1", r0 == 9 && cpu.regs.cond == CondCode::Pos,
                format!("got R0={} {:?}", r0, cpu.regs.cond));
        }
        Err(e) => check("ADD immediate -1", false, e),
    }

    // Test 3: AND to zero
    match run_captured("add %r1, %r1, $5\nand %r2, %r1, $0\nhalt", "") {
        Ok((cpu, _)) => {
            check("AND sets ZRO", cpu.regs.get(Reg::R2) == 0 && cpu.regs.cond == CondCode::Zro,
                format!("got {:?}", cpu.regs.cond));
        }
        Err(e) => check("AND sets ZRO", false, e),
    }

    // Test 4: Subroutine call and return
    let program = "jsr sub\nhalt\nsub: add %r3, %r3, $7\nret";
    match run_captured(program, "") {
        Ok((cpu, _)) => {
            check("JSR and RET", cpu.is_halted() && cpu.regs.get(Reg::R3) == 7,
                format!("got R3={}", cpu.regs.get(Reg::R3)));
        }
        Err(e) => check("JSR and RET", false, e),
    }

    // Test 5: Console traps
    let program = "lea %r0, msg\nputs\ngetc\nputc\nhalt\nmsg: val $72\nval $105\nval $0";
    match run_captured(program, "!") {
        Ok((_, output)) => {
            check("PUTS, GETC and OUT", output == "Hi!", format!("got {:?}", output));
        }
        Err(e) => check("PUTS, GETC and OUT", false, e),
    }

    // Test 6: Reserved opcode is fatal
    let mut cpu = x16::Cpu::new();
    let mut console = x16::Console::new(std::io::empty(), std::io::sink());
    let fatal = cpu.load_program(0x3000, &[0xD000]).is_ok()
        && cpu.step(&mut console).is_err()
        && cpu.state == x16::CpuState::Error;
    check("Reserved opcode is fatal", fatal, format!("state {:?}", cpu.state));

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
