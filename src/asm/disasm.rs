//! Disassembler for X16 programs.
//!
//! Output uses the assembler's own syntax, with PC-relative operands shown
//! as signed offsets (`$-3`). Used for trace logging and by the front ends;
//! the CPU never depends on it.

use crate::asm::image::Image;
use crate::cpu::decode::{decode, Instruction, Operand};
use crate::cpu::trap::{TRAP_GETC, TRAP_HALT, TRAP_IN, TRAP_OUT, TRAP_PUTS, TRAP_PUTSP};

/// Disassemble a single instruction word to text.
pub fn disassemble_instruction(word: u16) -> String {
    match decode(word) {
        Ok(decoded) => format_instruction(&decoded),
        Err(_) => format!("??? x{:04X}", word),
    }
}

/// Disassemble a whole image as an address-annotated listing.
pub fn disassemble(image: &Image) -> String {
    let mut output = String::new();
    output.push_str("# X16 Disassembly\n");
    output.push_str(&format!("# origin x{:04X}, {} words\n\n", image.origin, image.len()));

    for (addr, word) in image.iter() {
        let line = disassemble_instruction(word);
        output.push_str(&format!("x{:04X}: {:04X}  {}\n", addr, word, line));
    }

    output
}

/// Format a decoded instruction as assembly text.
pub fn format_instruction(instr: &Instruction) -> String {
    match *instr {
        Instruction::Add { dst, src1, src2 } => {
            format!("add {}, {}, {}", dst, src1, format_operand(src2))
        }
        Instruction::And { dst, src1, src2 } => {
            format!("and {}, {}, {}", dst, src1, format_operand(src2))
        }
        Instruction::Not { dst, src } => format!("not {}, {}", dst, src),

        Instruction::Br { n, z, p, offset } => {
            let mut mnemonic = String::from("br");
            if n {
                mnemonic.push('n');
            }
            if z {
                mnemonic.push('z');
            }
            if p {
                mnemonic.push('p');
            }
            format!("{} ${}", mnemonic, offset)
        }
        Instruction::Jmp { base } if base.id() == 7 => "ret".to_string(),
        Instruction::Jmp { base } => format!("jmp {}", base),
        Instruction::Jsr { offset } => format!("jsr ${}", offset),
        Instruction::Jsrr { base } => format!("jsrr {}", base),

        Instruction::Trap { vector } => match vector {
            TRAP_GETC => "getc".to_string(),
            TRAP_OUT => "putc".to_string(),
            TRAP_PUTS => "puts".to_string(),
            TRAP_IN => "enter".to_string(),
            TRAP_PUTSP => "putsp".to_string(),
            TRAP_HALT => "halt".to_string(),
            other => format!("trap $x{:02X}", other),
        },

        Instruction::Ld { dst, offset } => format!("ld {}, ${}", dst, offset),
        Instruction::Ldi { dst, offset } => format!("ldi {}, ${}", dst, offset),
        Instruction::Ldr { dst, base, offset } => format!("ldr {}, {}, ${}", dst, base, offset),
        Instruction::Lea { dst, offset } => format!("lea {}, ${}", dst, offset),
        Instruction::St { src, offset } => format!("st {}, ${}", src, offset),
        Instruction::Sti { src, offset } => format!("sti {}, ${}", src, offset),
        Instruction::Str { src, base, offset } => format!("str {}, {}, ${}", src, base, offset),
    }
}

fn format_operand(operand: Operand) -> String {
    match operand {
        Operand::Reg(r) => r.to_string(),
        Operand::Imm(v) => format!("${}", v),
    }
}
