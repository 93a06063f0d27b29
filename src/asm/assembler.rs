//! Two-pass assembler for X16 programs.
//!
//! Syntax:
//! ```text
//! # Comment
//! loop:                   # Define a label
//!     add %r1, %r1, $-1   # Immediate operands start with $
//!     and %r2, %r2, %r3   # Register operands are %r0-%r7
//!     brp loop            # PC-relative operands take a label or $offset
//!     ldr %r0, %r6, $2    # Base + offset
//!     puts                # Trap aliases: getc putc puts enter putsp halt
//!     halt
//! msg: val $72            # Raw data word
//! ```
//!
//! Every statement assembles to exactly one word. The program is placed at
//! [`DEFAULT_ORIGIN`] unless another origin is given.

use crate::asm::image::Image;
use crate::cpu::decode::{encode, Instruction, Operand};
use crate::cpu::registers::Reg;
use crate::cpu::trap::{TRAP_GETC, TRAP_HALT, TRAP_IN, TRAP_OUT, TRAP_PUTS, TRAP_PUTSP};
use std::collections::HashMap;
use thiserror::Error;

/// Load address used when the source does not say otherwise.
pub const DEFAULT_ORIGIN: u16 = 0x3000;

/// Assemble source code at [`DEFAULT_ORIGIN`].
pub fn assemble(source: &str) -> Result<Image, AssemblerError> {
    assemble_at(source, DEFAULT_ORIGIN)
}

/// Assemble source code at the given origin.
pub fn assemble_at(source: &str, origin: u16) -> Result<Image, AssemblerError> {
    let mut asm = Assembler::new(origin);
    asm.collect(source)?;
    let words = asm.encode_all()?;
    tracing::debug!(
        origin = format!("x{:04X}", origin),
        words = words.len(),
        labels = asm.symbols.len(),
        "assembled program"
    );
    Ok(Image::new(origin, words))
}

/// The assembler state.
struct Assembler {
    /// Load address of the first statement.
    origin: u16,
    /// Symbol table (label -> address).
    symbols: HashMap<String, u16>,
    /// Statements in address order, with their source line numbers.
    statements: Vec<(usize, String)>,
}

impl Assembler {
    fn new(origin: u16) -> Self {
        Self {
            origin,
            symbols: HashMap::new(),
            statements: Vec::new(),
        }
    }

    /// Pass 1: strip comments, record labels, queue statements.
    fn collect(&mut self, source: &str) -> Result<(), AssemblerError> {
        for (line_num, line) in source.lines().enumerate() {
            let line_num = line_num + 1;
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            let mut line = line.trim();

            if let Some(colon_idx) = line.find(':') {
                let label = line[..colon_idx].trim();
                self.define_label(label, line_num)?;
                line = line[colon_idx + 1..].trim();
            }

            if !line.is_empty() {
                self.statements.push((line_num, line.to_string()));
            }
        }

        let available = 0x1_0000 - usize::from(self.origin);
        if self.statements.len() > available {
            return Err(AssemblerError::ProgramTooLarge {
                origin: self.origin,
                words: self.statements.len(),
            });
        }

        Ok(())
    }

    fn define_label(&mut self, label: &str, line_num: usize) -> Result<(), AssemblerError> {
        let valid = label
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("invalid label '{}'", label),
            });
        }

        let addr = self.origin.wrapping_add(self.statements.len() as u16);
        if self.symbols.insert(label.to_string(), addr).is_some() {
            return Err(AssemblerError::DuplicateLabel {
                line: line_num,
                label: label.to_string(),
            });
        }
        Ok(())
    }

    /// Pass 2: encode every statement now that all labels are known.
    fn encode_all(&self) -> Result<Vec<u16>, AssemblerError> {
        self.statements
            .iter()
            .enumerate()
            .map(|(i, (line_num, text))| {
                let addr = self.origin.wrapping_add(i as u16);
                Statement { asm: self, line: *line_num, addr }.encode(text)
            })
            .collect()
    }
}

/// One statement being encoded at a known address.
struct Statement<'a> {
    asm: &'a Assembler,
    line: usize,
    addr: u16,
}

impl Statement<'_> {
    fn encode(&self, text: &str) -> Result<u16, AssemblerError> {
        let (mnemonic, rest) = match text.find(char::is_whitespace) {
            Some(idx) => (&text[..idx], text[idx..].trim()),
            None => (text, ""),
        };
        let mnemonic = mnemonic.to_ascii_lowercase();
        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };

        // Data words are not instructions
        if mnemonic == "val" {
            let [value] = self.expect::<1>(&operands)?;
            let value = self.imm(value)?;
            if !(-0x8000..=0xFFFF).contains(&value) {
                return Err(self.out_of_range(value, 16));
            }
            return Ok(value as u16);
        }

        let instr = match mnemonic.as_str() {
            // Operate
            "add" | "and" => {
                let [dst, src1, src2] = self.expect::<3>(&operands)?;
                let (dst, src1) = (self.reg(dst)?, self.reg(src1)?);
                let src2 = if src2.starts_with('%') {
                    Operand::Reg(self.reg(src2)?)
                } else {
                    Operand::Imm(self.signed(self.imm(src2)?, 5)?)
                };
                if mnemonic == "add" {
                    Instruction::Add { dst, src1, src2 }
                } else {
                    Instruction::And { dst, src1, src2 }
                }
            }
            "not" => {
                let [dst, src] = self.expect::<2>(&operands)?;
                Instruction::Not { dst: self.reg(dst)?, src: self.reg(src)? }
            }

            // Control flow
            m if m.starts_with("br") && m[2..].chars().all(|c| matches!(c, 'n' | 'z' | 'p')) => {
                let [target] = self.expect::<1>(&operands)?;
                let flags = &m[2..];
                Instruction::Br {
                    n: flags.contains('n'),
                    z: flags.contains('z'),
                    p: flags.contains('p'),
                    offset: self.pc_offset(target, 9)?,
                }
            }
            "jmp" => {
                let [base] = self.expect::<1>(&operands)?;
                Instruction::Jmp { base: self.reg(base)? }
            }
            "ret" => {
                self.expect::<0>(&operands)?;
                Instruction::Jmp { base: Reg::R7 }
            }
            "jsr" => {
                let [target] = self.expect::<1>(&operands)?;
                Instruction::Jsr { offset: self.pc_offset(target, 11)? }
            }
            "jsrr" => {
                let [base] = self.expect::<1>(&operands)?;
                Instruction::Jsrr { base: self.reg(base)? }
            }

            // Data movement
            "ld" | "ldi" | "lea" => {
                let [dst, target] = self.expect::<2>(&operands)?;
                let dst = self.reg(dst)?;
                let offset = self.pc_offset(target, 9)?;
                match mnemonic.as_str() {
                    "ld" => Instruction::Ld { dst, offset },
                    "ldi" => Instruction::Ldi { dst, offset },
                    _ => Instruction::Lea { dst, offset },
                }
            }
            "st" | "sti" => {
                let [src, target] = self.expect::<2>(&operands)?;
                let src = self.reg(src)?;
                let offset = self.pc_offset(target, 9)?;
                if mnemonic == "st" {
                    Instruction::St { src, offset }
                } else {
                    Instruction::Sti { src, offset }
                }
            }
            "ldr" | "str" => {
                let [reg, base, offset] = self.expect::<3>(&operands)?;
                let (reg, base) = (self.reg(reg)?, self.reg(base)?);
                let offset = self.signed(self.imm(offset)?, 6)?;
                if mnemonic == "ldr" {
                    Instruction::Ldr { dst: reg, base, offset }
                } else {
                    Instruction::Str { src: reg, base, offset }
                }
            }

            // Traps
            "trap" => {
                let [vector] = self.expect::<1>(&operands)?;
                let vector = self.imm(vector)?;
                let vector = u8::try_from(vector).map_err(|_| self.out_of_range(vector, 8))?;
                Instruction::Trap { vector }
            }
            "getc" => self.trap(TRAP_GETC, &operands)?,
            "putc" | "out" => self.trap(TRAP_OUT, &operands)?,
            "puts" => self.trap(TRAP_PUTS, &operands)?,
            "enter" | "in" => self.trap(TRAP_IN, &operands)?,
            "putsp" => self.trap(TRAP_PUTSP, &operands)?,
            "halt" => self.trap(TRAP_HALT, &operands)?,

            _ => {
                return Err(AssemblerError::UnknownMnemonic {
                    line: self.line,
                    mnemonic: mnemonic.clone(),
                })
            }
        };

        Ok(encode(&instr))
    }

    fn trap(&self, vector: u8, operands: &[&str]) -> Result<Instruction, AssemblerError> {
        self.expect::<0>(operands)?;
        Ok(Instruction::Trap { vector })
    }

    fn expect<'s, const N: usize>(
        &self,
        operands: &[&'s str],
    ) -> Result<[&'s str; N], AssemblerError> {
        <[&str; N]>::try_from(operands).map_err(|_| self.syntax(format!(
            "expected {} operand(s), found {}",
            N,
            operands.len()
        )))
    }

    fn reg(&self, text: &str) -> Result<Reg, AssemblerError> {
        let lower = text.to_ascii_lowercase();
        match lower.strip_prefix("%r").and_then(|n| n.parse::<u8>().ok()) {
            Some(id) if id < 8 => Ok(Reg::new(id)),
            _ => Err(AssemblerError::InvalidRegister {
                line: self.line,
                text: text.to_string(),
            }),
        }
    }

    /// A `$`-prefixed immediate.
    fn imm(&self, text: &str) -> Result<i32, AssemblerError> {
        match text.strip_prefix('$') {
            Some(number) => self.number(number),
            None => Err(self.syntax(format!("immediate '{}' should start with '$'", text))),
        }
    }

    /// Decimal (`-12`) or hex (`x1F`, `0x1F`, `-x10`) literal.
    fn number(&self, text: &str) -> Result<i32, AssemblerError> {
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let hex = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .or_else(|| digits.strip_prefix('x'))
            .or_else(|| digits.strip_prefix('X'));

        // The digit parsers accept their own sign; only one is allowed
        if hex.unwrap_or(digits).starts_with(['-', '+']) {
            return Err(self.syntax(format!("invalid number '{}'", text)));
        }
        let parsed = match hex {
            Some(hex) => i32::from_str_radix(hex, 16),
            None => digits.parse::<i32>(),
        };

        let value = parsed.map_err(|_| self.syntax(format!("invalid number '{}'", text)))?;
        // Unsigned digits, so negation cannot overflow
        Ok(if negative { -value } else { value })
    }

    /// A PC-relative operand: either a label or an explicit `$offset`.
    fn pc_offset(&self, target: &str, width: u32) -> Result<i16, AssemblerError> {
        if target.starts_with('$') {
            return self.signed(self.imm(target)?, width);
        }

        let label_addr = self.asm.symbols.get(target).ok_or_else(|| AssemblerError::UndefinedLabel {
            line: self.line,
            label: target.to_string(),
        })?;
        // Relative to the incremented PC
        let offset = i32::from(*label_addr) - (i32::from(self.addr) + 1);
        self.signed(offset, width)
    }

    fn signed(&self, value: i32, width: u32) -> Result<i16, AssemblerError> {
        let min = -(1i32 << (width - 1));
        let max = (1i32 << (width - 1)) - 1;
        if (min..=max).contains(&value) {
            Ok(value as i16)
        } else {
            Err(self.out_of_range(value, width))
        }
    }

    fn syntax(&self, message: String) -> AssemblerError {
        AssemblerError::SyntaxError { line: self.line, message }
    }

    fn out_of_range(&self, value: i32, bits: u32) -> AssemblerError {
        AssemblerError::ValueOutOfRange { line: self.line, value, bits }
    }
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("invalid register on line {line}: {text}")]
    InvalidRegister { line: usize, text: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value} does not fit in {bits} bits")]
    ValueOutOfRange { line: usize, value: i32, bits: u32 },

    #[error("program of {words} words does not fit at origin x{origin:04X}")]
    ProgramTooLarge { origin: u16, words: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::decode;
    use crate::cpu::trap::Console;
    use crate::cpu::Cpu;

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            # Simple test program
            and %r0, %r0, $0
            add %r0, %r0, $5
            not %r1, %r0
            halt
        "#;

        let image = assemble(source).unwrap();
        assert_eq!(image.origin, DEFAULT_ORIGIN);
        assert_eq!(image.words, vec![0x5020, 0x1025, 0x923F, 0xF025]);
    }

    #[test]
    fn test_labels_resolve_relative_to_next_instruction() {
        let source = r#"
        start:
            brz end
            jsr start
        end: halt
        "#;

        let image = assemble(source).unwrap();
        assert_eq!(
            decode(image.words[0]).unwrap(),
            Instruction::Br { n: false, z: true, p: false, offset: 1 }
        );
        assert_eq!(decode(image.words[1]).unwrap(), Instruction::Jsr { offset: -2 });
    }

    #[test]
    fn test_assemble_data() {
        let source = r#"
            val $42
            val $-1
            val $x8000
        "#;

        let image = assemble(source).unwrap();
        assert_eq!(image.words, vec![42, 0xFFFF, 0x8000]);
    }

    #[test]
    fn test_explicit_offsets_and_base_forms() {
        let source = "ld %r2, $-4\nldr %r4, %r6, $-32\nstr %r1, %r2, $3\njsrr %r5\nret\ntrap $x21";
        let image = assemble_at(source, 0x4000).unwrap();

        assert_eq!(image.origin, 0x4000);
        assert_eq!(decode(image.words[0]).unwrap(), Instruction::Ld { dst: Reg::R2, offset: -4 });
        assert_eq!(image.words[1], 0x69A0);
        assert_eq!(
            decode(image.words[2]).unwrap(),
            Instruction::Str { src: Reg::R1, base: Reg::R2, offset: 3 }
        );
        assert_eq!(decode(image.words[3]).unwrap(), Instruction::Jsrr { base: Reg::R5 });
        assert_eq!(image.words[4], 0xC1C0);
        assert_eq!(image.words[5], 0xF021);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        assert_eq!(
            assemble("halt\nfrob %r1").unwrap_err(),
            AssemblerError::UnknownMnemonic { line: 2, mnemonic: "frob".into() }
        );
        assert_eq!(
            assemble("br nowhere").unwrap_err(),
            AssemblerError::UndefinedLabel { line: 1, label: "nowhere".into() }
        );
        assert_eq!(
            assemble("add %r1, %r1, $16").unwrap_err(),
            AssemblerError::ValueOutOfRange { line: 1, value: 16, bits: 5 }
        );
        assert_eq!(
            assemble("not %r8, %r1").unwrap_err(),
            AssemblerError::InvalidRegister { line: 1, text: "%r8".into() }
        );
        assert_eq!(
            assemble("a: halt\na: halt").unwrap_err(),
            AssemblerError::DuplicateLabel { line: 2, label: "a".into() }
        );
        assert!(matches!(
            assemble("add %r1, %r1, 5").unwrap_err(),
            AssemblerError::SyntaxError { line: 1, .. }
        ));
        assert!(matches!(
            assemble("halt %r0").unwrap_err(),
            AssemblerError::SyntaxError { line: 1, .. }
        ));
    }

    #[test]
    fn test_doubled_signs_are_rejected() {
        for source in ["val $--2147483648", "val $-x-80000000", "val $+5", "val $-+5"] {
            assert!(
                matches!(assemble(source), Err(AssemblerError::SyntaxError { line: 1, .. })),
                "{} should not assemble",
                source
            );
        }
    }

    #[test]
    fn test_base_offsets_need_one_dollar() {
        for source in ["str %r1, %r2, 3", "ldr %r1, %r2, $$3"] {
            assert!(matches!(
                assemble(source),
                Err(AssemblerError::SyntaxError { line: 1, .. })
            ));
        }
    }

    #[test]
    fn test_program_too_large() {
        let err = assemble_at("halt\nhalt", 0xFFFF).unwrap_err();
        assert_eq!(err, AssemblerError::ProgramTooLarge { origin: 0xFFFF, words: 2 });
    }

    #[test]
    fn test_assembled_program_runs() {
        let source = r#"
            lea %r0, msg
            puts
            ld %r1, count       # R1 = 3
        loop:
            lea %r0, star
            puts
            add %r1, %r1, $-1
            brp loop
            halt
        count: val $3
        msg:   val $x48         # 'H'
               val $x69         # 'i'
               val $0
        star:  val $x2A         # '*'
               val $0
        "#;

        let image = assemble(source).unwrap();
        let mut cpu = Cpu::new();
        cpu.load_image(&image).unwrap();
        let mut console = Console::new(&b""[..], Vec::new());

        cpu.run(&mut console).unwrap();

        assert!(cpu.is_halted());
        assert_eq!(console.output(), b"Hi***");
    }
}
