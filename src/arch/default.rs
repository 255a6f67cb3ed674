//! The built-in default R824 architecture description.
//!
//! This is the concrete opcode table the bundled [`crate::cpu::Cpu`]
//! decoder implements (§4.6/§4.7): every mnemonic below corresponds to one
//! of the opcode bytes `Cpu::execute` dispatches on. A host may still load a
//! different [`super::ArchSpec`] (e.g. to retarget the assembler at a
//! variant encoding); this is just the one the toolchain ships with so
//! `r824asm prog.asm prog.bin` works with no `--arch` flag.

use std::collections::HashMap;

use super::{ArchSpec, BitComponent, Endian, Rule, Variable};

/// Opcode bytes for the default architecture. Kept in one place so the
/// assembler's rule table and the interpreter's dispatch table can't drift
/// apart silently.
pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const DUP: u8 = 0x01;
    pub const SWAP: u8 = 0x02;
    pub const POP1: u8 = 0x03;
    pub const POP2: u8 = 0x04;

    pub const ADD: u8 = 0x10;
    pub const SUB: u8 = 0x11;
    pub const MUL: u8 = 0x12;
    pub const DIV: u8 = 0x13;
    pub const REM: u8 = 0x14;
    pub const AND: u8 = 0x15;
    pub const OR: u8 = 0x16;
    pub const XOR: u8 = 0x17;

    pub const INC: u8 = 0x18;
    pub const DEC: u8 = 0x19;
    pub const NEG: u8 = 0x1A;
    pub const INV: u8 = 0x1B;
    pub const I2B: u8 = 0x1C;

    pub const SLL1: u8 = 0x20;
    pub const SLL2: u8 = 0x21;
    pub const SLL3: u8 = 0x22;
    pub const SLL4: u8 = 0x23;
    pub const SRL1: u8 = 0x24;
    pub const SRL2: u8 = 0x25;
    pub const SRL3: u8 = 0x26;
    pub const SRL4: u8 = 0x27;
    pub const SRA1: u8 = 0x28;
    pub const SRA2: u8 = 0x29;
    pub const SRA3: u8 = 0x2A;
    pub const SRA4: u8 = 0x2B;
    pub const SLT: u8 = 0x2C;
    pub const SLTU: u8 = 0x2D;

    pub const LD: u8 = 0x30;
    pub const LB: u8 = 0x31;
    pub const LU: u8 = 0x32;
    pub const ST: u8 = 0x33;
    pub const SB: u8 = 0x34;
    pub const POP: u8 = 0x35;
    pub const PUSH: u8 = 0x36;

    pub const BEQ: u8 = 0x40;
    pub const BNE: u8 = 0x41;
    pub const BLT: u8 = 0x42;
    pub const BLTU: u8 = 0x43;
    pub const BGE: u8 = 0x44;
    pub const BGEU: u8 = 0x45;
    pub const J: u8 = 0x48;
    pub const JAL: u8 = 0x49;
    pub const JR: u8 = 0x4A;
    pub const JALR: u8 = 0x4B;

    pub const PUSHZ: u8 = 0x50;
    pub const PUSHO: u8 = 0x51;
    pub const LDI: u8 = 0x52;
    pub const LDIB: u8 = 0x53;
    pub const LDSB: u8 = 0x54;
    pub const AIIP: u8 = 0x55;

    /// `0x60 | k`: load workspace slot `k`.
    pub const WLD_BASE: u8 = 0x60;
    /// `0x70 | k`: store workspace slot `k`.
    pub const WST_BASE: u8 = 0x70;

    pub const EI: u8 = 0x80;
    pub const DI: u8 = 0x81;
    pub const SETI: u8 = 0x82;
    pub const CLRI: u8 = 0x83;
    pub const IRET: u8 = 0x84;

    pub const ECALL: u8 = 0x90;
    pub const EBREAK: u8 = 0x91;
    pub const HLT: u8 = 0x92;
}

fn bin8(byte: u8) -> BitComponent {
    BitComponent::Literal(format!("{byte:08b}"))
}

fn bin4(nibble: u8) -> String {
    format!("{:04b}", nibble & 0xF)
}

fn var(bits: u32) -> Variable {
    Variable {
        bits,
        toks: None,
        endian: Endian::Big,
        iprel: false,
        ipofs: 0,
        ipmul: 1,
    }
}

fn var_rel(bits: u32) -> Variable {
    Variable {
        bits,
        toks: None,
        endian: Endian::Big,
        iprel: true,
        ipofs: 0,
        ipmul: 1,
    }
}

fn nullary(mnemonic: &str, op: u8) -> Rule {
    Rule {
        fmt: mnemonic.to_string(),
        bits: vec![bin8(op)],
    }
}

fn unary_arg(mnemonic: &str, op: u8, arg_var: &str) -> Rule {
    Rule {
        fmt: format!("{mnemonic} ~{arg_var}"),
        bits: vec![bin8(op), BitComponent::Full(0)],
    }
}

/// The architecture description shipped with the crate, implementing the
/// full opcode set from §4.6/§4.7.
pub fn default_arch() -> ArchSpec {
    let mut vars = HashMap::new();
    vars.insert("imm8".to_string(), var(8));
    vars.insert("imm8rel".to_string(), var_rel(8));
    vars.insert("imm24".to_string(), var(24));
    vars.insert("imm24rel".to_string(), var_rel(24));
    vars.insert("wk".to_string(), var(4));

    let rules = vec![
        nullary("nop", opcode::NOP),
        nullary("dup", opcode::DUP),
        nullary("swap", opcode::SWAP),
        nullary("pop1", opcode::POP1),
        nullary("pop2", opcode::POP2),
        nullary("add", opcode::ADD),
        nullary("sub", opcode::SUB),
        nullary("mul", opcode::MUL),
        nullary("div", opcode::DIV),
        nullary("rem", opcode::REM),
        nullary("and", opcode::AND),
        nullary("or", opcode::OR),
        nullary("xor", opcode::XOR),
        nullary("inc", opcode::INC),
        nullary("dec", opcode::DEC),
        nullary("neg", opcode::NEG),
        nullary("inv", opcode::INV),
        nullary("i2b", opcode::I2B),
        nullary("sll1", opcode::SLL1),
        nullary("sll2", opcode::SLL2),
        nullary("sll3", opcode::SLL3),
        nullary("sll4", opcode::SLL4),
        nullary("srl1", opcode::SRL1),
        nullary("srl2", opcode::SRL2),
        nullary("srl3", opcode::SRL3),
        nullary("srl4", opcode::SRL4),
        nullary("sra1", opcode::SRA1),
        nullary("sra2", opcode::SRA2),
        nullary("sra3", opcode::SRA3),
        nullary("sra4", opcode::SRA4),
        nullary("slt", opcode::SLT),
        nullary("sltu", opcode::SLTU),
        nullary("ld", opcode::LD),
        nullary("lb", opcode::LB),
        nullary("lu", opcode::LU),
        nullary("st", opcode::ST),
        nullary("sb", opcode::SB),
        nullary("pop", opcode::POP),
        nullary("push", opcode::PUSH),
        unary_arg("beq", opcode::BEQ, "imm8rel"),
        unary_arg("bne", opcode::BNE, "imm8rel"),
        unary_arg("blt", opcode::BLT, "imm8rel"),
        unary_arg("bltu", opcode::BLTU, "imm8rel"),
        unary_arg("bge", opcode::BGE, "imm8rel"),
        unary_arg("bgeu", opcode::BGEU, "imm8rel"),
        unary_arg("j", opcode::J, "imm8rel"),
        unary_arg("jal", opcode::JAL, "imm8rel"),
        nullary("jr", opcode::JR),
        nullary("jalr", opcode::JALR),
        nullary("pushz", opcode::PUSHZ),
        nullary("pusho", opcode::PUSHO),
        unary_arg("ldi", opcode::LDI, "imm24"),
        unary_arg("ldib", opcode::LDIB, "imm8"),
        unary_arg("ldsb", opcode::LDSB, "imm8"),
        unary_arg("aiip", opcode::AIIP, "imm24rel"),
        nullary("ei", opcode::EI),
        nullary("di", opcode::DI),
        unary_arg("seti", opcode::SETI, "imm8"),
        unary_arg("clri", opcode::CLRI, "imm8"),
        nullary("iret", opcode::IRET),
        nullary("ecall", opcode::ECALL),
        nullary("ebreak", opcode::EBREAK),
        nullary("hlt", opcode::HLT),
        Rule {
            fmt: "wld ~wk".to_string(),
            bits: vec![
                BitComponent::Literal(bin4(opcode::WLD_BASE >> 4)),
                BitComponent::Full(0),
            ],
        },
        Rule {
            fmt: "wst ~wk".to_string(),
            bits: vec![
                BitComponent::Literal(bin4(opcode::WST_BASE >> 4)),
                BitComponent::Full(0),
            ],
        },
    ];

    ArchSpec {
        name: "r824".to_string(),
        width: super::DEFAULT_WIDTH,
        vars,
        rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_arch_compiles() {
        let arch = default_arch();
        let compiled = arch.compile_rules().expect("default arch must compile");
        assert_eq!(compiled.len(), arch.rules.len());
    }

    #[test]
    fn workspace_rules_embed_slot_index() {
        let arch = default_arch();
        let compiled = arch.compile_rules().unwrap();
        let wld = compiled.iter().find(|r| r.fmt == "wld ~wk").unwrap();
        assert!(wld.regex.is_match("wld 15"));
        assert!(!wld.regex.is_match("wld"));
    }
}
