//! The R824 assembler: rule-table driven translation of assembly text into
//! a binary image (§4.1–§4.5).
//!
//! The pipeline is a single forward pass over source lines (no classic
//! two-pass label resolution): labels bind to the current IP as they're
//! seen, forward references become [`fixup::Fixup`]s, and every fixup is
//! resolved in one sweep once the whole file has been walked (§4.5, §9).

pub mod error;
pub mod fixup;
pub mod loader;

use std::collections::HashMap;

use regex::Regex;

use crate::arch::{ArchSpec, BitComponent, Endian, Variable, compile::CompiledRule};

pub use error::{Error, Span};
pub use fixup::Fixup;
pub use loader::{ArchLoader, NullArchLoader};

/// One source line's emission record (§3): used by diagnostics and by
/// anything downstream that wants to map bytes back to source (a
/// disassembler, an IDE gutter).
#[derive(Debug, Clone)]
pub struct LineRecord {
    pub line_number: usize,
    pub offset: u32,
    pub bit_length: u32,
    pub hex: String,
}

/// The result of assembling a file: the emitted image plus every
/// diagnostic collected along the way (§7).
#[derive(Debug)]
pub struct Output {
    pub words: Vec<u32>,
    pub width: u32,
    /// Hard errors (§7). A non-empty list is what makes the CLI exit 2.
    pub errors: Vec<Error>,
    /// Soft diagnostics (§4.3–§4.5 explicitly call these "a warning"):
    /// unknown directives, a mis-sized bit emission, an unresolved symbol
    /// or overlapping fixup discovered only at the patch stage.
    pub warnings: Vec<Error>,
    pub aborted: bool,
    pub lines: Vec<LineRecord>,
    pub symbols: HashMap<String, i64>,
}

impl Output {
    /// Render the emitted words as a flat byte stream (§6): `width` bits
    /// per word, packed most-significant-byte-first for widths wider than
    /// a single byte. The shipped architecture always uses an 8-bit word,
    /// where this is just one byte per word.
    pub fn to_bytes(&self) -> Vec<u8> {
        let bytes_per_word = (self.width as usize).div_ceil(8).max(1);
        let mut out = Vec::with_capacity(self.words.len() * bytes_per_word);
        for &word in &self.words {
            for i in (0..bytes_per_word).rev() {
                out.push(((word >> (i * 8)) & 0xFF) as u8);
            }
        }
        out
    }
}

enum Operand {
    Known(u64),
    Symbol(String),
}

fn mask64(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Parse a numeric literal: `$hex`, `0x`-prefixed hex, or decimal (§6).
/// Returns `None` for anything else — the caller treats that as a label.
fn parse_integer(text: &str) -> Option<i64> {
    if let Some(rest) = text.strip_prefix('$') {
        i64::from_str_radix(rest, 16).ok()
    } else if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(rest, 16).ok()
    } else {
        text.parse::<i64>().ok()
    }
}

/// For a `little`-endian variable wider than one word, reorder its
/// word-width-sized bit groups (§4.4). A no-op for `big` endian or for a
/// variable that fits in a single word.
fn reorder_little_groups(value: u64, bits: u32, word_width: u32, endian: Endian) -> u64 {
    let value = value & mask64(bits);
    if endian != Endian::Little || bits <= word_width || word_width == 0 {
        return value;
    }
    let n_groups = bits.div_ceil(word_width);
    let mut out = 0u64;
    for g in 0..n_groups {
        let shift_in = word_width * (n_groups - 1 - g);
        let group = (value >> shift_in) & mask64(word_width);
        out |= group << (word_width * g);
    }
    out & mask64(bits)
}

pub struct Assembler {
    arch: ArchSpec,
    rules: Vec<CompiledRule>,
    width: u32,
    ip: u32,
    origin: u32,
    line_number: usize,
    code_len: u32,
    symbols: HashMap<String, i64>,
    errors: Vec<Error>,
    warnings: Vec<Error>,
    words: Vec<u32>,
    lines: Vec<LineRecord>,
    fixups: Vec<Fixup>,
    aborted: bool,
    label_re: Regex,
}

impl Assembler {
    pub fn new(arch: ArchSpec) -> Result<Assembler, Error> {
        let rules = arch.compile_rules()?;
        let width = arch.width;
        Ok(Assembler {
            arch,
            rules,
            width,
            ip: 0,
            origin: 0,
            line_number: 0,
            code_len: 0,
            symbols: HashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            words: Vec::new(),
            lines: Vec::new(),
            fixups: Vec::new(),
            aborted: false,
            label_re: Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.*)$")
                .expect("static label regex is valid"),
        })
    }

    fn push_error(&mut self, e: Error) {
        if e.is_fatal() {
            self.aborted = true;
        }
        self.errors.push(e);
    }

    fn push_warning(&mut self, e: Error) {
        self.warnings.push(e);
    }

    /// Process every line of `source` (§4.2). May be called more than once
    /// by `.include`/`.module`, sharing the same symbol table and IP.
    pub fn run(&mut self, source: &str, loader: &mut dyn ArchLoader) {
        for raw_line in source.lines() {
            if self.aborted {
                break;
            }
            self.process_line(raw_line, loader);
        }
    }

    fn process_line(&mut self, raw_line: &str, loader: &mut dyn ArchLoader) {
        self.line_number += 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            return;
        }
        if line.starts_with('.') {
            self.process_directive(line, loader);
            return;
        }

        let mut rest = line;
        while let Some(caps) = self.label_re.captures(rest) {
            let label = caps[1].to_lowercase();
            self.symbols.insert(label, self.ip as i64);
            let remainder_start = caps.get(2).unwrap().start();
            rest = rest[remainder_start..].trim_start();
        }
        let rest = rest.trim();
        if rest.is_empty() {
            return;
        }
        let lowered = rest.to_lowercase();
        self.assemble_instruction(&lowered, rest);
    }

    fn assemble_instruction(&mut self, lowered: &str, original: &str) {
        let mut last_err: Option<Error> = None;
        for i in 0..self.rules.len() {
            let rule = self.rules[i].clone();
            if !rule.regex.is_match(lowered) {
                continue;
            }
            match self.try_emit_rule(&rule, lowered, original) {
                Ok((words, total_len)) => {
                    self.commit_words(words, total_len);
                    return;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let err = last_err.unwrap_or_else(|| Error::NoRuleMatched {
            line: self.line_number,
            text: original.to_string(),
        });
        self.push_error(err);
    }

    fn commit_words(&mut self, words: Vec<u32>, bit_length: u32) {
        let offset = self.ip;
        let hex_digits = (self.width as usize).div_ceil(4).max(1);
        let hex = words
            .iter()
            .map(|w| format!("{:0width$X}", w, width = hex_digits))
            .collect::<Vec<_>>()
            .join(" ");
        self.lines.push(LineRecord {
            line_number: self.line_number,
            offset,
            bit_length,
            hex,
        });
        self.ip = self.ip.wrapping_add(words.len() as u32);
        self.words.extend(words);
    }

    fn try_emit_rule(&mut self, rule: &CompiledRule, lowered: &str, original: &str) -> Result<(Vec<u32>, u32), Error> {
        let caps = rule
            .regex
            .captures(lowered)
            .expect("regex already matched in assemble_instruction");

        let instr_offset = self.ip;
        let mut opcode: u64 = 0;
        let mut total_len: u32 = 0;
        let mut pending_fixups: Vec<Fixup> = Vec::new();

        for component in &rule.bits {
            match component {
                BitComponent::Literal(bits_str) => {
                    let len = bits_str.len() as u32;
                    let val = u64::from_str_radix(bits_str, 2).map_err(|_| Error::RuleEmission {
                        line: self.line_number,
                        text: original.to_string(),
                        span: None,
                        message: format!("rule \"{}\" has an invalid literal bit pattern \"{bits_str}\"", rule.fmt),
                    })?;
                    opcode = (opcode << len) | val;
                    total_len += len;
                }
                BitComponent::Full(idx) => {
                    let variable = self.variable_for(rule, *idx).clone();
                    let resolved = self.resolve_component(&variable, *idx, &caps, original)?;
                    match resolved {
                        Operand::Known(value) => {
                            opcode = (opcode << variable.bits) | (value & mask64(variable.bits));
                        }
                        Operand::Symbol(symbol) => {
                            pending_fixups.push(Fixup {
                                symbol,
                                offset: instr_offset,
                                ip_base: 0,
                                var_bits: variable.bits,
                                src_shift: 0,
                                dst_offset: total_len,
                                dst_len: variable.bits,
                                line: self.line_number,
                                ip_relative: variable.iprel,
                                ip_offset: variable.ipofs,
                                ip_mul: variable.ipmul,
                                endian: variable.endian,
                            });
                            opcode <<= variable.bits;
                        }
                    }
                    total_len += variable.bits;
                }
                BitComponent::Slice { a, b, n } => {
                    let variable = self.variable_for(rule, *a).clone();
                    let resolved = self.resolve_component(&variable, *a, &caps, original)?;
                    match resolved {
                        Operand::Known(value) => {
                            let sliced = (value >> b) & mask64(*n);
                            opcode = (opcode << n) | sliced;
                        }
                        Operand::Symbol(symbol) => {
                            pending_fixups.push(Fixup {
                                symbol,
                                offset: instr_offset,
                                ip_base: 0,
                                var_bits: variable.bits,
                                src_shift: *b,
                                dst_offset: total_len,
                                dst_len: *n,
                                line: self.line_number,
                                ip_relative: variable.iprel,
                                ip_offset: variable.ipofs,
                                ip_mul: variable.ipmul,
                                endian: variable.endian,
                            });
                            opcode <<= n;
                        }
                    }
                    total_len += n;
                }
            }
        }

        if total_len == 0 || total_len > 32 || total_len % self.width != 0 {
            self.push_warning(Error::RuleEmission {
                line: self.line_number,
                text: original.to_string(),
                span: None,
                message: format!(
                    "rule \"{}\" emitted {total_len} bits, expected a positive multiple of the {}-bit word no greater than 32",
                    rule.fmt, self.width
                ),
            });
        }

        let n_words = if self.width == 0 { 0 } else { total_len.div_ceil(self.width) };
        let mut words = Vec::with_capacity(n_words as usize);
        for w in 0..n_words {
            let shift = self.width * (n_words - 1 - w);
            words.push(((opcode >> shift) & mask64(self.width)) as u32);
        }

        let next_ip = instr_offset.wrapping_add(n_words);
        for fixup in &mut pending_fixups {
            fixup.ip_base = next_ip;
        }
        self.fixups.extend(pending_fixups);
        Ok((words, total_len))
    }

    fn variable_for<'a>(&'a self, rule: &CompiledRule, var_index: usize) -> &'a Variable {
        let name = &rule.var_order[var_index];
        self.arch
            .vars
            .get(name)
            .expect("compiled rule only references variables that exist")
    }

    /// Resolve one captured operand against `variable`: either a known
    /// value (enumeration index, or a parsed/endian-reordered literal) or a
    /// symbol name to fix up later (§4.4).
    fn resolve_component(
        &mut self,
        variable: &Variable,
        var_index: usize,
        caps: &regex::Captures<'_>,
        original: &str,
    ) -> Result<Operand, Error> {
        let mat = caps
            .get(var_index + 1)
            .expect("capture exists for every referenced variable");
        let text = mat.as_str();
        let span = Span::new(mat.start(), mat.end());

        if variable.is_enum() {
            let toks = variable.toks.as_ref().expect("is_enum implies toks is Some");
            return match toks.iter().position(|t| t.eq_ignore_ascii_case(text)) {
                Some(idx) => Ok(Operand::Known(idx as u64)),
                None => Err(Error::RuleEmission {
                    line: self.line_number,
                    text: original.to_string(),
                    span: Some(span),
                    message: format!("unknown enumeration token \"{text}\""),
                }),
            };
        }

        match parse_integer(text) {
            Some(value) => {
                if variable.bits < 64 {
                    let bits = variable.bits.min(63);
                    let fits = if value >= 0 {
                        (value as u64) < (1u64 << bits)
                    } else {
                        value >= -(1i64 << bits.saturating_sub(1))
                    };
                    if !fits {
                        return Err(Error::RuleEmission {
                            line: self.line_number,
                            text: original.to_string(),
                            span: Some(span),
                            message: format!("value {value} does not fit in {} bits", variable.bits),
                        });
                    }
                }
                let reordered = reorder_little_groups(value as u64, variable.bits, self.width, variable.endian);
                Ok(Operand::Known(reordered))
            }
            None => Ok(Operand::Symbol(text.to_lowercase())),
        }
    }

    fn process_directive(&mut self, line: &str, loader: &mut dyn ArchLoader) {
        let mut parts = line.splitn(2, char::is_whitespace);
        let directive = parts.next().unwrap_or("").to_lowercase();
        let rest = parts.next().unwrap_or("").trim();

        match directive.as_str() {
            ".define" => self.directive_define(rest),
            ".org" => self.directive_org(rest),
            ".len" => self.directive_len(rest),
            ".width" => self.directive_width(rest),
            ".arch" => self.directive_arch(rest, loader),
            ".include" | ".module" => self.directive_include(rest, loader),
            ".data" => self.directive_data(rest),
            ".string" => self.directive_string(rest),
            ".align" => self.directive_align(rest),
            _ => self.push_warning(Error::UnknownDirective {
                line: self.line_number,
                directive: directive.clone(),
            }),
        }
    }

    fn directive_syntax_error(&self, text: &str, message: impl Into<String>) -> Error {
        Error::DirectiveSyntax {
            line: self.line_number,
            text: text.to_string(),
            message: message.into(),
        }
    }

    fn directive_define(&mut self, rest: &str) {
        let mut tokens = rest.split_whitespace();
        let (Some(name), Some(value_text)) = (tokens.next(), tokens.next()) else {
            let err = self.directive_syntax_error(rest, "`.define` needs a NAME and a VALUE");
            self.push_error(err);
            return;
        };
        match parse_integer(value_text) {
            Some(value) => {
                self.symbols.insert(name.to_lowercase(), value);
            }
            None => {
                let err = self.directive_syntax_error(rest, format!("`.define` value \"{value_text}\" is not an integer"));
                self.push_error(err);
            }
        }
    }

    fn directive_org(&mut self, rest: &str) {
        match parse_integer(rest) {
            Some(value) => {
                self.ip = value as u32;
                self.origin = value as u32;
            }
            None => {
                let err = self.directive_syntax_error(rest, "`.org` needs an integer address");
                self.push_error(err);
            }
        }
    }

    fn directive_len(&mut self, rest: &str) {
        match parse_integer(rest) {
            Some(value) => self.code_len = value as u32,
            None => {
                let err = self.directive_syntax_error(rest, "`.len` needs an integer word count");
                self.push_error(err);
            }
        }
    }

    fn directive_width(&mut self, rest: &str) {
        match parse_integer(rest) {
            Some(value) => self.width = value as u32,
            None => {
                let err = self.directive_syntax_error(rest, "`.width` needs an integer bit count");
                self.push_error(err);
            }
        }
    }

    fn directive_arch(&mut self, rest: &str, loader: &mut dyn ArchLoader) {
        let name = rest.trim();
        match loader.load_arch(name) {
            Ok(arch) => match arch.compile_rules() {
                Ok(rules) => {
                    self.width = arch.width;
                    self.arch = arch;
                    self.rules = rules;
                }
                Err(config_err) => self.push_error(Error::from(config_err)),
            },
            Err(source) => self.push_error(Error::ArchLoad {
                name: name.to_string(),
                line: self.line_number,
                source,
            }),
        }
    }

    fn directive_include(&mut self, rest: &str, loader: &mut dyn ArchLoader) {
        let name = rest.trim();
        match loader.load_module(name) {
            Ok(source) => self.run(&source, loader),
            Err(source) => self.push_error(Error::ModuleLoad {
                name: name.to_string(),
                line: self.line_number,
                source,
            }),
        }
    }

    fn directive_data(&mut self, rest: &str) {
        for token in rest.split_whitespace() {
            let word = match parse_integer(token) {
                Some(value) => (value as u64 & mask64(self.width)) as u32,
                None => {
                    self.fixups.push(Fixup {
                        symbol: token.to_lowercase(),
                        offset: self.ip,
                        ip_base: 0,
                        var_bits: self.width,
                        src_shift: 0,
                        dst_offset: 0,
                        dst_len: self.width,
                        line: self.line_number,
                        ip_relative: false,
                        ip_offset: 0,
                        ip_mul: 1,
                        endian: Endian::Big,
                    });
                    0
                }
            };
            self.words.push(word);
            self.ip = self.ip.wrapping_add(1);
        }
    }

    fn directive_string(&mut self, rest: &str) {
        for ch in rest.chars() {
            self.words.push((ch as u32) & (mask64(self.width) as u32));
            self.ip = self.ip.wrapping_add(1);
        }
    }

    fn directive_align(&mut self, rest: &str) {
        let Some(modulus) = parse_integer(rest) else {
            let err = self.directive_syntax_error(rest, "`.align` needs an integer modulus");
            self.push_error(err);
            return;
        };
        if modulus < 1 || modulus as u32 > self.code_len {
            self.push_warning(Error::InvalidAlign {
                line: self.line_number,
                modulus,
                code_len: self.code_len,
            });
            return;
        }
        let k = modulus as u32;
        let remainder = self.ip % k;
        if remainder != 0 {
            let pad = k - remainder;
            for _ in 0..pad {
                self.words.push(0);
            }
            self.ip = self.ip.wrapping_add(pad);
        }
    }

    /// Resolve fixups, zero-pad to the declared length, and hand back the
    /// finished image plus diagnostics (§4.5, §7).
    pub fn finish(mut self) -> Output {
        let mut words = self.words;
        fixup::apply_fixups(
            &self.fixups,
            &mut words,
            self.width.max(1),
            self.origin,
            &self.symbols,
            &mut self.warnings,
        );

        let final_len = words.len().max(self.code_len as usize);
        words.resize(final_len, 0);

        Output {
            words,
            width: self.width,
            errors: self.errors,
            warnings: self.warnings,
            aborted: self.aborted,
            lines: self.lines,
            symbols: self.symbols,
        }
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Assemble `source` against `arch`, reporting `.arch`/`.include`/`.module`
/// through `loader`. Always returns an [`Output`] — even a fatal
/// configuration error still runs the fixup/serialization stages so the
/// CLI has something to report (§7).
pub fn assemble(source: &str, arch: ArchSpec, loader: &mut dyn ArchLoader) -> Output {
    match Assembler::new(arch) {
        Ok(mut asm) => {
            asm.run(source, loader);
            asm.finish()
        }
        Err(e) => Output {
            words: Vec::new(),
            width: crate::arch::DEFAULT_WIDTH,
            errors: vec![e],
            warnings: Vec::new(),
            aborted: true,
            lines: Vec::new(),
            symbols: HashMap::new(),
        },
    }
}

/// Convenience entry point for the default built-in architecture with no
/// `.arch`/`.include` support (§6): what the CLI uses unless `--arch` is
/// given.
pub fn assemble_default(source: &str) -> Output {
    assemble(source, crate::arch::default::default_arch(), &mut NullArchLoader)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble_src(source: &str) -> Output {
        assemble_default(source)
    }

    #[test]
    fn blank_and_comment_only_lines_emit_nothing() {
        let out = assemble_src("; just a comment\n\n   \n");
        assert!(out.words.is_empty());
        assert!(out.errors.is_empty());
    }

    #[test]
    fn data_directive_emits_literal_bytes() {
        let out = assemble_src(".org 0\n.data $01 $02 $03\n");
        assert_eq!(out.to_bytes(), vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn output_length_is_max_of_emitted_and_declared_len() {
        let out = assemble_src(".org 0\n.len 8\n.data $01 $02\n");
        assert_eq!(out.words.len(), 8);
    }

    #[test]
    fn forward_label_reference_resolves_after_finalize() {
        let out = assemble_src("start:\nj start\n");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        // j opcode followed by a one-byte offset of -2 (back to the start
        // of this same instruction), sign-extended into 0xFE.
        assert_eq!(out.words.len(), 2);
        assert_eq!(out.words[1], 0xFE);
    }

    #[test]
    fn unmatched_line_is_reported_as_an_error() {
        let out = assemble_src("not_a_real_mnemonic\n");
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.errors[0], Error::NoRuleMatched { .. }));
    }

    #[test]
    fn unknown_directive_is_a_warning_not_an_error() {
        let out = assemble_src(".bogus 1\n");
        assert!(out.errors.is_empty());
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn align_pads_up_to_the_next_multiple() {
        let out = assemble_src(".org 0\n.len 16\nhlt\n.align 4\nhlt\n");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.words.len(), 16);
        assert_eq!(out.words[0], 0x92); // hlt
        assert_eq!(out.words[1], 0x00); // padding up to the next multiple of 4
        assert_eq!(out.words[2], 0x00);
        assert_eq!(out.words[3], 0x00);
        assert_eq!(out.words[4], 0x92); // second hlt, now aligned
    }

    #[test]
    fn reassembling_resolved_program_is_idempotent() {
        let src = "start:\nnop\nj start\n";
        let a = assemble_src(src).words;
        let b = assemble_src(src).words;
        assert_eq!(a, b);
    }
}
