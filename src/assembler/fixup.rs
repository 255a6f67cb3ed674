//! Deferred bit-patching, resolved once the whole file has been emitted
//! (§4.5).

use std::collections::HashMap;

use crate::arch::Endian;

use super::error::Error;

/// A deferred resolution against a symbol not yet known at emission time
/// (§3).
#[derive(Debug, Clone)]
pub struct Fixup {
    pub symbol: String,
    /// The instruction's starting address (its IP when the rule matched),
    /// in word units. Locates which output word this fixup patches.
    pub offset: u32,
    /// The address immediately after this instruction (`offset` plus its
    /// emitted word count) — what an IP-relative variable's displacement is
    /// measured from, matching [`crate::cpu::Cpu`]'s fetch-then-add decode
    /// order (§4.6).
    pub ip_base: u32,
    /// The referenced variable's total bit width.
    pub var_bits: u32,
    /// Bits to shift the resolved value right before masking — nonzero only
    /// for a `{a, b, n}` slice component.
    pub src_shift: u32,
    /// Bit offset, from the MSB of the rule's accumulated opcode, where
    /// this field's bits begin.
    pub dst_offset: u32,
    /// Width of the destination field (`n` for a slice, the variable's
    /// full width otherwise).
    pub dst_len: u32,
    pub line: usize,
    pub ip_relative: bool,
    pub ip_offset: i64,
    pub ip_mul: i64,
    pub endian: Endian,
}

fn mask64(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Resolve every fixup against `symbols`, XOR-ing the patched bits into
/// `words`. Pushes a non-fatal [`Error`] for an unresolved symbol or an
/// overlapping bit write; never stops early (§7: fixups still run to
/// produce diagnostics even after a fatal abort elsewhere).
pub fn apply_fixups(
    fixups: &[Fixup],
    words: &mut [u32],
    width: u32,
    origin: u32,
    symbols: &HashMap<String, i64>,
    errors: &mut Vec<Error>,
) {
    for fixup in fixups {
        let Some(&raw) = symbols.get(&fixup.symbol) else {
            errors.push(Error::UnresolvedSymbol {
                symbol: fixup.symbol.clone(),
                line: fixup.line,
            });
            continue;
        };

        let value: i64 = if fixup.ip_relative {
            (raw - fixup.ip_base as i64) * fixup.ip_mul - fixup.ip_offset
        } else {
            raw
        };

        let shifted = ((value as u64) >> fixup.src_shift) & mask64(fixup.dst_len);

        let start_word = fixup.offset as i64 + (fixup.dst_offset / width) as i64 - origin as i64;
        if start_word < 0 {
            continue;
        }
        let start_word = start_word as usize;

        if fixup.dst_len <= width {
            let bit_offset_in_word = fixup.dst_offset % width;
            let shift_in_word = width.saturating_sub(bit_offset_in_word + fixup.dst_len);
            let patch = ((shifted << shift_in_word) & mask64(width)) as u32;
            write_word(words, start_word, patch, fixup, errors);
        } else {
            let n_words = fixup.dst_len.div_ceil(width);
            let mut chunks = Vec::with_capacity(n_words as usize);
            for i in 0..n_words {
                let chunk = ((shifted >> (width * (n_words - 1 - i))) & mask64(width)) as u32;
                chunks.push(chunk);
            }
            if fixup.endian == Endian::Little {
                chunks.reverse();
            }
            for (i, chunk) in chunks.into_iter().enumerate() {
                write_word(words, start_word + i, chunk, fixup, errors);
            }
        }
    }
}

fn write_word(words: &mut [u32], index: usize, patch: u32, fixup: &Fixup, errors: &mut Vec<Error>) {
    let Some(word) = words.get_mut(index) else {
        return;
    };
    if *word & patch != 0 {
        errors.push(Error::OverlappingFixup {
            symbol: fixup.symbol.clone(),
            line: fixup.line,
            word_index: index,
        });
    }
    *word ^= patch;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_fixup_lands_at_the_right_offset() {
        let fixup = Fixup {
            symbol: "target".to_string(),
            offset: 0,
            ip_base: 0,
            var_bits: 8,
            src_shift: 0,
            dst_offset: 8,
            dst_len: 8,
            line: 1,
            ip_relative: false,
            ip_offset: 0,
            ip_mul: 1,
            endian: Endian::Big,
        };
        let mut words = vec![0u32, 0u32];
        let mut symbols = HashMap::new();
        symbols.insert("target".to_string(), 0xAB);
        let mut errors = Vec::new();
        apply_fixups(&[fixup], &mut words, 8, 0, &symbols, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(words, vec![0x00, 0xAB]);
    }

    #[test]
    fn ip_relative_fixup_computes_displacement() {
        let fixup = Fixup {
            symbol: "start".to_string(),
            offset: 10,
            ip_base: 12,
            var_bits: 8,
            src_shift: 0,
            dst_offset: 8,
            dst_len: 8,
            line: 1,
            ip_relative: true,
            ip_offset: 0,
            ip_mul: 1,
            endian: Endian::Big,
        };
        let mut words = vec![0u32, 0u32];
        let mut symbols = HashMap::new();
        symbols.insert("start".to_string(), 10);
        let mut errors = Vec::new();
        apply_fixups(&[fixup], &mut words, 8, 10, &symbols, &mut errors);
        // (10 - 12) * 1 - 0 == -2, masked to a byte == 0xFE
        assert_eq!(words[1], 0xFE);
    }

    #[test]
    fn unresolved_symbol_is_reported_not_panicked() {
        let fixup = Fixup {
            symbol: "missing".to_string(),
            offset: 0,
            ip_base: 0,
            var_bits: 8,
            src_shift: 0,
            dst_offset: 0,
            dst_len: 8,
            line: 3,
            ip_relative: false,
            ip_offset: 0,
            ip_mul: 1,
            endian: Endian::Big,
        };
        let mut words = vec![0u32];
        let mut errors = Vec::new();
        apply_fixups(&[fixup], &mut words, 8, 0, &HashMap::new(), &mut errors);
        assert!(matches!(errors[0], Error::UnresolvedSymbol { .. }));
    }

    #[test]
    fn little_endian_multiword_fixup_stores_lsb_first() {
        let fixup = Fixup {
            symbol: "target".to_string(),
            offset: 0,
            ip_base: 0,
            var_bits: 16,
            src_shift: 0,
            dst_offset: 0,
            dst_len: 16,
            line: 1,
            ip_relative: false,
            ip_offset: 0,
            ip_mul: 1,
            endian: Endian::Little,
        };
        let mut words = vec![0u32, 0u32];
        let mut symbols = HashMap::new();
        symbols.insert("target".to_string(), 0x1234);
        let mut errors = Vec::new();
        apply_fixups(&[fixup], &mut words, 8, 0, &symbols, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(words, vec![0x34, 0x12]);
    }

    #[test]
    fn overlapping_writes_are_flagged() {
        let fixup = |sym: &str| Fixup {
            symbol: sym.to_string(),
            offset: 0,
            ip_base: 0,
            var_bits: 8,
            src_shift: 0,
            dst_offset: 0,
            dst_len: 8,
            line: 1,
            ip_relative: false,
            ip_offset: 0,
            ip_mul: 1,
            endian: Endian::Big,
        };
        let mut words = vec![0u32];
        let mut symbols = HashMap::new();
        symbols.insert("a".to_string(), 0x0F);
        symbols.insert("b".to_string(), 0x01);
        let mut errors = Vec::new();
        apply_fixups(&[fixup("a"), fixup("b")], &mut words, 8, 0, &symbols, &mut errors);
        assert!(matches!(errors[0], Error::OverlappingFixup { .. }));
    }
}
