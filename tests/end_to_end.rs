//! End-to-end scenarios: source text in, machine state out, with no
//! shortcuts through either the assembler's or the interpreter's internals
//! (§8).

use std::collections::HashMap;

use pretty_assertions::assert_eq;
use r824::arch::{ArchSpec, BitComponent, Endian, Rule, Variable};
use r824::assembler::{self, NullArchLoader};
use r824::cpu::ecall::NullEnvIo;
use r824::cpu::interrupt::Cause;
use r824::cpu::{Cpu, TRAP_VECTOR};
use r824::memory::{MemoryMap, Ram, Region, Timer};

fn cpu_with_ram(image: &[u8], size: u32) -> Cpu {
    let mut map = MemoryMap::new();
    let mut ram = Ram::new(size);
    ram.load(image);
    map.map(Region::new(0, size), Box::new(ram)).unwrap();
    Cpu::new(map, Box::new(NullEnvIo))
}

/// Scenario 1: `.data` with no instructions at all is still a valid program.
#[test]
fn data_only_program_assembles_to_its_literal_bytes() {
    let output = assembler::assemble_default(".org 0\n.data $01 $02 $03\n");
    assert!(output.errors.is_empty());
    assert_eq!(output.to_bytes(), vec![0x01, 0x02, 0x03]);
}

/// Scenario 2: load two immediates, add them, store the result through the
/// stack-cache to a fixed address.
#[test]
fn arithmetic_result_is_stored_to_the_addressed_word() {
    let output = assembler::assemble_default("ldi 0x1000\nldi 5\nldi 7\nadd\nst\n");
    assert!(output.errors.is_empty(), "{:?}", output.errors);

    let mut cpu = cpu_with_ram(&output.to_bytes(), 0x2000);
    for _ in 0..5 {
        cpu.step().unwrap();
    }

    assert_eq!(cpu.memory.read(0x1000).unwrap(), 0x0C);
    assert_eq!(cpu.memory.read(0x1001).unwrap(), 0x00);
    assert_eq!(cpu.memory.read(0x1002).unwrap(), 0x00);
}

/// Scenario 3: a label referencing its own line assembles to a relative jump
/// that spins in place forever.
#[test]
fn self_referencing_jump_spins_in_place() {
    let output = assembler::assemble_default("start:\nj start\n");
    assert!(output.errors.is_empty(), "{:?}", output.errors);
    assert_eq!(output.to_bytes(), vec![0x48, 0xFE]);

    let mut cpu = cpu_with_ram(&output.to_bytes(), 0x100);
    for _ in 0..5 {
        cpu.step().unwrap();
        assert_eq!(cpu.ip, 0, "a `j start` on line 1 must always land back on itself");
    }
}

/// Scenario 4: arm the timer, enable and unmask its cause, then let enough
/// `nop`s retire for `mtime` to reach `mtimecmp` and trap to the fixed
/// vector.
///
/// The illustrative prose in the distilled spec writes the threshold to
/// timer offset 2, but offset 2 is `mtimecmp`'s *high* byte (§4.10); writing
/// there sets a threshold of `value << 16`, not `value`. Arming through
/// offset 0 (the low byte) is what actually produces a small, countable
/// threshold, so that's what this test (and any real guest wanting a short
/// timeout) does instead.
#[test]
fn enabled_timer_interrupt_traps_to_the_fixed_vector() {
    let output = assembler::assemble_default(
        "ei\nseti 2\nnop\nnop\nnop\nnop\nnop\nnop\nnop\nnop\nnop\nnop\n",
    );
    assert!(output.errors.is_empty(), "{:?}", output.errors);

    let mut map = MemoryMap::new();
    let mut ram = Ram::new(0x100);
    ram.load(&output.to_bytes());
    map.map(Region::new(0, 0x100), Box::new(ram)).unwrap();
    map.map(Region::new(0x1000, 8), Box::new(Timer::new())).unwrap();
    map.write(0x1000, 16).unwrap(); // arm mtimecmp = 16 via the low byte

    let mut cpu = Cpu::new(map, Box::new(NullEnvIo));
    let mut trapped = false;
    for _ in 0..11 {
        cpu.step().unwrap();
        if cpu.ip == TRAP_VECTOR {
            trapped = true;
            break;
        }
    }
    assert!(trapped, "timer interrupt never transferred control to the trap vector");
}

/// Scenario 5: `PUSH`/`POP` round-trip a value through the stack-pointer
/// workspace slot, sign-extending it back out.
#[test]
fn push_then_pop_round_trips_through_memory() {
    let output = assembler::assemble_default("ldi 0x20\nwst 15\nldi 0xabcdef\npush\npop\nhlt\n");
    assert!(output.errors.is_empty(), "{:?}", output.errors);

    let mut cpu = cpu_with_ram(&output.to_bytes(), 0x100);
    while !cpu.halted {
        cpu.step().unwrap();
    }

    assert_eq!(cpu.a as u32, 0xFFABCDEF);
}

/// Scenario 6: a forward-referenced label resolves after the whole file is
/// walked, and a `little`-endian multi-word variable stores its low byte
/// first — the opposite order from the shipped architecture's `big`-endian
/// fields.
#[test]
fn forward_label_resolves_little_endian_for_a_little_endian_variable() {
    let mut vars = HashMap::new();
    vars.insert(
        "addr16".to_string(),
        Variable {
            bits: 16,
            toks: None,
            endian: Endian::Little,
            iprel: false,
            ipofs: 0,
            ipmul: 1,
        },
    );
    let arch = ArchSpec {
        name: "test-little".to_string(),
        width: 8,
        vars,
        rules: vec![Rule {
            fmt: "ldw ~addr16".to_string(),
            bits: vec![BitComponent::Literal("00000000".to_string()), BitComponent::Full(0)],
        }],
    };

    let output = assembler::assemble(
        "ldw target\ntarget:\n.data $AB $CD\n",
        arch,
        &mut NullArchLoader,
    );
    assert!(output.errors.is_empty(), "{:?}", output.errors);

    // target == 3 (one 8-bit opcode word + two 8-bit address words), stored
    // low byte (0x03) before high byte (0x00).
    assert_eq!(output.words, vec![0x00, 0x03, 0x00, 0xAB, 0xCD]);
}

/// A sanity check that the Timer/Cause wiring used above actually matches
/// the priority table's bit layout, not a coincidence of the chosen mask.
#[test]
fn timer_cause_bit_is_what_seti_2_unmasks() {
    assert_eq!(Cause::Timer.bit(), 0b0000_0010);
}
