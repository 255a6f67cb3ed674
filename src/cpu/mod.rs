//! The R824 interpreter core: 24-bit stack-cache ALU, decode/execute loop,
//! interrupts, and the memory-mapped timer (§4.6, §4.8, §4.10).

pub mod ecall;
pub mod interrupt;

use crate::memory::{MemoryError, MemoryMap};
use ecall::EnvIo;
use interrupt::Cause;

use crate::arch::default::opcode;

/// Address mask applied to IPtr, workspace addresses, and memory addresses:
/// everything in R824 lives modulo 2^24.
pub const ADDR_MASK: u32 = 0x00FF_FFFF;

/// Fixed machine trap-vector base address (§4.8, §6).
pub const TRAP_VECTOR: u32 = 0x0000_02;

/// Number of general workspace slots; slot 15 is the stack pointer by
/// convention.
pub const N_WORKSPACE: usize = 16;
pub const SP_SLOT: usize = 15;

/// Workspace save-area slots used by interrupt entry/exit (§4.8).
const SAVE_C: usize = 11;
const SAVE_B: usize = 12;
const SAVE_A: usize = 13;
const SAVE_IP: usize = 14;

/// Interrupt-enable bits SETI/CLRI are allowed to touch (§4.6).
const MASKABLE_BITS: u8 = 0b0000_0111;
/// Bits that are hard-wired enabled and never touched by SETI/CLRI.
const ALWAYS_ENABLED_BITS: u8 = Cause::DivByZero.bit() | Cause::Syscall.bit();

/// Runtime failures that terminate the interpreter loop with no recovery
/// (§7).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("unknown opcode 0x{opcode:02X} at 0x{address:06X}")]
    UnknownOpcode { opcode: u8, address: u32 },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Sign-extend the low 24 bits of `value` to a full `i32`.
pub fn sext24(value: u32) -> i32 {
    let masked = value & ADDR_MASK;
    if masked & 0x0080_0000 != 0 {
        (masked | 0xFF00_0000) as i32
    } else {
        masked as i32
    }
}

/// Mask a signed value down to its low 24 bits, as an unsigned pattern.
pub fn mask24(value: i32) -> u32 {
    (value as u32) & ADDR_MASK
}

/// Sign-extend a single byte — used for the 8-bit relative branch/jump
/// offsets, which are one rule-table byte wide, not the CPU's 24-bit word.
fn sext8(byte: u8) -> i32 {
    byte as i8 as i32
}

/// Re-sign-extend a 32-bit value through the 24-bit domain — every
/// arithmetic result is masked then sign-extended on the way out (§3).
fn reduce(value: i32) -> i32 {
    sext24(mask24(value))
}

pub struct Cpu {
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub workspace: [i32; N_WORKSPACE],
    pub ip: u32,
    pub halted: bool,
    /// Global machine-interrupt-enable bit (MIE).
    pub mie_global: bool,
    /// Pending-interrupt mask (mip).
    pub pending: u8,
    /// Interrupt-enable mask (mie); bits 0..3 are SETI/CLRI-controllable,
    /// the divide-by-zero and system-call bits are hard-wired on.
    pub enabled: u8,
    servicing: Option<Cause>,
    pub memory: MemoryMap,
    pub env_io: Box<dyn EnvIo>,
    /// EBREAK / software-interrupt hook (§4.6, §4.8). Defaults to a no-op;
    /// a host (a debugger front-end, an IDE) installs its own via
    /// [`Cpu::set_breakpoint_hook`] to inspect or mutate state at a
    /// breakpoint without the core depending on any particular host.
    breakpoint_hook: Box<dyn FnMut(&mut Cpu)>,
    cycles: u64,
}

impl Cpu {
    pub fn new(memory: MemoryMap, env_io: Box<dyn EnvIo>) -> Cpu {
        Cpu {
            a: 0,
            b: 0,
            c: 0,
            workspace: [0; N_WORKSPACE],
            ip: 0,
            halted: false,
            mie_global: false,
            pending: 0,
            enabled: ALWAYS_ENABLED_BITS,
            servicing: None,
            memory,
            env_io,
            breakpoint_hook: Box::new(|_: &mut Cpu| {}),
            cycles: 0,
        }
    }

    /// Install the EBREAK / software-interrupt hook (§4.6, §4.8), replacing
    /// the default no-op.
    pub fn set_breakpoint_hook(&mut self, hook: Box<dyn FnMut(&mut Cpu)>) {
        self.breakpoint_hook = hook;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Raise an externally-sourced interrupt cause (timer tick, external
    /// device, a divide-by-zero trap). The next instruction boundary will
    /// observe it.
    pub fn raise(&mut self, cause: Cause) {
        self.pending |= cause.bit();
    }

    fn push(&mut self, value: i32) {
        self.c = self.b;
        self.b = self.a;
        self.a = value;
    }

    /// The discipline shared by ST/SB/PUSH/WST: consume A, shift B,C up.
    fn pop1(&mut self) {
        self.a = self.b;
        self.b = self.c;
    }

    fn fetch8(&mut self) -> Result<u8, RuntimeError> {
        let byte = self.memory.read(self.ip)?;
        self.ip = self.ip.wrapping_add(1) & ADDR_MASK;
        self.cycles += 1;
        Ok(byte)
    }

    fn fetch24(&mut self) -> Result<u32, RuntimeError> {
        let mut value = 0u32;
        for i in 0..3 {
            value |= (self.fetch8()? as u32) << (8 * i);
        }
        Ok(value)
    }

    fn load_le(&mut self, address: u32, n: u32) -> Result<u32, RuntimeError> {
        let value = self.memory.read_le(address & ADDR_MASK, n)?;
        self.cycles += n as u64;
        Ok(value)
    }

    fn store_le(&mut self, address: u32, value: u32, n: u32) -> Result<(), RuntimeError> {
        self.memory.write_le(address & ADDR_MASK, value, n)?;
        self.cycles += n as u64;
        Ok(())
    }

    /// Run one fetch-decode-execute cycle, then service a pending interrupt
    /// if one is enabled (§4.8), then advance the timer (§4.10). A halted
    /// CPU is a no-op that still costs nothing, per §5.
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        if self.halted {
            return Ok(());
        }
        let before = self.cycles;
        self.fetch_decode_execute()?;
        self.service_interrupt_if_pending()?;
        let elapsed = (self.cycles - before) as u32;
        if self.tick_timer(elapsed) {
            self.raise(Cause::Timer);
        }
        Ok(())
    }

    fn tick_timer(&mut self, cycles: u32) -> bool {
        // The timer device lives behind the memory map; find it by reading
        // through the well-known mapping rather than threading a second
        // handle through `Cpu`.
        self.memory.tick_timer(cycles)
    }

    fn fetch_decode_execute(&mut self) -> Result<(), RuntimeError> {
        let address = self.ip;
        let op = self.fetch8()?;
        self.cycles += 1; // decode
        self.execute(op, address)
    }

    fn execute(&mut self, op: u8, _fetch_address: u32) -> Result<(), RuntimeError> {
        match op {
            opcode::NOP => {}
            opcode::DUP => {
                self.c = self.b;
                self.b = self.a;
            }
            opcode::SWAP => std::mem::swap(&mut self.a, &mut self.b),
            opcode::POP1 => self.pop1(),
            opcode::POP2 => {
                self.a = self.b;
                self.b = self.c;
                self.a = self.b;
                self.b = self.c;
            }

            opcode::ADD => self.alu_binary(|b, a| b.wrapping_add(a)),
            opcode::SUB => self.alu_binary(|b, a| b.wrapping_sub(a)),
            opcode::MUL => self.alu_binary(|b, a| b.wrapping_mul(a)),
            opcode::DIV => self.alu_div_rem(op)?,
            opcode::REM => self.alu_div_rem(op)?,
            opcode::AND => self.alu_binary(|b, a| b & a),
            opcode::OR => self.alu_binary(|b, a| b | a),
            opcode::XOR => self.alu_binary(|b, a| b ^ a),

            opcode::INC => self.a = reduce(self.a.wrapping_add(1)),
            opcode::DEC => self.a = reduce(self.a.wrapping_sub(1)),
            opcode::NEG => self.a = reduce(self.a.wrapping_neg()),
            opcode::INV => self.a = reduce(!self.a),
            opcode::I2B => self.a = reduce(self.a & 0xFF),

            opcode::SLL1 => self.a = reduce(self.a.wrapping_shl(1)),
            opcode::SLL2 => self.a = reduce(self.a.wrapping_shl(2)),
            opcode::SLL3 => self.a = reduce(self.a.wrapping_shl(3)),
            opcode::SLL4 => self.a = reduce(self.a.wrapping_shl(4)),
            opcode::SRL1 => self.a = reduce(((mask24(self.a)) >> 1) as i32),
            opcode::SRL2 => self.a = reduce(((mask24(self.a)) >> 2) as i32),
            opcode::SRL3 => self.a = reduce(((mask24(self.a)) >> 3) as i32),
            opcode::SRL4 => self.a = reduce(((mask24(self.a)) >> 4) as i32),
            opcode::SRA1 => self.a = reduce(self.a.wrapping_shr(1)),
            opcode::SRA2 => self.a = reduce(self.a.wrapping_shr(2)),
            opcode::SRA3 => self.a = reduce(self.a.wrapping_shr(3)),
            opcode::SRA4 => self.a = reduce(self.a.wrapping_shr(4)),

            opcode::SLT => self.alu_binary(|b, a| if b < a { 1 } else { 0 }),
            opcode::SLTU => self.alu_binary(|b, a| {
                if mask24(b) < mask24(a) {
                    1
                } else {
                    0
                }
            }),

            opcode::LD => {
                let addr = mask24(self.a);
                self.c = self.b;
                self.b = self.a;
                let value = self.load_le(addr, 3)?;
                self.a = sext24(value);
            }
            opcode::LB => {
                let addr = mask24(self.a);
                self.c = self.b;
                self.b = self.a;
                let byte = self.load_le(addr, 1)? as u8;
                self.a = byte as i8 as i32;
            }
            opcode::LU => {
                let addr = mask24(self.a);
                self.c = self.b;
                self.b = self.a;
                let byte = self.load_le(addr, 1)? as u8;
                self.a = byte as i32;
            }
            opcode::ST => {
                let addr = mask24(self.b);
                let value = mask24(self.a);
                self.store_le(addr, value, 3)?;
                self.pop1();
            }
            opcode::SB => {
                let addr = mask24(self.b);
                let value = mask24(self.a) & 0xFF;
                self.store_le(addr, value, 1)?;
                self.pop1();
            }
            opcode::POP => {
                let sp = mask24(self.workspace[SP_SLOT]);
                let value = self.load_le(sp, 3)?;
                self.workspace[SP_SLOT] = sext24(sp.wrapping_add(3));
                self.push(sext24(value));
            }
            opcode::PUSH => {
                let sp = mask24(self.workspace[SP_SLOT]).wrapping_sub(3) & ADDR_MASK;
                self.workspace[SP_SLOT] = sext24(sp);
                self.store_le(sp, mask24(self.a), 3)?;
                self.pop1();
            }

            opcode::BEQ => self.branch(|b, a| b == a)?,
            opcode::BNE => self.branch(|b, a| b != a)?,
            opcode::BLT => self.branch(|b, a| b < a)?,
            opcode::BLTU => self.branch(|b, a| mask24(b) < mask24(a))?,
            opcode::BGE => self.branch(|b, a| b >= a)?,
            opcode::BGEU => self.branch(|b, a| mask24(b) >= mask24(a))?,

            opcode::J => {
                let offset = sext8(self.fetch8()?);
                self.ip = (self.ip as i64 + offset as i64) as u32 & ADDR_MASK;
            }
            opcode::JAL => {
                let offset = sext8(self.fetch8()?);
                let after = self.ip;
                self.ip = (self.ip as i64 + offset as i64) as u32 & ADDR_MASK;
                self.a = sext24(after);
            }
            opcode::JR => {
                let target = mask24(self.a);
                self.a = self.b;
                self.b = self.c;
                self.ip = target;
            }
            opcode::JALR => {
                let target = mask24(self.a);
                let saved_ip = self.ip;
                self.ip = target;
                self.a = sext24(saved_ip);
            }

            opcode::PUSHZ => self.push(0),
            opcode::PUSHO => self.push(1),
            opcode::LDI => {
                let imm = self.fetch24()?;
                self.push(sext24(imm));
            }
            opcode::LDIB => {
                let imm = self.fetch8()?;
                self.push(imm as i32);
            }
            opcode::LDSB => {
                let imm = self.fetch8()?;
                self.push(imm as i8 as i32);
            }
            opcode::AIIP => {
                let imm = self.fetch24()?;
                let value = (self.ip as i64 + sext24(imm) as i64) as u32 & ADDR_MASK;
                self.push(sext24(value));
            }

            opcode::EI => self.mie_global = true,
            opcode::DI => self.mie_global = false,
            opcode::SETI => {
                let mask = self.fetch8()?;
                self.enabled |= mask & MASKABLE_BITS;
            }
            opcode::CLRI => {
                let mask = self.fetch8()?;
                self.enabled &= !(mask & MASKABLE_BITS);
            }
            opcode::IRET => self.iret(),

            opcode::ECALL => self.ecall()?,
            opcode::EBREAK => self.raise(Cause::Software),
            opcode::HLT => self.halted = true,

            _ if (opcode::WLD_BASE..=opcode::WLD_BASE | 0x0F).contains(&op) => {
                let k = (op & 0x0F) as usize;
                self.c = self.b;
                self.b = self.a;
                self.a = self.workspace[k];
            }
            _ if (opcode::WST_BASE..=opcode::WST_BASE | 0x0F).contains(&op) => {
                let k = (op & 0x0F) as usize;
                self.workspace[k] = self.a;
                self.pop1();
            }

            _ => {
                // Unassigned slot: a no-op that charges only fetch+decode
                // cycles (§1, §9) — not an UnknownOpcode fault. Every byte
                // in the default architecture's 8-bit space is dispatched
                // here rather than erroring.
            }
        }
        Ok(())
    }

    fn alu_binary(&mut self, op: impl Fn(i32, i32) -> i32) {
        let result = op(self.b, self.a);
        self.a = reduce(result);
        self.b = self.c;
    }

    fn alu_div_rem(&mut self, op: u8) -> Result<(), RuntimeError> {
        if self.a == 0 {
            self.raise(Cause::DivByZero);
            self.b = self.c;
            return Ok(());
        }
        let result = if op == opcode::DIV {
            self.b.wrapping_div(self.a)
        } else {
            self.b.wrapping_rem(self.a)
        };
        self.a = reduce(result);
        self.b = self.c;
        Ok(())
    }

    /// Post-branch register shift shared by every conditional branch: both
    /// A and B are set to the pre-branch C, whether or not the branch was
    /// taken. See DESIGN.md for why this (rather than a single-register
    /// shift) is how the two textually-distinct descriptions of this shift
    /// are reconciled.
    fn branch(&mut self, predicate: impl Fn(i32, i32) -> bool) -> Result<(), RuntimeError> {
        let offset = sext8(self.fetch8()?);
        let taken = predicate(self.b, self.a);
        if taken {
            self.ip = (self.ip as i64 + offset as i64) as u32 & ADDR_MASK;
        }
        let old_c = self.c;
        self.a = old_c;
        self.b = old_c;
        Ok(())
    }

    fn service_interrupt_if_pending(&mut self) -> Result<(), RuntimeError> {
        if !self.mie_global {
            return Ok(());
        }
        let active = self.pending & self.enabled;
        if active == 0 {
            return Ok(());
        }
        let Some(cause) = Cause::PRIORITY.iter().copied().find(|c| active & c.bit() != 0) else {
            return Ok(());
        };

        self.mie_global = false;
        self.servicing = Some(cause);

        if cause == Cause::Software {
            self.invoke_breakpoint_hook();
            return Ok(());
        }

        self.workspace[SAVE_C] = self.c;
        self.workspace[SAVE_B] = self.b;
        self.workspace[SAVE_A] = self.a;
        self.workspace[SAVE_IP] = sext24(self.ip);

        if cause == Cause::Syscall {
            self.ecall()?;
        }

        self.ip = TRAP_VECTOR;
        Ok(())
    }

    /// Run the breakpoint hook with the hook itself temporarily taken out of
    /// `self`, so a hook that reads or mutates CPU state doesn't need `Cpu`
    /// to hand out two overlapping `&mut` borrows of itself.
    fn invoke_breakpoint_hook(&mut self) {
        let mut hook = std::mem::replace(&mut self.breakpoint_hook, Box::new(|_: &mut Cpu| {}));
        hook(self);
        self.breakpoint_hook = hook;
    }

    fn iret(&mut self) {
        if let Some(cause) = self.servicing.take() {
            self.pending &= !cause.bit();
            if cause != Cause::Software {
                self.c = self.workspace[SAVE_C];
                self.b = self.workspace[SAVE_B];
                self.a = self.workspace[SAVE_A];
                self.ip = mask24(self.workspace[SAVE_IP]);
            }
        }
        self.mie_global = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::ecall::NullEnvIo;
    use crate::memory::{MemoryMap, Ram, Region};

    fn cpu_with_ram(size: u32) -> Cpu {
        let mut map = MemoryMap::new();
        map.map(Region::new(0, size), Box::new(Ram::new(size))).unwrap();
        Cpu::new(map, Box::new(NullEnvIo))
    }

    #[test]
    fn add_computes_b_plus_a_and_shifts() {
        let mut cpu = cpu_with_ram(16);
        cpu.a = 7;
        cpu.b = 5;
        cpu.c = 99;
        cpu.execute(opcode::ADD, 0).unwrap();
        assert_eq!(cpu.a, 12);
        assert_eq!(cpu.b, 99);
    }

    #[test]
    fn arithmetic_wraps_and_sign_extends_at_24_bits() {
        let mut cpu = cpu_with_ram(16);
        cpu.a = 1;
        cpu.b = 0x7FFFFF; // max positive 24-bit value
        cpu.execute(opcode::ADD, 0).unwrap();
        assert_eq!(cpu.a, -0x800000); // wraps into the negative range, sign-extended
    }

    #[test]
    fn push_then_pop_round_trips_sign_extended_value() {
        let mut cpu = cpu_with_ram(64);
        cpu.workspace[SP_SLOT] = 32;
        cpu.a = sext24(0x00ABCDEF);
        cpu.execute(opcode::PUSH, 0).unwrap();
        cpu.execute(opcode::POP, 0).unwrap();
        assert_eq!(cpu.a, 0xFFABCDEFu32 as i32);
    }

    #[test]
    fn st_writes_a_to_address_in_b_little_endian() {
        let mut cpu = cpu_with_ram(0x2000);
        cpu.a = 0x0C;
        cpu.b = 0x1000;
        cpu.execute(opcode::ST, 0).unwrap();
        assert_eq!(cpu.memory.read(0x1000).unwrap(), 0x0C);
        assert_eq!(cpu.memory.read(0x1001).unwrap(), 0x00);
        assert_eq!(cpu.memory.read(0x1002).unwrap(), 0x00);
    }

    #[test]
    fn divide_by_zero_raises_pending_cause_instead_of_panicking() {
        let mut cpu = cpu_with_ram(16);
        cpu.a = 0;
        cpu.b = 5;
        cpu.execute(opcode::DIV, 0).unwrap();
        assert_eq!(cpu.pending & Cause::DivByZero.bit(), Cause::DivByZero.bit());
    }

    #[test]
    fn j_oscillates_between_two_addresses() {
        let mut cpu = cpu_with_ram(16);
        // `j start` assembled at address 0: opcode J, then operand -1
        // (offset back to the opcode byte itself, i.e. 0 - 2 relative to
        // the post-operand IP).
        cpu.memory.write(0, opcode::J).unwrap();
        cpu.memory.write(1, 0xFE).unwrap(); // sext8(0xFE) == -2
        cpu.step().unwrap();
        assert_eq!(cpu.ip, 0);
    }

    #[test]
    fn blt_takes_a_backward_branch_on_signed_operand() {
        let mut cpu = cpu_with_ram(16);
        // `blt` at address 0: opcode, then operand 0xFE (sext8 == -2), so a
        // taken branch lands back on the opcode byte itself.
        cpu.memory.write(0, opcode::BLT).unwrap();
        cpu.memory.write(1, 0xFE).unwrap();
        cpu.b = -1;
        cpu.a = 0; // b < a, so the branch is taken
        cpu.step().unwrap();
        assert_eq!(cpu.ip, 0, "a backward conditional branch must decrease ip, not jump forward");
    }

    #[test]
    fn bge_not_taken_still_shifts_a_and_b_from_c() {
        let mut cpu = cpu_with_ram(16);
        cpu.memory.write(0, 0x00).unwrap(); // operand byte, irrelevant since untaken
        cpu.b = -1;
        cpu.a = 0; // b >= a is false, so the branch is not taken
        cpu.c = 77;
        cpu.execute(opcode::BGE, 0).unwrap();
        assert_eq!(cpu.ip, 1, "the operand byte is still fetched even when the branch isn't taken");
        assert_eq!(cpu.a, 77);
        assert_eq!(cpu.b, 77);
    }

    #[test]
    fn workspace_load_store_round_trip() {
        let mut cpu = cpu_with_ram(16);
        cpu.a = 42;
        cpu.execute(opcode::WST_BASE | 3, 0).unwrap();
        cpu.a = 0;
        cpu.execute(opcode::WLD_BASE | 3, 0).unwrap();
        assert_eq!(cpu.a, 42);
    }

    #[test]
    fn unassigned_opcode_is_a_silent_no_op() {
        let mut cpu = cpu_with_ram(16);
        cpu.a = 7;
        cpu.execute(0xFF, 0).unwrap();
        assert_eq!(cpu.a, 7);
    }

    #[test]
    fn ebreak_invokes_the_breakpoint_hook_without_saving_state() {
        let mut cpu = cpu_with_ram(16);
        cpu.set_breakpoint_hook(Box::new(|cpu| {
            cpu.workspace[0] = 99;
        }));
        cpu.mie_global = true;
        cpu.a = 11;
        cpu.b = 22;
        cpu.execute(opcode::EBREAK, 0).unwrap();
        cpu.service_interrupt_if_pending().unwrap();
        assert_eq!(cpu.workspace[0], 99, "breakpoint hook must run");
        // software cause never saves C/B/A/IPtr (§4.8) or jumps to the trap vector
        assert_eq!(cpu.ip, 0);
        assert_eq!(cpu.workspace[SAVE_A], 0);
    }

    #[test]
    fn default_breakpoint_hook_is_a_no_op() {
        let mut cpu = cpu_with_ram(16);
        cpu.mie_global = true;
        cpu.execute(opcode::EBREAK, 0).unwrap();
        cpu.service_interrupt_if_pending().unwrap();
        assert_eq!(cpu.ip, 0);
    }
}
