//! The environment-call contract (§4.7): a small fixed menu of host
//! services, reached through `ECALL` with the call number in `A` and
//! arguments in `B`/`C`. Actual I/O is abstracted behind [`EnvIo`] so the
//! interpreter core never touches stdio directly.

use std::io;
use std::io::{Read, Write};

use super::{mask24, sext24, Cpu, RuntimeError};

pub const EXIT: i32 = 0;
pub const REGISTER_DUMP: i32 = 1;
pub const MEMORY_DUMP: i32 = 2;
pub const PRINT_INT: i32 = 3;
pub const PRINT_CHAR: i32 = 4;
pub const READ_CHAR: i32 = 5;
pub const PRINT_STRING: i32 = 6;
pub const READ_STRING: i32 = 7;

/// The sentinel an I/O-backed `ECALL` leaves in `A` on failure (§7): the
/// guest reacts to it, the interpreter does not abort the run.
const IO_ERROR_SENTINEL: i32 = -1;

/// The host side of an `ECALL`: everything the guest can ask of the world
/// outside its own address space. Fallible, so a failing read/write becomes
/// the §7 sentinel in `A` rather than aborting the run.
pub trait EnvIo {
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Wires `ECALL` I/O to the process's real stdin/stdout — what `r824run`
/// installs by default.
pub struct StdEnvIo {
    stdin: std::io::BufReader<std::io::Stdin>,
}

impl StdEnvIo {
    pub fn new() -> StdEnvIo {
        StdEnvIo {
            stdin: std::io::BufReader::new(std::io::stdin()),
        }
    }
}

impl Default for StdEnvIo {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvIo for StdEnvIo {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.stdin.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        std::io::stdout().write_all(bytes)
    }
}

/// An `EnvIo` with no host behind it — every read is EOF, every write is
/// dropped. Used where a CPU is built for unit testing and never runs an
/// `ECALL` that cares about the result.
pub struct NullEnvIo;

impl EnvIo for NullEnvIo {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(None)
    }

    fn write_bytes(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

impl Cpu {
    /// Service the pending `ECALL`, dispatching on the call number in `A`.
    /// Unrecognized call numbers are a silent no-op (§4.7 defines only the
    /// eight below; nothing says an out-of-range number should fault).
    pub(super) fn ecall(&mut self) -> Result<(), RuntimeError> {
        let call = self.a;
        match call {
            EXIT => self.halted = true,

            REGISTER_DUMP => {
                let dump = format!(
                    "A={} B={} C={} IP=0x{:06X} workspace={:?}\n",
                    self.a, self.b, self.c, self.ip, self.workspace
                );
                if self.env_io.write_bytes(dump.as_bytes()).is_err() {
                    self.a = IO_ERROR_SENTINEL;
                } else {
                    self.post_ecall_shift();
                }
            }

            MEMORY_DUMP => {
                let base = mask24(self.b);
                let mut out = String::new();
                for row in 0..16u32 {
                    out.push_str(&format!("{:06X}:", base.wrapping_add(row * 16)));
                    for col in 0..16u32 {
                        let byte = self.memory.read(base.wrapping_add(row * 16 + col))?;
                        out.push_str(&format!(" {byte:02X}"));
                    }
                    out.push('\n');
                }
                if self.env_io.write_bytes(out.as_bytes()).is_err() {
                    self.a = IO_ERROR_SENTINEL;
                } else {
                    self.post_ecall_shift();
                }
            }

            PRINT_INT => {
                if self.env_io.write_bytes(format!("{}", self.b).as_bytes()).is_err() {
                    self.a = IO_ERROR_SENTINEL;
                } else {
                    self.post_ecall_shift();
                }
            }

            PRINT_CHAR => {
                if self.env_io.write_bytes(&[(mask24(self.b) & 0xFF) as u8]).is_err() {
                    self.a = IO_ERROR_SENTINEL;
                } else {
                    self.post_ecall_shift();
                }
            }

            READ_CHAR => {
                self.a = match self.env_io.read_byte() {
                    Ok(Some(byte)) => byte as i32,
                    Ok(None) => -1,
                    Err(_) => IO_ERROR_SENTINEL,
                };
            }

            PRINT_STRING => {
                let mut address = mask24(self.b);
                let mut out = Vec::new();
                loop {
                    let byte = self.memory.read(address)?;
                    if byte == 0 {
                        break;
                    }
                    out.push(byte);
                    address = address.wrapping_add(1);
                }
                if self.env_io.write_bytes(&out).is_err() {
                    self.a = IO_ERROR_SENTINEL;
                } else {
                    self.post_ecall_shift();
                }
            }

            READ_STRING => {
                let max_len = (mask24(self.b) & 0xFF) as usize;
                let base = mask24(self.c);
                let mut written = 0usize;
                let mut io_error = false;
                while written < max_len {
                    match self.env_io.read_byte() {
                        Ok(Some(b'\n')) | Ok(None) => break,
                        Ok(Some(byte)) => {
                            self.memory.write(base.wrapping_add(written as u32), byte)?;
                            written += 1;
                        }
                        Err(_) => {
                            io_error = true;
                            break;
                        }
                    }
                }
                self.a = if io_error { IO_ERROR_SENTINEL } else { sext24(written as u32) };
            }

            _ => {}
        }
        Ok(())
    }

    /// `A←B, B←C`, the shift every `ECALL` that only *reads* `B` (and
    /// optionally `C`) applies afterward, same discipline as `POP1`.
    fn post_ecall_shift(&mut self) {
        self.a = self.b;
        self.b = self.c;
    }
}
