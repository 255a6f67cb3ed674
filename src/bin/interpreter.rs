//! `r824run`: load a binary image into RAM and drive the R824 interpreter
//! until `HLT` or a runtime fault (§6).

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use r824::cpu::ecall::StdEnvIo;
use r824::cpu::Cpu;
use r824::logging;
use r824::memory::{MemoryMap, Ram, Region, Timer};

const RAM_START: u32 = 0x000000;
const RAM_SIZE: u32 = 0x0A0_0000;
const VRAM_START: u32 = 0xE00000;
const VRAM_SIZE: u32 = 0x100000;
const TIMER_START: u32 = 0xF00000;
const TIMER_SIZE: u32 = 8;

/// Run an R824 binary image.
#[derive(Parser)]
#[command(name = "r824run")]
struct Cli {
    image: PathBuf,
}

fn default_memory_map(image: &[u8]) -> MemoryMap {
    let mut map = MemoryMap::new();
    let mut ram = Ram::new(RAM_SIZE);
    ram.load(image);
    map.map(Region::new(RAM_START, RAM_SIZE), Box::new(ram))
        .expect("default regions do not overlap");
    map.map(Region::new(VRAM_START, VRAM_SIZE), Box::new(Ram::new(VRAM_SIZE)))
        .expect("default regions do not overlap");
    map.map(Region::new(TIMER_START, TIMER_SIZE), Box::new(Timer::new()))
        .expect("default regions do not overlap");
    map
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let image = match fs::read(&cli.image) {
        Ok(bytes) => bytes,
        Err(e) => {
            logging::error(format!("failed to read {}: {e}", cli.image.display()));
            return ExitCode::from(1);
        }
    };

    let memory = default_memory_map(&image);
    let mut cpu = Cpu::new(memory, Box::new(StdEnvIo::new()));

    while !cpu.halted {
        if let Err(e) = cpu.step() {
            logging::error(format!("{e}"));
            return ExitCode::from(1);
        }
    }

    ExitCode::from(0)
}
