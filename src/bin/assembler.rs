//! `r824asm`: translate an R824 assembly source file into a binary image
//! (§6).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use r824::arch::ArchSpec;
use r824::assembler::{self, ArchLoader};
use r824::logging;

/// Assemble R824 source into a binary image.
#[derive(Parser)]
#[command(name = "r824asm")]
struct Cli {
    /// Architecture description to assemble against (JSON). Defaults to the
    /// built-in R824 instruction set.
    #[arg(long, value_name = "path.json")]
    arch: Option<PathBuf>,
    input: PathBuf,
    output: PathBuf,
}

/// Resolves `.arch`/`.include`/`.module` names to sibling files relative to
/// the input assembly's directory — the filesystem boundary the core
/// assembler never crosses itself (§4.3, §5).
struct FsArchLoader {
    base_dir: PathBuf,
}

impl FsArchLoader {
    fn resolve(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }
}

impl ArchLoader for FsArchLoader {
    fn load_arch(&mut self, name: &str) -> Result<ArchSpec, Box<dyn std::error::Error + Send + Sync>> {
        let text = fs::read_to_string(self.resolve(name))?;
        Ok(ArchSpec::from_json(&text)?)
    }

    fn load_module(&mut self, name: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        Ok(fs::read_to_string(self.resolve(name))?)
    }
}

fn load_arch_document(path: &Path) -> Result<ArchSpec, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    ArchSpec::from_json(&text).map_err(|e| format!("{}: {e}", path.display()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            logging::error(format!("failed to read {}: {e}", cli.input.display()));
            return ExitCode::from(1);
        }
    };

    let arch = match &cli.arch {
        Some(path) => match load_arch_document(path) {
            Ok(arch) => arch,
            Err(e) => {
                logging::error(format!("failed to load architecture: {e}"));
                return ExitCode::from(1);
            }
        },
        None => r824::arch::default::default_arch(),
    };

    let base_dir = cli
        .input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut loader = FsArchLoader { base_dir };

    let output = assembler::assemble(&source, arch, &mut loader);

    for warning in &output.warnings {
        match warning.line() {
            Some(line) => logging::warning(format!("{}: {warning}", cli.input.display()), line),
            None => logging::runtime_warning(format!("{}: {warning}", cli.input.display())),
        }
    }

    if !output.errors.is_empty() {
        for error in &output.errors {
            logging::error(format!("{}: {error}", cli.input.display()));
        }
        return ExitCode::from(2);
    }

    if let Err(e) = fs::write(&cli.output, output.to_bytes()) {
        logging::error(format!("failed to write {}: {e}", cli.output.display()));
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}
