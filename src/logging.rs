//! Pretty-printing messages to the console

use colored::Colorize;

/// Pretty-print an error message to the console
pub fn error(error_message: String) {
    let error_title = "error:".red().bold();
    eprintln!("{} {}", error_title, error_message);
}

/// Pretty-print an assembly-time warning, tagged with its source line
pub fn warning(message: String, line_number: usize) {
    let warning = "warning:".yellow().bold();
    eprintln!("{} line {}: {}", warning, line_number, message);
}

/// Pretty-print a warning with no associated source line (runtime
/// diagnostics: a ROM write, an overlapping fixup, …)
pub fn runtime_warning(message: String) {
    let warning = "warning:".yellow().bold();
    eprintln!("{} {}", warning, message);
}
