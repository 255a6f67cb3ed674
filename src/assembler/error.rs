//! Assembler diagnostics (§7).
//!
//! Unlike [`crate::memory::MemoryError`] or [`crate::arch::ConfigError`],
//! these need to show the offending source line with a caret underneath the
//! token that's wrong, so `Display` is hand-written rather than a
//! `#[error("...")]` string — same reasoning the teacher's own
//! `assembler::Error` uses.

use std::fmt;

/// A span of byte offsets into a source line, for underlining.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }
}

#[derive(Debug)]
pub enum Error {
    /// A directive line starting with `.` that isn't one of §4.3's table.
    /// Non-fatal: §4.3 says unknown directives only warn.
    UnknownDirective { line: usize, directive: String },
    /// No rule's regex matched the line, or every rule that matched failed
    /// to assemble (§4.2).
    NoRuleMatched { line: usize, text: String },
    /// A rule matched but assembling it failed (immediate too wide, unknown
    /// enumeration token, ...); kept around so a later rule gets a chance,
    /// and reported verbatim if no rule ever succeeds.
    RuleEmission {
        line: usize,
        text: String,
        span: Option<Span>,
        message: String,
    },
    /// A directive was well-formed syntactically (leading `.word`) but its
    /// arguments didn't parse.
    DirectiveSyntax {
        line: usize,
        text: String,
        message: String,
    },
    /// `.align K` with `K == 0` or `K` greater than the declared code
    /// length (§4.3, §8).
    InvalidAlign {
        line: usize,
        modulus: i64,
        code_len: u32,
    },
    /// A symbol with no binding left after every fixup was resolved (§4.5).
    UnresolvedSymbol { symbol: String, line: usize },
    /// Two fixups wrote overlapping set bits into the same output word
    /// (§4.5).
    OverlappingFixup {
        symbol: String,
        line: usize,
        word_index: usize,
    },
    /// `.arch` named an architecture the loader couldn't produce.
    ArchLoad {
        name: String,
        line: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// `.include`/`.module` named a module the loader couldn't produce.
    ModuleLoad {
        name: String,
        line: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// An `.arch`-loaded document failed to compile (§4.1).
    Config(crate::arch::ConfigError),
}

impl Error {
    /// Configuration failures abort the whole assembly (§7); everything
    /// else is recorded and assembly continues to the next line.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ArchLoad { .. } | Error::ModuleLoad { .. } | Error::Config(_)
        )
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            Error::UnknownDirective { line, .. }
            | Error::NoRuleMatched { line, .. }
            | Error::RuleEmission { line, .. }
            | Error::DirectiveSyntax { line, .. }
            | Error::InvalidAlign { line, .. }
            | Error::UnresolvedSymbol { line, .. }
            | Error::OverlappingFixup { line, .. }
            | Error::ArchLoad { line, .. }
            | Error::ModuleLoad { line, .. } => Some(*line),
            Error::Config(_) => None,
        }
    }
}

fn underline(text: &str, span: Span) -> String {
    let mut marks = vec![' '; text.len()];
    for i in span.start..span.end.min(marks.len()) {
        marks[i] = '^';
    }
    marks.into_iter().collect::<String>()
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownDirective { line, directive } => {
                write!(f, "line {line}: unknown directive \"{directive}\"")
            }
            Error::NoRuleMatched { line, text } => {
                writeln!(f, "line {line}: could not decode \"{text}\"")?;
                write!(f, "\t{line}\t{text}")
            }
            Error::RuleEmission {
                line,
                text,
                span,
                message,
            } => {
                writeln!(f, "line {line}: {message}")?;
                write!(f, "\t{line}\t{text}")?;
                if let Some(span) = span {
                    write!(f, "\n\t\t{}", underline(text, *span))?;
                }
                Ok(())
            }
            Error::DirectiveSyntax {
                line,
                text,
                message,
            } => {
                writeln!(f, "line {line}: {message}")?;
                write!(f, "\t{line}\t{text}")
            }
            Error::InvalidAlign {
                line,
                modulus,
                code_len,
            } => write!(
                f,
                "line {line}: .align {modulus} must satisfy 1 <= K <= {code_len}"
            ),
            Error::UnresolvedSymbol { symbol, line } => {
                write!(f, "line {line}: unresolved symbol \"{symbol}\"")
            }
            Error::OverlappingFixup {
                symbol,
                line,
                word_index,
            } => write!(
                f,
                "line {line}: fixup for \"{symbol}\" overlaps bits already set in word {word_index}"
            ),
            Error::ArchLoad { name, line, source } => {
                write!(f, "line {line}: failed to load architecture \"{name}\": {source}")
            }
            Error::ModuleLoad { name, line, source } => {
                write!(f, "line {line}: failed to include \"{name}\": {source}")
            }
            Error::Config(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::arch::ConfigError> for Error {
    fn from(source: crate::arch::ConfigError) -> Error {
        Error::Config(source)
    }
}
