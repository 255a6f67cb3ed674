//! Architecture description: the data model an assembly rule table is built
//! from (§3, §6). Loading a document from disk (JSON, file paths, an
//! `.include`/`.arch` search path) is a host concern — this module only
//! defines the `serde`-deserializable shape and the rule→regex compiler in
//! [`compile`].

pub mod compile;
pub mod default;

use std::collections::HashMap;

use serde::Deserialize;

pub use compile::{CompiledRule, ConfigError};

/// Bit width of a word in the default architecture, used when a document
/// omits `width`.
pub const DEFAULT_WIDTH: u32 = 8;

/// Endianness tag carried by a [`Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Big,
    Little,
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Big
    }
}

/// A variable descriptor: a named, typed slot a rule's bit-emission list can
/// reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Variable {
    /// Total bit width of the variable.
    pub bits: u32,
    /// Ordered mnemonic tokens. Presence marks the variable as an
    /// enumeration; the encoded value is the token's zero-based index.
    #[serde(default)]
    pub toks: Option<Vec<String>>,
    #[serde(default)]
    pub endian: Endian,
    /// Whether fixups against this variable are IP-relative.
    #[serde(default)]
    pub iprel: bool,
    #[serde(default)]
    pub ipofs: i64,
    #[serde(default = "default_ipmul")]
    pub ipmul: i64,
}

fn default_ipmul() -> i64 {
    1
}

impl Variable {
    pub fn is_enum(&self) -> bool {
        self.toks.is_some()
    }
}

/// A single component of a rule's bit-emission list (§3, §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BitComponent {
    /// A literal binary string, e.g. `"0110"`. Its length and value fix
    /// that many bits.
    Literal(String),
    /// A bare integer: the *a*-th variable referenced by the rule's format
    /// string (0-based, in order of appearance), taken whole.
    Full(usize),
    /// `{a, b, n}`: the *a*-th referenced variable, sliced to `n` bits
    /// starting at bit offset `b`.
    Slice { a: usize, b: u32, n: u32 },
}

/// A rule: a format string plus the bit pattern it emits.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub fmt: String,
    pub bits: Vec<BitComponent>,
}

/// An immutable, loaded architecture description.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchSpec {
    pub name: String,
    #[serde(default = "default_width")]
    pub width: u32,
    pub vars: HashMap<String, Variable>,
    pub rules: Vec<Rule>,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

impl ArchSpec {
    /// Parse an architecture description from a JSON document.
    ///
    /// This is the one place the core touches a serialization format; the
    /// crate never reads the file itself (see [`super::assembler::ArchLoader`]).
    pub fn from_json(source: &str) -> Result<ArchSpec, ConfigError> {
        serde_json::from_str(source).map_err(ConfigError::Parse)
    }

    /// Compile every rule in declaration order, preserving first-match
    /// priority at assembly time.
    pub fn compile_rules(&self) -> Result<Vec<CompiledRule>, ConfigError> {
        self.rules
            .iter()
            .map(|rule| compile::compile_rule(rule, &self.vars))
            .collect()
    }
}
