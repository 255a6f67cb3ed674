//! Rule→regex compilation (§4.1).
//!
//! Each [`super::Rule`]'s format string is turned into a case-insensitive
//! [`regex::Regex`] once, at architecture-load time, so assembling a line
//! later is just "try each compiled rule's regex in order".

use std::collections::HashMap;

use regex::Regex;

use super::{BitComponent, Rule, Variable};

/// A placeholder reference inside a format string, e.g. `~rs1`.
const PLACEHOLDER: &str = r"~([A-Za-z_][A-Za-z0-9_]*)";

/// Accepts decimal digits, a `$`- or `0x`-prefixed hex literal, or an
/// identifier (a forward label reference).
const NUMERIC_OR_SYMBOLIC: &str =
    r"(?:\$[0-9A-Fa-f]+|0[xX][0-9A-Fa-f]+|[A-Za-z_][A-Za-z0-9_]*|[0-9]+)";

/// A word-character run, used for enumeration-valued placeholders.
const ENUM_TOKEN: &str = r"\w+";

/// A rule after its format string has been compiled to a regex.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub regex: Regex,
    /// Variable names in the order their placeholders appear in `fmt`; the
    /// *k*-th entry is what capture group *k* + 1 belongs to, and what
    /// [`BitComponent::Full`]/[`BitComponent::Slice`] indices (the `a`
    /// field) refer to.
    pub var_order: Vec<String>,
    pub bits: Vec<BitComponent>,
    pub fmt: String,
}

/// Configuration-time failures: a bad architecture document, or a rule that
/// cannot be compiled against it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse architecture document: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("rule \"{rule}\" references unknown variable \"{name}\"")]
    UnknownVariable { rule: String, name: String },
    #[error("rule \"{rule}\" produced an invalid regex: {source}")]
    Regex {
        rule: String,
        #[source]
        source: regex::Error,
    },
    #[error(
        "rule \"{rule}\" references variable index {index}, but only {n_vars} \
         variables are referenced by its format string"
    )]
    BitComponentIndex {
        rule: String,
        index: usize,
        n_vars: usize,
    },
}

/// Compile a single rule's format string into a matcher.
pub fn compile_rule(
    rule: &Rule,
    vars: &HashMap<String, Variable>,
) -> Result<CompiledRule, ConfigError> {
    let mut var_order = Vec::new();
    let mut pattern = String::from("^");

    let words: Vec<&str> = rule.fmt.split_whitespace().collect();
    for (word_index, word) in words.iter().enumerate() {
        if word_index > 0 {
            pattern.push_str(r"\s+");
        }
        pattern.push_str(&compile_word(word, rule, vars, &mut var_order)?);
    }
    pattern.push('$');

    let regex = Regex::new(&format!("(?i){pattern}")).map_err(|source| ConfigError::Regex {
        rule: rule.fmt.clone(),
        source,
    })?;

    // A rule whose bits reference more variables than its format string
    // actually captures is rejected at load time, same as an unresolved
    // `~name`.
    for component in &rule.bits {
        let index = match component {
            BitComponent::Literal(_) => continue,
            BitComponent::Full(index) => *index,
            BitComponent::Slice { a, .. } => *a,
        };
        if index >= var_order.len() {
            return Err(ConfigError::BitComponentIndex {
                rule: rule.fmt.clone(),
                index,
                n_vars: var_order.len(),
            });
        }
    }

    Ok(CompiledRule {
        regex,
        var_order,
        bits: rule.bits.clone(),
        fmt: rule.fmt.clone(),
    })
}

/// Compile one whitespace-delimited word of a format string, splicing in a
/// capture group for each `~name` placeholder it contains.
fn compile_word(
    word: &str,
    rule: &Rule,
    vars: &HashMap<String, Variable>,
    var_order: &mut Vec<String>,
) -> Result<String, ConfigError> {
    let placeholder = Regex::new(PLACEHOLDER).expect("static placeholder regex is valid");

    let mut out = String::new();
    let mut last_end = 0;
    for capture in placeholder.captures_iter(word) {
        let whole = capture.get(0).expect("group 0 always matches");
        let name = &capture[1];

        out.push_str(&regex::escape(&word[last_end..whole.start()]));

        let variable = vars.get(name).ok_or_else(|| ConfigError::UnknownVariable {
            rule: rule.fmt.clone(),
            name: name.to_string(),
        })?;

        out.push('(');
        out.push_str(if variable.is_enum() {
            ENUM_TOKEN
        } else {
            NUMERIC_OR_SYMBOLIC
        });
        out.push(')');

        var_order.push(name.to_string());
        last_end = whole.end();
    }
    out.push_str(&regex::escape(&word[last_end..]));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(bits: u32) -> Variable {
        Variable {
            bits,
            toks: None,
            endian: super::super::Endian::Big,
            iprel: false,
            ipofs: 0,
            ipmul: 1,
        }
    }

    #[test]
    fn compiles_simple_mnemonic() {
        let vars = HashMap::new();
        let rule = Rule {
            fmt: "nop".to_string(),
            bits: vec![BitComponent::Literal("00000000".to_string())],
        };
        let compiled = compile_rule(&rule, &vars).unwrap();
        assert!(compiled.regex.is_match("nop"));
        assert!(compiled.regex.is_match("NOP"));
        assert!(!compiled.regex.is_match("nope"));
    }

    #[test]
    fn compiles_placeholder_with_trailing_punctuation() {
        let mut vars = HashMap::new();
        vars.insert("rd".to_string(), var(4));
        vars.insert("imm".to_string(), var(8));
        let rule = Rule {
            fmt: "ldl ~rd, ~imm".to_string(),
            bits: vec![BitComponent::Full(0), BitComponent::Full(1)],
        };
        let compiled = compile_rule(&rule, &vars).unwrap();
        assert_eq!(compiled.var_order, vec!["rd", "imm"]);
        let caps = compiled.regex.captures("ldl r3, $0a").unwrap();
        assert_eq!(&caps[1], "r3");
        assert_eq!(&caps[2], "$0a");
    }

    #[test]
    fn rejects_unknown_variable() {
        let vars = HashMap::new();
        let rule = Rule {
            fmt: "add ~missing".to_string(),
            bits: vec![],
        };
        assert!(matches!(
            compile_rule(&rule, &vars),
            Err(ConfigError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_bit_component_index() {
        let mut vars = HashMap::new();
        vars.insert("rd".to_string(), var(4));
        let rule = Rule {
            fmt: "mv ~rd".to_string(),
            bits: vec![BitComponent::Full(1)],
        };
        assert!(matches!(
            compile_rule(&rule, &vars),
            Err(ConfigError::BitComponentIndex { .. })
        ));
    }

    #[test]
    fn enum_variable_accepts_word_tokens() {
        let mut vars = HashMap::new();
        vars.insert(
            "cc".to_string(),
            Variable {
                bits: 3,
                toks: Some(vec!["eq".to_string(), "ne".to_string()]),
                endian: super::super::Endian::Big,
                iprel: false,
                ipofs: 0,
                ipmul: 1,
            },
        );
        let rule = Rule {
            fmt: "b~cc ~off".to_string(),
            bits: vec![],
        };
        vars.insert("off".to_string(), var(8));
        let compiled = compile_rule(&rule, &vars).unwrap();
        assert!(compiled.regex.is_match("beq 10"));
        assert!(compiled.regex.is_match("bne label"));
    }
}
