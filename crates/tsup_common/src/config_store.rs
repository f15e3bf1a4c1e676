//! Typed access to the router's persisted configuration
//!
//! Configuration is a set of packages (`network`, `firewall`, ...), each an
//! ordered list of typed sections holding named options. `UciConfigStore`
//! drives the `uci` tool; tests use the in-memory store from `testing`.

use crate::command;
use crate::error::StoreError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

/// Value of a single option: plain or list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Single(String),
    List(Vec<String>),
}

impl OptionValue {
    pub fn single(value: impl Into<String>) -> Self {
        Self::Single(value.into())
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::Single(v) => Some(v),
            Self::List(_) => None,
        }
    }

    /// True if `value` is this option's value or one of its list entries.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::Single(v) => v == value,
            Self::List(vs) => vs.iter().any(|v| v == value),
        }
    }
}

/// One configuration section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section identifier (named, or generated like `cfg0a1b2c`)
    pub id: String,
    /// Section type, e.g. `interface`, `zone`, `forwarding`
    pub kind: String,
    pub options: BTreeMap<String, OptionValue>,
}

impl Section {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            options: BTreeMap::new(),
        }
    }

    /// Plain value of `name`, if set and not a list.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(OptionValue::as_single)
    }
}

/// Transactional key-value store over configuration sections.
///
/// Changes made through `add_section`/`set` become persistent only on
/// `commit` of the package.
pub trait ConfigStore {
    /// All sections of `package`, in file order.
    fn sections(&self, package: &str) -> Result<Vec<Section>, StoreError>;

    /// Create a section of `kind`. With `id` the section is named, otherwise
    /// the store generates an identifier. Returns the identifier.
    fn add_section(&self, package: &str, kind: &str, id: Option<&str>)
        -> Result<String, StoreError>;

    fn set(
        &self,
        package: &str,
        section: &str,
        option: &str,
        value: &OptionValue,
    ) -> Result<(), StoreError>;

    fn commit(&self, package: &str) -> Result<(), StoreError>;

    fn section(&self, package: &str, id: &str) -> Result<Option<Section>, StoreError> {
        Ok(self.sections(package)?.into_iter().find(|s| s.id == id))
    }

    fn sections_of_kind(&self, package: &str, kind: &str) -> Result<Vec<Section>, StoreError> {
        Ok(self
            .sections(package)?
            .into_iter()
            .filter(|s| s.kind == kind)
            .collect())
    }
}

/// `ConfigStore` backed by the `uci` command line tool.
#[derive(Debug, Clone, Default)]
pub struct UciConfigStore {
    /// Alternate config directory (`uci -c`), `/etc/config` when unset.
    confdir: Option<PathBuf>,
}

impl UciConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confdir(confdir: impl Into<PathBuf>) -> Self {
        Self {
            confdir: Some(confdir.into()),
        }
    }

    fn uci(&self, args: &[&str]) -> Result<String, StoreError> {
        let mut cmd = Command::new("uci");
        if let Some(ref dir) = self.confdir {
            cmd.arg("-c").arg(dir);
        }
        cmd.args(args);

        let output = command::run_command(&mut cmd).map_err(|e| StoreError::Command {
            command: e.command,
            stderr: e.reason,
        })?;
        Ok(output.stdout)
    }
}

impl ConfigStore for UciConfigStore {
    fn sections(&self, package: &str) -> Result<Vec<Section>, StoreError> {
        let output = self.uci(&["-X", "show", package])?;
        parse_show_output(package, &output)
    }

    fn add_section(
        &self,
        package: &str,
        kind: &str,
        id: Option<&str>,
    ) -> Result<String, StoreError> {
        match id {
            Some(id) => {
                self.uci(&["set", &format!("{}.{}={}", package, id, kind)])?;
                Ok(id.to_string())
            }
            None => {
                let generated = self.uci(&["add", package, kind])?.trim().to_string();
                if generated.is_empty() {
                    return Err(StoreError::Malformed(format!(
                        "uci add {} {} printed no section id",
                        package, kind
                    )));
                }
                Ok(generated)
            }
        }
    }

    fn set(
        &self,
        package: &str,
        section: &str,
        option: &str,
        value: &OptionValue,
    ) -> Result<(), StoreError> {
        let key = format!("{}.{}.{}", package, section, option);
        match value {
            OptionValue::Single(v) => {
                self.uci(&["set", &format!("{}={}", key, v)])?;
            }
            OptionValue::List(values) => {
                // Absent option is fine here; the list is rebuilt from scratch.
                let _ = self.uci(&["-q", "delete", &key]);
                for v in values {
                    self.uci(&["add_list", &format!("{}={}", key, v)])?;
                }
            }
        }
        Ok(())
    }

    fn commit(&self, package: &str) -> Result<(), StoreError> {
        self.uci(&["commit", package]).map(|_| ())
    }
}

/// Parse `uci -X show <package>` output into typed sections.
///
/// Lines look like `pkg.section=type` or `pkg.section.option='value'`, list
/// options as `pkg.section.option='a' 'b'`.
pub fn parse_show_output(package: &str, output: &str) -> Result<Vec<Section>, StoreError> {
    let mut sections: Vec<Section> = Vec::new();
    let prefix = format!("{}.", package);

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (key, raw_value) = line
            .split_once('=')
            .ok_or_else(|| StoreError::Malformed(format!("no `=` in line: {}", line)))?;
        let path = key
            .strip_prefix(&prefix)
            .ok_or_else(|| StoreError::Malformed(format!("foreign package in line: {}", line)))?;

        match path.split_once('.') {
            None => sections.push(Section::new(path, raw_value.trim())),
            Some((section_id, option)) => {
                let section = sections
                    .iter_mut()
                    .rev()
                    .find(|s| s.id == section_id)
                    .ok_or_else(|| StoreError::MissingSection {
                        package: package.to_string(),
                        section: section_id.to_string(),
                    })?;
                let mut words = split_words(raw_value)?;
                let value = if words.len() == 1 {
                    OptionValue::Single(words.remove(0))
                } else {
                    OptionValue::List(words)
                };
                section.options.insert(option.to_string(), value);
            }
        }
    }

    Ok(sections)
}

/// Shell-style word splitting of a `uci show` value (`'a' 'it'\''s'`).
fn split_words(raw: &str) -> Result<Vec<String>, StoreError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(q) => current.push(q),
                        None => {
                            return Err(StoreError::Malformed(format!(
                                "unterminated quote in value: {}",
                                raw
                            )))
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIREWALL: &str = "\
firewall.cfg01e63d=defaults
firewall.cfg01e63d.syn_flood='1'
firewall.cfg02dc81=zone
firewall.cfg02dc81.name='lan'
firewall.cfg02dc81.network='lan'
firewall.cfg03dc81=zone
firewall.cfg03dc81.name='wan'
firewall.cfg03dc81.network='wan' 'wan6'
firewall.cfg04ad58=forwarding
firewall.cfg04ad58.src='lan'
firewall.cfg04ad58.dest='wan'
";

    #[test]
    fn test_parse_sections_and_options() {
        let sections = parse_show_output("firewall", FIREWALL).unwrap();
        assert_eq!(sections.len(), 4);
        assert_eq!(sections[1].kind, "zone");
        assert_eq!(sections[1].option("name"), Some("lan"));
        assert_eq!(
            sections[2].options.get("network"),
            Some(&OptionValue::list(["wan", "wan6"]))
        );
        assert_eq!(sections[3].option("dest"), Some("wan"));
    }

    #[test]
    fn test_parse_escaped_quote() {
        let out = "system.x=system\nsystem.x.note='it'\\''s'\n";
        let sections = parse_show_output("system", out).unwrap();
        assert_eq!(sections[0].option("note"), Some("it's"));
    }

    #[test]
    fn test_option_before_section_is_error() {
        let err = parse_show_output("network", "network.lan.proto='static'\n").unwrap_err();
        assert!(matches!(err, StoreError::MissingSection { .. }));
    }

    #[test]
    fn test_foreign_package_is_malformed() {
        let err = parse_show_output("network", "firewall.x=zone\n").unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_option_value_contains() {
        assert!(OptionValue::single("lan").contains("lan"));
        assert!(OptionValue::list(["wan", "wan6"]).contains("wan6"));
        assert!(!OptionValue::list(["wan"]).contains("lan"));
    }
}
