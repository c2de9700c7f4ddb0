//! Minimal INI reader for `core.conf`.
//!
//! Supports `[section]` headers, `key = value` / `key: value` pairs, `#` and
//! `;` comment lines, and indented continuation lines. Keys are lowercased.

use std::collections::BTreeMap;

use thiserror::Error;

/// Parse failure with the 1-based line it occurred on.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IniError {
    #[error("line {line}: entry outside of any [section]")]
    MissingSectionHeader { line: usize },

    #[error("line {line}: unterminated section header")]
    BadSectionHeader { line: usize },

    #[error("line {line}: expected `key = value`, found {text:?}")]
    BadEntry { line: usize, text: String },
}

/// One `[section]` with its entries in file order (later keys replace earlier ones).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn set(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    fn append_continuation(&mut self, key: &str, more: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1.push('\n');
            entry.1.push_str(more);
        }
    }
}

/// A parsed INI document. Repeated section headers merge into one section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: BTreeMap<String, Section>,
}

impl IniDocument {
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }
}

/// Parse INI text.
pub fn parse(text: &str) -> Result<IniDocument, IniError> {
    let mut doc = IniDocument::default();
    let mut current: Option<String> = None;
    let mut last_key: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        // Indented line continues the previous value
        if raw.starts_with([' ', '\t']) {
            if let (Some(section), Some(key)) = (&current, &last_key) {
                if let Some(s) = doc.sections.get_mut(section) {
                    s.append_continuation(key, trimmed);
                }
                continue;
            }
        }

        if let Some(rest) = trimmed.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .ok_or(IniError::BadSectionHeader { line })?
                .trim()
                .to_string();
            doc.sections.entry(name.clone()).or_default();
            current = Some(name);
            last_key = None;
            continue;
        }

        let section = current
            .as_ref()
            .ok_or(IniError::MissingSectionHeader { line })?;

        let split_at = trimmed
            .find(['=', ':'])
            .ok_or_else(|| IniError::BadEntry {
                line,
                text: trimmed.to_string(),
            })?;
        let key = trimmed[..split_at].trim().to_lowercase();
        if key.is_empty() {
            return Err(IniError::BadEntry {
                line,
                text: trimmed.to_string(),
            });
        }
        let value = trimmed[split_at + 1..].trim().to_string();

        if let Some(s) = doc.sections.get_mut(section) {
            s.set(key.clone(), value);
        }
        last_key = Some(key);
    }

    Ok(doc)
}
