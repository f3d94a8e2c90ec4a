//! Parser for the section/key/value configuration text format.
//!
//! The accepted dialect:
//! - `[name]` opens a section. Section names are case-sensitive.
//! - `key = value` and `key: value` are both accepted. Keys are trimmed and
//!   lower-cased, values are trimmed.
//! - Full-line comments start with `#` or `;`. There are no inline comments.
//! - A line indented deeper than the option line above it continues that value.
//!   Blank lines and comment lines end a value, so empty lines never become part
//!   of a multi-line value.
//! - Duplicate sections and duplicate keys inside a section are rejected.

use crate::error::{PtError, Result};

/// One `[section]` with its entries in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a value by (already normalized) key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(key, value)` pairs in file order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, rejecting a key that is already present
    pub(crate) fn insert(&mut self, key: String, value: String) -> Result<()> {
        if self.get(&key).is_some() {
            return Err(PtError::DuplicateOption {
                section: self.name.clone(),
                key,
            });
        }
        self.entries.push((key, value));
        Ok(())
    }
}

/// A parsed configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<Section>,
}

impl IniDocument {
    /// Parse configuration text
    ///
    /// # Returns
    /// * `Ok(IniDocument)` - All sections in file order
    /// * `Err(PtError)` - A syntax error (with its line number), a duplicate
    ///   section or a duplicate key
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = IniDocument::default();
        // Index of the section being filled
        let mut current: Option<usize> = None;
        // Index (within the current section) of the value that may still continue
        let mut open_value: Option<usize> = None;
        let mut indent_level = usize::MAX;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                indent_level = usize::MAX;
                continue;
            }

            let indent = raw.len() - raw.trim_start().len();

            if let (Some(section), Some(entry)) = (current, open_value) {
                if indent > indent_level {
                    let value = &mut doc.sections[section].entries[entry].1;
                    value.push('\n');
                    value.push_str(line);
                    continue;
                }
            }
            indent_level = indent;

            if let Some(name) = section_header(line) {
                if doc.section(name).is_some() {
                    return Err(PtError::DuplicateSection(name.to_string()));
                }
                doc.sections.push(Section::new(name));
                current = Some(doc.sections.len() - 1);
                open_value = None;
                continue;
            }

            let Some(section) = current else {
                return Err(PtError::ConfigParse {
                    line: line_no,
                    message: "option found before any [section] header".to_string(),
                });
            };

            let Some((key, value)) = line.split_once(['=', ':']) else {
                return Err(PtError::ConfigParse {
                    line: line_no,
                    message: format!("expected 'key = value', found '{}'", line),
                });
            };

            let key = key.trim().to_lowercase();
            if key.is_empty() {
                return Err(PtError::ConfigParse {
                    line: line_no,
                    message: "option name is empty".to_string(),
                });
            }

            let target = &mut doc.sections[section];
            target.insert(key, value.trim().to_string())?;
            open_value = Some(target.len() - 1);
        }

        Ok(doc)
    }

    /// Look up a section by exact name
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Add a fully built section, rejecting a duplicate name
    pub(crate) fn push_section(&mut self, section: Section) -> Result<()> {
        if self.has_section(&section.name) {
            return Err(PtError::DuplicateSection(section.name));
        }
        self.sections.push(section);
        Ok(())
    }
}

/// Extract the name from a `[name]` header line
fn section_header(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('[')?;
    let end = inner.rfind(']')?;
    let name = &inner[..end];
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
