//! MOCODE (modus operandi code) lookup table.

use std::collections::HashMap;

/// Read-only mapping from 4-digit MOCODE strings to behaviour descriptions.
///
/// Keys are always stored zero-padded (`"0344"`, never `"344"`). Built once at
/// start-up by the store layer and shared by reference afterwards.
#[derive(Debug, Clone, Default)]
pub struct MocodeTable {
    entries: HashMap<String, String>,
}

/// Zero-pad a code to 4 digits: `"344"` → `"0344"`. Longer codes pass through.
pub fn pad_code(code: &str) -> String {
    format!("{code:0>4}")
}

impl MocodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a description, normalising the key to its padded form.
    pub fn insert(&mut self, code: &str, description: impl Into<String>) {
        self.entries.insert(pad_code(code.trim()), description.into());
    }

    /// Look up a single code (padded before lookup).
    pub fn get(&self, code: &str) -> Option<&str> {
        self.entries.get(&pad_code(code)).map(String::as_str)
    }

    /// Render one code: its description, or `Unknown(<code>)` on a miss.
    ///
    /// The placeholder embeds the code exactly as the caller wrote it.
    pub fn describe(&self, code: &str) -> String {
        match self.get(code) {
            Some(desc) => desc.to_string(),
            None => format!("Unknown({code})"),
        }
    }

    /// Render a whitespace-separated code sequence as a comma-joined phrase.
    ///
    /// "1300 9999" with only `1300 → Theft` known → "Theft, Unknown(9999)"
    pub fn render(&self, codes: &str) -> String {
        codes
            .split_whitespace()
            .map(|code| self.describe(code))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for MocodeTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (code, desc) in iter {
            table.insert(code.as_ref(), desc);
        }
        table
    }
}
