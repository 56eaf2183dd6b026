// src/vars/mod.rs

use crate::store::Row;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::warn;

/// Placeholder delimiters. The default matches `${name}` markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub prefix: String,
    pub suffix: String,
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern {
            prefix: "${".to_string(),
            suffix: "}".to_string(),
        }
    }
}

impl Pattern {
    /// Wrap a bare name; keys that are already wrapped pass through.
    pub fn wrap(&self, key: &str) -> String {
        if key.len() >= self.prefix.len() + self.suffix.len()
            && key.starts_with(&self.prefix)
            && key.ends_with(&self.suffix)
        {
            key.to_string()
        } else {
            format!("{}{}{}", self.prefix, key, self.suffix)
        }
    }

    /// Regex matching any wrapped placeholder, capturing the inner name.
    pub fn regex(&self) -> Regex {
        Regex::new(&format!(
            "{}(.*?){}",
            regex::escape(&self.prefix),
            regex::escape(&self.suffix)
        ))
        .expect("placeholder pattern should produce a valid regex")
    }
}

/// A single named text binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextVar {
    pub key: String,
    pub value: String,
}

impl TextVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        TextVar {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Index-aligned columns backing one repeating table region. The i-th entry
/// of every column belongs to the same source row.
#[derive(Debug, Clone, Default)]
pub struct TableVar {
    columns: Vec<Vec<TextVar>>,
    keys: Vec<String>,
}

impl TableVar {
    pub fn new() -> Self {
        TableVar::default()
    }

    /// Add one column. Empty columns are ignored; a column whose entries
    /// disagree on the placeholder key is skipped with a warning.
    pub fn push_column(&mut self, column: Vec<TextVar>) {
        let Some(first) = column.first() else {
            return;
        };
        let key = first.key.clone();
        if column.iter().any(|v| v.key != key) {
            warn!(key, "table column skipped: mixed placeholder keys");
            return;
        }
        self.columns.push(column);
        self.keys.push(key);
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn columns(&self) -> &[Vec<TextVar>] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Usable row count plus whether any columns disagree on length.
    pub fn validated_row_count(&self) -> (usize, bool) {
        let Some(first) = self.columns.first() else {
            return (0, false);
        };
        let mut expected = first.len();
        let mut mismatch = false;
        for column in &self.columns {
            if column.len() != expected {
                mismatch = true;
                expected = expected.min(column.len());
            }
        }
        (expected, mismatch)
    }

    /// Build a table from row maps, one column per ordered key. Keys absent
    /// from a row bind the empty string.
    pub fn from_rows(
        ordered_keys: &[&str],
        rows: &[BTreeMap<String, String>],
        pattern: &Pattern,
    ) -> Self {
        let mut table = TableVar::new();
        if ordered_keys.is_empty() || rows.is_empty() {
            return table;
        }
        for key in ordered_keys {
            let wrapped = pattern.wrap(key);
            let column = rows
                .iter()
                .map(|row| TextVar::new(wrapped.clone(), row.get(*key).cloned().unwrap_or_default()))
                .collect();
            table.push_column(column);
        }
        table
    }
}

/// The complete set of bindings handed to the template filler in one call.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    texts: Vec<TextVar>,
    tables: Vec<TableVar>,
}

impl Variables {
    pub fn new() -> Self {
        Variables::default()
    }

    pub fn push_text(&mut self, var: TextVar) {
        self.texts.push(var);
    }

    pub fn push_table(&mut self, table: TableVar) {
        self.tables.push(table);
    }

    pub fn texts(&self) -> &[TextVar] {
        &self.texts
    }

    pub fn tables(&self) -> &[TableVar] {
        &self.tables
    }
}

/// Placeholder names for the seven reading fields, in column order.
pub const READING_KEYS: [&str; 7] = [
    "deviceId", "cpm", "uSvh", "mRh", "mrhLevel", "alarm", "moment",
];

/// Convert fetched rows into one aligned column per reading field, bundled
/// into a `Variables` set. Pure; preserves row order within every column.
pub fn reading_table(rows: &[Row], pattern: &Pattern) -> Variables {
    let mut columns: [Vec<TextVar>; 7] = Default::default();
    for row in rows {
        let fields = [
            &row.device_id,
            &row.cpm,
            &row.usvh,
            &row.mrh,
            &row.mrh_level,
            &row.alarm,
            &row.moment,
        ];
        for (column, (key, value)) in columns.iter_mut().zip(READING_KEYS.iter().zip(fields)) {
            column.push(TextVar::new(pattern.wrap(key), value.clone()));
        }
    }

    let mut table = TableVar::new();
    for column in columns {
        table.push_column(column);
    }
    let mut vars = Variables::new();
    vars.push_table(table);
    vars
}
