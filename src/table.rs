use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::session::SessionError;

/// A column-addressed table handed over by the spreadsheet layer.
///
/// Cells are `None` when empty; column lookups are resolved once via [`Table::column_index`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let mut row: Vec<Option<String>> = cells.into_iter().map(|c| c.map(Into::into)).collect();
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    /// Builds a table from JSON-style records. Non-string scalars are stringified.
    pub fn from_records(records: Vec<BTreeMap<String, serde_json::Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for rec in &records {
            for k in rec.keys() {
                if !columns.iter().any(|c| c == k) {
                    columns.push(k.clone());
                }
            }
        }
        let rows = records
            .iter()
            .map(|rec| {
                columns
                    .iter()
                    .map(|c| rec.get(c).and_then(cell_text))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn to_records(&self) -> Vec<BTreeMap<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(c, v)| {
                        let v = v
                            .as_ref()
                            .map(|s| serde_json::Value::String(s.clone()))
                            .unwrap_or(serde_json::Value::Null);
                        (c.clone(), v)
                    })
                    .collect()
            })
            .collect()
    }

    pub fn read_json(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read table: {}", path.display()))?;
        let text = text.trim_start_matches('\u{FEFF}');
        let records: Vec<BTreeMap<String, serde_json::Value>> = serde_json::from_str(text)
            .with_context(|| format!("parse table json: {}", path.display()))?;
        Ok(Self::from_records(records))
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json =
            serde_json::to_string_pretty(&self.to_records()).context("serialize table json")?;
        std::fs::write(path, json).with_context(|| format!("write table: {}", path.display()))?;
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.columns.iter().position(|c| c.trim() == name)
    }

    /// Trimmed, non-empty cell value.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends (or overwrites) a column, one value per row.
    pub fn set_column(&mut self, name: &str, values: Vec<Option<String>>) {
        let col = match self.column_index(name) {
            Some(i) => i,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(None);
                }
                self.columns.len() - 1
            }
        };
        for (row, v) in self.rows.iter_mut().zip(values) {
            if row.len() <= col {
                row.resize(col + 1, None);
            }
            row[col] = v;
        }
    }
}

fn cell_text(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DialogueRow {
    pub text: Option<String>,
    pub speaker: Option<String>,
}

/// Column positions for dialogue rows, validated once per batch.
#[derive(Clone, Debug)]
pub struct DialogueSchema {
    text_col: usize,
    speaker_col: Option<usize>,
}

impl DialogueSchema {
    pub fn resolve(
        table: &Table,
        text_column: &str,
        speaker_column: &str,
    ) -> Result<Self, SessionError> {
        let text_col = table
            .column_index(text_column)
            .ok_or_else(|| SessionError::MissingColumn {
                column: text_column.to_string(),
                rows: table.len(),
            })?;
        let speaker_col = table.column_index(speaker_column);
        if speaker_col.is_none() {
            tracing::info!(column = speaker_column, "no speaker column; rows have no speaker");
        }
        Ok(Self {
            text_col,
            speaker_col,
        })
    }

    pub fn has_speakers(&self) -> bool {
        self.speaker_col.is_some()
    }

    pub fn speaker_column(&self) -> Option<usize> {
        self.speaker_col
    }

    pub fn rows(&self, table: &Table) -> Vec<DialogueRow> {
        (0..table.len())
            .map(|i| DialogueRow {
                // Keep the raw text (leading/trailing spaces included); only blank cells are None.
                text: table
                    .rows
                    .get(i)
                    .and_then(|r| r.get(self.text_col))
                    .cloned()
                    .flatten(),
                speaker: self
                    .speaker_col
                    .and_then(|c| table.cell(i, c))
                    .map(str::to_string),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(vec!["文本".into(), "角色".into()]);
        t.push_row([Some("你好"), Some("艾莉")]);
        t.push_row([Some("再见"), None]);
        t.push_row([None::<&str>, Some("  ")]);
        t
    }

    #[test]
    fn dialogue_rows_resolve_optional_speaker() {
        let t = sample();
        let schema = DialogueSchema::resolve(&t, "文本", "角色").expect("schema");
        let rows = schema.rows(&t);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].speaker.as_deref(), Some("艾莉"));
        assert_eq!(rows[1].speaker, None);
        assert_eq!(rows[2].text, None);
        assert_eq!(rows[2].speaker, None);
    }

    #[test]
    fn missing_speaker_column_is_allowed() {
        let mut t = Table::new(vec!["文本".into()]);
        t.push_row([Some("你好")]);
        let schema = DialogueSchema::resolve(&t, "文本", "角色").expect("schema");
        assert!(!schema.has_speakers());
        assert_eq!(schema.rows(&t)[0].speaker, None);
    }

    #[test]
    fn missing_text_column_is_a_config_error() {
        let t = sample();
        let err = DialogueSchema::resolve(&t, "台词", "角色").unwrap_err();
        assert!(err.to_string().contains("3 rows affected"));
    }

    #[test]
    fn records_round_trip_keeps_column_order() {
        let json = r#"[{"文本":"a","角色":"x"},{"文本":"b","编号":3}]"#;
        let records: Vec<BTreeMap<String, serde_json::Value>> =
            serde_json::from_str(json).expect("json");
        let t = Table::from_records(records);
        assert_eq!(t.columns.len(), 3);
        let num = t.column_index("编号").expect("col");
        assert_eq!(t.cell(1, num), Some("3"));
        assert_eq!(t.cell(0, num), None);
    }

    #[test]
    fn set_column_appends_values() {
        let mut t = sample();
        t.set_column("英文", vec![Some("Hello".into()), None, None]);
        let col = t.column_index("英文").expect("col");
        assert_eq!(t.cell(0, col), Some("Hello"));
        assert_eq!(t.rows[2].len(), 3);
    }
}
