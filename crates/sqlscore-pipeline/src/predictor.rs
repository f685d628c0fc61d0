use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::dataset::DatasetEntry;
use crate::errors::{PipelineError, PipelineResult};

/// Produces a candidate SQL statement for a question.
///
/// This is the only seam to the natural-language-to-SQL agent. An empty
/// statement counts as an agent failure.
pub trait SqlPredictor: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, entry: &DatasetEntry) -> PipelineResult<String>;
}

/// Replays predictions recorded ahead of time, keyed by question id.
#[derive(Debug, Clone, Default)]
pub struct RecordedPredictions {
    predictions: HashMap<String, String>,
}

#[derive(Deserialize)]
struct PredictionRow {
    #[serde(alias = "question_id")]
    id: serde_json::Value,
    #[serde(alias = "sql", alias = "sql_query")]
    predicted_sql: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PredictionsFile {
    Map(HashMap<String, Option<String>>),
    Rows(Vec<PredictionRow>),
}

impl RecordedPredictions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predictions stored inline in the dataset.
    pub fn from_dataset(entries: &[DatasetEntry]) -> Self {
        let predictions = entries
            .iter()
            .filter_map(|entry| {
                entry
                    .predicted_sql
                    .as_ref()
                    .map(|sql| (entry.id.clone(), sql.clone()))
            })
            .collect();
        Self { predictions }
    }

    /// Read `{"<id>": "<sql>"}` or `[{"id": .., "predicted_sql": ..}]`.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        let predictions = Self::parse(&content).map_err(|err| match err {
            PipelineError::Serialize(source) => PipelineError::json(path, source),
            other => other,
        })?;
        tracing::info!(
            event = "predictions_loaded",
            path = %path.display(),
            predictions = predictions.len(),
        );
        Ok(predictions)
    }

    pub fn parse(content: &str) -> PipelineResult<Self> {
        let predictions = match serde_json::from_str::<PredictionsFile>(content)? {
            PredictionsFile::Map(map) => map
                .into_iter()
                .map(|(id, sql)| (id, sql.unwrap_or_default()))
                .collect(),
            PredictionsFile::Rows(rows) => rows
                .into_iter()
                .map(|row| {
                    let id = match row.id {
                        serde_json::Value::String(text) => text,
                        other => other.to_string(),
                    };
                    (id, row.predicted_sql.unwrap_or_default())
                })
                .collect(),
        };
        Ok(Self { predictions })
    }

    pub fn insert(&mut self, id: impl Into<String>, sql: impl Into<String>) {
        self.predictions.insert(id.into(), sql.into());
    }

    /// Entries from `other` replace entries with the same id.
    pub fn merge(mut self, other: RecordedPredictions) -> Self {
        self.predictions.extend(other.predictions);
        self
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

impl SqlPredictor for RecordedPredictions {
    fn name(&self) -> &str {
        "recorded"
    }

    fn predict(&self, entry: &DatasetEntry) -> PipelineResult<String> {
        self.predictions
            .get(&entry.id)
            .cloned()
            .ok_or_else(|| PipelineError::MissingPrediction(entry.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, predicted: Option<&str>) -> DatasetEntry {
        DatasetEntry {
            id: id.to_string(),
            question: String::new(),
            reference_sql: "SELECT 1".to_string(),
            difficulty: "easy".to_string(),
            predicted_sql: predicted.map(str::to_string),
        }
    }

    #[test]
    fn file_predictions_override_inline_ones() {
        let inline = RecordedPredictions::from_dataset(&[
            entry("a", Some("SELECT 1")),
            entry("b", None),
        ]);
        let file = RecordedPredictions::parse(r#"{"a": "SELECT 2", "b": null}"#).unwrap();
        let merged = inline.merge(file);

        assert_eq!(merged.predict(&entry("a", None)).unwrap(), "SELECT 2");
        assert_eq!(merged.predict(&entry("b", None)).unwrap(), "");
        assert!(matches!(
            merged.predict(&entry("c", None)),
            Err(PipelineError::MissingPrediction(id)) if id == "c"
        ));
    }

    #[test]
    fn parses_row_form_with_numeric_ids() {
        let predictions = RecordedPredictions::parse(
            r#"[{"question_id": 7, "sql_query": "SELECT 7"}, {"id": "x", "predicted_sql": "SELECT 8"}]"#,
        )
        .unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions.predict(&entry("7", None)).unwrap(), "SELECT 7");
        assert_eq!(predictions.predict(&entry("x", None)).unwrap(), "SELECT 8");
    }
}
