use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{PipelineError, PipelineResult};

pub const UNKNOWN_DIFFICULTY: &str = "unknown";

/// One benchmark question with its reference statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    #[serde(alias = "question_id", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub question: String,
    #[serde(alias = "query", alias = "ground_truth_sql")]
    pub reference_sql: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    /// A recorded prediction shipped alongside the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_sql: Option<String>,
}

fn default_difficulty() -> String {
    UNKNOWN_DIFFICULTY.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DatasetFile {
    List(Vec<DatasetEntry>),
    Wrapped { questions: Vec<DatasetEntry> },
}

/// Read a dataset: a JSON array of entries, or `{"questions": [...]}`.
pub fn load_dataset(path: &Path) -> PipelineResult<Vec<DatasetEntry>> {
    let content = std::fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
    let entries = parse_dataset(&content).map_err(|err| match err {
        PipelineError::Serialize(source) => PipelineError::json(path, source),
        other => other,
    })?;

    tracing::info!(
        event = "dataset_loaded",
        path = %path.display(),
        questions = entries.len(),
        difficulties = ?difficulty_counts(&entries),
    );
    Ok(entries)
}

pub fn parse_dataset(content: &str) -> PipelineResult<Vec<DatasetEntry>> {
    let entries = match serde_json::from_str::<DatasetFile>(content)? {
        DatasetFile::List(entries) => entries,
        DatasetFile::Wrapped { questions } => questions,
    };
    validate_entries(&entries)?;
    Ok(entries)
}

fn validate_entries(entries: &[DatasetEntry]) -> PipelineResult<()> {
    if entries.is_empty() {
        return Err(PipelineError::InvalidDataset(
            "dataset contains no questions".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for entry in entries {
        if entry.id.trim().is_empty() {
            return Err(PipelineError::InvalidDataset(
                "question with an empty id".to_string(),
            ));
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(PipelineError::InvalidDataset(format!(
                "duplicate question id '{}'",
                entry.id
            )));
        }
        if entry.reference_sql.trim().is_empty() {
            return Err(PipelineError::InvalidDataset(format!(
                "question '{}' has no reference query",
                entry.id
            )));
        }
    }
    Ok(())
}

/// Number of questions per difficulty label.
pub fn difficulty_counts(entries: &[DatasetEntry]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.difficulty.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_numeric_ids_and_query_alias() {
        let entries = parse_dataset(
            r#"[
                {"id": 1, "question": "Quantas mortes?", "query": "SELECT COUNT(*) FROM mortes", "difficulty": "easy"},
                {"question_id": "q2", "reference_sql": "SELECT 1"}
            ]"#,
        )
        .unwrap();

        assert_eq!(entries[0].id, "1");
        assert_eq!(entries[0].reference_sql, "SELECT COUNT(*) FROM mortes");
        assert_eq!(entries[1].id, "q2");
        assert_eq!(entries[1].difficulty, UNKNOWN_DIFFICULTY);
        assert_eq!(entries[1].predicted_sql, None);
    }

    #[test]
    fn accepts_wrapped_form() {
        let entries =
            parse_dataset(r#"{"questions": [{"id": "a", "query": "SELECT 1"}]}"#).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn rejects_duplicates_and_blank_references() {
        let duplicate = parse_dataset(
            r#"[{"id": "a", "query": "SELECT 1"}, {"id": "a", "query": "SELECT 2"}]"#,
        );
        assert!(matches!(duplicate, Err(PipelineError::InvalidDataset(_))));

        let blank = parse_dataset(r#"[{"id": "a", "query": "   "}]"#);
        assert!(matches!(blank, Err(PipelineError::InvalidDataset(_))));

        assert!(matches!(
            parse_dataset("[]"),
            Err(PipelineError::InvalidDataset(_))
        ));
    }

    #[test]
    fn counts_difficulties() {
        let entries = parse_dataset(
            r#"[
                {"id": "a", "query": "SELECT 1", "difficulty": "easy"},
                {"id": "b", "query": "SELECT 2", "difficulty": "easy"},
                {"id": "c", "query": "SELECT 3", "difficulty": "hard"}
            ]"#,
        )
        .unwrap();
        let counts = difficulty_counts(&entries);
        assert_eq!(counts["easy"], 2);
        assert_eq!(counts["hard"], 1);
    }
}
