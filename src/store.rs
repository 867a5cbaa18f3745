use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::bank::RawQuestion;
use crate::error::{LoadError, PersistError};
use crate::scores::ScoreEntry;

/// Backing store for the question bank.
pub trait QuestionStore {
    async fn load_questions(&self) -> Result<Vec<RawQuestion>, LoadError>;

    async fn save_questions(&self, questions: &[RawQuestion]) -> Result<(), PersistError>;
}

/// Backing store for the score board.
pub trait ScoreStore {
    /// `Ok(None)` means no usable score data exists yet; the caller
    /// starts from an empty board.
    async fn load_scores(&self) -> Result<Option<HashMap<u64, ScoreEntry>>, PersistError>;

    async fn save_scores(&self, scores: &HashMap<u64, ScoreEntry>) -> Result<(), PersistError>;
}

/// Plain JSON files on local disk, one for questions and one for
/// scores. No transactions; last write wins.
pub struct JsonStore {
    questions_path: PathBuf,
    scores_path: PathBuf,
}

impl JsonStore {
    pub fn new(questions_path: impl Into<PathBuf>, scores_path: impl Into<PathBuf>) -> Self {
        Self {
            questions_path: questions_path.into(),
            scores_path: scores_path.into(),
        }
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<String>, std::io::Error> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl QuestionStore for JsonStore {
    async fn load_questions(&self) -> Result<Vec<RawQuestion>, LoadError> {
        let path_display = self.questions_path.display().to_string();
        let Some(data) = read_if_exists(&self.questions_path).await? else {
            return Err(LoadError::NotFound(path_display));
        };
        if data.trim().is_empty() {
            return Err(LoadError::EmptyData(path_display));
        }
        Ok(serde_json::from_str(&data)?)
    }

    async fn save_questions(&self, questions: &[RawQuestion]) -> Result<(), PersistError> {
        let data = serde_json::to_string_pretty(questions)?;
        tokio::fs::write(&self.questions_path, data).await?;
        log::info!("Questions saved successfully");
        Ok(())
    }
}

impl ScoreStore for JsonStore {
    async fn load_scores(&self) -> Result<Option<HashMap<u64, ScoreEntry>>, PersistError> {
        let Some(data) = read_if_exists(&self.scores_path).await? else {
            log::info!("Score file does not exist yet, starting with empty scores");
            return Ok(None);
        };
        if data.trim().is_empty() {
            log::info!("Score file is empty, starting with empty scores");
            return Ok(None);
        }
        match serde_json::from_str(&data) {
            Ok(scores) => Ok(Some(scores)),
            Err(e) => {
                // Corrupt score data is not worth crashing over.
                log::error!("Score file contains invalid data, starting empty: {e}");
                Ok(None)
            }
        }
    }

    async fn save_scores(&self, scores: &HashMap<u64, ScoreEntry>) -> Result<(), PersistError> {
        let data = serde_json::to_string_pretty(scores)?;
        tokio::fs::write(&self.scores_path, data).await?;
        log::info!("Scores saved successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> JsonStore {
        JsonStore::new(
            dir.path().join("questions.json"),
            dir.path().join("scores.json"),
        )
    }

    #[tokio::test]
    async fn missing_questions_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.load_questions().await,
            Err(LoadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_questions_file_is_empty_data() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("questions.json"), "  \n").unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.load_questions().await,
            Err(LoadError::EmptyData(_))
        ));
    }

    #[tokio::test]
    async fn scores_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.load_scores().await.unwrap().is_none());

        let mut scores = HashMap::new();
        scores.insert(
            42,
            ScoreEntry {
                display_name: "@alice".into(),
                points: 3,
                first_scored_at: None,
            },
        );
        store.save_scores(&scores).await.unwrap();

        let loaded = store.load_scores().await.unwrap().unwrap();
        assert_eq!(loaded[&42].points, 3);
        assert_eq!(loaded[&42].display_name, "@alice");
    }

    #[tokio::test]
    async fn corrupt_scores_fall_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scores.json"), "[1, 2, 3]").unwrap();
        let store = store_in(&dir);
        assert!(store.load_scores().await.unwrap().is_none());
    }
}
