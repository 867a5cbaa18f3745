use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teloxide::types::UserId;

use crate::error::PersistError;
use crate::store::ScoreStore;

/// One user's standing. The display name is denormalized; it is
/// refreshed every time the user scores, so it can only go stale for
/// users who stopped earning points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEntry {
    #[serde(rename = "username")]
    pub display_name: String,
    pub points: u32,
    /// When the user earned their first point; leaderboard tie-break.
    /// Absent in score files written before this field existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_scored_at: Option<DateTime<Utc>>,
}

/// Point totals keyed by Telegram user id. Mutated only through
/// `record_correct` and `reset`; persisted after every mutation.
#[derive(Default)]
pub struct ScoreBoard {
    entries: HashMap<u64, ScoreEntry>,
}

impl ScoreBoard {
    /// Loads scores from the store. Missing or unusable data starts an
    /// empty board and persists it; unlike questions, this is not fatal.
    pub async fn load<S: ScoreStore>(store: &S) -> Self {
        match store.load_scores().await {
            Ok(Some(entries)) => {
                log::info!("Loaded scores for {} users", entries.len());
                Self { entries }
            }
            Ok(None) => {
                let board = Self::default();
                if let Err(e) = store.save_scores(&board.entries).await {
                    log::error!("Failed to initialize score file: {e}");
                }
                board
            }
            Err(e) => {
                log::error!("Error loading scores, starting empty: {e}");
                Self::default()
            }
        }
    }

    /// Awards one point for a qualifying first-correct answer and
    /// persists the board. On a persistence failure the in-memory
    /// increment stands; the returned error only means the save failed.
    pub async fn record_correct<S: ScoreStore>(
        &mut self,
        user: UserId,
        display_name: &str,
        now: DateTime<Utc>,
        store: &S,
    ) -> Result<u32, PersistError> {
        let entry = self.entries.entry(user.0).or_insert_with(|| ScoreEntry {
            display_name: display_name.to_string(),
            points: 0,
            first_scored_at: None,
        });
        entry.points += 1;
        entry.display_name = display_name.to_string();
        entry.first_scored_at.get_or_insert(now);
        let total = entry.points;

        store.save_scores(&self.entries).await?;
        Ok(total)
    }

    /// Clears all entries and persists immediately.
    pub async fn reset<S: ScoreStore>(&mut self, store: &S) -> Result<(), PersistError> {
        self.entries.clear();
        store.save_scores(&self.entries).await
    }

    pub fn score_of(&self, user: UserId) -> u32 {
        self.entries.get(&user.0).map(|e| e.points).unwrap_or(0)
    }

    pub fn entries(&self) -> &HashMap<u64, ScoreEntry> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory score store for tests; counts saves so tests can
    /// assert persistence happened.
    #[derive(Default)]
    pub struct MemScoreStore {
        pub saves: AtomicUsize,
        pub fail_saves: bool,
    }

    impl ScoreStore for MemScoreStore {
        async fn load_scores(&self) -> Result<Option<HashMap<u64, ScoreEntry>>, PersistError> {
            Ok(None)
        }

        async fn save_scores(&self, _scores: &HashMap<u64, ScoreEntry>) -> Result<(), PersistError> {
            if self.fail_saves {
                return Err(PersistError::Io(std::io::Error::other("disk full")));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MemScoreStore;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn record_correct_increments_and_persists() {
        let store = MemScoreStore::default();
        let mut board = ScoreBoard::default();

        let total = board
            .record_correct(UserId(1), "@alice", Utc::now(), &store)
            .await
            .unwrap();
        assert_eq!(total, 1);
        let total = board
            .record_correct(UserId(1), "@alice", Utc::now(), &store)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(board.score_of(UserId(1)), 2);
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persist_failure_keeps_memory_authoritative() {
        let store = MemScoreStore {
            fail_saves: true,
            ..Default::default()
        };
        let mut board = ScoreBoard::default();

        let res = board
            .record_correct(UserId(7), "@bob", Utc::now(), &store)
            .await;
        assert!(res.is_err());
        assert_eq!(board.score_of(UserId(7)), 1);
    }

    #[tokio::test]
    async fn reset_clears_and_persists() {
        let store = MemScoreStore::default();
        let mut board = ScoreBoard::default();
        board
            .record_correct(UserId(1), "@alice", Utc::now(), &store)
            .await
            .unwrap();

        board.reset(&store).await.unwrap();
        assert_eq!(board.score_of(UserId(1)), 0);
        assert!(board.is_empty());
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_user_scores_zero() {
        let board = ScoreBoard::default();
        assert_eq!(board.score_of(UserId(99)), 0);
    }

    #[tokio::test]
    async fn display_name_refreshes_on_score() {
        let store = MemScoreStore::default();
        let mut board = ScoreBoard::default();
        board
            .record_correct(UserId(1), "@old", Utc::now(), &store)
            .await
            .unwrap();
        board
            .record_correct(UserId(1), "@new", Utc::now(), &store)
            .await
            .unwrap();
        assert_eq!(board.entries()[&1].display_name, "@new");
    }

    #[tokio::test]
    async fn first_scored_at_is_write_once() {
        let store = MemScoreStore::default();
        let mut board = ScoreBoard::default();
        let t0 = Utc::now();
        board
            .record_correct(UserId(1), "@a", t0, &store)
            .await
            .unwrap();
        board
            .record_correct(UserId(1), "@a", t0 + chrono::Duration::hours(1), &store)
            .await
            .unwrap();
        assert_eq!(board.entries()[&1].first_scored_at, Some(t0));
    }
}
