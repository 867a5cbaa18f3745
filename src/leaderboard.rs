use std::fmt;
use std::time::Duration;

use crate::scores::ScoreBoard;

pub const TOP_N: usize = 5;
/// On-demand leaderboard messages are deleted after this long.
pub const EXPIRE_AFTER: Duration = Duration::from_secs(5 * 60);
/// Weekly leaderboard messages stay pinned this long.
pub const UNPIN_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub display_name: String,
    pub points: u32,
}

/// Ranked top-N view over the score board. Points descending; ties
/// broken by who earned their first point earliest.
pub fn top_n(board: &ScoreBoard, n: usize) -> Vec<LeaderboardRow> {
    let mut ranked: Vec<_> = board.entries().iter().collect();
    ranked.sort_by(|(id_a, a), (id_b, b)| {
        b.points
            .cmp(&a.points)
            .then_with(|| a.first_scored_at.cmp(&b.first_scored_at))
            .then_with(|| id_a.cmp(id_b))
    });
    ranked
        .into_iter()
        .take(n)
        .map(|(id, entry)| LeaderboardRow {
            display_name: presentable_name(*id, &entry.display_name),
            points: entry.points,
        })
        .collect()
}

/// Users without a proper @username get a stable placeholder.
fn presentable_name(user_id: u64, name: &str) -> String {
    if name.starts_with('@') && name.len() > 1 {
        name.to_string()
    } else {
        format!("User_{user_id}")
    }
}

/// A leaderboard message plus its lifecycle policy: pinned reports are
/// unpinned after `expire_after`, unpinned ones are deleted.
#[derive(Debug, Clone)]
pub struct Report {
    pub title: String,
    pub rows: Vec<LeaderboardRow>,
    pub expire_after: Option<Duration>,
    pub pin: bool,
}

impl Report {
    /// The /leaderboard command: transient, auto-deleted.
    pub fn on_demand(board: &ScoreBoard) -> Self {
        Self {
            title: format!("Leaderboard (Top {TOP_N})"),
            rows: top_n(board, TOP_N),
            expire_after: Some(EXPIRE_AFTER),
            pin: false,
        }
    }

    /// The scheduled weekly report: pinned, unpinned a day later.
    pub fn weekly(board: &ScoreBoard) -> Self {
        Self {
            title: format!("Weekly Leaderboard (Top {TOP_N})"),
            rows: top_n(board, TOP_N),
            expire_after: Some(UNPIN_AFTER),
            pin: true,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f)?;
        writeln!(f, "{:<15} Points", "Username")?;
        if self.rows.is_empty() {
            writeln!(f, "No scores yet.")?;
        } else {
            for row in &self.rows {
                writeln!(f, "{:<15} {}", row.display_name, row.points)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::test_support::MemScoreStore;
    use chrono::{TimeZone, Utc};
    use teloxide::types::UserId;

    async fn board_with(scores: &[(u64, &str, u32)]) -> ScoreBoard {
        let store = MemScoreStore::default();
        let mut board = ScoreBoard::default();
        // Insertion order fixes the tie-break timestamps.
        let mut t = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        for (id, name, points) in scores {
            for _ in 0..*points {
                board
                    .record_correct(UserId(*id), name, t, &store)
                    .await
                    .unwrap();
            }
            t += chrono::Duration::minutes(1);
        }
        board
    }

    #[tokio::test]
    async fn top_n_orders_by_points_then_first_score() {
        let board = board_with(&[
            (1, "@a", 10),
            (2, "@b", 7),
            (3, "@c", 7),
            (4, "@d", 3),
        ])
        .await;

        let rows = top_n(&board, 5);
        let names: Vec<&str> = rows.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["@a", "@b", "@c", "@d"]);
    }

    #[tokio::test]
    async fn top_n_caps_entry_count() {
        let board = board_with(&[
            (1, "@a", 6),
            (2, "@b", 5),
            (3, "@c", 4),
            (4, "@d", 3),
            (5, "@e", 2),
            (6, "@f", 1),
        ])
        .await;

        let rows = top_n(&board, 5);
        assert_eq!(rows.len(), 5);
        assert!(!rows.iter().any(|r| r.display_name == "@f"));
    }

    #[tokio::test]
    async fn missing_username_becomes_placeholder() {
        let board = board_with(&[(42, "Alice", 1)]).await;
        let rows = top_n(&board, 5);
        assert_eq!(rows[0].display_name, "User_42");
    }

    #[tokio::test]
    async fn empty_board_renders_placeholder_line() {
        let board = ScoreBoard::default();
        let report = Report::on_demand(&board);
        assert!(report.to_string().contains("No scores yet."));
        assert_eq!(report.expire_after, Some(EXPIRE_AFTER));
        assert!(!report.pin);
    }

    #[tokio::test]
    async fn weekly_report_is_pinned() {
        let board = ScoreBoard::default();
        let report = Report::weekly(&board);
        assert!(report.pin);
        assert_eq!(report.expire_after, Some(UNPIN_AFTER));
    }
}
