use std::net::SocketAddr;
use std::path::PathBuf;

use teloxide::types::{ChatId, MessageId, ThreadId, UserId};
use url::Url;

/// Runtime configuration, collected once at startup from the
/// environment (`.env` supported via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    /// Group the bot serves; everything outside it is ignored.
    pub group_id: ChatId,
    /// Forum topic the quiz lives in.
    pub thread_id: ThreadId,
    /// User allowed to run /clearleaderboard and /testquestion.
    pub admin_id: UserId,
    pub questions_file: PathBuf,
    pub scores_file: PathBuf,
    /// Wipe all scores on the 1st of every month when set.
    pub monthly_reset: bool,
    /// Webhook endpoint; long polling is used when absent.
    pub webhook_url: Option<Url>,
    pub webhook_addr: Option<SocketAddr>,
}

impl Config {
    pub fn from_env() -> Self {
        let group_id = std::env::var("GROUP_ID")
            .expect("GROUP_ID should be set.")
            .parse::<i64>()
            .map(ChatId)
            .expect("GROUP_ID should be a chat id.");
        let thread_id = std::env::var("THREAD_ID")
            .expect("THREAD_ID should be set.")
            .parse::<i32>()
            .map(|id| ThreadId(MessageId(id)))
            .expect("THREAD_ID should be a thread id.");
        let admin_id = std::env::var("ADMIN_ID")
            .expect("ADMIN_ID should be set.")
            .parse::<u64>()
            .map(UserId)
            .expect("ADMIN_ID should be a user id.");

        let questions_file = std::env::var("QUESTIONS_FILE")
            .unwrap_or_else(|_| "questions.json".into())
            .into();
        let scores_file = std::env::var("SCORES_FILE")
            .unwrap_or_else(|_| "scores.json".into())
            .into();

        let monthly_reset = std::env::var("MONTHLY_RESET")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let webhook_url = std::env::var("WEBHOOK_URL")
            .map(|d| d.parse::<Url>().expect("WEBHOOK_URL can't be parsed."))
            .ok();
        let webhook_addr = std::env::var("WEBHOOK_ADDR")
            .map(|d| {
                d.parse::<SocketAddr>()
                    .expect("WEBHOOK_ADDR can't be parsed.")
            })
            .ok();

        Self {
            group_id,
            thread_id,
            admin_id,
            questions_file,
            scores_file,
            monthly_reset,
            webhook_url,
            webhook_addr,
        }
    }

    /// True when the message belongs to the configured group and topic.
    pub fn is_quiz_thread(&self, chat: ChatId, thread: Option<ThreadId>) -> bool {
        chat == self.group_id && thread == Some(self.thread_id)
    }
}
