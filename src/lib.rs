use std::sync::Arc;

use tokio::sync::Mutex;

pub mod bank;
pub mod commands;
pub mod config;
pub mod error;
pub mod leaderboard;
pub mod outbox;
pub mod runner;
pub mod schedule;
pub mod scores;
pub mod session;
pub mod store;

/// All quiz state behind one lock; shared between message handlers and
/// the trigger loop.
pub type Ctx = Arc<Mutex<session::QuizContext<store::JsonStore>>>;
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
