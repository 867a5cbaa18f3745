use std::sync::Arc;

use dotenvy::dotenv;
use rand::rngs::StdRng;
use rand::SeedableRng;
use teloxide::dispatching::UpdateHandler;
use teloxide::error_handlers::IgnoringErrorHandlerSafe;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks::{self, Options};
use tracing::level_filters;
use tracing_subscriber::fmt::format::FmtSpan;
use tokio::sync::{mpsc, Mutex};

use group_quiz_bot::bank::QuestionBank;
use group_quiz_bot::commands::{self, Command};
use group_quiz_bot::config::Config;
use group_quiz_bot::outbox::Outbox;
use group_quiz_bot::runner;
use group_quiz_bot::schedule::{self, Timetable};
use group_quiz_bot::scores::ScoreBoard;
use group_quiz_bot::session::QuizContext;
use group_quiz_bot::store::JsonStore;
use group_quiz_bot::Ctx;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let rust_log = std::env::var("LOG_LEVEL").unwrap_or("info".into());
    tracing_subscriber::fmt()
        .with_max_level(level_filters::LevelFilter::from_level(rust_log.parse().unwrap()))
        .json()
        .with_span_events(FmtSpan::ENTER)
        .log_internal_errors(true)
        .with_ansi(true)
        .with_line_number(true)
        .with_target(false)
        .init();

    let config = Arc::new(Config::from_env());
    let store = JsonStore::new(&config.questions_file, &config.scores_file);

    // A quiz bot with no questions is useless; fail loudly at startup.
    let mut rng = StdRng::from_entropy();
    let bank = QuestionBank::load(&store, &mut rng)
        .await
        .expect("Failed to load question bank.");
    let scores = ScoreBoard::load(&store).await;

    let teloxide_token = std::env::var("TELOXIDE_TOKEN").expect("TELOXIDE_TOKEN should be set.");
    let bot = Bot::new(teloxide_token);
    log::info!("Starting bot...");

    let outbox = Outbox::spawn(bot.clone(), config.group_id, config.thread_id);

    let timetable = Timetable::default();
    let enough_questions = bank.len() >= usize::from(timetable.questions_per_session);
    let ctx: Ctx = Arc::new(Mutex::new(QuizContext::new(
        store,
        timetable.clone(),
        bank,
        scores,
    )));

    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
    let scheduler = if enough_questions {
        Some(
            schedule::start(&timetable, trigger_tx, config.monthly_reset)
                .expect("Failed to build the schedule."),
        )
    } else {
        log::error!(
            "Not enough questions to schedule (need at least {})",
            timetable.questions_per_session
        );
        None
    };
    tokio::spawn(runner::run_triggers(
        trigger_rx,
        bot.clone(),
        ctx.clone(),
        outbox.clone(),
        config.clone(),
    ));

    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![ctx, outbox, config.clone()])
        .enable_ctrlc_handler()
        .build();

    if let (Some(url), Some(addr)) = (config.webhook_url.clone(), config.webhook_addr) {
        let listener = webhooks::axum(bot, Options::new(addr, url))
            .await
            .expect("Failed to build a listener.");
        dispatcher
            .dispatch_with_listener(listener, Arc::new(IgnoringErrorHandlerSafe))
            .await;
    } else {
        dispatcher.dispatch().await;
    }

    // No scheduled trigger may fire into a torn-down process.
    if let Some(mut scheduler) = scheduler {
        scheduler.stop();
    }
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(commands::help))
        .branch(case![Command::Start].endpoint(commands::start))
        .branch(case![Command::Sessions].endpoint(commands::sessions))
        .branch(case![Command::Leaderboard].endpoint(commands::leaderboard))
        .branch(case![Command::CheckScore].endpoint(commands::check_score))
        .branch(case![Command::ClearLeaderboard].endpoint(commands::clear_leaderboard))
        .branch(case![Command::TestQuestion(arg)].endpoint(commands::test_question));

    Update::filter_message()
        .filter(|msg: Message, config: Arc<Config>| {
            config.is_quiz_thread(msg.chat.id, msg.thread_id)
        })
        .branch(command_handler)
        .branch(dptree::filter(|msg: Message| runner::is_answer(&msg)).endpoint(runner::take_answer))
}
