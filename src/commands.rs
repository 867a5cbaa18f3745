use std::sync::Arc;

use teloxide::types::Message;
use teloxide::utils::command::BotCommands;
use teloxide::Bot;

use crate::bank::Question;
use crate::config::Config;
use crate::outbox::Outbox;
use crate::runner;
use crate::{Ctx, HandlerResult};

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "show how the quiz works.")]
    Help,
    #[command(description = "confirm the bot is running.")]
    Start,
    #[command(description = "list session times.")]
    Sessions,
    #[command(description = "view top 5 scores.")]
    Leaderboard,
    #[command(description = "check your score.")]
    CheckScore,
    #[command(description = "admin: reset all scores.")]
    ClearLeaderboard,
    #[command(description = "admin: post a question out of schedule.")]
    TestQuestion(String),
}

fn is_admin(msg: &Message, config: &Config) -> bool {
    msg.from
        .as_ref()
        .map(|u| u.id == config.admin_id)
        .unwrap_or(false)
}

pub async fn help(ctx: Ctx, outbox: Outbox) -> HandlerResult {
    let per_session = ctx.lock().await.timetable.questions_per_session;
    outbox.notify(format!(
        "Welcome to the Group Quiz Bot!\n\
         - Questions are posted in the quiz topic ({per_session} every morning, noon, and evening, Monday to Friday).\n\
         - Reply with A, B, C, or D to answer (5-minute time limit).\n\
         - Only the first correct answer earns a point.\n\n\
         {}",
        Command::descriptions()
    ));
    log::info!("/help command processed successfully");
    Ok(())
}

pub async fn start(outbox: Outbox) -> HandlerResult {
    outbox.notify("Quiz bot started! Questions will be posted in the quiz topic.");
    log::info!("/start command processed successfully");
    Ok(())
}

pub async fn sessions(ctx: Ctx, outbox: Outbox) -> HandlerResult {
    let description = ctx.lock().await.timetable.describe();
    outbox.notify(description);
    log::info!("/sessions command processed successfully");
    Ok(())
}

pub async fn leaderboard(
    bot: Bot,
    ctx: Ctx,
    outbox: Outbox,
    config: Arc<Config>,
) -> HandlerResult {
    runner::publish_leaderboard(&bot, &ctx, &outbox, &config, false).await;
    log::info!("/leaderboard command processed successfully");
    Ok(())
}

pub async fn check_score(msg: Message, ctx: Ctx, outbox: Outbox) -> HandlerResult {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let score = ctx.lock().await.scores.score_of(user.id);
    outbox.notify(format!("Your current score is {score} points."));
    log::info!("/checkscore command processed successfully");
    Ok(())
}

pub async fn clear_leaderboard(
    msg: Message,
    ctx: Ctx,
    outbox: Outbox,
    config: Arc<Config>,
) -> HandlerResult {
    if !is_admin(&msg, &config) {
        log::info!("Ignoring /clearleaderboard: sender is not admin");
        return Ok(());
    }
    let mut guard = ctx.lock().await;
    if let Err(e) = guard.reset_scores().await {
        // The board is already empty in memory; only the save failed.
        log::error!("Failed to persist cleared leaderboard: {e}");
    }
    drop(guard);
    outbox.notify("Leaderboard cleared!");
    log::info!("/clearleaderboard command processed successfully");
    Ok(())
}

pub async fn test_question(
    msg: Message,
    ctx: Ctx,
    outbox: Outbox,
    config: Arc<Config>,
    arg: String,
) -> HandlerResult {
    if !is_admin(&msg, &config) {
        log::info!("Ignoring /testquestion: sender is not admin");
        return Ok(());
    }

    let arg = arg.trim();
    let question = if arg.is_empty() {
        Question::new(
            "Test question?".into(),
            ["A".into(), "B".into(), "C".into(), "D".into()],
            'C',
        )
    } else {
        let guard = ctx.lock().await;
        let bank_len = guard.bank.len();
        match arg
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| guard.bank.get(idx).cloned())
        {
            Some(q) => q,
            None => {
                drop(guard);
                outbox.notify(format!(
                    "Invalid question index. Please use a number between 1 and {bank_len}."
                ));
                return Ok(());
            }
        }
    };

    runner::post_question(&ctx, &outbox, question, None, 0).await;
    log::info!("/testquestion command processed successfully");
    Ok(())
}
