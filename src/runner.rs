use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use teloxide::payloads::{PinChatMessageSetters, UnpinChatMessageSetters};
use teloxide::prelude::Requester;
use teloxide::types::{ChatId, Message, MessageId};
use teloxide::{ApiError, Bot, RequestError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

use crate::bank::{Question, OPTION_LABELS};
use crate::config::Config;
use crate::leaderboard::Report;
use crate::outbox::Outbox;
use crate::schedule::Trigger;
use crate::session::{AnswerOutcome, FollowUp, QUESTION_TIMEOUT};
use crate::{Ctx, HandlerResult};

/// Drains the scheduler's trigger queue. Together with the message
/// handlers this is the single logical thread owning all quiz state
/// transitions; the context lock serializes the two.
pub async fn run_triggers(
    mut rx: UnboundedReceiver<Trigger>,
    bot: Bot,
    ctx: Ctx,
    outbox: Outbox,
    config: Arc<Config>,
) {
    while let Some(trigger) = rx.recv().await {
        match trigger {
            Trigger::Announce {
                session,
                start_time,
            } => announce_session(&ctx, &outbox, &session, &start_time).await,
            Trigger::Post { session, number } => {
                post_scheduled(&ctx, &outbox, &session, number).await
            }
            Trigger::WeeklyLeaderboard => {
                log::info!("Posting weekly leaderboard");
                publish_leaderboard(&bot, &ctx, &outbox, &config, true).await;
            }
            Trigger::MonthlyReset => monthly_reset(&ctx, &outbox).await,
        }
    }
}

async fn announce_session(ctx: &Ctx, outbox: &Outbox, session: &str, start_time: &str) {
    let (needed, lead, remaining) = {
        let guard = ctx.lock().await;
        (
            guard.timetable.questions_per_session,
            guard.timetable.announce_lead_min,
            guard.bank.remaining(),
        )
    };
    if remaining < usize::from(needed) {
        // Warn early; the post trigger skips once the bank runs dry.
        log::warn!(
            "{}",
            crate::error::ScheduleGapError {
                session: session.to_string(),
                remaining,
                needed: usize::from(needed),
            }
        );
    }
    log::info!("Posting announcement for {session} session at {start_time}");
    outbox.notify(format!(
        "Quiz session ({session}) with {needed} questions starts in {lead} minutes at {start_time}! Get ready!"
    ));
}

async fn post_scheduled(ctx: &Ctx, outbox: &Outbox, session: &str, number: u8) {
    let question = {
        let mut guard = ctx.lock().await;
        match guard.take_next_question(session) {
            Ok(q) => q,
            Err(e) => {
                log::error!("{e}");
                outbox.notify("Error: No more questions available. Please contact the admin.");
                return;
            }
        }
    };
    post_question(ctx, outbox, question, Some(session.to_string()), number).await;
}

/// Delivers a question and opens it for answers. Delivery failure
/// means no question: nothing opens and no timeout is armed.
pub async fn post_question(
    ctx: &Ctx,
    outbox: &Outbox,
    question: Question,
    session: Option<String>,
    number: u8,
) {
    log::info!("Posting question: {}", question.prompt());
    if let Err(e) = outbox.send(question.to_string()).await {
        log::error!("Error posting question: {e}");
        return;
    }

    let mut guard = ctx.lock().await;
    let generation = guard.open_question(question, session, number, Utc::now());
    let timeout = tokio::spawn(close_on_timeout(ctx.clone(), outbox.clone(), generation));
    guard.set_timeout_handle(generation, timeout.abort_handle());
    log::info!("Question posted successfully");
}

async fn close_on_timeout(ctx: Ctx, outbox: Outbox, generation: u64) {
    sleep(QUESTION_TIMEOUT).await;
    let mut guard = ctx.lock().await;
    if let Some(question) = guard.close_if_current(generation) {
        log::info!(
            "Closed question by timeout: {}, answer: {}",
            question.prompt(),
            question.answer()
        );
        outbox.notify(format!(
            "Time's up! The correct answer was {}: {}.",
            question.answer(),
            question.correct_text()
        ));
    }
}

async fn monthly_reset(ctx: &Ctx, outbox: &Outbox) {
    log::info!("Monthly score reset");
    let mut guard = ctx.lock().await;
    if let Err(e) = guard.reset_scores().await {
        log::error!("Failed to persist monthly reset: {e}");
    }
    drop(guard);
    outbox.notify("New month, fresh leaderboard! All scores have been reset.");
}

/// Sends a leaderboard and schedules its expiry: pinned reports get
/// unpinned, plain ones get deleted.
pub async fn publish_leaderboard(
    bot: &Bot,
    ctx: &Ctx,
    outbox: &Outbox,
    config: &Config,
    weekly: bool,
) {
    let report = {
        let guard = ctx.lock().await;
        if weekly {
            Report::weekly(&guard.scores)
        } else {
            Report::on_demand(&guard.scores)
        }
    };

    let Ok(sent) = outbox.send(report.to_string()).await else {
        // Delivery failures are already logged by the outbox.
        return;
    };

    if report.pin {
        if let Err(e) = bot
            .pin_chat_message(config.group_id, sent.id)
            .disable_notification(true)
            .await
        {
            log::error!("Failed to pin leaderboard: {e}");
        }
        if let Some(after) = report.expire_after {
            tokio::spawn(unpin_later(bot.clone(), config.group_id, sent.id, after));
        }
    } else if let Some(after) = report.expire_after {
        tokio::spawn(delete_later(bot.clone(), config.group_id, sent.id, after));
    }
}

async fn unpin_later(bot: Bot, chat: ChatId, id: MessageId, after: Duration) {
    sleep(after).await;
    if let Err(e) = bot.unpin_chat_message(chat).message_id(id).await {
        log::error!("Failed to unpin leaderboard: {e}");
    }
}

async fn delete_later(bot: Bot, chat: ChatId, id: MessageId, after: Duration) {
    sleep(after).await;
    match bot.delete_message(chat, id).await {
        Ok(_) => {}
        Err(RequestError::RetryAfter(d)) => {
            log::warn!(
                "Rate limit hit while deleting leaderboard, retrying in {}s",
                d.duration().as_secs()
            );
            sleep(d.duration()).await;
            if let Err(e) = bot.delete_message(chat, id).await {
                log::error!("Error deleting leaderboard message: {e}");
            }
        }
        Err(RequestError::Api(ApiError::MessageToDeleteNotFound)) => {
            log::info!("Leaderboard message already deleted");
        }
        Err(e) => log::error!("Error deleting leaderboard message: {e}"),
    }
}

/// A bare option letter (any case) counts as an answer attempt.
pub fn parse_answer(text: &str) -> Option<char> {
    let mut chars = text.trim().chars();
    let label = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !OPTION_LABELS.contains(&label) {
        return None;
    }
    Some(label)
}

pub fn is_answer(msg: &Message) -> bool {
    msg.text().is_some_and(|t| parse_answer(t).is_some())
}

pub async fn take_answer(msg: Message, ctx: Ctx, outbox: Outbox) -> HandlerResult {
    let Some(answer) = msg.text().and_then(parse_answer) else {
        return Ok(());
    };
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let display_name = user
        .username
        .as_ref()
        .map(|u| format!("@{u}"))
        .unwrap_or_else(|| user.first_name.clone());
    log::info!("Received answer {answer} from {display_name} ({})", user.id);

    let outcome = {
        let mut guard = ctx.lock().await;
        guard
            .submit(user.id, &display_name, answer, Utc::now())
            .await
    };

    match outcome {
        AnswerOutcome::NoActiveQuestion => {
            outbox.notify("No active question right now. Wait for the next quiz!");
        }
        AnswerOutcome::AlreadyAttempted => {}
        AnswerOutcome::Incorrect => {
            outbox.notify(format!(
                "Sorry, {display_name}, that's incorrect. Try the next one!"
            ));
        }
        AnswerOutcome::CorrectFirst { follow_up, .. } => {
            let reply = format!(
                "Correct, {display_name}! You're the first to answer correctly and earned 1 point!"
            );
            outbox.notify(with_follow_up(reply, &follow_up));
        }
        AnswerOutcome::CorrectLate { follow_up } => {
            let reply = format!(
                "Correct, {display_name}, but someone else was first. Try to be quicker next time!"
            );
            outbox.notify(with_follow_up(reply, &follow_up));
        }
    }
    Ok(())
}

fn with_follow_up(mut reply: String, follow_up: &FollowUp) -> String {
    match follow_up {
        FollowUp::NextQuestion { time } => {
            reply.push_str(&format!("\nThe next question will be posted at {time}."));
        }
        FollowUp::SessionEnd { session, next } => {
            let day = if next.is_next_day {
                format!(" tomorrow, {}", next.next_day_name)
            } else {
                String::new()
            };
            reply.push_str(&format!(
                "\nThis concludes the {session} session! The next session ({}) starts at {}{day}.",
                next.name, next.time
            ));
        }
        FollowUp::None => {}
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::NextSession;

    #[test]
    fn parse_answer_accepts_bare_letters_only() {
        assert_eq!(parse_answer("A"), Some('A'));
        assert_eq!(parse_answer(" c "), Some('C'));
        assert_eq!(parse_answer("d"), Some('D'));
        assert_eq!(parse_answer("E"), None);
        assert_eq!(parse_answer("AB"), None);
        assert_eq!(parse_answer("A)"), None);
        assert_eq!(parse_answer(""), None);
    }

    #[test]
    fn follow_up_lines_match_session_flow() {
        let mid = with_follow_up(
            "Correct!".into(),
            &FollowUp::NextQuestion {
                time: "10:05 UTC".into(),
            },
        );
        assert!(mid.ends_with("The next question will be posted at 10:05 UTC."));

        let end = with_follow_up(
            "Correct!".into(),
            &FollowUp::SessionEnd {
                session: "Evening".into(),
                next: NextSession {
                    name: "Morning".into(),
                    time: "10:00 UTC".into(),
                    is_next_day: true,
                    next_day_name: "Saturday".into(),
                },
            },
        );
        assert!(end.contains("This concludes the Evening session!"));
        assert!(end.ends_with("starts at 10:00 UTC tomorrow, Saturday."));

        let bare = with_follow_up("Correct!".into(), &FollowUp::None);
        assert_eq!(bare, "Correct!");
    }
}
