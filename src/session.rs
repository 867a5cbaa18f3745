use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use teloxide::types::UserId;
use tokio::task::AbortHandle;

use crate::bank::{Question, QuestionBank};
use crate::error::ScheduleGapError;
use crate::schedule::{NextSession, Timetable};
use crate::scores::ScoreBoard;
use crate::store::ScoreStore;

/// How long a posted question stays answerable.
pub const QUESTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// The one question currently accepting answers.
///
/// Scoring closes as soon as `first_correct` is set; the question is
/// fully gone once the timeout fires or the next question replaces it.
pub struct ActiveQuestion {
    pub question: Question,
    /// Session name and 1-based position, absent for admin test posts.
    pub session: Option<String>,
    pub number: u8,
    pub opened_at: DateTime<Utc>,
    pub generation: u64,
    first_correct: Option<UserId>,
    timeout: Option<AbortHandle>,
}

/// What `submit` decided about one inbound answer.
#[derive(Debug, PartialEq)]
pub enum AnswerOutcome {
    /// Nothing is open; the sender gets a "wait for the next quiz" note.
    NoActiveQuestion,
    /// The user already burned their one attempt for this question.
    AlreadyAttempted,
    Incorrect,
    /// First correct answer across all users; the point is theirs.
    CorrectFirst { new_total: u32, follow_up: FollowUp },
    /// Correct but someone was quicker; acknowledgment only.
    CorrectLate { follow_up: FollowUp },
}

/// What to announce alongside a correct-answer acknowledgment.
#[derive(Debug, PartialEq)]
pub enum FollowUp {
    NextQuestion { time: String },
    SessionEnd { session: String, next: NextSession },
    None,
}

/// All mutable quiz state, owned by the event loop behind one lock so
/// message handling and timer firings never interleave mid-transition.
pub struct QuizContext<S> {
    store: S,
    pub timetable: Timetable,
    pub bank: QuestionBank,
    pub scores: ScoreBoard,
    active: Option<ActiveQuestion>,
    /// (user id, question generation) -> first submitted answer.
    /// Write-once per key; cleared when a new question opens.
    attempts: HashMap<(u64, u64), char>,
    next_generation: u64,
}

impl<S: ScoreStore> QuizContext<S> {
    pub fn new(store: S, timetable: Timetable, bank: QuestionBank, scores: ScoreBoard) -> Self {
        Self {
            store,
            timetable,
            bank,
            scores,
            active: None,
            attempts: HashMap::new(),
            next_generation: 1,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn active(&self) -> Option<&ActiveQuestion> {
        self.active.as_ref()
    }

    /// Pulls the next question for a scheduled slot. The caller posts
    /// it to the chat first and only then opens it; a question that was
    /// never delivered must not sit open collecting timeouts.
    pub fn take_next_question(&mut self, session: &str) -> Result<Question, ScheduleGapError> {
        self.bank.next_question().ok_or_else(|| ScheduleGapError {
            session: session.to_string(),
            remaining: self.bank.remaining(),
            needed: 1,
        })
    }

    /// Admin reset: wipes the board and persists immediately.
    pub async fn reset_scores(&mut self) -> Result<(), crate::error::PersistError> {
        self.scores.reset(&self.store).await
    }

    /// Opens a question, replacing whatever was active: cancels the old
    /// timeout, wipes attempt records, clears the first-correct marker.
    pub fn open_question(
        &mut self,
        question: Question,
        session: Option<String>,
        number: u8,
        now: DateTime<Utc>,
    ) -> u64 {
        if let Some(old) = self.active.take() {
            if let Some(handle) = old.timeout {
                handle.abort();
            }
        }
        self.attempts.clear();

        let generation = self.next_generation;
        self.next_generation += 1;
        self.active = Some(ActiveQuestion {
            question,
            session,
            number,
            opened_at: now,
            generation,
            first_correct: None,
            timeout: None,
        });
        generation
    }

    /// Attaches the timeout task spawned for `generation`. Ignored if
    /// the question already changed underneath.
    pub fn set_timeout_handle(&mut self, generation: u64, handle: AbortHandle) {
        match &mut self.active {
            Some(active) if active.generation == generation => active.timeout = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Timeout path: closes the question only if it is still the same
    /// one and nobody answered correctly. Idempotent; a question closed
    /// by an answer never produces a second "time's up".
    pub fn close_if_current(&mut self, generation: u64) -> Option<Question> {
        match &self.active {
            Some(active) if active.generation == generation && active.first_correct.is_none() => {
                self.active.take().map(|a| a.question)
            }
            _ => None,
        }
    }

    /// Runs one inbound answer through the lifecycle rules.
    pub async fn submit(
        &mut self,
        user: UserId,
        display_name: &str,
        answer: char,
        now: DateTime<Utc>,
    ) -> AnswerOutcome {
        let Some(active) = &mut self.active else {
            return AnswerOutcome::NoActiveQuestion;
        };
        let answer = answer.to_ascii_uppercase();

        let key = (user.0, active.generation);
        if self.attempts.contains_key(&key) {
            log::info!("User {display_name} ({user}) already attempted this question");
            return AnswerOutcome::AlreadyAttempted;
        }
        self.attempts.insert(key, answer);
        log::info!("Recorded first attempt: {display_name} ({user}) -> {answer}");

        if answer != active.question.answer() {
            return AnswerOutcome::Incorrect;
        }

        let follow_up = follow_up_for(&self.timetable, active.session.as_deref(), active.number, now);

        if active.first_correct.is_some() {
            return AnswerOutcome::CorrectLate { follow_up };
        }

        active.first_correct = Some(user);
        if let Some(handle) = active.timeout.take() {
            handle.abort();
        }

        let new_total = match self
            .scores
            .record_correct(user, display_name, now, &self.store)
            .await
        {
            Ok(total) => total,
            Err(e) => {
                // Best-effort persistence; the award stands either way.
                log::error!("Failed to persist score for {display_name} ({user}): {e}");
                self.scores.score_of(user)
            }
        };
        log::info!("Score updated for {display_name} ({user}): {new_total} points");

        AnswerOutcome::CorrectFirst {
            new_total,
            follow_up,
        }
    }
}

fn follow_up_for(
    timetable: &Timetable,
    session: Option<&str>,
    number: u8,
    now: DateTime<Utc>,
) -> FollowUp {
    let Some(session) = session else {
        return FollowUp::None;
    };
    if let Some(time) = timetable.next_question_time(session, number) {
        return FollowUp::NextQuestion { time };
    }
    match timetable.next_session_after(session, now.weekday()) {
        Some(next) => FollowUp::SessionEnd {
            session: session.to_string(),
            next,
        },
        None => FollowUp::None,
    }
}
