use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use chrono::{Utc, Weekday};
use cron::Schedule;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// One themed block of questions at a fixed time of day (UTC).
#[derive(Debug, Clone)]
pub struct SessionSlot {
    pub name: String,
    pub hour: u8,
    pub minute: u8,
}

/// Weekly recurring quiz timetable. All times are UTC; no DST games.
#[derive(Debug, Clone)]
pub struct Timetable {
    pub slots: Vec<SessionSlot>,
    pub weekdays: Vec<Weekday>,
    pub questions_per_session: u8,
    pub post_interval_min: u8,
    pub announce_lead_min: u8,
}

impl Default for Timetable {
    fn default() -> Self {
        let slot = |name: &str, hour, minute| SessionSlot {
            name: name.to_string(),
            hour,
            minute,
        };
        Self {
            slots: vec![
                slot("Morning", 10, 0),
                slot("Noon", 14, 0),
                slot("Evening", 19, 30),
            ],
            weekdays: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            questions_per_session: 6,
            post_interval_min: 5,
            announce_lead_min: 30,
        }
    }
}

/// A point on the weekly grid, minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyInstant {
    pub weekday: Weekday,
    pub hour: u8,
    pub minute: u8,
}

impl WeeklyInstant {
    fn cron_expr(&self) -> String {
        format!("0 {} {} * * {}", self.minute, self.hour, weekday_abbr(self.weekday))
    }
}

/// Shifts an instant by whole minutes, rolling minute underflow into
/// the hour and hour over/underflow into the adjacent weekday
/// (Mon 00:10 − 30 min → Sun 23:40).
pub fn shift_minutes(at: WeeklyInstant, delta_min: i32) -> WeeklyInstant {
    const MINUTES_PER_DAY: i32 = 24 * 60;
    let total = i32::from(at.hour) * 60 + i32::from(at.minute) + delta_min;
    let day_shift = total.div_euclid(MINUTES_PER_DAY);
    let rem = total.rem_euclid(MINUTES_PER_DAY);

    let mut weekday = at.weekday;
    for _ in 0..day_shift.abs() {
        weekday = if day_shift < 0 {
            weekday.pred()
        } else {
            weekday.succ()
        };
    }

    WeeklyInstant {
        weekday,
        hour: (rem / 60) as u8,
        minute: (rem % 60) as u8,
    }
}

pub fn format_time(hour: u8, minute: u8) -> String {
    format!("{hour:02}:{minute:02} UTC")
}

fn weekday_abbr(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// What comes after the session that just ended.
#[derive(Debug, Clone, PartialEq)]
pub struct NextSession {
    pub name: String,
    pub time: String,
    pub is_next_day: bool,
    pub next_day_name: String,
}

impl Timetable {
    pub fn slot(&self, name: &str) -> Option<&SessionSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    fn slot_start(&self, weekday: Weekday, slot: &SessionSlot) -> WeeklyInstant {
        WeeklyInstant {
            weekday,
            hour: slot.hour,
            minute: slot.minute,
        }
    }

    pub fn announce_instant(&self, weekday: Weekday, slot: &SessionSlot) -> WeeklyInstant {
        shift_minutes(
            self.slot_start(weekday, slot),
            -i32::from(self.announce_lead_min),
        )
    }

    /// Post instant for the i-th question of the session (0-based).
    pub fn post_instant(&self, weekday: Weekday, slot: &SessionSlot, i: u8) -> WeeklyInstant {
        shift_minutes(
            self.slot_start(weekday, slot),
            i32::from(i) * i32::from(self.post_interval_min),
        )
    }

    /// Formatted post time of the question following `question_number`
    /// (1-based), or `None` if it was the session's last question.
    pub fn next_question_time(&self, session: &str, question_number: u8) -> Option<String> {
        if question_number >= self.questions_per_session {
            return None;
        }
        let slot = self.slot(session)?;
        let at = self.post_instant(Weekday::Mon, slot, question_number);
        Some(format_time(at.hour, at.minute))
    }

    /// The session that follows `session` in the daily cycle. `today`
    /// decides which calendar day name a wrap-around lands on.
    pub fn next_session_after(&self, session: &str, today: Weekday) -> Option<NextSession> {
        let idx = self.slots.iter().position(|s| s.name == session)?;
        let next_idx = (idx + 1) % self.slots.len();
        let next = &self.slots[next_idx];
        let is_next_day = next_idx == 0;
        Some(NextSession {
            name: next.name.clone(),
            time: format_time(next.hour, next.minute),
            is_next_day,
            next_day_name: if is_next_day {
                weekday_name(today.succ()).to_string()
            } else {
                String::new()
            },
        })
    }

    /// Human-readable timetable for /sessions.
    pub fn describe(&self) -> String {
        let mut out = String::from("Quiz Session Times (UTC, Monday-Friday):\n");
        for slot in &self.slots {
            let _ = writeln!(
                out,
                "{} Session: {}",
                slot.name,
                format_time(slot.hour, slot.minute)
            );
        }
        let _ = write!(
            out,
            "Announcements are posted {} minutes before each session.",
            self.announce_lead_min
        );
        out
    }
}

/// Timer firings delivered to the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Pre-session heads-up, fired `announce_lead_min` before start.
    Announce { session: String, start_time: String },
    /// Post the `number`-th question (1-based) of `session`.
    Post { session: String, number: u8 },
    WeeklyLeaderboard,
    MonthlyReset,
}

/// Running scheduler tasks. Dropping or stopping the handle aborts
/// every trigger, so a reschedule can never double-fire.
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns one task per trigger: each waits for its next cron fire time
/// and pushes a `Trigger` into the event loop's queue.
pub fn start(
    timetable: &Timetable,
    tx: UnboundedSender<Trigger>,
    monthly_reset: bool,
) -> Result<SchedulerHandle, cron::error::Error> {
    let mut tasks = Vec::new();

    for &weekday in &timetable.weekdays {
        for slot in &timetable.slots {
            let announce_at = timetable.announce_instant(weekday, slot);
            log::info!(
                "Scheduling announcement for {} session: {}",
                slot.name,
                announce_at.cron_expr()
            );
            tasks.push(spawn_trigger(
                &announce_at.cron_expr(),
                tx.clone(),
                Trigger::Announce {
                    session: slot.name.clone(),
                    start_time: format_time(slot.hour, slot.minute),
                },
            )?);

            for i in 0..timetable.questions_per_session {
                let post_at = timetable.post_instant(weekday, slot, i);
                log::info!(
                    "Scheduling question {} for {} session: {}",
                    i + 1,
                    slot.name,
                    post_at.cron_expr()
                );
                tasks.push(spawn_trigger(
                    &post_at.cron_expr(),
                    tx.clone(),
                    Trigger::Post {
                        session: slot.name.clone(),
                        number: i + 1,
                    },
                )?);
            }
        }
    }

    // Saturday morning and evening recap.
    tasks.push(spawn_trigger(
        "0 0 7,19 * * Sat",
        tx.clone(),
        Trigger::WeeklyLeaderboard,
    )?);

    if monthly_reset {
        tasks.push(spawn_trigger("0 0 0 1 * *", tx, Trigger::MonthlyReset)?);
    }

    Ok(SchedulerHandle { tasks })
}

fn spawn_trigger(
    expr: &str,
    tx: UnboundedSender<Trigger>,
    trigger: Trigger,
) -> Result<JoinHandle<()>, cron::error::Error> {
    let schedule = Schedule::from_str(expr)?;
    Ok(tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = schedule.upcoming(Utc).next() else {
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            sleep(wait).await;
            if tx.send(trigger.clone()).is_err() {
                // Event loop is gone; nothing left to fire for.
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(weekday: Weekday, hour: u8, minute: u8) -> WeeklyInstant {
        WeeklyInstant {
            weekday,
            hour,
            minute,
        }
    }

    #[test]
    fn announce_is_thirty_minutes_before_start() {
        let tt = Timetable::default();
        let slot = tt.slot("Morning").unwrap().clone();
        assert_eq!(
            tt.announce_instant(Weekday::Mon, &slot),
            at(Weekday::Mon, 9, 30)
        );
    }

    #[test]
    fn announce_underflow_rolls_hour_and_weekday() {
        let tt = Timetable::default();
        let slot = SessionSlot {
            name: "Early".into(),
            hour: 0,
            minute: 10,
        };
        assert_eq!(
            tt.announce_instant(Weekday::Mon, &slot),
            at(Weekday::Sun, 23, 40)
        );
    }

    #[test]
    fn post_instants_step_by_interval() {
        let tt = Timetable::default();
        let slot = tt.slot("Evening").unwrap().clone();
        assert_eq!(tt.post_instant(Weekday::Fri, &slot, 0), at(Weekday::Fri, 19, 30));
        assert_eq!(tt.post_instant(Weekday::Fri, &slot, 5), at(Weekday::Fri, 19, 55));
    }

    #[test]
    fn post_overflow_rolls_into_next_day() {
        let tt = Timetable::default();
        let slot = SessionSlot {
            name: "Late".into(),
            hour: 23,
            minute: 50,
        };
        assert_eq!(tt.post_instant(Weekday::Fri, &slot, 3), at(Weekday::Sat, 0, 5));
    }

    #[test]
    fn cron_expressions_parse() {
        let tt = Timetable::default();
        for &weekday in &tt.weekdays {
            for slot in &tt.slots {
                let expr = tt.announce_instant(weekday, slot).cron_expr();
                assert!(Schedule::from_str(&expr).is_ok(), "bad cron expr {expr}");
            }
        }
    }

    #[test]
    fn next_question_time_within_session() {
        let tt = Timetable::default();
        assert_eq!(
            tt.next_question_time("Morning", 1),
            Some("10:05 UTC".into())
        );
        assert_eq!(
            tt.next_question_time("Evening", 5),
            Some("19:55 UTC".into())
        );
        assert_eq!(tt.next_question_time("Morning", 6), None);
    }

    #[test]
    fn next_session_cycles_and_wraps_to_next_day() {
        let tt = Timetable::default();

        let after_morning = tt.next_session_after("Morning", Weekday::Mon).unwrap();
        assert_eq!(after_morning.name, "Noon");
        assert!(!after_morning.is_next_day);

        let after_evening = tt.next_session_after("Evening", Weekday::Fri).unwrap();
        assert_eq!(after_evening.name, "Morning");
        assert_eq!(after_evening.time, "10:00 UTC");
        assert!(after_evening.is_next_day);
        assert_eq!(after_evening.next_day_name, "Saturday");
    }

    #[tokio::test]
    async fn stopped_handle_has_no_live_tasks() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let tt = Timetable::default();
        let mut handle = start(&tt, tx, true).unwrap();
        assert!(!handle.tasks.is_empty());
        handle.stop();
        assert!(handle.tasks.is_empty());
        // A second stop is a no-op.
        handle.stop();
    }
}
