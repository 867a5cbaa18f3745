use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::store::QuestionStore;

pub const OPTION_LABELS: [char; 4] = ['A', 'B', 'C', 'D'];

/// Question record as stored on disk. Two encodings exist: the current
/// one with an explicit `options` object, and a legacy one where the
/// options are embedded in the prompt string ("... A) x B) y C) z D) w").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawQuestion {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RawOptions>,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOptions {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    #[serde(rename = "C")]
    pub c: String,
    #[serde(rename = "D")]
    pub d: String,
}

/// A loaded, normalized question. Immutable for its whole life; the
/// session fields are stamped when the scheduler posts it.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    prompt: String,
    /// Option texts in label order A..D, already shuffled at load time.
    options: [String; 4],
    answer: char,
}

impl Question {
    pub fn new(prompt: String, options: [String; 4], answer: char) -> Self {
        Self {
            prompt,
            options,
            answer,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn answer(&self) -> char {
        self.answer
    }

    pub fn option(&self, label: char) -> Option<&str> {
        let idx = OPTION_LABELS.iter().position(|&l| l == label)?;
        Some(&self.options[idx])
    }

    pub fn correct_text(&self) -> &str {
        // The answer label is validated during normalization.
        self.option(self.answer).unwrap_or_default()
    }

    fn to_raw(&self) -> RawQuestion {
        RawQuestion {
            question: self.prompt.clone(),
            options: Some(RawOptions {
                a: self.options[0].clone(),
                b: self.options[1].clone(),
                c: self.options[2].clone(),
                d: self.options[3].clone(),
            }),
            answer: self.answer.to_string(),
        }
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Here's the question: {}", self.prompt)?;
        for (label, text) in OPTION_LABELS.iter().zip(self.options.iter()) {
            writeln!(f, "{label}) {text}")?;
        }
        write!(f, "Reply with the letter (A, B, C, or D)!")
    }
}

/// Ordered pool of questions with a sequential cursor. Shuffled once at
/// load; the scheduler consumes it front to back across sessions.
pub struct QuestionBank {
    questions: Vec<Question>,
    cursor: usize,
}

impl QuestionBank {
    /// Loads, normalizes and shuffles the bank. Records that cannot be
    /// normalized are logged and dropped; an unusable backing store or
    /// a bank with nothing left is a hard error.
    pub async fn load<S: QuestionStore>(store: &S, rng: &mut impl Rng) -> Result<Self, LoadError> {
        let raw = store.load_questions().await?;
        if raw.is_empty() {
            return Err(LoadError::EmptyData("question bank".into()));
        }

        let legacy = is_legacy_format(&raw);
        if legacy {
            log::info!("Detected legacy question format, restructuring embedded options");
        }

        let mut questions = Vec::with_capacity(raw.len());
        for record in raw {
            match normalize(record, rng) {
                Ok(q) => questions.push(q),
                Err(e) => log::error!("Dropping malformed question: {e}"),
            }
        }
        if questions.is_empty() {
            return Err(LoadError::EmptyData(
                "question bank after normalization".into(),
            ));
        }

        questions.shuffle(rng);
        log::info!("Loaded and shuffled {} questions", questions.len());

        // Write the normalized form back so the next start skips the
        // legacy path. Failure here is not fatal; memory is what counts.
        let raw_back: Vec<RawQuestion> = questions.iter().map(Question::to_raw).collect();
        if let Err(e) = store.save_questions(&raw_back).await {
            log::warn!("Failed to save normalized questions: {e}");
        }

        Ok(Self {
            questions,
            cursor: 0,
        })
    }

    pub fn from_questions(questions: Vec<Question>) -> Self {
        Self {
            questions,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Questions not yet handed out to a post trigger.
    pub fn remaining(&self) -> usize {
        self.questions.len().saturating_sub(self.cursor)
    }

    /// Hands out the next question in shuffled order.
    pub fn next_question(&mut self) -> Option<Question> {
        let q = self.questions.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(q)
    }

    /// Direct access for the admin test command (0-based).
    pub fn get(&self, idx: usize) -> Option<&Question> {
        self.questions.get(idx)
    }
}

fn is_legacy_format(raw: &[RawQuestion]) -> bool {
    raw.first()
        .map(|q| q.options.is_none() && q.question.contains(" A) "))
        .unwrap_or(false)
}

/// Turns a raw record into a `Question`, restructuring the legacy
/// embedded-option encoding if needed and shuffling the options with
/// the correct label remapped to follow its text.
pub fn normalize(raw: RawQuestion, rng: &mut impl Rng) -> Result<Question, LoadError> {
    let (prompt, options) = match raw.options {
        Some(opts) => (raw.question, [opts.a, opts.b, opts.c, opts.d]),
        None => split_embedded_options(&raw.question)?,
    };

    let answer = parse_label(&raw.answer)
        .ok_or_else(|| LoadError::Restructure(prompt.clone()))?;

    shuffle_options(prompt, options, answer, rng)
}

fn parse_label(s: &str) -> Option<char> {
    let mut chars = s.trim().chars();
    let label = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !OPTION_LABELS.contains(&label) {
        return None;
    }
    Some(label)
}

fn split_embedded_options(text: &str) -> Result<(String, [String; 4]), LoadError> {
    let err = || LoadError::Restructure(text.to_string());
    let (prompt, rest) = text.split_once(" A) ").ok_or_else(err)?;
    let (a, rest) = rest.split_once(" B) ").ok_or_else(err)?;
    let (b, rest) = rest.split_once(" C) ").ok_or_else(err)?;
    let (c, d) = rest.split_once(" D) ").ok_or_else(err)?;
    Ok((
        prompt.to_string(),
        [a.to_string(), b.to_string(), c.to_string(), d.to_string()],
    ))
}

fn shuffle_options(
    prompt: String,
    options: [String; 4],
    answer: char,
    rng: &mut impl Rng,
) -> Result<Question, LoadError> {
    let correct_idx = OPTION_LABELS
        .iter()
        .position(|&l| l == answer)
        .ok_or_else(|| LoadError::Restructure(prompt.clone()))?;
    let correct_text = options[correct_idx].clone();

    let mut shuffled: Vec<String> = options.into();
    shuffled.shuffle(rng);

    let new_idx = shuffled
        .iter()
        .position(|t| *t == correct_text)
        .ok_or_else(|| LoadError::Restructure(prompt.clone()))?;
    let new_answer = OPTION_LABELS[new_idx];

    let options: [String; 4] = shuffled
        .try_into()
        .map_err(|_| LoadError::Restructure(prompt.clone()))?;

    Ok(Question::new(prompt, options, new_answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn legacy_raw() -> RawQuestion {
        RawQuestion {
            question: "What is the capital of France? A) Berlin B) Paris C) Madrid D) Rome"
                .into(),
            options: None,
            answer: "B".into(),
        }
    }

    #[test]
    fn legacy_restructure_preserves_correct_text() {
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let q = normalize(legacy_raw(), &mut rng).unwrap();
            assert_eq!(q.prompt(), "What is the capital of France?");
            assert_eq!(q.correct_text(), "Paris");
        }
    }

    #[test]
    fn new_format_shuffle_preserves_correct_text() {
        let raw = RawQuestion {
            question: "Pick the even number".into(),
            options: Some(RawOptions {
                a: "1".into(),
                b: "3".into(),
                c: "4".into(),
                d: "7".into(),
            }),
            answer: "C".into(),
        };
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let q = normalize(raw.clone(), &mut rng).unwrap();
            assert_eq!(q.correct_text(), "4");
            assert_eq!(q.option(q.answer()), Some("4"));
        }
    }

    #[test]
    fn invalid_answer_label_is_restructure_error() {
        let mut raw = legacy_raw();
        raw.answer = "E".into();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            normalize(raw, &mut rng),
            Err(LoadError::Restructure(_))
        ));
    }

    #[test]
    fn truncated_legacy_prompt_is_restructure_error() {
        let raw = RawQuestion {
            question: "Broken question A) one B) two".into(),
            options: None,
            answer: "A".into(),
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            normalize(raw, &mut rng),
            Err(LoadError::Restructure(_))
        ));
    }

    #[test]
    fn cursor_hands_out_questions_in_order() {
        let questions: Vec<Question> = (0..3)
            .map(|i| {
                Question::new(
                    format!("q{i}"),
                    ["a".into(), "b".into(), "c".into(), "d".into()],
                    'A',
                )
            })
            .collect();
        let mut bank = QuestionBank::from_questions(questions);

        assert_eq!(bank.remaining(), 3);
        assert_eq!(bank.next_question().unwrap().prompt(), "q0");
        assert_eq!(bank.next_question().unwrap().prompt(), "q1");
        assert_eq!(bank.remaining(), 1);
        assert_eq!(bank.next_question().unwrap().prompt(), "q2");
        assert_eq!(bank.next_question(), None);
        assert_eq!(bank.remaining(), 0);
    }

    #[test]
    fn question_message_lists_all_options() {
        let q = Question::new(
            "Why?".into(),
            ["w".into(), "x".into(), "y".into(), "z".into()],
            'D',
        );
        let msg = q.to_string();
        assert!(msg.contains("Here's the question: Why?"));
        assert!(msg.contains("A) w"));
        assert!(msg.contains("D) z"));
        assert!(msg.ends_with("Reply with the letter (A, B, C, or D)!"));
    }
}
