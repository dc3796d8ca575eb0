//! Survey question catalog — ordered question definitions with per-question
//! normalization and validation hooks.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Canonicalize a raw answer before persistence (e.g. map "A"/"in-person" to
/// a stable label).
pub type AnswerNormalizer = fn(&str) -> String;

/// Check a raw answer's format before accepting it.
pub type AnswerValidator = fn(&str) -> bool;

/// A single survey question.
#[derive(Debug, Clone)]
pub struct Question {
    /// Stable identifier of the answer field, used as the preference key.
    pub key: &'static str,
    /// The prompt sent to the user.
    pub prompt: &'static str,
    /// 1-based position in the survey.
    pub order: u32,
    /// Optional canonicalization applied to accepted answers.
    pub normalizer: Option<AnswerNormalizer>,
    /// Optional format check; a failing answer re-prompts without advancing.
    pub validator: Option<AnswerValidator>,
    /// Template returned when the validator rejects an answer. Falls back to
    /// the generic error template when unset.
    pub invalid_prompt: Option<&'static str>,
}

impl Question {
    /// Apply this question's normalizer (identity when none is attached).
    /// Answers are trimmed either way.
    pub fn normalize_answer(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self.normalizer {
            Some(f) => f(trimmed),
            None => trimmed.to_string(),
        }
    }

    /// Whether a raw answer passes this question's validator, if any.
    pub fn accepts(&self, raw: &str) -> bool {
        self.validator.map(|f| f(raw)).unwrap_or(true)
    }
}

/// Ordered, immutable set of survey questions, keyed both by `key` (for
/// persistence) and by `order` (for sequencing). Loaded once at startup.
#[derive(Debug, Clone)]
pub struct QuestionCatalog {
    questions: Vec<Question>,
    by_key: HashMap<&'static str, usize>,
}

impl QuestionCatalog {
    /// Build a catalog from an ordered question list.
    ///
    /// Questions must use contiguous 1-based `order` values and unique keys;
    /// the catalog is static configuration, so violations are construction
    /// bugs and panic here rather than surfacing at runtime.
    pub fn new(questions: Vec<Question>) -> Self {
        let mut by_key = HashMap::new();
        for (i, q) in questions.iter().enumerate() {
            assert_eq!(q.order as usize, i + 1, "question order must be contiguous");
            assert!(
                by_key.insert(q.key, i).is_none(),
                "duplicate question key: {}",
                q.key
            );
        }
        Self { questions, by_key }
    }

    /// The question at 1-based position `order`, if in range.
    pub fn by_order(&self, order: u32) -> Option<&Question> {
        (order >= 1).then(|| self.questions.get(order as usize - 1))?
    }

    /// The question with the given preference key.
    pub fn by_key(&self, key: &str) -> Option<&Question> {
        self.by_key.get(key).map(|&i| &self.questions[i])
    }

    /// Total number of questions.
    pub fn len(&self) -> u32 {
        self.questions.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl Default for QuestionCatalog {
    /// The production survey: five questions driving the event digest.
    fn default() -> Self {
        Self::new(vec![
            Question {
                key: "interests",
                prompt: "What are your main interests? (e.g., music, art, sports, food)",
                order: 1,
                normalizer: None,
                validator: None,
                invalid_prompt: None,
            },
            Question {
                key: "location",
                prompt: "What city or area are you located in?",
                order: 2,
                normalizer: None,
                validator: Some(is_valid_location),
                invalid_prompt: Some(crate::survey::messages::templates::INVALID_LOCATION),
            },
            Question {
                key: "activity_type",
                prompt: "What types of activities do you prefer? Reply A for in-person, \
                         B for online, or C for both.",
                order: 3,
                normalizer: Some(normalize_activity_type),
                validator: None,
                invalid_prompt: None,
            },
            Question {
                key: "time_preference",
                prompt: "When do you typically have free time? (e.g., weekends, evenings, \
                         weekday afternoons)",
                order: 4,
                normalizer: None,
                validator: None,
                invalid_prompt: None,
            },
            Question {
                key: "budget",
                prompt: "What is your typical budget for weekend activities? (e.g., free, \
                         $10-20, $20-50)",
                order: 5,
                normalizer: None,
                validator: None,
                invalid_prompt: None,
            },
        ])
    }
}

static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}$").expect("zip regex"));
static PLACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\s\-',.]+$").expect("place regex"));

/// Accept a 5-digit postal code, or a 2-50 character city/landmark name made
/// of alphanumerics and common punctuation. All-digit input is treated as a
/// postal-code attempt, so "1234" is rejected rather than passing as a name.
pub fn is_valid_location(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return ZIP_RE.is_match(trimmed);
    }
    (2..=50).contains(&trimmed.len()) && PLACE_RE.is_match(trimmed)
}

/// Map the activity-type multiple choice onto canonical labels. Unrecognized
/// answers are kept verbatim so free-form replies still land in the store.
fn normalize_activity_type(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "a" | "in-person" | "in person" => "in_person".to_string(),
        "b" | "online" => "online".to_string(),
        "c" | "both" => "both".to_string(),
        _ => raw.to_string(),
    }
}
