use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub type EventId = u64;
pub type QuestionId = u64;
pub type MessageId = u64;

/// Identity of a user as the server reports it.
///
/// The server is free to send user ids as JSON strings or numbers; both
/// are normalised to their textual form so they compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Scalar::deserialize(deserializer)? {
            Scalar::Text(s) => Ok(Self(s)),
            Scalar::Number(n) => Ok(Self(n.to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

/// Accepts a string, a number or null/absent and yields a string.
pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Text(s)) => s,
        Some(Scalar::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

/// A live event together with the sub-collections synchronised for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub id: EventId,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl LiveEvent {
    pub fn new(id: EventId, slug: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id,
            slug: slug.into(),
            title: title.into(),
            description: String::new(),
            start_time: None,
            end_time: None,
            active: false,
            questions: Vec::new(),
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    pub event_id: EventId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub stats: QuestionStats,
}

impl Question {
    pub fn new(id: QuestionId, event_id: EventId, text: impl Into<String>, score: i64) -> Self {
        Self {
            id,
            event_id,
            text: text.into(),
            stats: QuestionStats {
                score,
                ..QuestionStats::default()
            },
        }
    }
}

/// Aggregate score plus the viewer-local vote state of a question.
///
/// `vote_requester` names the actor whose vote action produced the
/// current `user_vote`; `user_vote` is -1, 0 or 1 from the viewer's side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStats {
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub vote_requester: Option<UserId>,
    #[serde(default)]
    pub user_vote: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub event_id: EventId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(id: MessageId, event_id: EventId, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            event_id,
            text: text.into(),
            author: author.into(),
            timestamp: None,
        }
    }
}

/// Minimal payload identifying an event, as carried by deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub id: EventId,
}

/// Minimal payload identifying a question or message inside an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRef {
    pub id: u64,
    pub event_id: EventId,
}

/// Ranking order: score descending, then id ascending.
pub fn question_rank(a: &Question, b: &Question) -> Ordering {
    b.stats
        .score
        .cmp(&a.stats.score)
        .then_with(|| a.id.cmp(&b.id))
}

pub fn rank_questions(questions: &mut [Question]) {
    questions.sort_by(question_rank);
}

pub fn is_ranked(questions: &[Question]) -> bool {
    questions
        .windows(2)
        .all(|w| question_rank(&w[0], &w[1]) != Ordering::Greater)
}
