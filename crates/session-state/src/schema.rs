//! Session data model
//!
//! Turns, summaries and augmentation records are the structured source of
//! truth; markdown files are projections rendered from them (see
//! [`crate::markdown`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Accepts RFC 3339 timestamps and naive ISO timestamps (read as UTC).
mod lenient_datetime {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Identifier of one session; doubles as the artifact directory name.
///
/// The inner field is private so every value has passed [`SessionId::parse`]
/// and is safe to join onto the documents root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new id of the form `YYYYMMDD-HHMMSS-xxxxxx`.
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        SessionId(format!("{stamp}-{}", &suffix[..6]))
    }

    /// Validate a caller-supplied id.
    pub fn parse(raw: impl Into<String>) -> Result<Self, StorageError> {
        let raw = raw.into();
        let reject = |reason: &str| StorageError::InvalidSessionId {
            session_id: raw.clone(),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(reject("empty"));
        }
        if raw.len() > 128 {
            return Err(reject("longer than 128 characters"));
        }
        if raw.starts_with('.') || raw.contains("..") {
            return Err(reject("dot segments are not allowed"));
        }
        if raw
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
        {
            return Err(reject("separators and whitespace are not allowed"));
        }
        Ok(SessionId(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        SessionId::parse(s)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::str::FromStr for SessionId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionId::parse(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Turns
// ---------------------------------------------------------------------------

/// Who produced a turn. Tool metadata only exists on the `Tool` variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Tool {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_snippet: Option<String>,
    },
    /// Injected preface (instructions, recap). Never written to the turn log.
    System,
}

impl Role {
    /// Lowercase wire label.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::Tool { .. } => "tool",
            Role::System => "system",
        }
    }

    /// Name used in journal bullets.
    pub fn display_name(&self) -> String {
        match self {
            Role::User => "User".to_string(),
            Role::Agent => "Agent".to_string(),
            Role::Tool { tool, .. } => format!("Tool ({tool})"),
            Role::System => "System".to_string(),
        }
    }
}

/// One exchange step. `turn` is the 1-based sequence index within the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn: u64,
    #[serde(flatten)]
    pub role: Role,
    pub content: String,
    #[serde(deserialize_with = "lenient_datetime::deserialize")]
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(turn: u64, role: Role, content: impl Into<String>) -> Self {
        Turn {
            turn,
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(turn: u64, content: impl Into<String>) -> Self {
        Self::new(turn, Role::User, content)
    }

    pub fn agent(turn: u64, content: impl Into<String>) -> Self {
        Self::new(turn, Role::Agent, content)
    }

    pub fn tool(
        turn: u64,
        tool: impl Into<String>,
        args: serde_json::Value,
        content: impl Into<String>,
        result_snippet: Option<String>,
    ) -> Self {
        Self::new(
            turn,
            Role::Tool {
                tool: tool.into(),
                args,
                result_snippet,
            },
            content,
        )
    }

    /// Preface turn for a working window. Carries index 0.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(0, Role::System, content)
    }

    pub fn is_user(&self) -> bool {
        matches!(self.role, Role::User)
    }

    pub fn is_system(&self) -> bool {
        matches!(self.role, Role::System)
    }

    /// First non-empty line, cut at `max_chars` characters.
    pub fn synopsis(&self, max_chars: usize) -> String {
        let line = self
            .content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("(no content)");
        if line.chars().count() <= max_chars {
            line.to_string()
        } else {
            let cut: String = line.chars().take(max_chars).collect();
            format!("{cut}…")
        }
    }
}

/// Structured form of one journal bullet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalNote {
    pub turn: u64,
    pub speaker: String,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

impl JournalNote {
    pub fn from_turn(turn: &Turn) -> Self {
        JournalNote {
            turn: turn.turn,
            speaker: turn.role.display_name(),
            content: turn.content.clone(),
            recorded_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// An open or closed knowledge gap noted by the summarizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub description: String,
    #[serde(default)]
    pub resolved: bool,
}

impl Gap {
    pub fn open(description: impl Into<String>) -> Self {
        Gap {
            description: description.into(),
            resolved: false,
        }
    }

    pub fn resolved(description: impl Into<String>) -> Self {
        Gap {
            description: description.into(),
            resolved: true,
        }
    }

    /// Key used to match the same gap across summaries: case-folded,
    /// whitespace-collapsed, trailing punctuation stripped.
    pub fn key(&self) -> String {
        normalize_gap(&self.description)
    }
}

pub fn normalize_gap(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '?', '!', ':'])
        .to_lowercase()
}

/// Structured session retrospective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<Gap>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl Summary {
    pub fn new(highlights: Vec<String>, gaps: Vec<Gap>, next_steps: Vec<String>) -> Self {
        Summary {
            created_at: Utc::now(),
            highlights,
            gaps,
            next_steps,
        }
    }

    pub fn unresolved_gaps(&self) -> impl Iterator<Item = &Gap> {
        self.gaps.iter().filter(|g| !g.resolved)
    }

    /// True only for a non-empty gap list that is entirely resolved.
    pub fn all_gaps_resolved(&self) -> bool {
        !self.gaps.is_empty() && self.gaps.iter().all(|g| g.resolved)
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty() && self.gaps.is_empty() && self.next_steps.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Augmentation
// ---------------------------------------------------------------------------

/// What the human did with a suggested rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Rejected,
    Edited,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Decision::Accepted => "accepted",
            Decision::Rejected => "rejected",
            Decision::Edited => "edited",
        };
        f.write_str(s)
    }
}

/// One learn-mode turn's rewrite and the human decision on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationRecord {
    pub turn: u64,
    pub original: String,
    pub suggestion: String,
    #[serde(rename = "final")]
    pub final_text: String,
    #[serde(default)]
    pub justification: Vec<String>,
    #[serde(default)]
    pub suggestion_diff: String,
    #[serde(default)]
    pub final_diff: String,
    pub decision: Decision,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Session mode and listings
// ---------------------------------------------------------------------------

/// Two-state session mode flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    #[default]
    GapCapture,
    Learn,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::GapCapture => "gap-capture",
            SessionMode::Learn => "learn",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gap-capture" | "gap_capture" | "capture" => Ok(SessionMode::GapCapture),
            "learn" => Ok(SessionMode::Learn),
            other => Err(format!("unknown session mode: {other}")),
        }
    }
}

/// Persisted contents of `mode.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeRecord {
    pub mode: SessionMode,
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry for one session directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionListing {
    pub session_id: SessionId,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Session memory
// ---------------------------------------------------------------------------

/// Speaker of a dialogue-history item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueRole {
    User,
    Assistant,
    System,
}

impl DialogueRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueRole::User => "user",
            DialogueRole::Assistant => "assistant",
            DialogueRole::System => "system",
        }
    }
}

/// One entry of a session's dialogue history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub role: DialogueRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(role: DialogueRole, content: impl Into<String>) -> Self {
        MemoryItem {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// SurrealDB row for a session memory item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    /// Owning session
    pub session_id: String,
    /// Position within the session (1-indexed)
    pub seq: u64,
    /// "user" | "assistant" | "system"
    pub role: DialogueRole,
    pub content: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(session_id: &SessionId, seq: u64, item: &MemoryItem) -> Self {
        MemoryRecord {
            id: None,
            session_id: session_id.as_str().to_string(),
            seq,
            role: item.role,
            content: item.content.clone(),
            created_at: item.created_at,
        }
    }

    pub fn into_item(self) -> MemoryItem {
        MemoryItem {
            role: self.role,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_id_has_expected_shape() {
        let id = SessionId::generate();
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn session_id_rejects_path_tricks() {
        for bad in ["", "  ", "../etc", "a/b", "a\\b", ".hidden", "has space"] {
            assert!(SessionId::parse(bad).is_err(), "accepted {bad:?}");
        }
        assert!(SessionId::parse("20250101-120000-abcdef").is_ok());
    }

    #[test]
    fn session_id_deserialize_validates() {
        let err = serde_json::from_str::<SessionId>("\"../x\"");
        assert!(err.is_err());
    }

    #[test]
    fn turn_wire_format_is_flat() {
        let turn = Turn::user(1, "How do hooks work?");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["turn"], 1);
        assert_eq!(value["content"], "How do hooks work?");
        assert!(value.get("tool").is_none());
    }

    #[test]
    fn tool_turn_carries_metadata() {
        let turn = Turn::tool(
            2,
            "grep",
            serde_json::json!({"pattern": "useEffect"}),
            "3 matches",
            Some("src/app.tsx:12".into()),
        );
        let line = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&line).unwrap();
        assert_eq!(back, turn);
        match back.role {
            Role::Tool { tool, .. } => assert_eq!(tool, "grep"),
            other => panic!("expected tool role, got {other:?}"),
        }
    }

    #[test]
    fn turn_accepts_naive_timestamps() {
        let line = r#"{"timestamp": "2025-03-01T10:15:00.123456", "turn": 3, "role": "agent", "content": "ok"}"#;
        let turn: Turn = serde_json::from_str(line).unwrap();
        assert_eq!(turn.turn, 3);
        assert_eq!(turn.role, Role::Agent);
        assert_eq!(turn.timestamp.format("%H:%M").to_string(), "10:15");
    }

    #[test]
    fn synopsis_uses_first_line_and_truncates() {
        let turn = Turn::user(1, "\n  first line here\nsecond");
        assert_eq!(turn.synopsis(160), "first line here");
        assert_eq!(turn.synopsis(5), "first…");
        assert_eq!(Turn::user(2, "").synopsis(10), "(no content)");
    }

    #[test]
    fn gap_key_normalizes() {
        assert_eq!(
            Gap::open("  useEffect   Lifecycle? ").key(),
            Gap::resolved("useeffect lifecycle").key()
        );
    }

    #[test]
    fn all_gaps_resolved_requires_non_empty() {
        let empty = Summary::new(vec![], vec![], vec![]);
        assert!(!empty.all_gaps_resolved());
        let done = Summary::new(vec![], vec![Gap::resolved("a")], vec![]);
        assert!(done.all_gaps_resolved());
        let mixed = Summary::new(vec![], vec![Gap::resolved("a"), Gap::open("b")], vec![]);
        assert!(!mixed.all_gaps_resolved());
    }

    #[test]
    fn augmentation_record_uses_final_key() {
        let record = AugmentationRecord {
            turn: 1,
            original: "a".into(),
            suggestion: "b".into(),
            final_text: "b".into(),
            justification: vec![],
            suggestion_diff: String::new(),
            final_diff: String::new(),
            decision: Decision::Accepted,
            recorded_at: Utc::now(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["final"], "b");
        assert_eq!(value["decision"], "accepted");
    }

    #[test]
    fn session_mode_parses_both_spellings() {
        assert_eq!(
            "gap_capture".parse::<SessionMode>().unwrap(),
            SessionMode::GapCapture
        );
        assert_eq!("LEARN".parse::<SessionMode>().unwrap(), SessionMode::Learn);
        assert_eq!(
            serde_json::to_string(&SessionMode::GapCapture).unwrap(),
            "\"gap-capture\""
        );
    }
}
