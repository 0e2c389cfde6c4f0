//! Shared bulletin records: community problems and suggestions.
//!
//! Records arrive from clients in loosely-shaped JSON, so decoding is lenient:
//! IDs may be strings or numbers, timestamps may be epoch milliseconds or
//! RFC 3339 strings, and unknown fields are carried along in `extra` so the
//! re-broadcast copy matches what the author sent. [`BulletinRecord::normalize`]
//! fills in whatever the author left out before the record is stored.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Who may see a record in `request.globalProblems` results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Listed for everyone.
    #[default]
    Public,
    /// Kept out of global listings. Unrecognised values also land here.
    Private,
}

impl Visibility {
    /// Parse a wire value; anything other than `"public"` is private.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("public") {
            Self::Public
        } else {
            Self::Private
        }
    }

    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl Serialize for Visibility {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Visibility {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map_or(Self::Public, Self::parse))
    }
}

/// Values the server supplies when the author left a field out.
#[derive(Clone, Copy, Debug)]
pub struct RecordDefaults<'a> {
    /// Identifier of the sending connection, if it has one.
    pub owner_id: Option<&'a str>,
    /// Session the sender belongs to, if any.
    pub session_id: Option<&'a str>,
    /// Server receive time (epoch ms).
    pub now_ms: i64,
}

/// A record kept in a deduplicating store.
pub trait BulletinRecord: Clone + Send + Sync + 'static {
    /// Collection name, also the prefix of generated IDs.
    const KIND: &'static str;

    /// Unique ID within the collection.
    fn record_id(&self) -> &str;

    /// Creation time (epoch ms), set once normalised.
    fn timestamp(&self) -> Option<i64>;

    /// Listing visibility.
    fn visibility(&self) -> Visibility;

    /// Fill in a missing ID, owner, origin session, and timestamp.
    fn normalize(&mut self, defaults: &RecordDefaults<'_>);
}

/// Generate a record ID of the form `<kind>_<uuid v7>`.
pub fn generate_record_id(kind: &str) -> String {
    format!("{kind}_{}", Uuid::now_v7())
}

/// A community problem posted to the bulletin board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    /// Record ID; generated when missing or blank.
    #[serde(default, deserialize_with = "lenient_id")]
    pub problem_id: String,
    /// Author identifier.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_id")]
    pub owner_id: Option<String>,
    /// Session the problem originated in.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_id")]
    pub session_id: Option<String>,
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub content: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Listing visibility (default public).
    #[serde(default)]
    pub visibility: Visibility,
    /// Creation time, epoch ms.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<i64>,
    /// Fields the relay does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BulletinRecord for Problem {
    const KIND: &'static str = "problem";

    fn record_id(&self) -> &str {
        &self.problem_id
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    fn visibility(&self) -> Visibility {
        self.visibility
    }

    fn normalize(&mut self, defaults: &RecordDefaults<'_>) {
        if self.problem_id.trim().is_empty() {
            self.problem_id = generate_record_id(Self::KIND);
        }
        fill_common(
            &mut self.owner_id,
            &mut self.session_id,
            &mut self.timestamp,
            defaults,
        );
    }
}

/// A suggestion, usually answering a [`Problem`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    /// Record ID; generated when missing or blank.
    #[serde(default, deserialize_with = "lenient_id")]
    pub suggestion_id: String,
    /// The problem this suggestion refers to.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_id")]
    pub problem_id: Option<String>,
    /// Author identifier.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_id")]
    pub owner_id: Option<String>,
    /// Session the suggestion originated in.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_id")]
    pub session_id: Option<String>,
    /// Optional short title.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub content: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Listing visibility (default public).
    #[serde(default)]
    pub visibility: Visibility,
    /// Creation time, epoch ms.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<i64>,
    /// Fields the relay does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Suggestion {
    /// Whether this suggestion refers to the given problem.
    pub fn references(&self, problem_id: &str) -> bool {
        self.problem_id.as_deref() == Some(problem_id)
    }
}

impl BulletinRecord for Suggestion {
    const KIND: &'static str = "suggestion";

    fn record_id(&self) -> &str {
        &self.suggestion_id
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    fn visibility(&self) -> Visibility {
        self.visibility
    }

    fn normalize(&mut self, defaults: &RecordDefaults<'_>) {
        if self.suggestion_id.trim().is_empty() {
            self.suggestion_id = generate_record_id(Self::KIND);
        }
        fill_common(
            &mut self.owner_id,
            &mut self.session_id,
            &mut self.timestamp,
            defaults,
        );
    }
}

fn fill_common(
    owner_id: &mut Option<String>,
    session_id: &mut Option<String>,
    timestamp: &mut Option<i64>,
    defaults: &RecordDefaults<'_>,
) {
    if owner_id.is_none() {
        *owner_id = defaults.owner_id.map(str::to_owned);
    }
    if session_id.is_none() {
        *session_id = defaults.session_id.map(str::to_owned);
    }
    if timestamp.is_none() {
        *timestamp = Some(defaults.now_ms);
    }
}

/// Interpret a JSON value as epoch milliseconds.
///
/// Accepts integers, finite floats (truncated), numeric strings, and RFC 3339
/// date-time strings. Anything else yields `None`.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            #[allow(clippy::cast_possible_truncation)]
            n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp_millis())
        }),
        _ => None,
    }
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(id_from_value).unwrap_or_default())
}

pub(crate) fn lenient_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(id_from_value))
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults(now_ms: i64) -> RecordDefaults<'static> {
        RecordDefaults {
            owner_id: Some("user_a"),
            session_id: Some("sess_a"),
            now_ms,
        }
    }

    #[test]
    fn problem_decodes_minimal_object() {
        let p: Problem = serde_json::from_value(json!({"problemId": "p1", "title": "X"})).unwrap();
        assert_eq!(p.problem_id, "p1");
        assert_eq!(p.title, "X");
        assert_eq!(p.visibility, Visibility::Public);
        assert!(p.timestamp.is_none());
        assert!(p.extra.is_empty());
    }

    #[test]
    fn numeric_ids_become_strings() {
        let p: Problem = serde_json::from_value(json!({"problemId": 42})).unwrap();
        assert_eq!(p.problem_id, "42");
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let p: Problem = serde_json::from_value(json!({
            "problemId": "p1",
            "difficulty": "hard",
            "votes": 3
        }))
        .unwrap();
        assert_eq!(p.extra["difficulty"], "hard");
        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["difficulty"], "hard");
        assert_eq!(back["votes"], 3);
        assert_eq!(back["problemId"], "p1");
    }

    #[test]
    fn visibility_parsing_is_lenient() {
        let p: Problem = serde_json::from_value(json!({"visibility": "PRIVATE"})).unwrap();
        assert_eq!(p.visibility, Visibility::Private);
        let p: Problem = serde_json::from_value(json!({"visibility": "unlisted"})).unwrap();
        assert_eq!(p.visibility, Visibility::Private);
        let p: Problem = serde_json::from_value(json!({"visibility": null})).unwrap();
        assert_eq!(p.visibility, Visibility::Public);
    }

    #[test]
    fn timestamp_accepts_number_and_rfc3339() {
        assert_eq!(parse_timestamp(&json!(1_700_000_000_000_i64)), Some(1_700_000_000_000));
        assert_eq!(parse_timestamp(&json!(1.5e12)), Some(1_500_000_000_000));
        assert_eq!(parse_timestamp(&json!("1700000000000")), Some(1_700_000_000_000));
        assert_eq!(
            parse_timestamp(&json!("2024-01-01T00:00:00Z")),
            Some(1_704_067_200_000)
        );
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
    }

    #[test]
    fn bad_timestamp_decodes_as_none() {
        let p: Problem = serde_json::from_value(json!({"timestamp": "soon"})).unwrap();
        assert!(p.timestamp.is_none());
    }

    #[test]
    fn normalize_fills_missing_fields() {
        let mut p: Problem = serde_json::from_value(json!({"title": "X"})).unwrap();
        p.normalize(&defaults(1000));
        assert!(p.problem_id.starts_with("problem_"));
        assert_eq!(p.owner_id.as_deref(), Some("user_a"));
        assert_eq!(p.session_id.as_deref(), Some("sess_a"));
        assert_eq!(p.timestamp, Some(1000));
    }

    #[test]
    fn normalize_keeps_author_values() {
        let mut s: Suggestion = serde_json::from_value(json!({
            "suggestionId": "s1",
            "problemId": "p1",
            "ownerId": "bob",
            "timestamp": 5
        }))
        .unwrap();
        s.normalize(&defaults(1000));
        assert_eq!(s.suggestion_id, "s1");
        assert_eq!(s.owner_id.as_deref(), Some("bob"));
        assert_eq!(s.timestamp, Some(5));
        assert!(s.references("p1"));
        assert!(!s.references("p2"));
    }

    #[test]
    fn blank_id_is_regenerated() {
        let mut s: Suggestion = serde_json::from_value(json!({"suggestionId": "  "})).unwrap();
        s.normalize(&defaults(1));
        assert!(s.suggestion_id.starts_with("suggestion_"));
    }

    #[test]
    fn serialized_problem_omits_absent_options() {
        let p: Problem = serde_json::from_value(json!({"problemId": "p1"})).unwrap();
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("ownerId").is_none());
        assert!(v.get("timestamp").is_none());
        assert_eq!(v["visibility"], "public");
    }
}
