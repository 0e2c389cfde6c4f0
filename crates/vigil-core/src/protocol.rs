//! Wire protocol.
//!
//! Every frame in either direction is a JSON object with a string `type`.
//! Inbound frames are decoded exactly once, at the socket boundary, into
//! [`InboundMessage`]; handlers never see untyped maps except for telemetry,
//! whose payload is opaque and relayed verbatim. Outbound notifications are
//! [`RelayEvent`] values, plus [`TelemetryEnvelope`] for relayed telemetry.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::ids::{SessionId, UserId};
use crate::records::{Problem, Suggestion, lenient_opt_id};

/// Prefix shared by every telemetry frame type (`telemetry`, `telemetry.keystroke`, ...).
pub const TELEMETRY_PREFIX: &str = "telemetry";

/// Look-back window for `request.globalProblems` when `days` is absent or invalid.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Upper bound on the `request.globalProblems` window.
pub const MAX_WINDOW_DAYS: u32 = 3650;

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded client frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    /// `auth`: declare a role and join or create a session.
    Auth(AuthRequest),
    /// `telemetry*`: activity from a member, routed to its inspector.
    Telemetry(TelemetryFrame),
    /// `problem.create`: post a problem to the bulletin board.
    ProblemCreate(Problem),
    /// `suggestion.create`: post a suggestion to the bulletin board.
    SuggestionCreate(Suggestion),
    /// `request.globalProblems`: list recent public problems.
    GlobalProblems(GlobalProblemsRequest),
    /// `inspector.snapshot`: ask every member for a fresh snapshot.
    InspectorSnapshot(SnapshotRequest),
    /// `inspector.leave`: end the inspector's session.
    InspectorLeave,
    /// Any other `type`; ignored.
    Unknown(String),
}

impl InboundMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(ProtocolError::MissingType),
        };

        match kind.as_str() {
            "auth" => parse(&kind, object).map(Self::Auth),
            "problem.create" => {
                parse::<ProblemCreate>(&kind, object).map(|frame| Self::ProblemCreate(frame.problem))
            }
            "suggestion.create" => parse::<SuggestionCreate>(&kind, object)
                .map(|frame| Self::SuggestionCreate(frame.suggestion)),
            "request.globalProblems" => parse(&kind, object).map(Self::GlobalProblems),
            "inspector.snapshot" => parse(&kind, object).map(Self::InspectorSnapshot),
            "inspector.leave" => Ok(Self::InspectorLeave),
            _ if kind.starts_with(TELEMETRY_PREFIX) => {
                Ok(Self::Telemetry(TelemetryFrame::from_fields(kind, object)))
            }
            _ => Ok(Self::Unknown(kind)),
        }
    }

    /// The frame's `type`, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::Auth(_) => "auth",
            Self::Telemetry(frame) => &frame.kind,
            Self::ProblemCreate(_) => "problem.create",
            Self::SuggestionCreate(_) => "suggestion.create",
            Self::GlobalProblems(_) => "request.globalProblems",
            Self::InspectorSnapshot(_) => "inspector.snapshot",
            Self::InspectorLeave => "inspector.leave",
            Self::Unknown(kind) => kind,
        }
    }
}

fn parse<T: DeserializeOwned>(kind: &str, object: Map<String, Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(object)).map_err(|source| ProtocolError::Malformed {
        kind: kind.to_owned(),
        source,
    })
}

#[derive(Deserialize)]
struct ProblemCreate {
    problem: Problem,
}

#[derive(Deserialize)]
struct SuggestionCreate {
    suggestion: Suggestion,
}

/// Role declared in an `auth` frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthRole {
    /// Supervising party; creates a session.
    Inspector,
    /// Monitored party; joins a session when one is named.
    Client,
    /// Missing or unrecognised role.
    Unspecified,
}

/// Body of an `auth` frame.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Declared role (`"inspector"` or `"client"`).
    #[serde(default)]
    pub role: Option<String>,
    /// Self-declared participant identifier.
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub user_id: Option<String>,
    /// Human-readable name shown to the inspector.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Session to join (client role only).
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub session_id: Option<String>,
}

impl AuthRequest {
    /// Interpret the declared role.
    pub fn role(&self) -> AuthRole {
        match self.role.as_deref() {
            Some(role) if role.eq_ignore_ascii_case("inspector") => AuthRole::Inspector,
            Some(role) if role.eq_ignore_ascii_case("client") => AuthRole::Client,
            _ => AuthRole::Unspecified,
        }
    }

    /// Display name with surrounding whitespace removed; blank names are `None`.
    pub fn display_name(&self) -> Option<String> {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
    }
}

/// A `telemetry*` frame. Everything except the routing fields is opaque.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryFrame {
    /// Full frame type, e.g. `telemetry.keystroke`.
    pub kind: String,
    /// Session named by the sender, if any.
    pub session_id: Option<SessionId>,
    /// Remaining fields, relayed untouched.
    pub fields: Map<String, Value>,
}

/// Keys the relay owns on a telemetry envelope; client copies are discarded.
const ENVELOPE_KEYS: [&str; 5] = ["sessionId", "userId", "displayName", "ts", "type"];

impl TelemetryFrame {
    /// Split routing fields from the opaque remainder.
    pub fn from_fields(kind: String, mut fields: Map<String, Value>) -> Self {
        let session_id = match fields.remove("sessionId") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(SessionId::from(s)),
            _ => None,
        };
        for key in ENVELOPE_KEYS {
            let _ = fields.remove(key);
        }
        Self {
            kind,
            session_id,
            fields,
        }
    }

    /// Build the envelope delivered to the inspector.
    pub fn into_envelope(
        self,
        session_id: SessionId,
        user_id: Option<UserId>,
        display_name: Option<String>,
        ts: i64,
    ) -> TelemetryEnvelope {
        TelemetryEnvelope {
            kind: self.kind,
            session_id,
            user_id,
            display_name,
            ts,
            fields: self.fields,
        }
    }
}

/// Body of a `request.globalProblems` frame.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct GlobalProblemsRequest {
    /// Look-back window in days; any JSON value is accepted and validated lazily.
    #[serde(default)]
    pub days: Option<Value>,
}

impl GlobalProblemsRequest {
    /// Effective window: positive numbers (or numeric strings) rounded up and
    /// capped at [`MAX_WINDOW_DAYS`]; anything else is [`DEFAULT_WINDOW_DAYS`].
    pub fn window_days(&self) -> u32 {
        let requested = match self.days.as_ref() {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match requested {
            Some(days) if days.is_finite() && days > 0.0 => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let days = days.ceil().min(f64::from(MAX_WINDOW_DAYS)) as u32;
                days
            }
            _ => DEFAULT_WINDOW_DAYS,
        }
    }
}

/// Body of an `inspector.snapshot` frame.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    /// Session to snapshot; defaults to the sender's own session.
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub session_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Every notification the relay originates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayEvent {
    /// To an inspector: its new session is live.
    #[serde(rename = "inspector.sessionStarted", rename_all = "camelCase")]
    SessionStarted {
        /// The new session.
        session_id: SessionId,
    },
    /// To a client: it joined the session.
    #[serde(rename = "joined", rename_all = "camelCase")]
    Joined {
        /// The joined session.
        session_id: SessionId,
    },
    /// To a client: an inspector is watching the session it joined.
    #[serde(rename = "inspector.joined")]
    InspectorJoined {
        /// Human-readable notice.
        message: String,
    },
    /// To an inspector: a member joined.
    #[serde(rename = "member.joined", rename_all = "camelCase")]
    MemberJoined {
        /// Member identifier.
        user_id: UserId,
        /// Member display name.
        display_name: Option<String>,
    },
    /// To an inspector: a member left.
    #[serde(rename = "member.left", rename_all = "camelCase")]
    MemberLeft {
        /// Member identifier.
        user_id: UserId,
        /// Member display name.
        display_name: Option<String>,
    },
    /// To members: the session is over.
    #[serde(rename = "inspector.ended")]
    InspectorEnded {
        /// Human-readable notice.
        message: String,
    },
    /// To the sender of a request that could not be honoured.
    #[serde(rename = "error")]
    Error {
        /// What went wrong.
        message: String,
    },
    /// To everyone: a new problem was posted.
    #[serde(rename = "problem.created")]
    ProblemCreated {
        /// The stored record.
        problem: Problem,
    },
    /// To everyone: a new suggestion was posted.
    #[serde(rename = "suggestion.created")]
    SuggestionCreated {
        /// The stored record.
        suggestion: Suggestion,
    },
    /// To the requester: recent public problems and their suggestions.
    #[serde(rename = "globalProblems.response", rename_all = "camelCase")]
    GlobalProblems {
        /// Matching problems, oldest first by `timestamp`.
        problems: Vec<Problem>,
        /// Suggestions referencing the matching problems.
        suggestions: Vec<Suggestion>,
        /// Effective window in days.
        requested_days: u32,
        /// Server time of the reply (epoch ms).
        timestamp: i64,
    },
    /// To members: send a fresh telemetry snapshot.
    #[serde(rename = "inspector.requestSnapshot", rename_all = "camelCase")]
    RequestSnapshot {
        /// Session whose inspector asked.
        session_id: SessionId,
    },
    /// To everyone: the server is going away.
    #[serde(rename = "server.shutdown")]
    ServerShutdown {
        /// Human-readable notice.
        message: String,
    },
}

impl RelayEvent {
    /// Wire `type` of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "inspector.sessionStarted",
            Self::Joined { .. } => "joined",
            Self::InspectorJoined { .. } => "inspector.joined",
            Self::MemberJoined { .. } => "member.joined",
            Self::MemberLeft { .. } => "member.left",
            Self::InspectorEnded { .. } => "inspector.ended",
            Self::Error { .. } => "error",
            Self::ProblemCreated { .. } => "problem.created",
            Self::SuggestionCreated { .. } => "suggestion.created",
            Self::GlobalProblems { .. } => "globalProblems.response",
            Self::RequestSnapshot { .. } => "inspector.requestSnapshot",
            Self::ServerShutdown { .. } => "server.shutdown",
        }
    }

    /// `error` frame carrying the display text of `err`.
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}

/// A relayed telemetry frame as the inspector receives it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEnvelope {
    /// Original frame type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Session the frame was routed through.
    pub session_id: SessionId,
    /// Sender identifier, when the sender has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Sender display name, when it joined with one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Server receive time (epoch ms); client clocks are never trusted.
    pub ts: i64,
    /// Opaque remainder of the frame, including `payload`.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Anything the relay can put on the wire.
pub trait OutboundFrame: Serialize {
    /// Wire `type`, for logging.
    fn frame_type(&self) -> &str;
}

impl OutboundFrame for RelayEvent {
    fn frame_type(&self) -> &str {
        self.event_type()
    }
}

impl OutboundFrame for TelemetryEnvelope {
    fn frame_type(&self) -> &str {
        &self.kind
    }
}
