//! Types shared between the agent client and the bot layer.
//!
//! The agent interrupts with one of four action kinds, and each kind
//! accepts a fixed set of response verbs. Everything the bot needs to
//! present one interrupted thread is collected into [`ThreadData`], which
//! crosses the state-store boundary as opaque JSON.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::Result;

// ─── Action Kinds ────────────────────────────────────────────────────────────

/// What the agent is asking the user to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// The agent needs an answer to a question.
    Question,
    /// An email draft awaits approval or editing.
    ResponseEmailDraft,
    /// A notification the user can acknowledge or respond to.
    Notify,
    /// A calendar invite awaits approval or editing.
    SendCalendarInvite,
    /// Anything unrecognized. The raw name is kept so responses echo it
    /// back unchanged.
    Unknown(String),
}

impl ActionKind {
    /// Parse an action name, tolerating the aliases the agent has been seen
    /// emitting. Unrecognized names pass through as [`ActionKind::Unknown`].
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return ActionKind::Unknown("Unknown".to_string());
        }
        match raw.to_lowercase().as_str() {
            "question" => ActionKind::Question,
            "email" | "emaildraft" | "responseemaildraft" => ActionKind::ResponseEmailDraft,
            "notify" => ActionKind::Notify,
            "invite" | "calendar" | "sendcalendarinvite" | "responsecalendarinvite" => {
                ActionKind::SendCalendarInvite
            }
            _ => ActionKind::Unknown(raw.to_string()),
        }
    }

    /// Canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Question => "Question",
            ActionKind::ResponseEmailDraft => "ResponseEmailDraft",
            ActionKind::Notify => "Notify",
            ActionKind::SendCalendarInvite => "SendCalendarInvite",
            ActionKind::Unknown(raw) => raw,
        }
    }

    /// Response verbs the agent accepts for this action. Unknown kinds get
    /// the full set so the user is never stuck without buttons that work.
    pub fn allowed_responses(&self) -> &'static [ResponseKind] {
        match self {
            ActionKind::Question | ActionKind::Notify => {
                &[ResponseKind::Respond, ResponseKind::Ignore]
            }
            ActionKind::ResponseEmailDraft
            | ActionKind::SendCalendarInvite
            | ActionKind::Unknown(_) => &[
                ResponseKind::Accept,
                ResponseKind::Edit,
                ResponseKind::Ignore,
                ResponseKind::Respond,
            ],
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ActionKind::Unknown(_))
    }
}

impl Default for ActionKind {
    fn default() -> Self {
        ActionKind::Unknown("Unknown".to_string())
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Serialized as the plain wire name so stored payloads read naturally.
impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ActionKind::parse(&raw))
    }
}

// ─── Response Kinds ──────────────────────────────────────────────────────────

/// The four resume verbs the agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Accept,
    Ignore,
    Respond,
    Edit,
}

impl ResponseKind {
    /// Wire name used in resume payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Accept => "accept",
            ResponseKind::Ignore => "ignore",
            ResponseKind::Respond => "response",
            ResponseKind::Edit => "edit",
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Thread Data ─────────────────────────────────────────────────────────────

/// Calendar invite fields carried by `SendCalendarInvite` interrupts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarInvite {
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub emails: Vec<String>,
}

impl CalendarInvite {
    /// True when the agent supplied nothing usable to edit.
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.start_time.is_empty()
            && self.end_time.is_empty()
            && self.emails.is_empty()
    }
}

/// Everything the bot needs to present one interrupted thread.
///
/// Built by the extraction pass in [`super::extract`]. Missing email fields
/// keep the `"Unknown"` sentinel the formatter knows how to replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadData {
    pub thread_id: String,
    pub action_type: ActionKind,
    pub action_content: String,
    pub email_sender: String,
    pub email_subject: String,
    pub email_content: String,
    pub send_time: String,
    pub assistant_id: Option<String>,
    pub calendar_invite: CalendarInvite,
}

impl Default for ThreadData {
    fn default() -> Self {
        Self {
            thread_id: String::new(),
            action_type: ActionKind::default(),
            action_content: String::new(),
            email_sender: "Unknown".to_string(),
            email_subject: "Unknown".to_string(),
            email_content: String::new(),
            send_time: String::new(),
            assistant_id: None,
            calendar_invite: CalendarInvite::default(),
        }
    }
}

impl ThreadData {
    /// Store-boundary conversion. The store keeps payloads as opaque JSON;
    /// this and [`ThreadData::from_value`] are the only places the shape is
    /// assumed.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

// ─── Resume Payloads ─────────────────────────────────────────────────────────

/// Build the `runs/wait` resume envelope for one response.
///
/// `content` is the user's free text for respond and edit; accept and
/// ignore carry no arguments. When no assistant id is known the deployment
/// default `"main"` is used.
pub fn resume_payload(
    kind: ResponseKind,
    content: &str,
    action: &ActionKind,
    assistant_id: Option<&str>,
) -> Value {
    let args = match kind {
        ResponseKind::Respond => Value::String(content.to_string()),
        ResponseKind::Accept | ResponseKind::Ignore => Value::Null,
        ResponseKind::Edit => edit_args(content, action),
    };
    json!({
        "command": { "resume": [ { "type": kind.as_str(), "args": args } ] },
        "assistant_id": assistant_id.unwrap_or("main"),
    })
}

/// Arguments for an edit, shaped per action. Calendar edits arrive from the
/// guided flow as a JSON object string; anything that does not parse falls
/// back to a plain content edit, which the agent also tolerates.
fn edit_args(content: &str, action: &ActionKind) -> Value {
    match action {
        ActionKind::ResponseEmailDraft => json!({
            "action": "ResponseEmailDraft",
            "args": { "content": content, "new_recipients": [] },
        }),
        ActionKind::SendCalendarInvite => {
            let trimmed = content.trim();
            if trimmed.starts_with('{') && trimmed.ends_with('}') {
                if let Ok(invite) = serde_json::from_str::<CalendarInvite>(trimmed) {
                    return json!({
                        "action": "SendCalendarInvite",
                        "args": {
                            "emails": invite.emails,
                            "title": invite.title,
                            "start_time": invite.start_time,
                            "end_time": invite.end_time,
                        },
                    });
                }
            }
            json!({
                "action": "SendCalendarInvite",
                "args": { "content": content },
            })
        }
        other => json!({
            "action": other.as_str(),
            "args": { "content": content },
        }),
    }
}
