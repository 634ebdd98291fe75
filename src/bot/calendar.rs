//! Guided calendar invite editing.
//!
//! Three prompts walk the user through title, times, and attendees. The
//! flow state lives in the state store between messages, and every
//! transition is a pure function of (state, input) so the whole flow is
//! testable without a live chat. `/keep` leaves a field as is, `/cancel`
//! abandons the edit.

use chrono::{DateTime, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::format::html_escape;
use crate::client::types::CalendarInvite;

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("address pattern compiles"));

/// Which prompt the user is currently answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStep {
    Title,
    Datetime,
    Emails,
}

/// Flow state stored under the `calendar_edit` user-state key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEditState {
    pub thread_id: String,
    pub step: EditStep,
    pub draft: CalendarInvite,
}

/// Outcome of feeding one message into the flow.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Store `next` and send `prompt`.
    Continue {
        next: CalendarEditState,
        prompt: String,
    },
    /// Flow finished; submit the edited invite.
    Submit {
        invite: CalendarInvite,
        summary: String,
    },
    /// Input rejected; re-prompt without advancing.
    Retry { message: String },
    /// User typed `/cancel`; drop the flow state.
    Cancelled,
}

/// Start the flow at the title step.
pub fn begin(thread_id: &str, invite: &CalendarInvite) -> (CalendarEditState, String) {
    let state = CalendarEditState {
        thread_id: thread_id.to_string(),
        step: EditStep::Title,
        draft: invite.clone(),
    };
    let prompt = title_prompt(invite);
    (state, prompt)
}

/// Apply one user message to the flow.
pub fn advance(state: &CalendarEditState, input: &str) -> StepOutcome {
    let text = input.trim();
    if text.eq_ignore_ascii_case("/cancel") {
        return StepOutcome::Cancelled;
    }
    let keep = text.eq_ignore_ascii_case("/keep");
    let mut draft = state.draft.clone();

    match state.step {
        EditStep::Title => {
            if !keep {
                draft.title = text.to_string();
            }
            let prompt = datetime_prompt(&draft);
            StepOutcome::Continue {
                next: CalendarEditState {
                    thread_id: state.thread_id.clone(),
                    step: EditStep::Datetime,
                    draft,
                },
                prompt,
            }
        }
        EditStep::Datetime => {
            if !keep {
                match parse_time_range(text) {
                    Ok((start, end)) => {
                        draft.start_time = start;
                        draft.end_time = end;
                    }
                    Err(message) => return StepOutcome::Retry { message },
                }
            }
            let prompt = emails_prompt(&draft);
            StepOutcome::Continue {
                next: CalendarEditState {
                    thread_id: state.thread_id.clone(),
                    step: EditStep::Emails,
                    draft,
                },
                prompt,
            }
        }
        EditStep::Emails => {
            if !keep {
                match parse_emails(text) {
                    Ok(emails) => draft.emails = emails,
                    Err(message) => return StepOutcome::Retry { message },
                }
            }
            let summary = summary_text(&draft);
            StepOutcome::Submit {
                invite: draft,
                summary,
            }
        }
    }
}

// ─── Input Parsing ───────────────────────────────────────────────────────────

fn parse_time_range(text: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = text.split('|').map(str::trim).collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
        return Err("❌ Please provide both start and end times separated by |.\n\
             Example: 2024-04-16T14:00:00 | 2024-04-16T15:00:00\n\nPlease try again:"
            .to_string());
    }
    let (Some(start), Some(end)) = (parse_iso(parts[0]), parse_iso(parts[1])) else {
        return Err("❌ Invalid date/time format. Please use ISO format: \
             YYYY-MM-DDThh:mm:ss\n\nPlease try again:"
            .to_string());
    };
    if end <= start {
        return Err("❌ End time must be after start time.\n\nPlease try again:".to_string());
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

fn parse_emails(text: &str) -> Result<Vec<String>, String> {
    let emails: Vec<String> = text
        .split(',')
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    let invalid: Vec<&str> = emails
        .iter()
        .filter(|e| !ADDRESS_RE.is_match(e))
        .map(String::as_str)
        .collect();
    if !invalid.is_empty() {
        return Err(format!(
            "❌ Invalid email address(es): {}\n\nPlease enter valid email addresses separated by commas:",
            invalid.join(", ")
        ));
    }
    Ok(emails)
}

// ─── Prompts ─────────────────────────────────────────────────────────────────

fn title_prompt(invite: &CalendarInvite) -> String {
    let current = if invite.title.is_empty() {
        "No title"
    } else {
        invite.title.as_str()
    };
    format!(
        "<b>Step 1/3: Edit Meeting Title</b>\n\nCurrent title: <i>{}</i>\n\n\
         Please enter the new meeting title, or type <code>/keep</code> to keep the current title:",
        html_escape(current)
    )
}

fn datetime_prompt(draft: &CalendarInvite) -> String {
    let example = match parse_iso(&draft.start_time) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => "YYYY-MM-DDThh:mm:ss".to_string(),
    };
    format!(
        "<b>Step 2/3: Edit Date and Time</b>\n\nCurrent start: <i>{}</i>\nCurrent end: <i>{}</i>\n\n\
         Please enter the new date and time in this format:\n<code>START_TIME | END_TIME</code>\n\n\
         Example: <code>{example} | {example}</code>\n\n\
         Or type <code>/keep</code> to keep the current date and time.",
        html_escape(&draft.start_time),
        html_escape(&draft.end_time)
    )
}

fn emails_prompt(draft: &CalendarInvite) -> String {
    let current = if draft.emails.is_empty() {
        "None".to_string()
    } else {
        draft
            .emails
            .iter()
            .map(|e| format!("• {}", html_escape(e)))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "<b>Step 3/3: Edit Attendees</b>\n\nCurrent attendees:\n{current}\n\n\
         Please enter email addresses separated by commas, or type <code>/keep</code> to keep the current attendees:"
    )
}

fn summary_text(draft: &CalendarInvite) -> String {
    format!(
        "<b>Calendar Editing Complete!</b>\n\nTitle: {}\nStart: {}\nEnd: {}\nAttendees: {}\n\nSubmitting your changes...",
        html_escape(&draft.title),
        html_escape(&draft.start_time),
        html_escape(&draft.end_time),
        html_escape(&draft.emails.join(", "))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> CalendarInvite {
        CalendarInvite {
            title: "Board sync".to_string(),
            start_time: "2025-06-05T14:00:00".to_string(),
            end_time: "2025-06-05T15:00:00".to_string(),
            emails: vec!["a@example.com".to_string()],
        }
    }

    fn advance_to(state: &CalendarEditState, input: &str) -> (CalendarEditState, String) {
        match advance(state, input) {
            StepOutcome::Continue { next, prompt } => (next, prompt),
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[test]
    fn test_begin_prompts_for_title() {
        let (state, prompt) = begin("t-1", &invite());
        assert_eq!(state.step, EditStep::Title);
        assert_eq!(state.thread_id, "t-1");
        assert!(prompt.contains("Step 1/3"));
        assert!(prompt.contains("Board sync"));
    }

    #[test]
    fn test_full_walk_replacing_everything() {
        let (state, _) = begin("t-1", &invite());

        let (state, prompt) = advance_to(&state, "All hands");
        assert_eq!(state.step, EditStep::Datetime);
        assert!(prompt.contains("Step 2/3"));

        let (state, prompt) = advance_to(&state, "2025-06-06T10:00:00 | 2025-06-06T11:30:00");
        assert_eq!(state.step, EditStep::Emails);
        assert!(prompt.contains("Step 3/3"));
        assert!(prompt.contains("• a@example.com"));

        match advance(&state, "x@example.com, y@example.org") {
            StepOutcome::Submit { invite, summary } => {
                assert_eq!(invite.title, "All hands");
                assert_eq!(invite.start_time, "2025-06-06T10:00:00");
                assert_eq!(invite.end_time, "2025-06-06T11:30:00");
                assert_eq!(invite.emails, vec!["x@example.com", "y@example.org"]);
                assert!(summary.contains("All hands"));
                assert!(summary.contains("Submitting your changes"));
            }
            other => panic!("expected Submit, got {other:?}"),
        }
    }

    #[test]
    fn test_keep_everywhere_preserves_invite() {
        let original = invite();
        let (state, _) = begin("t-1", &original);
        let (state, _) = advance_to(&state, "/keep");
        let (state, _) = advance_to(&state, "/KEEP");
        match advance(&state, "/keep") {
            StepOutcome::Submit { invite, .. } => assert_eq!(invite, original),
            other => panic!("expected Submit, got {other:?}"),
        }
    }

    #[test]
    fn test_cancel_at_any_step() {
        let (state, _) = begin("t-1", &invite());
        assert_eq!(advance(&state, "/cancel"), StepOutcome::Cancelled);

        let (state, _) = advance_to(&state, "New title");
        assert_eq!(advance(&state, " /cancel "), StepOutcome::Cancelled);
    }

    #[test]
    fn test_datetime_requires_separator() {
        let (state, _) = begin("t-1", &invite());
        let (state, _) = advance_to(&state, "/keep");

        match advance(&state, "2025-06-06T10:00:00") {
            StepOutcome::Retry { message } => {
                assert!(message.contains("separated by |"));
            }
            other => panic!("expected Retry, got {other:?}"),
        }
        // The step has not advanced; valid input still works.
        assert_eq!(state.step, EditStep::Datetime);
    }

    #[test]
    fn test_datetime_rejects_bad_format() {
        let (state, _) = begin("t-1", &invite());
        let (state, _) = advance_to(&state, "/keep");

        match advance(&state, "tomorrow | later") {
            StepOutcome::Retry { message } => assert!(message.contains("ISO format")),
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[test]
    fn test_datetime_rejects_end_before_start() {
        let (state, _) = begin("t-1", &invite());
        let (state, _) = advance_to(&state, "/keep");

        match advance(&state, "2025-06-06T12:00:00 | 2025-06-06T11:00:00") {
            StepOutcome::Retry { message } => {
                assert!(message.contains("End time must be after"));
            }
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[test]
    fn test_datetime_accepts_rfc3339_offsets() {
        let (state, _) = begin("t-1", &invite());
        let (state, _) = advance_to(&state, "/keep");
        let (state, _) =
            advance_to(&state, "2025-06-06T10:00:00Z | 2025-06-06T11:00:00Z");
        assert_eq!(state.draft.start_time, "2025-06-06T10:00:00Z");
    }

    #[test]
    fn test_emails_rejects_invalid_addresses() {
        let (state, _) = begin("t-1", &invite());
        let (state, _) = advance_to(&state, "/keep");
        let (state, _) = advance_to(&state, "/keep");

        match advance(&state, "ok@example.com, not-an-address") {
            StepOutcome::Retry { message } => {
                assert!(message.contains("not-an-address"));
                assert!(!message.contains("ok@example.com"));
            }
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[test]
    fn test_state_survives_json_round_trip() {
        let (state, _) = begin("t-1", &invite());
        let (state, _) = advance_to(&state, "Renamed");

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["step"], serde_json::json!("datetime"));
        let back: CalendarEditState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_submitted_invite_serializes_for_edit_payload() {
        let (state, _) = begin("t-1", &invite());
        let (state, _) = advance_to(&state, "/keep");
        let (state, _) = advance_to(&state, "/keep");
        let StepOutcome::Submit { invite, .. } = advance(&state, "/keep") else {
            panic!("expected Submit");
        };

        let json = serde_json::to_string(&invite).unwrap();
        let parsed: CalendarInvite = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, invite);
    }
}
