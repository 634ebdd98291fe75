//! HTML rendering of interrupts and their inline keyboards.
//!
//! Telegram's HTML dialect only honors a handful of tags, so everything
//! user-controlled goes through [`html_escape`] and fallbacks strip tags
//! instead of re-rendering.

use chrono::{DateTime, NaiveDateTime};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::client::types::{ActionKind, ThreadData};
use crate::utils::{short_id, truncate_str};

/// Longest email body shown inline before truncation.
const PREVIEW_CHARS: usize = 150;

/// Escape the three characters Telegram HTML cares about.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Drop HTML tags, keeping the text. Used when Telegram rejects a rendered
/// message and it has to go out plain.
pub fn strip_html_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Humanize an ISO timestamp ("June 05, 2025 at 02:30 PM"). Empty input
/// reads "not specified"; anything unparseable passes through untouched.
pub fn format_datetime(iso: &str) -> String {
    if iso.is_empty() {
        return "not specified".to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(iso) {
        return dt.format("%B %d, %Y at %I:%M %p").to_string();
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.format("%B %d, %Y at %I:%M %p").to_string();
    }
    iso.to_string()
}

fn icon_for(action: &ActionKind) -> &'static str {
    match action {
        ActionKind::Question => "❓",
        ActionKind::ResponseEmailDraft => "📧",
        ActionKind::Notify => "🔔",
        ActionKind::SendCalendarInvite => "📅",
        ActionKind::Unknown(_) => "⚠️",
    }
}

// ─── Message Rendering ───────────────────────────────────────────────────────

/// Render one interrupt as a Telegram HTML message.
pub fn interrupt_message(data: &ThreadData) -> String {
    let mut msg = format!(
        "{} <b>{}</b>\n\n",
        icon_for(&data.action_type),
        html_escape(data.action_type.as_str())
    );

    let subject = if data.email_subject == "Unknown" {
        "Email Draft"
    } else {
        data.email_subject.as_str()
    };
    let sender = if data.email_sender == "Unknown" {
        "AI Assistant"
    } else {
        data.email_sender.as_str()
    };
    msg.push_str(&format!(
        "<b>Subject:</b> {}\n<b>From:</b> {}\n",
        html_escape(subject),
        html_escape(sender)
    ));
    if !data.send_time.is_empty() {
        msg.push_str(&format!("<i>{}</i>\n", format_datetime(&data.send_time)));
    }
    msg.push_str("\n<a href='https://mail.google.com/'>Open Gmail</a>\n\n");

    match &data.action_type {
        ActionKind::Question => {
            let content = if data.action_content.is_empty() {
                "No question content available"
            } else {
                data.action_content.as_str()
            };
            msg.push_str(&format!("<b>Question:</b>\n{}\n", html_escape(content)));
        }
        ActionKind::ResponseEmailDraft => {
            if !data.action_content.is_empty() {
                msg.push_str(&format!(
                    "<b>Draft Summary:</b>\n{}\n\n",
                    html_escape(&data.action_content)
                ));
            } else if !data.email_content.is_empty() {
                let preview = truncate_str(&data.email_content, PREVIEW_CHARS);
                msg.push_str(&format!(
                    "<b>Email Preview:</b>\n{}\n\n",
                    html_escape(&preview)
                ));
            }
            msg.push_str("Please approve, edit, or reject this email draft.\n");
        }
        ActionKind::Notify => {
            let content = if data.action_content.is_empty() {
                "No notification content available"
            } else {
                data.action_content.as_str()
            };
            msg.push_str(&format!("<b>Notification:</b>\n{}\n", html_escape(content)));
        }
        ActionKind::SendCalendarInvite => {
            let invite = &data.calendar_invite;
            let title = if invite.title.is_empty() {
                "No title"
            } else {
                invite.title.as_str()
            };
            msg.push_str(&format!(
                "<b>Calendar Invite</b>\n<b>Title:</b> {}\n<b>Start:</b> {}\n<b>End:</b> {}\n",
                html_escape(title),
                format_datetime(&invite.start_time),
                format_datetime(&invite.end_time)
            ));
            if invite.emails.is_empty() {
                msg.push('\n');
            } else {
                msg.push_str(&format!(
                    "<b>Attendees:</b> {}\n\n",
                    html_escape(&invite.emails.join(", "))
                ));
            }
            msg.push_str("Please approve, edit, or reject this calendar invite.\n");
        }
        ActionKind::Unknown(_) => {
            if !data.action_content.is_empty() {
                msg.push_str(&format!("{}\n", html_escape(&data.action_content)));
            }
        }
    }

    msg.push_str(&format!("\n<i>ID: {}</i>", short_id(&data.thread_id)));
    msg
}

// ─── Keyboards ───────────────────────────────────────────────────────────────

/// Inline keyboard for one interrupt. Callback data is `verb_<thread_id>`;
/// the calendar edit verb keeps its own prefix so parsing can tell it apart
/// from a plain edit.
pub fn response_keyboard(action: &ActionKind, thread_id: &str) -> InlineKeyboardMarkup {
    let btn = |label: &str, data: String| InlineKeyboardButton::callback(label.to_string(), data);
    let rows: Vec<Vec<InlineKeyboardButton>> = match action {
        ActionKind::Question | ActionKind::Notify => vec![vec![
            btn("✏️ Respond", format!("respond_{thread_id}")),
            btn("❌ Ignore", format!("ignore_{thread_id}")),
        ]],
        ActionKind::ResponseEmailDraft => vec![
            vec![
                btn("✅ Approve", format!("accept_{thread_id}")),
                btn("✏️ Edit", format!("edit_{thread_id}")),
            ],
            vec![
                btn("💬 Respond", format!("respond_{thread_id}")),
                btn("❌ Ignore", format!("ignore_{thread_id}")),
            ],
        ],
        ActionKind::SendCalendarInvite => vec![
            vec![
                btn("✅ Approve", format!("accept_{thread_id}")),
                btn("✏️ Edit", format!("edit_calendar_{thread_id}")),
            ],
            vec![
                btn("💬 Respond", format!("respond_{thread_id}")),
                btn("❌ Reject", format!("ignore_{thread_id}")),
            ],
        ],
        // Unknown kinds accept everything, so offer everything.
        ActionKind::Unknown(_) => vec![
            vec![
                btn("✅ Approve", format!("accept_{thread_id}")),
                btn("✏️ Edit", format!("edit_{thread_id}")),
            ],
            vec![
                btn("💬 Respond", format!("respond_{thread_id}")),
                btn("❌ Ignore", format!("ignore_{thread_id}")),
            ],
        ],
    };
    InlineKeyboardMarkup::new(rows)
}

// ─── Callback Data ───────────────────────────────────────────────────────────

/// Verbs a button can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Accept,
    Ignore,
    Respond,
    Edit,
    EditCalendar,
    Unknown,
}

/// Split `verb_<thread_id>` callback data. `edit_calendar_` is matched
/// first since it contains the separator itself. Malformed data maps to
/// `Unknown` with an empty id.
pub fn parse_callback_data(data: &str) -> (CallbackAction, String) {
    if let Some(id) = data.strip_prefix("edit_calendar_") {
        return (CallbackAction::EditCalendar, id.to_string());
    }
    match data.split_once('_') {
        Some(("accept", id)) => (CallbackAction::Accept, id.to_string()),
        Some(("ignore", id)) => (CallbackAction::Ignore, id.to_string()),
        Some(("respond", id)) => (CallbackAction::Respond, id.to_string()),
        Some(("edit", id)) => (CallbackAction::Edit, id.to_string()),
        Some((_, id)) => (CallbackAction::Unknown, id.to_string()),
        None => (CallbackAction::Unknown, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::CalendarInvite;
    use teloxide::types::InlineKeyboardButtonKind;

    fn callback_data(button: &InlineKeyboardButton) -> &str {
        match &button.kind {
            InlineKeyboardButtonKind::CallbackData(data) => data,
            other => panic!("not a callback button: {other:?}"),
        }
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape("<b>Tom & Jerry</b>"),
            "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;"
        );
    }

    #[test]
    fn test_strip_html_tags() {
        assert_eq!(strip_html_tags("<b>bold</b> and <i>italic</i>"), "bold and italic");
        assert_eq!(strip_html_tags("no tags"), "no tags");
    }

    #[test]
    fn test_format_datetime_with_offset() {
        assert_eq!(
            format_datetime("2025-06-05T14:30:00Z"),
            "June 05, 2025 at 02:30 PM"
        );
    }

    #[test]
    fn test_format_datetime_naive() {
        assert_eq!(
            format_datetime("2025-06-05T09:05:00"),
            "June 05, 2025 at 09:05 AM"
        );
    }

    #[test]
    fn test_format_datetime_fallbacks() {
        assert_eq!(format_datetime(""), "not specified");
        assert_eq!(format_datetime("next tuesday"), "next tuesday");
    }

    #[test]
    fn test_question_message() {
        let data = ThreadData {
            thread_id: "abcdef123456".to_string(),
            action_type: ActionKind::Question,
            action_content: "Reply with <yes> or no?".to_string(),
            ..ThreadData::default()
        };
        let msg = interrupt_message(&data);
        assert!(msg.starts_with("❓ <b>Question</b>"));
        assert!(msg.contains("<b>Question:</b>\nReply with &lt;yes&gt; or no?"));
        assert!(msg.contains("<i>ID: abcdef12</i>"));
        // Missing envelope fields fall back to presentable defaults.
        assert!(msg.contains("<b>Subject:</b> Email Draft"));
        assert!(msg.contains("<b>From:</b> AI Assistant"));
    }

    #[test]
    fn test_question_message_without_content() {
        let data = ThreadData {
            action_type: ActionKind::Question,
            ..ThreadData::default()
        };
        assert!(interrupt_message(&data).contains("No question content available"));
    }

    #[test]
    fn test_draft_message_prefers_summary() {
        let data = ThreadData {
            action_type: ActionKind::ResponseEmailDraft,
            action_content: "Polite decline".to_string(),
            email_content: "Dear Bob, unfortunately...".to_string(),
            ..ThreadData::default()
        };
        let msg = interrupt_message(&data);
        assert!(msg.contains("<b>Draft Summary:</b>\nPolite decline"));
        assert!(!msg.contains("Email Preview"));
        assert!(msg.contains("Please approve, edit, or reject this email draft."));
    }

    #[test]
    fn test_draft_message_preview_truncates() {
        let data = ThreadData {
            action_type: ActionKind::ResponseEmailDraft,
            email_content: "x".repeat(200),
            email_sender: "eve@example.com".to_string(),
            email_subject: "Long one".to_string(),
            ..ThreadData::default()
        };
        let msg = interrupt_message(&data);
        let preview = format!("{}...", "x".repeat(150));
        assert!(msg.contains(&preview));
        assert!(!msg.contains(&"x".repeat(151)));
        assert!(msg.contains("<b>Subject:</b> Long one"));
        assert!(msg.contains("<b>From:</b> eve@example.com"));
    }

    #[test]
    fn test_message_includes_send_time() {
        let data = ThreadData {
            action_type: ActionKind::Notify,
            action_content: "FYI".to_string(),
            send_time: "2025-06-05T14:30:00Z".to_string(),
            ..ThreadData::default()
        };
        let msg = interrupt_message(&data);
        assert!(msg.contains("<i>June 05, 2025 at 02:30 PM</i>"));
    }

    #[test]
    fn test_calendar_message() {
        let data = ThreadData {
            action_type: ActionKind::SendCalendarInvite,
            calendar_invite: CalendarInvite {
                title: "Board sync".to_string(),
                start_time: "2025-06-05T14:00:00".to_string(),
                end_time: "2025-06-05T15:00:00".to_string(),
                emails: vec!["a@x.com".to_string(), "b@x.com".to_string()],
            },
            ..ThreadData::default()
        };
        let msg = interrupt_message(&data);
        assert!(msg.contains("<b>Title:</b> Board sync"));
        assert!(msg.contains("<b>Start:</b> June 05, 2025 at 02:00 PM"));
        assert!(msg.contains("<b>Attendees:</b> a@x.com, b@x.com"));
        assert!(msg.contains("Please approve, edit, or reject this calendar invite."));
    }

    #[test]
    fn test_calendar_message_empty_fields() {
        let data = ThreadData {
            action_type: ActionKind::SendCalendarInvite,
            ..ThreadData::default()
        };
        let msg = interrupt_message(&data);
        assert!(msg.contains("<b>Title:</b> No title"));
        assert!(msg.contains("<b>Start:</b> not specified"));
        assert!(!msg.contains("Attendees"));
    }

    #[test]
    fn test_unknown_kind_message() {
        let data = ThreadData {
            action_type: ActionKind::Unknown("FutureKind".to_string()),
            ..ThreadData::default()
        };
        let msg = interrupt_message(&data);
        assert!(msg.starts_with("⚠️ <b>FutureKind</b>"));
    }

    #[test]
    fn test_keyboard_question() {
        let markup = response_keyboard(&ActionKind::Question, "t-1");
        assert_eq!(markup.inline_keyboard.len(), 1);
        let row = &markup.inline_keyboard[0];
        assert_eq!(row[0].text, "✏️ Respond");
        assert_eq!(callback_data(&row[0]), "respond_t-1");
        assert_eq!(callback_data(&row[1]), "ignore_t-1");
    }

    #[test]
    fn test_keyboard_draft() {
        let markup = response_keyboard(&ActionKind::ResponseEmailDraft, "t-1");
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(callback_data(&markup.inline_keyboard[0][0]), "accept_t-1");
        assert_eq!(callback_data(&markup.inline_keyboard[0][1]), "edit_t-1");
        assert_eq!(callback_data(&markup.inline_keyboard[1][0]), "respond_t-1");
        assert_eq!(callback_data(&markup.inline_keyboard[1][1]), "ignore_t-1");
    }

    #[test]
    fn test_keyboard_calendar_uses_calendar_edit() {
        let markup = response_keyboard(&ActionKind::SendCalendarInvite, "t-1");
        assert_eq!(callback_data(&markup.inline_keyboard[0][1]), "edit_calendar_t-1");
        assert_eq!(markup.inline_keyboard[1][1].text, "❌ Reject");
    }

    #[test]
    fn test_parse_callback_data_round_trip() {
        assert_eq!(
            parse_callback_data("accept_abc123"),
            (CallbackAction::Accept, "abc123".to_string())
        );
        assert_eq!(
            parse_callback_data("edit_calendar_abc123"),
            (CallbackAction::EditCalendar, "abc123".to_string())
        );
        // A plain edit never swallows the calendar prefix in reverse.
        assert_eq!(
            parse_callback_data("edit_abc123"),
            (CallbackAction::Edit, "abc123".to_string())
        );
    }

    #[test]
    fn test_parse_callback_data_thread_ids_with_separators() {
        let (action, id) = parse_callback_data("respond_thread_with_underscores");
        assert_eq!(action, CallbackAction::Respond);
        assert_eq!(id, "thread_with_underscores");
    }

    #[test]
    fn test_parse_callback_data_malformed() {
        assert_eq!(
            parse_callback_data("garbage"),
            (CallbackAction::Unknown, String::new())
        );
        assert_eq!(
            parse_callback_data("foo_bar"),
            (CallbackAction::Unknown, "bar".to_string())
        );
    }
}
