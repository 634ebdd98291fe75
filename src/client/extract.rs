//! Extraction of presentable data from raw thread state.
//!
//! The agent's thread state is a loosely shaped JSON document whose layout
//! has drifted across deployments. Interrupt payloads, graph write logs,
//! and checkpoint history all may carry the pieces we need, so extraction
//! runs in phases over each location in turn, filling only fields that are
//! still missing:
//!
//! ```text
//! metadata ──▶ interrupts ──▶ writes ──▶ history ──▶ inference ──▶ cleanup
//! ```
//!
//! The result always has every field populated, with `"Unknown"` sentinels
//! where nothing could be found.

use serde_json::Value;
use tracing::debug;

use super::types::{ActionKind, CalendarInvite, ThreadData};

/// Extract everything needed to present one interrupted thread.
///
/// `state` is the document from `GET /threads/{id}/state`; `history` the
/// optional checkpoint list from `GET /threads/{id}/history`, used only to
/// backfill fields the live state did not provide.
pub fn thread_data(thread_id: &str, state: &Value, history: Option<&[Value]>) -> ThreadData {
    let mut data = ThreadData {
        thread_id: thread_id.to_string(),
        ..ThreadData::default()
    };

    apply_metadata(&mut data, state);
    apply_interrupts(&mut data, state);

    for writes in [state.pointer("/metadata/writes"), state.pointer("/values/writes")]
        .into_iter()
        .flatten()
    {
        merge_email(&mut data, &email_from_writes(writes));
        if data.action_type.is_unknown() {
            merge_action(&mut data, &action_from_writes(writes));
        }
    }

    if let Some(entries) = history {
        apply_history(&mut data, entries);
    }

    infer_action_kind(&mut data);
    cleanup(&mut data);
    debug!(
        thread = crate::utils::short_id(thread_id),
        action = %data.action_type,
        "Extracted thread data"
    );
    data
}

// ─── Partial Results ─────────────────────────────────────────────────────────

/// Email fields found in one location. `None` means not found there.
#[derive(Debug, Default)]
struct EmailInfo {
    sender: Option<String>,
    subject: Option<String>,
    content: Option<String>,
    send_time: Option<String>,
}

/// Action fields found in one location.
#[derive(Debug, Default)]
struct ActionInfo {
    kind: Option<String>,
    content: Option<String>,
    calendar: Option<CalendarInvite>,
}

/// Copy email fields into the result, but only where it still holds the
/// missing-value sentinel.
fn merge_email(data: &mut ThreadData, info: &EmailInfo) {
    if data.email_sender == "Unknown" {
        if let Some(sender) = &info.sender {
            data.email_sender = sender.clone();
        }
    }
    if data.email_subject == "Unknown" {
        if let Some(subject) = &info.subject {
            data.email_subject = subject.clone();
        }
    }
    if data.email_content.is_empty() {
        if let Some(content) = &info.content {
            data.email_content = content.clone();
        }
    }
    if data.send_time.is_empty() {
        if let Some(send_time) = &info.send_time {
            data.send_time = send_time.clone();
        }
    }
}

fn merge_action(data: &mut ThreadData, info: &ActionInfo) {
    if let Some(kind) = &info.kind {
        data.action_type = ActionKind::parse(kind);
    }
    if data.action_content.is_empty() {
        if let Some(content) = &info.content {
            data.action_content = content.clone();
        }
    }
    if let Some(calendar) = &info.calendar {
        if data.calendar_invite.is_empty() {
            data.calendar_invite = calendar.clone();
        }
    }
}

// ─── Phase 1: Metadata ───────────────────────────────────────────────────────

fn apply_metadata(data: &mut ThreadData, state: &Value) {
    data.assistant_id = str_at(state, "/metadata/assistant_id")
        .or_else(|| str_at(state, "/metadata/graph_id"))
        .map(str::to_string);
}

// ─── Phase 2: Interrupt Payloads ─────────────────────────────────────────────

fn apply_interrupts(data: &mut ThreadData, state: &Value) {
    // Newer deployments put interrupt descriptors straight into values;
    // when that list exists it is authoritative and tasks are not consulted.
    if let Some(list) = state.pointer("/values/interrupts").and_then(Value::as_array) {
        if apply_value_interrupt(data, list) {
            return;
        }
    }
    // Older ones nest them under pending tasks.
    let Some(tasks) = state.get("tasks").and_then(Value::as_array) else {
        return;
    };
    for task in tasks {
        if let Some(payload) = task.pointer("/interrupts/0/value/0") {
            apply_interrupt_payload(data, payload);
        }
    }
}

/// Handle the `values.interrupts` descriptor list; newest entry wins.
/// Returns false only when the list was empty.
fn apply_value_interrupt(data: &mut ThreadData, list: &[Value]) -> bool {
    let newest = list.iter().max_by_key(|entry| {
        entry
            .get("timestamp")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    });
    let Some(entry) = newest else { return false };

    let kind = entry
        .get("interrupt_type")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    data.action_type = ActionKind::parse(kind);

    if let Some(description) = entry.get("description").and_then(Value::as_str) {
        data.action_content = description.trim().to_string();
        if data.action_type == ActionKind::ResponseEmailDraft {
            merge_email(data, &email_from_description(description));
        }
    }
    if data.action_type == ActionKind::SendCalendarInvite {
        if let Some(args) = entry.pointer("/value/0/action_request/args") {
            if let Some(calendar) = calendar_from_args(args) {
                data.calendar_invite = calendar;
            }
        }
    }
    true
}

/// One `tasks[].interrupts[0].value[0]` payload.
fn apply_interrupt_payload(data: &mut ThreadData, payload: &Value) {
    if let Some(request) = payload.get("action_request") {
        if let Some(action) = request.get("action").and_then(Value::as_str) {
            data.action_type = ActionKind::parse(action);
        }
        if let Some(args) = request.get("args") {
            if let Some(content) = content_field(args) {
                data.action_content = content;
            }
            if data.action_type == ActionKind::SendCalendarInvite {
                if let Some(calendar) = calendar_from_args(args) {
                    data.calendar_invite = calendar;
                }
            }
        }
    }
    if let Some(description) = payload.get("description").and_then(Value::as_str) {
        // Questions sometimes arrive with their text only in the description.
        if data.action_type == ActionKind::Question && data.action_content.is_empty() {
            data.action_content = description.trim().to_string();
        }
        merge_email(data, &email_from_description(description));
    }
}

// ─── Phase 3: Graph Writes ───────────────────────────────────────────────────

fn email_from_writes(writes: &Value) -> EmailInfo {
    let mut info = EmailInfo::default();

    // Draft nodes log the generated email as a ResponseEmailDraft tool call.
    for node in ["rewrite", "draft_response"] {
        if info.content.is_some() {
            break;
        }
        for call in tool_calls_under(writes.get(node)) {
            if call.name == "ResponseEmailDraft" {
                if let Some(content) = call.args.get("content").and_then(Value::as_str) {
                    info.content = Some(content.to_string());
                    break;
                }
            }
        }
    }

    // Ingest nodes carry the original inbound email.
    for node in ["__start__", "triage_input", "read_email"] {
        let Some(email) = writes.pointer(&format!("/{node}/email")) else {
            continue;
        };
        fill(&mut info.sender, email.get("from_email"));
        fill(&mut info.subject, email.get("subject"));
        fill(&mut info.content, email.get("page_content"));
        fill(&mut info.send_time, email.get("send_time"));
    }

    // Triage summaries repeat sender and subject under their own names.
    if let Some(triage) = writes.pointer("/triage_input/triage") {
        fill(&mut info.subject, triage.get("email_subject"));
        fill(&mut info.sender, triage.get("email_sender"));
    }

    info
}

fn action_from_writes(writes: &Value) -> ActionInfo {
    let mut info = ActionInfo::default();

    // Tool calls name the action directly.
    for node in ["rewrite", "draft_response"] {
        for call in tool_calls_under(writes.get(node)) {
            info.kind = Some(call.name.clone());
            if info.content.is_none() {
                info.content = content_field(&call.args);
            }
            if ActionKind::parse(&call.name) == ActionKind::SendCalendarInvite {
                info.calendar = calendar_from_args(&call.args);
            }
            return info;
        }
    }

    // Triage decisions carry the action as a plain field.
    for node in ["__start__", "triage_input"] {
        let Some(triage) = writes.pointer(&format!("/{node}/triage")) else {
            continue;
        };
        if let Some(response) = triage.get("response").and_then(Value::as_str) {
            if response != "no" {
                info.kind = Some(response.to_string());
            }
        }
        if info.kind.is_none() {
            if let Some(action) = triage.get("action").and_then(Value::as_str) {
                info.kind = Some(action.to_string());
            }
        }
        if info.kind.is_some() {
            info.content = content_field(triage);
            return info;
        }
    }

    // Task results, seen on some checkpoint layouts.
    if let Some(tasks) = writes.get("tasks").and_then(Value::as_array) {
        for task in tasks {
            let Some(result) = task.get("result") else { continue };
            if let Some(action) = result.get("action").and_then(Value::as_str) {
                info.kind = Some(action.to_string());
                info.content = content_field(result);
                return info;
            }
            if let Some(response) = str_at(result, "/triage/response") {
                info.kind = Some(response.to_string());
                info.content = str_at(result, "/triage/content").map(str::to_string);
                return info;
            }
        }
    }

    // Last resorts: a node keyed by the action name, or a message that
    // reads like a question.
    if let Some(map) = writes.as_object() {
        for (key, section) in map {
            if !ActionKind::parse(key).is_unknown() {
                info.kind = Some(key.clone());
                info.content = content_field(section);
                return info;
            }
        }
    }
    if let Some(messages) = writes.get("messages").and_then(Value::as_array) {
        for message in messages {
            if let Some(content) = message.get("content").and_then(Value::as_str) {
                info.content = Some(content.to_string());
                if content.contains('?') {
                    info.kind = Some("Question".to_string());
                }
                return info;
            }
        }
    }

    info
}

// ─── Phase 4: Checkpoint History ─────────────────────────────────────────────

/// Backfill from older checkpoints, newest first, until nothing is missing.
fn apply_history(data: &mut ThreadData, entries: &[Value]) {
    for entry in entries {
        if !needs_more(data) {
            return;
        }
        for writes in [entry.pointer("/metadata/writes"), entry.pointer("/values/writes")]
            .into_iter()
            .flatten()
        {
            merge_email(data, &email_from_writes(writes));
            if data.action_type.is_unknown() {
                merge_action(data, &action_from_writes(writes));
            }
        }
    }
}

fn needs_more(data: &ThreadData) -> bool {
    data.action_type.is_unknown()
        || data.email_sender == "Unknown"
        || data.email_subject == "Unknown"
        || data.email_content.is_empty()
}

// ─── Phase 5: Inference ──────────────────────────────────────────────────────

/// When no location named the action, guess it from what was found.
fn infer_action_kind(data: &mut ThreadData) {
    if !data.action_type.is_unknown() {
        return;
    }
    if !data.email_content.is_empty() {
        data.action_type = ActionKind::ResponseEmailDraft;
    } else if !data.calendar_invite.title.is_empty() || !data.calendar_invite.start_time.is_empty()
    {
        data.action_type = ActionKind::SendCalendarInvite;
    } else if !data.action_content.is_empty() {
        data.action_type = ActionKind::Question;
    }
}

// ─── Phase 6: Cleanup ────────────────────────────────────────────────────────

fn cleanup(data: &mut ThreadData) {
    data.action_content = unescape(&data.action_content);
    data.email_content = unescape(&data.email_content);

    // Drafts without an envelope still render with a sensible header.
    if !data.email_content.is_empty() {
        if data.email_subject == "Unknown" {
            data.email_subject = "Email Draft".to_string();
        }
        if data.email_sender == "Unknown" {
            data.email_sender = "AI Assistant".to_string();
        }
    }
}

/// Undo the double-escaping that JSON-in-JSON payloads accumulate.
fn unescape(s: &str) -> String {
    s.replace("\\n", "\n")
        .replace("\r\n", "\n")
        .replace("\\t", "\t")
        .replace("\\u00a0", " ")
}

// ─── Shared Helpers ──────────────────────────────────────────────────────────

/// A tool call with its arguments already parsed into a JSON object.
struct ToolCall {
    name: String,
    args: Value,
}

/// Collect tool calls from a node's message list, handling both the direct
/// form and the OpenAI-style `additional_kwargs` form whose arguments are a
/// JSON string.
fn tool_calls_under(node: Option<&Value>) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let Some(messages) = node
        .and_then(|n| n.get("messages"))
        .and_then(Value::as_array)
    else {
        return calls;
    };
    for message in messages {
        if let Some(list) = message.get("tool_calls").and_then(Value::as_array) {
            for call in list {
                if let Some(name) = call.get("name").and_then(Value::as_str) {
                    calls.push(ToolCall {
                        name: name.to_string(),
                        args: call.get("args").cloned().unwrap_or(Value::Null),
                    });
                }
            }
        }
        let Some(list) = message
            .pointer("/additional_kwargs/tool_calls")
            .and_then(Value::as_array)
        else {
            continue;
        };
        for call in list {
            let Some(function) = call.get("function") else { continue };
            let Some(name) = function.get("name").and_then(Value::as_str) else {
                continue;
            };
            let args = function
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(Value::Null);
            calls.push(ToolCall {
                name: name.to_string(),
                args,
            });
        }
    }
    calls
}

/// The free-text payload of an args object, under whichever key this
/// deployment used.
fn content_field(args: &Value) -> Option<String> {
    for key in ["content", "question", "message"] {
        if let Some(text) = args.get(key).and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }
    None
}

fn calendar_from_args(args: &Value) -> Option<CalendarInvite> {
    let invite = CalendarInvite {
        title: args
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        start_time: args
            .get("start_time")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        end_time: args
            .get("end_time")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        emails: args
            .get("emails")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    };
    if invite.is_empty() {
        None
    } else {
        Some(invite)
    }
}

/// Parse an email out of a human-readable interrupt description of the form
/// "From: ...\nSubject: ...\n\n<body>".
fn email_from_description(description: &str) -> EmailInfo {
    let mut info = EmailInfo::default();
    if description.contains("From:") && description.contains("Subject:") {
        for line in description.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("From:") {
                info.sender = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("Subject:") {
                info.subject = Some(rest.trim().to_string());
            }
        }
        let mut lines = description.lines();
        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
        }
        let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        if !body.is_empty() {
            info.content = Some(body);
        }
    } else if description.len() > 20 && description.contains('\n') {
        // Long unstructured descriptions are treated as the body itself.
        info.content = Some(description.to_string());
    }
    info
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn fill(slot: &mut Option<String>, value: Option<&Value>) {
    if slot.is_none() {
        if let Some(text) = value.and_then(Value::as_str) {
            if !text.is_empty() {
                *slot = Some(text.to_string());
            }
        }
    }
}
