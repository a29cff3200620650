//! Assembles the context blob handed to the language model.
//!
//! Sections always appear in the same order so answers stay steerable:
//! capabilities, owner profile, notes, uploads, telemetry, conversation
//! history, attachment summary. The telemetry section routes on the prompt:
//! a 3+ digit token means "one logger", status keywords mean "whole
//! account", anything else gets a hint. Console failures turn into an
//! inline note, never an abort.

use crate::client::{BluClient, BluCredentials};
use crate::models::blu::{Device, Measurement, latest_measurement};
use crate::models::chat::{ChatTurn, NoteSummary, OwnerProfile, UploadSummary};
use crate::services::snapshot::{self, LOOKBACK_HOURS};
use crate::services::workbook::SheetSummary;
use crate::store::ContextStore;
use crate::utils::format_utc;
use crate::xml;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

/// Most notes included in context.
const NOTE_LIMIT: usize = 5;
/// Most uploads included in context.
const UPLOAD_LIMIT: usize = 5;
/// Conversation turns carried into context, oldest of them first.
const HISTORY_TURNS: usize = 6;
/// Longest note body snippet, in characters.
const NOTE_SNIPPET_LEN: usize = 160;

/// Prompt words that ask for the account-wide status snapshot. Matched with
/// `contains` on the lowercased prompt, so plurals match their singular.
const TELEMETRY_KEYWORDS: [&str; 6] = ["status", "online", "offline", "logger", "battery", "alert"];

/// Opening block of every context.
const CAPABILITIES: &str = "You are the assistant built into a cold-chain monitoring dashboard. \
You can report the account's logger status, look up a single logger by its numeric id, and \
explain uploaded temperature workbooks (columns, temperature abuse, shelf-life impact). Answer \
from the context below; never invent measurements.";

/// Build the system-message context for one prompt.
pub fn build(
    client: &BluClient,
    store: &dyn ContextStore,
    creds: Option<&BluCredentials>,
    owner: &str,
    prompt: &str,
    now: DateTime<Utc>,
) -> String {
    let mut sections: Vec<String> = Vec::new();
    sections.push(String::from(CAPABILITIES));

    if let Some(profile) = store.profile(owner) {
        sections.push(profile_section(&profile));
    }
    let notes = store.recent_notes(owner, NOTE_LIMIT);
    if !notes.is_empty() {
        sections.push(notes_section(&notes));
    }
    let uploads = store.recent_uploads(owner, UPLOAD_LIMIT);
    if !uploads.is_empty() {
        sections.push(uploads_section(&uploads));
    }

    sections.push(telemetry_section(client, creds, prompt, now));

    let turns = store.recent_turns(owner, HISTORY_TURNS);
    if !turns.is_empty() {
        sections.push(history_section(&turns));
    }
    if let Some(summary) = store.latest_attachment(owner) {
        sections.push(attachment_section(&summary));
    }

    debug!("Context: assembled {} section(s) for owner {}", sections.len(), owner);
    sections.join("\n\n")
}

fn profile_section(profile: &OwnerProfile) -> String {
    format!("Account owner: {} {} <{}>", profile.first_name, profile.last_name, profile.email)
}

fn notes_section(notes: &[NoteSummary]) -> String {
    let mut out = String::from("Recent notes:");
    for note in notes {
        out.push_str(&format!(
            "\n- {} ({}): {}",
            note.title,
            format_utc(note.updated_at),
            clip(&note.body, NOTE_SNIPPET_LEN)
        ));
    }
    out
}

fn uploads_section(uploads: &[UploadSummary]) -> String {
    let mut out = String::from("Recent uploads:");
    for upload in uploads {
        out.push_str(&format!(
            "\n- {} ({} rows, uploaded {})",
            upload.name,
            upload.row_count,
            format_utc(upload.created_at)
        ));
    }
    out
}

fn history_section(turns: &[ChatTurn]) -> String {
    let mut out = String::from("Recent conversation:");
    for turn in turns {
        out.push_str(&format!("\n{}: {}", turn.role.name(), turn.content));
    }
    out
}

fn attachment_section(summary: &SheetSummary) -> String {
    format!(
        "Attached workbook: {} data rows. Columns: {}. Temperature: {}, {}.",
        summary.row_count,
        summary.column_list(),
        summary.stats_sentence(),
        summary.range_sentence()
    )
}

fn telemetry_section(
    client: &BluClient,
    creds: Option<&BluCredentials>,
    prompt: &str,
    now: DateTime<Utc>,
) -> String {
    let Some(creds) = creds else {
        return String::from(
            "Telemetry: console account not connected, so live logger data is unavailable.",
        );
    };
    if let Some(token) = extract_device_token(prompt) {
        return match device_report(client, creds, &token, now) {
            Ok(report) => report,
            Err(reason) => {
                warn!("Context: logger {} lookup failed: {}", token, reason);
                format!("Telemetry: unable to fetch data for logger {} right now.", token)
            }
        };
    }
    if wants_snapshot(prompt) {
        return match snapshot::collect(client, creds, now) {
            Ok(snap) => format!("Telemetry:\n{}", snap.render()),
            Err(reason) => {
                warn!("Context: snapshot unavailable: {}", reason);
                String::from("Telemetry: unable to fetch logger status right now.")
            }
        };
    }
    String::from("Telemetry: Ask me about temperature trends or a specific logger id.")
}

/// First run of three or more ASCII digits in the prompt, taken as a logger
/// id. Shorter runs never match.
fn extract_device_token(prompt: &str) -> Option<String> {
    let mut digits = String::new();
    for ch in prompt.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else {
            if digits.len() >= 3 {
                return Some(digits);
            }
            digits.clear();
        }
    }
    (digits.len() >= 3).then_some(digits)
}

fn wants_snapshot(prompt: &str) -> bool {
    let lowered = prompt.to_lowercase();
    TELEMETRY_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// Metadata plus the freshest reading for one logger. The measurement query
/// filters on the id, so an unknown logger reports "none found".
fn device_report(
    client: &BluClient,
    creds: &BluCredentials,
    token: &str,
    now: DateTime<Utc>,
) -> Result<String, String> {
    let doc = client.get_devices(creds, Some(false)).map_err(|e| e.to_string())?;
    let devices = xml::parse_devices(&doc).map_err(|e| e.to_string())?;
    let device = devices.iter().find(|d| d.id == token);

    let from = (now - Duration::hours(LOOKBACK_HOURS)).timestamp();
    let doc = client
        .get_measurements(creds, Some(token), Some(from), Some(now.timestamp()), false)
        .map_err(|e| e.to_string())?;
    let points = xml::parse_measurements(&doc, Some(token)).map_err(|e| e.to_string())?;

    let mut out = String::from("Telemetry:\n");
    match device {
        Some(device) => out.push_str(&metadata_line(device)),
        None => out.push_str(&format!("Logger {}: not found on this account.", token)),
    }
    out.push('\n');
    out.push_str(&latest_line(latest_measurement(&points)));
    Ok(out)
}

fn metadata_line(device: &Device) -> String {
    let mut line = format!("Logger {} ({})", device.id, device.display_label());
    if let Some(org) = &device.org
        && !org.is_empty()
    {
        line.push_str(&format!(", org {}", org));
    }
    if let (Some(min), Some(max)) = (device.min_temp, device.max_temp) {
        line.push_str(&format!(", limits {:.1}C to {:.1}C", min, max));
    }
    if let Some(battery) = device.battery {
        line.push_str(&format!(", battery {:.0}%", battery));
    }
    line
}

fn latest_line(latest: Option<&Measurement>) -> String {
    let Some(m) = latest else {
        return String::from("Latest measurement: none found in last 48h");
    };
    let temp =
        m.temperature_c.map(|t| format!("{:.1} C", t)).unwrap_or_else(|| String::from("n/a"));
    let at = m.timestamp().map(format_utc).unwrap_or_else(|| String::from("unknown time"));
    format!("Latest measurement: {} at {}", temp, at)
}

fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let clipped: String = text.chars().take(limit).collect();
    format!("{}...", clipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::blu::DeviceKind;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn creds() -> BluCredentials {
        BluCredentials { username: String::from("kim"), password: String::from("pw") }
    }

    /// Nothing listens here, so console calls fail fast.
    fn dead_client() -> BluClient {
        BluClient::new("http://127.0.0.1:9")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn device_token_needs_three_digits() {
        assert_eq!(extract_device_token("is logger 4821 online"), Some(String::from("4821")));
        assert_eq!(extract_device_token("check 12 then 345 then 6789"), Some(String::from("345")));
        assert_eq!(extract_device_token("ends with 987"), Some(String::from("987")));
        assert_eq!(extract_device_token("logger 99 status"), None);
        assert_eq!(extract_device_token("no ids at all"), None);
    }

    #[test]
    fn keywords_match_case_insensitively_and_cover_plurals() {
        assert!(wants_snapshot("any ALERTS today?"));
        assert!(wants_snapshot("are my loggers ok"));
        assert!(wants_snapshot("battery check please"));
        assert!(!wants_snapshot("hello there"));
        assert!(!wants_snapshot("what is fefo"));
    }

    #[test]
    fn sections_keep_their_fixed_order() {
        let mut store = MemoryStore::new();
        store.set_profile(
            "kim",
            OwnerProfile {
                first_name: String::from("Kim"),
                last_name: String::from("Vale"),
                email: String::from("kim@example.com"),
            },
        );
        store.add_note(
            "kim",
            NoteSummary {
                title: String::from("Van 7 door seal"),
                body: String::from("replace before the June shipment"),
                updated_at: now(),
            },
        );
        store.add_upload(
            "kim",
            UploadSummary {
                name: String::from("march.xlsx"),
                row_count: 42,
                created_at: now(),
            },
        );
        store.push_turn("kim", ChatTurn::user("hi"));
        store.push_turn("kim", ChatTurn::assistant("hello"));
        store.set_attachment(
            "kim",
            SheetSummary {
                row_count: 6,
                headers: vec![String::from("Timestamp"), String::from("Temperature C")],
                time_column: String::from("Timestamp"),
                temp_column: String::from("Temperature C"),
                time_start: None,
                time_end: None,
                temp_min: Some(2.5),
                temp_max: Some(9.8),
                temp_avg: Some(5.3),
                temp_at_start: None,
                temp_at_end: None,
                sample_count: 6,
            },
        );

        let blob = build(&dead_client(), &store, None, "kim", "what can you do", now());

        let order = [
            "You are the assistant",
            "Account owner: Kim Vale <kim@example.com>",
            "Recent notes:",
            "Recent uploads:",
            "Telemetry:",
            "Recent conversation:\nuser: hi\nassistant: hello",
            "Attached workbook: 6 data rows. Columns: Timestamp, Temperature C.",
        ];
        let mut last = 0;
        for marker in order {
            let at = blob.find(marker).unwrap_or_else(|| panic!("missing {:?}", marker));
            assert!(at >= last, "{:?} out of order", marker);
            last = at;
        }
    }

    #[test]
    fn missing_credentials_note_replaces_telemetry() {
        let store = MemoryStore::new();
        let blob = build(&dead_client(), &store, None, "kim", "logger status", now());
        assert!(blob.contains("console account not connected"));
    }

    #[test]
    fn unreachable_console_degrades_device_lookup() {
        let store = MemoryStore::new();
        let creds = creds();
        let blob =
            build(&dead_client(), &store, Some(&creds), "kim", "is logger 4821 online", now());
        assert!(blob.contains("unable to fetch data for logger 4821"));
    }

    #[test]
    fn unreachable_console_degrades_snapshot() {
        let store = MemoryStore::new();
        let creds = creds();
        let blob = build(&dead_client(), &store, Some(&creds), "kim", "logger status?", now());
        assert!(blob.contains("unable to fetch logger status"));
    }

    #[test]
    fn plain_prompt_gets_the_hint_without_console_calls() {
        let store = MemoryStore::new();
        let creds = creds();
        let blob = build(&dead_client(), &store, Some(&creds), "kim", "thanks!", now());
        assert!(blob.contains("Ask me about temperature trends or a specific logger id."));
    }

    #[test]
    fn metadata_line_lists_known_fields() {
        let device = Device {
            id: String::from("4821"),
            label: Some(String::from("Van 7")),
            org: Some(String::from("Acme Produce")),
            min_temp: Some(2.0),
            max_temp: Some(8.0),
            vrn: None,
            battery: Some(88.0),
            kind: DeviceKind::Tdl,
        };
        assert_eq!(
            metadata_line(&device),
            "Logger 4821 (Van 7), org Acme Produce, limits 2.0C to 8.0C, battery 88%"
        );

        let bare = Device {
            id: String::from("7"),
            label: None,
            org: None,
            min_temp: None,
            max_temp: None,
            vrn: None,
            battery: None,
            kind: DeviceKind::Tdl,
        };
        assert_eq!(metadata_line(&bare), "Logger 7 (no label)");
    }

    #[test]
    fn latest_line_reports_value_or_absence() {
        let m = Measurement {
            device_id: Some(String::from("4821")),
            kind: DeviceKind::Tdl,
            temperature_c: Some(4.52),
            humidity: None,
            epoch_seconds: Some(now().timestamp()),
        };
        assert_eq!(latest_line(Some(&m)), "Latest measurement: 4.5 C at 2024-03-01 12:00 UTC");
        assert_eq!(latest_line(None), "Latest measurement: none found in last 48h");
    }

    #[test]
    fn note_bodies_clip_at_the_snippet_limit() {
        let long = "x".repeat(400);
        let clipped = clip(&long, NOTE_SNIPPET_LEN);
        assert_eq!(clipped.chars().count(), NOTE_SNIPPET_LEN + 3);
        assert!(clipped.ends_with("..."));
        assert_eq!(clip("short", NOTE_SNIPPET_LEN), "short");
    }
}
