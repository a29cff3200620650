//! Account-wide logger status snapshot.
//!
//! Fetches the device list once, samples a fixed prefix of it, pulls each
//! sampled logger's recent measurements through a small worker pool and
//! classifies every logger as online/offline plus a low-battery flag. One
//! logger failing to fetch degrades that logger to "no data"; it never fails
//! the snapshot.

use crate::client::{BluClient, BluCredentials};
use crate::models::blu::{Device, DeviceStatus, Measurement};
use crate::utils::format_utc;
use crate::xml;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

/// How many devices from the top of the account list are sampled.
const SAMPLE_LIMIT: usize = 25;
/// Measurement fetches running at once.
const FETCH_WORKERS: usize = 5;
/// Lookback window for "recent" measurements.
pub(crate) const LOOKBACK_HOURS: i64 = 48;
/// Detail lines included in the rendered snapshot.
const DETAIL_LINE_LIMIT: usize = 8;

/// Outcome of one logger's measurement fetch.
#[derive(Debug, Clone, PartialEq)]
enum DeviceFetch {
    Points(Vec<Measurement>),
    Degraded(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub total: usize,
    pub sampled: usize,
    pub online: usize,
    pub offline: usize,
    pub low_battery: usize,
    pub lines: Vec<String>,
}

impl StatusSnapshot {
    /// Text block for context assembly and the CLI report.
    pub fn render(&self) -> String {
        if self.total == 0 {
            return String::from("No loggers found on this account.");
        }
        let mut out = format!(
            "Logger status: {} online, {} offline, {} low battery (sampled {} of {}).",
            self.online, self.offline, self.low_battery, self.sampled, self.total
        );
        for line in &self.lines {
            out.push('\n');
            out.push_str(line);
        }
        if self.sampled < self.total {
            out.push('\n');
            out.push_str(&format!("Showing the first {} of {} loggers.", self.sampled, self.total));
        }
        out
    }
}

/// Build a snapshot of the account at `now`.
///
/// Only the device-list fetch/parse can fail here; everything after it
/// degrades per logger.
pub fn collect(
    client: &BluClient,
    creds: &BluCredentials,
    now: DateTime<Utc>,
) -> Result<StatusSnapshot, String> {
    let doc = client
        .get_devices(creds, Some(false))
        .map_err(|e| format!("device list fetch failed: {}", e))?;
    let devices =
        xml::parse_devices(&doc).map_err(|e| format!("device list parse failed: {}", e))?;

    let total = devices.len();
    let sampled: Vec<Device> = devices.into_iter().take(SAMPLE_LIMIT).collect();
    info!("Snapshot: sampled {} of {} logger(s)", sampled.len(), total);

    let from = (now - Duration::hours(LOOKBACK_HOURS)).timestamp();
    let to = now.timestamp();
    let ids: Vec<String> =
        sampled.iter().map(|d| d.id.clone()).filter(|id| !id.is_empty()).collect();

    let fetches = fetch_all(&ids, |id| {
        let doc = client
            .get_measurements(creds, Some(id), Some(from), Some(to), false)
            .map_err(|e| e.to_string())?;
        xml::parse_measurements(&doc, Some(id)).map_err(|e| e.to_string())
    });
    for (id, outcome) in &fetches {
        if let DeviceFetch::Degraded(reason) = outcome {
            warn!("Snapshot: logger {} degraded to no-data: {}", id, reason);
        }
    }

    Ok(assemble(total, &sampled, &fetches, now))
}

/// Fan the fetch out over a fixed-size pool pulling ids from a shared
/// cursor. Every id lands in the joined map exactly once, as measurements or
/// as a degraded marker; one fetch failing cancels nothing else.
fn fetch_all<F>(ids: &[String], fetch: F) -> BTreeMap<String, DeviceFetch>
where
    F: Fn(&str) -> Result<Vec<Measurement>, String> + Sync,
{
    let mut joined = BTreeMap::new();
    if ids.is_empty() {
        return joined;
    }

    let cursor = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(String, DeviceFetch)>();
    let workers = FETCH_WORKERS.min(ids.len());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let cursor = &cursor;
            let fetch = &fetch;
            scope.spawn(move || {
                loop {
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(id) = ids.get(i) else {
                        break;
                    };
                    let outcome = match fetch(id) {
                        Ok(points) => DeviceFetch::Points(points),
                        Err(reason) => DeviceFetch::Degraded(reason),
                    };
                    if tx.send((id.clone(), outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);
        for (id, outcome) in rx {
            joined.insert(id, outcome);
        }
    });
    joined
}

fn assemble(
    total: usize,
    sampled: &[Device],
    fetches: &BTreeMap<String, DeviceFetch>,
    now: DateTime<Utc>,
) -> StatusSnapshot {
    let mut online = 0;
    let mut offline = 0;
    let mut low_battery = 0;
    let mut lines = Vec::new();

    for device in sampled {
        let points: &[Measurement] = match fetches.get(&device.id) {
            Some(DeviceFetch::Points(points)) => points,
            // degraded fetch, or a logger with no id to fetch by
            _ => &[],
        };
        let status = DeviceStatus::derive(device.clone(), points, now);
        if status.online {
            online += 1;
        } else {
            offline += 1;
        }
        if status.device.low_battery() {
            low_battery += 1;
        }
        if lines.len() < DETAIL_LINE_LIMIT {
            lines.push(detail_line(&status));
        }
    }

    StatusSnapshot { total, sampled: sampled.len(), online, offline, low_battery, lines }
}

fn detail_line(status: &DeviceStatus) -> String {
    let last = status
        .latest
        .as_ref()
        .and_then(Measurement::timestamp)
        .map(format_utc)
        .unwrap_or_else(|| String::from("unknown"));
    let temp = status
        .latest
        .as_ref()
        .and_then(|m| m.temperature_c)
        .map(|t| format!("{:.1}C", t))
        .unwrap_or_else(|| String::from("n/a"));
    format!(
        "{} ({}): {}, last={}, temp={}",
        status.device.id,
        status.device.display_label(),
        if status.online { "online" } else { "offline" },
        last,
        temp
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::blu::DeviceKind;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn device(id: &str, label: Option<&str>, battery: Option<f64>) -> Device {
        Device {
            id: id.to_string(),
            label: label.map(str::to_string),
            org: None,
            min_temp: None,
            max_temp: None,
            vrn: None,
            battery,
            kind: DeviceKind::Tdl,
        }
    }

    fn reading(id: &str, epoch: i64, temp: f64) -> Measurement {
        Measurement {
            device_id: Some(id.to_string()),
            kind: DeviceKind::Tdl,
            temperature_c: Some(temp),
            humidity: None,
            epoch_seconds: Some(epoch),
        }
    }

    #[test]
    fn pool_joins_every_id_exactly_once() {
        let ids: Vec<String> = (0..8).map(|i| format!("{}", 100 + i)).collect();
        let calls = Mutex::new(Vec::new());
        let joined = fetch_all(&ids, |id| {
            calls.lock().unwrap().push(id.to_string());
            let n: i64 = id.parse().unwrap();
            if n % 2 == 0 {
                Ok(vec![reading(id, 1_700_000_000, 4.0)])
            } else {
                Err(String::from("timed out"))
            }
        });

        assert_eq!(joined.len(), 8);
        let mut seen = calls.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen.len(), 8);
        seen.dedup();
        assert_eq!(seen.len(), 8, "no id fetched twice");
        assert!(matches!(joined.get("100"), Some(DeviceFetch::Points(_))));
        assert!(matches!(joined.get("101"), Some(DeviceFetch::Degraded(_))));
    }

    #[test]
    fn degraded_fetch_classifies_as_offline_no_data() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let sampled = vec![device("101", Some("Dock A"), Some(15.0))];
        let mut fetches = BTreeMap::new();
        fetches.insert("101".to_string(), DeviceFetch::Degraded(String::from("boom")));

        let snap = assemble(1, &sampled, &fetches, now);
        assert_eq!(snap.online, 0);
        assert_eq!(snap.offline, 1);
        assert_eq!(snap.low_battery, 1);
        assert_eq!(snap.lines, vec!["101 (Dock A): offline, last=unknown, temp=n/a"]);
    }

    #[test]
    fn detail_line_formats_fresh_reading() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let sampled = vec![device("101", Some("Dock A"), None)];
        let mut fetches = BTreeMap::new();
        let at = now.timestamp() - 10 * 60;
        fetches.insert("101".to_string(), DeviceFetch::Points(vec![reading("101", at, 4.5)]));

        let snap = assemble(1, &sampled, &fetches, now);
        assert_eq!(snap.online, 1);
        assert_eq!(snap.lines, vec!["101 (Dock A): online, last=2024-03-01 11:50 UTC, temp=4.5C"]);
    }

    #[test]
    fn stale_reading_is_offline_but_keeps_values() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let sampled = vec![device("101", None, None)];
        let mut fetches = BTreeMap::new();
        let at = now.timestamp() - 3 * 3600;
        fetches.insert("101".to_string(), DeviceFetch::Points(vec![reading("101", at, 6.2)]));

        let snap = assemble(1, &sampled, &fetches, now);
        assert_eq!(snap.offline, 1);
        assert_eq!(snap.lines, vec!["101 (no label): offline, last=2024-03-01 09:00 UTC, temp=6.2C"]);
    }

    #[test]
    fn lines_cap_at_eight_but_counts_cover_the_sample() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let sampled: Vec<Device> =
            (0..10).map(|i| device(&format!("{}", 200 + i), None, None)).collect();
        let fetches = BTreeMap::new();

        let snap = assemble(12, &sampled, &fetches, now);
        assert_eq!(snap.lines.len(), 8);
        assert_eq!(snap.offline, 10);
        assert_eq!(snap.sampled, 10);

        let text = snap.render();
        assert!(text.contains("0 online, 10 offline"));
        assert!(text.contains("Showing the first 10 of 12 loggers."));
    }

    #[test]
    fn empty_account_renders_no_loggers_message() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let snap = assemble(0, &[], &BTreeMap::new(), now);
        assert_eq!(snap.total, 0);
        assert_eq!(snap.online, 0);
        assert_eq!(snap.render(), "No loggers found on this account.");
    }

    #[test]
    fn full_sample_has_no_disclaimer() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let sampled = vec![device("101", None, None)];
        let snap = assemble(1, &sampled, &BTreeMap::new(), now);
        assert!(!snap.render().contains("Showing the first"));
    }
}
