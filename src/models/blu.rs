use chrono::{DateTime, Utc};

/// A logger is considered online when its newest measurement is younger
/// than this many minutes.
pub const ONLINE_WINDOW_MINUTES: f64 = 30.0;
/// Battery percentage below which a logger is flagged as low.
pub const LOW_BATTERY_PCT: f64 = 20.0;

/// Logger families the console reports, in the order its documents list them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Temperature data logger
    Tdl,
    /// Humidity + temperature data logger
    Htdl,
    /// Low-temperature data logger
    Ltdl,
}

impl DeviceKind {
    /// Wire order. Parsing walks kinds in exactly this sequence so output
    /// ordering is stable across calls.
    pub const ALL: [DeviceKind; 3] = [DeviceKind::Tdl, DeviceKind::Htdl, DeviceKind::Ltdl];

    pub fn tag(self) -> &'static str {
        match self {
            DeviceKind::Tdl => "tdl",
            DeviceKind::Htdl => "htdl",
            DeviceKind::Ltdl => "ltdl",
        }
    }
}

/// A registered logger as listed by the console.
///
/// `id` is the trimmed tag text and may be empty when the console omits it;
/// every other field is optional and absent fields stay `None` rather than
/// failing the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub label: Option<String>,
    pub org: Option<String>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub vrn: Option<String>,
    pub battery: Option<f64>,
    pub kind: DeviceKind,
}

impl Device {
    pub fn low_battery(&self) -> bool {
        self.battery.is_some_and(|pct| pct < LOW_BATTERY_PCT)
    }

    /// Label for display, with the fixed placeholder used across status text.
    pub fn display_label(&self) -> &str {
        match self.label.as_deref() {
            Some(label) if !label.is_empty() => label,
            _ => "no label",
        }
    }
}

/// A single reading from a logger's measurement series.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Trimmed owning-device id; `None` when the document omits it.
    pub device_id: Option<String>,
    pub kind: DeviceKind,
    pub temperature_c: Option<f64>,
    pub humidity: Option<f64>,
    pub epoch_seconds: Option<i64>,
}

impl Measurement {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.epoch_seconds.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Select the latest measurement by maximum `epoch_seconds`.
///
/// Readings without a timestamp never win. On a timestamp tie the first
/// reading encountered is kept, so selection is deterministic for a given
/// input order.
pub fn latest_measurement(points: &[Measurement]) -> Option<&Measurement> {
    let mut best: Option<(&Measurement, i64)> = None;
    for point in points {
        let Some(at) = point.epoch_seconds else {
            continue;
        };
        match best {
            Some((_, current)) if at <= current => {}
            _ => best = Some((point, at)),
        }
    }
    best.map(|(point, _)| point)
}

/// A logger's derived health at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub device: Device,
    pub latest: Option<Measurement>,
    pub minutes_since_last: Option<f64>,
    pub online: bool,
}

impl DeviceStatus {
    /// Classify a device from its recent readings. `online` requires a
    /// timestamped reading strictly younger than [`ONLINE_WINDOW_MINUTES`];
    /// no readings (or none with a timestamp) means offline.
    pub fn derive(device: Device, points: &[Measurement], now: DateTime<Utc>) -> Self {
        let latest = latest_measurement(points).cloned();
        let minutes_since_last = latest
            .as_ref()
            .and_then(Measurement::timestamp)
            .map(|ts| (now - ts).num_seconds() as f64 / 60.0);
        let online = minutes_since_last.is_some_and(|m| m < ONLINE_WINDOW_MINUTES);
        DeviceStatus { device, latest, minutes_since_last, online }
    }
}
