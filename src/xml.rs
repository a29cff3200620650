//! Decoding of the console's device-list and measurement XML documents.
//!
//! Both documents share one layout: the root element carries one child per
//! logger, tagged by device kind, and a measurement series lives in an `ms`
//! element with one `m` child per reading. Optional fields that are missing
//! or malformed decode to `None`; only a document that fails to parse at all
//! is an error.

use crate::models::blu::{Device, DeviceKind, Measurement};
use crate::utils::{loose_f64, loose_i64};
use core::fmt;
use roxmltree::{Document, Node};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// The whole document was rejected by the XML parser.
#[derive(Debug)]
pub struct XmlError(roxmltree::Error);

impl Display for XmlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "malformed console document: {}", self.0)
    }
}

impl Error for XmlError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

/// Battery level tags in precedence order. The first tag carrying non-empty
/// text is the value; later tags are not consulted even if it fails to parse.
const BATTERY_TAGS: [&str; 3] = ["battery", "bat", "batt"];

fn child_text<'a>(node: &Node<'a, '_>, tag: &str) -> Option<&'a str> {
    node.children().find(|child| child.has_tag_name(tag)).and_then(|child| child.text())
}

fn child_string(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    child_text(node, tag).map(str::to_string)
}

fn child_f64(node: &Node<'_, '_>, tag: &str) -> Option<f64> {
    child_text(node, tag).and_then(loose_f64)
}

fn trimmed_id(node: &Node<'_, '_>) -> String {
    child_text(node, "id").unwrap_or_default().trim().to_string()
}

fn battery_level(node: &Node<'_, '_>) -> Option<f64> {
    let text = BATTERY_TAGS
        .iter()
        .find_map(|tag| child_text(node, tag).filter(|t| !t.trim().is_empty()))?;
    loose_f64(text)
}

/// Decode the device list. Kinds are walked in wire order (tdl, htdl, ltdl),
/// so two parses of the same document always agree.
pub fn parse_devices(xml: &str) -> Result<Vec<Device>, XmlError> {
    let doc = Document::parse(xml).map_err(XmlError)?;
    let root = doc.root_element();

    let mut devices = Vec::new();
    for kind in DeviceKind::ALL {
        for node in root.children().filter(|n| n.has_tag_name(kind.tag())) {
            devices.push(Device {
                id: trimmed_id(&node),
                label: child_string(&node, "label"),
                org: child_string(&node, "org"),
                min_temp: child_f64(&node, "min_temp"),
                max_temp: child_f64(&node, "max_temp"),
                vrn: child_string(&node, "vrn"),
                battery: battery_level(&node),
                kind,
            });
        }
    }
    Ok(devices)
}

/// Decode a measurement document into a flat series.
///
/// When `device_id` is given, loggers whose trimmed id differs are skipped
/// before any readings are collected. Loggers without an `ms` element are
/// skipped entirely.
pub fn parse_measurements(xml: &str, device_id: Option<&str>) -> Result<Vec<Measurement>, XmlError> {
    let doc = Document::parse(xml).map_err(XmlError)?;
    let root = doc.root_element();

    let mut points = Vec::new();
    for kind in DeviceKind::ALL {
        for node in root.children().filter(|n| n.has_tag_name(kind.tag())) {
            let dev_id = trimmed_id(&node);
            if let Some(wanted) = device_id
                && dev_id != wanted
            {
                continue;
            }
            let Some(series) = node.children().find(|n| n.has_tag_name("ms")) else {
                continue;
            };
            for m in series.children().filter(|n| n.has_tag_name("m")) {
                points.push(Measurement {
                    device_id: if dev_id.is_empty() { None } else { Some(dev_id.clone()) },
                    kind,
                    temperature_c: child_f64(&m, "t"),
                    humidity: child_f64(&m, "h"),
                    epoch_seconds: child_text(&m, "utc").and_then(loose_i64),
                });
            }
        }
    }
    Ok(points)
}
