//! `*IDN?` reply parsing
//!
//! IEEE 488.2 identification replies are four comma-separated fields:
//! `<manufacturer>,<model>,<serial>,<firmware>`. Plenty of instruments bend
//! the format (extra spaces, trailing terminators, missing fields), so the
//! parser never fails.

use serde::Serialize;
use std::fmt;

/// Manufacturers and the field index holding their model number
const MODEL_FIELD: &[(&str, usize)] = &[
    ("KEYSIGHT", 1),
    ("AGILENT", 1),
    ("HEWLETT", 1),
    ("RIGOL", 1),
    ("TEKTRONIX", 1),
    ("ROHDE", 1),
    ("SIGLENT", 1),
    ("NATIONAL", 1),
    ("FLUKE", 1),
    ("ANRITSU", 1),
    ("GW", 1),
    ("BK", 1),
];

const DEFAULT_MODEL_FIELD: usize = 1;

/// Parsed identification reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// First field, e.g. `RIGOL TECHNOLOGIES`
    pub manufacturer: String,
    /// Second field, e.g. `DP832`
    pub model: String,
    /// Third field; empty if absent
    pub serial: String,
    /// Fourth field; empty if absent
    pub firmware: String,
}

impl Identity {
    /// Parse a raw `*IDN?` reply
    ///
    /// Missing trailing fields are empty. A reply without any comma is taken
    /// to be the model.
    pub fn parse(reply: &str) -> Self {
        let reply = clean(reply);
        if !reply.contains(',') {
            return Self {
                manufacturer: String::new(),
                model: reply.to_string(),
                serial: String::new(),
                firmware: String::new(),
            };
        }

        let mut fields = reply.splitn(4, ',').map(|f| f.trim().to_string());
        let mut next = || fields.next().unwrap_or_default();
        Self {
            manufacturer: next(),
            model: next(),
            serial: next(),
            firmware: next(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)?;
        if !self.serial.is_empty() {
            write!(f, " (S/N {})", self.serial)?;
        }
        if !self.firmware.is_empty() {
            write!(f, " fw {}", self.firmware)?;
        }
        Ok(())
    }
}

fn clean(reply: &str) -> &str {
    reply.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}

/// Short model name used as a device key (e.g. `DP832`)
///
/// The manufacturer is the first word of the first field, upper-cased, and
/// selects the field that holds the model. When that field is missing or
/// blank the whole cleaned reply is returned.
pub fn model_number(reply: &str) -> String {
    let reply = clean(reply);
    let fields: Vec<&str> = reply.split(',').collect();

    let manufacturer = fields
        .first()
        .and_then(|f| f.split_whitespace().next())
        .map(str::to_uppercase)
        .unwrap_or_default();
    let position = MODEL_FIELD
        .iter()
        .find(|(name, _)| *name == manufacturer)
        .map_or(DEFAULT_MODEL_FIELD, |(_, position)| *position);

    match fields.get(position).map(|f| f.trim()) {
        Some(model) if !model.is_empty() => model.to_string(),
        _ => reply.to_string(),
    }
}
