//! Availability records and normalization of upstream responses

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::{Map, Value};

/// The identity of a real-world slot. Nothing else participates in equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordIdentity {
    pub location: String,
    pub start: NaiveDateTime,
    pub category: String,
}

/// One bookable slot as normalized from a poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityRecord {
    pub location: String,
    pub location_name: Option<String>,
    pub start: NaiveDateTime,
    pub category: String,
    pub booking_url: Option<String>,
}

impl AvailabilityRecord {
    pub fn new(location: &str, start: NaiveDateTime, category: &str) -> Self {
        Self {
            location: location.to_string(),
            location_name: None,
            start,
            category: category.to_string(),
            booking_url: None,
        }
    }

    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity {
            location: self.location.clone(),
            start: self.start,
            category: self.category.clone(),
        }
    }

    pub fn display_location(&self) -> &str {
        self.location_name.as_deref().unwrap_or(&self.location)
    }
}

/// Case-insensitive location allow-list, matched on location id or name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFilter {
    allowed: Vec<String>,
}

impl LocationFilter {
    pub fn new<S: AsRef<str>>(locations: &[S]) -> Self {
        let allowed = locations
            .iter()
            .map(|l| l.as_ref().trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        Self { allowed }
    }

    pub fn allows(&self, record: &AvailabilityRecord) -> bool {
        self.matches(&record.location)
            || record
                .location_name
                .as_deref()
                .is_some_and(|name| self.matches(name))
    }

    fn matches(&self, value: &str) -> bool {
        let value = value.trim().to_lowercase();
        self.allowed.iter().any(|allowed| *allowed == value)
    }
}

/// Normalize a query response into in-scope records.
///
/// Accepts a bare list, or an object carrying the list under `occasions`,
/// `results` or `data`; a lone object is a one-element list. Items that are
/// unavailable, incomplete, or outside the allow-list are dropped.
pub fn parse_availability(
    body: &str,
    filter: &LocationFilter,
    default_category: &str,
) -> crate::Result<Vec<AvailabilityRecord>> {
    let value: Value = serde_json::from_str(body)?;
    let items = extract_items(value)?;

    let mut records = Vec::with_capacity(items.len());
    let mut skipped = 0usize;
    let mut out_of_scope = 0usize;

    for item in &items {
        let Some(record) = item.as_object().and_then(|obj| normalize(obj, default_category)) else {
            skipped += 1;
            continue;
        };
        if !filter.allows(&record) {
            out_of_scope += 1;
            continue;
        }
        records.push(record);
    }

    tracing::debug!(
        "Parsed {} items: {} in scope, {} out of scope, {} skipped",
        items.len(),
        records.len(),
        out_of_scope,
        skipped
    );
    Ok(records)
}

fn extract_items(value: Value) -> crate::Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in ["occasions", "results", "data"] {
                match map.remove(key) {
                    Some(Value::Array(items)) => return Ok(items),
                    Some(Value::Null) | None => continue,
                    Some(other) => {
                        return Err(crate::SlotwatchError::MalformedResponse(format!(
                            "'{}' is not a list: {}",
                            key,
                            type_name(&other)
                        )))
                    }
                }
            }
            Ok(vec![Value::Object(map)])
        }
        other => Err(crate::SlotwatchError::MalformedResponse(format!(
            "expected a list or object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn normalize(item: &Map<String, Value>, default_category: &str) -> Option<AvailabilityRecord> {
    if item.get("available").and_then(Value::as_bool) == Some(false) {
        return None;
    }

    let (location, location_name) = location_of(item)?;
    let start = start_of(item)?;
    let category = first_text(item, &["examType", "testType", "category"])
        .unwrap_or_else(|| default_category.to_string());
    let booking_url = first_text(item, &["bookingUrl"]);

    Some(AvailabilityRecord {
        location,
        location_name,
        start,
        category,
        booking_url,
    })
}

/// Location id and display name; the id falls back to the name
fn location_of(item: &Map<String, Value>) -> Option<(String, Option<String>)> {
    let nested = item.get("location").and_then(Value::as_object);

    let id = text(item.get("locationId"))
        .or_else(|| nested.and_then(|loc| text(loc.get("id"))));
    let name = text(item.get("locationName"))
        .or_else(|| text(item.get("location")))
        .or_else(|| nested.and_then(|loc| text(loc.get("name"))));

    match (id, name) {
        (Some(id), name) => Some((id, name)),
        (None, Some(name)) => Some((name, None)),
        (None, None) => None,
    }
}

fn start_of(item: &Map<String, Value>) -> Option<NaiveDateTime> {
    if let Some(stamp) = first_text(item, &["start", "startTime"]) {
        if let Some(start) = parse_timestamp(&stamp) {
            return Some(start);
        }
    }

    let date = first_text(item, &["date", "testDate"])?;
    let time = first_text(item, &["time", "testTime"])?;
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M:%S"))
        .ok()?;
    Some(date.and_time(time))
}

fn parse_timestamp(stamp: &str) -> Option<NaiveDateTime> {
    let stamp = stamp.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(stamp) {
        return Some(dt.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(stamp, fmt).ok())
}

fn first_text(item: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text(item.get(*key)))
}

/// Strings and numbers both count as text; empty strings do not
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
