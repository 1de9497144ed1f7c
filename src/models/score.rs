//! Persisted score records and the field paths synced into them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::models::ListingId;

/// Key holding the listing id inside a record.
pub const ID_KEY: &str = "id";

/// Key stamped by every field sync.
pub const UPDATED_AT_KEY: &str = "updated_at";

/// A score document for one listing.
///
/// The record is kept as an ordered JSON object so fields this crate does not
/// know about round-trip verbatim, in their original order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreRecord(Map<String, Value>);

impl ScoreRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a record from an arbitrary JSON value; only objects qualify.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(AppError::malformed(
                "score record",
                format!("expected a JSON object, found {}", kind_of(&other)),
            )),
        }
    }

    /// Listing id stored in the record. Numeric ids are accepted as well.
    pub fn id(&self) -> Option<ListingId> {
        match self.0.get(ID_KEY)? {
            Value::String(s) if !s.trim().is_empty() => Some(ListingId::new(s.trim())),
            Value::Number(n) => Some(ListingId::new(n.to_string())),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Resolve a dotted path, returning `None` as soon as a segment is absent.
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        lookup(&self.0, path.segments())
    }

    /// Set a dotted path, creating intermediate objects as needed.
    ///
    /// Fails with `PartialData` when an intermediate exists but is not an
    /// object; the record is left untouched in that case.
    pub fn set_path(&mut self, path: &FieldPath, value: Value) -> Result<()> {
        let (last, parents) = path
            .segments()
            .split_last()
            .ok_or_else(|| AppError::partial(path.to_string(), "empty field path"))?;

        let mut current = &mut self.0;
        for segment in parents {
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match slot {
                Value::Object(map) => map,
                other => {
                    return Err(AppError::partial(
                        path.to_string(),
                        format!("'{segment}' is {}, not an object", kind_of(other)),
                    ));
                }
            };
        }
        current.insert(last.clone(), value);
        Ok(())
    }

    /// Stamp `updated_at` with the given instant.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.0.insert(
            UPDATED_AT_KEY.to_string(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.0.get(UPDATED_AT_KEY).and_then(Value::as_str)
    }

    /// Copy of the record without its `updated_at` stamp, for comparisons.
    pub fn without_timestamp(&self) -> Self {
        let mut fields = self.0.clone();
        fields.shift_remove(UPDATED_AT_KEY);
        Self(fields)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let value = map.get(first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Object(inner) => lookup(inner, rest),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A dotted path into a record, e.g. `exposition.details.brightness_value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// JSON pointer form, for lookups in arbitrary values.
    pub fn pointer(&self) -> String {
        self.0
            .iter()
            .map(|seg| format!("/{}", seg.replace('~', "~0").replace('/', "~1")))
            .collect()
    }
}

impl FromStr for FieldPath {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let segments: Vec<String> = s.split('.').map(|seg| seg.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return Err(AppError::validation(format!("invalid field path '{s}'")));
        }
        if segments.len() == 1 && segments[0] == ID_KEY {
            return Err(AppError::validation("the 'id' field cannot be synced"));
        }
        Ok(Self(segments))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
