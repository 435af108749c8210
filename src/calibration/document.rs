//! Order-preserving JSON objects that keep untouched members as raw text
//!
//! The preferences document is shared with settings this crate knows nothing
//! about. Members are held as [`RawValue`] so anything that is not replaced
//! is written back exactly as it was read, number spelling and inner
//! whitespace included. Only replaced members are re-encoded.

use std::fmt;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::Serialize;
use serde_json::value::RawValue;

const INDENT: &str = "  ";

/// A JSON object as an ordered list of raw members
#[derive(Debug, Default)]
pub(crate) struct RawObject {
    members: Vec<(String, Box<RawValue>)>,
}

impl RawObject {
    pub(crate) fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&RawValue> {
        self.members
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_ref())
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    /// Replace the member in place, or append it when absent
    pub(crate) fn insert(&mut self, key: &str, value: Box<RawValue>) {
        match self.members.iter_mut().find(|(name, _)| name == key) {
            Some((_, slot)) => *slot = value,
            None => self.members.push((key.to_string(), value)),
        }
    }

    /// Returns whether the member existed
    pub(crate) fn remove(&mut self, key: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|(name, _)| name != key);
        self.members.len() != before
    }

    /// Pretty-print with members indented one level below `depth`
    pub(crate) fn render(&self, depth: usize) -> Result<String, serde_json::Error> {
        if self.members.is_empty() {
            return Ok("{}".to_string());
        }
        let inner = INDENT.repeat(depth + 1);
        let mut out = String::from("{\n");
        for (index, (key, value)) in self.members.iter().enumerate() {
            if index > 0 {
                out.push_str(",\n");
            }
            out.push_str(&inner);
            out.push_str(&serde_json::to_string(key)?);
            out.push_str(": ");
            out.push_str(value.get());
        }
        out.push('\n');
        out.push_str(&INDENT.repeat(depth));
        out.push('}');
        Ok(out)
    }

    pub(crate) fn into_raw(self, depth: usize) -> Result<Box<RawValue>, serde_json::Error> {
        RawValue::from_string(self.render(depth)?)
    }
}

/// Encode `value` pretty-printed for a member nested `depth` levels deep
pub(crate) fn to_raw_at<T: Serialize + ?Sized>(
    value: &T,
    depth: usize,
) -> Result<Box<RawValue>, serde_json::Error> {
    let text = serde_json::to_string_pretty(value)?;
    // JSON strings never contain a literal newline, so every newline is layout
    let indented = text.replace('\n', &format!("\n{}", INDENT.repeat(depth)));
    RawValue::from_string(indented)
}

impl<'de> Deserialize<'de> for RawObject {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RawObjectVisitor;

        impl<'de> Visitor<'de> for RawObjectVisitor {
            type Value = RawObject;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<RawObject, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut object = RawObject::default();
                // Duplicate keys keep their first position and the last value
                while let Some((key, value)) = map.next_entry::<String, Box<RawValue>>()? {
                    object.insert(&key, value);
                }
                Ok(object)
            }
        }

        deserializer.deserialize_map(RawObjectVisitor)
    }
}
