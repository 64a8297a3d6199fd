//! Immutable document values.
//!
//! A `Datum` has no identity beyond its structure. This owned tree form is what
//! crosses crate boundaries (storage rows, optional arguments, wire batches);
//! during evaluation datums live in the environment's arena heap instead.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

/// Longest printed primary key accepted by storage.
pub const MAX_PRIMARY_KEY_SIZE: usize = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatumType {
    // Declared in type-name order; the derived `Ord` is the cross-type order.
    Array,
    Bool,
    Null,
    Num,
    Object,
    Str,
}

impl DatumType {
    pub fn name(self) -> &'static str {
        match self {
            DatumType::Array => "ARRAY",
            DatumType::Bool => "BOOL",
            DatumType::Null => "NULL",
            DatumType::Num => "NUMBER",
            DatumType::Object => "OBJECT",
            DatumType::Str => "STRING",
        }
    }
}

impl fmt::Display for DatumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<Datum>),
    Object(BTreeMap<String, Datum>),
}

impl Serialize for Datum {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Datum::Null => s.serialize_unit(),
            Datum::Bool(b) => s.serialize_bool(*b),
            // Integral numbers go out without a trailing `.0`.
            Datum::Num(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => s.serialize_i64(*n as i64),
            Datum::Num(n) => s.serialize_f64(*n),
            Datum::Str(v) => s.serialize_str(v),
            Datum::Array(items) => s.collect_seq(items),
            Datum::Object(map) => s.collect_map(map),
        }
    }
}

impl Datum {
    pub fn empty_object() -> Self {
        Datum::Object(BTreeMap::new())
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Datum)>) -> Self {
        Datum::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn get_type(&self) -> DatumType {
        match self {
            Datum::Null => DatumType::Null,
            Datum::Bool(_) => DatumType::Bool,
            Datum::Num(_) => DatumType::Num,
            Datum::Str(_) => DatumType::Str,
            Datum::Array(_) => DatumType::Array,
            Datum::Object(_) => DatumType::Object,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.get_type().name()
    }

    fn check_type(&self, expected: DatumType) -> Result<()> {
        if self.get_type() == expected {
            Ok(())
        } else {
            Err(Error::type_mismatch(expected.name(), self.type_name()))
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Truthiness: only `null` and `false` are false.
    pub fn as_bool(&self) -> bool {
        !matches!(self, Datum::Null | Datum::Bool(false))
    }

    pub fn as_num(&self) -> Result<f64> {
        match self {
            Datum::Num(n) => Ok(*n),
            _ => Err(Error::type_mismatch("NUMBER", self.type_name())),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        let n = self.as_num()?;
        if n.fract() != 0.0 || !n.is_finite() || n.abs() >= 9.0e15 {
            return Err(Error::query(format!("Number not an integer: {self}")));
        }
        Ok(n as i64)
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Datum::Str(s) => Ok(s),
            _ => Err(Error::type_mismatch("STRING", self.type_name())),
        }
    }

    pub fn as_array(&self) -> Result<&[Datum]> {
        match self {
            Datum::Array(items) => Ok(items),
            _ => Err(Error::type_mismatch("ARRAY", self.type_name())),
        }
    }

    pub fn as_object(&self) -> Result<&BTreeMap<String, Datum>> {
        match self {
            Datum::Object(map) => Ok(map),
            _ => Err(Error::type_mismatch("OBJECT", self.type_name())),
        }
    }

    /// Look up a field; `None` for missing keys and non-objects alike.
    pub fn get(&self, key: &str) -> Option<&Datum> {
        match self {
            Datum::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn get_field(&self, key: &str) -> Result<&Datum> {
        self.check_type(DatumType::Object)?;
        self.get(key)
            .ok_or_else(|| Error::query(format!("No attribute `{key}` in object:\n{self}")))
    }

    /// Fields of `other` replace fields of `self`; both must be objects.
    pub fn merge(&self, other: &Datum) -> Result<Datum> {
        let mut out = self.as_object()?.clone();
        for (k, v) in other.as_object()? {
            out.insert(k.clone(), v.clone());
        }
        Ok(Datum::Object(out))
    }

    /// Printed form of a primary key. Only numbers and strings qualify.
    pub fn print_primary(&self) -> Result<String> {
        let printed = match self {
            Datum::Num(_) => self.to_string(),
            Datum::Str(s) => s.clone(),
            _ => {
                return Err(Error::query(format!(
                    "Primary keys must be either a number or a string (got {} of type {}).",
                    self,
                    self.type_name()
                )))
            }
        };
        if printed.len() > MAX_PRIMARY_KEY_SIZE {
            return Err(Error::query(format!(
                "Primary key too long (max {MAX_PRIMARY_KEY_SIZE} characters): {self}"
            )));
        }
        Ok(printed)
    }

    /// Total order: by type name first, then by content.
    pub fn compare(&self, other: &Datum) -> Ordering {
        match (self, other) {
            (Datum::Null, Datum::Null) => Ordering::Equal,
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Num(a), Datum::Num(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Datum::Str(a), Datum::Str(b)) => a.cmp(b),
            (Datum::Array(a), Datum::Array(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.compare(y) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Datum::Object(a), Datum::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                    match ka.cmp(kb).then_with(|| va.compare(vb)) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.get_type().cmp(&other.get_type()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Bool(b)
    }
}

impl From<f64> for Datum {
    fn from(n: f64) -> Self {
        Datum::Num(n)
    }
}

impl From<i64> for Datum {
    fn from(n: i64) -> Self {
        Datum::Num(n as f64)
    }
}

impl From<usize> for Datum {
    fn from(n: usize) -> Self {
        Datum::Num(n as f64)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::Str(s.to_string())
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::Str(s)
    }
}

impl From<Vec<Datum>> for Datum {
    fn from(items: Vec<Datum>) -> Self {
        Datum::Array(items)
    }
}

impl From<BTreeMap<String, Datum>> for Datum {
    fn from(map: BTreeMap<String, Datum>) -> Self {
        Datum::Object(map)
    }
}

impl From<serde_json::Value> for Datum {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => Datum::Null,
            Value::Bool(b) => Datum::Bool(b),
            Value::Number(n) => Datum::Num(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => Datum::Str(s),
            Value::Array(items) => Datum::Array(items.into_iter().map(Datum::from).collect()),
            Value::Object(map) => {
                Datum::Object(map.into_iter().map(|(k, v)| (k, Datum::from(v))).collect())
            }
        }
    }
}
