//! Event schema: raw row parsing, record encoding, fixed-point scaling
//!
//! A schema is an ordered list of typed attributes. Exactly one attribute is
//! the event type and exactly one is the timestamp. Rows arrive as
//! comma-separated text in attribute order.
//!
//! Record layout (little-endian, no padding between fields):
//!
//! ```text
//! TYPE       4 bytes  u32 type id
//! TIMESTAMP  8 bytes  i64
//! INT        4 bytes  i32
//! FLOAT.d    8 bytes  f64 (full precision, scaled only for indexing)
//! DOUBLE.d   8 bytes  f64
//! CHAR[n]    n bytes  zero padded
//! ```

use crate::storage::error::{StorageError, StorageResult};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Attribute type as declared in a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Type,
    Timestamp,
    Int,
    Float { decimals: u32 },
    Double { decimals: u32 },
    Char { len: usize },
}

impl AttrType {
    /// Bytes the attribute occupies in a record
    pub fn width(&self) -> usize {
        match self {
            AttrType::Type | AttrType::Int => 4,
            AttrType::Timestamp | AttrType::Float { .. } | AttrType::Double { .. } => 8,
            AttrType::Char { len } => *len,
        }
    }

    /// Whether values can be placed in a range bitmap
    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            AttrType::Int | AttrType::Float { .. } | AttrType::Double { .. }
        )
    }

    /// Fixed-point magnification for indexing
    pub fn magnification(&self) -> f64 {
        match self {
            AttrType::Float { decimals } | AttrType::Double { decimals } => {
                10f64.powi(*decimals as i32)
            }
            _ => 1.0,
        }
    }
}

impl FromStr for AttrType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let decimals = |rest: &str| -> StorageResult<u32> {
            if rest.is_empty() {
                return Ok(0);
            }
            rest.trim_start_matches('.')
                .trim()
                .parse()
                .map_err(|_| StorageError::Schema(format!("Bad decimal length in '{}'", s)))
        };

        match upper.as_str() {
            "TYPE" => Ok(AttrType::Type),
            "TIMESTAMP" => Ok(AttrType::Timestamp),
            "INT" => Ok(AttrType::Int),
            _ if upper.starts_with("FLOAT") => Ok(AttrType::Float {
                decimals: decimals(&upper[5..])?,
            }),
            _ if upper.starts_with("DOUBLE") => Ok(AttrType::Double {
                decimals: decimals(&upper[6..])?,
            }),
            _ if upper.starts_with("CHAR[") && upper.ends_with(']') => {
                let len = upper[5..upper.len() - 1]
                    .trim()
                    .parse()
                    .map_err(|_| StorageError::Schema(format!("Bad CHAR length in '{}'", s)))?;
                Ok(AttrType::Char { len })
            }
            _ => Err(StorageError::Schema(format!("Unsupported attribute type '{}'", s))),
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrType::Type => f.write_str("TYPE"),
            AttrType::Timestamp => f.write_str("TIMESTAMP"),
            AttrType::Int => f.write_str("INT"),
            AttrType::Float { decimals } => write!(f, "FLOAT.{}", decimals),
            AttrType::Double { decimals } => write!(f, "DOUBLE.{}", decimals),
            AttrType::Char { len } => write!(f, "CHAR[{}]", len),
        }
    }
}

/// A decoded attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Type(u32),
    Timestamp(i64),
    Int(i64),
    Float(f64),
    Char(String),
}

/// A raw row parsed against the schema
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub type_id: u32,
    pub timestamp: i64,
    pub values: Vec<Value>,
    /// Fixed-size record bytes for the record store
    pub record: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Attribute {
    name: String,
    ty: AttrType,
    offset: usize,
}

/// Event schema with type-id assignment
#[derive(Debug, Clone)]
pub struct EventSchema {
    name: String,
    attributes: Vec<Attribute>,
    slots: HashMap<String, usize>,
    record_size: usize,
    type_slot: usize,
    timestamp_slot: usize,
    type_ids: HashMap<String, u32>,
    /// Index `id - 1` holds the name of type `id`
    type_names: Vec<String>,
}

impl EventSchema {
    /// Build a schema from `(name, type)` declarations, e.g.
    /// `[("ticker", "TYPE"), ("open", "DOUBLE.2"), ("volume", "INT"), ("time", "TIMESTAMP")]`
    pub fn new(name: impl Into<String>, declarations: &[(&str, &str)]) -> StorageResult<Self> {
        let mut attributes = Vec::with_capacity(declarations.len());
        let mut slots = HashMap::with_capacity(declarations.len());
        let mut offset = 0;
        let mut type_slot = None;
        let mut timestamp_slot = None;

        for (slot, (attr_name, ty)) in declarations.iter().enumerate() {
            let ty: AttrType = ty.parse()?;
            let attr_name = attr_name.trim().to_string();
            if slots.insert(attr_name.clone(), slot).is_some() {
                return Err(StorageError::Schema(format!(
                    "Duplicate attribute '{}'",
                    attr_name
                )));
            }
            let special = match ty {
                AttrType::Type => Some((&mut type_slot, "TYPE")),
                AttrType::Timestamp => Some((&mut timestamp_slot, "TIMESTAMP")),
                _ => None,
            };
            if let Some((target, label)) = special {
                if target.replace(slot).is_some() {
                    return Err(StorageError::Schema(format!("More than one {} attribute", label)));
                }
            }
            attributes.push(Attribute {
                name: attr_name,
                ty,
                offset,
            });
            offset += ty.width();
        }

        let type_slot =
            type_slot.ok_or_else(|| StorageError::Schema("Schema has no TYPE attribute".to_string()))?;
        let timestamp_slot = timestamp_slot
            .ok_or_else(|| StorageError::Schema("Schema has no TIMESTAMP attribute".to_string()))?;

        Ok(Self {
            name: name.into(),
            attributes,
            slots,
            record_size: offset,
            type_slot,
            timestamp_slot,
            type_ids: HashMap::new(),
            type_names: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn slot(&self, attr_name: &str) -> Option<usize> {
        self.slots.get(attr_name).copied()
    }

    pub fn type_slot(&self) -> usize {
        self.type_slot
    }

    pub fn timestamp_slot(&self) -> usize {
        self.timestamp_slot
    }

    pub fn attr_type(&self, slot: usize) -> Option<AttrType> {
        self.attributes.get(slot).map(|a| a.ty)
    }

    /// Id of `event_type`, assigned on first sight starting at 1
    pub fn type_id(&mut self, event_type: &str) -> u32 {
        if let Some(&id) = self.type_ids.get(event_type) {
            return id;
        }
        self.type_names.push(event_type.to_string());
        let id = self.type_names.len() as u32;
        self.type_ids.insert(event_type.to_string(), id);
        id
    }

    /// Id of an already seen event type
    pub fn lookup_type(&self, event_type: &str) -> Option<u32> {
        self.type_ids.get(event_type).copied()
    }

    pub fn type_name(&self, type_id: u32) -> Option<&str> {
        let idx = (type_id as usize).checked_sub(1)?;
        self.type_names.get(idx).map(String::as_str)
    }

    /// Number of distinct event types seen so far
    pub fn type_count(&self) -> usize {
        self.type_names.len()
    }

    /// Scale a numeric value of attribute `slot` into the index domain
    pub fn scale(&self, slot: usize, value: f64) -> StorageResult<i64> {
        let attr = self.attributes.get(slot).ok_or_else(|| {
            StorageError::Schema(format!("Attribute slot {} out of range", slot))
        })?;
        if !attr.ty.is_indexable() {
            return Err(StorageError::Schema(format!(
                "Attribute '{}' of type {} is not indexable",
                attr.name, attr.ty
            )));
        }
        // `as` truncates toward zero and saturates at the i64 range
        Ok((value * attr.ty.magnification()) as i64)
    }

    /// Parse a comma-separated row, assigning a type id if needed
    pub fn parse_row(&mut self, row: &str) -> StorageResult<ParsedRow> {
        let fields: Vec<&str> = row.split(',').map(str::trim).collect();
        if fields.len() != self.attributes.len() {
            return Err(StorageError::InvalidRow(format!(
                "expected {} columns, got {}",
                self.attributes.len(),
                fields.len()
            )));
        }

        let mut values = Vec::with_capacity(fields.len());
        let mut record = vec![0u8; self.record_size];
        let mut timestamp: i64 = 0;
        for (slot, field) in fields.iter().enumerate() {
            let ty = self.attributes[slot].ty;
            let offset = self.attributes[slot].offset;
            let target = &mut record[offset..offset + ty.width()];
            let value = match ty {
                // resolved once every other field has parsed
                AttrType::Type => Value::Type(0),
                AttrType::Timestamp => {
                    timestamp = parse_field(field, &self.attributes[slot].name)?;
                    target.copy_from_slice(&timestamp.to_le_bytes());
                    Value::Timestamp(timestamp)
                }
                AttrType::Int => {
                    let v: i32 = parse_field(field, &self.attributes[slot].name)?;
                    target.copy_from_slice(&v.to_le_bytes());
                    Value::Int(v as i64)
                }
                AttrType::Float { .. } | AttrType::Double { .. } => {
                    let v: f64 = parse_field(field, &self.attributes[slot].name)?;
                    target.copy_from_slice(&v.to_le_bytes());
                    Value::Float(v)
                }
                AttrType::Char { len } => {
                    let bytes = field.as_bytes();
                    let n = bytes.len().min(len);
                    target[..n].copy_from_slice(&bytes[..n]);
                    Value::Char(String::from_utf8_lossy(&bytes[..n]).into_owned())
                }
            };
            values.push(value);
        }

        let type_name = fields[self.type_slot];
        let type_id = self.type_id(type_name);
        let offset = self.attributes[self.type_slot].offset;
        record[offset..offset + 4].copy_from_slice(&type_id.to_le_bytes());
        values[self.type_slot] = Value::Type(type_id);

        Ok(ParsedRow {
            type_id,
            timestamp,
            values,
            record,
        })
    }

    /// Decode a record produced by [`EventSchema::parse_row`]
    pub fn decode_record(&self, record: &[u8]) -> StorageResult<Vec<Value>> {
        if record.len() != self.record_size {
            return Err(StorageError::InvalidRow(format!(
                "record is {} bytes, schema '{}' expects {}",
                record.len(),
                self.name,
                self.record_size
            )));
        }
        Ok(self
            .attributes
            .iter()
            .map(|attr| {
                let bytes = &record[attr.offset..attr.offset + attr.ty.width()];
                match attr.ty {
                    AttrType::Type => Value::Type(u32::from_le_bytes(to_array(bytes))),
                    AttrType::Timestamp => Value::Timestamp(i64::from_le_bytes(to_array(bytes))),
                    AttrType::Int => Value::Int(i32::from_le_bytes(to_array(bytes)) as i64),
                    AttrType::Float { .. } | AttrType::Double { .. } => {
                        Value::Float(f64::from_le_bytes(to_array(bytes)))
                    }
                    AttrType::Char { .. } => {
                        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                        Value::Char(String::from_utf8_lossy(&bytes[..end]).into_owned())
                    }
                }
            })
            .collect())
    }

    /// Select the attributes to build range bitmaps on
    pub fn index_on(&self, names: &[&str]) -> StorageResult<IndexedAttributes> {
        let mut slots = Vec::with_capacity(names.len());
        for name in names {
            let slot = self
                .slot(name)
                .ok_or_else(|| StorageError::Schema(format!("Unknown attribute '{}'", name)))?;
            let ty = self.attributes[slot].ty;
            if !ty.is_indexable() {
                return Err(StorageError::Schema(format!(
                    "Attribute '{}' of type {} cannot be indexed",
                    name, ty
                )));
            }
            slots.push(slot);
        }
        Ok(IndexedAttributes {
            names: names.iter().map(|n| n.to_string()).collect(),
            slots,
        })
    }
}

/// Indexed attributes, in index order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedAttributes {
    names: Vec<String>,
    slots: Vec<usize>,
}

impl IndexedAttributes {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index position of a named attribute
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Schema slot of the attribute at index position `idx`
    pub fn slot(&self, idx: usize) -> Option<usize> {
        self.slots.get(idx).copied()
    }

    /// Scaled index values of a parsed row, in index order
    pub fn extract(&self, schema: &EventSchema, row: &ParsedRow) -> StorageResult<Vec<i64>> {
        self.slots
            .iter()
            .map(|&slot| match row.values.get(slot) {
                Some(Value::Int(v)) => Ok(*v),
                Some(Value::Float(v)) => schema.scale(slot, *v),
                other => Err(StorageError::InvalidRow(format!(
                    "slot {} holds {:?}, expected a number",
                    slot, other
                ))),
            })
            .collect()
    }
}

fn parse_field<T: FromStr>(field: &str, attr_name: &str) -> StorageResult<T> {
    field.parse().map_err(|_| {
        StorageError::InvalidRow(format!("cannot parse '{}' for attribute '{}'", field, attr_name))
    })
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(bytes);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock_schema() -> EventSchema {
        EventSchema::new(
            "stock",
            &[
                ("ticker", "TYPE"),
                ("open", "DOUBLE.2"),
                ("volume", "INT"),
                ("note", "CHAR[6]"),
                ("time", "TIMESTAMP"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_attr_type_parsing() {
        assert_eq!("INT".parse::<AttrType>().unwrap(), AttrType::Int);
        assert_eq!(
            "FLOAT.3".parse::<AttrType>().unwrap(),
            AttrType::Float { decimals: 3 }
        );
        assert_eq!(
            "double.2".parse::<AttrType>().unwrap(),
            AttrType::Double { decimals: 2 }
        );
        assert_eq!(
            "CHAR[12]".parse::<AttrType>().unwrap(),
            AttrType::Char { len: 12 }
        );
        assert!("LONG".parse::<AttrType>().is_err());
        assert!("CHAR[x]".parse::<AttrType>().is_err());
    }

    #[test]
    fn test_schema_requires_type_and_timestamp() {
        assert!(EventSchema::new("s", &[("a", "INT"), ("t", "TIMESTAMP")]).is_err());
        assert!(EventSchema::new("s", &[("k", "TYPE"), ("a", "INT")]).is_err());
        assert!(EventSchema::new("s", &[("k", "TYPE"), ("k", "TIMESTAMP")]).is_err());
    }

    #[test]
    fn test_record_size() {
        let schema = stock_schema();
        assert_eq!(schema.record_size(), 4 + 8 + 4 + 6 + 8);
    }

    #[test]
    fn test_parse_and_decode_row() {
        let mut schema = stock_schema();
        let row = schema.parse_row("MSFT, 101.256, 3000, hello, 1696150489").unwrap();
        assert_eq!(row.type_id, 1);
        assert_eq!(row.timestamp, 1696150489);
        assert_eq!(row.record.len(), schema.record_size());

        let decoded = schema.decode_record(&row.record).unwrap();
        assert_eq!(decoded, row.values);
        assert_eq!(decoded[1], Value::Float(101.256));
        assert_eq!(decoded[3], Value::Char("hello".to_string()));

        let other = schema.parse_row("IBM,1.0,1,x,5").unwrap();
        assert_eq!(other.type_id, 2);
        assert_eq!(schema.parse_row("MSFT,1.0,1,x,6").unwrap().type_id, 1);
        assert_eq!(schema.type_name(2), Some("IBM"));
        assert_eq!(schema.type_name(0), None);
        assert_eq!(schema.lookup_type("AAPL"), None);
    }

    #[test]
    fn test_invalid_rows() {
        let mut schema = stock_schema();
        assert!(matches!(
            schema.parse_row("MSFT,1.0,1"),
            Err(StorageError::InvalidRow(_))
        ));
        assert!(matches!(
            schema.parse_row("MSFT,abc,1,x,5"),
            Err(StorageError::InvalidRow(_))
        ));
        assert!(matches!(
            schema.parse_row("MSFT,1.0,99999999999,x,5"),
            Err(StorageError::InvalidRow(_))
        ));
        assert!(schema.parse_row("IBM,1.0,1,x,later").is_err());
        // rejected rows never register their event type
        assert_eq!(schema.type_count(), 0);
        assert_eq!(schema.lookup_type("MSFT"), None);
        assert_eq!(schema.lookup_type("IBM"), None);
    }

    #[test]
    fn test_indexed_values_are_scaled() {
        let mut schema = stock_schema();
        let indexed = schema.index_on(&["open", "volume"]).unwrap();
        let row = schema.parse_row("MSFT,101.256,3000,n,1").unwrap();
        assert_eq!(indexed.extract(&schema, &row).unwrap(), vec![10125, 3000]);
        assert_eq!(indexed.position("volume"), Some(1));
        assert_eq!(indexed.slot(0), Some(1));

        let negative = schema.parse_row("MSFT,-2.509,-7,n,2").unwrap();
        assert_eq!(indexed.extract(&schema, &negative).unwrap(), vec![-250, -7]);
    }

    #[test]
    fn test_index_on_rejects_non_numeric() {
        let schema = stock_schema();
        assert!(schema.index_on(&["note"]).is_err());
        assert!(schema.index_on(&["time"]).is_err());
        assert!(schema.index_on(&["missing"]).is_err());
    }
}
