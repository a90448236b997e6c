//! Stored rows.

use std::fmt;

use crate::error::Error;
use crate::value::{render_values, Value};

/// Stable row identifier within a table. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(pub u64);

impl RowKey {
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let buf: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Deserialization(format!("row key of {} bytes", bytes.len())))?;
        Ok(RowKey(u64::from_be_bytes(buf)))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A row: its key plus one value per table column, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: RowKey,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(key: RowKey, values: Vec<Value>) -> Self {
        Self { key, values }
    }

    /// Value at a column position; out of range reads as NULL.
    pub fn value(&self, position: usize) -> &Value {
        self.values.get(position).unwrap_or(&Value::Null)
    }

    /// Values at the given positions, in that order.
    pub fn project(&self, positions: &[usize]) -> Vec<Value> {
        positions.iter().map(|p| self.value(*p).clone()).collect()
    }

    /// Serialize the row values using rkyv.
    pub fn encode_values(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(&self.values)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize row values stored under `key`.
    pub fn decode(key: RowKey, bytes: &[u8]) -> Result<Self, Error> {
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        let values = rkyv::from_bytes::<Vec<Value>, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        Ok(Self { key, values })
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", render_values(&self.values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_encoding() {
        let row = Row::new(
            RowKey(42),
            vec![Value::Int(1), Value::Null, Value::from("a'b"), Value::Float(0.5)],
        );
        let bytes = row.encode_values().unwrap();
        let decoded = Row::decode(RowKey(42), &bytes).unwrap();
        assert_eq!(decoded, row);
        assert_eq!(decoded.to_string(), "(1, NULL, 'a''b', 0.5)");
    }

    #[test]
    fn test_projection() {
        let row = Row::new(RowKey(1), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(row.project(&[1, 0, 5]), vec![Value::Int(2), Value::Int(1), Value::Null]);
    }

    #[test]
    fn test_row_key_bytes() {
        let key = RowKey(0x0102);
        assert_eq!(RowKey::from_bytes(&key.to_bytes()).unwrap(), key);
        assert!(RowKey::from_bytes(&[1, 2]).is_err());
    }
}
