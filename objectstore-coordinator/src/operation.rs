//! Typed, mergeable, serializable units of work on an object's value.
//!
//! Wire layout:
//!
//! ```text
//! u8 data type | u8 operation type | u32 key len | key | [value]
//! ```
//!
//! Only `Put` and `Publish` carry a value. A map value is a `u32` entry count
//! followed by length-prefixed field/value pairs; field names may not be
//! empty.

use crate::codec::{prefixed_len, ByteReader, ByteWriter, CodecError};
use crate::dispatcher::OperationDispatcher;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::message::MAX_OPERATION_LEN;
use objectstore_types::{FieldMap, ObjectKey};
use std::collections::VecDeque;

/// Tag selecting the value model and its storage executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    Map = 1,
}

impl TryFrom<u8> for DataType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::Map),
            other => Err(CodecError::UnknownDataType(other)),
        }
    }
}

/// Tag of an operation on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationKind {
    Publish = 1,
    Put = 2,
    Get = 3,
    Delete = 4,
    PublishDelete = 5,
}

impl TryFrom<u8> for OperationKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            1 => Self::Publish,
            2 => Self::Put,
            3 => Self::Get,
            4 => Self::Delete,
            5 => Self::PublishDelete,
            other => return Err(CodecError::UnknownOperationType(other)),
        })
    }
}

/// The value of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectValue {
    Map(FieldMap),
}

impl ObjectValue {
    /// An empty value of the given type.
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Map => Self::Map(FieldMap::new()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::Map(_) => DataType::Map,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Map(map) => map.is_empty(),
        }
    }

    pub fn as_map(&self) -> Option<&FieldMap> {
        match self {
            Self::Map(map) => Some(map),
        }
    }

    pub fn into_map(self) -> Option<FieldMap> {
        match self {
            Self::Map(map) => Some(map),
        }
    }

    /// Folds `other` into `self`, last write wins per field.
    pub fn merge(&mut self, other: &ObjectValue) -> CoordinatorResult<()> {
        match (self, other) {
            (Self::Map(dst), Self::Map(src)) => {
                for (field, value) in src {
                    dst.insert(field.clone(), value.clone());
                }
                Ok(())
            }
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Map(map) => {
                4 + map
                    .iter()
                    .map(|(k, v)| prefixed_len(k.len()) + prefixed_len(v.len()))
                    .sum::<usize>()
            }
        }
    }

    fn encode(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        match self {
            Self::Map(map) => {
                let count = u32::try_from(map.len()).map_err(|_| CodecError::TooLong {
                    field: "map",
                    len: map.len(),
                    limit: u32::MAX as usize,
                })?;
                w.write_u32(count)?;
                for (field, value) in map {
                    if field.is_empty() {
                        return Err(CodecError::InvalidField("field name"));
                    }
                    w.write_bytes("field name", field, MAX_OPERATION_LEN)?;
                    w.write_bytes("field value", value, MAX_OPERATION_LEN)?;
                }
                Ok(())
            }
        }
    }

    fn decode(data_type: DataType, r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        match data_type {
            DataType::Map => {
                let count = r.read_u32()? as usize;
                let mut map = FieldMap::new();
                for _ in 0..count {
                    let field = r.read_bytes("field name", MAX_OPERATION_LEN)?;
                    if field.is_empty() {
                        return Err(CodecError::InvalidField("field name"));
                    }
                    let value = r.read_bytes("field value", MAX_OPERATION_LEN)?;
                    map.insert(field, value);
                }
                Ok(Self::Map(map))
            }
        }
    }
}

impl From<FieldMap> for ObjectValue {
    fn from(map: FieldMap) -> Self {
        Self::Map(map)
    }
}

/// A unit of work on one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Put { key: ObjectKey, value: ObjectValue },
    Get { key: ObjectKey, data_type: DataType },
    Delete { key: ObjectKey, data_type: DataType },
    Publish { key: ObjectKey, value: ObjectValue },
    PublishDelete { key: ObjectKey, data_type: DataType },
}

impl Operation {
    pub fn put(key: ObjectKey, value: impl Into<ObjectValue>) -> Self {
        Self::Put {
            key,
            value: value.into(),
        }
    }

    pub fn get(key: ObjectKey, data_type: DataType) -> Self {
        Self::Get { key, data_type }
    }

    pub fn delete(key: ObjectKey, data_type: DataType) -> Self {
        Self::Delete { key, data_type }
    }

    pub fn publish(key: ObjectKey, value: impl Into<ObjectValue>) -> Self {
        Self::Publish {
            key,
            value: value.into(),
        }
    }

    pub fn publish_delete(key: ObjectKey, data_type: DataType) -> Self {
        Self::PublishDelete { key, data_type }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Put { .. } => OperationKind::Put,
            Self::Get { .. } => OperationKind::Get,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Publish { .. } => OperationKind::Publish,
            Self::PublishDelete { .. } => OperationKind::PublishDelete,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Put { key, .. }
            | Self::Get { key, .. }
            | Self::Delete { key, .. }
            | Self::Publish { key, .. }
            | Self::PublishDelete { key, .. } => key,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::Put { value, .. } | Self::Publish { value, .. } => value.data_type(),
            Self::Get { data_type, .. }
            | Self::Delete { data_type, .. }
            | Self::PublishDelete { data_type, .. } => *data_type,
        }
    }

    pub fn value(&self) -> Option<&ObjectValue> {
        match self {
            Self::Put { value, .. } | Self::Publish { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<ObjectValue> {
        match self {
            Self::Put { value, .. } | Self::Publish { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Folds `other` into `self`.
    ///
    /// Both operations must target the same key and data type and be of the
    /// same kind. Put and Publish values merge field by field with `other`
    /// winning; two deletes of one key collapse into one. `self` is left
    /// untouched on error.
    pub fn merge(&mut self, other: &Operation) -> CoordinatorResult<()> {
        if self.key() != other.key() {
            return Err(CoordinatorError::InvalidArgument("merge across keys".into()));
        }
        if self.data_type() != other.data_type() {
            return Err(CoordinatorError::InvalidArgument("merge across data types".into()));
        }
        match (self, other) {
            (Self::Put { value: dst, .. }, Self::Put { value: src, .. })
            | (Self::Publish { value: dst, .. }, Self::Publish { value: src, .. }) => {
                dst.merge(src)
            }
            (Self::Delete { .. }, Self::Delete { .. })
            | (Self::PublishDelete { .. }, Self::PublishDelete { .. }) => Ok(()),
            (this, _) => Err(CoordinatorError::InvalidArgument(format!(
                "cannot merge {:?} with {:?}",
                this.kind(),
                other.kind()
            ))),
        }
    }

    /// Runs the operation against the storage executors registered for its
    /// data type. Only `Get` yields a value.
    pub fn execute(
        &self,
        dispatcher: &OperationDispatcher,
    ) -> CoordinatorResult<Option<ObjectValue>> {
        match self {
            Self::Put { key, value } => dispatcher.put(key, value).map(|_| None),
            Self::Get { key, data_type } => dispatcher.get(*data_type, key).map(Some),
            Self::Delete { key, data_type } => dispatcher.delete(*data_type, key).map(|_| None),
            Self::Publish { key, value } => dispatcher.publish(key, value).map(|_| None),
            Self::PublishDelete { key, data_type } => {
                dispatcher.publish_delete(*data_type, key).map(|_| None)
            }
        }
    }

    /// Number of bytes `encode` produces.
    pub fn data_size(&self) -> usize {
        1 + 1 + prefixed_len(self.key().len()) + self.value().map_or(0, ObjectValue::encoded_len)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let size = self.data_size();
        if size > MAX_OPERATION_LEN {
            return Err(CodecError::TooLong {
                field: "operation",
                len: size,
                limit: MAX_OPERATION_LEN,
            });
        }
        let mut w = ByteWriter::with_limit(size);
        w.write_u8(self.data_type() as u8)?;
        w.write_u8(self.kind() as u8)?;
        w.write_bytes("key", self.key().as_bytes(), MAX_OPERATION_LEN)?;
        if let Some(value) = self.value() {
            value.encode(&mut w)?;
        }
        if w.len() != size {
            return Err(CodecError::SizeMismatch {
                declared: size,
                actual: w.len(),
            });
        }
        Ok(w.into_inner())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        let data_type = DataType::try_from(r.read_u8()?)?;
        let kind = OperationKind::try_from(r.read_u8()?)?;
        let key = ObjectKey::new(r.read_bytes("key", MAX_OPERATION_LEN)?);
        let operation = match kind {
            OperationKind::Put => Self::Put {
                key,
                value: ObjectValue::decode(data_type, &mut r)?,
            },
            OperationKind::Publish => Self::Publish {
                key,
                value: ObjectValue::decode(data_type, &mut r)?,
            },
            OperationKind::Get => Self::Get { key, data_type },
            OperationKind::Delete => Self::Delete { key, data_type },
            OperationKind::PublishDelete => Self::PublishDelete { key, data_type },
        };
        r.finish()?;
        Ok(operation)
    }

    /// Decodes bytes that must hold an operation of `expected` kind.
    pub fn decode_as(bytes: &[u8], expected: OperationKind) -> CoordinatorResult<Self> {
        let operation = Self::decode(bytes)?;
        if operation.kind() != expected {
            return Err(CoordinatorError::InvalidMessage(format!(
                "expected {expected:?} operation, got {:?}",
                operation.kind()
            )));
        }
        Ok(operation)
    }
}

/// Folds every successor that merges cleanly into the head of `queue`,
/// stopping at the first that does not.
pub(crate) fn merge_pending(queue: &mut VecDeque<Operation>) {
    while queue.len() >= 2 {
        let next = queue[1].clone();
        if queue[0].merge(&next).is_err() {
            break;
        }
        queue.remove(1);
    }
}
