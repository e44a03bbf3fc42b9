//! Typed attribute values
//!
//! Interpreted attribute values are a closed sum type instead of the
//! anything-goes dynamic typing a reflection-based registry would allow.

use crate::sd::SecurityDescriptor;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Logical type tag for a decoded attribute.
///
/// Replaces runtime type descriptors as the registry's notion of "what this
/// attribute decodes to".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Bool,
    Int32,
    Int64,
    String,
    Bytes,
    Time,
    Sid,
    Uuid,
    SecurityDescriptor,
}

/// A single interpreted attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    Sid(String),
    Uuid(Uuid),
    SecurityDescriptor(SecurityDescriptor),
}

impl Value {
    /// Logical type of this value.
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Self::Bool(_) => LogicalType::Bool,
            Self::Int32(_) => LogicalType::Int32,
            Self::Int64(_) => LogicalType::Int64,
            Self::String(_) => LogicalType::String,
            Self::Bytes(_) => LogicalType::Bytes,
            Self::Time(_) => LogicalType::Time,
            Self::Sid(_) => LogicalType::Sid,
            Self::Uuid(_) => LogicalType::Uuid,
            Self::SecurityDescriptor(_) => LogicalType::SecurityDescriptor,
        }
    }

    /// Extract a UUID, if this value holds one.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Extract an i64, widening Int32 as needed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Extract a timestamp, if this value holds one.
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }
}
