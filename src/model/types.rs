use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TableError};

/// Case-insensitive identifier: the original spelling plus its lower-case form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CIStr {
    pub o: String,
    pub l: String,
}

impl CIStr {
    pub fn new(s: impl Into<String>) -> Self {
        let o = s.into();
        let l = o.to_lowercase();
        Self { o, l }
    }

    pub fn as_str(&self) -> &str {
        &self.o
    }

    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.l == other.to_lowercase()
    }
}

impl fmt::Display for CIStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.o)
    }
}

impl From<&str> for CIStr {
    fn from(s: &str) -> Self {
        CIStr::new(s)
    }
}

impl From<String> for CIStr {
    fn from(s: String) -> Self {
        CIStr::new(s)
    }
}

/// Online schema change state of a schema object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SchemaState {
    #[default]
    None,
    DeleteOnly,
    WriteOnly,
    WriteReorganization,
    DeleteReorganization,
    Public,
}

impl SchemaState {
    /// Rows written in this state must maintain the object.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            SchemaState::WriteOnly | SchemaState::WriteReorganization | SchemaState::Public
        )
    }
}

impl fmt::Display for SchemaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaState::None => "none",
            SchemaState::DeleteOnly => "delete only",
            SchemaState::WriteOnly => "write only",
            SchemaState::WriteReorganization => "write reorganization",
            SchemaState::DeleteReorganization => "delete reorganization",
            SchemaState::Public => "public",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Char,
    VarChar,
    Text,
    Binary,
    VarBinary,
    Blob,
    Bit,
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    Json,
}

/// Families of types between which MODIFY COLUMN can convert losslessly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Integer,
    Real,
    String,
    Binary,
    Temporal,
    Other,
}

impl ColumnType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::TinyInt
                | ColumnType::SmallInt
                | ColumnType::MediumInt
                | ColumnType::Int
                | ColumnType::BigInt
        )
    }

    /// Types carrying a character set other than `binary`.
    pub fn has_charset(self) -> bool {
        matches!(self, ColumnType::Char | ColumnType::VarChar | ColumnType::Text)
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::DateTime | ColumnType::Timestamp | ColumnType::Time
        )
    }

    pub fn integer_bits(self) -> Option<u32> {
        match self {
            ColumnType::TinyInt => Some(8),
            ColumnType::SmallInt => Some(16),
            ColumnType::MediumInt => Some(24),
            ColumnType::Int => Some(32),
            ColumnType::BigInt => Some(64),
            _ => None,
        }
    }

    pub fn class(self) -> TypeClass {
        match self {
            t if t.is_integer() => TypeClass::Integer,
            ColumnType::Float | ColumnType::Double | ColumnType::Decimal => TypeClass::Real,
            ColumnType::Char | ColumnType::VarChar | ColumnType::Text => TypeClass::String,
            ColumnType::Binary | ColumnType::VarBinary | ColumnType::Blob => TypeClass::Binary,
            t if t.is_temporal() => TypeClass::Temporal,
            _ => TypeClass::Other,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::TinyInt => "tinyint",
            ColumnType::SmallInt => "smallint",
            ColumnType::MediumInt => "mediumint",
            ColumnType::Int => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Decimal => "decimal",
            ColumnType::Char => "char",
            ColumnType::VarChar => "varchar",
            ColumnType::Text => "text",
            ColumnType::Binary => "binary",
            ColumnType::VarBinary => "varbinary",
            ColumnType::Blob => "blob",
            ColumnType::Bit => "bit",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Time => "time",
            ColumnType::Year => "year",
            ColumnType::Json => "json",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldType {
    pub tp: ColumnType,
    /// Display width or maximum length.
    pub flen: Option<u32>,
    /// Scale for decimals, fractional seconds precision for temporal types.
    pub decimal: Option<u32>,
    pub unsigned: bool,
    pub charset: String,
    pub collate: String,
}

impl FieldType {
    pub fn new(tp: ColumnType) -> Self {
        Self {
            tp,
            flen: None,
            decimal: None,
            unsigned: false,
            charset: String::new(),
            collate: String::new(),
        }
    }

    pub fn int() -> Self {
        Self::new(ColumnType::Int)
    }

    pub fn bigint() -> Self {
        Self::new(ColumnType::BigInt)
    }

    pub fn varchar(len: u32) -> Self {
        Self::new(ColumnType::VarChar).with_len(len)
    }

    pub fn char(len: u32) -> Self {
        Self::new(ColumnType::Char).with_len(len)
    }

    pub fn timestamp(fsp: u32) -> Self {
        Self::new(ColumnType::Timestamp).with_decimal(fsp)
    }

    pub fn datetime(fsp: u32) -> Self {
        Self::new(ColumnType::DateTime).with_decimal(fsp)
    }

    pub fn with_len(mut self, len: u32) -> Self {
        self.flen = Some(len);
        self
    }

    pub fn with_decimal(mut self, decimal: u32) -> Self {
        self.decimal = Some(decimal);
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    /// Fractional seconds precision, 0 when unspecified.
    pub fn fsp(&self) -> u32 {
        self.decimal.unwrap_or(0)
    }

    /// Value read for rows written before a NOT NULL column without a default existed.
    pub fn zero_value(&self) -> Datum {
        match self.tp.class() {
            TypeClass::Integer if self.unsigned => Datum::Uint(0),
            TypeClass::Integer => Datum::Int(0),
            TypeClass::Real => Datum::Float(0.0),
            TypeClass::Binary => Datum::Bytes(Vec::new()),
            TypeClass::Temporal => Datum::String(match self.tp {
                ColumnType::Date => "0000-00-00".to_string(),
                ColumnType::Time => "00:00:00".to_string(),
                _ => "0000-00-00 00:00:00".to_string(),
            }),
            TypeClass::String | TypeClass::Other => Datum::String(String::new()),
        }
    }

    /// Inclusive bounds of an integer column.
    fn integer_range(&self) -> (i128, i128) {
        let bits = self.tp.integer_bits().unwrap_or(64);
        if self.unsigned {
            (0, (1i128 << bits) - 1)
        } else {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        }
    }

    /// Coerce a value into this type for storage.
    pub fn convert(&self, value: Datum, column: &str) -> Result<Datum> {
        let incorrect = |kind: &str, value: &Datum| TableError::IncorrectValue {
            kind: kind.to_string(),
            value: value.to_string(),
            column: column.to_string(),
        };
        if value.is_null() {
            return Ok(Datum::Null);
        }
        let converted = match self.tp.class() {
            TypeClass::Integer => {
                let v = match &value {
                    Datum::Int(v) => i128::from(*v),
                    Datum::Uint(v) => i128::from(*v),
                    Datum::Float(v) if v.is_finite() => v.round() as i128,
                    Datum::String(s) => s.trim().parse::<i128>().map_err(|_| incorrect("integer", &value))?,
                    _ => return Err(incorrect("integer", &value).into()),
                };
                let (min, max) = self.integer_range();
                if v < min || v > max {
                    return Err(TableError::OutOfRange(column.to_string()).into());
                }
                if self.unsigned {
                    Datum::Uint(v as u64)
                } else {
                    Datum::Int(v as i64)
                }
            }
            TypeClass::Real => match &value {
                Datum::Int(v) => Datum::Float(*v as f64),
                Datum::Uint(v) => Datum::Float(*v as f64),
                Datum::Float(v) => Datum::Float(*v),
                Datum::String(s) => Datum::Float(s.trim().parse::<f64>().map_err(|_| incorrect("double", &value))?),
                _ => return Err(incorrect("double", &value).into()),
            },
            TypeClass::Binary => match value {
                Datum::Bytes(b) => Datum::Bytes(b),
                other => Datum::Bytes(other.to_string().into_bytes()),
            },
            _ => match value {
                Datum::String(s) => Datum::String(s),
                other => Datum::String(other.to_string()),
            },
        };
        Ok(converted)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tp)?;
        match (self.flen, self.decimal) {
            (Some(len), Some(dec)) => write!(f, "({},{})", len, dec)?,
            (Some(len), None) => write!(f, "({})", len)?,
            (None, Some(dec)) if self.tp.is_temporal() => write!(f, "({})", dec)?,
            _ => {}
        }
        if self.unsigned {
            f.write_str(" unsigned")?;
        }
        Ok(())
    }
}

/// A single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int(v) => Some(*v),
            Datum::Uint(v) => i64::try_from(*v).ok(),
            Datum::Float(v) => Some(v.round() as i64),
            Datum::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(v) => Some(*v as f64),
            Datum::Uint(v) => Some(*v as f64),
            Datum::Float(v) => Some(*v),
            Datum::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Truthiness in the MySQL sense: non-zero numbers are true.
    pub fn is_true(&self) -> bool {
        match self {
            Datum::Null => false,
            other => other.as_f64().map(|v| v != 0.0).unwrap_or(false),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => f.write_str("NULL"),
            Datum::Int(v) => write!(f, "{}", v),
            Datum::Uint(v) => write!(f, "{}", v),
            Datum::Float(v) => write!(f, "{}", v),
            Datum::String(s) => f.write_str(s),
            Datum::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int(v as i64)
    }
}

impl From<u64> for Datum {
    fn from(v: u64) -> Self {
        Datum::Uint(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::String(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::String(v)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Datum::Null)
    }
}
