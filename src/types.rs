//! Primitive type vocabulary shared by the wire protocol and result decoding.
//!
//! Columns are described by a [`TypeTag`]; raw column values are rendered to
//! display strings either by a default rendering or by a caller-supplied
//! [`ConverterTable`] entry for the column's tag.

use std::collections::HashMap;
use std::fmt;

use bincode::{Decode, Encode};
use serde::Serialize;

/// Primitive type tag attached to each result column.
///
/// Complex types (arrays, maps, structs) are delivered by the engine as
/// pre-rendered strings and therefore arrive tagged [`TypeTag::String`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TypeTag {
    /// BOOLEAN
    Boolean,
    /// TINYINT (8-bit)
    TinyInt,
    /// SMALLINT (16-bit)
    SmallInt,
    /// INT (32-bit)
    Int,
    /// BIGINT (64-bit)
    BigInt,
    /// FLOAT (carried as 64-bit on the wire)
    Float,
    /// DOUBLE
    Double,
    /// STRING
    String,
    /// VARCHAR(n)
    Varchar,
    /// CHAR(n)
    Char,
    /// BINARY
    Binary,
    /// DECIMAL(p, s), carried as text
    Decimal,
    /// DATE, carried as text
    Date,
    /// TIMESTAMP, carried as text
    Timestamp,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Boolean => "BOOLEAN",
            TypeTag::TinyInt => "TINYINT",
            TypeTag::SmallInt => "SMALLINT",
            TypeTag::Int => "INT",
            TypeTag::BigInt => "BIGINT",
            TypeTag::Float => "FLOAT",
            TypeTag::Double => "DOUBLE",
            TypeTag::String => "STRING",
            TypeTag::Varchar => "VARCHAR",
            TypeTag::Char => "CHAR",
            TypeTag::Binary => "BINARY",
            TypeTag::Decimal => "DECIMAL",
            TypeTag::Date => "DATE",
            TypeTag::Timestamp => "TIMESTAMP",
        };
        write!(f, "{}", name)
    }
}

/// One column of a result-set schema.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct Column {
    /// Display name of the column
    pub name: String,
    /// Primitive type tag
    pub type_tag: TypeTag,
}

/// Ordered result-set schema.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize)]
pub struct Schema {
    /// Columns in server order
    pub columns: Vec<Column>,
}

impl Schema {
    /// Column display names in server order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Borrowed view of one raw cell value, handed to converters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue<'a> {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl RawValue<'_> {
    /// Default display rendering, used when no converter is installed.
    pub fn render(&self) -> String {
        match self {
            RawValue::Bool(v) => v.to_string(),
            RawValue::I8(v) => v.to_string(),
            RawValue::I16(v) => v.to_string(),
            RawValue::I32(v) => v.to_string(),
            RawValue::I64(v) => v.to_string(),
            RawValue::F64(v) => v.to_string(),
            RawValue::Text(v) => (*v).to_string(),
            RawValue::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
        }
    }
}

/// A stringifying converter for one type tag.
pub type Stringifier = Box<dyn Fn(RawValue<'_>) -> String + Send + Sync>;

/// Pluggable table mapping a [`TypeTag`] to an optional stringifier.
///
/// The default table is empty: every tag uses the no-op path, which skips
/// converter dispatch entirely and, for text columns, moves the wire string
/// through without copying.
#[derive(Default)]
pub struct ConverterTable {
    converters: HashMap<TypeTag, Stringifier>,
}

impl ConverterTable {
    /// An empty table: identity rendering for every tag.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Install a converter for one tag, replacing any existing entry.
    pub fn set<F>(&mut self, tag: TypeTag, converter: F)
    where
        F: Fn(RawValue<'_>) -> String + Send + Sync + 'static,
    {
        self.converters.insert(tag, Box::new(converter));
    }

    /// Look up the converter for a tag, if one is installed.
    pub fn get(&self, tag: TypeTag) -> Option<&Stringifier> {
        self.converters.get(&tag)
    }

    /// True when no converters are installed (pure no-op path).
    pub fn is_identity(&self) -> bool {
        self.converters.is_empty()
    }
}

impl fmt::Debug for ConverterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterTable")
            .field("converters", &self.converters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Visibility level of a server query option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionLevel {
    /// Everyday options, always displayed
    Regular = 0,
    /// Options for uncommon tuning
    Advanced = 1,
    /// Options intended for engine developers
    Development = 2,
    /// Options kept only for compatibility
    Deprecated = 3,
    /// Options the server no longer honors
    Removed = 4,
}

impl OptionLevel {
    /// Parse a server-reported level name, case-insensitively.
    ///
    /// Unknown names map to [`OptionLevel::Development`] so that options
    /// introduced by newer servers stay hidden rather than breaking display.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "REGULAR" => OptionLevel::Regular,
            "ADVANCED" => OptionLevel::Advanced,
            "DEVELOPMENT" => OptionLevel::Development,
            "DEPRECATED" => OptionLevel::Deprecated,
            "REMOVED" => OptionLevel::Removed,
            _ => OptionLevel::Development,
        }
    }
}

impl fmt::Display for OptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionLevel::Regular => "REGULAR",
            OptionLevel::Advanced => "ADVANCED",
            OptionLevel::Development => "DEVELOPMENT",
            OptionLevel::Deprecated => "DEPRECATED",
            OptionLevel::Removed => "REMOVED",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_display() {
        assert_eq!(TypeTag::BigInt.to_string(), "BIGINT");
        assert_eq!(TypeTag::Timestamp.to_string(), "TIMESTAMP");
    }

    #[test]
    fn test_schema_column_names() {
        let schema = Schema {
            columns: vec![
                Column {
                    name: "id".to_string(),
                    type_tag: TypeTag::BigInt,
                },
                Column {
                    name: "name".to_string(),
                    type_tag: TypeTag::String,
                },
            ],
        };
        assert_eq!(schema.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_default_rendering() {
        assert_eq!(RawValue::Bool(true).render(), "true");
        assert_eq!(RawValue::I32(-7).render(), "-7");
        assert_eq!(RawValue::F64(1.5).render(), "1.5");
        assert_eq!(RawValue::Text("abc").render(), "abc");
        assert_eq!(RawValue::Bytes(b"xyz").render(), "xyz");
    }

    #[test]
    fn test_converter_table_dispatch() {
        let mut table = ConverterTable::identity();
        assert!(table.is_identity());

        table.set(TypeTag::Double, |v| match v {
            RawValue::F64(f) => format!("{:.2}", f),
            other => other.render(),
        });
        assert!(!table.is_identity());

        let converter = table.get(TypeTag::Double).unwrap();
        assert_eq!(converter(RawValue::F64(2.5)), "2.50");
        assert!(table.get(TypeTag::Int).is_none());
    }

    #[test]
    fn test_option_level_parsing() {
        assert_eq!(OptionLevel::from_name("regular"), OptionLevel::Regular);
        assert_eq!(OptionLevel::from_name("ADVANCED"), OptionLevel::Advanced);
        assert_eq!(OptionLevel::from_name("Deprecated"), OptionLevel::Deprecated);
        assert_eq!(OptionLevel::from_name("REMOVED"), OptionLevel::Removed);
        // Unknown level names stay hidden from regular display
        assert_eq!(
            OptionLevel::from_name("EXPERIMENTAL"),
            OptionLevel::Development
        );
    }

    #[test]
    fn test_option_level_display() {
        assert_eq!(OptionLevel::Regular.to_string(), "REGULAR");
        assert_eq!(OptionLevel::Development.to_string(), "DEVELOPMENT");
    }
}
