//! Schema metadata for a connected data source.
//!
//! Introspection produces a [`DatabaseMetadata`]; the prompt renderers in
//! [`crate::models::render`] and the SQL optimizer's schema-type map are both
//! derived from it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sql::SchemaTypes;

/// Output format used when rendering metadata into an LLM prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFormat {
    #[default]
    Markdown,
    MSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, deserialize_with = "de::string_or_null")]
    pub comment: String,
    #[serde(default, deserialize_with = "de::flexible_bool")]
    pub auto_increment: bool,
    #[serde(default = "default_true", deserialize_with = "de::flexible_bool")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default, deserialize_with = "de::vec_or_null")]
    pub examples: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Set when the column's sample values look like free text worth indexing.
    #[serde(default)]
    pub value_index: bool,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            comment: String::new(),
            auto_increment: false,
            nullable: true,
            default: None,
            examples: Vec::new(),
            enabled: true,
            value_index: false,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_examples(mut self, examples: Vec<String>) -> Self {
        self.examples = examples;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableForeignKey {
    #[serde(default, deserialize_with = "de::string_or_null")]
    pub name: String,
    pub column: String,
    #[serde(default)]
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DBTable {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default, deserialize_with = "de::string_or_null")]
    pub comment: String,
    #[serde(default)]
    pub columns: BTreeMap<String, TableColumn>,
    #[serde(default, deserialize_with = "de::vec_or_null")]
    pub primary_keys: Vec<String>,
    #[serde(default, deserialize_with = "de::vec_or_null")]
    pub foreign_keys: Vec<TableForeignKey>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl DBTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            comment: String::new(),
            columns: BTreeMap::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_column(mut self, column: TableColumn) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_keys.push(column.into());
        self
    }

    /// `schema.name` when a schema is known, otherwise the bare name.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, self.name),
            _ => self.name.clone(),
        }
    }

    /// Column name to declared type.
    ///
    /// Every column is reachable under its original spelling plus the upper,
    /// lower and title-cased variants, since identifier case sensitivity
    /// differs between dialects.
    pub fn column_type(&self) -> HashMap<String, String> {
        let mut types = HashMap::new();
        for column in self.columns.values() {
            for variant in case_variants(&column.name) {
                types.insert(variant, column.data_type.clone());
            }
        }
        types
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys.iter().any(|pk| pk == column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub name: String,
    #[serde(default, deserialize_with = "de::string_or_null")]
    pub comment: String,
    #[serde(default, deserialize_with = "de::vec_or_null")]
    pub tables: Vec<DBTable>,
}

impl DatabaseMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: String::new(),
            tables: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: DBTable) -> Self {
        self.tables.push(table);
        self
    }

    pub fn render(&self, format: SchemaFormat) -> String {
        match format {
            SchemaFormat::Markdown => self.to_markdown(),
            SchemaFormat::MSchema => self.to_m_schema(),
        }
    }

    /// Table to column type map for the optimizer, enabled tables only.
    pub fn schema_types(&self) -> SchemaTypes {
        let mut types = SchemaTypes::default();
        for table in self.tables.iter().filter(|t| t.enabled) {
            types.insert_table(&table.name, table.column_type());
        }
        types
    }
}

/// The original spelling plus upper, lower and title-cased forms.
pub fn case_variants(name: &str) -> Vec<String> {
    let mut variants = vec![
        name.to_string(),
        name.to_uppercase(),
        name.to_lowercase(),
        title_case(name),
    ];
    variants.dedup();
    variants
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for c in name.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("invalid fixed version pattern")
});

/// Server version as `major.minor[.patch]`.
///
/// Ordering compares major, then minor, then patch; a missing patch sorts
/// before any explicit patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DBServerVersion {
    pub major: u32,
    pub minor: u32,
    #[serde(default)]
    pub patch: Option<u32>,
}

impl DBServerVersion {
    pub fn new(major: u32, minor: u32, patch: Option<u32>) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extract the first `major.minor[.patch]` triple from a raw version banner,
    /// e.g. `8.0.36-0ubuntu0.22.04.1` or `PostgreSQL 16.2 on x86_64-pc-linux-gnu`.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = VERSION_PATTERN.captures(raw)?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps.get(2)?.as_str().parse().ok()?;
        let patch = match caps.get(3) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for DBServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Lenient deserializers for introspection output, where engines disagree on
/// how booleans and empty aggregates are encoded.
mod de {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Value::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "y" | "t"
            ),
            _ => false,
        })
    }

    pub fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
    }

    pub fn vec_or_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(
            DBServerVersion::parse("8.0.36-0ubuntu0.22.04.1"),
            Some(DBServerVersion::new(8, 0, Some(36)))
        );
        assert_eq!(
            DBServerVersion::parse("PostgreSQL 16.2 on x86_64-pc-linux-gnu"),
            Some(DBServerVersion::new(16, 2, None))
        );
        assert_eq!(
            DBServerVersion::parse("v1.1.3"),
            Some(DBServerVersion::new(1, 1, Some(3)))
        );
        assert_eq!(DBServerVersion::parse("unknown"), None);
    }

    #[test]
    fn test_version_ordering() {
        let v57 = DBServerVersion::new(5, 7, Some(44));
        let v8 = DBServerVersion::new(8, 0, None);
        let v801 = DBServerVersion::new(8, 0, Some(1));
        assert!(v57 < v8);
        assert!(v8 < v801);
        assert_eq!(v801.to_string(), "8.0.1");
        assert_eq!(v8.to_string(), "8.0");
    }

    #[test]
    fn test_column_type_case_variants() {
        let table = DBTable::new("orders").with_column(TableColumn::new("user_name", "VARCHAR(64)"));
        let types = table.column_type();
        for key in ["user_name", "USER_NAME", "User_Name"] {
            assert_eq!(types.get(key).map(String::as_str), Some("VARCHAR(64)"), "{key}");
        }
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("order_id"), "Order_Id");
        assert_eq!(title_case("createdAt"), "Createdat");
        assert_eq!(title_case("col2name"), "Col2Name");
    }

    #[test]
    fn test_lenient_introspection_decoding() {
        let raw = serde_json::json!({
            "name": "shop",
            "comment": null,
            "tables": [{
                "name": "orders",
                "schema": "shop",
                "comment": "Customer orders",
                "columns": {
                    "id": {"name": "id", "type": "int", "auto_increment": 1, "nullable": 0},
                    "note": {"name": "note", "type": "text", "comment": null, "nullable": "YES"}
                },
                "primary_keys": ["id"],
                "foreign_keys": null
            }]
        });
        let metadata: DatabaseMetadata = serde_json::from_value(raw).unwrap();
        let table = &metadata.tables[0];
        assert!(table.columns["id"].auto_increment);
        assert!(!table.columns["id"].nullable);
        assert!(table.columns["note"].nullable);
        assert!(table.columns["note"].enabled);
        assert!(table.foreign_keys.is_empty());
        assert_eq!(metadata.comment, "");
    }
}
