//! Table schemas.
//!
//! Field types come from a closed set ([`FieldKind`]); user-supplied type
//! names are mapped onto it without evaluation, unknown names becoming text.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::embedding::Embedder;

/// Name of the document column in the default schema.
pub const DOC_FIELD: &str = "doc";
/// Name of the vector column in the default schema.
pub const VECTOR_FIELD: &str = "vector";

#[derive(Debug)]
pub enum SchemaError {
    /// A required field is absent from a schema definition.
    MissingField(&'static str),
    /// A field definition could not be turned into a column.
    InvalidField { name: String, reason: String },
    /// An embedding-bound schema could not be resolved to fixed columns.
    Conversion(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(name) => write!(f, "schema must include a '{name}' field"),
            Self::InvalidField { name, reason } => write!(f, "invalid field '{name}': {reason}"),
            Self::Conversion(msg) => write!(f, "schema conversion failed: {msg}"),
        }
    }
}

impl std::error::Error for SchemaError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Int,
    Float,
    Bool,
    Bytes,
    List,
    /// Fixed-width float32 vector.
    Vector(usize),
}

impl FieldKind {
    /// Map a type name onto a field kind. Never fails: unrecognised names are text.
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        if let Some(width) = parse_vector_width(trimmed) {
            return Self::Vector(width);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "str" | "string" | "text" | "utf8" => Self::Text,
            "int" | "integer" | "int32" | "int64" => Self::Int,
            "float" | "double" | "float32" | "float64" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            "bytes" | "binary" => Self::Bytes,
            "list" | "array" => Self::List,
            other => {
                log::debug!("unknown field type '{other}', treating as text");
                Self::Text
            }
        }
    }

    pub fn vector_width(&self) -> Option<usize> {
        match self {
            Self::Vector(width) => Some(*width),
            _ => None,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector(_))
    }

    /// Value written for a column the caller did not populate.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Text => Value::String(String::new()),
            Self::Int => Value::from(0),
            Self::Float => Value::from(0.0),
            Self::Bool => Value::Bool(false),
            Self::List => Value::Array(Vec::new()),
            Self::Bytes | Self::Vector(_) => Value::Null,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "string"),
            Self::Int => write!(f, "int64"),
            Self::Float => write!(f, "double"),
            Self::Bool => write!(f, "bool"),
            Self::Bytes => write!(f, "binary"),
            Self::List => write!(f, "list<string>"),
            Self::Vector(width) => write!(f, "fixed_size_list<float32>[{width}]"),
        }
    }
}

/// Accepts `Vector(384)`, `vector(384)` and `Vector[384]`.
fn parse_vector_width(name: &str) -> Option<usize> {
    let lower = name.to_ascii_lowercase();
    let rest = lower.strip_prefix("vector")?;
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .or_else(|| rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')))?;
    inner.trim().parse().ok().filter(|w| *w > 0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
        }
    }

    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }
}

/// Concrete column list of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<Field>,
}

impl TableSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// `doc` text plus a vector column of the given width.
    pub fn default_for(dimensions: usize) -> Self {
        Self::new(vec![
            Field::required(DOC_FIELD, FieldKind::Text),
            Field::required(VECTOR_FIELD, FieldKind::Vector(dimensions)),
        ])
    }

    /// Build a schema from a `{field: type-name}` map.
    ///
    /// `doc` and `vector` are mandatory. The vector width comes from a
    /// `Vector(n)` type name when given, otherwise from `default_dimensions`.
    pub fn from_spec(spec: &Map<String, Value>, default_dimensions: usize) -> Result<Self, SchemaError> {
        let type_name = |name: &str, value: &Value| -> Result<String, SchemaError> {
            match value {
                Value::String(s) => Ok(s.clone()),
                Value::Null => Ok(String::new()),
                other => Err(SchemaError::InvalidField {
                    name: name.to_string(),
                    reason: format!("type must be a string, got {other}"),
                }),
            }
        };

        let doc = spec.get(DOC_FIELD).ok_or(SchemaError::MissingField(DOC_FIELD))?;
        let vector = spec
            .get(VECTOR_FIELD)
            .ok_or(SchemaError::MissingField(VECTOR_FIELD))?;

        let doc_kind = FieldKind::parse(&type_name(DOC_FIELD, doc)?);
        if doc_kind.is_vector() {
            return Err(SchemaError::InvalidField {
                name: DOC_FIELD.into(),
                reason: "document field cannot be a vector".into(),
            });
        }
        let width = FieldKind::parse(&type_name(VECTOR_FIELD, vector)?)
            .vector_width()
            .unwrap_or(default_dimensions);

        let mut fields = vec![
            Field::required(DOC_FIELD, doc_kind),
            Field::required(VECTOR_FIELD, FieldKind::Vector(width)),
        ];
        for (name, value) in spec {
            if name == DOC_FIELD || name == VECTOR_FIELD {
                continue;
            }
            let kind = FieldKind::parse(&type_name(name, value)?);
            if kind.is_vector() {
                return Err(SchemaError::InvalidField {
                    name: name.clone(),
                    reason: "only the 'vector' field may hold vectors".into(),
                });
            }
            fields.push(Field::new(name.clone(), kind));
        }
        Ok(Self::new(fields))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The first fixed-width vector column and its width.
    pub fn vector_field(&self) -> Option<(&Field, usize)> {
        self.fields
            .iter()
            .find_map(|f| f.kind.vector_width().map(|width| (f, width)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Schema whose vector column is bound to a live embedder.
#[derive(Clone)]
pub struct EmbeddedSchema {
    pub source_field: String,
    pub vector_field: String,
    pub embedder: Arc<dyn Embedder>,
}

impl EmbeddedSchema {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            source_field: DOC_FIELD.to_string(),
            vector_field: VECTOR_FIELD.to_string(),
            embedder,
        }
    }

    pub fn to_columnar(&self) -> Result<TableSchema, SchemaError> {
        let width = self.embedder.dimensions();
        if width == 0 {
            return Err(SchemaError::Conversion(format!(
                "embedder '{}' reports zero dimensions",
                self.embedder.model_name()
            )));
        }
        Ok(TableSchema::new(vec![
            Field::required(self.source_field.clone(), FieldKind::Text),
            Field::required(self.vector_field.clone(), FieldKind::Vector(width)),
        ]))
    }
}

impl fmt::Debug for EmbeddedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedSchema")
            .field("source_field", &self.source_field)
            .field("vector_field", &self.vector_field)
            .field("model", &self.embedder.model_name())
            .finish()
    }
}

/// Schema handed to the engine when creating a table.
#[derive(Debug, Clone)]
pub enum SchemaDef {
    Columnar(TableSchema),
    Embedded(EmbeddedSchema),
}

impl SchemaDef {
    /// The default document schema bound to `embedder`.
    pub fn default_for(embedder: Arc<dyn Embedder>) -> Self {
        Self::Embedded(EmbeddedSchema::new(embedder))
    }

    pub fn to_columnar(&self) -> Result<TableSchema, SchemaError> {
        match self {
            Self::Columnar(schema) => Ok(schema.clone()),
            Self::Embedded(embedded) => embedded.to_columnar(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockEmbedder;
    use serde_json::json;

    fn spec(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parse_known_type_names() {
        assert_eq!(FieldKind::parse("str"), FieldKind::Text);
        assert_eq!(FieldKind::parse("INT64"), FieldKind::Int);
        assert_eq!(FieldKind::parse("float"), FieldKind::Float);
        assert_eq!(FieldKind::parse("boolean"), FieldKind::Bool);
        assert_eq!(FieldKind::parse("bytes"), FieldKind::Bytes);
        assert_eq!(FieldKind::parse("list"), FieldKind::List);
        assert_eq!(FieldKind::parse("Vector(512)"), FieldKind::Vector(512));
        assert_eq!(FieldKind::parse("vector[8]"), FieldKind::Vector(8));
    }

    #[test]
    fn unknown_type_names_become_text() {
        assert_eq!(FieldKind::parse("__import__('os')"), FieldKind::Text);
        assert_eq!(FieldKind::parse("Vector(abc)"), FieldKind::Text);
        assert_eq!(FieldKind::parse("Vector(0)"), FieldKind::Text);
        assert_eq!(FieldKind::parse(""), FieldKind::Text);
    }

    #[test]
    fn display_uses_storage_type_names() {
        assert_eq!(FieldKind::Text.to_string(), "string");
        assert_eq!(FieldKind::Vector(3).to_string(), "fixed_size_list<float32>[3]");
    }

    #[test]
    fn defaults_follow_kind() {
        assert_eq!(FieldKind::Text.default_value(), json!(""));
        assert_eq!(FieldKind::Int.default_value(), json!(0));
        assert_eq!(FieldKind::Float.default_value(), json!(0.0));
        assert_eq!(FieldKind::Bool.default_value(), json!(false));
        assert_eq!(FieldKind::List.default_value(), json!([]));
        assert_eq!(FieldKind::Bytes.default_value(), Value::Null);
    }

    #[test]
    fn from_spec_orders_doc_and_vector_first() {
        let schema = TableSchema::from_spec(
            &spec(json!({"category": "str", "vector": "Vector(512)", "doc": "str", "year": "int"})),
            384,
        )
        .unwrap();
        assert_eq!(schema.names(), vec!["doc", "vector", "category", "year"]);
        assert_eq!(schema.vector_field().unwrap().1, 512);
        assert_eq!(schema.field("year").unwrap().kind, FieldKind::Int);
    }

    #[test]
    fn from_spec_uses_default_width_without_explicit_one() {
        let schema =
            TableSchema::from_spec(&spec(json!({"doc": "str", "vector": "vector"})), 384).unwrap();
        assert_eq!(schema.vector_field().unwrap().1, 384);
    }

    #[test]
    fn from_spec_requires_doc_and_vector() {
        let err = TableSchema::from_spec(&spec(json!({"vector": "Vector(3)"})), 3).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField("doc")));
        let err = TableSchema::from_spec(&spec(json!({"doc": "str"})), 3).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField("vector")));
    }

    #[test]
    fn from_spec_rejects_second_vector_and_non_string_types() {
        let err = TableSchema::from_spec(
            &spec(json!({"doc": "str", "vector": "Vector(3)", "other": "Vector(3)"})),
            3,
        )
        .unwrap_err();
        assert!(err.to_string().contains("other"));
        let err =
            TableSchema::from_spec(&spec(json!({"doc": 5, "vector": "Vector(3)"})), 3).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { .. }));
    }

    #[test]
    fn embedded_schema_converts_with_embedder_width() {
        let def = SchemaDef::default_for(Arc::new(MockEmbedder::new(7)));
        let columnar = def.to_columnar().unwrap();
        assert_eq!(columnar, TableSchema::default_for(7));
    }

    #[test]
    fn embedded_schema_with_zero_width_fails_conversion() {
        let def = SchemaDef::default_for(Arc::new(MockEmbedder::new(0)));
        assert!(matches!(def.to_columnar(), Err(SchemaError::Conversion(_))));
    }
}
