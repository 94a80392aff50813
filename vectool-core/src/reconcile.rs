//! Fitting documents to whatever schema a table actually has.

use serde_json::Value;

use crate::embedding::Embedder;
use crate::engine::Row;
use crate::error::ToolError;
use crate::schema::{DOC_FIELD, FieldKind, TableSchema, VECTOR_FIELD};

/// Where documents and vectors go in an existing table.
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub table: String,
    pub doc_field: String,
    pub vector_field: String,
    pub dimensions: usize,
    pub schema: TableSchema,
}

impl TableLayout {
    pub fn inspect(table: &str, schema: TableSchema) -> Result<Self, ToolError> {
        let (vector, dimensions) = schema.vector_field().ok_or_else(|| {
            ToolError::InvalidInput(format!("Table '{table}' has no fixed-width vector field"))
        })?;
        let vector_field = vector.name.clone();
        let doc_field = document_field(&schema).ok_or_else(|| {
            ToolError::InvalidInput(format!("Table '{table}' has no field to hold document text"))
        })?;
        Ok(Self {
            table: table.to_string(),
            doc_field,
            vector_field,
            dimensions,
            schema,
        })
    }

    /// Fail unless the embedder produces vectors of the table's width.
    pub fn check_dimensions(&self, embedder: &dyn Embedder) -> Result<(), ToolError> {
        let model_dims = embedder.dimensions();
        if model_dims != self.dimensions {
            log::error!(
                "dimension mismatch on {}: table {} vs model {model_dims}",
                self.table,
                self.dimensions
            );
            return Err(ToolError::DimensionMismatch {
                table: self.table.clone(),
                table_dims: self.dimensions,
                model: embedder.model_name().to_string(),
                model_dims,
            });
        }
        Ok(())
    }

    /// Columns other than the vector, in schema order.
    pub fn scalar_columns(&self) -> Vec<String> {
        self.schema
            .fields
            .iter()
            .filter(|f| f.name != self.vector_field)
            .map(|f| f.name.clone())
            .collect()
    }

    /// One row per document with every other column filled with its default.
    pub fn shape_rows(&self, docs: &[String], vectors: Vec<Vec<f32>>) -> Vec<Row> {
        docs.iter()
            .zip(vectors)
            .map(|(doc, vector)| {
                let mut row = Row::new();
                for field in &self.schema.fields {
                    let value = if field.name == self.doc_field {
                        Value::String(doc.clone())
                    } else if field.name == self.vector_field {
                        vector_value(&vector)
                    } else {
                        field.kind.default_value()
                    };
                    row.insert(field.name.clone(), value);
                }
                row
            })
            .collect()
    }
}

/// `doc` if present, else the first text field, else the first field.
pub fn document_field(schema: &TableSchema) -> Option<String> {
    schema
        .field(DOC_FIELD)
        .or_else(|| schema.fields.iter().find(|f| f.kind == FieldKind::Text))
        .or_else(|| schema.fields.first())
        .map(|f| f.name.clone())
}

/// Rows for a freshly created default-schema table.
pub fn default_rows(docs: &[String], vectors: Vec<Vec<f32>>) -> Vec<Row> {
    docs.iter()
        .zip(vectors)
        .map(|(doc, vector)| {
            let mut row = Row::new();
            row.insert(DOC_FIELD.to_string(), Value::String(doc.clone()));
            row.insert(VECTOR_FIELD.to_string(), vector_value(&vector));
            row
        })
        .collect()
}

pub fn vector_value(vector: &[f32]) -> Value {
    Value::Array(vector.iter().map(|v| Value::from(*v as f64)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::testutil::MockEmbedder;
    use serde_json::json;

    fn wide_schema() -> TableSchema {
        TableSchema::new(vec![
            Field::new("title", FieldKind::Text),
            Field::new("embedding", FieldKind::Vector(2)),
            Field::new("views", FieldKind::Int),
            Field::new("rating", FieldKind::Float),
            Field::new("public", FieldKind::Bool),
            Field::new("tags", FieldKind::List),
            Field::new("blob", FieldKind::Bytes),
        ])
    }

    #[test]
    fn doc_field_prefers_literal_doc() {
        let mut schema = wide_schema();
        schema.fields.push(Field::new("doc", FieldKind::Text));
        assert_eq!(document_field(&schema).as_deref(), Some("doc"));
    }

    #[test]
    fn doc_field_falls_back_to_first_text_then_first_field() {
        assert_eq!(document_field(&wide_schema()).as_deref(), Some("title"));
        let numeric = TableSchema::new(vec![
            Field::new("n", FieldKind::Int),
            Field::new("v", FieldKind::Vector(2)),
        ]);
        assert_eq!(document_field(&numeric).as_deref(), Some("n"));
    }

    #[test]
    fn inspect_finds_vector_and_width() {
        let layout = TableLayout::inspect("Wide", wide_schema()).unwrap();
        assert_eq!(layout.vector_field, "embedding");
        assert_eq!(layout.dimensions, 2);
        assert!(!layout.scalar_columns().contains(&"embedding".to_string()));
    }

    #[test]
    fn inspect_requires_a_vector_field() {
        let schema = TableSchema::new(vec![Field::new("doc", FieldKind::Text)]);
        assert!(TableLayout::inspect("Flat", schema).is_err());
    }

    #[test]
    fn dimension_check_names_both_widths() {
        let layout = TableLayout::inspect("Big", TableSchema::default_for(512)).unwrap();
        let err = layout.check_dimensions(&MockEmbedder::new(384)).unwrap_err();
        let text = err.to_response();
        assert!(text.contains("512") && text.contains("384"), "got {text}");
        assert!(layout.check_dimensions(&MockEmbedder::new(512)).is_ok());
    }

    #[test]
    fn shaped_rows_fill_defaults() {
        let layout = TableLayout::inspect("Wide", wide_schema()).unwrap();
        let rows = layout.shape_rows(&["hello".into()], vec![vec![0.5, 0.25]]);
        let row = &rows[0];
        assert_eq!(row["title"], "hello");
        assert_eq!(row["embedding"], json!([0.5, 0.25]));
        assert_eq!(row["views"], 0);
        assert_eq!(row["rating"], 0.0);
        assert_eq!(row["public"], false);
        assert_eq!(row["tags"], json!([]));
        assert_eq!(row["blob"], Value::Null);
    }

    #[test]
    fn default_rows_hold_only_doc_and_vector() {
        let rows = default_rows(&["a".into(), "b".into()], vec![vec![1.0], vec![2.0]]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].len(), 2);
        assert_eq!(rows[1]["doc"], "b");
    }
}
