use std::fmt;

use crate::embedding::EmbedError;

/// Failure of a tool-level operation.
///
/// Operations return these; the tool boundary renders them for the caller
/// with [`ToolError::to_response`].
#[derive(Debug)]
pub enum ToolError {
    /// Empty or malformed caller-supplied arguments.
    InvalidInput(String),
    TableNotFound {
        table: String,
        hint: Option<String>,
    },
    /// The table's vector width differs from the embedding model's output.
    DimensionMismatch {
        table: String,
        table_dims: usize,
        model: String,
        model_dims: usize,
    },
    /// A delete filter that would match every row.
    DangerousOperation { filter: String },
    CreationFailure(String),
    DeletionFailure(String),
    /// Any other engine failure, already prefixed with context.
    Engine(String),
    Embedding(String),
}

impl ToolError {
    /// Wrap an underlying failure with a short description of what was attempted.
    pub fn engine(context: &str, err: impl fmt::Display) -> Self {
        Self::Engine(format!("{context}: {err}"))
    }

    pub fn table_not_found(table: &str) -> Self {
        Self::TableNotFound {
            table: table.to_string(),
            hint: None,
        }
    }

    /// Caller-facing string: `Warning: ...` for refused dangerous operations,
    /// `Error: ...` for everything else.
    pub fn to_response(&self) -> String {
        match self {
            Self::DangerousOperation { .. } => format!("Warning: {self}"),
            _ => format!("Error: {self}"),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "{msg}"),
            Self::TableNotFound { table, hint } => {
                write!(f, "Table '{table}' does not exist")?;
                if let Some(hint) = hint {
                    write!(f, ". {hint}")?;
                }
                Ok(())
            }
            Self::DimensionMismatch {
                table,
                table_dims,
                model,
                model_dims,
            } => write!(
                f,
                "Dimension mismatch: table '{table}' stores {table_dims}-dimensional vectors but \
                 embedding model '{model}' produces {model_dims}-dimensional vectors. Recreate the \
                 table with delete_table/create_table or configure a {table_dims}-dimensional model"
            ),
            Self::DangerousOperation { filter } => write!(
                f,
                "Filter '{filter}' would delete ALL documents. Use delete_table to remove the \
                 entire table instead"
            ),
            Self::CreationFailure(msg) | Self::DeletionFailure(msg) | Self::Engine(msg) => {
                write!(f, "{msg}")
            }
            Self::Embedding(msg) => write!(f, "embedding failed: {msg}"),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<EmbedError> for ToolError {
    fn from(err: EmbedError) -> Self {
        Self::Embedding(err.to_string())
    }
}
