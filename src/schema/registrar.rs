use std::collections::HashSet;

use super::{SchemaError, TableSchema};
use crate::value::{FieldValue, LogicalType};

/// Expand a column name template with a repetition index.
///
/// `{0}` is replaced everywhere, otherwise the first `{}`. A template with
/// neither gets `_{index}` appended.
pub fn format_column_name(template: &str, index: usize) -> String {
    if template.contains("{0}") {
        template.replace("{0}", &index.to_string())
    } else if template.contains("{}") {
        template.replacen("{}", &index.to_string(), 1)
    } else {
        format!("{template}_{index}")
    }
}

/// Collects columns and their values while the first row is written.
#[derive(Debug, Default)]
pub struct SchemaRegistrar {
    columns: Vec<(String, LogicalType)>,
    seen: HashSet<String>,
    values: Vec<FieldValue<'static>>,
}

impl SchemaRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next column. A rejected column leaves the registrar unchanged.
    pub fn register(
        &mut self,
        name: String,
        logical_type: LogicalType,
        value: FieldValue<'static>,
    ) -> Result<usize, SchemaError> {
        if self.seen.contains(&name) {
            return Err(SchemaError::DuplicateColumn(name));
        }
        self.seen.insert(name.clone());
        self.columns.push((name, logical_type));
        self.values.push(value);
        Ok(self.columns.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Freeze the schema, returning it with the first row's values in column order.
    pub fn freeze(self) -> Result<(TableSchema, Vec<FieldValue<'static>>), SchemaError> {
        let schema = TableSchema::new(self.columns)?;
        Ok((schema, self.values))
    }
}
