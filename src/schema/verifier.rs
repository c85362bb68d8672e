use super::{SchemaError, TableSchema};

/// Records the field names written for a row and compares them with the
/// frozen schema when the row is finished.
///
/// Costs a `String` per field, so it is only enabled when the writer's
/// `verify_column_order` option is set.
#[derive(Debug, Default)]
pub struct ColumnOrderVerifier {
    seen: Vec<String>,
}

impl ColumnOrderVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: String) {
        self.seen.push(name);
    }

    /// Check the recorded row against `schema` and start a new row.
    pub fn verify(&mut self, schema: &TableSchema) -> Result<(), SchemaError> {
        let result = check(schema, &self.seen);
        self.seen.clear();
        result
    }
}

fn check(schema: &TableSchema, seen: &[String]) -> Result<(), SchemaError> {
    if schema.len() != seen.len() {
        let missing_from_row = schema
            .names()
            .filter(|name| !seen.iter().any(|s| s.as_str() == *name))
            .map(str::to_string)
            .collect();
        let unexpected_in_row = seen
            .iter()
            .filter(|name| !schema.contains(name.as_str()))
            .cloned()
            .collect();
        return Err(SchemaError::ColumnCount {
            expected: schema.len(),
            actual: seen.len(),
            missing_from_row,
            unexpected_in_row,
        });
    }

    for (index, (expected, actual)) in schema.names().zip(seen).enumerate() {
        if expected != actual.as_str() {
            return Err(SchemaError::ColumnOrder {
                index,
                expected: expected.to_string(),
                actual: actual.clone(),
            });
        }
    }
    Ok(())
}
