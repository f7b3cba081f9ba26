//! Source table metadata types.

use serde::{Deserialize, Serialize};

/// A source table discovered during enumeration, with its introspected
/// columns and row-count snapshot. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<Column>,
    /// Row count snapshot taken before the copy.
    pub row_count: i64,
}

impl Table {
    /// Full table name as schema.name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Column metadata from `information_schema.columns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// PostgreSQL data type name (information_schema spelling).
    pub data_type: String,
    /// Character maximum length, where applicable.
    pub max_length: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let table = Table {
            schema: "curated_kawasaki_registry".into(),
            name: "orders".into(),
            columns: vec![],
            row_count: 0,
        };
        assert_eq!(table.full_name(), "curated_kawasaki_registry.orders");
    }
}
