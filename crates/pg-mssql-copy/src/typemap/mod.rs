//! PostgreSQL to SQL Server type mapping.

/// Map a PostgreSQL `information_schema` type name to the SQL Server column
/// type used in destination DDL.
///
/// Unrecognized types fall back to VARCHAR(MAX); their values are copied as
/// strings.
pub fn postgres_to_mssql(data_type: &str, max_length: Option<i32>) -> String {
    let dt = data_type.to_lowercase();

    match dt.as_str() {
        "character varying" => match max_length {
            Some(n) if n > 0 => format!("VARCHAR({})", n),
            _ => "VARCHAR(MAX)".to_string(),
        },
        "integer" => "INT".to_string(),
        "boolean" => "BIT".to_string(),
        "timestamp without time zone" => "DATETIME2".to_string(),
        "numeric" => "DECIMAL(18,6)".to_string(),
        "text" => "VARCHAR(MAX)".to_string(),
        "double precision" => "FLOAT".to_string(),
        "date" => "DATE".to_string(),
        _ => "VARCHAR(MAX)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varchar_with_length() {
        assert_eq!(postgres_to_mssql("character varying", Some(255)), "VARCHAR(255)");
    }

    #[test]
    fn test_varchar_without_length() {
        assert_eq!(postgres_to_mssql("character varying", None), "VARCHAR(MAX)");
        assert_eq!(postgres_to_mssql("character varying", Some(0)), "VARCHAR(MAX)");
    }

    #[test]
    fn test_scalar_types() {
        assert_eq!(postgres_to_mssql("integer", None), "INT");
        assert_eq!(postgres_to_mssql("boolean", None), "BIT");
        assert_eq!(postgres_to_mssql("timestamp without time zone", None), "DATETIME2");
        assert_eq!(postgres_to_mssql("numeric", Some(18)), "DECIMAL(18,6)");
        assert_eq!(postgres_to_mssql("text", None), "VARCHAR(MAX)");
        assert_eq!(postgres_to_mssql("double precision", None), "FLOAT");
        assert_eq!(postgres_to_mssql("date", None), "DATE");
    }

    #[test]
    fn test_unknown_type_falls_back_to_varchar_max() {
        assert_eq!(postgres_to_mssql("bigint", None), "VARCHAR(MAX)");
        assert_eq!(postgres_to_mssql("uuid", None), "VARCHAR(MAX)");
        assert_eq!(postgres_to_mssql("jsonb", None), "VARCHAR(MAX)");
        assert_eq!(postgres_to_mssql("timestamp with time zone", None), "VARCHAR(MAX)");
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(postgres_to_mssql("INTEGER", None), "INT");
        assert_eq!(postgres_to_mssql("Character Varying", Some(50)), "VARCHAR(50)");
    }
}
