//! SQL dialect helpers.
//!
//! Identifier quoting is used by the query compiler; the foreign-key toggles
//! and truncation statements serve fixture loaders that reset tables between
//! test runs.

/// Dialect-specific SQL fragments.
pub trait Dialect {
    /// Quotes one identifier (no qualifier splitting).
    fn quote_identifier(&self, name: &str) -> String;
    /// Statements that turn foreign-key enforcement off.
    fn disable_foreign_key_constraints(&self) -> Vec<String>;
    /// Statements that turn foreign-key enforcement back on.
    fn enable_foreign_key_constraints(&self) -> Vec<String>;
    /// Statements that remove every row of `table`.
    fn truncate(&self, table: &str) -> Vec<String>;
}

/// SQLite flavor: double-quoted identifiers, `PRAGMA foreign_keys`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn disable_foreign_key_constraints(&self) -> Vec<String> {
        vec!["PRAGMA foreign_keys = OFF;".to_string()]
    }

    fn enable_foreign_key_constraints(&self) -> Vec<String> {
        vec!["PRAGMA foreign_keys = ON;".to_string()]
    }

    // SQLite has no TRUNCATE; an unqualified DELETE uses the truncate optimization.
    fn truncate(&self, table: &str) -> Vec<String> {
        vec![format!("DELETE FROM {};", self.quote_identifier(table))]
    }
}

#[cfg(test)]
mod tests {
    use super::{Dialect, SqliteDialect};

    #[test]
    fn quote_identifier_doubles_embedded_quotes() {
        assert_eq!(SqliteDialect.quote_identifier("posts"), "\"posts\"");
        assert_eq!(SqliteDialect.quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn truncate_deletes_all_rows() {
        assert_eq!(
            SqliteDialect.truncate("comments"),
            vec!["DELETE FROM \"comments\";".to_string()]
        );
    }
}
