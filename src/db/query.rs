//! Named-placeholder rewriting.
//!
//! Queries may use `:name` placeholders. At prepare time they are rewritten
//! to the positional `?` form both backends speak, and the ordinal of each
//! name is remembered so later binds resolve without scanning the SQL again.

use crate::error::{Error, Result};

/// A rewritten query plus its name → ordinal table.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSql {
    pub sql: String,
    names: Vec<String>,
}

impl PreparedSql {
    /// Rewrite `:name` placeholders to `?`, skipping quoted regions.
    pub fn rewrite(sql: &str) -> Self {
        let mut out = String::with_capacity(sql.len());
        let mut names = Vec::new();

        let bytes = sql.as_bytes();
        let mut i = 0;
        let mut quote: Option<u8> = None;

        while i < bytes.len() {
            let c = bytes[i];
            match quote {
                Some(q) => {
                    out.push(c as char);
                    if c == q {
                        quote = None;
                    }
                    i += 1;
                }
                None => {
                    if c == b'\'' || c == b'"' || c == b'`' {
                        quote = Some(c);
                        out.push(c as char);
                        i += 1;
                    } else if c == b':'
                        && i + 1 < bytes.len()
                        && (bytes[i + 1].is_ascii_alphanumeric() || bytes[i + 1] == b'_')
                    {
                        let start = i + 1;
                        let mut end = start;
                        while end < bytes.len()
                            && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                        {
                            end += 1;
                        }
                        names.push(sql[start..end].to_string());
                        out.push('?');
                        i = end;
                    } else {
                        out.push(c as char);
                        i += 1;
                    }
                }
            }
        }

        Self { sql: out, names }
    }

    /// Number of placeholders, named or positional.
    pub fn placeholder_count(&self) -> usize {
        self.names.len()
    }

    /// Resolve a named placeholder to its ordinal.
    pub fn ordinal(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::Persistence(format!("no such placeholder: :{name}")))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_basic() {
        let q = PreparedSql::rewrite("SELECT * FROM `Item` WHERE `UID` = :uid AND `qty` > :min");
        assert_eq!(q.sql, "SELECT * FROM `Item` WHERE `UID` = ? AND `qty` > ?");
        assert_eq!(q.ordinal("uid").unwrap(), 0);
        assert_eq!(q.ordinal("min").unwrap(), 1);
        assert!(q.ordinal("other").is_err());
    }

    #[test]
    fn test_rewrite_skips_quoted_colons() {
        let q = PreparedSql::rewrite("SELECT ':notbound' FROM t WHERE a = :a");
        assert_eq!(q.sql, "SELECT ':notbound' FROM t WHERE a = ?");
        assert_eq!(q.placeholder_count(), 1);
    }

    #[test]
    fn test_rewrite_numeric_suffix_names() {
        let q = PreparedSql::rewrite("UPDATE t SET a = :0, b = :1 WHERE c = :2");
        assert_eq!(q.sql, "UPDATE t SET a = ?, b = ? WHERE c = ?");
        assert_eq!(q.ordinal("1").unwrap(), 1);
    }

    #[test]
    fn test_rewrite_leaves_casts_alone() {
        // A bare colon with no identifier after it passes through.
        let q = PreparedSql::rewrite("SELECT a : b");
        assert_eq!(q.sql, "SELECT a : b");
        assert_eq!(q.placeholder_count(), 0);
    }
}
