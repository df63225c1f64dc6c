//! Identifier quoting and table prefixing.
//!
//! The quoter turns column names, table names and small SQL expressions
//! into dialect-quoted text, applying the database prefix to tables. It
//! keeps a per-statement alias cache so `users AS u` followed by `u.id`
//! does not prefix `u`.
//!
//! String literals are not supported: values must travel as bound
//! parameters.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::dialect::Dialect;
use crate::error::{DbalError, Result};

static ALIAS_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i) AS ").expect("alias separator pattern is valid"));

static EXPRESSION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z][0-9_a-z.]*\(?").expect("expression token pattern is valid")
});

/// Keywords left untouched inside expressions.
const KEYWORDS: &[&str] = &[
    "AND", "AS", "ASC", "BETWEEN", "CASE", "DESC", "DISTINCT", "ELSE", "END", "IN", "IS", "LIKE",
    "NOT", "NULL", "OR", "THEN", "WHEN",
];

/// Quotes identifiers for one compiled statement.
#[derive(Debug)]
pub struct Quoter<'a> {
    dialect: &'a dyn Dialect,
    prefix: String,
    aliases: HashMap<String, String>,
}

impl<'a> Quoter<'a> {
    /// Creates a quoter for `dialect` applying `prefix` to table names.
    #[must_use]
    pub fn new(dialect: &'a dyn Dialect, prefix: impl Into<String>) -> Self {
        Self {
            dialect,
            prefix: prefix.into(),
            aliases: HashMap::new(),
        }
    }

    /// The dialect used for quoting.
    #[must_use]
    pub fn dialect(&self) -> &'a dyn Dialect {
        self.dialect
    }

    /// Table prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `name` is a known alias or prefixed table name.
    #[must_use]
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Clears the alias cache.
    pub fn reset(&mut self) -> &mut Self {
        self.aliases.clear();
        self
    }

    /// Quotes `identifier`. With `is_table` the prefix is applied to the
    /// table part.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::QueryCompilation`] for empty identifiers,
    /// string literals and `a.b.c` paths.
    pub fn quote(&mut self, identifier: &str, is_table: bool) -> Result<String> {
        if identifier.trim().is_empty() {
            return Err(DbalError::QueryCompilation(String::from(
                "empty identifier",
            )));
        }
        let quote_char = self.dialect.quote_char();
        if identifier.contains(['\'', '"']) || identifier.contains(quote_char) {
            return Err(DbalError::QueryCompilation(format!(
                "string literals are not supported in identifiers: {identifier}"
            )));
        }

        if let Some(separator) = ALIAS_SEPARATOR.find(identifier) {
            let base = &identifier[..separator.start()];
            let alias = &identifier[separator.end()..];
            return self.aliasing(base, alias, is_table);
        }
        if has_expression(identifier) {
            return self.expression(identifier);
        }
        if identifier.contains('.') {
            return self.paired(identifier);
        }
        Ok(self.unpaired(identifier, is_table))
    }

    fn aliasing(&mut self, base: &str, alias: &str, is_table: bool) -> Result<String> {
        let quoted = format!(
            "{} AS {}",
            self.quote(base, is_table)?,
            self.dialect.identifier(alias)
        );
        // Registered after quoting so `name AS name` still gets the prefix.
        if is_table && !base.contains('.') {
            self.aliases.insert(alias.to_string(), base.to_string());
        }
        Ok(quoted)
    }

    fn expression(&mut self, identifier: &str) -> Result<String> {
        let mut quoted = String::with_capacity(identifier.len() + 8);
        let mut last = 0;
        for token in EXPRESSION_TOKEN.find_iter(identifier) {
            quoted.push_str(&identifier[last..token.start()]);
            let text = token.as_str();
            if has_expression(text) || KEYWORDS.contains(&text.to_ascii_uppercase().as_str()) {
                quoted.push_str(text);
            } else {
                quoted.push_str(&self.quote(text, false)?);
            }
            last = token.end();
        }
        quoted.push_str(&identifier[last..]);
        Ok(quoted)
    }

    fn paired(&mut self, identifier: &str) -> Result<String> {
        let mut parts = identifier.split('.');
        let (Some(table), Some(column), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(DbalError::QueryCompilation(format!(
                "identifier must be a table.column pair: {identifier}"
            )));
        };
        if table.is_empty() || column.is_empty() {
            return Err(DbalError::QueryCompilation(format!(
                "identifier must be a table.column pair: {identifier}"
            )));
        }
        Ok(format!(
            "{}.{}",
            self.unpaired(table, true),
            self.dialect.identifier(column)
        ))
    }

    fn unpaired(&mut self, identifier: &str, is_table: bool) -> String {
        if is_table && !self.aliases.contains_key(identifier) {
            let prefixed = format!("{}{identifier}", self.prefix);
            self.aliases
                .entry(prefixed.clone())
                .or_insert_with(|| identifier.to_string());
            return self.dialect.identifier(&prefixed);
        }
        self.dialect.identifier(identifier)
    }
}

fn has_expression(identifier: &str) -> bool {
    identifier.contains(['(', ')', ' '])
}
