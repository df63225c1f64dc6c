//! DELETE statement builder.

use super::{Filter, WhereTree};

/// A DELETE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteQuery {
    pub(crate) table: String,
    pub(crate) wheres: WhereTree,
}

impl DeleteQuery {
    /// Creates a delete from `table` (without prefix).
    #[must_use]
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            wheres: WhereTree::new(),
        }
    }
}

impl Filter for DeleteQuery {
    fn where_tree(&mut self) -> &mut WhereTree {
        &mut self.wheres
    }
}
