//! Value and schema types shared by the schema conversion and row conversion code.

mod cell;
mod schema;

pub use cell::*;
pub use schema::*;

use std::collections::BTreeMap;

/// A row keyed by column name.
pub type RowData = BTreeMap<String, Cell>;
