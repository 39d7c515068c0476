//! Coercion of row values read from MySQL to the types of the PostgreSQL columns they are
//! loaded into.

mod row;

pub use row::{convert_cell, convert_row_data_types};
