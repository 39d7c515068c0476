//! Identifier and literal quoting for the SQL this crate generates.

/// Quotes a MySQL identifier with backticks, doubling embedded backticks.
///
/// Reserved words used as table names in OpenDental (`procedure`, `order`, `group`, `user`) are
/// only valid when quoted.
pub fn quote_mysql_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Quotes a PostgreSQL identifier with double quotes, doubling embedded double quotes.
pub fn quote_pg_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quotes a MySQL `LIKE` pattern that matches `value` literally.
pub fn quote_mysql_like_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\\\\\"),
            '%' | '_' => {
                quoted.push_str("\\\\");
                quoted.push(ch);
            }
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}
