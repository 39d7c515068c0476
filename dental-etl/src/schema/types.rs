//! Static MySQL to PostgreSQL type mapping and type name normalization.

/// PostgreSQL types that keep the length or precision parameters of the MySQL type.
const PARAMETERIZED_TARGETS: [&str; 3] = ["character varying", "character", "numeric"];

/// Maps a MySQL base type to its PostgreSQL counterpart, `None` when the type is unknown.
fn map_base_type(base_type: &str) -> Option<&'static str> {
    let pg_type = match base_type {
        "int" | "integer" => "integer",
        "bigint" => "bigint",
        "tinyint" => "smallint",
        "smallint" => "smallint",
        "mediumint" => "integer",
        "float" => "real",
        "double" | "real" => "double precision",
        "decimal" | "numeric" => "numeric",
        "char" => "character",
        "varchar" => "character varying",
        "text" | "tinytext" | "mediumtext" | "longtext" => "text",
        "datetime" | "timestamp" => "timestamp",
        "date" => "date",
        "time" => "time",
        "year" => "integer",
        "boolean" | "bool" => "boolean",
        "bit" => "bit",
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => "bytea",
        "json" => "jsonb",
        _ => return None,
    };

    Some(pg_type)
}

/// Splits a MySQL column type such as `decimal(10, 2) unsigned` into its lowercase base type
/// and its parameters with whitespace removed.
pub fn split_mysql_type(column_type: &str) -> (String, Option<String>) {
    let column_type = column_type.trim().to_lowercase();

    let base_end = column_type
        .find(|c: char| c == '(' || c.is_whitespace())
        .unwrap_or(column_type.len());
    let base_type = column_type[..base_end].to_string();

    let params = column_type[base_end..]
        .trim_start()
        .strip_prefix('(')
        .and_then(|rest| rest.find(')').map(|end| &rest[..end]))
        .map(|params| params.chars().filter(|c| !c.is_whitespace()).collect());

    (base_type, params)
}

/// Returns whether a MySQL column type is a `TINYINT`, the only type eligible for boolean
/// detection.
pub fn is_tinyint(column_type: &str) -> bool {
    split_mysql_type(column_type).0 == "tinyint"
}

/// Maps a MySQL column type to a PostgreSQL type without looking at the data.
///
/// Parameters are kept for `character varying`, `character` and `numeric` and dropped for every
/// other type. Unknown types map to `text`.
pub fn map_mysql_type(column_type: &str) -> String {
    let (base_type, params) = split_mysql_type(column_type);

    let Some(pg_type) = map_base_type(&base_type) else {
        return "text".to_string();
    };

    match params {
        Some(params) if !params.is_empty() && PARAMETERIZED_TARGETS.contains(&pg_type) => {
            format!("{pg_type}({params})")
        }
        _ => pg_type.to_string(),
    }
}

/// Normalizes a PostgreSQL type name for comparison.
///
/// Lowercases, collapses whitespace, drops whitespace inside parentheses, spells `varchar` as
/// `character varying`, strips `without time zone` and removes the implicit `(1)` length that
/// PostgreSQL reports for `bit` and `character`.
pub fn normalize_type(type_name: &str) -> String {
    let collapsed = type_name
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut normalized = String::with_capacity(collapsed.len());
    let mut depth = 0usize;
    for ch in collapsed.chars() {
        match ch {
            '(' => {
                depth += 1;
                if normalized.ends_with(' ') {
                    normalized.pop();
                }
                normalized.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                normalized.push(ch);
            }
            ' ' if depth > 0 => {}
            _ => normalized.push(ch),
        }
    }

    let (base, params) = match normalized.find('(') {
        Some(index) => normalized.split_at(index),
        None => (normalized.as_str(), ""),
    };

    let base = match base {
        "varchar" => "character varying",
        "char" | "bpchar" => "character",
        "timestamp without time zone" => "timestamp",
        "time without time zone" => "time",
        "int" | "int4" => "integer",
        "int2" => "smallint",
        "int8" => "bigint",
        "float8" => "double precision",
        "float4" => "real",
        "bool" => "boolean",
        "decimal" => "numeric",
        other => other,
    };

    match (base, params) {
        ("bit" | "character", "(1)") => base.to_string(),
        _ => format!("{base}{params}"),
    }
}
