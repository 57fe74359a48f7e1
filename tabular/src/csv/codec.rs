use crate::table::Row;
use error::TransferError;
use value::Value;
use value::flatten::parse_loose;

pub const DELIMITER: char = '|';
pub const ESCAPE: char = '\\';

/// Escapes a rendered cell for the wire: backslash escaping, no quoting.
/// Newlines become `\n` so a physical newline is always a row boundary.
pub fn escape_cell(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ESCAPE => escaped.push_str("\\\\"),
            DELIMITER => escaped.push_str("\\|"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Splits one physical line into unescaped cells.
pub fn split_line(line: &str) -> Vec<String> {
    let mut cells = vec![];
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some(other) => current.push(other),
                None => current.push(ESCAPE),
            },
            DELIMITER => cells.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    cells.push(current);
    cells
}

/// Splits on unescaped delimiters but leaves escape sequences intact, for
/// rewrites that must not disturb existing cell text.
pub fn split_line_raw(line: &str) -> Vec<String> {
    let mut cells = vec![];
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            DELIMITER => cells.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    cells.push(current);
    cells
}

/// Renders a value into its textual cell form. Mappings, and arrays that
/// still contain mappings, are written as null; they travel through child
/// tables and markers instead.
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Dict(_) => String::new(),
        Value::Array(elements) if elements.iter().any(Value::is_dict) => String::new(),
        Value::Array(_) => {
            let json: serde_json::Value = value.into();
            json.to_string()
        }
        scalar => scalar.to_string(),
    }
}

/// Re-types a cell read off the wire: absent, integer, float, boolean,
/// embedded structure, else text.
pub fn parse_cell(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Int(i));
    }
    if looks_numeric(text)
        && let Ok(f) = text.parse::<f64>()
    {
        return Some(Value::Float(f));
    }
    match text {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => {}
    }
    if let Some(value) = parse_loose(text) {
        return Some(value);
    }
    Some(Value::text(text))
}

/// Guards the float parse against textual forms like "nan" or "inf" that
/// `f64::from_str` would happily accept.
fn looks_numeric(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
}

pub fn render_header(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| escape_cell(c))
        .collect::<Vec<_>>()
        .join("|")
}

/// Renders a row under the given column order; absent keys become empty cells.
pub fn render_row(columns: &[String], row: &Row) -> String {
    columns
        .iter()
        .map(|column| {
            row.get(column)
                .map(|v| escape_cell(&render_cell(v)))
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Parses one data line against the header; empty cells are absent keys.
pub fn parse_row(columns: &[String], line: &str) -> Result<Row, TransferError> {
    let cells = split_line(line);
    if cells.len() != columns.len() {
        return Err(TransferError::Serialization(format!(
            "row has {} cells, header has {} columns",
            cells.len(),
            columns.len()
        )));
    }
    let mut row = Row::new();
    for (column, cell) in columns.iter().zip(cells) {
        if let Some(value) = parse_cell(&cell) {
            row.insert(column.clone(), value);
        }
    }
    Ok(row)
}
