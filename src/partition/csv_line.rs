//! Line-level CSV helpers shared by the partitioner, reader and aggregation

/// True for empty and whitespace-only lines
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// First comma-separated field, trimmed and unquoted
pub fn first_field(line: &str) -> Option<&str> {
    if is_blank(line) {
        return None;
    }
    let raw = match line.find(',') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    Some(unquoted.trim())
}

/// Canonical feature id of a data row, or `None` when the first field is
/// not numeric
///
/// Ids are compared by value, so `042` and `42` both yield `"42"`. A first
/// line for which this returns `None` is treated as a header.
pub fn parse_feature_id(line: &str) -> Option<String> {
    let field = first_field(line)?;
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse::<u64>().ok().map(|id| id.to_string())
}

/// Keyword check for yield-table and layer headers
///
/// Blank lines count as headers so callers skip them.
pub fn is_header_line(line: &str) -> bool {
    if is_blank(line) {
        return true;
    }
    let upper = line.trim_start().trim_start_matches('"').to_ascii_uppercase();
    upper.starts_with("TABLE")
        || upper.starts_with("FEATURE")
        || upper.starts_with("POLYGON")
        || upper.contains("LAYER_ID")
        || upper.contains("SPECIES_CODE")
}

/// Split a single CSV line into fields, honouring quotes
pub fn split_fields(line: &str) -> Option<csv::StringRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());
    reader.records().next().and_then(|record| record.ok())
}
