use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use csv::StringRecord;
use itertools::Itertools;
use regex::Regex;
use tracing::warn;

/// Index of a named column in a header row.
pub fn find_column(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| anyhow!("column '{}' not found in header {:?}", name, headers))
}

/// Strips thousands separators and coerces count fields to integers.
pub struct Normalizer {
    separators: Regex,
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            separators: Regex::new(r"[,\s]").unwrap(),
        }
    }

    pub fn parse_count(&self, raw: &str) -> Result<i64> {
        let cleaned = self.separators.replace_all(raw.trim(), "");
        cleaned
            .parse::<i64>()
            .map_err(|_| anyhow!("cannot coerce '{}' to an integer", raw))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Empty fields are nulls, anything else must be a float.
pub fn parse_opt_float(raw: &str) -> Result<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| anyhow!("cannot coerce '{}' to a number", raw))
}

/// One output row per distinct key, summing values. Empty keys form their own
/// group. Output is sorted by key so reruns write identical files.
pub fn group_sum<I>(rows: I) -> Vec<(String, i64)>
where
    I: IntoIterator<Item = (String, i64)>,
{
    let mut sums: HashMap<String, i64> = HashMap::new();
    for (key, value) in rows {
        *sums.entry(key).or_insert(0) += value;
    }
    sums.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)).collect()
}

/// Builds the right side of a left join. Duplicate keys keep the first match
/// so the join can never fan out left rows.
pub fn join_map<V, I>(rows: I) -> HashMap<String, V>
where
    I: IntoIterator<Item = (String, V)>,
{
    let mut map: HashMap<String, V> = HashMap::new();
    for (key, value) in rows {
        if map.contains_key(&key) {
            warn!("duplicate join key '{}', keeping first match", key);
        } else {
            map.insert(key, value);
        }
    }
    map
}

/// subset/total, undefined when the total is zero or the subset is missing.
pub fn ratio(subset: Option<f64>, total: f64) -> Option<f64> {
    match subset {
        Some(s) if total != 0.0 => Some(s / total),
        _ => None,
    }
}

/// Positional span of the columns between two header labels, inclusive.
pub fn band_range(headers: &StringRecord, start: &str, end: &str) -> Result<(usize, usize)> {
    let lo = find_column(headers, start)?;
    let hi = find_column(headers, end)?;
    if hi < lo {
        bail!("age band '{}'..'{}' is reversed in the header", start, end);
    }
    Ok((lo, hi))
}

/// Row-wise sum over an inclusive column span, normalizing each field.
pub fn band_sum(norm: &Normalizer, record: &StringRecord, band: (usize, usize)) -> Result<i64> {
    let mut sum = 0;
    for i in band.0..=band.1 {
        let field = record
            .get(i)
            .ok_or_else(|| anyhow!("row has no field at column {}", i))?;
        sum += norm
            .parse_count(field)
            .with_context(|| format!("column {}", i))?;
    }
    Ok(sum)
}

/// Formats a nullable float the way the output files represent "no data".
pub fn opt_field(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn normalizer_strips_separators() {
        let norm = Normalizer::new();
        assert_eq!(norm.parse_count("1,234").unwrap(), 1234);
        assert_eq!(norm.parse_count("500").unwrap(), 500);
        assert_eq!(norm.parse_count(" 2,000 ").unwrap(), 2000);
    }

    #[test]
    fn normalizer_rejects_garbage() {
        let norm = Normalizer::new();
        assert!(norm.parse_count("abc").is_err());
        assert!(norm.parse_count("").is_err());
    }

    #[test]
    fn group_sum_conserves_total() {
        let rows = vec![
            ("A".to_owned(), 100),
            ("B".to_owned(), 200),
            ("A".to_owned(), 50),
            (String::new(), 7),
        ];
        let input_total: i64 = rows.iter().map(|r| r.1).sum();
        let grouped = group_sum(rows);
        let output_total: i64 = grouped.iter().map(|r| r.1).sum();
        assert_eq!(input_total, output_total);
        // empty key is its own group, output sorted by key
        assert_eq!(
            grouped,
            vec![
                (String::new(), 7),
                ("A".to_owned(), 150),
                ("B".to_owned(), 200),
            ]
        );
    }

    #[test]
    fn join_map_keeps_first_on_duplicate() {
        let map = join_map(vec![("A".to_owned(), 1), ("A".to_owned(), 2)]);
        assert_eq!(map.len(), 1);
        assert_eq!(map["A"], 1);
    }

    #[test]
    fn ratio_undefined_on_zero_total() {
        assert_eq!(ratio(Some(100.0), 200.0), Some(0.5));
        assert_eq!(ratio(Some(0.0), 200.0), Some(0.0));
        assert_eq!(ratio(Some(100.0), 0.0), None);
        assert_eq!(ratio(Some(0.0), 0.0), None);
        assert_eq!(ratio(None, 200.0), None);
    }

    #[test]
    fn band_sum_ignores_out_of_band_columns() {
        let headers = record(&["5", "11", "12", "13", "14", "15", "16", "17", "18"]);
        let row = record(&["100", "1", "1", "1", "1", "1", "1", "1", "1"]);
        let band = band_range(&headers, "11", "18").unwrap();
        let norm = Normalizer::new();
        assert_eq!(band_sum(&norm, &row, band).unwrap(), 8);
    }

    #[test]
    fn band_range_rejects_reversed_labels() {
        let headers = record(&["11", "12", "18"]);
        assert!(band_range(&headers, "18", "11").is_err());
    }
}
