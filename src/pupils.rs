use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Args;
use csv::{ReaderBuilder, StringRecord, Writer};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::table::{self, Normalizer};

/// NFTYPE codes counted as state-funded, non-selective intake.
pub const TARGET_SCHOOL_TYPES: [&str; 11] = [
    "AC", "ACC", "AC1619", "ACC1619", "CY", "F1619", "FSS", "F", "FD", "VA", "VC",
];

#[derive(Args, Debug)]
pub struct RosterArgs {
    /// School roster CSV
    #[arg(long)]
    pub input: PathBuf,

    /// Output CSV
    #[arg(long)]
    pub output: PathBuf,

    /// Area code column to group by
    #[arg(long, default_value = "LEA")]
    pub area_col: String,

    /// Pupil count column to sum
    #[arg(long, default_value = "TOTPUPS")]
    pub pupils_col: String,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    #[command(flatten)]
    pub roster: RosterArgs,

    /// School type column for the allow-list filter
    #[arg(long, default_value = "NFTYPE")]
    pub type_col: String,

    /// School type codes kept by the filter
    #[arg(long, value_delimiter = ',', default_values_t = TARGET_SCHOOL_TYPES.map(String::from))]
    pub types: Vec<String>,

    /// Admissions policy column
    #[arg(long, default_value = "ADMPOL")]
    pub policy_col: String,

    /// Admissions policy code excluded from the target subset
    #[arg(long, default_value = "SEL")]
    pub exclude: String,
}

#[derive(Args, Debug)]
pub struct CombineArgs {
    /// Total-by-area CSV (left side of the join)
    #[arg(long)]
    pub totals: PathBuf,

    /// Target-by-area CSV (right side of the join)
    #[arg(long)]
    pub targets: PathBuf,

    /// Output summary CSV
    #[arg(long)]
    pub output: PathBuf,

    /// Area code column shared by both inputs
    #[arg(long, default_value = "LEA")]
    pub area_col: String,
}

pub fn read_rows(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = rdr.headers()?.clone();
    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record =
            result.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?;
        rows.push(record);
    }
    Ok((headers, rows))
}

fn write_aggregate(
    path: &Path,
    key_col: &str,
    value_col: &str,
    rows: &[(String, i64)],
) -> Result<()> {
    let mut writer =
        Writer::from_path(path).with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record([key_col, value_col])?;
    for (key, sum) in rows {
        writer.write_record([key.as_str(), sum.to_string().as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

fn sum_by_area(
    path: &Path,
    rows: &[StringRecord],
    area: usize,
    pupils: usize,
    pupils_col: &str,
) -> Result<Vec<(String, i64)>> {
    let norm = Normalizer::new();
    let mut keyed = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let count = norm.parse_count(row.get(pupils).unwrap_or("")).with_context(|| {
            format!("{}: row {}, column '{}'", path.display(), i + 2, pupils_col)
        })?;
        keyed.push((row.get(area).unwrap_or("").trim().to_owned(), count));
    }
    Ok(table::group_sum(keyed))
}

/// Aggregator A: total pupils per area code.
pub fn run_total_pups(args: &RosterArgs) -> Result<()> {
    let (headers, rows) = read_rows(&args.input)?;
    let area = table::find_column(&headers, &args.area_col)?;
    let pupils = table::find_column(&headers, &args.pupils_col)?;

    let grouped = sum_by_area(&args.input, &rows, area, pupils, &args.pupils_col)?;
    write_aggregate(&args.output, &args.area_col, "total_pups", &grouped)?;
    info!(
        rows = rows.len(),
        areas = grouped.len(),
        "wrote {}",
        args.output.display()
    );
    Ok(())
}

pub fn in_target_subset(school_type: &str, policy: &str, allow: &[String], exclude: &str) -> bool {
    allow.iter().any(|t| t == school_type.trim()) && policy.trim() != exclude
}

/// Aggregator B: pupils in the target school subset per area code.
pub fn run_target_pups(args: &TargetArgs) -> Result<()> {
    let (headers, rows) = read_rows(&args.roster.input)?;
    let area = table::find_column(&headers, &args.roster.area_col)?;
    let pupils = table::find_column(&headers, &args.roster.pupils_col)?;
    let school_type = table::find_column(&headers, &args.type_col)?;
    let policy = table::find_column(&headers, &args.policy_col)?;

    let filtered: Vec<StringRecord> = rows
        .into_iter()
        .filter(|row| {
            in_target_subset(
                row.get(school_type).unwrap_or(""),
                row.get(policy).unwrap_or(""),
                &args.types,
                &args.exclude,
            )
        })
        .collect();

    let grouped = sum_by_area(
        &args.roster.input,
        &filtered,
        area,
        pupils,
        &args.roster.pupils_col,
    )?;
    write_aggregate(&args.roster.output, &args.roster.area_col, "target_pups", &grouped)?;
    info!(
        kept = filtered.len(),
        areas = grouped.len(),
        "wrote {}",
        args.roster.output.display()
    );
    Ok(())
}

/// Name-addressed rows from a headed CSV.
fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut out = Vec::new();
    for (i, result) in rdr.deserialize::<T>().enumerate() {
        out.push(
            result.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?,
        );
    }
    Ok(out)
}

/// One row of either aggregate output, read back by column name.
fn read_area_counts(path: &Path, area_col: &str, value_col: &str) -> Result<Vec<(String, i64)>> {
    let rows: Vec<HashMap<String, String>> = read_records(path)?;
    let norm = Normalizer::new();

    let mut out = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let area = row
            .get(area_col)
            .ok_or_else(|| anyhow!("column '{}' not found in {}", area_col, path.display()))?;
        let raw = row
            .get(value_col)
            .ok_or_else(|| anyhow!("column '{}' not found in {}", value_col, path.display()))?;
        let count = norm.parse_count(raw).with_context(|| {
            format!("{}: row {}, column '{}'", path.display(), i + 2, value_col)
        })?;
        out.push((area.trim().to_owned(), count));
    }
    Ok(out)
}

/// Combiner: left-join totals with targets and derive the target proportion.
pub fn run_combine(args: &CombineArgs) -> Result<()> {
    let totals = read_area_counts(&args.totals, &args.area_col, "total_pups")?;
    let targets = read_area_counts(&args.targets, &args.area_col, "target_pups")?;
    let target_map = table::join_map(targets);

    let mut writer = Writer::from_path(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    writer.write_record([
        args.area_col.as_str(),
        "total_pups",
        "target_pups",
        "target_prop",
    ])?;

    for (area, total) in &totals {
        let target = target_map.get(area).copied();
        let prop = table::ratio(target.map(|t| t as f64), *total as f64);

        writer.write_record([
            area.as_str(),
            total.to_string().as_str(),
            target.map(|t| t.to_string()).unwrap_or_default().as_str(),
            table::opt_field(prop).as_str(),
        ])?;
    }
    writer.flush()?;
    info!(areas = totals.len(), "wrote {}", args.output.display());
    Ok(())
}
