use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use csv::Writer;
use tracing::info;

use crate::pupils::read_rows;
use crate::table::{self, Normalizer};

#[derive(Args, Debug)]
pub struct DensityArgs {
    /// Population-by-age CSV
    #[arg(long)]
    pub population: PathBuf,

    /// School admissions CSV carrying a density column
    #[arg(long)]
    pub schools: PathBuf,

    /// Intermediate population-with-proportion CSV
    #[arg(long)]
    pub population_output: PathBuf,

    /// Final school-with-density CSV
    #[arg(long)]
    pub output: PathBuf,

    /// Small-area code column in the population table
    #[arg(long, default_value = "MSOA Code")]
    pub msoa_col: String,

    /// Total population column
    #[arg(long, default_value = "All Ages")]
    pub all_ages_col: String,

    /// First single-year age column of the school-age band
    #[arg(long, default_value = "11")]
    pub band_start: String,

    /// Last single-year age column of the school-age band
    #[arg(long, default_value = "18")]
    pub band_end: String,

    /// Small-area code column in the school table
    #[arg(long, default_value = "msoa21cd")]
    pub school_msoa_col: String,

    /// Density column in the school table
    #[arg(long, default_value = "density")]
    pub density_col: String,
}

/// Phase 1: proportion of each small area's population in the school-age band.
/// Writes the intermediate CSV and returns the per-area lookup for phase 2.
fn derive_proportions(args: &DensityArgs) -> Result<HashMap<String, Option<f64>>> {
    let (headers, rows) = read_rows(&args.population)?;
    let msoa = table::find_column(&headers, &args.msoa_col)?;
    let all_ages = table::find_column(&headers, &args.all_ages_col)?;
    let band = table::band_range(&headers, &args.band_start, &args.band_end)?;
    let norm = Normalizer::new();

    let mut writer = Writer::from_path(&args.population_output)
        .with_context(|| format!("failed to create {}", args.population_output.display()))?;
    let mut out_headers = headers.clone();
    out_headers.push_field("msoa_target_proportion");
    writer.write_record(&out_headers)?;

    let mut keyed = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let row_ctx = || format!("{}: row {}", args.population.display(), i + 2);

        let school_age = table::band_sum(&norm, row, band).with_context(row_ctx)?;
        let total = norm
            .parse_count(row.get(all_ages).unwrap_or(""))
            .with_context(row_ctx)?;
        let prop = table::ratio(Some(school_age as f64), total as f64);

        let mut out = row.clone();
        out.push_field(&table::opt_field(prop));
        writer.write_record(&out)?;

        keyed.push((row.get(msoa).unwrap_or("").trim().to_owned(), prop));
    }
    writer.flush()?;
    info!(
        areas = rows.len(),
        "wrote {}",
        args.population_output.display()
    );

    Ok(table::join_map(keyed))
}

/// Phase 2: left-join the proportion onto school records and derive
/// target_density = density * proportion.
fn apply_to_schools(args: &DensityArgs, proportions: &HashMap<String, Option<f64>>) -> Result<()> {
    let (headers, rows) = read_rows(&args.schools)?;
    let msoa = table::find_column(&headers, &args.school_msoa_col)?;
    let density = table::find_column(&headers, &args.density_col)?;

    let mut writer = Writer::from_path(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let mut out_headers = headers.clone();
    out_headers.push_field("msoa_target_proportion");
    out_headers.push_field("target_density");
    writer.write_record(&out_headers)?;

    for (i, row) in rows.iter().enumerate() {
        let d = table::parse_opt_float(row.get(density).unwrap_or("")).with_context(|| {
            format!(
                "{}: row {}, column '{}'",
                args.schools.display(),
                i + 2,
                args.density_col
            )
        })?;
        let prop = proportions
            .get(row.get(msoa).unwrap_or("").trim())
            .copied()
            .flatten();
        let target_density = match (d, prop) {
            (Some(d), Some(p)) => Some(d * p),
            _ => None,
        };

        let mut out = row.clone();
        out.push_field(&table::opt_field(prop));
        out.push_field(&table::opt_field(target_density));
        writer.write_record(&out)?;
    }
    writer.flush()?;
    info!(schools = rows.len(), "wrote {}", args.output.display());
    Ok(())
}

/// Density deriver: both phases, population first.
pub fn run_target_density(args: &DensityArgs) -> Result<()> {
    let proportions = derive_proportions(args)?;
    apply_to_schools(args, &proportions)
}
