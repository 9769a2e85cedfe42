use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use polars::prelude::{CsvReader, DataFrame, SerReader};
use tracing_subscriber::EnvFilter;

use uplift::export::write_matched_csv;
use uplift::{run_pipeline, Dataset, MatchConfig, Result, TableSchema, UpliftError};

const USAGE: &str = "\
usage: uplift <data.csv> <treatment> <outcome> [options]
       uplift --sample [options]

options:
  --ratio <N>              control matches per treated unit (default 1)
  --no-replace             do not reuse a control across treated units
  --caliper <X>            maximum allowed score distance
  --covariates <a,b,c>     covariate columns (default: all other columns)
  --outcome-range <LO:HI>  declared valid outcome range (default 1:5)
  --export <PATH>          write the matched dataset as CSV
";

struct Cli {
    data: Option<PathBuf>,
    treatment: String,
    outcome: String,
    covariates: Option<Vec<String>>,
    outcome_range: (f64, f64),
    config: MatchConfig,
    export: Option<PathBuf>,
}

fn usage_err(msg: impl Into<String>) -> UpliftError {
    UpliftError::Configuration(msg.into())
}

fn parse_args(args: Vec<String>) -> Result<Cli> {
    let mut positional = Vec::new();
    let mut use_sample = false;
    let mut covariates = None;
    let mut outcome_range = (1.0, 5.0);
    let mut config = MatchConfig::default();
    let mut export = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .ok_or_else(|| usage_err(format!("{name} expects a value")))
        };
        match arg.as_str() {
            "--sample" => use_sample = true,
            "--no-replace" => config.replace = false,
            "--ratio" => {
                config.ratio = value("--ratio")?
                    .parse()
                    .map_err(|_| usage_err("--ratio expects an integer"))?;
            }
            "--caliper" => {
                config.caliper = Some(
                    value("--caliper")?
                        .parse()
                        .map_err(|_| usage_err("--caliper expects a number"))?,
                );
            }
            "--covariates" => {
                covariates = Some(
                    value("--covariates")?
                        .split(',')
                        .map(|c| c.trim().to_string())
                        .collect(),
                );
            }
            "--outcome-range" => {
                let range = value("--outcome-range")?;
                let (lo, hi) = range
                    .split_once(':')
                    .ok_or_else(|| usage_err("--outcome-range expects LO:HI"))?;
                outcome_range = (
                    lo.parse()
                        .map_err(|_| usage_err("--outcome-range expects numbers"))?,
                    hi.parse()
                        .map_err(|_| usage_err("--outcome-range expects numbers"))?,
                );
            }
            "--export" => export = Some(PathBuf::from(value("--export")?)),
            other if other.starts_with("--") => {
                return Err(usage_err(format!("unknown option `{other}`")));
            }
            _ => positional.push(arg.clone()),
        }
    }

    let (data, treatment, outcome) = if use_sample {
        if !positional.is_empty() {
            return Err(usage_err("--sample takes no positional arguments"));
        }
        (None, "treatment".to_string(), "outcome".to_string())
    } else {
        if positional.len() != 3 {
            return Err(usage_err(format!(
                "expected 3 positional arguments, got {}",
                positional.len()
            )));
        }
        let outcome = positional.pop().unwrap_or_default();
        let treatment = positional.pop().unwrap_or_default();
        let path = PathBuf::from(positional.pop().unwrap_or_default());
        (Some(path), treatment, outcome)
    };

    Ok(Cli {
        data,
        treatment,
        outcome,
        covariates,
        outcome_range,
        config,
        export,
    })
}

fn import_data(path: &PathBuf) -> Result<DataFrame> {
    Ok(CsvReader::from_path(path)?.finish()?)
}

fn load_dataset(cli: &Cli) -> Result<Dataset> {
    match &cli.data {
        None => Ok(uplift::sample::bundled().get()?.clone()),
        Some(path) => {
            let frame = import_data(path)?;
            let covariates = match &cli.covariates {
                Some(names) => names.clone(),
                // Mirror the usual setup: everything that is neither the
                // treatment nor the outcome is a covariate.
                None => frame
                    .get_column_names()
                    .into_iter()
                    .filter(|c| *c != cli.treatment && *c != cli.outcome)
                    .map(|c| c.to_string())
                    .collect(),
            };
            let schema = TableSchema::new(
                cli.treatment.clone(),
                cli.outcome.clone(),
                cli.outcome_range,
                covariates,
            );
            Dataset::from_frame(frame, schema)
        }
    }
}

fn run(args: Vec<String>) -> Result<()> {
    let cli = parse_args(args)?;
    let data = load_dataset(&cli)?;
    let output = run_pipeline(&data, &cli.config)?;

    println!("{}", output.record);
    println!(
        "Distinct controls used  : {}",
        output.matched.n_distinct_controls()
    );
    if let Some(path) = &cli.export {
        write_matched_csv(&output.matched, path)?;
        println!("Matched dataset written : {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        eprint!("{USAGE}");
        return ExitCode::from(2);
    }
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
