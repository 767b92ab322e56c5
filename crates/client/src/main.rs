use arrow::util::pretty::pretty_format_batches;
use scanbridge_client::{Bridge, request_from_json};
use scanbridge_planner::BaseStatistics;
use scanbridge_storage::{RegisterOptions, TableStatistics, load_table_defs};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let command = match args.first().map(String::as_str) {
        None | Some("--help") | Some("-h") => {
            print_usage();
            return Ok(());
        }
        Some(cmd) => cmd.to_string(),
    };
    let opts = parse_opts(&args[1..])?;
    let bridge = Bridge::from_env()?;
    let view = register_source(&bridge, &opts)?;

    match command.as_str() {
        "scan" => run_scan(&bridge, &view, &opts)?,
        "stats" => run_stats(&bridge, &view)?,
        other => return Err(format!("unknown command: {other}").into()),
    }
    if opts.metrics {
        print!("{}", bridge.prometheus_metrics());
    }
    bridge.close();
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Opts {
    parquet: Option<String>,
    catalog: Option<String>,
    view: Option<String>,
    statistics: Option<String>,
    columns: Vec<String>,
    filters: Option<String>,
    deferred: bool,
    metrics: bool,
}

fn parse_opts(args: &[String]) -> Result<Opts, Box<dyn std::error::Error>> {
    let mut opts = Opts::default();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--parquet" => opts.parquet = Some(take_value(args, &mut i, flag)?),
            "--catalog" => opts.catalog = Some(take_value(args, &mut i, flag)?),
            "--view" => opts.view = Some(take_value(args, &mut i, flag)?),
            "--stats" => opts.statistics = Some(take_value(args, &mut i, flag)?),
            "--columns" => {
                opts.columns = take_value(args, &mut i, flag)?
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "--filters" => opts.filters = Some(take_value(args, &mut i, flag)?),
            "--filters-file" => {
                let path = take_value(args, &mut i, flag)?;
                opts.filters = Some(std::fs::read_to_string(path)?);
            }
            "--deferred" => opts.deferred = true,
            "--metrics" => opts.metrics = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
        i += 1;
    }
    Ok(opts)
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("missing value for {flag}"))
}

/// Registers the source named on the command line and returns its view name.
fn register_source(bridge: &Bridge, opts: &Opts) -> Result<String, Box<dyn std::error::Error>> {
    match (&opts.parquet, &opts.catalog) {
        (Some(path), None) => {
            let view = opts.view.clone().unwrap_or_else(|| "t".to_string());
            let mut options = RegisterOptions::default();
            if opts.deferred {
                options = options.deferred_release(true);
            }
            if let Some(stats_path) = &opts.statistics {
                options = options
                    .statistics(TableStatistics::from_json(&std::fs::read_to_string(stats_path)?)?);
            }
            bridge.register_parquet(&view, path, options)?;
            Ok(view)
        }
        (None, Some(catalog)) => {
            let defs = load_table_defs(catalog)?;
            let first = defs.first().map(|d| d.name.clone());
            for def in defs {
                bridge.register_table_def(def, false)?;
            }
            opts.view
                .clone()
                .or(first)
                .ok_or_else(|| "catalog declares no tables".into())
        }
        _ => Err("exactly one of --parquet or --catalog is required".into()),
    }
}

fn run_scan(bridge: &Bridge, view: &str, opts: &Opts) -> Result<(), Box<dyn std::error::Error>> {
    let schema = bridge.schema(view)?;
    let request = request_from_json(&schema, &opts.columns, opts.filters.as_deref())?;
    let batches = bridge.collect(view, &request)?;
    if batches.is_empty() {
        println!("OK: 0 rows");
    } else {
        println!("{}", pretty_format_batches(&batches)?);
    }
    Ok(())
}

fn run_stats(bridge: &Bridge, view: &str) -> Result<(), Box<dyn std::error::Error>> {
    let factory = bridge.factory(view)?;
    match bridge.cardinality(view)?.estimated_cardinality {
        Some(rows) => println!("{view}: {rows} rows"),
        None => println!("{view}: unknown rows"),
    }
    for (index, (name, ty)) in factory.engine_columns()?.into_iter().enumerate() {
        let pushdown = if factory.supports_pushdown(index) {
            "pushdown"
        } else {
            "no pushdown"
        };
        let stats = factory
            .column_statistics(index)?
            .map(|s| describe(&s))
            .unwrap_or_else(|| "no statistics".to_string());
        println!("  {name} {ty} ({pushdown}): {stats}");
    }
    Ok(())
}

fn describe(stats: &BaseStatistics) -> String {
    let mut parts = Vec::new();
    let nulls = match (stats.can_have_null(), stats.can_have_valid()) {
        (false, _) => "no nulls",
        (true, false) => "all null",
        (true, true) => "nullable",
    };
    parts.push(nulls.to_string());
    if let (Some(min), Some(max)) = (stats.numeric_min(), stats.numeric_max()) {
        parts.push(format!("min={min} max={max}"));
    }
    if let (Some(min), Some(max)) = (stats.string_min(), stats.string_max()) {
        parts.push(format!("min={min:?} max={max:?}"));
    }
    if let Some(len) = stats.max_string_length() {
        parts.push(format!("max_len={len}"));
    }
    if let Some(distinct) = stats.distinct_count() {
        parts.push(format!("distinct={distinct}"));
    }
    parts.join(", ")
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  scanbridge scan (--parquet PATH [--view NAME] [--stats JSON] | --catalog PATH [--view NAME])");
    eprintln!("                  [--columns a,b] [--filters JSON | --filters-file PATH] [--deferred] [--metrics]");
    eprintln!("  scanbridge stats (--parquet PATH [--stats JSON] | --catalog PATH [--view NAME]) [--metrics]");
    eprintln!();
    eprintln!("Filters map column names to filter wire records, e.g.");
    eprintln!(
        "  {{\"id\": {{\"filter_type\": \"constant_comparison\", \"comparison_type\": 28, \"value\": {{\"kind\": \"int64\", \"payload\": 50}}}}}}"
    );
}
