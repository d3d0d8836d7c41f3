use std::env;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use getopts::Options;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use phenotype_retriever::config::project_root;
use phenotype_retriever::helper_functions::{export_results, file_stem};
use phenotype_retriever::models::Sex;
use phenotype_retriever::plots::render_all;
use phenotype_retriever::{ApiHandler, Choice, Config, Pipeline, Session};

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

/// Program name and option arguments. An empty argument list is tolerated.
fn split_args(args: &[String]) -> (&str, &[String]) {
    match args.split_first() {
        Some((program, rest)) => (program.as_str(), rest),
        None => (PKG_NAME, &[]),
    }
}

fn resolve_output_dir(dir: &Path) -> PathBuf {
    if dir.is_relative() {
        project_root().join(dir)
    } else {
        dir.to_path_buf()
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let (program, rest) = split_args(&args);

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help message");
    opts.optopt("g", "gene", "gene symbol to look up, e.g. Fbxo7", "SYMBOL");
    opts.optopt("t", "term", "phenotype term to analyse", "TERM");
    opts.optopt("c", "config", "JSON configuration file", "FILE");
    opts.optopt("o", "output-dir", "directory for CSV files and plots", "DIR");
    opts.optflag("", "list-cohorts", "print the control cohort keys and stop");
    opts.optflag("", "no-plots", "skip rendering plots");

    let matches = opts
        .parse(rest)
        .map_err(|e| anyhow!("{}", e))?;

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return Ok(());
    }

    info!("Starting {} v{}", PKG_NAME, VERSION);

    let config_path = matches.opt_str("config").map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref()).context("loading configuration")?;
    if let Some(dir) = matches.opt_str("output-dir") {
        config.output_dir = PathBuf::from(dir);
    }
    let output_dir = resolve_output_dir(&config.output_dir);

    let handler = ApiHandler::new(&config).context("building the HTTP client")?;
    let pipeline = Pipeline::new(handler, config);

    let stdin = io::stdin();
    let mut session = Session::new(&pipeline, stdin.lock(), io::stdout())
        .with_gene(matches.opt_str("gene"))
        .with_term(matches.opt_str("term"));

    if matches.opt_present("list-cohorts") {
        let Choice { selection, .. } = session.choose().context("choosing a phenotype")?;
        let criteria = pipeline
            .lookup_criteria(&selection)
            .with_context(|| format!("looking up the control cohort for {}", selection))?;
        println!("Control cohort: {}", criteria);
        return Ok(());
    }

    let (Choice { catalog, term, selection }, analysis) =
        session.analyse().context("choosing and analysing a phenotype")?;

    println!(
        "{} {} ({}): {} record(s)",
        catalog.gene().symbol,
        term,
        selection,
        analysis.dataset.len()
    );
    println!("{}", analysis.summary);
    for sex in Sex::ALL {
        if let Some(diff) = analysis.summary.mean_difference(sex) {
            println!("{} experimental - control mean: {:.3}", sex, diff);
        }
    }
    if analysis.dataset.dropped_rows() > 0 {
        warn!(
            "{} malformed row(s) were left out of the analysis",
            analysis.dataset.dropped_rows()
        );
    }

    let prefix = format!("{}_{}", catalog.gene().symbol, file_stem(&term));
    let paths = export_results(&analysis.dataset, &analysis.summary, &output_dir, &prefix)
        .context("exporting results")?;
    println!("Dataset written to {}", paths.dataset.display());
    println!("Summary written to {}", paths.summary.display());

    if !matches.opt_present("no-plots") {
        let title = format!("{}: {}", catalog.gene().symbol, term);
        let plots = render_all(&analysis.dataset, &analysis.summary, &output_dir, &prefix, &title)
            .map_err(|e| anyhow!("rendering plots: {}", e))?;
        for plot in plots {
            println!("Plot written to {}", plot.display());
        }
    }

    Ok(())
}
