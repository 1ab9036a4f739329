use clap::{Args, Parser, Subcommand};
use ionofit::config::{ConfigSnapshot, FitConfig};
use ionofit::fit::{Fit, FitResult};
use ionofit::search::StdinPrompt;
use ionofit::source::JsonSource;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ionofit")]
#[command(about = "Volumetric ionospheric model fitting", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit every record in a data file and write a coefficient file.
    Fit(FitArgs),
    /// Print a summary of a previously written coefficient file.
    Summary(SummaryArgs),
}

#[derive(Args, Debug)]
struct FitArgs {
    /// Fit configuration (JSON).
    #[arg(short, long)]
    config: PathBuf,

    /// Input records (JSON).
    #[arg(short, long)]
    data: PathBuf,

    /// Output coefficient file.
    #[arg(short, long)]
    output: PathBuf,

    /// Only fit records starting at or after this Unix time.
    #[arg(long)]
    start: Option<f64>,

    /// Only fit records ending at or before this Unix time.
    #[arg(long)]
    end: Option<f64>,
}

#[derive(Args, Debug)]
struct SummaryArgs {
    /// Coefficient file to summarize.
    #[arg(short, long)]
    input: PathBuf,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Fit(args) => run_fit(args),
        Command::Summary(args) => run_summary(args),
    }
}

fn run_fit(args: FitArgs) -> Result<(), String> {
    let config_text = std::fs::read_to_string(&args.config)
        .map_err(|e| format!("failed to read config {}: {e}", args.config.display()))?;
    let mut config: FitConfig =
        serde_json::from_str(&config_text).map_err(|e| format!("failed to parse config: {e}"))?;

    // Carry the configuration verbatim into the coefficient file so every
    // output is reproducible from its own metadata.
    config.snapshot = ConfigSnapshot {
        name: args
            .config
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: args
            .config
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
        contents: config_text,
    };

    let interactive = config.regularization_method.trim() == "prompt";
    let source = JsonSource::new(&args.data);
    let mut fit = Fit::new(config, source).map_err(|e| format!("invalid configuration: {e}"))?;
    if interactive {
        fit = fit.with_prompt(Box::new(StdinPrompt));
    }

    let result = fit
        .run(args.start, args.end)
        .map_err(|e| format!("fit failed: {e}"))?;
    result
        .save(&args.output)
        .map_err(|e| format!("failed to write {}: {e}", args.output.display()))?;

    let usable = result.chi_sq.iter().filter(|c| c.is_finite()).count();
    println!(
        "fit {} records ({usable} usable) -> {}",
        result.utime.len(),
        args.output.display()
    );
    Ok(())
}

fn run_summary(args: SummaryArgs) -> Result<(), String> {
    let result = FitResult::load(&args.input)
        .map_err(|e| format!("failed to load {}: {e}", args.input.display()))?;
    let usable = result.chi_sq.iter().filter(|c| c.is_finite()).count();
    println!("source:        {}", result.source_filename);
    println!("config:        {}", result.config_snapshot.name);
    println!(
        "records:       {} ({} usable, {} disqualified)",
        result.utime.len(),
        usable,
        result.utime.len() - usable
    );
    println!(
        "basis:         {} functions (maxk {}, maxl {})",
        result.basis.nbasis(),
        result.basis.maxk(),
        result.basis.maxl()
    );
    println!(
        "regularization: {} via {}",
        result.regularization_list.join(", "),
        result.reg_method
    );
    println!("hull vertices: {}", result.hull_vertices.nrows());
    Ok(())
}
