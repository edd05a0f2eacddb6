// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_fix::{Config, FixRefusal, FlipsideClient, Session, SUMMARY_FILE_NAME};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

/// Check a wallet ledger and repair flagged rows from on-chain data
#[derive(Parser, Debug)]
#[command(name = "ledger-fix", version)]
#[command(about = "Validate a crypto transaction ledger and repair it from on-chain data")]
struct Cli {
    /// Optional TOML config (chain schema, Flipside endpoint, polling)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Flipside API key
    #[arg(long, env = "FLIPSIDE_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the quality checks and print the report
    Check {
        /// Ledger workbook (.xlsx) or CSV export
        file: PathBuf,
    },

    /// Repair flagged transactions and write the summary CSV
    Fix {
        file: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Summary CSV path
        #[arg(short, long, default_value = SUMMARY_FILE_NAME)]
        output: PathBuf,

        /// Also write the merged, deduplicated ledger
        #[arg(long)]
        merged_output: Option<PathBuf>,
    },

    /// Print the quality report
    Report {
        file: PathBuf,

        /// JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Interactive terminal UI
    Tui { file: PathBuf },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { ref file } => run_check(file),
        Commands::Fix {
            ref file,
            yes,
            ref output,
            ref merged_output,
        } => {
            let config = Config::resolve(cli.config.as_deref(), cli.api_key.clone())?;
            run_fix(file, yes, output, merged_output.as_deref(), &config)
        }
        Commands::Report { ref file, json } => run_report(file, json),
        Commands::Tui { ref file } => {
            let config = Config::resolve(cli.config.as_deref(), cli.api_key.clone())?;
            run_ui_mode(file, config)
        }
    }
}

/// Logs go to stderr so reports on stdout stay clean
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_fix=info".into()),
        )
        .with_writer(io::stderr)
        .init();
}

fn run_check(file: &Path) -> Result<()> {
    println!("🔍 Checking {}", file.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let session = Session::from_path(file)?;
    print!("{}", session.report.render_text());
    println!("\n{}", session.report.summary());

    if session.report.errors_found {
        std::process::exit(1);
    }
    Ok(())
}

fn run_report(file: &Path, json: bool) -> Result<()> {
    let session = Session::from_path(file)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&session.report)?);
    } else {
        print!("{}", session.report.render_text());
    }
    Ok(())
}

fn run_fix(
    file: &Path,
    yes: bool,
    output: &Path,
    merged_output: Option<&Path>,
    config: &Config,
) -> Result<()> {
    println!("🛠️  Ledger Fix - {}", file.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load + check
    println!("\n📂 Loading ledger...");
    let session = Session::from_path(file)?;
    println!("✓ Loaded {} rows", session.report.row_count);
    print!("\n{}", session.report.render_text());

    // 2. Gate
    match session.fix_gate(true) {
        Ok(()) => {}
        Err(refusal @ FixRefusal::BlockingErrors { .. }) => {
            eprintln!("\n❌ Fix refused: {}", refusal);
            std::process::exit(1);
        }
        Err(refusal) => {
            println!("\n✓ {}", refusal);
            return Ok(());
        }
    }

    let hashes = session.report.issues.advisory_hashes();
    if !yes && !confirm(&format!("\nFix {} transaction(s) from on-chain data?", hashes.len()))? {
        println!("Nothing changed.");
        return Ok(());
    }

    // 3. Reconcile
    println!("\n⛓️  Querying on-chain data...");
    let client = FlipsideClient::new(&config.flipside)?;
    let outcome = session.fix(true, &client, &config.chain)?;
    println!("✓ {}", outcome.reconciliation.summary());
    for rejected in &outcome.reconciliation.query.rejected {
        println!("⚠️  Skipped hash {}: {}", rejected.hash, rejected.reason);
    }

    // 4. Write outputs
    let file_out = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    outcome.write_summary_csv(file_out)?;
    println!(
        "\n💾 Summary written to {} ({} rows)",
        output.display(),
        outcome.summary_rows().len()
    );

    if let Some(path) = merged_output {
        let file_out = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        outcome.write_merged_csv(&session.ledger.columns, file_out)?;
        println!(
            "💾 Merged ledger written to {} ({} rows)",
            path.display(),
            outcome.aggregation.merged.rows.len()
        );
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎉 Fix complete!");
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(feature = "tui")]
fn run_ui_mode(file: &Path, config: Config) -> Result<()> {
    println!("🖥️  Loading Ledger Fix UI...\n");

    let session = Session::from_path(file)?;
    println!("✓ Loaded {} rows\n", session.report.row_count);
    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(session, config);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_file: &Path, _config: Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use web UI: cargo run --bin ledger-fix-server --features server");
    std::process::exit(1);
}
