use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use dbcommand_core::{Command as DbCommand, CommandResponse, Status, Transaction};
use dbcommand_sqlite::{DEFAULT_META_TABLE, Database, DatabaseConfig, MetaTable};
use rusqlite::OpenFlags;
use tracing::{Level, debug};

/// Encoding of the transaction read by `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum InputFormat {
    Json,
    Yaml,
}

impl InputFormat {
    /// Picks a format from the input file extension, defaulting to JSON.
    fn infer(input: Option<&Path>) -> Self {
        match input
            .and_then(Path::extension)
            .and_then(|ext| ext.to_str())
        {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Self::Yaml
            }
            _ => Self::Json,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "dbcommand")]
#[command(about = "Run transactional command batches against a SQLite database")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute one transaction and print its response as JSON.
    Run(RunArgs),
    /// Print the schema version stored in the meta table.
    Meta(MetaArgs),
    /// Initialize the database and compact it.
    Vacuum(VacuumArgs),
}

#[derive(Debug, Args)]
#[group(id = "target", required = true, multiple = false)]
struct TargetArgs {
    /// SQLite database file, created on first use.
    #[arg(long)]
    db: Option<PathBuf>,
    /// YAML database configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl TargetArgs {
    fn database_config(&self) -> Result<DatabaseConfig, String> {
        match (&self.db, &self.config) {
            (Some(db), _) => Ok(DatabaseConfig::new(db)),
            (None, Some(config)) => DatabaseConfig::load(config)
                .map_err(|e| format!("Failed to load config '{}': {e}", config.display())),
            (None, None) => Err("either --db or --config is required".to_string()),
        }
    }
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Transaction file; `-` or omitted reads stdin.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Transaction encoding (default: from the input extension, else json).
    #[arg(long)]
    format: Option<InputFormat>,
}

#[derive(Debug, Args)]
struct MetaArgs {
    /// SQLite database file.
    #[arg(long)]
    db: PathBuf,
    /// Name of the meta table.
    #[arg(long, default_value = DEFAULT_META_TABLE)]
    meta_table: String,
}

#[derive(Debug, Args)]
struct VacuumArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Version seeded if the database has no meta table yet.
    #[arg(long, default_value_t = 1)]
    version: i32,
    /// Compatible version seeded if the database has no meta table yet.
    #[arg(long, default_value_t = 1)]
    compatible_version: i32,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => run_transaction(args),
        Command::Meta(args) => run_meta(args),
        Command::Vacuum(args) => run_vacuum(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(level)
        .init();
}

fn run_transaction(args: RunArgs) -> Result<(), String> {
    let input = args
        .input
        .as_deref()
        .filter(|path| *path != Path::new("-"));
    let raw = read_input(input)?;
    let format = args.format.unwrap_or_else(|| InputFormat::infer(input));

    let response = match decode_transaction(&raw, format) {
        Ok(transaction) => {
            debug!(commands = transaction.commands.len(), "decoded transaction");
            let mut database = Database::new(args.target.database_config()?)
                .map_err(|e| format!("Invalid database config: {e}"))?;
            database.run_transaction(&transaction)
        }
        Err(err) => {
            eprintln!("error: failed to decode transaction: {err}");
            CommandResponse::with_status(Status::ResponseError)
        }
    };

    print_response(&response)
}

fn run_meta(args: MetaArgs) -> Result<(), String> {
    let conn = rusqlite::Connection::open_with_flags(
        &args.db,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| format!("Failed to open database '{}': {e}", args.db.display()))?;
    let meta = MetaTable::new(&args.meta_table).map_err(|e| e.to_string())?;

    let exists = meta
        .exists(&conn)
        .map_err(|e| format!("Failed to inspect database: {e}"))?;
    if !exists {
        return Err(format!(
            "database '{}' has no meta table '{}'",
            args.db.display(),
            args.meta_table
        ));
    }

    let version = meta
        .version(&conn)
        .map_err(|e| format!("Failed to read version: {e}"))?;
    let compatible_version = meta
        .compatible_version(&conn)
        .map_err(|e| format!("Failed to read compatible version: {e}"))?;
    println!("Meta table: {}", args.meta_table);
    println!("  Version: {version}");
    println!("  Compatible version: {compatible_version}");
    Ok(())
}

fn run_vacuum(args: VacuumArgs) -> Result<(), String> {
    let mut database = Database::new(args.target.database_config()?)
        .map_err(|e| format!("Invalid database config: {e}"))?;
    let transaction = Transaction::new(args.version, args.compatible_version)
        .with_command(DbCommand::initialize())
        .with_command(DbCommand::vacuum());
    let response = database.run_transaction(&transaction);
    print_response(&response)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_input(input: Option<&Path>) -> Result<String, String> {
    match input {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {e}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("Failed to read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

fn decode_transaction(raw: &str, format: InputFormat) -> Result<Transaction, String> {
    match format {
        InputFormat::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
        InputFormat::Yaml => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
    }
}

/// Prints the response and turns a non-Ok status into the exit error.
fn print_response(response: &CommandResponse) -> Result<(), String> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| format!("Failed to encode response: {e}"))?;
    println!("{json}");
    if response.is_ok() {
        Ok(())
    } else {
        Err(format!("transaction failed: {}", response.status))
    }
}
