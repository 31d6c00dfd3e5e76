use std::path::PathBuf;
use std::process;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};

use journ::Config;
use journ::model::Severity;
use journ::report::DumpStyle;

mod cmd;

#[derive(Parser)]
#[command(name = "journ")]
#[command(version, about = "Persistent test-execution journal")]
pub struct Cli {
    /// Path to the journal document. Falls back to $JOURNAL_PATH.
    #[arg(long, global = true)]
    pub journal: Option<PathBuf>,

    /// Full test name (e.g. /distribution/bash/sanity). Falls back to $TEST.
    #[arg(long, global = true)]
    pub test_name: Option<String>,

    /// External run identifier. Falls back to $TESTID.
    #[arg(long, global = true)]
    pub test_id: Option<String>,

    /// Package under test. Falls back to $PACKAGE.
    #[arg(long, global = true)]
    pub package: Option<String>,

    /// Directory scanned for *.sh plugin files at init. Falls back to $PLUGIN_DIR.
    #[arg(long, global = true)]
    pub plugin_dir: Option<PathBuf>,

    /// Legacy behavior: attach messages, metrics, and package records to the
    /// log container when no phase is open instead of failing.
    #[arg(long, global = true)]
    pub attach_root: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the journal skeleton if absent; idempotent
    Init,
    /// Open a new phase
    Addphase {
        name: String,
        /// Failure classification recorded as the phase result on failure
        #[arg(long = "type", value_name = "TYPE")]
        kind: String,
    },
    /// Append a log message to the open phase
    Log {
        message: String,
        #[arg(long, default_value = "LOG")]
        severity: Severity,
    },
    /// Record an assertion in the open phase
    Test {
        message: String,
        #[arg(long, default_value = "FAIL")]
        result: String,
        /// Command line whose outcome this assertion records
        #[arg(long)]
        command: Option<String>,
    },
    /// Record a named metric in the open phase
    Metric {
        kind: String,
        name: String,
        value: f64,
        tolerance: f64,
    },
    /// Close the open phase; exit status is its failure count
    Finphase,
    /// Exit status is the run's clamped failure count
    Teststate,
    /// Exit status is the open phase's clamped failure count
    Phasestate,
    /// Record resolved package version(s) in the open phase
    Rpm { package: String },
    /// Print the journal document
    Dump {
        #[arg(value_enum, default_value_t = DumpArg::Pretty)]
        style: DumpArg,
    },
    /// Render the human-readable transcript
    Printlog {
        /// Lowest message severity to include (LOG messages always show)
        #[arg(long, default_value = "WARNING")]
        severity: Severity,
        /// Include the hardware fields in the environment header
        #[arg(long)]
        full: bool,
    },
    /// Compile a metafile into a journal document
    Compile {
        /// Metafile to read; standard input when omitted
        #[arg(long)]
        metafile: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DumpArg {
    Raw,
    Pretty,
}

impl From<DumpArg> for DumpStyle {
    fn from(arg: DumpArg) -> Self {
        match arg {
            DumpArg::Raw => DumpStyle::Raw,
            DumpArg::Pretty => DumpStyle::Pretty,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("journ: error: {:#}", err);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    // Compile can work without a journal path (result goes to stdout);
    // everything else needs one.
    if let Commands::Compile { metafile } = &cli.command {
        let config = journal_path_from(&cli).map(|path| build_config(&cli, path));
        return cmd::cmd_compile(metafile.as_deref(), config.as_ref());
    }

    let path = journal_path_from(&cli)
        .ok_or_else(|| anyhow!("No journal path. Provide --journal or set JOURNAL_PATH"))?;
    let config = build_config(&cli, path);

    match cli.command {
        Commands::Init => cmd::cmd_init(&config),
        Commands::Addphase { name, kind } => cmd::cmd_addphase(&config, &name, &kind),
        Commands::Log { message, severity } => cmd::cmd_log(&config, &message, severity),
        Commands::Test {
            message,
            result,
            command,
        } => cmd::cmd_test(&config, &message, &result, command.as_deref()),
        Commands::Metric {
            kind,
            name,
            value,
            tolerance,
        } => cmd::cmd_metric(&config, &kind, &name, value, tolerance),
        Commands::Finphase => cmd::cmd_finphase(&config),
        Commands::Teststate => cmd::cmd_teststate(&config),
        Commands::Phasestate => cmd::cmd_phasestate(&config),
        Commands::Rpm { package } => cmd::cmd_rpm(&config, &package),
        Commands::Dump { style } => cmd::cmd_dump(&config, style.into()),
        Commands::Printlog { severity, full } => cmd::cmd_printlog(&config, severity, full),
        Commands::Compile { .. } => unreachable!("handled above"),
    }
}

/// Flag-or-environment resolution happens only here, at the CLI edge; the
/// library layer always receives an explicit Config.
fn journal_path_from(cli: &Cli) -> Option<PathBuf> {
    cli.journal
        .clone()
        .or_else(|| std::env::var_os("JOURNAL_PATH").map(PathBuf::from))
}

fn build_config(cli: &Cli, journal_path: PathBuf) -> Config {
    let mut config = Config::new(journal_path);
    config.test_name = cli
        .test_name
        .clone()
        .or_else(|| std::env::var("TEST").ok())
        .filter(|s| !s.is_empty());
    config.test_id = cli
        .test_id
        .clone()
        .or_else(|| std::env::var("TESTID").ok())
        .filter(|s| !s.is_empty());
    config.package = cli
        .package
        .clone()
        .or_else(|| std::env::var("PACKAGE").ok())
        .filter(|s| !s.is_empty());
    config.extra_packages = std::env::var("PACKAGES")
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    config.plugin_dir = cli
        .plugin_dir
        .clone()
        .or_else(|| std::env::var_os("PLUGIN_DIR").map(PathBuf::from));
    config.attach_root = cli.attach_root;
    config
}
