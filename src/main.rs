//! Replisync - Master to Replica Database Mirroring
//!
//! Command-line entry point: loads the configuration, opens the targets and
//! runs one mirror pass.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use replisync::backup::MysqlDump;
use replisync::config::ReplisyncConfig;
use replisync::console::{colorize, Color};
use replisync::error::{Error, Result};
use replisync::executor::{Database, MariaDbConnector};
use replisync::logging::{self, LogSettings};
use replisync::orchestrator::{ConsoleProgress, RunOrchestrator, RunSettings};
use replisync::registry::{Connections, TargetRegistry};
use replisync::sync::ExceptionRules;

/// Replisync - mirror a master database onto its replicas
#[derive(Parser)]
#[command(name = "replisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "replisync.toml")]
    config: PathBuf,

    /// Log level for stderr (trace, debug, info, warn, error); overrides the config
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the master onto every replica (default)
    Run,

    /// Validate configuration file and resolve targets without connecting
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "replisync.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cli.config, cli.log_level).await,
        Commands::Validate => report(run_validate(cli.config)),
        Commands::Init { output, force } => report(run_init(output, force)),
    };

    ExitCode::from(code)
}

/// Map a command result to an exit status, printing the error
fn report(result: Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", colorize(&format!("✗ {}", e), Color::Red));
            e.exit_code()
        }
    }
}

/// Print a fatal error to the console (if enabled) and the error log
fn fatal(error: &Error, console: bool) -> u8 {
    tracing::error!(kind = error.kind(), "{}", error);
    if console {
        eprintln!("{}", colorize(&error.to_string(), Color::Red));
    }
    error.exit_code()
}

/// Run one mirror pass
async fn run(config_path: PathBuf, log_level: Option<String>) -> u8 {
    // Nothing is logged to file until the configuration names the directory
    let config = match ReplisyncConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "{}",
                colorize(
                    &format!("Failed to load configuration from {:?}: {}", config_path, e),
                    Color::Red
                )
            );
            return e.exit_code();
        }
    };
    let console = config.console_output;

    let settings = LogSettings {
        dir: config.log_path.clone(),
        console_level: log_level.unwrap_or_else(|| config.log_level.clone()),
        advanced_log: config.advanced_log,
    };
    if let Err(e) = logging::init(&settings) {
        return fatal(&e, true);
    }

    let prepared = TargetRegistry::from_config(&config)
        .and_then(|registry| Ok((registry, ExceptionRules::from_config(&config.except_values)?)));
    let (registry, rules) = match prepared {
        Ok(p) => p,
        Err(e) => return fatal(&e, console),
    };

    if console {
        println!("{}", colorize("Check configuration success", Color::Green));
    }
    tracing::info!(
        replicas = registry.replicas().len(),
        highload = %config.highload,
        "Configuration loaded"
    );

    let Connections { master, replicas } = match registry.connect(&MariaDbConnector).await {
        Ok(c) => c,
        Err(e) => return fatal(&e, console),
    };

    let progress = ConsoleProgress::new(console, config.advanced_log);
    let settings = RunSettings {
        chunk_size: config.chunk_size(),
        clear_policy: config.clear_policy,
    };
    let dump = config
        .test_dump_path
        .as_ref()
        .filter(|_| config.make_test_dump)
        .map(MysqlDump::new);

    let mut orchestrator = RunOrchestrator::new(settings, &rules, &progress);
    if let Some(dump) = &dump {
        orchestrator = orchestrator.with_backup(dump);
    }

    let result = orchestrator.run(master.as_ref(), replicas).await;
    master.close().await;

    match result {
        Ok(report) => report.exit_code(),
        Err(e) => fatal(&e, console),
    }
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    let config = ReplisyncConfig::from_file(&config_path)?;
    let registry = TargetRegistry::from_config(&config)?;
    let rules = ExceptionRules::from_config(&config.except_values)?;

    println!("{}", colorize("✓ Configuration is valid", Color::Green));
    println!("  Master:         {}", registry.master());
    for replica in registry.replicas() {
        println!("  Replica:        {}", replica);
    }
    println!("  Load Profile:   {} ({} rows per chunk)", config.highload, config.chunk_size());
    println!("  Rule Tables:    {}", rules.len());
    println!("  Clear Policy:   {:?}", config.clear_policy);
    println!("  Log Directory:  {}", config.log_path.display());
    if config.make_test_dump {
        if let Some(path) = &config.test_dump_path {
            println!("  Dump Directory: {}", path.display());
        }
    }
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(Error::Config(format!(
            "{:?} already exists; pass --force to overwrite",
            output
        )));
    }

    std::fs::write(&output, ReplisyncConfig::sample())?;
    println!("Configuration written to {:?}", output);
    Ok(())
}
