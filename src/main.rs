//! RuleRunner CLI Entry Point
//!
//! Provides command-line interface for workflow execution.
//!
//! # Usage
//!
//! ```bash
//! # Build the workflow's default targets
//! rulerunner
//!
//! # Build a specific file with 8 cores
//! rulerunner -c 8 variants/s1.final.tsv
//!
//! # Dry run mode (print the plan)
//! rulerunner -n
//!
//! # Use another workflow file and override a parameter
//! rulerunner -s pipeline.yaml -C min_depth=20
//!
//! # Delete the workflow's clean paths
//! rulerunner --clean
//! ```

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use rulerunner::error::{Error, EXIT_CONFIG_ERROR, EXIT_SUCCESS};
use rulerunner::execution::{clean, Engine};
use rulerunner::workflow::params::parse_override;
use rulerunner::workflow::parser::load_workflow;
use rulerunner::{APP_NAME, VERSION};

/// Rule-based workflow execution engine
#[derive(Parser, Debug)]
#[command(name = "rulerunner", version, about)]
struct Cli {
    /// Target files to build (default: the workflow's `targets`)
    targets: Vec<String>,

    /// Workflow file
    #[arg(short = 's', long = "workflow", default_value = "workflow.yaml")]
    workflow: PathBuf,

    /// Number of cores jobs may use at once (default: all CPUs)
    #[arg(short = 'c', long)]
    cores: Option<usize>,

    /// Print the execution plan without running anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Seconds to wait for outputs to appear after a job exits
    #[arg(short = 'w', long, default_value_t = 5)]
    latency_wait: u64,

    /// Delete the workflow's `clean` paths instead of running
    #[arg(long)]
    clean: bool,

    /// Change into this directory before doing anything else
    #[arg(short = 'd', long)]
    directory: Option<PathBuf>,

    /// Override a global parameter (KEY=VALUE, repeatable)
    #[arg(short = 'C', long = "config", value_parser = parse_override)]
    config: Vec<(String, String)>,

    /// Re-run every selected job
    #[arg(short = 'F', long)]
    forceall: bool,

    /// Re-run all jobs of a rule (repeatable)
    #[arg(short = 'R', long)]
    forcerun: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Rule-Based Workflow Execution Engine");
    println!();
}

/// Validates and changes into the working directory.
fn setup_working_directory(working_dir: Option<PathBuf>) -> io::Result<()> {
    let Some(dir) = working_dir else {
        let current = env::current_dir()?;
        info!("Working directory: {}", current.display());
        return Ok(());
    };

    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Not a directory: {}", dir.display()),
        ));
    }

    // Change to working directory for relative path resolution
    env::set_current_dir(&dir)?;
    info!("Working directory: {}", env::current_dir()?.display());
    Ok(())
}

/// Main application entry point. Returns the process exit code.
fn run(cli: Cli) -> Result<u8, Error> {
    setup_working_directory(cli.directory)?;

    let workflow = load_workflow(&cli.workflow, &cli.config)?;

    if cli.clean {
        let report = clean(&workflow.clean, cli.dry_run)?;
        info!(
            "{} {} path(s), {} already absent",
            if cli.dry_run { "Would remove" } else { "Removed" },
            report.removed.len(),
            report.absent.len()
        );
        return Ok(EXIT_SUCCESS);
    }

    if cli.dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
    }

    // Create and configure engine
    let mut engine = Engine::new(workflow);
    if let Some(cores) = cli.cores {
        engine.set_cores(cores);
    }
    engine.set_dry_run(cli.dry_run);
    engine.set_latency_wait(Duration::from_secs(cli.latency_wait));
    engine.set_targets(cli.targets);
    engine.set_forceall(cli.forceall);
    engine.set_forcerun(&cli.forcerun)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(engine.run())?;
    report.print_summary();

    Ok(report.exit_code())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    print_banner();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "rulerunner",
            "-s",
            "pipeline.yaml",
            "-c",
            "3",
            "-n",
            "-C",
            "min_depth=20",
            "-C",
            "reference=ref.fa",
            "-R",
            "trim",
            "summary/variants.tsv",
        ])
        .unwrap();

        assert_eq!(cli.workflow, PathBuf::from("pipeline.yaml"));
        assert_eq!(cli.cores, Some(3));
        assert!(cli.dry_run);
        assert_eq!(cli.latency_wait, 5);
        assert_eq!(
            cli.config,
            vec![
                ("min_depth".to_string(), "20".to_string()),
                ("reference".to_string(), "ref.fa".to_string()),
            ]
        );
        assert_eq!(cli.forcerun, vec!["trim"]);
        assert_eq!(cli.targets, vec!["summary/variants.tsv"]);
    }

    #[test]
    fn test_bad_override_rejected() {
        assert!(Cli::try_parse_from(["rulerunner", "-C", "no_equals"]).is_err());
    }

    #[test]
    fn test_missing_workflow_is_config_error() {
        let cli = Cli::try_parse_from(["rulerunner", "-s", "/nonexistent/workflow.yaml"]).unwrap();
        match run(cli) {
            Err(e) => assert_eq!(e.exit_code(), EXIT_CONFIG_ERROR),
            Ok(code) => panic!("Expected error, got exit code {}", code),
        }
    }
}
