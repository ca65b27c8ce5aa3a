//! `fixloop` command-line entry point.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use fixloop::core::budget::{decide_tier, max_iterations};
use fixloop::core::classifier::classify;
use fixloop::exit_codes;
use fixloop::io::config::load_config;
use fixloop::io::init::{FixloopPaths, InitOptions, init_fixloop};
use fixloop::io::memory_log::{MemoryLog, load_memory};
use fixloop::io::prompt::render_report;
use fixloop::io::verification::{CheckDefinition, CommandVerifier};
use fixloop::logging;
use fixloop::protocol::{
    ProbeError, ProtocolEvent, ProtocolSettings, RunRequest, RunStop, run_protocol,
};
use fixloop::registry::StrategyRegistry;

#[derive(Parser)]
#[command(
    name = "fixloop",
    version,
    about = "Iterative repair controller: verify, classify, fix, repeat"
)]
struct Cli {
    /// Project root containing `.fixloop/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.fixloop/config.toml` with defaults.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the repair loop until the check passes or the budget runs out.
    Run {
        /// What should be fixed, in plain language.
        #[arg(short, long)]
        request: String,
        /// Check command overriding `[check] command`; consumes the rest of the line.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        check: Vec<String>,
        /// Override the complexity-tier iteration budget.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the classification of a request (and optional diagnostic) as JSON.
    Classify {
        #[arg(short, long)]
        request: String,
        /// File holding captured check output.
        #[arg(long)]
        diagnostic_file: Option<PathBuf>,
    },
    /// Inspect or prune execution memory.
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// One line per remembered run, oldest first.
    List,
    /// Past successes similar to `text`, as JSON.
    Similar {
        text: String,
        /// Only entries where this strategy succeeded.
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Keep only the `keep` newest entries.
    Prune {
        #[arg(long)]
        keep: usize,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = FixloopPaths::new(&cli.root);
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Run {
            request,
            check,
            max_iterations,
            json,
        } => cmd_run(&paths, request, check, max_iterations, json),
        Command::Classify {
            request,
            diagnostic_file,
        } => cmd_classify(&paths, &request, diagnostic_file.as_deref()),
        Command::Memory { command } => cmd_memory(&paths, command),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_fixloop(root, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    paths: &FixloopPaths,
    request_text: String,
    check: Vec<String>,
    max_iterations: Option<u32>,
    json: bool,
) -> Result<i32> {
    let mut cfg = load_config(&paths.config_path)?;
    if max_iterations.is_some() {
        cfg.max_iterations = max_iterations;
    }
    if !check.is_empty() {
        cfg.check.command = check;
    }
    cfg.validate().context("validate command-line overrides")?;

    let workdir = paths.resolve(&cfg.working_directory);
    let registry = StrategyRegistry::from_config(&cfg, &workdir)?;
    let settings = ProtocolSettings::from_config(&cfg, paths);
    let memory_log = MemoryLog::new(paths.resolve(&cfg.memory.path));
    let mut memory = load_memory(&memory_log, cfg.memory.capacity)?;
    let verifier = CommandVerifier {
        output_limit_bytes: cfg.output_limit_bytes,
    };
    let request = RunRequest {
        request_text,
        check: CheckDefinition {
            command: cfg.check.command.clone(),
            workdir,
        },
        run_id: None,
    };

    let result = run_protocol(
        &verifier,
        &registry,
        &mut memory,
        &settings,
        &request,
        |event| {
            if let ProtocolEvent::Iteration(record) = event
                && !json
            {
                let status = if record.succeeded { "applied" } else { "no fix" };
                eprintln!("iteration {}: {} ({status})", record.index, record.strategy_id);
            }
        },
    );
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if let Some(probe) = err.downcast_ref::<ProbeError>() {
                eprintln!("{probe}");
                return Ok(exit_codes::INVALID);
            }
            return Err(err);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report)?);
    }
    Ok(match report.stop {
        RunStop::Passed { .. } => exit_codes::OK,
        RunStop::Exhausted { .. } => exit_codes::EXHAUSTED,
        RunStop::Stalled { .. } => exit_codes::STALLED,
    })
}

fn cmd_classify(
    paths: &FixloopPaths,
    request: &str,
    diagnostic_file: Option<&Path>,
) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let diagnostic = match diagnostic_file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => String::new(),
    };
    let workdir = paths.resolve(&cfg.working_directory);
    let registry = StrategyRegistry::from_config(&cfg, &workdir)?;
    let capabilities = registry.capabilities();

    let classification = classify(request, &diagnostic, &capabilities);
    let tier = decide_tier(request, &classify(request, "", &capabilities));
    let payload = json!({
        "classification": classification,
        "tier": tier,
        "max_iterations": max_iterations(tier, cfg.max_iterations),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(exit_codes::OK)
}

fn cmd_memory(paths: &FixloopPaths, command: MemoryCommand) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let log = MemoryLog::new(paths.resolve(&cfg.memory.path));
    let mut memory = load_memory(&log, cfg.memory.capacity)?;

    match command {
        MemoryCommand::List => {
            for entry in memory.entries() {
                println!(
                    "{}\t{}\t{} iteration(s)\t{}\t{}",
                    entry.id,
                    if entry.succeeded { "succeeded" } else { "failed" },
                    entry.total_iterations,
                    entry.timestamp.to_rfc3339(),
                    entry.original_request
                );
            }
        }
        MemoryCommand::Similar { text, strategy } => {
            let similar = memory.find_similar_successes(&text, strategy.as_deref());
            println!("{}", serde_json::to_string_pretty(&similar)?);
        }
        MemoryCommand::Prune { keep } => {
            let evicted = memory.prune_memory(keep);
            if memory.evicted_count() > 0 {
                log.rewrite(memory.entries())?;
            }
            println!("pruned {evicted} entr{}", if evicted == 1 { "y" } else { "ies" });
        }
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["fixloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_trailing_check_command() {
        let cli = Cli::parse_from([
            "fixloop",
            "run",
            "--request",
            "fix the failing unit tests",
            "--max-iterations",
            "4",
            "--check",
            "cargo",
            "test",
            "--quiet",
        ]);
        match cli.command {
            Command::Run {
                request,
                check,
                max_iterations,
                json,
            } => {
                assert_eq!(request, "fix the failing unit tests");
                assert_eq!(check, vec!["cargo", "test", "--quiet"]);
                assert_eq!(max_iterations, Some(4));
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_memory_subcommands() {
        let cli = Cli::parse_from(["fixloop", "memory", "similar", "fix tests", "--strategy", "ui"]);
        assert!(matches!(
            cli.command,
            Command::Memory {
                command: MemoryCommand::Similar { ref strategy, .. }
            } if strategy.as_deref() == Some("ui")
        ));

        let cli = Cli::parse_from(["fixloop", "--root", "/tmp/x", "memory", "prune", "--keep", "3"]);
        assert_eq!(cli.root, PathBuf::from("/tmp/x"));
        assert!(matches!(
            cli.command,
            Command::Memory {
                command: MemoryCommand::Prune { keep: 3 }
            }
        ));
    }

    #[test]
    fn parse_classify_with_diagnostic_file() {
        let cli = Cli::parse_from([
            "fixloop",
            "classify",
            "-r",
            "login fails",
            "--diagnostic-file",
            "out.log",
        ]);
        assert!(matches!(
            cli.command,
            Command::Classify { diagnostic_file: Some(_), .. }
        ));
    }
}
