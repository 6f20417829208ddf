// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Part of the pullback derivative-registration library.

//! `pullback` command-line driver: run the derivative-registration
//! conformance suite or list the registered signatures.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

use pullback::conformance::{self, demo_registry};
use pullback::Config;

#[derive(Parser, Debug)]
#[command(name = "pullback", author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the nearest Pullback.toml).
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the derivative-registration conformance suite.
    Conformance {
        /// Run only the named case.
        #[arg(long, value_name = "NAME")]
        case: Option<String>,
    },
    /// List signatures registered in the demo registry.
    Signatures {
        /// Output format (human|json).
        #[arg(long, value_name = "FORMAT", default_value = "human")]
        format: String,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let level = match cli.verbose {
        0 => config.log_level()?,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Command::Conformance { case } => run_conformance(&config, case.as_deref()),
        Command::Signatures { format } => print_signatures(&format),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Config::load(path);
    }
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    Ok(Config::discover(&cwd)?
        .map(|(_, config)| config)
        .unwrap_or_default())
}

fn run_conformance(config: &Config, case: Option<&str>) -> Result<()> {
    let registry = demo_registry()?;
    let outcomes = conformance::run_cases(&registry, &config.gradient_options(), case);
    if outcomes.is_empty() {
        let known: Vec<&str> = conformance::cases().iter().map(|c| c.name).collect();
        return Err(anyhow!(
            "unknown case '{}' (expected one of: {})",
            case.unwrap_or_default(),
            known.join(", ")
        ));
    }

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("[PASS] {}", outcome.name),
            Err(msg) => {
                failed += 1;
                println!("[FAIL] {}: {msg}", outcome.name);
            }
        }
    }
    println!("{} passed, {failed} failed", outcomes.len() - failed);
    if failed > 0 {
        return Err(anyhow!("{failed} conformance case(s) failed"));
    }
    Ok(())
}

fn print_signatures(format: &str) -> Result<()> {
    let registry = demo_registry()?;
    let signatures = registry.signatures();
    match format.to_ascii_lowercase().as_str() {
        "human" => {
            for signature in signatures {
                println!("{signature}");
            }
        }
        "json" => {
            let rendered = serde_json::to_string_pretty(&signatures)
                .context("Failed to serialize signatures")?;
            println!("{rendered}");
        }
        other => return Err(anyhow!("unknown format '{other}' (expected human|json)")),
    }
    Ok(())
}
