// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use csv::Writer;
use mortgage_ledger::{
    AllowTable, Amount, Balances, Engine, FileId, JsonLinesSync, LedgerConfig, LedgerStore,
    MortgageInit, MortgageTable, Privilege, SledStore, UserId,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Mortgage Ledger - Operate a local custodial ledger
///
/// Settlements produced by `terminate` and `resync` are written to stdout
/// as JSON lines for a relay to submit on chain.
#[derive(Parser, Debug)]
#[command(name = "mortgage-ledger")]
#[command(about = "An append-only ledger for per-file mortgages", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database directory, overrides the config file
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a file
    ///
    /// Example: init --user alice --file F1 --grant alice=rw --mortgage alice=100
    Init {
        #[arg(long)]
        user: String,
        #[arg(long)]
        file: String,
        /// USER=LEVEL where LEVEL is rw, ro or wo
        #[arg(long = "grant", value_parser = parse_grant)]
        grants: Vec<(UserId, Privilege)>,
        /// USER=AMOUNT, decimal or 0x hex
        #[arg(long = "mortgage", value_parser = parse_mortgage)]
        mortgage: Vec<(UserId, Amount)>,
    },
    /// Create a file from a chain mortgage-init event (JSON)
    Apply {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Read a user's balance
    Read {
        #[arg(long)]
        user: String,
        #[arg(long)]
        file: String,
        /// User whose balance is read, defaults to --user
        #[arg(long)]
        target: Option<String>,
    },
    /// Withdraw from a balance
    Subtract {
        #[arg(long)]
        user: String,
        #[arg(long)]
        file: String,
        #[arg(long)]
        amount: Amount,
    },
    /// Terminate a file and emit its settlement
    Terminate {
        #[arg(long)]
        user: String,
        #[arg(long)]
        file: String,
    },
    /// Re-emit the settlement of a terminated file
    Resync {
        #[arg(long)]
        user: String,
        #[arg(long)]
        file: String,
    },
    /// Write the current balances of a file as CSV
    Balances {
        #[arg(long)]
        file: String,
    },
}

fn parse_pair(raw: &str) -> Result<(&str, &str), String> {
    raw.split_once('=')
        .map(|(user, value)| (user.trim(), value.trim()))
        .filter(|(user, _)| !user.is_empty())
        .ok_or_else(|| format!("expected USER=VALUE, got '{raw}'"))
}

fn parse_grant(raw: &str) -> Result<(UserId, Privilege), String> {
    let (user, level) = parse_pair(raw)?;
    let privilege = level.parse::<Privilege>().map_err(|e| e.to_string())?;
    Ok((UserId::from(user), privilege))
}

fn parse_mortgage(raw: &str) -> Result<(UserId, Amount), String> {
    let (user, amount) = parse_pair(raw)?;
    let amount = amount.parse::<Amount>().map_err(|e| e.to_string())?;
    Ok((UserId::from(user), amount))
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {e:#}");
            process::exit(1);
        }
    };
    init_logging(&config);

    if let Err(e) = run(args.command, &config) {
        error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<LedgerConfig> {
    let mut config = match &args.config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn init_logging(config: &LedgerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    // stdout carries settlements and CSV, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Command, config: &LedgerConfig) -> Result<()> {
    let store = SledStore::open(&config.data_dir)
        .with_context(|| format!("opening ledger at {}", config.data_dir.display()))?;
    let engine = Engine::from_config(store, Arc::new(JsonLinesSync::new(std::io::stdout())), config);

    let outcome = execute(&engine, command);
    engine.store().flush()?;
    outcome
}

fn execute(engine: &Engine<SledStore>, command: Command) -> Result<()> {
    match command {
        Command::Init {
            user,
            file,
            grants,
            mortgage,
        } => {
            let grants: AllowTable = grants.into_iter().collect();
            let mortgage: MortgageTable = mortgage.into_iter().collect();
            engine.init_file(&UserId::from(user), &FileId::from(file), &grants, &mortgage)?;
        }
        Command::Apply { input } => {
            let reader = File::open(&input)
                .with_context(|| format!("opening '{}'", input.display()))?;
            let init: MortgageInit = serde_json::from_reader(BufReader::new(reader))
                .with_context(|| format!("parsing '{}'", input.display()))?;
            engine.apply_mortgage_init(&init)?;
        }
        Command::Read { user, file, target } => {
            let target = target.unwrap_or_else(|| user.clone());
            let balance =
                engine.read_value(&UserId::from(user), &FileId::from(file), &UserId::from(target))?;
            println!("{balance}");
        }
        Command::Subtract { user, file, amount } => {
            let remaining =
                engine.subtract_value(&UserId::from(user), &FileId::from(file), &amount)?;
            println!("{remaining}");
        }
        Command::Terminate { user, file } => {
            engine.terminate(&UserId::from(user), &FileId::from(file))?;
        }
        Command::Resync { user, file } => {
            engine.resync_settlement(&UserId::from(user), &FileId::from(file))?;
        }
        Command::Balances { file } => {
            let file = FileId::from(file);
            if engine.file(&file)?.is_none() {
                return Err(anyhow!("file '{file}' not found"));
            }
            write_balances(&engine.final_balances(&file)?, std::io::stdout())?;
        }
    }
    Ok(())
}

/// One CSV output row.
#[derive(Debug, Serialize)]
struct BalanceRow<'a> {
    user: &'a str,
    balance: String,
}

/// Write balances to a CSV writer
///
/// # CSV Format
///
/// Columns: `user, balance` (decimal)
///
/// ```csv
/// user,balance
/// alice,60
/// bob,0
/// ```
fn write_balances<W: Write>(balances: &Balances, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for (user, balance) in balances {
        wtr.serialize(BalanceRow {
            user: user.as_str(),
            balance: balance.to_string(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}
