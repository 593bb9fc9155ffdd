// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

mod layout;

use std::path::{Path, PathBuf};

use anyhow::Context;
use cbrelay::{AbiConfig, Receiver, SlotOrder, YamlLoader};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cbrelay-ids")]
#[command(about = "Inspect cbrelay identity tables and dispatch table layouts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a YAML identity table
    Validate {
        /// Identity table YAML file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// List every resolved identity
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the dispatch table layout
    Layout {
        /// Receiver convention (host default if not specified)
        #[arg(long, value_enum)]
        receiver: Option<ReceiverArg>,

        /// Runner slot order (host default if not specified)
        #[arg(long, value_enum)]
        slots: Option<SlotsArg>,

        /// Print all four layouts
        #[arg(long, conflicts_with_all = ["receiver", "slots"])]
        all: bool,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ReceiverArg {
    First,
    Omitted,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum SlotsArg {
    CompletionFirst,
    CallbackFirst,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { input, verbose } => cmd_validate(&input, verbose)?,
        Commands::Layout {
            receiver,
            slots,
            all,
        } => cmd_layout(receiver, slots, all),
    }

    Ok(())
}

fn cmd_validate(input: &Path, verbose: bool) -> anyhow::Result<()> {
    let table = YamlLoader::load_from_file(input)
        .with_context(|| format!("identity table {}", input.display()))?;

    println!(
        "[OK] identity table valid: {} ({} identities)",
        input.display(),
        table.len()
    );

    if verbose {
        for (name, identity) in table.named_entries() {
            println!("  {:>8}  {}", identity.raw(), name);
        }
    }
    Ok(())
}

fn cmd_layout(receiver: Option<ReceiverArg>, slots: Option<SlotsArg>, all: bool) {
    if all {
        for (idx, config) in AbiConfig::ALL.iter().enumerate() {
            if idx > 0 {
                println!();
            }
            print!("{}", layout::describe(*config));
        }
        return;
    }

    let config = resolve_config(receiver, slots);
    log::debug!("layout for {}", config);
    print!("{}", layout::describe(config));
}

fn resolve_config(receiver: Option<ReceiverArg>, slots: Option<SlotsArg>) -> AbiConfig {
    let receiver = match receiver {
        Some(ReceiverArg::First) => Receiver::First,
        Some(ReceiverArg::Omitted) => Receiver::Omitted,
        None => AbiConfig::HOST.receiver,
    };
    let slot_order = match slots {
        Some(SlotsArg::CompletionFirst) => SlotOrder::CompletionFirst,
        Some(SlotsArg::CallbackFirst) => SlotOrder::CallbackFirst,
        None => AbiConfig::HOST.slot_order,
    };
    AbiConfig::new(receiver, slot_order)
}
