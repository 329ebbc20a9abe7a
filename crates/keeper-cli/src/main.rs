//! companion-keeper: a CLI that mines AI chat-history exports and
//! reconstructs a portable Character Card + memory lorebook for the
//! companion persona that emerges from them.
//!
//! Subcommands wire together `extract` (C2+C1+C3+C4), `sample` (C5),
//! `generate`, and `append-memories` (C6, two modes). Config resolution
//! follows `skynet-core::config::SkynetConfig::load`'s order: explicit
//! `--config` path, then `COMPANION_KEEPER_CONFIG`, then
//! `~/.companion-keeper/config.toml`.

mod args;
mod commands;
mod provider;

use clap::Parser;

use args::{Cli, Command};
use keeper_core::config::CompanionConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .init();

    let config = CompanionConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        CompanionConfig::default()
    });

    match cli.command {
        Command::Extract { source, model, ordering, format } => {
            commands::extract(source, model, ordering, format, &config)?;
        }
        Command::Sample {
            model_dir,
            policy,
            count,
            seed,
            max_messages_per_conversation,
            max_chars_per_conversation,
            max_total_chars,
        } => {
            commands::sample(
                model_dir,
                policy,
                count,
                seed,
                max_messages_per_conversation,
                max_chars_per_conversation,
                max_total_chars,
            )?;
        }
        Command::Generate { shared } => {
            commands::generate(shared, &config).await?;
        }
        Command::AppendMemories { shared, existing_card, existing_memories } => {
            commands::append_memories(shared, existing_card, existing_memories, &config).await?;
        }
    }

    Ok(())
}
