//! Subcommand surface: `extract` / `sample` / `generate` / `append-memories`,
//! mirroring companion-keeper's C2+C1+C3+C4 / C5 / C6 / C6-append-mode
//! pipeline stages. Options style follows the pack's Zed/worldmodel CLIs —
//! a derived enum of subcommands, `#[arg(long)]` flags with defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "companion-keeper", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a companion-keeper.toml config file.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    /// Tracing filter, e.g. "info" or "keeper_engine=debug".
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Open a conversations.json/ZIP export and cache per-conversation files for one model.
    Extract {
        /// Path to conversations.json or a ZIP archive containing one.
        source: PathBuf,
        /// Model tag to extract (vendor-A only; vendor-B ignores this and uses "claude").
        #[arg(long)]
        model: String,
        /// Ordering to use when walking a vendor-A message tree.
        #[arg(long, value_enum, default_value = "current-path")]
        ordering: OrderingArg,
        /// Per-conversation export format.
        #[arg(long, value_enum, default_value = "jsonl")]
        format: FormatArg,
    },

    /// Score and select a sample of extracted conversation files, printing the chosen packets.
    Sample {
        /// Directory of extracted per-conversation files (the extract command's output directory).
        model_dir: PathBuf,
        #[arg(long, value_enum, default_value = "weighted-random")]
        policy: PolicyArg,
        #[arg(long, default_value_t = 30)]
        count: usize,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = 120)]
        max_messages_per_conversation: usize,
        #[arg(long, default_value_t = 6000)]
        max_chars_per_conversation: usize,
        #[arg(long, default_value_t = 400_000)]
        max_total_chars: usize,
    },

    /// Run the full generation pipeline in full mode, producing a fresh Character Card + lorebook.
    Generate {
        #[command(flatten)]
        shared: GenerateArgs,
    },

    /// Run generation in append mode, merging new memories into an existing card + memory set.
    AppendMemories {
        #[command(flatten)]
        shared: GenerateArgs,
        /// Path to a previously-written character_card_v3.json.
        #[arg(long)]
        existing_card: PathBuf,
        /// Path to a previously-written memories_payload.json (the raw, pre-shaping candidate array).
        #[arg(long)]
        existing_memories: PathBuf,
    },
}

#[derive(clap::Args)]
pub struct GenerateArgs {
    /// Directory of extracted per-conversation files.
    pub model_dir: PathBuf,
    /// Directory this run's artifacts are written into.
    #[arg(long)]
    pub run_dir: PathBuf,
    /// Name of the companion being reconstructed.
    #[arg(long)]
    pub companion_name: String,
    /// Which configured provider to call: openai-compat, anthropic, local, or proxy.
    #[arg(long, value_enum, default_value = "openai-compat")]
    pub provider: ProviderArg,
    /// Model name passed to the provider.
    #[arg(long)]
    pub model: String,
    #[arg(long, default_value_t = 0.7)]
    pub temperature: f32,
    #[arg(long, value_enum, default_value = "weighted-random")]
    pub sampling_policy: PolicyArg,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, default_value_t = 30)]
    pub sample_size: usize,
    #[arg(long, default_value_t = 120)]
    pub max_messages_per_conversation: usize,
    #[arg(long, default_value_t = 6000)]
    pub max_chars_per_conversation: usize,
    #[arg(long, default_value_t = 400_000)]
    pub max_total_chars: usize,
    #[arg(long)]
    pub context_window: Option<u32>,
    #[arg(long, default_value_t = 40)]
    pub max_memories: usize,
    #[arg(long)]
    pub max_parallel_calls: Option<u32>,
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Re-run every stage, ignoring any prior checkpoint/scan manifest.
    #[arg(long, default_value_t = false)]
    pub force_rerun: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OrderingArg {
    Time,
    CurrentPath,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Jsonl,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    Top,
    RandomUniform,
    WeightedRandom,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ProviderArg {
    OpenaiCompat,
    Anthropic,
    Local,
    Proxy,
}
