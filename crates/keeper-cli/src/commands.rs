//! Subcommand bodies. Each function owns one pipeline stage end to end:
//! load inputs, call the matching crate, report results to stdout/stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use keeper_core::config::CompanionConfig;
use keeper_core::types::{
    CharacterCardDraft, LorebookEntry, SamplingPolicy, VendorAOrdering,
};
use keeper_engine::{GenerationRequest, Mode, PromptOverrides};
use keeper_ingest::export::ExportFormat;
use keeper_llm::CancelSource;

use crate::args::{FormatArg, GenerateArgs, OrderingArg, PolicyArg};
use crate::provider;

pub fn extract(source: PathBuf, model: String, ordering: OrderingArg, format: FormatArg, config: &CompanionConfig) -> Result<()> {
    let cache_root = Path::new(&config.paths.cache_dir);
    let ordering = match ordering {
        OrderingArg::Time => VendorAOrdering::Time,
        OrderingArg::CurrentPath => VendorAOrdering::CurrentPath,
    };
    let format = match format {
        FormatArg::Jsonl => ExportFormat::Jsonl,
        FormatArg::Json => ExportFormat::Json,
    };

    let outcome = keeper_cache::ensure(cache_root, &source, &model, ordering, format)?;
    info!(
        fingerprint = %outcome.fingerprint,
        reused = outcome.reused_extraction,
        files = outcome.files.len(),
        "extraction ready"
    );
    println!(
        "{}",
        serde_json::json!({
            "fingerprint": outcome.fingerprint,
            "reused_extraction": outcome.reused_extraction,
            "model_dir": cache_root.join(&outcome.fingerprint).join("model_exports").join(&model),
            "file_count": outcome.files.len(),
            "conversation_counts": outcome.conversation_counts,
        })
    );
    Ok(())
}

pub fn sample(
    model_dir: PathBuf,
    policy: PolicyArg,
    count: usize,
    seed: Option<u64>,
    max_messages_per_conversation: usize,
    max_chars_per_conversation: usize,
    max_total_chars: usize,
) -> Result<()> {
    let files = list_files(&model_dir)?;
    let policy = to_sampling_policy(policy);
    let scores = keeper_sampler::score_files(&files)?;
    let resolved_seed = keeper_sampler::resolve_seed(
        seed,
        &keeper_sampler::SeedInputs {
            resolved_model_dir: &model_dir.display().to_string(),
            primary_model: "sample",
            companion_name: "sample",
            sample_size: count,
            sampling_mode: policy,
            messages_per_conversation: max_messages_per_conversation,
            chars_per_conversation: max_chars_per_conversation,
            total_chars_budget: max_total_chars,
            prompt_override_digest: "",
        },
    );
    let selected = keeper_sampler::select(policy, scores, count, resolved_seed);
    let budgets = keeper_sampler::PacketBudgets {
        max_messages_per_conversation,
        max_chars_per_conversation,
        max_total_chars,
        model_context_window_chars: max_total_chars,
    };
    let outcome = keeper_sampler::build_packets(&selected, &budgets)?;

    println!(
        "{}",
        serde_json::json!({
            "seed": resolved_seed,
            "selected": outcome.packets.len(),
            "clamped_total_chars": outcome.clamped_total_chars,
            "packets": outcome.packets.iter().map(|p| serde_json::json!({
                "conversation_id": p.conversation_id,
                "source_file": p.source_file,
                "messages_used": p.messages_used,
                "char_count": p.char_count,
                "token_estimate": p.token_estimate,
            })).collect::<Vec<_>>(),
        })
    );
    Ok(())
}

pub async fn generate(args: GenerateArgs, config: &CompanionConfig) -> Result<()> {
    run(args, Mode::Full, config).await
}

pub async fn append_memories(
    args: GenerateArgs,
    existing_card: PathBuf,
    existing_memories: PathBuf,
    config: &CompanionConfig,
) -> Result<()> {
    let card_json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&existing_card).with_context(|| format!("reading {}", existing_card.display()))?,
    )?;
    let data = card_json
        .get("data")
        .ok_or_else(|| anyhow::anyhow!("{} has no top-level \"data\" object", existing_card.display()))?;
    let draft: CharacterCardDraft = serde_json::from_value(data.clone())
        .with_context(|| format!("{} does not match the expected card shape", existing_card.display()))?;

    let memories_json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&existing_memories)
            .with_context(|| format!("reading {}", existing_memories.display()))?,
    )?;
    let items = memories_json
        .as_array()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} is not a JSON array", existing_memories.display()))?;
    let entries: Vec<LorebookEntry> = items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<_, _>>()
        .with_context(|| format!("{} does not match the expected memory shape", existing_memories.display()))?;

    let mode = Mode::AppendMemories { existing_card: draft, existing_memories: entries };
    run(args, mode, config).await
}

async fn run(args: GenerateArgs, mode: Mode, config: &CompanionConfig) -> Result<()> {
    let files = list_files(&args.model_dir)?;
    let context_window = args.context_window.unwrap_or(config.budgets.context_window);
    let max_parallel_calls = args.max_parallel_calls.unwrap_or(config.budgets.max_parallel_calls) as usize;
    let timeout_secs = args.timeout_secs.unwrap_or(config.budgets.timeout_secs);

    let client = provider::build_client(config, args.provider, timeout_secs)?;

    let request = GenerationRequest {
        companion_name: args.companion_name.clone(),
        model: args.model.clone(),
        temperature: args.temperature,
        sampling_policy: to_sampling_policy(args.sampling_policy),
        seed: args.seed,
        sample_size: args.sample_size,
        max_messages_per_conversation: args.max_messages_per_conversation,
        max_chars_per_conversation: args.max_chars_per_conversation,
        max_total_chars: args.max_total_chars,
        context_window,
        max_memories: args.max_memories,
        max_parallel_calls,
        timeout_secs,
        prompt_overrides: PromptOverrides::default(),
        force_rerun: args.force_rerun,
    };

    let (_cancel_source, cancel) = CancelSource::new();
    let on_progress: keeper_engine::OnProgress = Arc::new(|event| {
        info!(
            phase = ?event.phase,
            started = event.started_calls,
            completed = event.completed_calls,
            failed = event.failed_calls,
            total = event.total_calls,
            "{}",
            event.message
        );
    });

    let resolved_model_dir = args.model_dir.display().to_string();
    let output = keeper_engine::run_generation(
        &args.run_dir,
        &resolved_model_dir,
        files,
        client,
        request,
        mode,
        cancel,
        Some(on_progress),
    )
    .await?;

    println!(
        "{}",
        serde_json::json!({
            "status": output.status,
            "processed_files": output.processed_files.len(),
            "persona_files": output.persona_files.len(),
            "memory_files": output.memory_files.len(),
            "errors": output.errors,
            "run_dir": args.run_dir,
        })
    );
    Ok(())
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn to_sampling_policy(policy: PolicyArg) -> SamplingPolicy {
    match policy {
        PolicyArg::Top => SamplingPolicy::Top,
        PolicyArg::RandomUniform => SamplingPolicy::RandomUniform,
        PolicyArg::WeightedRandom => SamplingPolicy::WeightedRandom,
    }
}
