//! `run_generation`: the global state machine of spec §4.6 — preflight,
//! bounded-parallelism persona observation and memory extraction columns,
//! two serial synthesis passes, and artifact output. Bounded fan-out is
//! the pack's `lightclaw::agent::run` shape (`Semaphore::new(P)` +
//! `acquire_owned().await` + `tokio::spawn`), generalized from a single
//! inbound-message loop to a fixed batch of packets per stage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex as TokioMutex, Semaphore};
use tracing::warn;

use keeper_core::types::{
    CharacterCardDraft, ConversationPacket, LorebookEntry, MemoryCandidate, SamplingPolicy,
    ScanManifest, ScannedFileEntry,
};
use keeper_core::CompanionError;
use keeper_llm::{CallOptions, ChatConfig, ChatMessage, Cancel, LlmClient, OnRetry, RetryEvent, Role as LlmRole};
use keeper_sampler::{PacketBudgets, SeedInputs};

use crate::budget;
use crate::checkpoint::{self, ResumeCheckpoint};
use crate::output::{self, GenerationReport, ProcessingManifest, StageStats};
use crate::progress::{OnProgress, Phase, ProgressTracker};
use crate::prompts::{self, PromptOverrides};
use crate::request::{GenerationOutput, GenerationRequest, Mode, RunStatus};
use crate::scan;
use crate::shaping;

fn sampling_policy_label(policy: SamplingPolicy) -> &'static str {
    match policy {
        SamplingPolicy::Top => "top",
        SamplingPolicy::RandomUniform => "random-uniform",
        SamplingPolicy::WeightedRandom => "weighted-random",
    }
}

/// Wires a `ProgressTracker` into an `OnRetry` callback so every retry the
/// router fires (spec §4.6.6) surfaces as a progress event under the
/// call's own phase, rather than going nowhere.
fn retry_callback(tracker: ProgressTracker, phase: Phase) -> OnRetry {
    Arc::new(move |event: RetryEvent| {
        tracker.call_retried(
            phase,
            format!("retry {}/{} in {}ms: {}", event.attempt, event.max_attempts, event.delay_ms, event.reason),
        );
    })
}

fn prompt_override_digest(overrides: &PromptOverrides) -> String {
    let fields = [
        overrides.persona_observation_system.as_deref().unwrap_or(""),
        overrides.persona_observation_user.as_deref().unwrap_or(""),
        overrides.persona_synthesis_system.as_deref().unwrap_or(""),
        overrides.persona_synthesis_user.as_deref().unwrap_or(""),
        overrides.memory_system.as_deref().unwrap_or(""),
        overrides.memory_user.as_deref().unwrap_or(""),
        overrides.memory_synthesis_system.as_deref().unwrap_or(""),
        overrides.memory_synthesis_user.as_deref().unwrap_or(""),
    ];
    keeper_core::fingerprint::stable_hash_hex(&fields)
}

fn file_stat(path: &str) -> (u64, i64) {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mtime_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            (meta.len(), mtime_ms)
        }
        Err(_) => (0, 0),
    }
}

/// `runGeneration` (spec §4.6.1). `available_files` are the extracted
/// conversation files C4 produced for the requested model; this function
/// scores and selects from them, then drives the engine to completion,
/// cancellation, or a fatal stage failure.
#[allow(clippy::too_many_arguments)]
pub async fn run_generation(
    run_dir: &Path,
    resolved_model_dir: &str,
    available_files: Vec<PathBuf>,
    client: Arc<dyn LlmClient>,
    request: GenerationRequest,
    mode: Mode,
    cancel: Cancel,
    on_progress: Option<OnProgress>,
) -> Result<GenerationOutput, CompanionError> {
    std::fs::create_dir_all(run_dir)?;
    let checkpoint_path = Arc::new(run_dir.join("generation_resume.json"));
    let scan_manifest_path = Arc::new(run_dir.join("scan_manifest.json"));

    let scores = keeper_sampler::score_files(&available_files)?;
    let digest = prompt_override_digest(&request.prompt_overrides);
    let seed = keeper_sampler::resolve_seed(
        request.seed,
        &SeedInputs {
            resolved_model_dir,
            primary_model: &request.model,
            companion_name: &request.companion_name,
            sample_size: request.sample_size,
            sampling_mode: request.sampling_policy,
            messages_per_conversation: request.max_messages_per_conversation,
            chars_per_conversation: request.max_chars_per_conversation,
            total_chars_budget: request.max_total_chars,
            prompt_override_digest: &digest,
        },
    );
    let selected = keeper_sampler::select(request.sampling_policy, scores, request.sample_size, seed);

    let per_chat_tokens = budget::per_chat_budget_tokens(request.context_window);
    let synthesis_tokens = budget::synthesis_budget_tokens(request.context_window);
    let per_chat_chars = budget::budget_chars(per_chat_tokens);
    let synthesis_chars = budget::budget_chars(synthesis_tokens);

    let packet_budgets = PacketBudgets {
        max_messages_per_conversation: request.max_messages_per_conversation,
        max_chars_per_conversation: request.max_chars_per_conversation.min(per_chat_chars),
        max_total_chars: request.max_total_chars,
        model_context_window_chars: budget::budget_chars(budget::usable_context_tokens(request.context_window)),
    };
    let build_outcome = keeper_sampler::build_packets(&selected, &packet_budgets)?;
    let packets = build_outcome.packets;

    let signature = checkpoint::compute_signature(
        resolved_model_dir,
        &request.model,
        &request.companion_name,
        sampling_policy_label(request.sampling_policy),
        seed,
        request.context_window,
        request.max_memories,
        request.max_messages_per_conversation,
        request.max_chars_per_conversation,
        request.max_total_chars,
        request.sample_size,
    );
    let checkpoint = Arc::new(TokioMutex::new(checkpoint::load_or_init(
        &checkpoint_path,
        &signature,
        request.force_rerun,
    )));
    let scan_manifest = Arc::new(TokioMutex::new(scan::load_or_init(
        &scan_manifest_path,
        resolved_model_dir,
        request.force_rerun,
    )));

    let append = mode.is_append();
    let persona_packets: Vec<ConversationPacket> = if append { Vec::new() } else { packets.clone() };
    let memory_packets = packets;

    let existing_memory_count = match &mode {
        Mode::AppendMemories { existing_memories, .. } => existing_memories.len(),
        Mode::Full => 0,
    };
    let have_candidates = !memory_packets.is_empty() || existing_memory_count > 0;

    let total_calls = 1
        + persona_packets.len() as u64
        + if append { 0 } else { 1 }
        + memory_packets.len() as u64
        + if have_candidates { 1 } else { 0 };
    let tracker = ProgressTracker::new(total_calls, on_progress);
    tracker.phase_changed(Phase::Init, "run initialized");

    let companion_name = Arc::new(request.companion_name.clone());
    let model = Arc::new(request.model.clone());
    let overrides = Arc::new(request.prompt_overrides.clone());
    let max_parallel = request.max_parallel_calls.clamp(1, 16);

    if let Some(clamped) = build_outcome.clamped_total_chars {
        tracker.phase_changed(
            Phase::Init,
            format!("max_total_chars clamped to model context window ({clamped} chars)"),
        );
    }

    if cancel.is_cancelled() {
        return cancelled_output(&checkpoint_path, &scan_manifest_path);
    }

    tracker.phase_changed(Phase::Preflight, "pinging provider");
    tracker.call_started(Phase::Preflight, "preflight ping");
    let preflight_config = ChatConfig { model: (*model).clone(), max_tokens: 64, temperature: 0.0 };
    let preflight_messages = vec![ChatMessage { role: LlmRole::User, content: "Reply with OK.".to_string() }];
    let preflight_options = CallOptions {
        cancel: cancel.clone(),
        request_tag: "preflight".to_string(),
        on_retry: Some(retry_callback(tracker.clone(), Phase::Preflight)),
    };
    match client.chat_complete(&preflight_config, &preflight_messages, &preflight_options).await {
        Ok(_) => tracker.call_completed(Phase::Preflight, "preflight ok"),
        Err(CompanionError::Aborted) => return cancelled_output(&checkpoint_path, &scan_manifest_path),
        Err(e) => {
            tracker.call_failed(Phase::Preflight, format!("{e}"));
            return Err(CompanionError::ProviderPreflightFailed(e.to_string()));
        }
    }

    let (persona_attempted, persona_succeeded, mut persona_errors) = if append {
        (0, 0, Vec::new())
    } else {
        run_persona_observation_stage(
            &persona_packets,
            client.clone(),
            checkpoint.clone(),
            checkpoint_path.clone(),
            tracker.clone(),
            cancel.clone(),
            companion_name.clone(),
            model.clone(),
            request.temperature,
            per_chat_tokens,
            per_chat_chars,
            overrides.clone(),
            max_parallel,
        )
        .await
    };

    if cancel.is_cancelled() {
        return cancelled_output(&checkpoint_path, &scan_manifest_path);
    }

    let (memory_attempted, memory_succeeded, mut memory_errors) = run_memory_extraction_stage(
        &memory_packets,
        append,
        client.clone(),
        checkpoint.clone(),
        checkpoint_path.clone(),
        scan_manifest.clone(),
        scan_manifest_path.clone(),
        tracker.clone(),
        cancel.clone(),
        companion_name.clone(),
        model.clone(),
        request.temperature,
        per_chat_tokens,
        per_chat_chars,
        overrides.clone(),
        max_parallel,
    )
    .await;

    if cancel.is_cancelled() {
        return cancelled_output(&checkpoint_path, &scan_manifest_path);
    }

    let (card_draft, persona_payload) = match &mode {
        Mode::AppendMemories { existing_card, .. } => (existing_card.clone(), serde_json::Value::Null),
        Mode::Full => {
            if persona_attempted > 0 && persona_succeeded == 0 {
                return Err(CompanionError::PersonaExtractionFailed(output::summarize_errors(&persona_errors)));
            }
            match run_persona_synthesis(
                &persona_packets,
                &checkpoint,
                &client,
                &companion_name,
                &model,
                request.temperature,
                synthesis_tokens,
                synthesis_chars,
                &overrides,
                &cancel,
                &tracker,
            )
            .await
            {
                Ok((draft, raw)) => (shaping::repair_card_draft(draft), raw),
                Err(CompanionError::Aborted) => return cancelled_output(&checkpoint_path, &scan_manifest_path),
                Err(e) => return Err(e),
            }
        }
    };

    let mut candidates: Vec<MemoryCandidate> = {
        let cp = checkpoint.lock().await;
        memory_packets
            .iter()
            .flat_map(|p| cp.memory_candidates_by_source_file.get(&p.source_file).cloned().unwrap_or_default())
            .collect()
    };
    if let Mode::AppendMemories { existing_memories, .. } = &mode {
        candidates.extend(existing_memories.iter().map(|entry| MemoryCandidate {
            name: entry.name.clone(),
            keys: entry.keys.clone(),
            content: entry.content.clone(),
            category: entry.category,
            priority: entry.priority.saturating_sub(1),
            source_conversation: entry.source_conversation.clone(),
            source_date: entry.source_date.clone(),
        }));
    }

    if memory_attempted > 0 && memory_succeeded == 0 && candidates.is_empty() {
        return Err(CompanionError::MemoryExtractionFailed(output::summarize_errors(&memory_errors)));
    }

    let (shaped_lorebook, memory_payload) = if candidates.is_empty() {
        (Vec::new(), serde_json::Value::Array(Vec::new()))
    } else {
        match run_memory_synthesis(
            candidates,
            request.max_memories,
            &client,
            &companion_name,
            &model,
            request.temperature,
            synthesis_tokens,
            synthesis_chars,
            &overrides,
            &cancel,
            &tracker,
        )
        .await
        {
            Ok((entries, raw)) => (entries, raw),
            Err(CompanionError::Aborted) => return cancelled_output(&checkpoint_path, &scan_manifest_path),
            Err(e) => return Err(e),
        }
    };

    tracker.phase_changed(Phase::Manifest, "writing artifacts");

    let lorebook_name = format!("{}'s memories", companion_name);
    let card_v3 = shaping::build_character_card_v3(&card_draft, &lorebook_name, &shaped_lorebook, Utc::now().timestamp());
    let lorebook_v3 = shaping::build_lorebook_v3(&lorebook_name, &shaped_lorebook);

    let persona_files: Vec<String> = persona_packets.iter().map(|p| p.source_file.clone()).collect();
    let memory_files: Vec<String> = memory_packets.iter().map(|p| p.source_file.clone()).collect();
    let mut processed_files = persona_files.clone();
    for f in &memory_files {
        if !processed_files.contains(f) {
            processed_files.push(f.clone());
        }
    }

    let analysis_transcript = memory_packets
        .iter()
        .chain(persona_packets.iter())
        .map(|p| format!("=== {} ===\n{}\n", p.conversation_id, p.transcript))
        .collect::<Vec<_>>()
        .join("\n");

    output::write_json_atomic(&run_dir.join("character_card_v3.json"), &card_v3)?;
    output::write_json_atomic(&run_dir.join("lorebook_v3.json"), &lorebook_v3)?;
    output::write_json_atomic(&run_dir.join("persona_payload.json"), &persona_payload)?;
    output::write_json_atomic(&run_dir.join("memories_payload.json"), &memory_payload)?;
    output::write_text_atomic(&run_dir.join("analysis_transcript.txt"), &analysis_transcript)?;
    output::write_text_atomic(&run_dir.join("persona_sources.txt"), &persona_files.join("\n"))?;
    output::write_text_atomic(&run_dir.join("memory_sources.txt"), &memory_files.join("\n"))?;

    let manifest = ProcessingManifest {
        source_fingerprint: signature.clone(),
        mode: mode.label().to_string(),
        sampling_policy: sampling_policy_label(request.sampling_policy).to_string(),
        seed,
        persona_files: persona_files.clone(),
        memory_files: memory_files.clone(),
        processed_files: processed_files.clone(),
        artifacts: vec![
            "character_card_v3.json".to_string(),
            "lorebook_v3.json".to_string(),
            "persona_payload.json".to_string(),
            "memories_payload.json".to_string(),
            "analysis_transcript.txt".to_string(),
            "persona_sources.txt".to_string(),
            "memory_sources.txt".to_string(),
        ],
    };
    output::write_json_atomic(&run_dir.join("processing_manifest.json"), &manifest)?;

    let mut errors = Vec::new();
    errors.append(&mut persona_errors);
    errors.append(&mut memory_errors);
    let report = GenerationReport {
        status: "completed".to_string(),
        persona: StageStats { attempted: persona_attempted, succeeded: persona_succeeded, failed: persona_attempted.saturating_sub(persona_succeeded) },
        memory: StageStats { attempted: memory_attempted, succeeded: memory_succeeded, failed: memory_attempted.saturating_sub(memory_succeeded) },
        errors: errors.clone(),
    };
    output::write_json_atomic(&run_dir.join("generation_report.json"), &report)?;

    if append {
        let line = serde_json::json!({
            "timestamp_unix": Utc::now().timestamp(),
            "added_or_merged": shaped_lorebook.len(),
            "processed_files": memory_files,
        })
        .to_string();
        output::append_history_line(&run_dir.join("memory_append_history.jsonl"), &line)?;
    }

    tracker.phase_changed(Phase::Done, "generation complete");

    Ok(GenerationOutput {
        status: RunStatus::Completed,
        card: Some(card_v3),
        lorebook: Some(lorebook_v3),
        processed_files,
        persona_files,
        memory_files,
        checkpoint_path: (*checkpoint_path).clone(),
        scan_manifest_path: (*scan_manifest_path).clone(),
        errors,
    })
}

fn cancelled_output(checkpoint_path: &Path, scan_manifest_path: &Path) -> Result<GenerationOutput, CompanionError> {
    Ok(GenerationOutput {
        status: RunStatus::Cancelled,
        card: None,
        lorebook: None,
        processed_files: Vec::new(),
        persona_files: Vec::new(),
        memory_files: Vec::new(),
        checkpoint_path: checkpoint_path.to_path_buf(),
        scan_manifest_path: scan_manifest_path.to_path_buf(),
        errors: Vec::new(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_persona_observation_stage(
    packets: &[ConversationPacket],
    client: Arc<dyn LlmClient>,
    checkpoint: Arc<TokioMutex<ResumeCheckpoint>>,
    checkpoint_path: Arc<PathBuf>,
    tracker: ProgressTracker,
    cancel: Cancel,
    companion_name: Arc<String>,
    model: Arc<String>,
    temperature: f32,
    max_tokens: u32,
    max_chars: usize,
    overrides: Arc<PromptOverrides>,
    max_parallel: usize,
) -> (usize, usize, Vec<String>) {
    let pending: Vec<ConversationPacket> = {
        let cp = checkpoint.lock().await;
        packets.iter().filter(|p| !cp.has_observation(&p.conversation_id)).cloned().collect()
    };
    let attempted = pending.len();
    if attempted == 0 {
        return (0, 0, Vec::new());
    }

    let semaphore = Arc::new(Semaphore::new(max_parallel));
    let mut handles = Vec::with_capacity(pending.len());
    for packet in pending {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
        let client = client.clone();
        let checkpoint = checkpoint.clone();
        let checkpoint_path = checkpoint_path.clone();
        let tracker = tracker.clone();
        let cancel = cancel.clone();
        let companion_name = companion_name.clone();
        let model = model.clone();
        let overrides = overrides.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            if cancel.is_cancelled() {
                return Err("aborted".to_string());
            }
            tracker.call_started(Phase::PersonaObservation, format!("observing {}", packet.conversation_id));
            let transcript = budget::truncate_chars(&packet.transcript, max_chars);
            let system = prompts::fill_template(
                &prompts::persona_observation_system(&overrides),
                &[("companion_name", companion_name.as_str())],
            );
            let user = prompts::fill_template(
                &prompts::persona_observation_user(&overrides),
                &[
                    ("companion_name", companion_name.as_str()),
                    ("conversation_id", packet.conversation_id.as_str()),
                    ("transcript", transcript.as_str()),
                ],
            );
            let config = ChatConfig { model: (*model).clone(), max_tokens, temperature };
            let messages = vec![
                ChatMessage { role: LlmRole::System, content: system },
                ChatMessage { role: LlmRole::User, content: user },
            ];
            let options = CallOptions {
                cancel: cancel.clone(),
                request_tag: format!("persona:{}", packet.conversation_id),
                on_retry: Some(retry_callback(tracker.clone(), Phase::PersonaObservation)),
            };

            match client.chat_complete_json(&config, &messages, &options).await {
                Ok(completion) => {
                    let snapshot = {
                        let mut cp = checkpoint.lock().await;
                        cp.record_observation(packet.conversation_id.clone(), completion.parsed);
                        cp.clone()
                    };
                    if let Err(e) = checkpoint::save_checkpoint_atomic(&checkpoint_path, &snapshot) {
                        tracker.call_failed(Phase::PersonaObservation, format!("checkpoint write failed: {e}"));
                        return Err(e.to_string());
                    }
                    tracker.call_completed(Phase::PersonaObservation, format!("observed {}", packet.conversation_id));
                    Ok(())
                }
                Err(CompanionError::Aborted) => Err("aborted".to_string()),
                Err(e) => {
                    tracker.call_failed(Phase::PersonaObservation, format!("{}: {e}", packet.conversation_id));
                    Err(e.to_string())
                }
            }
        }));
    }

    let mut succeeded = 0usize;
    let mut errors = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => succeeded += 1,
            Ok(Err(reason)) if reason == "aborted" => {}
            Ok(Err(reason)) => errors.push(reason),
            Err(join_err) => errors.push(join_err.to_string()),
        }
    }
    (attempted, succeeded, errors)
}

#[allow(clippy::too_many_arguments)]
async fn run_memory_extraction_stage(
    packets: &[ConversationPacket],
    append: bool,
    client: Arc<dyn LlmClient>,
    checkpoint: Arc<TokioMutex<ResumeCheckpoint>>,
    checkpoint_path: Arc<PathBuf>,
    scan_manifest: Arc<TokioMutex<ScanManifest>>,
    scan_manifest_path: Arc<PathBuf>,
    tracker: ProgressTracker,
    cancel: Cancel,
    companion_name: Arc<String>,
    model: Arc<String>,
    temperature: f32,
    max_tokens: u32,
    max_chars: usize,
    overrides: Arc<PromptOverrides>,
    max_parallel: usize,
) -> (usize, usize, Vec<String>) {
    let pending: Vec<ConversationPacket> = {
        let cp = checkpoint.lock().await;
        let sm = scan_manifest.lock().await;
        packets
            .iter()
            .filter(|p| {
                let already_checkpointed = cp.has_memory_file(&p.source_file);
                let already_scanned = append && sm.scanned_files.contains_key(&p.source_file);
                !already_checkpointed && !already_scanned
            })
            .cloned()
            .collect()
    };
    let attempted = pending.len();
    if attempted == 0 {
        return (0, 0, Vec::new());
    }

    let semaphore = Arc::new(Semaphore::new(max_parallel));
    let mut handles = Vec::with_capacity(pending.len());
    for packet in pending {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
        let client = client.clone();
        let checkpoint = checkpoint.clone();
        let checkpoint_path = checkpoint_path.clone();
        let scan_manifest = scan_manifest.clone();
        let scan_manifest_path = scan_manifest_path.clone();
        let tracker = tracker.clone();
        let cancel = cancel.clone();
        let companion_name = companion_name.clone();
        let model = model.clone();
        let overrides = overrides.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            if cancel.is_cancelled() {
                return Err("aborted".to_string());
            }
            tracker.call_started(Phase::MemoryExtraction, format!("extracting {}", packet.conversation_id));
            let transcript = budget::truncate_chars(&packet.transcript, max_chars);
            let system = prompts::fill_template(
                &prompts::memory_system(&overrides),
                &[("companion_name", companion_name.as_str())],
            );
            let user = prompts::fill_template(
                &prompts::memory_user(&overrides),
                &[
                    ("companion_name", companion_name.as_str()),
                    ("conversation_id", packet.conversation_id.as_str()),
                    ("transcript", transcript.as_str()),
                ],
            );
            let config = ChatConfig { model: (*model).clone(), max_tokens, temperature };
            let messages = vec![
                ChatMessage { role: LlmRole::System, content: system },
                ChatMessage { role: LlmRole::User, content: user },
            ];
            let options = CallOptions {
                cancel: cancel.clone(),
                request_tag: format!("memory:{}", packet.conversation_id),
                on_retry: Some(retry_callback(tracker.clone(), Phase::MemoryExtraction)),
            };

            match client.chat_complete_json(&config, &messages, &options).await {
                Ok(completion) => {
                    let items = completion.parsed.as_array().cloned().unwrap_or_default();
                    let mut candidates = Vec::with_capacity(items.len());
                    for item in items {
                        match serde_json::from_value::<MemoryCandidate>(item) {
                            Ok(mut candidate) => {
                                candidate.source_conversation = Some(packet.conversation_id.clone());
                                candidates.push(candidate);
                            }
                            Err(e) => warn!(conversation = %packet.conversation_id, err = %e, "skipping malformed memory candidate"),
                        }
                    }

                    let (checkpoint_snapshot, scan_snapshot) = {
                        let mut cp = checkpoint.lock().await;
                        cp.record_memory_file(packet.source_file.clone(), candidates);
                        let cp_snapshot = cp.clone();
                        drop(cp);

                        let mut sm = scan_manifest.lock().await;
                        let (file_size, file_mtime_ms) = file_stat(&packet.source_file);
                        sm.scanned_files.insert(
                            packet.source_file.clone(),
                            ScannedFileEntry { file_size, file_mtime_ms, scanned_at_utc: Utc::now() },
                        );
                        sm.updated_at_utc = Utc::now();
                        (cp_snapshot, sm.clone())
                    };

                    if let Err(e) = checkpoint::save_checkpoint_atomic(&checkpoint_path, &checkpoint_snapshot) {
                        tracker.call_failed(Phase::MemoryExtraction, format!("checkpoint write failed: {e}"));
                        return Err(e.to_string());
                    }
                    if let Err(e) = scan::save_atomic(&scan_manifest_path, &scan_snapshot) {
                        tracker.call_failed(Phase::MemoryExtraction, format!("scan manifest write failed: {e}"));
                        return Err(e.to_string());
                    }

                    tracker.call_completed(Phase::MemoryExtraction, format!("extracted {}", packet.conversation_id));
                    Ok(())
                }
                Err(CompanionError::Aborted) => Err("aborted".to_string()),
                Err(e) => {
                    tracker.call_failed(Phase::MemoryExtraction, format!("{}: {e}", packet.conversation_id));
                    Err(e.to_string())
                }
            }
        }));
    }

    let mut succeeded = 0usize;
    let mut errors = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => succeeded += 1,
            Ok(Err(reason)) if reason == "aborted" => {}
            Ok(Err(reason)) => errors.push(reason),
            Err(join_err) => errors.push(join_err.to_string()),
        }
    }
    (attempted, succeeded, errors)
}

#[allow(clippy::too_many_arguments)]
async fn run_persona_synthesis(
    persona_packets: &[ConversationPacket],
    checkpoint: &Arc<TokioMutex<ResumeCheckpoint>>,
    client: &Arc<dyn LlmClient>,
    companion_name: &str,
    model: &str,
    temperature: f32,
    synthesis_tokens: u32,
    synthesis_chars: usize,
    overrides: &PromptOverrides,
    cancel: &Cancel,
    tracker: &ProgressTracker,
) -> Result<(CharacterCardDraft, serde_json::Value), CompanionError> {
    let observations: Vec<serde_json::Value> = {
        let cp = checkpoint.lock().await;
        persona_packets
            .iter()
            .filter_map(|p| cp.persona_observations_by_conversation.get(&p.conversation_id).cloned())
            .collect()
    };
    if observations.is_empty() {
        return Err(CompanionError::PersonaExtractionFailed("no persona observations succeeded".to_string()));
    }

    tracker.call_started(Phase::PersonaSynthesis, "synthesizing persona");
    let packets_json = serde_json::to_string(&observations)?;
    let packets_json = budget::truncate_chars(&packets_json, synthesis_chars);

    let system = prompts::fill_template(&prompts::persona_synthesis_system(overrides), &[("companion_name", companion_name)]);
    let user = prompts::fill_template(
        &prompts::persona_synthesis_user(overrides),
        &[("companion_name", companion_name), ("observation_packets", &packets_json)],
    );
    let config = ChatConfig { model: model.to_string(), max_tokens: synthesis_tokens, temperature };
    let messages = vec![
        ChatMessage { role: LlmRole::System, content: system },
        ChatMessage { role: LlmRole::User, content: user },
    ];
    let options = CallOptions {
        cancel: cancel.clone(),
        request_tag: "persona-synthesis".to_string(),
        on_retry: Some(retry_callback(tracker.clone(), Phase::PersonaSynthesis)),
    };

    match client.chat_complete_json(&config, &messages, &options).await {
        Ok(completion) => {
            let draft: CharacterCardDraft = serde_json::from_value(completion.parsed.clone()).map_err(|e| {
                CompanionError::SynthesisFailed(format!("persona synthesis payload did not match card shape: {e}"))
            })?;
            tracker.call_completed(Phase::PersonaSynthesis, "persona synthesized");
            Ok((draft, completion.parsed))
        }
        Err(CompanionError::Aborted) => Err(CompanionError::Aborted),
        Err(e) => {
            tracker.call_failed(Phase::PersonaSynthesis, format!("{e}"));
            Err(CompanionError::SynthesisFailed(e.to_string()))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_memory_synthesis(
    candidates: Vec<MemoryCandidate>,
    max_memories: usize,
    client: &Arc<dyn LlmClient>,
    companion_name: &str,
    model: &str,
    temperature: f32,
    synthesis_tokens: u32,
    synthesis_chars: usize,
    overrides: &PromptOverrides,
    cancel: &Cancel,
    tracker: &ProgressTracker,
) -> Result<(Vec<LorebookEntry>, serde_json::Value), CompanionError> {
    let compacted = keeper_memory::compact_candidates(candidates);
    if compacted.is_empty() {
        return Err(CompanionError::MemoryExtractionFailed("no memory candidates to synthesize".to_string()));
    }

    tracker.call_started(Phase::MemorySynthesis, "synthesizing memories");
    let candidates_json = serde_json::to_string(&compacted)?;
    let candidates_json = budget::truncate_chars(&candidates_json, synthesis_chars);
    let max_memories_str = max_memories.to_string();

    let system = prompts::fill_template(
        &prompts::memory_synthesis_system(overrides),
        &[("companion_name", companion_name), ("max_memories", &max_memories_str)],
    );
    let user = prompts::fill_template(
        &prompts::memory_synthesis_user(overrides),
        &[("candidate_memories", &candidates_json), ("max_memories", &max_memories_str)],
    );
    let config = ChatConfig { model: model.to_string(), max_tokens: synthesis_tokens, temperature };
    let messages = vec![
        ChatMessage { role: LlmRole::System, content: system },
        ChatMessage { role: LlmRole::User, content: user },
    ];
    let options = CallOptions {
        cancel: cancel.clone(),
        request_tag: "memory-synthesis".to_string(),
        on_retry: Some(retry_callback(tracker.clone(), Phase::MemorySynthesis)),
    };

    match client.chat_complete_json(&config, &messages, &options).await {
        Ok(completion) => {
            let items = completion.parsed.as_array().cloned().unwrap_or_default();
            let mut merged: Vec<MemoryCandidate> = Vec::with_capacity(items.len());
            for item in items {
                match serde_json::from_value::<MemoryCandidate>(item) {
                    Ok(candidate) => merged.push(candidate),
                    Err(e) => warn!(err = %e, "skipping malformed synthesized memory"),
                }
            }
            if merged.is_empty() {
                merged = compacted;
            }
            let recompacted = keeper_memory::compact_candidates(merged);
            let shaped = keeper_memory::shape_lorebook(recompacted, max_memories);
            tracker.call_completed(Phase::MemorySynthesis, "memories synthesized");
            Ok((shaped, completion.parsed))
        }
        Err(CompanionError::Aborted) => Err(CompanionError::Aborted),
        Err(e) => {
            tracker.call_failed(Phase::MemorySynthesis, format!("{e}"));
            Err(CompanionError::SynthesisFailed(e.to_string()))
        }
    }
}
