//! Resolves a `--provider` flag plus the loaded config into a concrete
//! `Arc<dyn LlmClient>`. Grounded on `skynet-gateway::main`'s "load config,
//! fall back to a sane default, keep going" tone — a provider the CLI was
//! pointed at but that has no config section is a usage error, not a panic.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use keeper_core::config::CompanionConfig;
use keeper_llm::{AnthropicClient, LlmClient, LocalClient, OpenAiCompatClient};

use crate::args::ProviderArg;

pub fn build_client(config: &CompanionConfig, provider: ProviderArg, timeout_secs: u64) -> Result<Arc<dyn LlmClient>> {
    match provider {
        ProviderArg::OpenaiCompat => {
            let cfg = config
                .providers
                .openai_compat
                .as_ref()
                .ok_or_else(|| anyhow!("no [providers.openai_compat] section in config"))?;
            Ok(Arc::new(OpenAiCompatClient::new(
                "openai-compat",
                cfg.base_url.clone(),
                Some(cfg.api_key.clone()),
                timeout_secs,
            )))
        }
        ProviderArg::Proxy => {
            let cfg = config
                .providers
                .proxy
                .as_ref()
                .ok_or_else(|| anyhow!("no [providers.proxy] section in config"))?;
            Ok(Arc::new(OpenAiCompatClient::new(
                "proxy",
                cfg.base_url.clone(),
                Some(cfg.api_key.clone()),
                timeout_secs,
            )))
        }
        ProviderArg::Anthropic => {
            let cfg = config
                .providers
                .anthropic
                .as_ref()
                .ok_or_else(|| anyhow!("no [providers.anthropic] section in config"))?;
            Ok(Arc::new(AnthropicClient::new(
                cfg.api_key.clone(),
                Some(cfg.base_url.clone()),
                timeout_secs,
            )))
        }
        ProviderArg::Local => {
            let base_url = config.providers.local.as_ref().map(|c| c.base_url.clone());
            Ok(Arc::new(LocalClient::new(base_url, timeout_secs)))
        }
    }
}
