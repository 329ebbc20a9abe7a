pub mod anthropic;
pub mod cancel;
pub mod local;
pub mod openai;
pub mod provider;
pub mod router;

pub use anthropic::AnthropicClient;
pub use cancel::{Cancel, CancelSource};
pub use local::LocalClient;
pub use openai::OpenAiCompatClient;
pub use provider::{
    CallOptions, ChatConfig, ChatMessage, JsonCompletion, LlmClient, OnRetry, RetryEvent, Role,
};
pub use router::{execute_with_retry, AttemptError};
