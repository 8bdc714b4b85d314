pub mod client;
pub mod deepseek;
pub mod format;
pub mod prompts;

pub use client::{
    ChatMessage, ChatRole, Completion, GenerationClient, LlmError, PromptRequest,
};
pub use deepseek::ChatCompletionsClient;
pub use prompts::{build_prompt, ModelData, ReportSection, REPORT_SYSTEM_PROMPT};
