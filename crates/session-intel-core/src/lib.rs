//! Session Intel Core Library
//!
//! Session logic on top of `session-state`: recap loading, prompt
//! augmentation, context trimming, exit criteria, the summarizer and
//! assistant collaborator boundaries, and the pipeline that wires them.
//!
//! ## Layer 1 - Logic
//!
//! Collaborator failures and storage faults degrade to notices; only
//! configuration errors are fatal.

pub mod assistant;
pub mod augment;
pub mod config;
pub mod error;
pub mod exit_criteria;
pub mod fakes;
pub mod llm;
pub mod obs;
pub mod pipeline;
pub mod prompt_diff;
pub mod reader;
pub mod recap;
pub mod summarizer;
pub mod telemetry;
pub mod trimmer;

pub use assistant::{
    parse_codex_events, Assistant, AssistantReply, CodexCliAssistant, ModelAssistant,
};
pub use augment::{resolve, AugmentationResult, Augmenter, HumanChoice};
pub use config::{ConfigError, IntelConfig};
pub use error::{CollaboratorError, IntelError, Result};
pub use exit_criteria::{ExitCriteria, ExitReason, Transition, ZeroGapPolicy};
pub use llm::{
    call_with_timeout, model_from_config, ChatMessage, LanguageModel, ModelRequest,
    OpenAiChatConfig, OpenAiChatModel, RetryingModel, UnconfiguredModel,
};
pub use pipeline::{
    is_exit_command, set_session_mode, summarize_session, CloseReport, Collaborators,
    SessionPipeline, StartOptions, TurnOutcome, TurnPreview, EXIT_COMMANDS,
};
pub use prompt_diff::diff_prompts;
pub use reader::{ArtifactReader, SessionDetail, SessionDigest};
pub use recap::{load_recap, pick_source_session, Recap, RecapSource};
pub use summarizer::{reconcile_gaps, LlmSummarizer, Summarizer};
pub use telemetry::init_tracing;
pub use trimmer::{trim, TrimPolicy};
