pub mod assistant;
pub mod bucket;
pub mod classify;

pub use assistant::{
    Assistant, AssistantConfig, AssistantReply, InvokeError, OpenAiAssistant, RunStatus,
};
pub use bucket::{content_type_for, public_url, BucketError, PublicBucket};
pub use classify::{classify_items, ItemFailure, RunObserver, RunOutcome, WorkItem};
