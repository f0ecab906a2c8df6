//! Pipeline stages and the runner that drives them

pub mod llm_stage;
pub mod local;
pub mod pii_stage;
pub mod rag_stage;
pub mod worker;

pub use llm_stage::LlmStage;
pub use local::LocalPipeline;
pub use pii_stage::PiiStage;
pub use rag_stage::RagStage;
pub use worker::{Stage, StageRunner};
