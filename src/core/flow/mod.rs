//! Graph authoring, validation and execution.

pub mod catalog;
pub mod clock;
pub mod collaborators;
pub mod dispatcher;
pub mod dot;
pub mod effects;
pub mod evaluators;
pub mod expression;
pub mod file_store;
pub mod resume;
pub mod run;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod validate;

pub use catalog::{FileGraphCatalog, GraphCatalog, MemoryGraphCatalog, PublishError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{
    AiDecision, AiProvider, AiRouteResult, CollaboratorError, DeliveryReceipt, EffectDispatcher,
    EffectError, HttpResponse, HttpTransport, MessagingChannel, Ticketing,
};
pub use effects::{idempotency_key, EffectOutcome, EffectPayload, EffectRequest};
pub use file_store::FileRunStore;
pub use resume::ResumeTrigger;
pub use run::{ExecutionRun, RunFailure, RunHistoryEntry, RunStatus, WaitTarget};
pub use scheduler::{FlowEngine, StepOutcome};
pub use schema::{FlowEdge, FlowGraph, FlowNode, NodeKind};
pub use store::{MemoryRunStore, RunStore};
pub use validate::{validate, ValidGraph, ValidationError};
