//! Collaborator implementations: in-memory doubles, the CLI outbox and live HTTP.
pub mod http;
pub mod memory;
pub mod outbox;

pub use http::{ReqwestHttpTransport, IDEMPOTENCY_HEADER};
pub use memory::{
    FailureScript, MemoryHttpTransport, MemoryTicketing, RecordingMessaging, ScriptedAi,
    SentMessage, TicketRecord,
};
pub use outbox::{Outbox, OutboxEntry};
