pub mod event;
pub mod logger;
pub mod repository;
pub mod traits;

pub use event::{AuditEvent, AuditEventBuilder, EventOutcome, EventSeverity, EventType};
pub use logger::AuditLogger;
pub use repository::DatabaseAuditRepository;
pub use traits::{AuditBackend, AuditFilter};
