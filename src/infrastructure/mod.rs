pub mod audit;

pub use audit::{group_by_session, AuditEntry, AuditEventKind, AuditLog, AuditReader};
