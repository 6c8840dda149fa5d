//! Audit log sink trait.

use crate::error::Result;
use crate::types::{AuditAction, AuditTarget};

/// Records free-text operational messages keyed by actor and target.
/// Writes are not transactional with anything else.
pub trait AuditSink {
    fn record(
        &self,
        actor: &str,
        action: AuditAction,
        target: &AuditTarget,
        message: &str,
    ) -> Result<()>;
}
