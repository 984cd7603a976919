use crate::storage::ID_UNSET;

/// Scope and urgency of one sync request.
///
/// `feed_id` at `ID_UNSET` with an empty `tag` asks for a full sync; the
/// pipeline applies the same feed-over-tag precedence the query layer uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub feed_id: i64,
    pub tag: String,
    pub force_network: bool,
    pub parallel: bool,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            feed_id: ID_UNSET,
            tag: String::new(),
            force_network: false,
            parallel: false,
        }
    }
}

/// External sync pipeline entry point. Fire-and-forget: implementations
/// queue or spawn the actual work and return immediately.
pub trait SyncTrigger: Send + Sync {
    fn request_sync(&self, request: SyncRequest);
}
