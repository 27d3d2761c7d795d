use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{RequestHandler, Service};
use crate::repositories::audit::AuditRepository;

/// One operator-relevant event. Delivered fire-and-forget over a bounded
/// queue; a failed or dropped write can never affect the transaction that
/// produced it.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub level: &'static str,
    pub message: String,
    pub user_id: Option<i64>,
    pub context: Option<&'static str>,
}

impl AuditEntry {
    pub fn info(message: impl Into<String>) -> Self {
        AuditEntry {
            level: "INFO",
            message: message.into(),
            user_id: None,
            context: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        AuditEntry {
            level: "ERROR",
            message: message.into(),
            user_id: None,
            context: None,
        }
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn context(mut self, context: &'static str) -> Self {
        self.context = Some(context);
        self
    }
}

pub enum AuditRequest {
    Record { entry: AuditEntry },
}

/// Enqueues without waiting; overflow drops the entry rather than stalling
/// the caller.
pub fn record(channel: &mpsc::Sender<AuditRequest>, entry: AuditEntry) {
    if let Err(e) = channel.try_send(AuditRequest::Record { entry }) {
        log::warn!("Audit queue full, dropping entry: {}", e);
    }
}

#[derive(Clone)]
pub struct AuditRequestHandler {
    repository: AuditRepository,
}

impl AuditRequestHandler {
    pub fn new(repository: AuditRepository) -> Self {
        AuditRequestHandler { repository }
    }
}

#[async_trait]
impl RequestHandler<AuditRequest> for AuditRequestHandler {
    async fn handle_request(&self, request: AuditRequest) {
        match request {
            AuditRequest::Record { entry } => {
                if let Err(e) = self
                    .repository
                    .insert_entry(entry.level, &entry.message, entry.user_id, entry.context)
                    .await
                {
                    log::error!("Could not persist audit entry: {}", e);
                }
            }
        }
    }
}

pub struct AuditService;

impl AuditService {
    pub fn new() -> Self {
        AuditService {}
    }
}

#[async_trait]
impl Service<AuditRequest, AuditRequestHandler> for AuditService {}
