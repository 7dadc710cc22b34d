//! External services the workflow depends on.
//!
//! Catalog search and order creation are injected as `Arc<dyn ...>` so the
//! engine can be driven by fakes in tests. Every call goes through
//! [`call_with_timeout`].

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Database;
use crate::models::Product;

/// Failure of an external collaborator. Always recoverable by retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyError {
    #[error("{service} timed out after {after_ms}ms")]
    Timeout { service: String, after_ms: u64 },

    #[error("{service} failed: {message}")]
    Failed { service: String, message: String },
}

impl DependencyError {
    pub fn failed(service: &str, message: impl Into<String>) -> Self {
        DependencyError::Failed {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Name of the collaborator that failed.
    pub fn service(&self) -> &str {
        match self {
            DependencyError::Timeout { service, .. } | DependencyError::Failed { service, .. } => {
                service
            }
        }
    }
}

/// Product catalog lookup.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// Candidate products for free text, in the service's relevance order.
    async fn search(&self, text: &str) -> Result<Vec<Product>, DependencyError>;
}

/// Order creation for verified prescriptions.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Create an order and return its id.
    async fn create_from_prescription(&self, prescription_id: &str)
        -> Result<String, DependencyError>;

    /// Undo an order whose prescription could not be committed.
    async fn cancel_order(&self, order_id: &str) -> Result<(), DependencyError>;
}

/// Await `fut`, mapping an elapsed deadline to [`DependencyError::Timeout`].
pub async fn call_with_timeout<T, F>(
    service: &str,
    timeout: Duration,
    fut: F,
) -> Result<T, DependencyError>
where
    F: Future<Output = Result<T, DependencyError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DependencyError::Timeout {
            service: service.to_string(),
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Catalog search over the local SQLite product mirror.
pub struct LocalCatalog {
    db: Arc<Mutex<Database>>,
    limit: usize,
}

impl LocalCatalog {
    pub const SERVICE: &'static str = "local_catalog";

    pub fn new(db: Arc<Mutex<Database>>, limit: usize) -> Self {
        Self { db, limit }
    }
}

#[async_trait]
impl CatalogSearch for LocalCatalog {
    async fn search(&self, text: &str) -> Result<Vec<Product>, DependencyError> {
        let db = self
            .db
            .lock()
            .map_err(|e| DependencyError::failed(Self::SERVICE, format!("lock poisoned: {}", e)))?;
        db.search_products(text, self.limit)
            .map_err(|e| DependencyError::failed(Self::SERVICE, e.to_string()))
    }
}
