use crate::error::{Error, Result};
use crate::models::submission::{RowColor, SubmissionRow};
use async_trait::async_trait;
use std::sync::Arc;

/// Append-only table of submissions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Appends `row` and returns its zero-based sheet row index when the
    /// backend reports one.
    async fn append_row(&self, row: SubmissionRow) -> Result<Option<u32>>;

    /// Whether `user_id` already occupies the user-id column.
    async fn contains_user_id(&self, user_id: &str) -> Result<bool>;

    /// Paints the background of an appended row.
    async fn tag_row(&self, row_index: u32, color: RowColor) -> Result<()>;
}

/// Outcome of connecting the row store at startup.
#[derive(Clone)]
pub enum StoreStatus {
    Ready(Arc<dyn RowStore>),
    Unavailable(String),
}

impl StoreStatus {
    pub fn get(&self) -> Result<&Arc<dyn RowStore>> {
        match self {
            StoreStatus::Ready(store) => Ok(store),
            StoreStatus::Unavailable(reason) => Err(Error::StoreUnavailable(reason.clone())),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, StoreStatus::Ready(_))
    }
}

impl std::fmt::Debug for StoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreStatus::Ready(_) => f.write_str("Ready"),
            StoreStatus::Unavailable(reason) => write!(f, "Unavailable({})", reason),
        }
    }
}
