use crate::error::Result;
use crate::services::row_store::StoreStatus;
use crate::services::telegram_service::{reminder_message, Messenger};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Nudges users who opened the bot but never submitted the form.
#[derive(Clone)]
pub struct ReminderService {
    store: StoreStatus,
    delay: Option<Duration>,
    pending: Arc<Mutex<HashSet<i64>>>,
}

impl ReminderService {
    pub fn new(store: StoreStatus, delay: Option<Duration>) -> Self {
        Self {
            store,
            delay,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.delay.is_some()
    }

    /// Schedules a single reminder for `user_id`. Returns immediately, and
    /// returns `false` when reminders are off or one is already pending.
    pub fn schedule(
        &self,
        messenger: Arc<dyn Messenger>,
        chat_id: i64,
        user_id: i64,
        form_url: String,
    ) -> bool {
        let Some(delay) = self.delay else {
            return false;
        };
        if !self.pending_set().insert(user_id) {
            return false;
        }
        let svc = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = svc
                .remind_if_pending(messenger.as_ref(), chat_id, user_id, &form_url)
                .await;
            svc.pending_set().remove(&user_id);
            match result {
                Ok(true) => tracing::info!("Reminder sent to user {}", user_id),
                Ok(false) => {}
                Err(e) => tracing::warn!("Reminder for user {} skipped: {}", user_id, e),
            }
        });
        true
    }

    pub fn is_pending(&self, user_id: i64) -> bool {
        self.pending_set().contains(&user_id)
    }

    fn pending_set(&self) -> std::sync::MutexGuard<'_, HashSet<i64>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sends the reminder unless `user_id` already has a row.
    /// Returns whether a message went out.
    pub async fn remind_if_pending(
        &self,
        messenger: &dyn Messenger,
        chat_id: i64,
        user_id: i64,
        form_url: &str,
    ) -> Result<bool> {
        let store = self.store.get()?;
        if store.contains_user_id(&user_id.to_string()).await? {
            return Ok(false);
        }
        messenger
            .send_message(reminder_message(chat_id, form_url))
            .await?;
        Ok(true)
    }
}
