#![allow(dead_code)]

use async_trait::async_trait;
use oms_miniapp_backend::{
    config::Config,
    error::Result,
    models::submission::{RowColor, SubmissionRow, USER_ID_COLUMN},
    services::row_store::{RowStore, StoreStatus},
    utils::telegram_auth::sign,
    AppState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const MAIN_TOKEN: &str = "123:ABC";
pub const CLINIC_TOKEN: &str = "456:DEF";

#[derive(Default)]
pub struct MemoryStore {
    pub rows: Mutex<Vec<SubmissionRow>>,
    pub tags: Mutex<Vec<(u32, RowColor)>>,
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn append_row(&self, row: SubmissionRow) -> Result<Option<u32>> {
        let mut rows = self.rows.lock().unwrap();
        rows.push(row);
        Ok(Some(rows.len() as u32 - 1))
    }

    async fn contains_user_id(&self, user_id: &str) -> Result<bool> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .any(|row| row.clone().into_cells()[USER_ID_COLUMN] == user_id))
    }

    async fn tag_row(&self, row_index: u32, color: RowColor) -> Result<()> {
        self.tags.lock().unwrap().push((row_index, color));
        Ok(())
    }
}

pub fn config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("BOTS", "main=123:ABC,clinic=456:DEF#00ff00"),
        ("WEBAPP_URL", "https://oms-mini-app.example/"),
        (
            "SHEET_URL",
            "https://docs.google.com/spreadsheets/d/test-sheet/edit",
        ),
        ("TELEGRAM_API_URL", "http://127.0.0.1:9"),
        ("SUBMIT_RPS", "1000"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|name| vars.get(name).cloned()).expect("test config")
}

pub fn state_with(overrides: &[(&str, &str)]) -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let state = AppState::new(
        config(overrides),
        StoreStatus::Ready(store.clone()),
        reqwest::Client::new(),
    );
    (state, store)
}

/// Init data as the Telegram client would produce it for `token`.
pub fn init_data(token: &str, user: Option<&str>) -> String {
    let mut fields = vec![
        ("auth_date".to_string(), "1700000000".to_string()),
        ("query_id".to_string(), "AAHdF6IQAAAAAN0XohDhrOrc".to_string()),
    ];
    if let Some(user) = user {
        fields.push(("user".to_string(), user.to_string()));
    }
    let hash = sign(&fields, token);
    let mut parts: Vec<String> = fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();
    parts.push(format!("hash={}", hash));
    parts.join("&")
}
