use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::submission::{RowColor, SubmissionRow, COLUMN_COUNT};
use crate::services::row_store::RowStore;
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Google Sheets worksheet used as the submissions table.
pub struct SheetsRowStore {
    client: Client,
    key: ServiceAccountKey,
    spreadsheet_id: String,
    sheet_name: String,
    sheet_gid: i64,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsRowStore {
    /// Loads the service-account key, resolves the spreadsheet and proves
    /// the credentials by fetching a first access token.
    pub async fn connect(config: &Config, client: Client) -> Result<Self> {
        let raw = tokio::fs::read_to_string(&config.credentials_file).await?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)?;
        let spreadsheet_id = spreadsheet_id(&config.sheet_url).ok_or_else(|| {
            Error::Config(format!("Cannot find spreadsheet id in {}", config.sheet_url))
        })?;

        let store = Self {
            client,
            key,
            spreadsheet_id,
            sheet_name: config.sheet_name.clone(),
            sheet_gid: config.sheet_gid,
            token: Mutex::new(None),
        };
        store.access_token().await?;
        tracing::info!(
            "Connected to spreadsheet {} (worksheet '{}')",
            store.spreadsheet_id,
            store.sheet_name
        );
        Ok(store)
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let token_uri = self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let assertion = encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?,
        )?;

        let response = self
            .client
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Store(format!("token exchange failed: {} {}", status, body)));
        }
        let token: TokenResponse = response.json().await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            SHEETS_API,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Store(format!("{} failed: {} {}", action, status, body)))
    }
}

#[async_trait]
impl RowStore for SheetsRowStore {
    async fn append_row(&self, row: SubmissionRow) -> Result<Option<u32>> {
        let token = self.access_token().await?;
        let url = format!(
            "{}:append",
            self.values_url(&a1_range(&self.sheet_name, "A:I"))
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [row.into_cells()] }))
            .send()
            .await?;
        let body: AppendResponse = Self::check(response, "append").await?.json().await?;

        Ok(body
            .updates
            .and_then(|u| u.updated_range)
            .and_then(|range| row_index_from_range(&range)))
    }

    async fn contains_user_id(&self, user_id: &str) -> Result<bool> {
        let token = self.access_token().await?;
        let url = self.values_url(&a1_range(&self.sheet_name, "B:B"));
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let body: ValueRange = Self::check(response, "read user ids").await?.json().await?;

        Ok(body.values.iter().any(|row| {
            row.first().is_some_and(|cell| match cell {
                serde_json::Value::String(s) => s == user_id,
                other => other.to_string() == user_id,
            })
        }))
    }

    async fn tag_row(&self, row_index: u32, color: RowColor) -> Result<()> {
        let token = self.access_token().await?;
        let (red, green, blue) = color.as_fractions();
        let request = json!({
            "requests": [{
                "repeatCell": {
                    "range": {
                        "sheetId": self.sheet_gid,
                        "startRowIndex": row_index,
                        "endRowIndex": row_index + 1,
                        "startColumnIndex": 0,
                        "endColumnIndex": COLUMN_COUNT,
                    },
                    "cell": {
                        "userEnteredFormat": {
                            "backgroundColor": { "red": red, "green": green, "blue": blue }
                        }
                    },
                    "fields": "userEnteredFormat.backgroundColor",
                }
            }]
        });
        let url = format!("{}/{}:batchUpdate", SHEETS_API, self.spreadsheet_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        Self::check(response, "tag row").await?;
        Ok(())
    }
}

/// Extracts the id from `https://docs.google.com/spreadsheets/d/<id>/...`.
/// A bare id is returned as is.
pub fn spreadsheet_id(sheet_url: &str) -> Option<String> {
    let Ok(url) = Url::parse(sheet_url) else {
        let bare = sheet_url.trim();
        let looks_like_id = !bare.is_empty()
            && bare
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        return looks_like_id.then(|| bare.to_string());
    };
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == "d")?;
    segments
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

pub fn a1_range(sheet_name: &str, cells: &str) -> String {
    format!("'{}'!{}", sheet_name.replace('\'', "''"), cells)
}

/// Zero-based row index of the first cell in an A1 range such as
/// `'Sheet1'!A5:I5`.
pub fn row_index_from_range(range: &str) -> Option<u32> {
    let cells = range.rsplit_once('!').map_or(range, |(_, cells)| cells);
    let first = cells.split(':').next()?;
    let digits: String = first.chars().skip_while(|c| c.is_ascii_alphabetic()).collect();
    let row: u32 = digits.parse().ok()?;
    row.checked_sub(1)
}
