use crate::error::{Error, Result};
use crate::models::submission::RowColor;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// What `/submit` does with a submitter whose init data did not verify
/// into an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Record the row under the anonymous placeholders.
    Anonymous,
    /// Refuse the submission with 401.
    Reject,
    /// Fall back to the `userId`/`username` the client sent.
    TrustClient,
}

impl FromStr for AuthPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anonymous" => Ok(AuthPolicy::Anonymous),
            "reject" => Ok(AuthPolicy::Reject),
            "trust_client" => Ok(AuthPolicy::TrustClient),
            other => Err(format!("unknown auth policy '{}'", other)),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct BotConfig {
    pub label: String,
    pub token: String,
    pub color: Option<RowColor>,
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("label", &self.label)
            .field("token", &"<redacted>")
            .field("color", &self.color)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub bots: Vec<BotConfig>,
    pub webapp_url: String,
    pub public_url: Option<String>,
    pub telegram_api_url: String,
    pub webhook_secret: Option<String>,
    pub sheet_url: String,
    pub sheet_name: String,
    pub sheet_gid: i64,
    pub credentials_file: String,
    pub auth_policy: AuthPolicy,
    pub anonymous_user_id: String,
    pub block_duplicates: bool,
    pub reminder_delay_secs: u64,
    pub submit_rps: u32,
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let bots = match vars.optional("BOTS") {
            Some(raw) => parse_bots(&raw)?,
            None => vec![BotConfig {
                label: "main".to_string(),
                token: vars.required("TELEGRAM_BOT_TOKEN")?,
                color: None,
            }],
        };

        Ok(Self {
            server_address: vars.or("SERVER_ADDRESS", "0.0.0.0:8000"),
            bots,
            webapp_url: vars.required("WEBAPP_URL")?,
            public_url: vars
                .optional("PUBLIC_URL")
                .map(|u| u.trim_end_matches('/').to_string()),
            telegram_api_url: vars
                .or("TELEGRAM_API_URL", "https://api.telegram.org")
                .trim_end_matches('/')
                .to_string(),
            webhook_secret: vars.optional("WEBHOOK_SECRET"),
            sheet_url: vars.required("SHEET_URL")?,
            sheet_name: vars.or("SHEET_NAME", "Sheet1"),
            sheet_gid: vars.parse_or("SHEET_GID", 0)?,
            credentials_file: vars.or("GOOGLE_CREDENTIALS_FILE", "credentials.json"),
            auth_policy: vars.parse_or("AUTH_POLICY", AuthPolicy::Anonymous)?,
            anonymous_user_id: vars.or("ANONYMOUS_USER_ID", "anonymous"),
            block_duplicates: vars.parse_or("BLOCK_DUPLICATES", true)?,
            reminder_delay_secs: vars.parse_or("REMINDER_DELAY_SECS", 0)?,
            submit_rps: vars.parse_or("SUBMIT_RPS", 20)?,
            cors_origin: vars.optional("CORS_ORIGIN"),
        })
    }

    pub fn reminder_delay(&self) -> Option<Duration> {
        (self.reminder_delay_secs > 0).then(|| Duration::from_secs(self.reminder_delay_secs))
    }

    pub fn bot(&self, label: &str) -> Option<&BotConfig> {
        self.bots.iter().find(|b| b.label == label)
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| Error::Config(format!("Missing environment variable: {}", name)))
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
            None => Ok(default),
        }
    }
}

/// Parses `label=token[#rrggbb]` entries separated by commas.
pub fn parse_bots(raw: &str) -> Result<Vec<BotConfig>> {
    let mut bots: Vec<BotConfig> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (label, rest) = entry
            .split_once('=')
            .ok_or_else(|| {
                Error::Config(format!(
                    "Invalid bot entry '{}': expected label=token",
                    label_hint(entry)
                ))
            })?;
        let label = label.trim();
        if label.is_empty() {
            return Err(Error::Config("Bot label must not be empty".to_string()));
        }
        let (token, color) = match rest.split_once('#') {
            Some((token, hex)) => {
                let color = hex
                    .parse::<RowColor>()
                    .map_err(|e| Error::Config(format!("Invalid color for bot {}: {}", label, e)))?;
                (token, Some(color))
            }
            None => (rest, None),
        };
        if token.trim().is_empty() {
            return Err(Error::Config(format!("Missing token for bot {}", label)));
        }
        if bots.iter().any(|b| b.label == label) {
            return Err(Error::Config(format!("Duplicate bot label {}", label)));
        }
        bots.push(BotConfig {
            label: label.to_string(),
            token: token.trim().to_string(),
            color,
        });
    }
    if bots.is_empty() {
        return Err(Error::Config("BOTS must list at least one bot".to_string()));
    }
    Ok(bots)
}

// Never echo a token back into logs or errors.
fn label_hint(entry: &str) -> &str {
    entry.split(':').next().unwrap_or_default()
}
