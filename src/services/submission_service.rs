use crate::config::{AuthPolicy, BotConfig, Config};
use crate::dto::submission_dto::SubmitFormRequest;
use crate::error::{Error, Result};
use crate::models::submission::{document_cell, SubmissionRow};
use crate::services::row_store::StoreStatus;
use crate::utils::telegram_auth::{self, Verification, NO_USERNAME};
use crate::utils::time;
use std::sync::Arc;
use tokio::sync::Mutex;
use validator::Validate;

/// Who a row is recorded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitter {
    pub user_id: String,
    pub username: String,
    pub authenticated: bool,
}

/// Result of matching init data against the configured bots.
#[derive(Debug, Clone)]
pub struct Authentication {
    pub bot: Option<BotConfig>,
    pub verification: Verification,
}

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub row: SubmissionRow,
    pub submitter: Submitter,
    pub row_index: Option<u32>,
}

#[derive(Clone)]
pub struct SubmissionService {
    store: StoreStatus,
    bots: Arc<Vec<BotConfig>>,
    policy: AuthPolicy,
    anonymous_user_id: String,
    block_duplicates: bool,
    // Held from the duplicate check until the row is appended.
    append_lock: Arc<Mutex<()>>,
}

impl SubmissionService {
    pub fn new(config: &Config, store: StoreStatus) -> Self {
        Self {
            store,
            bots: Arc::new(config.bots.clone()),
            policy: config.auth_policy,
            anonymous_user_id: config.anonymous_user_id.clone(),
            block_duplicates: config.block_duplicates,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Verifies `init_data` with the hinted bot, or with every bot in turn
    /// when the hint names none. The first valid verification wins; if none
    /// verifies, the first failure is reported.
    pub fn authenticate(&self, init_data: &str, bot_hint: Option<&str>) -> Authentication {
        if let Some(bot) = bot_hint.and_then(|label| self.find_bot(label)) {
            return Authentication {
                bot: Some(bot.clone()),
                verification: telegram_auth::verify(init_data, Some(&bot.token)),
            };
        }

        let mut first_failure = None;
        for bot in self.bots.iter() {
            let verification = telegram_auth::verify(init_data, Some(&bot.token));
            if verification.is_valid() {
                return Authentication {
                    bot: Some(bot.clone()),
                    verification,
                };
            }
            first_failure.get_or_insert(verification);
        }

        Authentication {
            bot: None,
            verification: first_failure.unwrap_or_else(|| telegram_auth::verify(init_data, None)),
        }
    }

    /// Applies the configured policy to a verification outcome.
    pub fn resolve_submitter(
        &self,
        verification: &Verification,
        payload: &SubmitFormRequest,
    ) -> Result<Submitter> {
        if let Some(identity) = verification.identity() {
            return Ok(Submitter {
                user_id: identity.id.clone(),
                username: identity.username.clone(),
                authenticated: true,
            });
        }

        match self.policy {
            AuthPolicy::Reject => Err(Error::Unauthorized(match verification {
                Verification::Invalid(reason) => reason.to_string(),
                Verification::Valid(_) => "no user identity".to_string(),
            })),
            AuthPolicy::Anonymous => Ok(self.anonymous()),
            AuthPolicy::TrustClient => match payload.user_id.as_deref() {
                Some(user_id) => Ok(Submitter {
                    user_id: user_id.to_string(),
                    username: payload
                        .username
                        .clone()
                        .filter(|u| !u.trim().is_empty())
                        .unwrap_or_else(|| NO_USERNAME.to_string()),
                    authenticated: false,
                }),
                None => Ok(self.anonymous()),
            },
        }
    }

    pub async fn is_duplicate(&self, user_id: &str) -> Result<bool> {
        self.store.get()?.contains_user_id(user_id).await
    }

    pub async fn submit(&self, payload: SubmitFormRequest) -> Result<SubmissionOutcome> {
        payload.validate()?;
        let store = self.store.get()?;

        let auth = self.authenticate(&payload.init_data, payload.bot.as_deref());
        if let Verification::Invalid(reason) = &auth.verification {
            tracing::warn!("Init data not verified: {}", reason);
        }
        let submitter = self.resolve_submitter(&auth.verification, &payload)?;

        let checks_duplicates =
            self.block_duplicates && submitter.user_id != self.anonymous_user_id;
        let guard = if checks_duplicates {
            Some(self.append_lock.lock().await)
        } else {
            None
        };
        if checks_duplicates && store.contains_user_id(&submitter.user_id).await? {
            tracing::info!("Duplicate submission blocked for user {}", submitter.user_id);
            return Err(Error::Conflict("already_submitted".to_string()));
        }

        let bot_label = auth
            .bot
            .as_ref()
            .map(|b| b.label.clone())
            .or_else(|| payload.bot.clone())
            .unwrap_or_default();
        let row = build_row(
            &submitter,
            &payload,
            &bot_label,
            time::row_timestamp(&time::now()),
        );

        let row_index = store.append_row(row.clone()).await?;
        drop(guard);
        tracing::info!(
            bot = %bot_label,
            authenticated = submitter.authenticated,
            "Submission recorded for user {}",
            submitter.user_id
        );

        let color = auth.bot.as_ref().and_then(|b| b.color);
        if let (Some(index), Some(color)) = (row_index, color) {
            if let Err(e) = store.tag_row(index, color).await {
                tracing::warn!("Failed to tag row {}: {}", index, e);
            }
        }

        Ok(SubmissionOutcome {
            row,
            submitter,
            row_index,
        })
    }

    fn find_bot(&self, label: &str) -> Option<&BotConfig> {
        self.bots.iter().find(|b| b.label == label)
    }

    fn anonymous(&self) -> Submitter {
        Submitter {
            user_id: self.anonymous_user_id.clone(),
            username: NO_USERNAME.to_string(),
            authenticated: false,
        }
    }
}

pub fn build_row(
    submitter: &Submitter,
    payload: &SubmitFormRequest,
    bot_label: &str,
    timestamp: String,
) -> SubmissionRow {
    SubmissionRow {
        timestamp,
        user_id: submitter.user_id.clone(),
        username: submitter.username.clone(),
        gender: payload.gender.clone(),
        name: payload.name.clone(),
        policy_number: payload.polis.clone(),
        document: document_cell(&payload.document_type, &payload.document_number),
        phone: payload.phone.clone(),
        bot_label: bot_label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::submission::RowColor;
    use crate::services::row_store::{MockRowStore, RowStore};
    use crate::utils::telegram_auth::{sign, Rejection};
    use mockall::predicate::eq;
    use tokio_test::{assert_err, assert_ok};

    const MAIN_TOKEN: &str = "123:ABC";
    const CLINIC_TOKEN: &str = "456:DEF";

    fn config(policy: AuthPolicy) -> Config {
        let vars = [
            ("BOTS", "main=123:ABC,clinic=456:DEF#ff0000"),
            ("WEBAPP_URL", "https://oms.example/"),
            ("SHEET_URL", "https://docs.google.com/spreadsheets/d/abc/edit"),
        ];
        let mut config = Config::from_lookup(|name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        })
        .unwrap();
        config.auth_policy = policy;
        config
    }

    fn init_data(token: &str, user: Option<&str>) -> String {
        let mut fields = vec![("auth_date".to_string(), "1700000000".to_string())];
        if let Some(user) = user {
            fields.push(("user".to_string(), user.to_string()));
        }
        let hash = sign(&fields, token);
        let mut raw: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        raw.push(format!("hash={}", hash));
        raw.join("&")
    }

    fn form(init_data: String) -> SubmitFormRequest {
        SubmitFormRequest {
            init_data,
            gender: "Ж".into(),
            name: "Анна Иванова".into(),
            polis: "7700000000000000".into(),
            document_type: "passport".into(),
            document_number: "4510 123456".into(),
            phone: "+79990000000".into(),
            ..Default::default()
        }
    }

    fn service(policy: AuthPolicy, store: MockRowStore) -> SubmissionService {
        SubmissionService::new(&config(policy), StoreStatus::Ready(Arc::new(store)))
    }

    #[test]
    fn authenticate_tries_every_bot() {
        let svc = service(AuthPolicy::Anonymous, MockRowStore::new());
        let raw = init_data(CLINIC_TOKEN, Some(r#"{"id":5}"#));
        let auth = svc.authenticate(&raw, None);
        assert_eq!(auth.bot.unwrap().label, "clinic");
        assert_eq!(auth.verification.identity().unwrap().id, "5");
    }

    #[test]
    fn authenticate_honours_bot_hint() {
        let svc = service(AuthPolicy::Anonymous, MockRowStore::new());
        let raw = init_data(CLINIC_TOKEN, Some(r#"{"id":5}"#));
        let auth = svc.authenticate(&raw, Some("main"));
        assert_eq!(auth.bot.unwrap().label, "main");
        assert_eq!(
            auth.verification,
            Verification::Invalid(Rejection::SignatureMismatch)
        );
    }

    #[test]
    fn authenticate_reports_first_failure() {
        let svc = service(AuthPolicy::Anonymous, MockRowStore::new());
        let auth = svc.authenticate("", Some("unknown"));
        assert!(auth.bot.is_none());
        assert_eq!(
            auth.verification,
            Verification::Invalid(Rejection::MissingSignature)
        );
    }

    #[test]
    fn policies_resolve_unverified_submitters() {
        let mut payload = form(String::new());
        payload.user_id = Some("99".into());
        payload.username = Some("client".into());
        let invalid = Verification::Invalid(Rejection::MissingSignature);

        let anon = service(AuthPolicy::Anonymous, MockRowStore::new())
            .resolve_submitter(&invalid, &payload)
            .unwrap();
        assert_eq!(anon.user_id, "anonymous");
        assert_eq!(anon.username, NO_USERNAME);

        let trusted = service(AuthPolicy::TrustClient, MockRowStore::new())
            .resolve_submitter(&invalid, &payload)
            .unwrap();
        assert_eq!(trusted.user_id, "99");
        assert_eq!(trusted.username, "client");
        assert!(!trusted.authenticated);

        let rejected = service(AuthPolicy::Reject, MockRowStore::new())
            .resolve_submitter(&invalid, &payload);
        assert!(matches!(rejected, Err(Error::Unauthorized(msg)) if msg == "missing signature"));

        let rejected = service(AuthPolicy::Reject, MockRowStore::new())
            .resolve_submitter(&Verification::Valid(None), &payload);
        assert!(matches!(rejected, Err(Error::Unauthorized(_))));
    }

    #[tokio::test]
    async fn verified_submission_is_appended_and_tagged() {
        let mut store = MockRowStore::new();
        store
            .expect_contains_user_id()
            .withf(|user_id: &str| user_id == "42")
            .times(1)
            .returning(|_| Ok(false));
        store
            .expect_append_row()
            .withf(|row| {
                row.user_id == "42"
                    && row.username == "alice"
                    && row.document == "passport 4510 123456"
                    && row.bot_label == "clinic"
                    && row.timestamp.len() == 19
            })
            .times(1)
            .returning(|_| Ok(Some(7)));
        store
            .expect_tag_row()
            .with(
                eq(7),
                eq(RowColor {
                    red: 255,
                    green: 0,
                    blue: 0,
                }),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        let svc = service(AuthPolicy::Reject, store);
        let raw = init_data(CLINIC_TOKEN, Some(r#"{"id":42,"username":"alice"}"#));
        let outcome = assert_ok!(svc.submit(form(raw)).await);
        assert!(outcome.submitter.authenticated);
        assert_eq!(outcome.row_index, Some(7));
    }

    #[tokio::test]
    async fn duplicate_submission_is_blocked() {
        let mut store = MockRowStore::new();
        store.expect_contains_user_id().returning(|_| Ok(true));
        store.expect_append_row().never();

        let svc = service(AuthPolicy::Anonymous, store);
        let raw = init_data(MAIN_TOKEN, Some(r#"{"id":42}"#));
        let err = assert_err!(svc.submit(form(raw)).await);
        assert!(matches!(err, Error::Conflict(_)));
    }

    /// Store whose user-id scan takes a while, like a remote sheet.
    #[derive(Default)]
    struct SlowStore {
        rows: std::sync::Mutex<Vec<SubmissionRow>>,
    }

    #[async_trait::async_trait]
    impl RowStore for SlowStore {
        async fn append_row(&self, row: SubmissionRow) -> Result<Option<u32>> {
            let mut rows = self.rows.lock().unwrap();
            rows.push(row);
            Ok(Some(rows.len() as u32 - 1))
        }

        async fn contains_user_id(&self, user_id: &str) -> Result<bool> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(self.rows.lock().unwrap().iter().any(|r| r.user_id == user_id))
        }

        async fn tag_row(&self, _row_index: u32, _color: RowColor) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_submissions_for_one_user_append_once() {
        let store = Arc::new(SlowStore::default());
        let svc = SubmissionService::new(
            &config(AuthPolicy::Anonymous),
            StoreStatus::Ready(store.clone()),
        );
        let raw = init_data(MAIN_TOKEN, Some(r#"{"id":42}"#));

        let (first, second) = tokio::join!(svc.submit(form(raw.clone())), svc.submit(form(raw)));
        let conflicts = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Err(Error::Conflict(_))))
            .count();
        assert!(first.is_ok() || second.is_ok());
        assert_eq!(conflicts, 1);
        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn anonymous_submissions_skip_duplicate_check() {
        let mut store = MockRowStore::new();
        store.expect_contains_user_id().never();
        store
            .expect_append_row()
            .withf(|row| row.user_id == "anonymous" && row.bot_label.is_empty())
            .times(1)
            .returning(|_| Ok(None));
        store.expect_tag_row().never();

        let svc = service(AuthPolicy::Anonymous, store);
        let outcome = assert_ok!(svc.submit(form("garbage".into())).await);
        assert!(!outcome.submitter.authenticated);
    }

    #[tokio::test]
    async fn tagging_failure_does_not_fail_submission() {
        let mut store = MockRowStore::new();
        store.expect_contains_user_id().returning(|_| Ok(false));
        store.expect_append_row().returning(|_| Ok(Some(3)));
        store
            .expect_tag_row()
            .returning(|_, _| Err(Error::Store("quota".into())));

        let svc = service(AuthPolicy::Anonymous, store);
        let raw = init_data(CLINIC_TOKEN, Some(r#"{"id":1}"#));
        assert_ok!(svc.submit(form(raw)).await);
    }

    #[tokio::test]
    async fn unavailable_store_is_reported() {
        let svc = SubmissionService::new(
            &config(AuthPolicy::Anonymous),
            StoreStatus::Unavailable("credentials.json missing".into()),
        );
        let err = assert_err!(svc.submit(form(String::new())).await);
        assert!(matches!(err, Error::StoreUnavailable(_)));
        let err = assert_err!(svc.is_duplicate("1").await);
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn invalid_form_is_rejected_before_touching_store() {
        let mut store = MockRowStore::new();
        store.expect_append_row().never();
        let svc = service(AuthPolicy::Anonymous, store);
        let mut payload = form(String::new());
        payload.name.clear();
        let err = assert_err!(svc.submit(payload).await);
        assert!(matches!(err, Error::Validation(_)));
    }
}
