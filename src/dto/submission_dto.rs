use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

/// Accepts the client's `userId` as either a JSON number or a string.
fn deserialize_id_flexible<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdOrText {
        Int(i64),
        Text(String),
    }

    Ok(match Option::<IdOrText>::deserialize(deserializer)? {
        Some(IdOrText::Int(i)) => Some(i.to_string()),
        Some(IdOrText::Text(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Form posted by the Mini App.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFormRequest {
    #[serde(default)]
    pub init_data: String,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub bot: Option<String>,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub gender: String,
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub polis: String,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub document_type: String,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub document_number: String,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub phone: String,
    #[serde(default, deserialize_with = "deserialize_id_flexible")]
    pub user_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitFormResponse {
    pub status: String,
    pub authenticated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCheckResponse {
    pub user_id: String,
    pub exists: bool,
}
