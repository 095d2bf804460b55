use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Debug)]
pub struct SubmitResponse {
    pub id: String,
}

/// Body of `GET get_result?id=...`.
#[derive(Deserialize, Debug)]
pub struct GetResultResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}
