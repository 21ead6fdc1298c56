// Wire types for the J-Grants public API. The upstream payloads carry more
// fields than we model; unknown keys are preserved through `extra` so tool
// responses round-trip the original JSON.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubsidiesResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SubsidiesResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubsidiesResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidies: Option<Vec<SubsidyListItem>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubsidyListItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_start_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_end_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_area_search: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubsidyDetailResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SubsidyDetail>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubsidyDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One attachment entry as returned by the detail endpoint: a declared file
/// name plus base64-encoded content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_response_preserves_unknown_fields() {
        let raw = json!({
            "status": 200,
            "result": {
                "id": "a0W123",
                "name": "テスト補助金",
                "subsidy_max_limit": 5000000,
                "attachments": [
                    { "name": "guide.pdf", "data": "aGVsbG8=", "category": "application" }
                ]
            }
        });
        let parsed: SubsidyDetailResponse = serde_json::from_value(raw).unwrap();
        let detail = parsed.result.unwrap();
        assert_eq!(detail.id.as_deref(), Some("a0W123"));
        assert_eq!(detail.extra.get("subsidy_max_limit"), Some(&json!(5000000)));
        let attachments = detail.attachments.unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].category.as_deref(), Some("application"));
    }
}
