// HTTP client for the J-Grants public subsidy listing and detail endpoints.
use crate::schemas::{SubsidiesResponse, SubsidyDetailResponse};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use url::Url;

// The listing endpoint rejects keywords shorter than two characters, so short
// or missing input falls back to a broad default.
const DEFAULT_KEYWORD: &str = "事業";
const DEFAULT_SORT: &str = "created_date";
const DEFAULT_ORDER: &str = "DESC";
const DEFAULT_ACCEPTANCE: u8 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub acceptance: Option<u8>,
    #[serde(default)]
    pub use_purpose: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub target_number_of_employees: Option<String>,
    #[serde(default)]
    pub target_area_search: Option<String>,
}

pub fn normalize_keyword(keyword: Option<&str>) -> String {
    let Some(keyword) = keyword else {
        return DEFAULT_KEYWORD.to_string();
    };
    let trimmed = keyword.trim();
    if trimmed.chars().count() < 2 {
        return DEFAULT_KEYWORD.to_string();
    }
    trimmed.to_string()
}

pub fn build_subsidies_query(params: &SearchParams) -> Vec<(String, String)> {
    let mut query = vec![
        (
            "keyword".to_string(),
            normalize_keyword(params.keyword.as_deref()),
        ),
        (
            "sort".to_string(),
            params
                .sort
                .clone()
                .unwrap_or_else(|| DEFAULT_SORT.to_string()),
        ),
        (
            "order".to_string(),
            params
                .order
                .clone()
                .unwrap_or_else(|| DEFAULT_ORDER.to_string()),
        ),
        (
            "acceptance".to_string(),
            params.acceptance.unwrap_or(DEFAULT_ACCEPTANCE).to_string(),
        ),
    ];
    let optional = [
        ("use_purpose", &params.use_purpose),
        ("industry", &params.industry),
        (
            "target_number_of_employees",
            &params.target_number_of_employees,
        ),
        ("target_area_search", &params.target_area_search),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            if !value.is_empty() {
                query.push((key.to_string(), value.clone()));
            }
        }
    }
    query
}

#[derive(Debug, Clone)]
pub struct JgrantsClient {
    http: reqwest::Client,
    base_url: String,
}

impl JgrantsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn fetch_subsidies(&self, params: &SearchParams) -> Result<SubsidiesResponse> {
        let url = format!("{}/subsidies", self.base_url.trim_end_matches('/'));
        let query = build_subsidies_query(params);
        let response = self
            .http
            .get(&url)
            .query(&query)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        parse_json_response(response).await
    }

    pub async fn fetch_subsidy_detail(&self, id: &str) -> Result<SubsidyDetailResponse> {
        let mut url = Url::parse(self.base_url.trim_end_matches('/'))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("J-Grants base url cannot be a base: {}", self.base_url))?
            .push("subsidies")
            .push("id")
            .push(id);
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        parse_json_response(response).await
    }
}

async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("J-Grants API error {status}: {body}"));
    }
    Ok(response.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_get<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
        query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn query_applies_defaults() {
        let query = build_subsidies_query(&SearchParams::default());
        assert_eq!(query_get(&query, "keyword"), Some("事業"));
        assert_eq!(query_get(&query, "sort"), Some("created_date"));
        assert_eq!(query_get(&query, "order"), Some("DESC"));
        assert_eq!(query_get(&query, "acceptance"), Some("1"));
        assert_eq!(query_get(&query, "industry"), None);
    }

    #[test]
    fn query_normalizes_short_keyword() {
        let params = SearchParams {
            keyword: Some("a".to_string()),
            ..SearchParams::default()
        };
        let query = build_subsidies_query(&params);
        assert_eq!(query_get(&query, "keyword"), Some("事業"));
    }

    #[test]
    fn query_keeps_valid_keyword() {
        let params = SearchParams {
            keyword: Some("IT".to_string()),
            ..SearchParams::default()
        };
        let query = build_subsidies_query(&params);
        assert_eq!(query_get(&query, "keyword"), Some("IT"));
    }

    #[test]
    fn query_includes_optional_filters() {
        let params = SearchParams {
            keyword: Some("ものづくり".to_string()),
            acceptance: Some(0),
            industry: Some("製造業".to_string()),
            ..SearchParams::default()
        };
        let query = build_subsidies_query(&params);
        assert_eq!(query_get(&query, "acceptance"), Some("0"));
        assert_eq!(query_get(&query, "industry"), Some("製造業"));
    }
}
