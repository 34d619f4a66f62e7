//! Common utilities for the GitHub API client
//!
//! Request plumbing shared by every operation: authentication headers,
//! status-code mapping and `Link` header pagination.

use crate::error::GitHubError;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Page size requested from list endpoints
pub const PER_PAGE: u32 = 100;

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "devbot";

/// HTTP client wrapper with authentication
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
    }

    /// Fetch every page of a list endpoint, following `Link: rel="next"`
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, GitHubError> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut url = self.build_url(&format!("{path}{separator}per_page={PER_PAGE}"));
        let mut all_results = Vec::new();

        loop {
            debug!("Fetching page: {}", url);

            let response = self.authorized(self.client.get(&url)).send().await?;
            let response = check_status(response, "GET", path).await?;
            let next = next_page_url(response.headers());

            let response_text = response.text().await?;
            let page: Vec<T> = serde_json::from_str(&response_text).map_err(|e| {
                GitHubError::Api(format!(
                    "error decoding response body: {} - Response (first 500 chars): {}",
                    e,
                    response_text.chars().take(500).collect::<String>()
                ))
            })?;
            all_results.extend(page);

            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        Ok(all_results)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GitHubError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = check_status(response, "GET", path).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request with a JSON body
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GitHubError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self
            .authorized(self.client.post(&url))
            .json(body)
            .send()
            .await?;
        let response = check_status(response, "POST", path).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request without a body, ignoring the response body
    pub async fn post_empty(&self, path: &str) -> Result<(), GitHubError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self.authorized(self.client.post(&url)).send().await?;
        check_status(response, "POST", path).await?;
        Ok(())
    }

    /// Make a PATCH request with a JSON body
    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GitHubError> {
        let url = self.build_url(path);
        debug!("PATCH {}", url);

        let response = self
            .authorized(self.client.patch(&url))
            .json(body)
            .send()
            .await?;
        let response = check_status(response, "PATCH", path).await?;
        Ok(response.json().await?)
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), GitHubError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self.authorized(self.client.delete(&url)).send().await?;
        check_status(response, "DELETE", path).await?;
        Ok(())
    }
}

/// Maps non-success statuses onto [`GitHubError`] variants.
async fn check_status(
    response: Response,
    method: &str,
    path: &str,
) -> Result<Response, GitHubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{method} {path} failed: {status} - {body}");
    Err(match status {
        StatusCode::UNAUTHORIZED => GitHubError::Authentication(message),
        StatusCode::FORBIDDEN => GitHubError::Forbidden(message),
        StatusCode::NOT_FOUND => GitHubError::NotFound(message),
        StatusCode::UNPROCESSABLE_ENTITY => GitHubError::InvalidRequest(message),
        _ => GitHubError::Api(message),
    })
}

/// Extracts the `rel="next"` target from a `Link` header.
pub fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    parse_next_link(link)
}

fn parse_next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let target = segments.next()?.trim();
        let is_next = segments.any(|s| s.trim() == r#"rel="next""#);
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

/// Percent-encodes one path segment (owner or repository name).
pub fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_next_link() {
        let link = r#"<https://api.github.com/repositories/1/branches?per_page=100&page=2>; rel="next", <https://api.github.com/repositories/1/branches?per_page=100&page=5>; rel="last""#;
        assert_eq!(
            parse_next_link(link).as_deref(),
            Some("https://api.github.com/repositories/1/branches?per_page=100&page=2")
        );
    }

    #[test]
    fn test_parse_next_link_on_last_page() {
        let link = r#"<https://api.github.com/repositories/1/branches?page=4>; rel="prev", <https://api.github.com/repositories/1/branches?page=1>; rel="first""#;
        assert_eq!(parse_next_link(link), None);
        assert_eq!(parse_next_link(""), None);
    }

    #[test]
    fn test_build_url() {
        let http = HttpClient::new(
            Client::new(),
            "https://ghe.example.com/api/v3/".to_string(),
            "t".to_string(),
        );
        assert_eq!(http.base_url(), "https://ghe.example.com/api/v3");
        assert_eq!(
            http.build_url("/repos/a/b"),
            "https://ghe.example.com/api/v3/repos/a/b"
        );
        assert_eq!(http.build_url("https://other/x"), "https://other/x");
    }

    #[test]
    fn test_debug_hides_token() {
        let http = HttpClient::new(Client::new(), "https://x".to_string(), "ghp_secret".to_string());
        assert!(!format!("{http:?}").contains("ghp_secret"));
    }
}
