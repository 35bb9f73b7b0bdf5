use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::TARGET_VK;

const API_BASE: &str = "https://api.vk.com/method";

/// Minimum spacing between API calls; VK allows roughly 3 requests per
/// second per token.
const THROTTLE: Duration = Duration::from_millis(350);
const MAX_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Thin VK API wrapper: throttling, transport retries, envelope unwrapping
/// and a screen-name resolution cache.
pub struct VkClient {
    http: reqwest::Client,
    token: String,
    version: String,
    resolve_cache: DashMap<String, i64>,
}

impl VkClient {
    pub fn new(http: reqwest::Client, token: &str, version: &str) -> Result<Self> {
        if token.trim().is_empty() {
            bail!("VK token is empty");
        }
        Ok(VkClient {
            http,
            token: token.to_string(),
            version: version.to_string(),
            resolve_cache: DashMap::new(),
        })
    }

    /// Calls one API method and returns the unwrapped `response` payload.
    /// Transport failures are retried; API-level errors are not.
    pub async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{API_BASE}/{method}");
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = self
                .http
                .get(&url)
                .query(&[
                    ("access_token", self.token.as_str()),
                    ("v", self.version.as_str()),
                ])
                .query(params)
                .send()
                .await;
            sleep(THROTTLE).await;

            let envelope: Value = match outcome {
                Ok(response) => response
                    .error_for_status()
                    .with_context(|| format!("VK returned an error status for {method}"))?
                    .json()
                    .await
                    .with_context(|| format!("VK returned invalid JSON for {method}"))?,
                Err(err) if attempts < MAX_RETRIES => {
                    warn!(
                        target: TARGET_VK,
                        "VK request {} failed (attempt {}/{}): {}", method, attempts, MAX_RETRIES, err
                    );
                    sleep(RETRY_DELAY).await;
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("VK request {method} failed after {MAX_RETRIES} attempts")
                    });
                }
            };

            if let Some(error) = envelope.get("error") {
                let code = error.get("error_code").and_then(Value::as_i64).unwrap_or(0);
                let message = error
                    .get("error_msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                bail!("VK API error {code} on {method}: {message}");
            }

            debug!(target: TARGET_VK, "VK call {} succeeded", method);
            return envelope
                .get("response")
                .cloned()
                .with_context(|| format!("VK response for {method} is missing its payload"));
        }
    }

    /// Resolves a community screen name to a negative wall owner id.
    /// Results are cached for the process lifetime; screen names pointing at
    /// users resolve to `None`.
    pub async fn resolve_screen_name(&self, screen_name: &str) -> Result<Option<i64>> {
        if let Some(cached) = self.resolve_cache.get(screen_name) {
            return Ok(Some(*cached));
        }

        let response = self
            .call(
                "utils.resolveScreenName",
                &[("screen_name", screen_name.to_string())],
            )
            .await?;

        let object_type = response.get("type").and_then(Value::as_str);
        let object_id = response.get("object_id").and_then(Value::as_i64);
        let owner_id = match (object_type, object_id) {
            (Some("group") | Some("page"), Some(id)) => Some(-id),
            _ => None,
        };

        if let Some(owner_id) = owner_id {
            self.resolve_cache
                .insert(screen_name.to_string(), owner_id);
        } else {
            warn!(
                target: TARGET_VK,
                "Screen name '{}' did not resolve to a community (type: {:?})",
                screen_name,
                object_type
            );
        }
        Ok(owner_id)
    }
}
