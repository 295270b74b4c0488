//! Slack Web API client: `users.info`, `conversations.info`,
//! `conversations.replies`, `auth.test`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ChannelInfo, ChannelKind, IdentitySource, ThreadReply, UserInfo};
use crate::error::SlackError;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack Web API client authenticated with a bot token.
pub struct SlackClient {
    client: reqwest::Client,
    token: SecretString,
    base_url: String,
    timeout: Duration,
}

impl SlackClient {
    pub fn new(token: SecretString, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: SLACK_API_BASE.to_string(),
            timeout,
        }
    }

    /// Point the client at a different API root (local stub servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url.trim_end_matches('/'))
    }

    /// Call a Web API method and return the decoded body, checking `ok`.
    /// The timeout bounds both the request and reading the body.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SlackError> {
        let body = tokio::time::timeout(self.timeout, self.fetch(method, query))
            .await
            .map_err(|_| SlackError::Timeout {
                method: method.to_string(),
                timeout: self.timeout,
            })??;

        if !body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            let code = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error")
                .to_string();
            return Err(SlackError::Api {
                method: method.to_string(),
                code,
            });
        }

        debug!(method, "Slack API call succeeded");
        serde_json::from_value(body).map_err(|e| SlackError::InvalidResponse {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    async fn fetch(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value, SlackError> {
        let response = self
            .client
            .get(self.api_url(method))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| SlackError::Http {
                method: method.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        response
            .json()
            .await
            .map_err(|e| SlackError::InvalidResponse {
                method: method.to_string(),
                reason: format!("status {status}: {e}"),
            })
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UsersInfoResponse {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    name: String,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<SlackProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsInfoResponse {
    channel: SlackChannel,
}

#[derive(Debug, Deserialize)]
struct SlackChannel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_im: bool,
    #[serde(default)]
    is_mpim: bool,
    #[serde(default)]
    is_group: bool,
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    #[serde(default)]
    messages: Vec<SlackReply>,
}

#[derive(Debug, Deserialize)]
struct SlackReply {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: String,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

impl From<SlackUser> for UserInfo {
    fn from(user: SlackUser) -> Self {
        let real_name = non_empty(user.real_name).unwrap_or_else(|| user.name.clone());
        let display_name = non_empty(user.profile.unwrap_or_default().display_name)
            .unwrap_or_else(|| real_name.clone());
        Self {
            id: user.id,
            name: user.name,
            real_name,
            display_name,
        }
    }
}

impl From<SlackChannel> for ChannelInfo {
    fn from(channel: SlackChannel) -> Self {
        let kind = if channel.is_im {
            ChannelKind::Im
        } else if channel.is_mpim {
            ChannelKind::Mpim
        } else if channel.is_group {
            ChannelKind::Group
        } else {
            ChannelKind::Channel
        };
        Self {
            id: channel.id,
            name: non_empty(channel.name).unwrap_or_else(|| "direct-message".to_string()),
            kind,
        }
    }
}

#[async_trait]
impl IdentitySource for SlackClient {
    async fn lookup_user(&self, user_ref: &str) -> Result<UserInfo, SlackError> {
        let response: UsersInfoResponse = self.call("users.info", &[("user", user_ref)]).await?;
        Ok(response.user.into())
    }

    async fn lookup_channel(&self, channel_ref: &str) -> Result<ChannelInfo, SlackError> {
        let response: ConversationsInfoResponse = self
            .call("conversations.info", &[("channel", channel_ref)])
            .await?;
        Ok(response.channel.into())
    }

    async fn fetch_thread_replies(
        &self,
        channel_ref: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadReply>, SlackError> {
        let response: RepliesResponse = self
            .call(
                "conversations.replies",
                &[("channel", channel_ref), ("ts", thread_ts)],
            )
            .await?;
        Ok(response
            .messages
            .into_iter()
            .map(|m| ThreadReply {
                user: m.user,
                text: m.text,
                ts: m.ts,
            })
            .collect())
    }

    async fn auth_identity(&self) -> Result<String, SlackError> {
        let response: AuthTestResponse = self.call("auth.test", &[]).await?;
        Ok(response.user_id)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn user_display_name_prefers_profile() {
        let user: SlackUser = serde_json::from_value(serde_json::json!({
            "id": "U1",
            "name": "alice",
            "real_name": "Alice Smith",
            "profile": {"display_name": "ali"}
        }))
        .unwrap();
        let info = UserInfo::from(user);
        assert_eq!(info.name, "alice");
        assert_eq!(info.real_name, "Alice Smith");
        assert_eq!(info.display_name, "ali");
    }

    #[test]
    fn user_names_fall_back_to_handle() {
        let user: SlackUser = serde_json::from_value(serde_json::json!({
            "id": "U2",
            "name": "bob",
            "real_name": "",
            "profile": {"display_name": ""}
        }))
        .unwrap();
        let info = UserInfo::from(user);
        assert_eq!(info.real_name, "bob");
        assert_eq!(info.display_name, "bob");
    }

    #[test]
    fn channel_kind_from_flags() {
        let im: SlackChannel =
            serde_json::from_value(serde_json::json!({"id": "D1", "is_im": true})).unwrap();
        let info = ChannelInfo::from(im);
        assert_eq!(info.kind, ChannelKind::Im);
        assert_eq!(info.name, "direct-message");

        let group: SlackChannel = serde_json::from_value(
            serde_json::json!({"id": "G1", "name": "secret", "is_group": true}),
        )
        .unwrap();
        assert_eq!(ChannelInfo::from(group).kind, ChannelKind::Group);

        let public: SlackChannel =
            serde_json::from_value(serde_json::json!({"id": "C1", "name": "general"})).unwrap();
        let info = ChannelInfo::from(public);
        assert_eq!(info.kind, ChannelKind::Channel);
        assert_eq!(info.name, "general");
    }

    #[test]
    fn api_url_joins_method() {
        let client = SlackClient::new(SecretString::from("xoxb-test"), Duration::from_secs(1))
            .with_base_url("http://127.0.0.1:9999/api/");
        assert_eq!(client.api_url("users.info"), "http://127.0.0.1:9999/api/users.info");
    }

    fn client_for(server: &MockServer) -> SlackClient {
        SlackClient::new(SecretString::from("xoxb-test"), Duration::from_millis(500))
            .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn thread_replies_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("channel", "C1"))
            .and(query_param("ts", "1.000001"))
            .and(header("authorization", "Bearer xoxb-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [
                    {"user": "U1", "text": "parent", "ts": "1.000001"},
                    {"bot_id": "B1", "text": "reply", "ts": "1.000002"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let replies = client.fetch_thread_replies("C1", "1.000001").await.unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].user.as_deref(), Some("U1"));
        assert_eq!(replies[1].user, None);
        assert_eq!(replies[1].text, "reply");
    }

    #[tokio::test]
    async fn lookup_user_and_channel() {
        let server = MockServer::start().await;
        Mock::given(path("/users.info"))
            .and(query_param("user", "U1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "user": {"id": "U1", "name": "alice", "real_name": "Alice Smith",
                         "profile": {"display_name": "ali"}}
            })))
            .mount(&server)
            .await;
        Mock::given(path("/conversations.info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "channel": {"id": "D1", "is_im": true}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let user = client.lookup_user("U1").await.unwrap();
        assert_eq!(user.display_name, "ali");
        let channel = client.lookup_channel("D1").await.unwrap();
        assert_eq!(channel.kind, ChannelKind::Im);
    }

    #[tokio::test]
    async fn not_ok_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(path("/users.info"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": false, "error": "user_not_found"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        match client.lookup_user("U404").await.unwrap_err() {
            SlackError::Api { method, code } => {
                assert_eq!(method, "users.info");
                assert_eq!(code, "user_not_found");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_error_code_is_unknown_error() {
        let server = MockServer::start().await;
        Mock::given(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": false})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.auth_identity().await.unwrap_err(),
            SlackError::Api { code, .. } if code == "unknown_error"
        ));
    }

    #[tokio::test]
    async fn auth_identity_returns_user_id() {
        let server = MockServer::start().await;
        Mock::given(path("/auth.test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true, "user_id": "UBOT"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.auth_identity().await.unwrap(), "UBOT");
    }

    #[tokio::test]
    async fn non_json_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(path("/auth.test"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        match client.auth_identity().await.unwrap_err() {
            SlackError::InvalidResponse { method, reason } => {
                assert_eq!(method, "auth.test");
                assert!(reason.contains("502"));
            }
            other => panic!("expected InvalidResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ok_body_with_wrong_shape_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.auth_identity().await.unwrap_err(),
            SlackError::InvalidResponse { .. }
        ));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(path("/users.info"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        match client.lookup_user("U1").await.unwrap_err() {
            SlackError::Timeout { method, timeout } => {
                assert_eq!(method, "users.info");
                assert_eq!(timeout, Duration::from_millis(500));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
