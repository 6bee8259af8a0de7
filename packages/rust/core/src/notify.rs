//! Run notifications: PushPlus when a token is configured, log lines otherwise.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use threadvault_shared::{ReportingConfig, Result, ThreadvaultError};

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Where stage messages go.
#[derive(Debug, Clone)]
pub enum Notifier {
    PushPlus {
        client: reqwest::Client,
        url: Url,
        token: String,
    },
    /// Structured log line per message.
    Log,
    Disabled,
}

#[derive(Debug, Deserialize)]
struct PushPlusReply {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
}

impl Notifier {
    pub fn from_config(config: &ReportingConfig) -> Self {
        if !config.enabled {
            return Self::Disabled;
        }
        match config.pushplus_token.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(token) => Self::PushPlus {
                client: reqwest::Client::new(),
                url: config.pushplus_url.clone(),
                token: token.trim().to_string(),
            },
            None => Self::Log,
        }
    }

    /// Deliver a message. Failures are logged and swallowed.
    pub async fn send(&self, title: &str, body: &str) {
        match self {
            Self::Disabled => {}
            Self::Log => info!(title, body, "notification"),
            Self::PushPlus { client, url, token } => {
                match push(client, url, token, title, body).await {
                    Ok(()) => debug!(title, "notification sent"),
                    Err(e) => warn!(title, error = %e, "notification failed"),
                }
            }
        }
    }
}

async fn push(client: &reqwest::Client, url: &Url, token: &str, title: &str, body: &str) -> Result<()> {
    let payload = json!({
        "token": token,
        "title": title,
        "content": body.replace('\n', "<br>"),
        "template": "html",
    });

    let response = client
        .post(url.clone())
        .timeout(SEND_TIMEOUT)
        .json(&payload)
        .send()
        .await
        .map_err(|e| ThreadvaultError::Notification(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ThreadvaultError::Notification(format!("HTTP {}", status.as_u16())));
    }

    let reply: PushPlusReply = response
        .json()
        .await
        .map_err(|e| ThreadvaultError::Notification(format!("unreadable reply: {e}")))?;
    if reply.code != 200 {
        return Err(ThreadvaultError::Notification(format!(
            "code {}: {}",
            reply.code,
            reply.msg.unwrap_or_default()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reporting(url: &str, token: Option<&str>, enabled: bool) -> ReportingConfig {
        ReportingConfig {
            enabled,
            batch_size: 50,
            pushplus_url: Url::parse(url).unwrap(),
            pushplus_token: token.map(String::from),
        }
    }

    #[test]
    fn picks_channel_from_config() {
        let url = "https://push.example/send";
        assert!(matches!(
            Notifier::from_config(&reporting(url, Some("tok"), true)),
            Notifier::PushPlus { .. }
        ));
        assert!(matches!(
            Notifier::from_config(&reporting(url, Some("  "), true)),
            Notifier::Log
        ));
        assert!(matches!(
            Notifier::from_config(&reporting(url, Some("tok"), false)),
            Notifier::Disabled
        ));
    }

    #[tokio::test]
    async fn posts_html_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(body_partial_json(json!({
                "token": "tok",
                "title": "crawl finished",
                "content": "line one<br>line two",
                "template": "html",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200, "msg": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier =
            Notifier::from_config(&reporting(&format!("{}/send", server.uri()), Some("tok"), true));
        notifier.send("crawl finished", "line one\nline two").await;
    }

    #[tokio::test]
    async fn rejected_token_is_an_error_but_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 999, "msg": "bad token"})))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = Url::parse(&format!("{}/send", server.uri())).unwrap();
        let err = push(&client, &url, "tok", "t", "b").await.unwrap_err();
        assert!(err.to_string().contains("code 999: bad token"));

        Notifier::PushPlus {
            client,
            url,
            token: "tok".into(),
        }
        .send("t", "b")
        .await;
    }
}
