use crate::memory::registry::TelegramTarget;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub ok: bool,
    pub description: Option<String>,
}

impl SendResult {
    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            ok: false,
            description: Some(description.into()),
        }
    }
}

/// Delivery seam for briefings.
pub trait Notifier {
    fn send(&self, text: &str) -> SendResult;
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    #[serde(default)]
    ok: bool,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    target: TelegramTarget,
    api_base: String,
    parse_mode: Option<String>,
}

impl TelegramNotifier {
    pub fn new(target: TelegramTarget) -> Self {
        let api_base = match env::var("CURSORMEMORY_TELEGRAM_API_BASE") {
            Ok(v) if !v.trim().is_empty() => v.trim().trim_end_matches('/').to_string(),
            _ => DEFAULT_API_BASE.to_string(),
        };
        Self {
            target,
            api_base,
            parse_mode: None,
        }
    }

    pub fn with_parse_mode(mut self, mode: impl Into<String>) -> Self {
        self.parse_mode = Some(mode.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.target.bot_token.trim())
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        let mut body = json!({
            "chat_id": self.target.chat_id.trim(),
            "text": text,
        });
        if let Some(mode) = &self.parse_mode {
            body["parse_mode"] = json!(mode);
        }
        body
    }

    fn client(&self) -> Result<Client> {
        let mut builder = Client::builder().timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        if let Some(proxy) = self
            .target
            .socks_proxy
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .with_context(|| format!("invalid socks proxy `{proxy}`"))?,
            );
        }
        Ok(builder.build()?)
    }

    fn try_send(&self, text: &str) -> Result<SendResult> {
        let response = self
            .client()?
            .post(self.endpoint())
            .json(&self.payload(text))
            .send()
            .context("telegram request failed")?;
        let status = response.status();
        let reply: ApiReply = match response.json() {
            Ok(reply) => reply,
            Err(_) => {
                return Ok(SendResult::failed(format!(
                    "telegram returned status {status}"
                )));
            }
        };
        Ok(SendResult {
            ok: reply.ok && status.is_success(),
            description: reply.description,
        })
    }
}

impl Notifier for TelegramNotifier {
    fn send(&self, text: &str) -> SendResult {
        self.try_send(text)
            .unwrap_or_else(|err| SendResult::failed(format!("{err:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::TelegramNotifier;
    use crate::memory::registry::TelegramTarget;

    fn target() -> TelegramTarget {
        TelegramTarget {
            bot_token: "123:abc".to_string(),
            chat_id: " 42 ".to_string(),
            ..TelegramTarget::default()
        }
    }

    #[test]
    fn payload_omits_parse_mode_by_default() {
        let notifier = TelegramNotifier::new(target());
        let body = notifier.payload("hello");
        assert_eq!(body["chat_id"], "42");
        assert_eq!(body["text"], "hello");
        assert!(body.get("parse_mode").is_none());
        assert!(notifier.endpoint().ends_with("/bot123:abc/sendMessage"));
    }

    #[test]
    fn payload_carries_parse_mode_when_set() {
        let body = TelegramNotifier::new(target())
            .with_parse_mode("HTML")
            .payload("<b>x</b>");
        assert_eq!(body["parse_mode"], "HTML");
    }
}
