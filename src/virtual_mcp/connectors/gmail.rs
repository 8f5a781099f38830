//! Gmail connector
//!
//! Sends mail and manages drafts through the Gmail REST API using the
//! caller's OAuth token.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::model::*;
use crate::virtual_mcp::connector::{
    Connector, decode_arguments, method_not_found, structured_result,
};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Deserialize)]
struct EmailArgs {
    sender: String,
    recipient: String,
    body: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    cc: Option<Vec<String>>,
    #[serde(default)]
    bcc: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct DraftUpdateArgs {
    draft_id: String,
    #[serde(flatten)]
    email: EmailArgs,
}

/// Gmail connector, one instance per process
pub struct GmailConnector {
    client: reqwest::Client,
    api_base: String,
}

impl GmailConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_base: GMAIL_API_BASE.to_string(),
        }
    }

    /// Point at a different API base (tests)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn bearer_token(auth_token: Option<&AuthTokenData>) -> Result<String, CallToolResult> {
        match auth_token {
            Some(token) => Ok(token.token.clone()),
            None => Err(CallToolResult::error(vec![ContentBlock::text(
                "Gmail connector requires an auth token",
            )])),
        }
    }

    /// RFC 2822 message, base64url-encoded the way the Gmail API expects
    fn encode_message(email: &EmailArgs) -> String {
        let mut message = String::new();
        message.push_str(&format!("To: {}\r\n", email.recipient));
        if let Some(subject) = &email.subject {
            message.push_str(&format!("Subject: {}\r\n", subject));
        }
        if let Some(cc) = &email.cc
            && !cc.is_empty()
        {
            message.push_str(&format!("Cc: {}\r\n", cc.join(", ")));
        }
        if let Some(bcc) = &email.bcc
            && !bcc.is_empty()
        {
            message.push_str(&format!("Bcc: {}\r\n", bcc.join(", ")));
        }
        message.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
        message.push_str("\r\n");
        message.push_str(&email.body);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(message.as_bytes())
    }

    async fn post_gmail(
        &self,
        token: &str,
        url: String,
        body: Value,
    ) -> Result<Value, CallToolResult> {
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                CallToolResult::error(vec![ContentBlock::text(format!(
                    "Gmail API request failed: {}",
                    e
                ))])
            })?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(CallToolResult::error(vec![ContentBlock::text(format!(
                "Gmail API returned {}: {}",
                status, payload
            ))]));
        }
        Ok(payload)
    }

    async fn send_email(
        &self,
        arguments: &Map<String, Value>,
        auth_token: Option<&AuthTokenData>,
    ) -> CallToolResult {
        let email: EmailArgs = match decode_arguments(arguments) {
            Ok(email) => email,
            Err(error) => return error,
        };
        let token = match Self::bearer_token(auth_token) {
            Ok(token) => token,
            Err(error) => return error,
        };

        let url = format!(
            "{}/users/{}/messages/send",
            self.api_base,
            urlencoding::encode(&email.sender)
        );
        let body = json!({ "raw": Self::encode_message(&email) });

        match self.post_gmail(&token, url, body).await {
            Ok(sent) => {
                let message_id = sent
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                tracing::debug!(message_id = %message_id, "email sent");
                structured_result(json!({ "message_id": message_id }))
            }
            Err(error) => error,
        }
    }

    async fn drafts_create(
        &self,
        arguments: &Map<String, Value>,
        auth_token: Option<&AuthTokenData>,
    ) -> CallToolResult {
        let email: EmailArgs = match decode_arguments(arguments) {
            Ok(email) => email,
            Err(error) => return error,
        };
        let token = match Self::bearer_token(auth_token) {
            Ok(token) => token,
            Err(error) => return error,
        };

        let url = format!(
            "{}/users/{}/drafts",
            self.api_base,
            urlencoding::encode(&email.sender)
        );
        let body = json!({ "message": { "raw": Self::encode_message(&email) } });

        match self.post_gmail(&token, url, body).await {
            Ok(draft) => {
                let draft_id = draft
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                structured_result(json!({ "draft_id": draft_id }))
            }
            Err(error) => error,
        }
    }

    async fn drafts_update(
        &self,
        arguments: &Map<String, Value>,
        auth_token: Option<&AuthTokenData>,
    ) -> CallToolResult {
        let args: DraftUpdateArgs = match decode_arguments(arguments) {
            Ok(args) => args,
            Err(error) => return error,
        };
        let token = match Self::bearer_token(auth_token) {
            Ok(token) => token,
            Err(error) => return error,
        };

        let url = format!(
            "{}/users/{}/drafts/{}",
            self.api_base,
            urlencoding::encode(&args.email.sender),
            urlencoding::encode(&args.draft_id)
        );
        let body = json!({
            "id": args.draft_id,
            "message": { "raw": Self::encode_message(&args.email) },
        });

        match self.post_gmail(&token, url, body).await {
            Ok(draft) => {
                let draft_id = draft
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                structured_result(json!({ "draft_id": draft_id }))
            }
            Err(error) => error,
        }
    }
}

#[async_trait]
impl Connector for GmailConnector {
    fn server_name(&self) -> &'static str {
        "GMAIL"
    }

    async fn call(
        &self,
        method: &str,
        arguments: &Map<String, Value>,
        auth_token: Option<&AuthTokenData>,
    ) -> CallToolResult {
        match method {
            "send_email" => self.send_email(arguments, auth_token).await,
            "drafts_create" => self.drafts_create(arguments, auth_token).await,
            "drafts_update" => self.drafts_update(arguments, auth_token).await,
            other => method_not_found(other),
        }
    }
}
