//! Telegram delivery engine
//!
//! Formats a post as one or more Bot API requests and paces them:
//!
//! - one primary MarkdownV2 message (class, author, time, body),
//! - an informational message for polls,
//! - attachments partitioned by media kind; image/document/video
//!   groups are uploaded (individually or as media groups of at most
//!   10), other kinds are announced in a text message,
//! - a minimum spacing between consecutive requests, tracked by a
//!   last-request cursor owned by the engine,
//! - a 60 s cooldown after each non-final full-size media group, since
//!   the endpoint enforces a stricter per-minute ceiling there,
//! - transient failures retried through [`retry::RetryPolicy`].
//!
//! `send_post` returns only once every constituent request for the post
//! succeeded; any unrecovered failure propagates so the caller leaves
//! the post out of the history and retries it next run.

pub mod markdown;
pub mod retry;

use crate::error::{Error, Result};
use crate::models::{Attachment, MediaKind, Post, PostKind};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::ops::Range;
use std::time::Duration;
use tokio::time::Instant;

pub use retry::RetryPolicy;

/// Maximum attachments per media-group request
pub const MEDIA_GROUP_LIMIT: usize = 10;

/// Pause after a non-final full-size media group
pub const MEDIA_GROUP_COOLDOWN: Duration = Duration::from_secs(60);

const API_BASE: &str = "https://api.telegram.org";

/// Bot API response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Seam for delivering one post to the messaging endpoint
#[async_trait]
pub trait Publisher: Send {
    async fn send_post(&mut self, post: &Post) -> Result<()>;
}

/// Telegram notifier: the concrete delivery engine
pub struct Notifier {
    client: Client,
    api_base: String,
    chat_id: String,
    throttle: Duration,
    cooldown: Duration,
    retry: RetryPolicy,
    /// Start time of the most recent request; the throttle cursor
    last_request: Option<Instant>,
}

impl Notifier {
    /// Create a notifier against the live Bot API
    pub fn new(token: &str, chat_id: &str, throttle: Duration) -> Result<Self> {
        Self::with_api_base(&format!("{API_BASE}/bot{token}"), chat_id, throttle)
    }

    /// Create a notifier against a custom API base (mock servers)
    pub fn with_api_base(api_base: &str, chat_id: &str, throttle: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            chat_id: chat_id.to_string(),
            throttle,
            cooldown: MEDIA_GROUP_COOLDOWN,
            retry: RetryPolicy::default(),
            last_request: None,
        })
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the full-media-group cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Deliver one post: primary message, poll notice, attachments
    pub async fn send_post(&mut self, post: &Post) -> Result<()> {
        self.send_text(compose_primary(post)).await?;

        if post.kind == PostKind::Poll {
            self.send_text(markdown::escape(
                "Un sondage est disponible dans l'application",
            ))
            .await?;
        }

        let mut images = Vec::new();
        let mut documents = Vec::new();
        let mut videos = Vec::new();
        let mut others = Vec::new();
        for attachment in &post.attachments {
            match attachment.media_kind {
                MediaKind::Image => images.push(attachment),
                MediaKind::Document => documents.push(attachment),
                MediaKind::Video => videos.push(attachment),
                MediaKind::Audio | MediaKind::Unknown(_) => others.push(attachment),
            }
        }

        self.send_attachments(&images, &MediaKind::Image).await?;
        self.send_attachments(&documents, &MediaKind::Document).await?;
        self.send_attachments(&videos, &MediaKind::Video).await?;

        if !others.is_empty() {
            self.send_text(compose_others_notice(&others)).await?;
        }

        Ok(())
    }

    /// Send one MarkdownV2 text message
    async fn send_text(&mut self, text: String) -> Result<()> {
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "parse_mode": "MarkdownV2",
            "text": text,
        });
        self.request("sendMessage", |req| req.json(&payload)).await
    }

    /// Upload same-kind attachments, individually or as media groups
    ///
    /// Attachments whose materialization failed carry no data and are
    /// skipped here with a warning.
    async fn send_attachments(&mut self, files: &[&Attachment], kind: &MediaKind) -> Result<()> {
        let ready: Vec<(&Attachment, Bytes)> = files
            .iter()
            .filter_map(|a| match &a.data {
                Some(data) => Some((*a, data.clone())),
                None => {
                    tracing::warn!(name = %a.name, kind = %a.media_kind.as_str(), "attachment has no data, skipping upload");
                    None
                }
            })
            .collect();

        if ready.is_empty() {
            return Ok(());
        }

        let Some(api_type) = kind.api_type() else {
            return Ok(());
        };

        if ready.len() == 1 {
            let Some(method) = kind.send_method() else {
                return Ok(());
            };
            let (file, data) = &ready[0];
            let chat_id = self.chat_id.clone();
            let name = file.name.clone();
            self.request(method, |req| {
                let form = Form::new()
                    .text("chat_id", chat_id.clone())
                    .text("disable_notification", "true")
                    .part(api_type, Part::bytes(data.to_vec()).file_name(name.clone()));
                req.multipart(form)
            })
            .await?;
            return Ok(());
        }

        for (span, cooldown) in chunk_spans(ready.len(), MEDIA_GROUP_LIMIT) {
            let chunk = &ready[span];
            let media: Vec<serde_json::Value> = chunk
                .iter()
                .map(|(a, _)| {
                    serde_json::json!({
                        "type": api_type,
                        "media": format!("attach://{}", a.name),
                    })
                })
                .collect();
            let media_json = serde_json::to_string(&media)?;
            let chat_id = self.chat_id.clone();

            self.request("sendMediaGroup", |req| {
                let mut form = Form::new()
                    .text("chat_id", chat_id.clone())
                    .text("media", media_json.clone());
                for (a, data) in chunk {
                    form = form.part(
                        a.name.clone(),
                        Part::bytes(data.to_vec()).file_name(a.name.clone()),
                    );
                }
                req.multipart(form)
            })
            .await?;

            if cooldown {
                tracing::debug!(
                    secs = self.cooldown.as_secs(),
                    "full-size media group sent, cooling down"
                );
                tokio::time::sleep(self.cooldown).await;
            }
        }

        Ok(())
    }

    /// Issue one API request with throttling and retry
    ///
    /// The builder closure is invoked once per attempt because
    /// multipart bodies cannot be reused across requests.
    async fn request<F>(&mut self, method: &str, build: F) -> Result<()>
    where
        F: Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    {
        let url = format!("{}/{}", self.api_base, method);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.pace().await;

            let outcome = Self::issue(build(self.client.post(&url))).await;
            match outcome {
                Ok(()) => return Ok(()),
                Err(err) if self.retry.should_retry(&err, attempt) => {
                    let delay = self.retry.backoff(attempt, err.retry_after());
                    tracing::warn!(
                        method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient delivery failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    tracing::error!(method, attempts = attempt, error = %err, "delivery retries exhausted");
                    return Err(Error::RetriesExhausted { attempts: attempt });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Enforce the minimum spacing since the previous request started
    async fn pace(&mut self) {
        if let Some(last) = self.last_request {
            let since = last.elapsed();
            if since < self.throttle {
                tokio::time::sleep(self.throttle - since).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    /// Send one request and decode the Bot API envelope
    async fn issue(req: reqwest::RequestBuilder) -> Result<()> {
        let response = req.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(api) if api.ok => Ok(()),
            Ok(api) => Err(Error::Delivery {
                status: api.error_code.unwrap_or(status),
                description: api
                    .description
                    .unwrap_or_else(|| format!("HTTP {status}")),
                retry_after: api
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs),
            }),
            Err(_) => Err(Error::Delivery {
                status,
                description: body.chars().take(200).collect(),
                retry_after: None,
            }),
        }
    }
}

#[async_trait]
impl Publisher for Notifier {
    async fn send_post(&mut self, post: &Post) -> Result<()> {
        Notifier::send_post(self, post).await
    }
}

/// Compose the primary message for a post
///
/// Posts of a kind other than text or poll get a generic notice instead
/// of their body.
fn compose_primary(post: &Post) -> String {
    let body = match &post.kind {
        PostKind::Text | PostKind::Poll => post.text.clone(),
        PostKind::Other(raw) => format!("Nouveau message de type '{raw}'"),
    };
    let when = post.date.format("%d/%m/%Y %H:%M").to_string();

    format!(
        "*__{}__*\nDe {} le {}\n\n_{}_",
        markdown::escape(&post.klass),
        markdown::escape(&post.from),
        markdown::escape(&when),
        markdown::escape(&body),
    )
}

/// Compose the notice listing attachments that are never uploaded
fn compose_others_notice(others: &[&Attachment]) -> String {
    let mut kinds: Vec<&str> = Vec::new();
    for attachment in others {
        let kind = attachment.media_kind.as_str();
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    let plural = if others.len() > 1 { "s" } else { "" };
    markdown::escape(&format!(
        "{} objet{} de type {}",
        others.len(),
        plural,
        kinds.join(", ")
    ))
}

/// Split `total` items into chunks of at most `limit`, flagging the
/// chunks that need a cooldown pause afterwards
///
/// Only non-final full-size chunks get the flag; there is no point in a
/// trailing wait after the last chunk even when it is exactly at the
/// limit.
fn chunk_spans(total: usize, limit: usize) -> Vec<(Range<usize>, bool)> {
    let mut spans: Vec<(Range<usize>, bool)> = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + limit).min(total);
        spans.push((start..end, false));
        start = end;
    }
    let count = spans.len();
    for (i, (range, cooldown)) in spans.iter_mut().enumerate() {
        *cooldown = range.len() == limit && i + 1 < count;
    }
    spans
}
