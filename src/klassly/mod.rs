//! Klassroom API client
//!
//! Thin collaborator around the Klassroom HTTP API: session bootstrap
//! and login, class listing, post history per class, and attachment
//! download. The pipeline only depends on the [`PostSource`] trait.
//!
//! The API speaks multipart forms carrying a fixed set of common fields
//! plus the session token; responses are JSON envelopes with an `ok`
//! flag. Attachment URLs on the data host must be rewritten onto the
//! web host before download or the CDN refuses the session cookies.

use crate::error::{Error, Result};
use crate::models::{Attachment, Klass, Post};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::multipart::Form;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default web host, source of the session cookies
pub const WEB_BASE: &str = "https://fr.klass.ly";

/// Default API host
pub const API_BASE: &str = "https://api2.klassroom.co";

const DATA_HOST: &str = "https://data.klassroom.co";
const DATA_REWRITE: &str = "https://www.klass.ly/_data";

const APP_ID: &str = "553e7f3c01ae1";
const APP_VERSION: &str = "6.6";
const FALLBACK_DEVICE: &str = "web-134e32e568cb0";

/// Seam for the content source
#[async_trait]
pub trait PostSource: Send {
    /// Authenticate and list open classes
    async fn login(&mut self) -> Result<Vec<Klass>>;

    /// Fetch posts for one class, oldest first, attachments unmaterialized
    async fn posts(&mut self, klass: &Klass) -> Result<Vec<Post>>;

    /// Download attachment bytes in place; returns the number of
    /// attachments that failed (each logged, none aborts the batch)
    async fn materialize(&mut self, posts: &mut [Post]) -> usize;
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    ok: bool,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    ok: bool,
    #[serde(rename = "self", default)]
    user: Option<RawUser>,
    #[serde(default)]
    klasses: HashMap<String, RawKlass>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawKlass {
    natural_name: String,
    #[serde(default)]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    posts: HashMap<String, RawPost>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    /// Post creation time in epoch milliseconds
    date: i64,
    user: RawUser,
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attachments: HashMap<String, RawAttachment>,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    name: String,
}

/// Klassroom API client with a persistent cookie session
pub struct KlasslyClient {
    client: Client,
    jar: Arc<Jar>,
    web_base: String,
    api_base: String,
    user: String,
    password: String,
    device: String,
    auth_token: Option<String>,
}

impl KlasslyClient {
    /// Create a client against the live Klassroom hosts
    pub fn new(user: &str, password: &str, agent: &str) -> Result<Self> {
        Self::with_bases(WEB_BASE, API_BASE, user, password, agent)
    }

    /// Create a client against custom hosts (mock servers)
    pub fn with_bases(
        web_base: &str,
        api_base: &str,
        user: &str,
        password: &str,
        agent: &str,
    ) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(agent)
            .gzip(true)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            jar,
            web_base: web_base.trim_end_matches('/').to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            user: user.to_string(),
            password: password.to_string(),
            device: FALLBACK_DEVICE.to_string(),
            auth_token: None,
        })
    }

    /// Common form fields every API call carries
    fn common_form(&self) -> Form {
        let mut form = Form::new()
            .text("device", self.device.clone())
            .text("app_id", APP_ID)
            .text("version", APP_VERSION)
            .text("culture", "en")
            .text("apptype", "klassroom")
            .text("gmtoffset", "-120")
            .text("tz", "Europe/Paris")
            .text("dst", "true");
        if let Some(token) = &self.auth_token {
            form = form.text("auth_token", token.clone());
        }
        form
    }

    /// Authenticate and list open classes
    pub async fn login(&mut self) -> Result<Vec<Klass>> {
        tracing::info!("logging in to Klassroom");

        // Bootstrap the session; the web host hands out the device id
        self.client
            .get(&self.web_base)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("web host unreachable: {e}")))?;

        if let Some(device) = self.session_cookie("klassroom_device") {
            self.device = device;
        }

        let form = self
            .common_form()
            .text("phone", self.user.clone())
            .text("password", self.password.clone());
        let auth: AuthResponse = self
            .api_call("auth.basic", form)
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;
        if !auth.ok {
            return Err(Error::Auth(
                auth.error.unwrap_or_else(|| "login rejected".to_string()),
            ));
        }
        self.auth_token = match auth.auth_token {
            Some(token) => Some(token),
            None => return Err(Error::Auth("login response carried no token".to_string())),
        };

        let connect: ConnectResponse = self
            .api_call("app.connect", self.common_form())
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;
        if !connect.ok {
            return Err(Error::Auth("app.connect rejected the session".to_string()));
        }

        if let Some(user) = &connect.user {
            tracing::info!(user = %user.name, "logged in");
        }

        self.install_session_cookies().await;

        let mut klasses: Vec<Klass> = connect
            .klasses
            .into_iter()
            .filter(|(_, k)| !k.is_closed)
            .map(|(id, k)| Klass {
                id,
                name: k.natural_name,
            })
            .collect();
        klasses.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(klasses = klasses.len(), "open classes listed");
        Ok(klasses)
    }

    /// Fetch post history for one class, oldest first
    pub async fn posts(&mut self, klass: &Klass) -> Result<Vec<Post>> {
        tracing::info!(klass = %klass.name, "fetching posts");

        let form = self
            .common_form()
            .text("id", klass.id.clone())
            .text("filter", "all")
            .text("type", "post")
            .text("from", Utc::now().timestamp_millis().to_string());

        let history: HistoryResponse =
            self.api_call("klass.history", form)
                .await
                .map_err(|e| Error::Fetch {
                    klass: klass.name.clone(),
                    reason: e.to_string(),
                })?;
        if !history.ok {
            return Err(Error::Fetch {
                klass: klass.name.clone(),
                reason: "klass.history rejected the request".to_string(),
            });
        }

        let posts = map_posts(&klass.name, history.posts);
        tracing::info!(klass = %klass.name, posts = posts.len(), "posts fetched");
        Ok(posts)
    }

    /// Download attachment bytes for every post in the batch
    ///
    /// Each failed attachment is logged and left without data; the post
    /// itself is still delivered.
    pub async fn materialize(&mut self, posts: &mut [Post]) -> usize {
        let mut failures = 0;
        for post in posts.iter_mut() {
            for attachment in post.attachments.iter_mut() {
                let url = rewrite_data_url(&attachment.url);
                match self.download(&attachment.name, &url).await {
                    Ok(bytes) => attachment.data = Some(bytes),
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(
                            post_id = %post.id,
                            name = %attachment.name,
                            error = %e,
                            "failed to materialize attachment, it will be skipped"
                        );
                    }
                }
            }
        }
        failures
    }

    async fn download(&self, name: &str, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Attachment {
                name: name.to_string(),
                reason: format!("HTTP {}", response.status().as_u16()),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn api_call<T: for<'de> Deserialize<'de>>(&self, method: &str, form: Form) -> Result<T> {
        let url = format!("{}/{}", self.api_base, method);
        let response = self.client.post(&url).multipart(form).send().await?;
        Ok(response.json().await?)
    }

    /// Read one cookie for the web host out of the session jar
    fn session_cookie(&self, name: &str) -> Option<String> {
        let url = Url::parse(&self.web_base).ok()?;
        let header = self.jar.cookies(&url)?;
        extract_cookie(header.to_str().ok()?, name)
    }

    /// Install the session cookies the CDN expects on downloads
    ///
    /// The web host embeds a `klassroomauth` token in its landing page;
    /// missing it only degrades attachment downloads, so failures here
    /// are logged and ignored.
    async fn install_session_cookies(&self) {
        let Some(token) = &self.auth_token else { return };
        let Ok(url) = Url::parse(&self.web_base) else {
            return;
        };

        self.jar
            .add_cookie_str(&format!("klassroom_device={}", self.device), &url);
        self.jar
            .add_cookie_str(&format!("klassroom_token={token}"), &url);

        match self.client.get(&self.web_base).send().await {
            Ok(response) => {
                if let Ok(html) = response.text().await {
                    if let Some(auth) = extract_data_token(&html) {
                        self.jar
                            .add_cookie_str(&format!("klassroomauth={auth}"), &url);
                        for host in [DATA_HOST, "https://www.klass.ly"] {
                            if let Ok(data_url) = Url::parse(host) {
                                self.jar
                                    .add_cookie_str(&format!("klassroomauth={auth}"), &data_url);
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not refresh data-host cookies");
            }
        }
    }
}

#[async_trait]
impl PostSource for KlasslyClient {
    async fn login(&mut self) -> Result<Vec<Klass>> {
        KlasslyClient::login(self).await
    }

    async fn posts(&mut self, klass: &Klass) -> Result<Vec<Post>> {
        KlasslyClient::posts(self, klass).await
    }

    async fn materialize(&mut self, posts: &mut [Post]) -> usize {
        KlasslyClient::materialize(self, posts).await
    }
}

/// Map a raw history response to posts, oldest first
///
/// Attachments are sorted by name so delivery order is deterministic
/// despite the source returning them as an unordered map.
fn map_posts(klass_name: &str, raw: HashMap<String, RawPost>) -> Vec<Post> {
    let mut posts: Vec<Post> = raw
        .into_iter()
        .map(|(id, post)| {
            let date = DateTime::from_timestamp_millis(post.date).unwrap_or_else(Utc::now);
            let mut attachments: Vec<Attachment> = post
                .attachments
                .into_values()
                .map(|a| Attachment {
                    media_kind: a.kind.into(),
                    name: a.name,
                    url: a.url,
                    data: None,
                })
                .collect();
            attachments.sort_by(|a, b| a.name.cmp(&b.name));

            Post {
                id,
                klass: klass_name.to_string(),
                date,
                from: post.user.name,
                text: post.text.unwrap_or_default(),
                kind: post.kind.into(),
                attachments,
            }
        })
        .collect();

    posts.sort_by_key(|p| p.date);
    posts
}

/// Rewrite data-host URLs onto the web host's `_data` path
fn rewrite_data_url(url: &str) -> String {
    match url.strip_prefix(DATA_HOST) {
        Some(rest) => format!("{DATA_REWRITE}{rest}"),
        None => url.to_string(),
    }
}

/// Pull one cookie value out of a `Cookie` header
fn extract_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix(&format!("{name}=")))
        .map(str::to_string)
}

/// Find the `klassroomauth` token embedded in the landing page
fn extract_data_token(html: &str) -> Option<String> {
    let idx = html.find("klassroomauth=")?;
    let tail = &html[idx + "klassroomauth=".len()..];
    let token: String = tail
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaKind, PostKind};

    #[test]
    fn test_rewrite_data_url() {
        assert_eq!(
            rewrite_data_url("https://data.klassroom.co/files/a.pdf"),
            "https://www.klass.ly/_data/files/a.pdf"
        );
        assert_eq!(
            rewrite_data_url("https://cdn.example.com/b.jpg"),
            "https://cdn.example.com/b.jpg"
        );
    }

    #[test]
    fn test_extract_cookie() {
        let header = "klassroom_device=web-abc123; other=1";
        assert_eq!(
            extract_cookie(header, "klassroom_device"),
            Some("web-abc123".to_string())
        );
        assert_eq!(extract_cookie(header, "missing"), None);
    }

    #[test]
    fn test_extract_data_token() {
        let html = r#"<img src="https://www.klass.ly/_data/klassroomauth?klassroomauth=ab12CD">"#;
        assert_eq!(extract_data_token(html), Some("ab12CD".to_string()));
        assert_eq!(extract_data_token("<html></html>"), None);
    }

    #[test]
    fn test_map_posts_orders_and_maps() {
        let raw: HashMap<String, RawPost> = serde_json::from_str(
            r#"{
                "p2": {
                    "date": 1700000200000,
                    "user": {"name": "Mme Dupont"},
                    "text": "plus récent",
                    "type": "message",
                    "attachments": {}
                },
                "p1": {
                    "date": 1700000100000,
                    "user": {"name": "M. Martin"},
                    "type": "poll",
                    "attachments": {
                        "a2": {"type": "image", "url": "u2", "name": "b.jpg"},
                        "a1": {"type": "document", "url": "u1", "name": "a.pdf"}
                    }
                }
            }"#,
        )
        .unwrap();

        let posts = map_posts("CM2 A", raw);

        assert_eq!(posts.len(), 2);
        // oldest first
        assert_eq!(posts[0].id, "p1");
        assert_eq!(posts[1].id, "p2");

        assert_eq!(posts[0].klass, "CM2 A");
        assert_eq!(posts[0].kind, PostKind::Poll);
        assert_eq!(posts[0].text, "");
        // attachments sorted by name, unmaterialized
        assert_eq!(posts[0].attachments[0].name, "a.pdf");
        assert_eq!(posts[0].attachments[0].media_kind, MediaKind::Document);
        assert_eq!(posts[0].attachments[1].name, "b.jpg");
        assert!(posts[0].attachments[0].data.is_none());

        assert_eq!(posts[1].kind, PostKind::Text);
        assert_eq!(posts[1].from, "Mme Dupont");
    }
}
