//! Discourse JSON API client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ForumClient, Notification, Topic, TopicPost};
use crate::config::ForumConfig;
use crate::error::Error;
use crate::Result;

#[derive(Debug, Deserialize)]
struct NotificationList {
    #[serde(default)]
    notifications: Vec<NotificationPayload>,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    id: u64,
    #[serde(default)]
    topic_id: Option<u64>,
    #[serde(default)]
    read: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TopicPayload {
    id: u64,
    #[serde(default)]
    title: String,
    post_stream: PostStream,
}

#[derive(Debug, Deserialize)]
struct PostStream {
    #[serde(default)]
    posts: Vec<PostPayload>,
}

#[derive(Debug, Deserialize)]
struct PostPayload {
    id: u64,
    post_number: u64,
    #[serde(default)]
    user_id: u64,
    #[serde(default)]
    username: String,
    #[serde(default)]
    cooked: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    post_number: u64,
}

#[derive(Debug, Deserialize)]
struct MarkReadResponse {
    #[serde(default)]
    success: Option<String>,
}

/// Talks to a Discourse instance as one API user.
#[derive(Clone)]
pub struct DiscourseClient {
    client: Client,
    base_url: String,
    username: String,
    api_key: String,
}

impl DiscourseClient {
    pub fn new(config: &ForumConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Api-Key", &self.api_key)
            .header("Api-Username", &self.username)
            .header("Accept", "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Api {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Forum(format!("Unexpected response: {}", e)))
    }
}

#[async_trait]
impl ForumClient for DiscourseClient {
    async fn list_unread(&self) -> Result<Vec<Notification>> {
        let list: NotificationList = self.json(self.client.get(self.url("/notifications.json"))).await?;
        let unread: Vec<Notification> = list
            .notifications
            .into_iter()
            .filter(|n| !n.read)
            .map(|n| Notification {
                id: n.id,
                topic_id: n.topic_id,
                read: n.read,
                created_at: n.created_at,
            })
            .collect();
        debug!("{} unread notification(s)", unread.len());
        Ok(unread)
    }

    async fn mark_read(&self, notification_id: u64) -> Result<bool> {
        let request = self
            .client
            .put(self.url("/notifications/mark-read.json"))
            .json(&json!({ "id": notification_id }));
        match self.json::<MarkReadResponse>(request).await {
            Ok(response) => Ok(response.success.map_or(true, |s| s.eq_ignore_ascii_case("ok"))),
            Err(Error::Api { status, body }) if status < 500 => {
                debug!("mark-read {} refused ({}): {}", notification_id, status, body);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn topic_posts(&self, topic_id: u64) -> Result<Topic> {
        let payload: TopicPayload = self
            .json(self.client.get(self.url(&format!("/t/{}.json", topic_id))))
            .await?;
        let posts = payload
            .post_stream
            .posts
            .into_iter()
            .map(|p| TopicPost {
                id: p.id,
                post_number: p.post_number,
                user_id: p.user_id,
                username: p.username,
                content: html_to_text(&p.cooked),
                created_at: p.created_at,
            })
            .collect();
        Ok(Topic {
            id: payload.id,
            title: payload.title,
            posts,
        })
    }

    async fn reply(&self, topic_id: u64, content: &str, reply_to_post_number: Option<u64>) -> Result<u64> {
        let mut body = json!({ "topic_id": topic_id, "raw": content });
        if let Some(number) = reply_to_post_number {
            body["reply_to_post_number"] = json!(number);
        }
        let created: CreatedPost = self
            .json(self.client.post(self.url("/posts.json")).json(&body))
            .await?;
        debug!("Posted #{} in topic {}", created.post_number, topic_id);
        Ok(created.post_number)
    }
}

/// Convert rendered post HTML to plain text, keeping paragraph breaks.
fn html_to_text(html: &str) -> String {
    let mut result = String::new();
    let mut tag = String::new();
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if matches!(name.as_str(), "br" | "p" | "li" | "blockquote" | "pre" | "h1" | "h2" | "h3" | "h4" | "div") {
                    result.push('\n');
                }
            }
            _ if in_tag => tag.push(c),
            _ => result.push(c),
        }
    }

    let decoded = result
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");

    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
