//! Forum module - the agent's view of the forum it lives on.
//!
//! [`ForumClient`] is everything the agent loop and the forum tool need:
//! unread notifications, read-marking, topic contents and replying.
//! [`DiscourseClient`] implements it over the Discourse JSON API.

pub mod discourse;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub use discourse::DiscourseClient;

/// An unread notification for the agent's account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    /// Topic the notification points at, if any.
    pub topic_id: Option<u64>,
    #[serde(default)]
    pub read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// One post of a topic, with its body as plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicPost {
    pub id: u64,
    pub post_number: u64,
    pub user_id: u64,
    pub username: String,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A topic and the posts loaded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: u64,
    pub title: String,
    pub posts: Vec<TopicPost>,
}

/// Forum operations the agent relies on.
#[async_trait]
pub trait ForumClient: Send + Sync {
    /// Unread notifications, newest first.
    async fn list_unread(&self) -> Result<Vec<Notification>>;

    /// Mark one notification as read. Marking an already-read notification
    /// succeeds. Returns `false` when the forum refused.
    async fn mark_read(&self, notification_id: u64) -> Result<bool>;

    /// A topic with the posts the forum returns for it, bodies as plain text.
    async fn topic_posts(&self, topic_id: u64) -> Result<Topic>;

    /// Post `content` to a topic, optionally as a reply to a post number.
    /// Returns the new post's number.
    async fn reply(&self, topic_id: u64, content: &str, reply_to_post_number: Option<u64>) -> Result<u64>;
}

/// Scripted forum for testing.
#[cfg(test)]
#[derive(Default)]
pub struct FakeForum {
    pub unread: std::sync::Mutex<Vec<Notification>>,
    pub topics: std::sync::Mutex<std::collections::HashMap<u64, Topic>>,
    pub replies: std::sync::Mutex<Vec<(u64, String, Option<u64>)>>,
    /// Notification ids whose read-marking is refused.
    pub refuse_mark: std::collections::HashSet<u64>,
    pub mark_calls: std::sync::Mutex<Vec<u64>>,
}

#[cfg(test)]
impl FakeForum {
    pub fn with_notifications(topic_ids: &[Option<u64>]) -> Self {
        // Newest first, like the real API.
        let unread = topic_ids
            .iter()
            .enumerate()
            .rev()
            .map(|(i, topic_id)| Notification {
                id: 100 + i as u64,
                topic_id: *topic_id,
                read: false,
                created_at: None,
            })
            .collect();
        Self {
            unread: std::sync::Mutex::new(unread),
            ..Self::default()
        }
    }

    pub fn add_topic(&self, topic: Topic) {
        self.topics.lock().unwrap().insert(topic.id, topic);
    }
}

#[cfg(test)]
#[async_trait]
impl ForumClient for FakeForum {
    async fn list_unread(&self) -> Result<Vec<Notification>> {
        Ok(self.unread.lock().unwrap().iter().filter(|n| !n.read).cloned().collect())
    }

    async fn mark_read(&self, notification_id: u64) -> Result<bool> {
        self.mark_calls.lock().unwrap().push(notification_id);
        if self.refuse_mark.contains(&notification_id) {
            return Ok(false);
        }
        for n in self.unread.lock().unwrap().iter_mut() {
            if n.id == notification_id {
                n.read = true;
            }
        }
        Ok(true)
    }

    async fn topic_posts(&self, topic_id: u64) -> Result<Topic> {
        self.topics
            .lock()
            .unwrap()
            .get(&topic_id)
            .cloned()
            .ok_or_else(|| crate::error::Error::Forum(format!("topic {} not found", topic_id)))
    }

    async fn reply(&self, topic_id: u64, content: &str, reply_to_post_number: Option<u64>) -> Result<u64> {
        let mut replies = self.replies.lock().unwrap();
        replies.push((topic_id, content.to_string(), reply_to_post_number));
        Ok(replies.len() as u64 + 1)
    }
}
