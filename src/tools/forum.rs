//! Forum tool - lets the model read topics and post replies

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_args, Tool, ToolContext, ToolOutput};
use crate::error::Error;
use crate::forum::{ForumClient, Topic};
use crate::Result;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ForumAction {
    ReadTopic {
        topic_id: u64,
    },
    Reply {
        topic_id: u64,
        content: String,
        #[serde(default)]
        reply_to_post_number: Option<u64>,
    },
}

/// Acts on the forum as the agent's account. Ids on the blacklist (users or
/// topics) are off limits.
pub struct ForumTool {
    forum: Arc<dyn ForumClient>,
    blacklist: BTreeSet<u64>,
}

impl ForumTool {
    pub fn new(forum: Arc<dyn ForumClient>, blacklist: BTreeSet<u64>) -> Self {
        Self { forum, blacklist }
    }

    fn check_topic(&self, topic_id: u64) -> Result<()> {
        if self.blacklist.contains(&topic_id) {
            Err(Error::Tool(format!("topic {} is blacklisted", topic_id)))
        } else {
            Ok(())
        }
    }

    fn render_topic(&self, topic: &Topic) -> String {
        let mut out = format!("Topic {}: {}\n", topic.id, topic.title);
        let mut hidden = 0;
        for post in &topic.posts {
            if self.blacklist.contains(&post.user_id) {
                hidden += 1;
                continue;
            }
            out.push_str(&format!(
                "\n#{} {} (user {}):\n{}\n",
                post.post_number, post.username, post.user_id, post.content
            ));
        }
        if hidden > 0 {
            out.push_str(&format!("\n[{} post(s) from blacklisted users omitted]\n", hidden));
        }
        out
    }
}

#[async_trait]
impl Tool for ForumTool {
    fn name(&self) -> &str { "forum" }

    fn description(&self) -> &str {
        "Act on the forum. action=read_topic returns all posts of a topic as plain text. \
         action=reply posts content to a topic, optionally as a reply to a post number."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["read_topic", "reply"],
                    "description": "What to do"
                },
                "topic_id": {
                    "type": "integer",
                    "description": "Topic to read or reply to"
                },
                "content": {
                    "type": "string",
                    "description": "Reply text (markdown), for action=reply"
                },
                "reply_to_post_number": {
                    "type": "integer",
                    "description": "Post number being answered, for action=reply"
                }
            },
            "required": ["action", "topic_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &mut ToolContext<'_>) -> Result<ToolOutput> {
        match parse_args::<ForumAction>(params)? {
            ForumAction::ReadTopic { topic_id } => {
                self.check_topic(topic_id)?;
                let topic = self.forum.topic_posts(topic_id).await?;
                ctx.progress(&format!("Read {} post(s) of topic {}\n", topic.posts.len(), topic_id));
                Ok(ToolOutput::text(self.render_topic(&topic)))
            }
            ForumAction::Reply { topic_id, content, reply_to_post_number } => {
                self.check_topic(topic_id)?;
                if content.trim().is_empty() {
                    return Err(Error::InvalidArguments("content must not be empty".into()));
                }
                if let Some(number) = reply_to_post_number {
                    let topic = self.forum.topic_posts(topic_id).await?;
                    let target = topic.posts.iter().find(|p| p.post_number == number);
                    if target.is_some_and(|p| self.blacklist.contains(&p.user_id)) {
                        return Err(Error::Tool(format!(
                            "post #{} in topic {} is by a blacklisted user",
                            number, topic_id
                        )));
                    }
                }
                let posted = self.forum.reply(topic_id, &content, reply_to_post_number).await?;
                info!("Replied in topic {} as post #{}", topic_id, posted);
                Ok(ToolOutput::text(format!("Posted reply #{} in topic {}", posted, topic_id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::StreamEvent;
    use crate::forum::{FakeForum, TopicPost};

    fn post(number: u64, user_id: u64, username: &str, content: &str) -> TopicPost {
        TopicPost {
            id: number * 10,
            post_number: number,
            user_id,
            username: username.into(),
            content: content.into(),
            created_at: None,
        }
    }

    fn forum() -> Arc<FakeForum> {
        let forum = FakeForum::default();
        forum.add_topic(Topic {
            id: 5,
            title: "Rust questions".into(),
            posts: vec![post(1, 2, "alice", "How do lifetimes work?"), post(2, 66, "troll", "spam spam")],
        });
        Arc::new(forum)
    }

    async fn run(tool: &ForumTool, params: Value) -> (Result<ToolOutput>, Vec<StreamEvent>) {
        let mut events: Vec<StreamEvent> = Vec::new();
        let result = tool.execute(params, &mut ToolContext::new(&mut events)).await;
        (result, events)
    }

    #[tokio::test]
    async fn test_read_topic_hides_blacklisted_users() {
        let tool = ForumTool::new(forum(), BTreeSet::from([66]));
        let (result, events) = run(&tool, json!({"action": "read_topic", "topic_id": 5})).await;
        let text = result.unwrap().text;
        assert!(text.contains("Topic 5: Rust questions"));
        assert!(text.contains("#1 alice (user 2):\nHow do lifetimes work?"));
        assert!(!text.contains("spam"));
        assert!(text.contains("1 post(s) from blacklisted users omitted"));
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_blacklisted_topic_is_refused() {
        let forum = forum();
        let tool = ForumTool::new(forum.clone(), BTreeSet::from([5]));
        let (result, _) = run(&tool, json!({"action": "read_topic", "topic_id": 5})).await;
        assert!(matches!(result, Err(Error::Tool(_))));

        let (result, _) = run(&tool, json!({"action": "reply", "topic_id": 5, "content": "hi"})).await;
        assert!(result.is_err());
        assert!(forum.replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reply() {
        let forum = forum();
        let tool = ForumTool::new(forum.clone(), BTreeSet::from([66]));
        let (result, _) = run(
            &tool,
            json!({"action": "reply", "topic_id": 5, "content": "Like this.", "reply_to_post_number": 1}),
        )
        .await;
        assert!(result.unwrap().text.contains("topic 5"));
        assert_eq!(
            forum.replies.lock().unwrap().clone(),
            vec![(5, "Like this.".to_string(), Some(1))]
        );
    }

    #[tokio::test]
    async fn test_reply_to_blacklisted_user_is_refused() {
        let forum = forum();
        let tool = ForumTool::new(forum.clone(), BTreeSet::from([66]));
        let (result, _) = run(
            &tool,
            json!({"action": "reply", "topic_id": 5, "content": "no", "reply_to_post_number": 2}),
        )
        .await;
        assert!(result.is_err());
        assert!(forum.replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let tool = ForumTool::new(forum(), BTreeSet::new());
        let (result, _) = run(&tool, json!({"action": "delete", "topic_id": 5})).await;
        assert!(matches!(result, Err(Error::InvalidArguments(_))));
    }
}
