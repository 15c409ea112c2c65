//! Agent loop - one work cycle per tick
//!
//! A cycle collects the topics the agent was notified about, asks the model to
//! deal with them (it acts through the forum tool) and replaces the agent's
//! memory with whatever the model said. Cycles never overlap and the loop only
//! stops between them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::invoke::{invoke, InvocationOutcome};
use super::llm::ChatBackend;
use super::message::Message;
use super::multiplexer::{LineSink, Multiplexer};
use super::prompt::PromptTemplate;
use crate::config::{Config, ModelConfig, WebSearchConfig};
use crate::document::Normalizer;
use crate::forum::ForumClient;
use crate::memory::AgentStore;
use crate::tools::forum::ForumTool;
use crate::tools::read_image::{DescribeImageTool, PassThroughImageTool};
use crate::tools::web::WebSearchTool;
use crate::tools::ToolRegistry;
use crate::ui::ConsoleSink;
use crate::Result;

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to do; the model was not called.
    Idle,
    /// The model answered and its text replaced the memory.
    Committed { topics: Vec<u64> },
    /// The model answered without any text; memory kept as it was.
    MemoryUnchanged { topics: Vec<u64> },
    /// The model call failed; memory kept as it was.
    InvocationFailed { recoverable: bool },
}

/// Everything a cycle needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// The agent's forum username, substituted for `${self_name}`.
    pub username: String,
    pub model: ModelConfig,
    pub vlm: Option<ModelConfig>,
    pub web_search: WebSearchConfig,
    pub template: PromptTemplate,
    pub cycle_delay: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            username: config.forum.username.clone(),
            model: config.model.clone(),
            vlm: config.vlm.clone(),
            web_search: config.web_search.clone(),
            template: PromptTemplate::new(config.prompt_template()?),
            cycle_delay: config.cycle_delay(),
        })
    }
}

/// The autonomous agent
pub struct AgentLoop {
    forum: Arc<dyn ForumClient>,
    store: Arc<dyn AgentStore>,
    backend: Arc<dyn ChatBackend>,
    normalizer: Normalizer,
    settings: AgentSettings,
}

impl AgentLoop {
    pub fn new(
        forum: Arc<dyn ForumClient>,
        store: Arc<dyn AgentStore>,
        backend: Arc<dyn ChatBackend>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            forum,
            store,
            backend,
            normalizer: Normalizer::new(),
            settings,
        }
    }

    /// Run cycles until `shutdown` is set. Each tick waits the cycle delay,
    /// then runs one cycle to completion; a failed cycle is logged and the
    /// loop carries on.
    pub async fn run(&self, shutdown: &AtomicBool) {
        info!(
            "Agent {} started (model {}, every {:?})",
            self.settings.username, self.settings.model.name, self.settings.cycle_delay
        );
        loop {
            tokio::time::sleep(self.settings.cycle_delay).await;
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping");
                break;
            }
            match self.run_cycle().await {
                Ok(outcome) => debug!("Cycle finished: {:?}", outcome),
                Err(e) => error!("Cycle failed: {}", e),
            }
        }
    }

    /// Run one cycle, rendering model output to the console.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let mut output = Multiplexer::new(ConsoleSink);
        self.run_cycle_with(&mut output).await
    }

    /// Run one cycle, rendering model output through `output`.
    pub async fn run_cycle_with<S: LineSink>(&self, output: &mut Multiplexer<S>) -> Result<CycleOutcome> {
        let topics = self.collect_topics().await?;
        if topics.is_empty() {
            debug!("No new topics");
            return Ok(CycleOutcome::Idle);
        }
        info!("Working on topic(s) {:?}", topics);

        let memory = self.store.load_memory()?;
        let prompt = self.settings.template.render(&self.settings.username, &topics, &memory);

        let tools = self.build_tools()?.resolve(&self.settings.model)?;
        let outcome = invoke(
            self.backend.as_ref(),
            &self.settings.model,
            vec![Message::user(prompt)],
            &tools,
            None,
            &mut *output,
        )
        .await;
        output.finish();

        self.commit(outcome, topics)
    }

    /// Unread notifications in chronological order, each marked read, reduced
    /// to distinct topic ids in first-seen order.
    async fn collect_topics(&self) -> Result<Vec<u64>> {
        let mut notifications = self.forum.list_unread().await?;
        notifications.reverse();

        let mut topics = Vec::new();
        for notification in &notifications {
            match self.forum.mark_read(notification.id).await {
                Ok(true) => {}
                Ok(false) => error!("Forum refused to mark notification {} as read", notification.id),
                Err(e) => error!("Failed to mark notification {} as read: {}", notification.id, e),
            }
            if let Some(topic_id) = notification.topic_id {
                if !topics.contains(&topic_id) {
                    topics.push(topic_id);
                }
            }
        }
        Ok(topics)
    }

    fn build_tools(&self) -> Result<ToolRegistry> {
        let blacklist = self.store.load_blacklist()?;

        let mut registry = ToolRegistry::new();
        registry.register(ForumTool::new(Arc::clone(&self.forum), blacklist));
        registry.register(PassThroughImageTool::new(self.normalizer.clone()));
        registry.register(DescribeImageTool::new(
            Arc::clone(&self.backend),
            self.settings.vlm.clone(),
            self.normalizer.clone(),
        ));
        if let Some(search) = WebSearchTool::from_config(&self.settings.web_search) {
            registry.register(search);
        }
        Ok(registry)
    }

    fn commit(&self, outcome: InvocationOutcome, topics: Vec<u64>) -> Result<CycleOutcome> {
        match &outcome {
            InvocationOutcome::Success { usage, .. } => {
                info!(
                    "Model finished: {} prompt + {} completion tokens",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }
            InvocationOutcome::RecoverableError(message) => {
                warn!("Model call failed, will pick up new notifications next cycle: {}", message);
                return Ok(CycleOutcome::InvocationFailed { recoverable: true });
            }
            InvocationOutcome::UnknownError(e) => {
                error!("Model call failed: {}", e);
                return Ok(CycleOutcome::InvocationFailed { recoverable: false });
            }
        }

        let memory = outcome
            .assistant_texts()
            .into_iter()
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
            .trim()
            .to_string();
        if memory.is_empty() {
            info!("Model left no text, memory unchanged");
            return Ok(CycleOutcome::MemoryUnchanged { topics });
        }

        self.store.save_memory(&memory)?;
        info!("Memory updated ({} chars)", memory.len());
        Ok(CycleOutcome::Committed { topics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{tool_call, ChatDelta, FakeBackend};
    use crate::agent::multiplexer::{Channel, RenderedLine};
    use crate::agent::Role;
    use crate::error::Error;
    use crate::forum::{FakeForum, Topic, TopicPost};
    use crate::memory::InMemoryStore;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn settings(vision: bool) -> AgentSettings {
        AgentSettings {
            username: "breeze".into(),
            model: ModelConfig::test("main", vision),
            vlm: None,
            web_search: WebSearchConfig { api_key: String::new(), endpoint: "http://localhost".into() },
            template: PromptTemplate::new("I am ${self_name}. Topics: ${topic_id}. Memory: ${self_memory}"),
            cycle_delay: Duration::from_millis(1),
        }
    }

    struct Harness {
        forum: Arc<FakeForum>,
        store: Arc<InMemoryStore>,
        backend: Arc<FakeBackend>,
        agent: AgentLoop,
    }

    fn harness(forum: FakeForum, backend: FakeBackend, settings: AgentSettings) -> Harness {
        let forum = Arc::new(forum);
        let store = Arc::new(InMemoryStore::with_memory("old memory"));
        let backend = Arc::new(backend);
        let agent = AgentLoop::new(forum.clone(), store.clone(), backend.clone(), settings);
        Harness { forum, store, backend, agent }
    }

    async fn cycle(h: &Harness) -> (Result<CycleOutcome>, Vec<RenderedLine>) {
        let mut output = Multiplexer::new(Vec::new());
        let outcome = h.agent.run_cycle_with(&mut output).await;
        (outcome, output.into_sink())
    }

    #[tokio::test]
    async fn test_cycle_with_duplicate_topics_and_failed_mark() {
        // Chronological: 100 -> topic 5, 101 -> topic 5, 102 -> topic 9.
        let mut forum = FakeForum::with_notifications(&[Some(5), Some(5), Some(9)]);
        forum.refuse_mark.insert(101);
        let h = harness(forum, FakeBackend::text("Answered alice in 5 and bob in 9."), settings(false));

        let (outcome, lines) = cycle(&h).await;
        assert_eq!(outcome.unwrap(), CycleOutcome::Committed { topics: vec![5, 9] });

        assert_eq!(h.forum.mark_calls.lock().unwrap().clone(), vec![100, 101, 102]);
        let requests = h.backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, Role::User);
        assert_eq!(
            requests[0].messages[0].content,
            "I am breeze. Topics: [5, 9]. Memory: old memory"
        );
        assert_eq!(h.store.load_memory().unwrap(), "Answered alice in 5 and bob in 9.");
        assert_eq!(
            lines,
            vec![RenderedLine::Text {
                channel: Channel::Main,
                reasoning: false,
                text: "Answered alice in 5 and bob in 9.".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_idle_cycle_does_not_call_model() {
        let h = harness(FakeForum::default(), FakeBackend::new(vec![]), settings(false));
        let (outcome, lines) = cycle(&h).await;
        assert_eq!(outcome.unwrap(), CycleOutcome::Idle);
        assert!(h.backend.requests().is_empty());
        assert!(lines.is_empty());
        assert_eq!(h.store.load_memory().unwrap(), "old memory");
    }

    #[tokio::test]
    async fn test_notifications_without_topics_are_marked_but_idle() {
        let h = harness(FakeForum::with_notifications(&[None, None]), FakeBackend::new(vec![]), settings(false));
        let (outcome, _) = cycle(&h).await;
        assert_eq!(outcome.unwrap(), CycleOutcome::Idle);
        assert_eq!(h.forum.mark_calls.lock().unwrap().len(), 2);
        assert!(h.backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_invocation_keeps_memory() {
        let backend = FakeBackend::new(vec![Err(Error::Api { status: 503, body: "down".into() })]);
        let h = harness(FakeForum::with_notifications(&[Some(1)]), backend, settings(false));
        let (outcome, _) = cycle(&h).await;
        assert_eq!(outcome.unwrap(), CycleOutcome::InvocationFailed { recoverable: true });
        assert_eq!(h.store.load_memory().unwrap(), "old memory");

        // The notification was consumed; the next cycle has nothing to do.
        let (outcome, _) = cycle(&h).await;
        assert_eq!(outcome.unwrap(), CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_blank_answer_keeps_memory() {
        let h = harness(FakeForum::with_notifications(&[Some(1)]), FakeBackend::text("  \n "), settings(false));
        let (outcome, _) = cycle(&h).await;
        assert_eq!(outcome.unwrap(), CycleOutcome::MemoryUnchanged { topics: vec![1] });
        assert_eq!(h.store.load_memory().unwrap(), "old memory");
    }

    #[tokio::test]
    async fn test_memory_joins_every_assistant_turn() {
        let forum = FakeForum::with_notifications(&[Some(5)]);
        forum.add_topic(Topic {
            id: 5,
            title: "Hi".into(),
            posts: vec![TopicPost {
                id: 1,
                post_number: 1,
                user_id: 2,
                username: "alice".into(),
                content: "Hello bot".into(),
                created_at: None,
            }],
        });
        let backend = FakeBackend::new(vec![
            Ok(vec![
                ChatDelta::Reasoning("Read it first.\n".into()),
                ChatDelta::Content("Reading topic 5.".into()),
                tool_call("c1", "forum", json!({"action": "read_topic", "topic_id": 5})),
            ]),
            Ok(vec![
                tool_call("c2", "forum", json!({"action": "reply", "topic_id": 5, "content": "Hello alice!"})),
            ]),
            Ok(vec![ChatDelta::Content("  Greeted alice.  ".into())]),
        ]);
        let h = harness(forum, backend, settings(false));

        let (outcome, lines) = cycle(&h).await;
        assert_eq!(outcome.unwrap(), CycleOutcome::Committed { topics: vec![5] });
        assert_eq!(h.store.load_memory().unwrap(), "Reading topic 5.\n\n  Greeted alice.");
        assert_eq!(h.forum.replies.lock().unwrap().clone(), vec![(5, "Hello alice!".to_string(), None)]);

        assert_eq!(lines[0], RenderedLine::OpenThinking { channel: Channel::Main });
        assert!(lines.contains(&RenderedLine::ToolCall {
            name: "forum".into(),
            arguments: r#"{"action":"read_topic","topic_id":5}"#.into()
        }));
    }

    #[tokio::test]
    async fn test_tools_follow_model_capabilities() {
        let h = harness(FakeForum::with_notifications(&[Some(1)]), FakeBackend::text("ok"), settings(true));
        cycle(&h).await.0.unwrap();
        assert_eq!(h.backend.requests()[0].tool_names, vec!["forum", "read_image"]);

        // Text-only model without a vision helper: no image tool at all.
        let h = harness(FakeForum::with_notifications(&[Some(1)]), FakeBackend::text("ok"), settings(false));
        cycle(&h).await.0.unwrap();
        assert_eq!(h.backend.requests()[0].tool_names, vec!["forum"]);

        let mut with_helpers = settings(false);
        with_helpers.vlm = Some(ModelConfig::test("vlm", true));
        with_helpers.web_search.api_key = "key".into();
        let h = harness(FakeForum::with_notifications(&[Some(1)]), FakeBackend::text("ok"), with_helpers);
        cycle(&h).await.0.unwrap();
        assert_eq!(h.backend.requests()[0].tool_names, vec!["forum", "read_image", "web_search"]);
    }

    #[tokio::test]
    async fn test_malformed_image_url_does_not_abort_cycle() {
        let backend = FakeBackend::new(vec![
            Ok(vec![tool_call("c1", "read_image", json!({"image_urls": ["::not-a-url"]}))]),
            Ok(vec![ChatDelta::Content("The image link is broken.".into())]),
        ]);
        let h = harness(FakeForum::with_notifications(&[Some(3)]), backend, settings(true));

        let (outcome, _) = cycle(&h).await;
        assert_eq!(outcome.unwrap(), CycleOutcome::Committed { topics: vec![3] });

        let requests = h.backend.requests();
        let tool_message = requests[1].messages.last().unwrap();
        assert_eq!(tool_message.role, Role::Tool);
        assert!(tool_message.content.contains("::not-a-url"));
        assert!(tool_message.images.is_empty());
        assert_eq!(h.store.load_memory().unwrap(), "The image link is broken.");
    }

    #[tokio::test]
    async fn test_blacklist_reaches_forum_tool() {
        let forum = FakeForum::with_notifications(&[Some(7)]);
        let backend = FakeBackend::new(vec![
            Ok(vec![tool_call("c1", "forum", json!({"action": "reply", "topic_id": 7, "content": "hi"}))]),
            Ok(vec![ChatDelta::Content("Skipped topic 7.".into())]),
        ]);
        let h = harness(forum, backend, settings(false));
        h.store.save_blacklist(&BTreeSet::from([7])).unwrap();

        cycle(&h).await.0.unwrap();
        assert!(h.forum.replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_between_cycles() {
        let h = harness(FakeForum::default(), FakeBackend::new(vec![]), settings(false));
        let shutdown = AtomicBool::new(true);
        h.agent.run(&shutdown).await;
        assert!(h.backend.requests().is_empty());
    }
}
