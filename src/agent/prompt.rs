//! Prompt template rendering.

/// The per-cycle prompt with its `${...}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub const SELF_NAME: &'static str = "${self_name}";
    pub const TOPIC_ID: &'static str = "${topic_id}";
    pub const SELF_MEMORY: &'static str = "${self_memory}";

    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Substitute every placeholder. Topic ids render as a bracketed,
    /// comma-separated list (`[5, 9]`). Text the model wrote into memory is
    /// inserted last, so placeholders inside it are left as they are.
    pub fn render(&self, self_name: &str, topic_ids: &[u64], memory: &str) -> String {
        let topics = format!(
            "[{}]",
            topic_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
        );
        self.text
            .split(Self::SELF_MEMORY)
            .map(|part| part.replace(Self::SELF_NAME, self_name).replace(Self::TOPIC_ID, &topics))
            .collect::<Vec<_>>()
            .join(memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_all_placeholders() {
        let template = PromptTemplate::new("I am ${self_name}. Topics: ${topic_id}.\n${self_memory}\n(${self_name})");
        assert_eq!(
            template.render("breeze", &[5, 9], "remember alice"),
            "I am breeze. Topics: [5, 9].\nremember alice\n(breeze)"
        );
    }

    #[test]
    fn test_memory_is_not_expanded() {
        let template = PromptTemplate::new("${self_memory}|${topic_id}");
        assert_eq!(template.render("b", &[1], "${topic_id}"), "${topic_id}|[1]");
    }

    #[test]
    fn test_empty_topics() {
        assert_eq!(PromptTemplate::new("${topic_id}").render("b", &[], ""), "[]");
    }
}
