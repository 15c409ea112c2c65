//! Console output.
//!
//! Model output is line oriented: every [`RenderedLine`] becomes exactly one
//! colored line on stdout. Reasoning and answers are cyan with green thinking
//! tags, tool narration is yellow with blue tags, tool calls are purple.

use colored::*;

use crate::agent::{Channel, LineSink, RenderedLine};

pub fn print_breeze_header(model: &str, forum: &str) {
    let line = "─".repeat(60);
    println!("{}", line.black().bold());

    let name = "Breeze".cyan().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    let info = format!("  {}  •  {}", model, forum).cyan();
    println!("{}", info);

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

/// Style a rendered line for the terminal.
pub fn format_line(line: &RenderedLine) -> String {
    match line {
        RenderedLine::Text { channel: Channel::Main, text, .. } => text.cyan().to_string(),
        RenderedLine::Text { channel: Channel::Tool, text, .. } => text.yellow().to_string(),
        RenderedLine::OpenThinking { channel } => tag_color(*channel, "<thinking>"),
        RenderedLine::CloseThinking { channel } => tag_color(*channel, "</thinking>"),
        RenderedLine::ToolCall { name, arguments } => {
            format!("<tool: {}>{}</tool>", name, arguments).purple().to_string()
        }
    }
}

fn tag_color(channel: Channel, tag: &str) -> String {
    match channel {
        Channel::Main => tag.green().to_string(),
        Channel::Tool => tag.blue().to_string(),
    }
}

/// Writes rendered model output to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LineSink for ConsoleSink {
    fn emit(&mut self, line: RenderedLine) {
        println!("{}", format_line(&line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tool_call() {
        colored::control::set_override(false);
        let line = RenderedLine::ToolCall { name: "forum".into(), arguments: "{}".into() };
        assert_eq!(format_line(&line), "<tool: forum>{}</tool>");
    }

    #[test]
    fn test_format_tags() {
        colored::control::set_override(false);
        assert_eq!(format_line(&RenderedLine::OpenThinking { channel: Channel::Tool }), "<thinking>");
        assert_eq!(format_line(&RenderedLine::CloseThinking { channel: Channel::Main }), "</thinking>");
    }
}
