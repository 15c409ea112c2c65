//! Response multiplexer - renders an interleaved model stream as lines.
//!
//! One invocation produces reasoning, answer text, tool narration and tool
//! calls on a single stream. The multiplexer keeps a line buffer per channel
//! and flushes whichever buffer is open before another channel writes, so a
//! rendered line never mixes channels.
//!
//! | event               | effect                                          | next mode       |
//! |---------------------|-------------------------------------------------|-----------------|
//! | `ReasoningChunk`    | close tool buffer, append to main (reasoning)   | `Reasoning`     |
//! | `MessageChunk`      | close tool buffer, append to main (message)     | `Message`       |
//! | `ToolMessageChunk`  | close main, append to tool buffer               | `ToolReasoning` |
//! | `ToolCallAnnounced` | close main, close tool buffer, emit call line   | `Idle`          |
//! | `ToolCallResult`    | close main, close tool buffer                   | `Idle`          |
//! | end of stream       | close tool buffer, flush main, close block      | `Idle`          |

use tracing::debug;

use super::invoke::{EventSink, StreamEvent};

/// Which channel the multiplexer is currently rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Idle,
    Reasoning,
    Message,
    ToolReasoning,
}

/// Output channel of a rendered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// The model's own reasoning/answer stream.
    Main,
    /// Narration produced by a running tool.
    Tool,
}

/// One unit of console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedLine {
    /// A line of text; `reasoning` tells thinking apart from answer text.
    Text { channel: Channel, reasoning: bool, text: String },
    /// Start of a contiguous thinking block.
    OpenThinking { channel: Channel },
    /// End of a contiguous thinking block.
    CloseThinking { channel: Channel },
    /// A tool call, rendered atomically.
    ToolCall { name: String, arguments: String },
}

/// Where rendered lines go.
pub trait LineSink: Send {
    fn emit(&mut self, line: RenderedLine);
}

impl LineSink for Vec<RenderedLine> {
    fn emit(&mut self, line: RenderedLine) {
        self.push(line);
    }
}

/// Line buffer for one channel. Remembers whether the last rendered line was
/// part of a thinking block so boundary markers are emitted once per block.
#[derive(Debug)]
struct ChannelPrinter {
    channel: Channel,
    reasoning: bool,
    buffer: String,
    in_thinking: bool,
}

impl ChannelPrinter {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            reasoning: false,
            buffer: String::new(),
            in_thinking: false,
        }
    }

    fn put(&mut self, content: &str, reasoning: bool, sink: &mut dyn LineSink) {
        if content.is_empty() {
            return;
        }
        if reasoning != self.reasoning {
            self.flush(sink);
            self.reasoning = reasoning;
        }
        self.buffer.push_str(content);
        if let Some(pos) = self.buffer.rfind('\n') {
            let rest = self.buffer.split_off(pos + 1);
            let complete = std::mem::replace(&mut self.buffer, rest);
            self.render(&complete, sink);
        }
    }

    fn flush(&mut self, sink: &mut dyn LineSink) {
        let pending = std::mem::take(&mut self.buffer);
        self.render(&pending, sink);
    }

    /// Flush and end an open thinking block.
    fn close(&mut self, sink: &mut dyn LineSink) {
        self.flush(sink);
        if self.in_thinking {
            sink.emit(RenderedLine::CloseThinking { channel: self.channel });
            self.in_thinking = false;
        }
    }

    fn render(&mut self, content: &str, sink: &mut dyn LineSink) {
        let mut lines = content.split('\n').filter(|l| !l.trim().is_empty()).peekable();
        if lines.peek().is_none() {
            return;
        }
        if self.reasoning && !self.in_thinking {
            sink.emit(RenderedLine::OpenThinking { channel: self.channel });
            self.in_thinking = true;
        } else if !self.reasoning && self.in_thinking {
            sink.emit(RenderedLine::CloseThinking { channel: self.channel });
            self.in_thinking = false;
        }
        for line in lines {
            sink.emit(RenderedLine::Text {
                channel: self.channel,
                reasoning: self.reasoning,
                text: line.trim_end_matches('\r').to_string(),
            });
        }
    }
}

/// Turns [`StreamEvent`]s into [`RenderedLine`]s.
pub struct Multiplexer<S: LineSink> {
    sink: S,
    mode: RenderMode,
    main: ChannelPrinter,
    tool: Option<ChannelPrinter>,
}

impl<S: LineSink> Multiplexer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            mode: RenderMode::Idle,
            main: ChannelPrinter::new(Channel::Main),
            tool: None,
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::ReasoningChunk(text) => {
                self.close_tool();
                self.main.put(&text, true, &mut self.sink);
                self.mode = RenderMode::Reasoning;
            }
            StreamEvent::MessageChunk(text) => {
                self.close_tool();
                self.main.put(&text, false, &mut self.sink);
                self.mode = RenderMode::Message;
            }
            StreamEvent::ToolMessageChunk(text) => {
                self.main.close(&mut self.sink);
                self.tool
                    .get_or_insert_with(|| ChannelPrinter::new(Channel::Tool))
                    .put(&text, false, &mut self.sink);
                self.mode = RenderMode::ToolReasoning;
            }
            StreamEvent::ToolCallAnnounced { name, arguments } => {
                self.main.close(&mut self.sink);
                self.close_tool();
                self.sink.emit(RenderedLine::ToolCall { name, arguments });
                self.mode = RenderMode::Idle;
            }
            StreamEvent::ToolCallResult { name, is_error } => {
                self.main.close(&mut self.sink);
                self.close_tool();
                debug!("Tool {} finished (error: {})", name, is_error);
                self.mode = RenderMode::Idle;
            }
        }
    }

    /// End of stream: flush every open buffer once and return to `Idle`.
    pub fn finish(&mut self) {
        self.close_tool();
        self.main.close(&mut self.sink);
        self.mode = RenderMode::Idle;
    }

    /// Finish and hand back the sink.
    pub fn into_sink(mut self) -> S {
        self.finish();
        self.sink
    }

    fn close_tool(&mut self) {
        if let Some(mut tool) = self.tool.take() {
            tool.close(&mut self.sink);
        }
    }
}

impl<S: LineSink> EventSink for Multiplexer<S> {
    fn on_event(&mut self, event: StreamEvent) {
        self.handle(event);
    }
}
