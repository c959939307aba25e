//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::config::ClientConfig;
use crate::error::Result;

/// Default instructions sent with every model request.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert AI assistant that responds exactly like ChatGPT with perfect Markdown formatting. Always consider the full conversation history when replying. Format ALL responses using proper Markdown syntax for maximum clarity and visual appeal.

CRITICAL: Always use proper Markdown formatting in your responses:

**Code/Programming Responses:**
- Use fenced code blocks with language identifiers: ```python, ```javascript, etc.
- Include brief explanations before and after code
- Use `inline code` for variable names and short snippets

**Math/Problem-Solving:**
- Use numbered steps: **Step 1:**, **Step 2:**, etc.
- Format equations with LaTeX syntax: $x = \frac{-b \pm \sqrt{b^2-4ac}}{2a}$
- For complex math, use display mode: $$\int_0^\infty e^{-x^2} dx = \frac{\sqrt{\pi}}{2}$$
- Highlight final answers: **Answer: 42**
- Show all work and intermediate steps for math problems

**Reading Images and Documents:**
- When analyzing images, carefully read ALL visible text, equations, diagrams, and handwriting
- For math problems in images, transcribe the problem first, then solve it step-by-step
- For diagrams, describe what you see before answering questions about them
- Extract and interpret tables, charts, and graphs accurately

**Lists and Structure:**
- Use **bold** for headings and emphasis
- Use *italics* for subtle emphasis
- Use bullet points (- ) or numbered lists (1. )
- Use > blockquotes for important notes
- Use | tables | when | comparing | data |

**General Formatting:**
- Start responses with a brief, friendly acknowledgment
- Use clear headings with **bold text**
- Break up long responses with subheadings
- End with helpful follow-up questions when appropriate
- Keep paragraphs concise and well-spaced

Always format your entire response in Markdown - no exceptions. Make it visually appealing and easy to read, just like ChatGPT."#;

/// Greeting shown in a fresh conversation.
pub const DEFAULT_GREETING: &str = "Hi! I'm Gemini — how can I help today?";

/// Bot text appended when a reply could not be obtained.
pub const DEFAULT_ERROR_TEXT: &str = "⚠️ Sorry, I encountered an error. Please try again.";

/// Delay before a send is persisted in the background.
const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(100);

/// Two saves of the same utterance closer than this are one save.
const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(5);

/// Number of words in a derived conversation title.
const DEFAULT_TITLE_WORDS: usize = 4;

/// Command-line arguments for the parley-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Comma-separated backend origins, in priority order.
    #[arrrg(optional, "Backend origins, comma-separated (default: http://localhost:8080)", "URLS")]
    pub backends: Option<String>,

    /// YAML configuration file.
    #[arrrg(optional, "YAML configuration file", "PATH")]
    pub config: Option<String>,

    /// File the session is persisted to.
    #[arrrg(optional, "Persist the session to this JSON file", "PATH")]
    pub session_file: Option<String>,

    /// System prompt sent with every request.
    #[arrrg(optional, "System prompt for the model", "PROMPT")]
    pub system: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

impl ChatArgs {
    /// Resolve the client configuration these arguments describe.
    ///
    /// Command-line values take precedence over the file and environment.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::resolve(self.config.as_deref().map(std::path::Path::new))?;
        if let Some(list) = &self.backends {
            config = config.with_backend_list(list)?;
        }
        if let Some(path) = &self.session_file {
            config = config.with_session_file(Some(PathBuf::from(path)));
        }
        Ok(config)
    }
}

/// Configuration for a chat view.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Instructions prepended to every model request.
    pub system_prompt: String,

    /// Delay before background persistence runs.
    pub save_delay: Duration,

    /// Window within which identical messages are treated as duplicates.
    pub duplicate_window: Duration,

    /// Number of words kept in a derived title.
    pub title_words: usize,

    /// Bot greeting in new conversations.
    pub greeting: String,

    /// Bot text shown when a send fails.
    pub error_text: String,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Save delay: 100 ms
    /// - Duplicate window: 5 s
    /// - Title words: 4
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            save_delay: DEFAULT_SAVE_DELAY,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
            title_words: DEFAULT_TITLE_WORDS,
            greeting: DEFAULT_GREETING.to_string(),
            error_text: DEFAULT_ERROR_TEXT.to_string(),
            use_color: true,
        }
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the background save delay.
    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    /// Sets the duplicate window.
    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window = window;
        self
    }

    /// Sets the number of words in a derived title.
    pub fn with_title_words(mut self, words: usize) -> Self {
        self.title_words = words;
        self
    }

    /// Sets the greeting.
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Sets the failure text.
    pub fn with_error_text(mut self, text: impl Into<String>) -> Self {
        self.error_text = text.into();
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&ChatArgs> for ChatConfig {
    fn from(args: &ChatArgs) -> Self {
        let config = ChatConfig {
            use_color: !args.no_color,
            ..ChatConfig::new()
        };
        match &args.system {
            Some(prompt) => config.with_system_prompt(prompt.clone()),
            None => config,
        }
    }
}
