//! The script injected into a page after it finishes loading.
//!
//! It asks the background whether the page should be intercepted and, if
//! so, covers it with a prompt offering to go back or continue anyway.

use std::io::{BufRead, Write};

use focuson::coordinator::is_privileged;
use focuson_ipc::{Message, Messenger, Reply};
use tracing::debug;

/// Element id guarding against a second overlay on the same page.
pub const OVERLAY_ID: &str = "focuson-blocker-overlay";

pub struct Prompt {
    pub title: &'static str,
    pub text: &'static str,
    pub stay: &'static str,
    pub proceed: &'static str,
}

pub const PROMPT: Prompt = Prompt {
    title: "⏰ Focus Mode Active",
    text: "Do you really want to access this page?",
    stay: "Stay Focused",
    proceed: "Continue Anyway",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    GoBack,
    ContinueAnyway,
}

/// What the agent can see and do in its page.
pub trait PageSurface {
    fn location(&self) -> &str;
    fn has_overlay(&self) -> bool;
    /// Cover the page with `prompt` and wait for the user's answer. The
    /// overlay stays until [`PageSurface::remove_overlay`].
    fn show_overlay(&mut self, prompt: &Prompt) -> Choice;
    fn remove_overlay(&mut self);
    fn history_len(&self) -> usize;
    fn history_back(&mut self);
    fn navigate(&mut self, url: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Privileged page, or an overlay is already up.
    Skipped,
    /// Not blocked, or the background did not answer.
    Untouched,
    WentBack,
    Continued,
}

pub struct PageAgent<M> {
    messenger: M,
    neutral_page: String,
}

impl<M: Messenger> PageAgent<M> {
    pub fn new(messenger: M, neutral_page: impl Into<String>) -> Self {
        Self {
            messenger,
            neutral_page: neutral_page.into(),
        }
    }

    pub async fn run<P: PageSurface>(&mut self, page: &mut P) -> Outcome {
        let url = page.location().to_string();
        if is_privileged(&url) {
            return Outcome::Skipped;
        }
        if page.has_overlay() {
            debug!(id = OVERLAY_ID, "overlay already present");
            return Outcome::Skipped;
        }

        let reply = self
            .messenger
            .send(Message::CheckShouldBlock {
                url: Some(url.clone()),
            })
            .await;
        if reply != Some(Reply::ShouldBlock { should_block: true }) {
            debug!(%url, ?reply, "page left alone");
            return Outcome::Untouched;
        }

        match page.show_overlay(&PROMPT) {
            Choice::GoBack => {
                page.remove_overlay();
                if page.history_len() > 1 {
                    page.history_back();
                } else {
                    page.navigate(&self.neutral_page);
                }
                Outcome::WentBack
            }
            Choice::ContinueAnyway => {
                self.messenger
                    .send(Message::AllowSiteTemporarily { url })
                    .await;
                page.remove_overlay();
                Outcome::Continued
            }
        }
    }
}

/// A page rendered in the terminal. The prompt is answered on `input`.
pub struct TerminalPage<R, W> {
    url: String,
    history: usize,
    overlay: bool,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalPage<R, W> {
    pub fn new(url: impl Into<String>, history: usize, input: R, output: W) -> Self {
        Self {
            url: url.into(),
            history,
            overlay: false,
            input,
            output,
        }
    }

    fn read_choice(&mut self) -> Choice {
        let mut line = String::new();
        loop {
            line.clear();
            match self.input.read_line(&mut line) {
                // Closing the prompt counts as staying focused.
                Ok(0) | Err(_) => return Choice::GoBack,
                Ok(_) => {}
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "1" | "s" | "stay" => return Choice::GoBack,
                "2" | "c" | "continue" => return Choice::ContinueAnyway,
                _ => {
                    let _ = write!(self.output, "Choose 1 or 2: ");
                    let _ = self.output.flush();
                }
            }
        }
    }
}

impl<R: BufRead, W: Write> PageSurface for TerminalPage<R, W> {
    fn location(&self) -> &str {
        &self.url
    }

    fn has_overlay(&self) -> bool {
        self.overlay
    }

    fn show_overlay(&mut self, prompt: &Prompt) -> Choice {
        self.overlay = true;
        let _ = writeln!(self.output, "\n  {}\n  {}\n", prompt.title, prompt.text);
        let _ = writeln!(self.output, "  [1] {}", prompt.stay);
        let _ = writeln!(self.output, "  [2] {}", prompt.proceed);
        let _ = write!(self.output, "> ");
        let _ = self.output.flush();
        self.read_choice()
    }

    fn remove_overlay(&mut self) {
        self.overlay = false;
    }

    fn history_len(&self) -> usize {
        self.history
    }

    fn history_back(&mut self) {
        self.history = self.history.saturating_sub(1);
        let _ = writeln!(self.output, "<- back");
    }

    fn navigate(&mut self, url: &str) {
        self.url = url.to_string();
        let _ = writeln!(self.output, "-> {url}");
    }
}
