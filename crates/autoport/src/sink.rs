use std::{
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use services::services::status::StatusSink;

/// Prints status segments to a terminal. Edits only ever append lines, so
/// an edit prints whatever the previous emission of the segment did not.
pub struct TerminalSink<W> {
    state: Mutex<SinkState<W>>,
}

struct SinkState<W> {
    out: W,
    printed: String,
}

impl TerminalSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(SinkState {
                out,
                printed: String::new(),
            }),
        }
    }

    pub fn into_inner(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .out
    }

    fn emit(&self, text: &str, fresh: bool) -> io::Result<()> {
        let body = unfence(text);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let delta = match body.strip_prefix(state.printed.as_str()) {
            Some(rest) if !fresh => rest,
            _ => body,
        };
        state.out.write_all(delta.as_bytes())?;
        state.out.flush()?;
        state.printed = body.to_string();
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> StatusSink for TerminalSink<W> {
    async fn send_new(&self, text: &str) -> io::Result<()> {
        self.emit(text, true)
    }

    async fn edit_current(&self, text: &str) -> io::Result<()> {
        self.emit(text, false)
    }
}

fn unfence(text: &str) -> &str {
    let text = text.strip_prefix("```\n").unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text)
}
