use anyhow::{anyhow, bail};
use ragstream_client::{Citation, QueryMode};
use ragstream_session::{
    ChatController, ConversationEvent, SessionError, SessionSnapshot, SessionState,
};
use std::io::{self, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;

const HELP: &str = "\
Commands:
  <text>          ask a question (streamed)
  /query <text>   ask through the non-streaming endpoint
  /mode <mode>    switch retrieval mode (naive, local, global, hybrid)
  /clear          clear the conversation
  /help           show this help
  /quit           exit
Ctrl+C stops a streaming answer; at the prompt it exits.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Ask(String),
    Query(String),
    Mode(QueryMode),
    Clear,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::Empty);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Ask(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        match name {
            "quit" | "exit" => Ok(Command::Quit),
            "clear" => Ok(Command::Clear),
            "help" => Ok(Command::Help),
            "mode" if arg.is_empty() => bail!("Usage: /mode <naive|local|global|hybrid>"),
            "mode" => Ok(Command::Mode(arg.parse::<QueryMode>().map_err(|e| anyhow!("{}", e))?)),
            "query" if arg.is_empty() => bail!("Usage: /query <text>"),
            "query" => Ok(Command::Query(arg.to_string())),
            other => bail!("Unknown command: /{} (try /help)", other),
        }
    }
}

/// Turns controller events into terminal output.
///
/// Tracks how much of the current answer is on screen, so deltas that were
/// already covered by a [`resync`](Self::resync) are not printed twice.
#[derive(Debug, Default)]
pub struct Renderer {
    show_citations: bool,
    session_id: Option<Uuid>,
    rendered: usize,
    citations: Vec<Citation>,
    aborted: bool,
    finished: bool,
}

impl Renderer {
    pub fn new(show_citations: bool) -> Self {
        Self {
            show_citations,
            ..Self::default()
        }
    }

    fn start(&mut self, session_id: Uuid) {
        self.session_id = Some(session_id);
        self.rendered = 0;
        self.citations.clear();
        self.aborted = false;
        self.finished = false;
    }

    pub fn render(&mut self, event: &ConversationEvent, out: &mut impl Write) -> io::Result<()> {
        if let Some(session_id) = event.session_id() {
            if self.session_id != Some(session_id) {
                self.start(session_id);
            }
        }

        match event {
            ConversationEvent::SessionStarted { session_id, .. } => self.start(*session_id),
            ConversationEvent::AnswerDelta { offset, text, .. } => {
                let end = offset + text.len();
                if end > self.rendered {
                    let skip = self.rendered.saturating_sub(*offset);
                    if let Some(rest) = text.get(skip..) {
                        out.write_all(rest.as_bytes())?;
                        out.flush()?;
                    }
                    self.rendered = end;
                }
            }
            ConversationEvent::CitationsUpdated { citations, .. } => {
                for citation in citations {
                    if !self.citations.iter().any(|c| c.chunk_id == citation.chunk_id) {
                        self.citations.push(citation.clone());
                    }
                }
            }
            ConversationEvent::AbortRequested { .. } => self.aborted = true,
            ConversationEvent::SessionFinished { error, .. } => {
                self.finished = true;
                writeln!(out)?;
                if let Some(error) = error {
                    writeln!(out, "[error] {}", error)?;
                } else if self.aborted {
                    writeln!(out, "[interrupted]")?;
                }
                if self.show_citations && !self.citations.is_empty() {
                    writeln!(out, "Sources:")?;
                    for (i, c) in self.citations.iter().enumerate() {
                        writeln!(
                            out,
                            "  [{}] {} (chunk {}, score {:.2})",
                            i + 1,
                            c.filename,
                            c.chunk_id,
                            c.score
                        )?;
                    }
                }
            }
            ConversationEvent::Cleared => writeln!(out, "Conversation cleared")?,
            ConversationEvent::MessageAppended { .. } => {}
        }
        Ok(())
    }

    /// Catch up with the controller after events were lost: print the part
    /// of the answer not yet on screen and take over its citations.
    pub fn resync(&mut self, snapshot: Option<&SessionSnapshot>, out: &mut impl Write) -> io::Result<()> {
        let Some(snapshot) = snapshot else {
            return Ok(());
        };
        if self.session_id != Some(snapshot.id) {
            self.start(snapshot.id);
        }

        if let Some(rest) = snapshot.answer.get(self.rendered..) {
            out.write_all(rest.as_bytes())?;
            out.flush()?;
        }
        self.rendered = snapshot.answer.len();
        self.citations = snapshot.citations.clone();
        if snapshot.state == SessionState::Aborting {
            self.aborted = true;
        }
        Ok(())
    }

    /// Close out a finished exchange whose `SessionFinished` event never
    /// arrived.
    pub fn settle(
        &mut self,
        snapshot: &SessionSnapshot,
        error: Option<String>,
        out: &mut impl Write,
    ) -> io::Result<()> {
        self.resync(Some(snapshot), out)?;
        if self.finished {
            return Ok(());
        }
        self.render(
            &ConversationEvent::SessionFinished {
                session_id: snapshot.id,
                state: snapshot.state,
                error,
            },
            out,
        )
    }
}

/// Read commands from stdin until EOF, `/quit` or Ctrl+C at the prompt.
pub async fn run(controller: ChatController, config: &Config) -> anyhow::Result<()> {
    let mut repl = Repl::new(
        controller,
        listen_for_interrupts(),
        config.chat.show_citations,
        io::stdout(),
    );
    let lines = BufReader::new(tokio::io::stdin()).lines();

    writeln!(
        repl.out,
        "Connected to {} (mode: {}). Type /help for commands.",
        config.client.base_url, config.client.default_mode
    )?;
    repl.run(lines, config.client.default_mode, config.chat.use_fallback)
        .await
}

/// Forward every Ctrl+C for the life of the process.
///
/// Once tokio has seen a `ctrl_c()` it owns SIGINT, so a single listener
/// must keep running or the prompt can no longer be interrupted.
fn listen_for_interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl+C: {}", e);
                return;
            }
            if tx.send(()).is_err() {
                return;
            }
        }
    });
    rx
}

struct Repl<W> {
    controller: ChatController,
    events: broadcast::Receiver<ConversationEvent>,
    interrupts: mpsc::UnboundedReceiver<()>,
    renderer: Renderer,
    out: W,
}

impl<W: Write> Repl<W> {
    fn new(
        controller: ChatController,
        interrupts: mpsc::UnboundedReceiver<()>,
        show_citations: bool,
        out: W,
    ) -> Self {
        Self {
            events: controller.subscribe(),
            controller,
            interrupts,
            renderer: Renderer::new(show_citations),
            out,
        }
    }

    async fn run<R>(&mut self, mut lines: Lines<R>, mut mode: QueryMode, fallback: bool) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            self.prompt(mode)?;
            let line = tokio::select! {
                line = lines.next_line() => line?,
                Some(()) = self.interrupts.recv() => None,
            };
            let Some(line) = line else {
                writeln!(self.out)?;
                return Ok(());
            };

            match Command::parse(&line) {
                Ok(Command::Empty) => {}
                Ok(Command::Quit) => return Ok(()),
                Ok(Command::Help) => writeln!(self.out, "{}", HELP)?,
                Ok(Command::Mode(next)) => {
                    mode = next;
                    writeln!(self.out, "Mode set to {}", mode)?;
                }
                Ok(Command::Clear) => {
                    if let Err(e) = self.controller.clear_messages() {
                        eprintln!("{}", e);
                    }
                    self.drain()?;
                }
                Ok(Command::Ask(query)) => self.ask(query, mode, fallback).await?,
                Ok(Command::Query(query)) => self.ask(query, mode, true).await?,
                Err(e) => eprintln!("{}", e),
            }
        }
    }

    /// Run one exchange, rendering events as they arrive. Ctrl+C aborts it.
    async fn ask(&mut self, query: String, mode: QueryMode, fallback: bool) -> anyhow::Result<()> {
        let controller = self.controller.clone();
        let exchange = async move {
            if fallback {
                controller.query_once(query, mode).await
            } else {
                controller.send_message(query, mode).await
            }
        };
        tokio::pin!(exchange);

        let result = loop {
            tokio::select! {
                result = &mut exchange => break result,
                event = self.events.recv() => match event {
                    Ok(event) => self.renderer.render(&event, &mut self.out)?,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Renderer lagged, {} events skipped", n);
                        self.resync()?;
                    }
                    Err(RecvError::Closed) => {}
                },
                Some(()) = self.interrupts.recv() => {
                    if self.controller.abort_stream() {
                        tracing::debug!("Abort requested from terminal");
                    }
                }
            }
        };
        self.drain()?;

        // Presses that arrived while the exchange was ending must not quit
        // the prompt.
        while self.interrupts.try_recv().is_ok() {}

        match result {
            Ok(snapshot) => {
                tracing::debug!(session_id = %snapshot.id, state = ?snapshot.state, "Exchange finished");
                let error = match snapshot.state {
                    SessionState::Errored => self.controller.last_error(),
                    _ => None,
                };
                self.renderer.settle(&snapshot, error, &mut self.out)?;
            }
            Err(SessionError::InvalidQuery(e)) => eprintln!("{}", e),
            Err(e) => eprintln!("Message not sent: {}", e),
        }
        Ok(())
    }

    fn drain(&mut self) -> io::Result<()> {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.renderer.render(&event, &mut self.out)?,
                Err(TryRecvError::Lagged(n)) => {
                    tracing::warn!("Renderer lagged, {} events skipped", n);
                    self.resync()?;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            }
        }
    }

    fn resync(&mut self) -> io::Result<()> {
        let snapshot = self.controller.session();
        self.renderer.resync(snapshot.as_ref(), &mut self.out)
    }

    fn prompt(&mut self, mode: QueryMode) -> io::Result<()> {
        write!(self.out, "[{}] > ", mode)?;
        self.out.flush()
    }
}
