// Interactive REPL against one route

use anyhow::Result;
use std::io::{self, Write};

use crate::errors::{RouterError, SessionError};
use crate::router::{Route, Router};

use super::input::InputHandler;

pub const USER_PROMPT: &str = "User :> ";
pub const AGENT_PROMPT: &str = "Agent :> ";

/// What the REPL should do with one line of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput<'a> {
    Quit,
    Skip,
    Message(&'a str),
}

impl<'a> ReplInput<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ReplInput::Skip;
        }
        match line.to_ascii_lowercase().as_str() {
            "exit" | "quit" | "/exit" | "/quit" => ReplInput::Quit,
            _ => ReplInput::Message(line),
        }
    }
}

pub struct Repl {
    router: Router,
    route: String,
}

impl Repl {
    pub fn new(router: Router, route: impl Into<String>) -> Result<Self, RouterError> {
        let route = route.into();
        router.resolve(&route)?;
        Ok(Self { router, route })
    }

    pub async fn run(&self) -> Result<()> {
        let mut input = InputHandler::new()?;
        println!("Krypton - route '{}'. Type 'exit' or 'quit' to leave.\n", self.route);

        while let Some(line) = input.read_line(USER_PROMPT)? {
            match ReplInput::parse(&line) {
                ReplInput::Quit => break,
                ReplInput::Skip => continue,
                ReplInput::Message(message) => {
                    if let Err(e) = self.answer(message).await {
                        eprintln!("\nError: {}\n", e);
                    }
                }
            }
        }

        if let Err(e) = input.save_history() {
            tracing::warn!("{}", e);
        }
        Ok(())
    }

    async fn answer(&self, message: &str) -> Result<()> {
        let route = self.router.resolve(&self.route)?;
        if route.tools.is_empty() {
            return stream_answer(route, message).await;
        }

        let outcome = self.router.dispatch(&self.route, message).await?;
        println!("{}{}\n", AGENT_PROMPT, outcome.answer);
        Ok(())
    }
}

/// Tool-less routes print tokens as they arrive
async fn stream_answer(route: &Route, message: &str) -> Result<()> {
    let mut rx = route.stream_reply(message).await?;
    let mut stdout = io::stdout();
    write!(stdout, "{}", AGENT_PROMPT)?;
    stdout.flush()?;

    while let Some(chunk) = rx.recv().await {
        let text = chunk.map_err(SessionError::Backend)?;
        write!(stdout, "{}", text)?;
        stdout.flush()?;
    }
    writeln!(stdout, "\n")?;
    Ok(())
}
