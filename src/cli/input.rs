// Readline input handler with history and editing support

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;

pub struct InputHandler {
    editor: DefaultEditor,
    history_path: Option<PathBuf>,
}

impl InputHandler {
    /// Create new input handler; history lives in ~/.krypton/history.txt
    pub fn new() -> Result<Self> {
        let mut editor = DefaultEditor::new().context("Failed to initialize readline editor")?;

        let history_path = dirs::home_dir().map(|home| home.join(".krypton").join("history.txt"));
        if let Some(path) = history_path.as_ref().filter(|p| p.exists()) {
            if let Err(e) = editor.load_history(path) {
                tracing::debug!("Ignoring unreadable history {}: {}", path.display(), e);
            }
        }

        Ok(Self {
            editor,
            history_path,
        })
    }

    /// Read a line of input
    ///
    /// Returns:
    /// - `Ok(Some(line))` - user entered text (trimmed)
    /// - `Ok(None)` - user pressed Ctrl+C or Ctrl+D
    pub fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                let line = line.trim().to_string();
                if !line.is_empty() {
                    self.editor
                        .add_history_entry(&line)
                        .context("Failed to add history entry")?;
                }
                Ok(Some(line))
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
            Err(err) => Err(err).context("Failed to read input"),
        }
    }

    pub fn save_history(&mut self) -> Result<()> {
        let Some(path) = &self.history_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        self.editor
            .save_history(path)
            .with_context(|| format!("Failed to save history to {}", path.display()))?;
        Ok(())
    }
}
