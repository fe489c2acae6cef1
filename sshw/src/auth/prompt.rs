//! Challenge/response prompting on the controlling terminal.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use crate::error::PromptError;

/// Source of answers for keyboard-interactive challenges and password fallback.
///
/// Implementations block; callers run them on the blocking pool.
pub trait Prompter: Send + Sync {
    /// Print `question` and read one answer.
    ///
    /// When `echo` is false the answer must not be echoed to the terminal.
    fn ask(&self, question: &str, echo: bool) -> Result<String, PromptError>;
}

/// Answer each `(question, echo)` pair in order.
pub fn answer_challenge<P>(
    prompter: &P,
    questions: &[(String, bool)],
) -> Result<Vec<String>, PromptError>
where
    P: Prompter + ?Sized,
{
    questions
        .iter()
        .map(|(question, echo)| prompter.ask(question, *echo))
        .collect()
}

/// Ask a single question on the blocking pool.
pub async fn ask_blocking(
    prompter: Arc<dyn Prompter>,
    question: String,
    echo: bool,
) -> Result<String, PromptError> {
    tokio::task::spawn_blocking(move || prompter.ask(&question, echo))
        .await
        .map_err(|e| PromptError::Io(io::Error::other(e)))?
}

/// Prompter reading from standard input.
///
/// Visible answers are read as a line from stdin; hidden answers go through
/// the terminal with echo disabled, followed by a newline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, question: &str, echo: bool) -> Result<String, PromptError> {
        let mut stdout = io::stdout();
        stdout.write_all(question.as_bytes())?;
        stdout.flush()?;

        if echo {
            read_visible_line(&mut io::stdin().lock())
        } else {
            let answer = rpassword::read_password().map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => PromptError::Closed,
                _ => PromptError::Io(e),
            })?;
            writeln!(stdout)?;
            Ok(answer)
        }
    }
}

fn read_visible_line<R: BufRead>(input: &mut R) -> Result<String, PromptError> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(PromptError::Closed);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}
