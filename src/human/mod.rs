//! Human input handling.
//!
//! A task flagged `human_input` cannot execute until input has been
//! collected; the execution controller asks the configured handler for
//! it. A handler returning an error means "input unavailable", which is
//! fatal for that task.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::AgentError;

/// Collects input from a human operator.
#[async_trait]
pub trait HumanInputHandler: Send + Sync {
    /// Request input for the given prompt. `options`, when non-empty,
    /// enumerates acceptable answers.
    async fn request_input(
        &self,
        prompt: &str,
        options: &[String],
        cancel: &CancellationToken,
    ) -> Result<String, AgentError>;
}

/// Console handler reading one line from stdin on a blocking thread.
pub struct ConsoleInputHandler {
    timeout: Duration,
}

impl ConsoleInputHandler {
    /// Create a handler with the given wait timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ConsoleInputHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl HumanInputHandler for ConsoleInputHandler {
    async fn request_input(
        &self,
        prompt: &str,
        options: &[String],
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let prompt = prompt.to_string();
        let options = options.to_vec();

        let read = tokio::task::spawn_blocking(move || -> Result<String, AgentError> {
            println!("\n--- Human Input Required ---");
            println!("{prompt}");
            if !options.is_empty() {
                println!("Options: {}", options.join(", "));
            }
            print!("> ");
            io::stdout().flush().ok();

            let stdin = io::stdin();
            let mut line = String::new();
            stdin
                .lock()
                .read_line(&mut line)
                .map_err(|e| AgentError::HumanInputUnavailable(e.to_string()))?;
            Ok(line.trim().to_string())
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            _ = tokio::time::sleep(self.timeout) => Err(AgentError::HumanInputUnavailable(
                format!("no input within {:?}", self.timeout),
            )),
            joined = read => match joined {
                Ok(result) => result,
                Err(e) => Err(AgentError::HumanInputUnavailable(e.to_string())),
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn scripted_handler_answers() {
        let handler = ScriptedInputHandler {
            answer: "approved".to_string(),
        };
        let answer = handler
            .request_input("Proceed?", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, "approved");
    }

    #[tokio::test]
    async fn unavailable_handler_errors() {
        let handler = UnavailableInputHandler;
        let err = handler
            .request_input("Proceed?", &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::HumanInputUnavailable(_)));
    }
}
