//! Interactive secret prompting and password resolution.
//!
//! The same prompter answers SSH keyboard-interactive challenges, private
//! key passphrase prompts and database password prompts.

use crate::error::{HopError, HopResult};
use crate::models::ConnectionSpec;

use std::io::{BufRead, Write};

/// Environment variable consulted before prompting for a database password.
pub const PASSWORD_ENV: &str = "PGPASSWORD";

/// Question asked when a database password is missing.
pub const DATABASE_PASSWORD_QUESTION: &str = "database password: ";

/// Caller-supplied callback for secrets missing from configuration.
///
/// `questions` and `echos` are parallel; an answer is returned per question.
/// Questions with `echo == false` must be read without echoing input.
pub trait SecretPrompter: Send + Sync {
    /// Ask the user one or more questions.
    fn prompt(
        &self,
        label: &str,
        instruction: &str,
        questions: &[&str],
        echos: &[bool],
    ) -> HopResult<Vec<String>>;
}

impl<F> SecretPrompter for F
where
    F: Fn(&str, &str, &[&str], &[bool]) -> HopResult<Vec<String>> + Send + Sync,
{
    fn prompt(
        &self,
        label: &str,
        instruction: &str,
        questions: &[&str],
        echos: &[bool],
    ) -> HopResult<Vec<String>> {
        self(label, instruction, questions, echos)
    }
}

/// Prompter reading from the controlling terminal.
///
/// Non-echoed questions use masked input. Blocks the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl SecretPrompter for TerminalPrompter {
    fn prompt(
        &self,
        label: &str,
        instruction: &str,
        questions: &[&str],
        echos: &[bool],
    ) -> HopResult<Vec<String>> {
        let mut stderr = std::io::stderr();
        if !label.is_empty() || !instruction.is_empty() {
            let _ = writeln!(stderr, "{label}: {instruction}");
        }

        let mut answers = Vec::with_capacity(questions.len());
        for (i, question) in questions.iter().enumerate() {
            let echo = echos.get(i).copied().unwrap_or(false);
            let answer = if echo {
                let _ = write!(stderr, "{question}");
                let _ = stderr.flush();
                let mut line = String::new();
                std::io::stdin()
                    .lock()
                    .read_line(&mut line)
                    .map_err(|e| HopError::internal(format!("failed to read answer: {e}")))?;
                line.trim_end_matches(['\r', '\n']).to_string()
            } else {
                rpassword::prompt_password(question)
                    .map_err(|e| HopError::internal(format!("failed to read secret: {e}")))?
            };
            answers.push(answer);
        }

        Ok(answers)
    }
}

/// Ask a single question and return its answer.
pub fn prompt_one(
    prompter: &dyn SecretPrompter,
    label: &str,
    instruction: &str,
    question: &str,
    echo: bool,
) -> HopResult<String> {
    prompter
        .prompt(label, instruction, &[question], &[echo])?
        .into_iter()
        .next()
        .ok_or_else(|| HopError::internal(format!("no answer given for '{}'", question.trim())))
}

/// Resolve a secret: configured value, then environment override, then prompt.
///
/// Empty strings count as absent at every step.
pub fn resolve_secret(
    configured: Option<&str>,
    env_override: Option<String>,
    prompter: &dyn SecretPrompter,
    question: &str,
) -> HopResult<String> {
    if let Some(value) = configured.filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }

    if let Some(value) = env_override.filter(|v| !v.is_empty()) {
        tracing::debug!(env = PASSWORD_ENV, "Using password from environment");
        return Ok(value);
    }

    prompt_one(prompter, "", "", question, false)
}

/// Resolve the password for a database connection.
pub fn resolve_database_password(
    spec: &ConnectionSpec,
    prompter: &dyn SecretPrompter,
) -> HopResult<String> {
    resolve_secret(
        spec.password.as_deref(),
        std::env::var(PASSWORD_ENV).ok(),
        prompter,
        DATABASE_PASSWORD_QUESTION,
    )
    .map_err(|e| e.context(format!("connection '{}'", spec.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedPrompter;

    #[test]
    fn test_configured_value_wins() {
        let prompter = ScriptedPrompter::new(["prompted"]);
        let secret =
            resolve_secret(Some("configured"), Some("env".into()), &prompter, "pw: ").unwrap();
        assert_eq!(secret, "configured");
        assert_eq!(prompter.calls(), 0);
    }

    #[test]
    fn test_env_override_before_prompt() {
        let prompter = ScriptedPrompter::new(["prompted"]);
        let secret = resolve_secret(None, Some("env".into()), &prompter, "pw: ").unwrap();
        assert_eq!(secret, "env");
        assert_eq!(prompter.calls(), 0);
    }

    #[test]
    fn test_prompts_without_echo() {
        let prompter = ScriptedPrompter::new(["prompted"]);
        let secret = resolve_secret(Some(""), None, &prompter, "pw: ").unwrap();
        assert_eq!(secret, "prompted");
        assert_eq!(prompter.calls(), 1);
        assert_eq!(prompter.last_questions(), vec![("pw: ".to_string(), false)]);
    }

    #[test]
    fn test_closure_prompter() {
        let prompter =
            |_: &str, _: &str, questions: &[&str], _: &[bool]| -> HopResult<Vec<String>> {
                Ok(questions.iter().map(|q| q.to_uppercase()).collect())
            };
        let answer = prompt_one(&prompter, "", "", "abc", true).unwrap();
        assert_eq!(answer, "ABC");
    }

    #[test]
    fn test_empty_answer_list_is_error() {
        let prompter =
            |_: &str, _: &str, _: &[&str], _: &[bool]| -> HopResult<Vec<String>> { Ok(Vec::new()) };
        assert!(prompt_one(&prompter, "", "", "abc", true).is_err());
    }
}
