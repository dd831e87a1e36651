//! Bounded generate-and-validate loop for SQL statements.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::prompts::sql_prompt;
use crate::config::DEFAULT_MAX_SQL_ATTEMPTS;
use crate::llm::{strip_code_fence, CompletionRequest, CompletionService};
use crate::models::StoredTable;
use crate::repository::TableStore;

const STATEMENT_KEYWORDS: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "WITH"];
const MUTATING_KEYWORDS: &[&str] = &["INSERT", "UPDATE", "DELETE"];

#[derive(Debug, Clone)]
pub struct SqlGeneratorConfig {
    pub max_attempts: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound for one completion request.
    pub attempt_timeout: Duration,
    /// Accept INSERT/UPDATE/DELETE statements.
    pub allow_mutations: bool,
}

impl Default for SqlGeneratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_SQL_ATTEMPTS,
            max_tokens: 200,
            temperature: 0.0,
            attempt_timeout: Duration::from_secs(30),
            allow_mutations: false,
        }
    }
}

/// Why one attempt did not produce a usable statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    Request(String),
    Timeout,
    NotSql(String),
    MutationRefused(String),
    Invalid { statement: String, error: String },
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Request(e) => write!(f, "completion request failed: {}", e),
            AttemptFailure::Timeout => write!(f, "completion request timed out"),
            AttemptFailure::NotSql(text) => write!(f, "response was not a SQL statement: {}", text),
            AttemptFailure::MutationRefused(statement) => write!(
                f,
                "the database is read-only but the statement modifies data: {}",
                statement
            ),
            AttemptFailure::Invalid { statement, error } => {
                write!(f, "statement `{}` failed validation: {}", statement, error)
            }
        }
    }
}

/// Result of a generation run.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// The validated statement, or `None` when every attempt failed.
    pub statement: Option<String>,
    pub attempts: u32,
    pub failures: Vec<AttemptFailure>,
}

/// Turn a model response into a candidate statement.
///
/// Fences are removed, the text must start with an allowed keyword and a
/// terminating `;` is added when missing.
pub fn extract_statement(response: &str) -> Option<String> {
    let statement = strip_code_fence(response).trim();
    let keyword = first_keyword(statement)?;
    if !STATEMENT_KEYWORDS
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
    {
        return None;
    }

    let mut statement = statement.to_string();
    if !statement.ends_with(';') {
        statement.push(';');
    }
    Some(statement)
}

/// Whether a statement starts with INSERT, UPDATE or DELETE.
pub fn is_mutating(statement: &str) -> bool {
    first_keyword(statement)
        .map(|keyword| MUTATING_KEYWORDS.iter().any(|k| keyword.eq_ignore_ascii_case(k)))
        .unwrap_or(false)
}

fn first_keyword(statement: &str) -> Option<&str> {
    statement
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .filter(|word| !word.is_empty())
}

/// Generates SQL for a question and proves it runs against the store.
pub struct SqlGenerator {
    llm: Arc<dyn CompletionService>,
    config: SqlGeneratorConfig,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn CompletionService>, config: SqlGeneratorConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &SqlGeneratorConfig {
        &self.config
    }

    /// Run up to `max_attempts` generate-and-validate rounds.
    ///
    /// Returns at the first statement that passes a dry run against the
    /// current store. Every failure, including transport errors, only ends
    /// the current attempt.
    pub async fn generate(
        &self,
        question: &str,
        tables: &[StoredTable],
        store: &TableStore,
    ) -> GenerationOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut failures: Vec<AttemptFailure> = Vec::new();

        for attempt in 1..=max_attempts {
            let previous = failures.last().map(|f| f.to_string());
            match self
                .attempt(question, tables, store, attempt, previous.as_deref())
                .await
            {
                Ok(statement) => {
                    info!("Generated SQL on attempt {}/{}", attempt, max_attempts);
                    return GenerationOutcome {
                        statement: Some(statement),
                        attempts: attempt,
                        failures,
                    };
                }
                Err(failure) => {
                    warn!(
                        "SQL attempt {}/{} failed: {}",
                        attempt, max_attempts, failure
                    );
                    failures.push(failure);
                }
            }
        }

        warn!("No valid SQL after {} attempts", max_attempts);
        GenerationOutcome {
            statement: None,
            attempts: max_attempts,
            failures,
        }
    }

    async fn attempt(
        &self,
        question: &str,
        tables: &[StoredTable],
        store: &TableStore,
        attempt: u32,
        previous_failure: Option<&str>,
    ) -> Result<String, AttemptFailure> {
        let prompt = sql_prompt(
            question,
            tables,
            attempt,
            previous_failure,
            self.config.allow_mutations,
        );
        let request = CompletionRequest::prompt(prompt)
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);

        let response = tokio::time::timeout(self.config.attempt_timeout, self.llm.complete(request))
            .await
            .map_err(|_| AttemptFailure::Timeout)?
            .map_err(|e| AttemptFailure::Request(e.to_string()))?;

        let statement = extract_statement(&response.text).ok_or_else(|| {
            AttemptFailure::NotSql(response.text.chars().take(80).collect())
        })?;

        if !self.config.allow_mutations && is_mutating(&statement) {
            return Err(AttemptFailure::MutationRefused(statement));
        }

        store
            .dry_run(&statement)
            .await
            .map_err(|e| AttemptFailure::Invalid {
                statement: statement.clone(),
                error: e.to_string(),
            })?;

        Ok(statement)
    }
}
