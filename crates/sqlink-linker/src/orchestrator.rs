//! The SQL-first schema-linking loop.
//!
//! One attempt = pick a variant, send the conversation, strip fences,
//! cross-check literals against the value index, guard, execute. Any
//! failure turns into a corrective user message and the next attempt runs
//! with a broader variant. The ladder is bounded by `max_retry`; when it
//! runs out, the last failure is surfaced. There is no path on which
//! unguarded SQL reaches the executor.

use crate::variants::{PromptVariant, PromptVariantBuilder};
use crate::{ChatMessage, LlmClient};
use sqlink_exec::{ExecError, QueryOutput, SqlExecutor};
use sqlink_guard::{extract_fields_and_literals, GuardError, SqlGuard};
use sqlink_index::SharedValueIndex;
use sqlink_profile::Field;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LinkerConfig {
    /// Additional attempts after the first one.
    pub max_retry: usize,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self { max_retry: 2 }
    }
}

/// The failure that ended an attempt; retries carry the most recent one.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to build prompt variants: {0}")]
    Context(#[source] anyhow::Error),
    #[error("no prompt variants could be built")]
    NoVariants,
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: usize, last: AttemptError },
}

/// A successfully linked and executed question.
#[derive(Debug)]
pub struct LinkOutcome {
    pub final_sql: String,
    /// Fields extracted from the finally-accepted SQL.
    pub linked_fields: HashSet<Field>,
    pub result: QueryOutput,
    pub attempts: usize,
}

/// Where the retry loop stands: which attempt, what went wrong so far,
/// and the correction messages appended to the next conversation.
#[derive(Debug, Default)]
struct AttemptState {
    attempt: usize,
    prior_errors: Vec<String>,
    correction_tail: Vec<ChatMessage>,
}

impl AttemptState {
    /// Records the model's previous answer and a correction for the next
    /// attempt.
    fn push_correction(&mut self, previous_sql: &str, correction: String, error: Option<String>) {
        self.correction_tail
            .push(ChatMessage::assistant(previous_sql));
        self.correction_tail.push(ChatMessage::user(correction));
        if let Some(error) = error {
            self.prior_errors.push(error);
        }
    }
}

/// Variant for an attempt: cheapest first, broader on retry, clamped at
/// the last (broadest) variant.
fn variant_for_attempt(attempt: usize, variants: &[PromptVariant]) -> &PromptVariant {
    let index = attempt.min(variants.len().saturating_sub(1));
    &variants[index]
}

/// Markdown fence stripping for models that ignore the SQL-only rule.
fn strip_code_fences(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```sql") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim().to_string()
}

pub struct SchemaLinker {
    llm: Arc<dyn LlmClient>,
    builder: PromptVariantBuilder,
    guard: SqlGuard,
    executor: Arc<dyn SqlExecutor>,
    value_index: Arc<SharedValueIndex>,
    config: LinkerConfig,
}

impl SchemaLinker {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        builder: PromptVariantBuilder,
        guard: SqlGuard,
        executor: Arc<dyn SqlExecutor>,
        value_index: Arc<SharedValueIndex>,
        config: LinkerConfig,
    ) -> Self {
        Self {
            llm,
            builder,
            guard,
            executor,
            value_index,
            config,
        }
    }

    /// Runs the full loop for one question on behalf of one tenant.
    pub async fn link(&self, question: &str, tenant_id: i64) -> Result<LinkOutcome, LinkError> {
        let variants = self
            .builder
            .build(question)
            .await
            .map_err(LinkError::Context)?;
        if variants.is_empty() {
            return Err(LinkError::NoVariants);
        }

        let total_attempts = self.config.max_retry + 1;
        let mut state = AttemptState::default();
        let mut last_error: Option<AttemptError> = None;

        for attempt in 0..total_attempts {
            state.attempt = attempt;
            let variant = variant_for_attempt(attempt, &variants);
            let mut conversation = variant.messages.clone();
            conversation.extend(state.correction_tail.iter().cloned());

            let raw = match self.llm.chat(&conversation).await {
                Ok(text) => text,
                // The loop needs text to react to; a transport failure
                // becomes a comment the parser will reject, which feeds
                // the normal correction path.
                Err(error) => {
                    warn!(%error, attempt, "llm call failed");
                    format!("-- llm_error: {error}")
                }
            };
            let sql = strip_code_fences(&raw);
            info!(
                attempt = state.attempt,
                variant = %variant.name,
                "generated candidate SQL"
            );

            // Literal agreement: a literal whose candidate columns are all
            // absent from the statement usually means the model filtered
            // the wrong column. Worth one revision while attempts remain.
            if attempt + 1 < total_attempts {
                if let Ok((fields, literals)) = extract_fields_and_literals(&sql) {
                    let (missing, candidates) = self.literal_disagreement(&fields, &literals);
                    if !missing.is_empty() {
                        info!(?missing, attempt, "literals disagree with value index");
                        state.push_correction(
                            &sql,
                            revision_request(&missing, &candidates),
                            None,
                        );
                        continue;
                    }
                }
            }

            let guarded = match self.guard.guard_and_rewrite(&sql, tenant_id) {
                Ok(guarded) => guarded,
                Err(error) => {
                    warn!(%error, attempt, "guard rejected candidate SQL");
                    state.push_correction(&sql, guard_correction(&error), Some(error.to_string()));
                    last_error = Some(error.into());
                    continue;
                }
            };

            match self.executor.run(&guarded.final_sql, tenant_id).await {
                Ok(result) => {
                    let linked_fields = extract_fields_and_literals(&guarded.final_sql)
                        .map(|(fields, _)| fields)
                        .unwrap_or_default();
                    info!(
                        attempts = attempt + 1,
                        rows = result.row_count,
                        "schema linking succeeded"
                    );
                    return Ok(LinkOutcome {
                        final_sql: guarded.final_sql,
                        linked_fields,
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    warn!(%error, attempt, "guarded execution failed");
                    state.push_correction(
                        &guarded.final_sql,
                        exec_correction(&error),
                        Some(error.to_string()),
                    );
                    last_error = Some(error.into());
                }
            }
        }

        warn!(
            attempts = total_attempts,
            errors = ?state.prior_errors,
            "schema linking exhausted retries"
        );
        let last = last_error.unwrap_or(AttemptError::Guard(GuardError::EmptySql));
        Err(LinkError::RetriesExhausted {
            attempts: total_attempts,
            last,
        })
    }

    /// Literals whose value-index candidates are all missing from the
    /// statement's fields, plus those candidate fields.
    fn literal_disagreement(
        &self,
        fields: &HashSet<Field>,
        literals: &HashSet<String>,
    ) -> (Vec<String>, BTreeSet<Field>) {
        let index = self.value_index.snapshot();
        let mut missing = Vec::new();
        let mut candidates = BTreeSet::new();
        let mut sorted: Vec<&String> = literals.iter().collect();
        sorted.sort();
        for literal in sorted {
            let found = index.lookup(literal);
            if !found.is_empty() && !found.iter().any(|f| fields.contains(f)) {
                missing.push(literal.clone());
                candidates.extend(found);
            }
        }
        (missing, candidates)
    }
}

fn revision_request(missing: &[String], candidates: &BTreeSet<Field>) -> String {
    let mut text = String::from(
        "Revise the SQL so that each of these literals appears in a field that actually contains it.\n\nMissing literals:\n",
    );
    for literal in missing {
        text.push_str(&format!("- {literal}\n"));
    }
    text.push_str("\nFields that contain them:\n");
    for field in candidates {
        text.push_str(&format!("- {field}\n"));
    }
    text.push_str("\nOutput SQL only.");
    text
}

fn guard_correction(error: &GuardError) -> String {
    format!(
        "The previous SQL was rejected: {error}. \
         Rewrite the query so it passes this check, using only the tables and columns in CONTEXT. \
         Output SQL only."
    )
}

fn exec_correction(error: &ExecError) -> String {
    match error {
        ExecError::Timeout { timeout_ms } => format!(
            "The previous query exceeded the {timeout_ms} ms time budget. \
             Write a cheaper query: fewer joins, more selective filters, smaller result. \
             Output SQL only."
        ),
        other => format!(
            "The previous query failed to execute: {other}. \
             Fix the query. Output SQL only."
        ),
    }
}
