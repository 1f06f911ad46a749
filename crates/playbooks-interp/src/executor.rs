//! The per-LLM-call execution pipeline.
//!
//! A [`StreamingExecutor`] lives for exactly one LLM call: chunks go in,
//! complete statements come out of the [`IncrementalCodeBuffer`] and are
//! executed immediately against the namespace and host.  After every
//! statement the namespace locals are mirrored into the frame
//! ([`CaptureHost::sync_locals`]) so a later `Yield` cannot lose them, and
//! the statement is appended to the executed-code record used for
//! checkpoint replay.
//!
//! The first failing statement halts the pipeline for the rest of the
//! call; subsequent chunks are ignored.  The failure is surfaced to the
//! next LLM call as an execution-result message, never to the human.

use std::collections::BTreeMap;

use playbooks_state::Value;

use crate::buffer::IncrementalCodeBuffer;
use crate::error::{InterpError, Result};
use crate::eval::{Evaluator, Namespace};
use crate::host::CaptureHost;
use crate::parser::parse;

/// Executes one LLM call's streamed code statement-by-statement.
pub struct StreamingExecutor {
    buffer: IncrementalCodeBuffer,
    namespace: Namespace,
    executed_statements: Vec<String>,
    skip_remaining: usize,
    halted: bool,
}

impl StreamingExecutor {
    /// Create an executor whose namespace is seeded with `locals`
    /// (persisted frame locals plus playbook arguments).
    pub fn new(locals: BTreeMap<String, Value>) -> Self {
        Self {
            buffer: IncrementalCodeBuffer::new(),
            namespace: Namespace::with_locals(locals),
            executed_statements: Vec::new(),
            skip_remaining: 0,
            halted: false,
        }
    }

    /// Checkpoint replay: record but do not re-execute the first `count`
    /// statements (their effects are already in the restored state).
    #[must_use]
    pub fn with_skipped_statements(mut self, count: usize) -> Self {
        self.skip_remaining = count;
        self
    }

    /// Feed a chunk; executes any statements that became complete.
    ///
    /// Returns the statements executed by this chunk.  After an error the
    /// executor is halted and further chunks are ignored.
    pub async fn add_chunk(
        &mut self,
        chunk: &str,
        host: &mut dyn CaptureHost,
    ) -> Result<Vec<String>> {
        if self.halted {
            return Ok(Vec::new());
        }
        let statements = self.buffer.add_chunk(chunk);
        self.execute_all(statements, host).await
    }

    /// End of stream: flush the buffer and execute what remains.
    ///
    /// A residue that still fails to parse is a terminal syntax error.
    pub async fn finalize(&mut self, host: &mut dyn CaptureHost) -> Result<Vec<String>> {
        if self.halted {
            return Ok(Vec::new());
        }
        let (statements, leftover) = self.buffer.finish();
        let executed = self.execute_all(statements, host).await?;
        if let Some(leftover) = leftover {
            self.halted = true;
            return Err(InterpError::syntax(format!(
                "incomplete code at end of response: {leftover}"
            )));
        }
        Ok(executed)
    }

    async fn execute_all(
        &mut self,
        statements: Vec<String>,
        host: &mut dyn CaptureHost,
    ) -> Result<Vec<String>> {
        let mut executed = Vec::new();
        for statement in statements {
            if self.skip_remaining > 0 {
                self.skip_remaining -= 1;
                self.executed_statements.push(statement);
                continue;
            }
            match self.execute_statement(&statement, host).await {
                Ok(()) => {
                    self.executed_statements.push(statement.clone());
                    executed.push(statement);
                }
                Err(error) => {
                    self.halted = true;
                    // Keep the failing statement in the record so a resume
                    // knows where execution stopped.
                    self.executed_statements.push(statement.clone());
                    tracing::error!(
                        statement = %statement,
                        error = %error,
                        "statement execution failed; halting this LLM call"
                    );
                    return Err(error);
                }
            }
        }
        Ok(executed)
    }

    async fn execute_statement(
        &mut self,
        statement: &str,
        host: &mut dyn CaptureHost,
    ) -> Result<()> {
        // Blank lines and pure comments are not code.
        let trimmed = statement.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }

        let stmts = parse(statement)?;
        Evaluator::new(&mut self.namespace, host)
            .exec_block(&stmts)
            .await?;

        host.sync_locals(&self.namespace.locals);
        Ok(())
    }

    /// All successfully executed statements, in order, joined by newlines.
    /// This is the replay record stored with each checkpoint.
    pub fn executed_code(&self) -> String {
        self.executed_statements.join("\n")
    }

    /// Current namespace locals.
    pub fn locals(&self) -> &BTreeMap<String, Value> {
        &self.namespace.locals
    }

    /// Whether an error has halted this call.
    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;

    #[tokio::test]
    async fn executes_statements_as_chunks_arrive() {
        let mut executor = StreamingExecutor::new(BTreeMap::new());
        let mut host = MockHost::new();

        let executed = executor
            .add_chunk("await Step(\"Hi:01:QUE\")\nawait Say(\"user\", ", &mut host)
            .await
            .expect("chunk");
        assert_eq!(executed.len(), 1);
        assert_eq!(host.result.steps.len(), 1);
        assert!(host.result.messages.is_empty());

        let executed = executor
            .add_chunk("\"Hello!\")\n", &mut host)
            .await
            .expect("chunk");
        assert_eq!(executed.len(), 1);
        assert_eq!(host.result.messages, vec![("user".into(), "Hello!".into())]);
    }

    #[tokio::test]
    async fn locals_are_mirrored_after_every_statement() {
        let mut executor = StreamingExecutor::new(BTreeMap::new());
        let mut host = MockHost::new();

        executor
            .add_chunk("x = 1\n", &mut host)
            .await
            .expect("chunk");
        assert_eq!(host.synced_locals.get("x"), Some(&Value::Int(1)));

        executor
            .add_chunk("y = x + 1\n", &mut host)
            .await
            .expect("chunk");
        assert_eq!(host.synced_locals.get("y"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn seeded_locals_are_visible() {
        let mut locals = BTreeMap::new();
        locals.insert("user_input".to_string(), Value::Str("John".into()));
        let mut executor = StreamingExecutor::new(locals);
        let mut host = MockHost::new();

        executor
            .add_chunk("greeting = f\"Hi {user_input}\"\n", &mut host)
            .await
            .expect("chunk");
        assert_eq!(
            executor.locals().get("greeting"),
            Some(&Value::Str("Hi John".into()))
        );
    }

    #[tokio::test]
    async fn runtime_error_halts_further_chunks() {
        let mut executor = StreamingExecutor::new(BTreeMap::new());
        let mut host = MockHost::new();

        let error = executor
            .add_chunk("x = 1 / 0\n", &mut host)
            .await
            .expect_err("division fails");
        assert!(matches!(error, InterpError::Runtime { .. }));
        assert!(executor.is_halted());

        // Subsequent chunks are ignored, not executed.
        let executed = executor
            .add_chunk("await Say(\"user\", \"never\")\n", &mut host)
            .await
            .expect("ignored");
        assert!(executed.is_empty());
        assert!(host.result.messages.is_empty());
    }

    #[tokio::test]
    async fn executed_code_records_statements() {
        let mut executor = StreamingExecutor::new(BTreeMap::new());
        let mut host = MockHost::new();

        executor.add_chunk("x = 1\n", &mut host).await.expect("chunk");
        executor.add_chunk("y = 2\n", &mut host).await.expect("chunk");
        assert_eq!(executor.executed_code(), "x = 1\ny = 2");
    }

    #[tokio::test]
    async fn finalize_flushes_and_reports_leftover() {
        let mut executor = StreamingExecutor::new(BTreeMap::new());
        let mut host = MockHost::new();

        executor.add_chunk("x = 5", &mut host).await.expect("chunk");
        let executed = executor.finalize(&mut host).await.expect("finalize");
        assert_eq!(executed, vec!["x = 5"]);

        let mut executor = StreamingExecutor::new(BTreeMap::new());
        executor
            .add_chunk("if incomplete:\n", &mut host)
            .await
            .expect("chunk");
        let error = executor.finalize(&mut host).await.expect_err("syntax");
        assert!(matches!(error, InterpError::Syntax { .. }));
    }

    #[tokio::test]
    async fn comments_and_blanks_are_skipped() {
        let mut executor = StreamingExecutor::new(BTreeMap::new());
        let mut host = MockHost::new();

        executor
            .add_chunk("# plan the greeting\nx = 1\n", &mut host)
            .await
            .expect("chunk");
        // Comments are recorded (replay needs the full text) but have no
        // effect on the namespace.
        assert_eq!(executor.executed_code(), "# plan the greeting\nx = 1");
        assert!(executor.locals().contains_key("x"));
    }

    #[tokio::test]
    async fn replaying_executed_code_rebuilds_state() {
        // What a checkpoint resume does: feed the recorded code to a fresh
        // executor in one shot.
        let mut original = StreamingExecutor::new(BTreeMap::new());
        let mut host = MockHost::new();
        original
            .add_chunk("x = 1\ny = x + 10\nself.state.total = y\n", &mut host)
            .await
            .expect("chunk");
        let record = original.executed_code();

        let mut replay_host = MockHost::new();
        let mut replayed = StreamingExecutor::new(BTreeMap::new());
        replayed
            .add_chunk(&format!("{record}\n"), &mut replay_host)
            .await
            .expect("replay");
        assert_eq!(replayed.locals().get("y"), Some(&Value::Int(11)));
        assert_eq!(replay_host.state_value("total"), Value::Int(11));
    }
}
