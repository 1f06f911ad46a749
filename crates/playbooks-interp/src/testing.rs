//! Test capture host shared by the evaluator and executor tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use playbooks_state::{InstructionPointer, Value};

use crate::error::{InterpError, Result};
use crate::host::CaptureHost;
use crate::result::ExecutionResult;

/// Recording host: captures directives into an [`ExecutionResult`] and a
/// flat in-memory state map.
pub(crate) struct MockHost {
    pub result: ExecutionResult,
    pub state: BTreeMap<String, Value>,
    pub calls: Vec<(String, Vec<Value>)>,
    pub synced_locals: BTreeMap<String, Value>,
    playbooks: Vec<String>,
    klasses: Vec<String>,
    playbook_returns: BTreeMap<String, Value>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            result: ExecutionResult::new(),
            state: BTreeMap::new(),
            calls: Vec::new(),
            synced_locals: BTreeMap::new(),
            playbooks: Vec::new(),
            klasses: Vec::new(),
            playbook_returns: BTreeMap::new(),
        }
    }

    pub fn with_playbook(mut self, name: &str) -> Self {
        self.playbooks.push(name.to_string());
        self
    }

    pub fn with_klass(mut self, name: &str) -> Self {
        self.klasses.push(name.to_string());
        self
    }

    #[allow(dead_code)]
    pub fn with_playbook_return(mut self, name: &str, value: Value) -> Self {
        self.playbooks.push(name.to_string());
        self.playbook_returns.insert(name.to_string(), value);
        self
    }

    pub fn state_value(&self, name: &str) -> Value {
        self.state.get(name).cloned().unwrap_or(Value::Null)
    }
}

#[async_trait]
impl CaptureHost for MockHost {
    async fn step(&mut self, location: &str) -> Result<()> {
        let pointer = InstructionPointer::parse(location)
            .map_err(|e| InterpError::runtime(e.to_string()))?;
        if pointer.is_thinking() {
            self.result.is_thinking = true;
        }
        self.result.steps.push(pointer);
        Ok(())
    }

    async fn say(&mut self, target: &str, message: &str) -> Result<()> {
        self.result
            .messages
            .push((target.to_string(), message.to_string()));
        Ok(())
    }

    async fn var(&mut self, name: &str, value: Value) -> Result<()> {
        self.result.vars.insert(name.to_string(), value.clone());
        self.state.insert(name.to_string(), value);
        Ok(())
    }

    async fn save_artifact(&mut self, name: &str, summary: &str, _content: &str) -> Result<()> {
        self.result.artifacts.push(name.to_string());
        self.state.insert(
            name.to_string(),
            Value::Artifact {
                name: name.to_string(),
                summary: summary.to_string(),
            },
        );
        Ok(())
    }

    async fn load_artifact(&mut self, name: &str) -> Result<Value> {
        Ok(Value::Str(format!("content of {name}")))
    }

    async fn log_trigger(&mut self, code: &str) -> Result<()> {
        self.result.triggers.push(code.to_string());
        Ok(())
    }

    async fn return_value(&mut self, value: Value) -> Result<()> {
        self.state.insert("_".to_string(), value.clone());
        self.result.mark_finished(Some(value));
        Ok(())
    }

    async fn yield_to(&mut self, target: &str) -> Result<()> {
        match target.to_lowercase().as_str() {
            "user" | "human" => self.result.mark_wait_for_user(),
            "exit" => self.result.mark_exit_program(),
            "return" => self.result.mark_finished(None),
            other => self.result.mark_wait_for_agent(other),
        }
        Ok(())
    }

    async fn wait_for_message(&mut self, source: &str) -> Result<Value> {
        Ok(Value::Str(format!("message from {source}")))
    }

    async fn call_playbook(
        &mut self,
        name: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        self.calls.push((name.to_string(), args));
        Ok(self
            .playbook_returns
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Str(format!("{name}-result"))))
    }

    fn is_agent_klass(&self, name: &str) -> bool {
        self.klasses.iter().any(|k| k == name)
    }

    fn is_playbook(&self, name: &str) -> bool {
        self.playbooks.iter().any(|p| p == name) || name.contains('.')
    }

    fn state_get(&self, path: &[&str]) -> Value {
        let Some(first) = path.first() else {
            return Value::Null;
        };
        let mut current = match self.state.get(*first) {
            Some(value) => value.clone(),
            None => return Value::Null,
        };
        for segment in &path[1..] {
            current = match current {
                Value::Map(map) => map.get(*segment).cloned().unwrap_or(Value::Null),
                _ => return Value::Null,
            };
        }
        current
    }

    async fn state_set(&mut self, path: &[&str], value: Value) -> Result<()> {
        match path {
            [] => Ok(()),
            [name] => {
                self.state.insert((*name).to_string(), value.clone());
                self.result.vars.insert((*name).to_string(), value);
                Ok(())
            }
            [first, rest @ ..] => {
                let mut root = self
                    .state
                    .get(*first)
                    .cloned()
                    .unwrap_or_else(|| Value::Map(BTreeMap::new()));
                let Value::Map(map) = &mut root else {
                    return Err(InterpError::runtime("path collision"));
                };
                set_nested(map, rest, value)?;
                self.state.insert((*first).to_string(), root);
                Ok(())
            }
        }
    }

    fn sync_locals(&mut self, locals: &BTreeMap<String, Value>) {
        self.synced_locals = locals.clone();
    }
}

fn set_nested(
    map: &mut BTreeMap<String, Value>,
    path: &[&str],
    value: Value,
) -> Result<()> {
    match path {
        [] => Ok(()),
        [leaf] => {
            map.insert((*leaf).to_string(), value);
            Ok(())
        }
        [segment, rest @ ..] => {
            let entry = map
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            let Value::Map(inner) = entry else {
                return Err(InterpError::runtime("path collision"));
            };
            set_nested(inner, rest, value)
        }
    }
}
