//! Playbook model.
//!
//! A playbook is a named callable on one agent with a uniform contract:
//! `execute(args, kwargs) -> (success, result)`.  Markdown playbooks are
//! driven by the LLM loop (the dispatcher streams generated code through
//! the interpreter); Python playbooks carry a code body executed directly
//! by the interpreter, no LLM involved.

use playbooks_state::Value;

use crate::pbasm::PbasmPlaybook;

/// How a playbook executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybookKind {
    /// PBASM steps, interpreted via the LLM loop.
    Markdown,
    /// A code body executed directly.
    Python,
}

/// A callable playbook on one agent.
#[derive(Debug, Clone)]
pub struct Playbook {
    pub name: String,
    /// Argument names in declaration order.
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    pub description: String,
    pub triggers: Vec<String>,
    pub steps: Vec<String>,
    pub notes: Vec<String>,
    pub kind: PlaybookKind,
    /// The code body for Python playbooks.
    pub code: Option<String>,
}

impl Playbook {
    /// Build from a parsed PBASM block.
    pub fn from_pbasm(block: &PbasmPlaybook) -> Self {
        let kind = if block.code.is_some() {
            PlaybookKind::Python
        } else {
            PlaybookKind::Markdown
        };
        Self {
            name: block.name.clone(),
            parameters: block.parameters.clone(),
            return_type: block.return_type.clone(),
            description: block.description.clone(),
            triggers: block.triggers.clone(),
            steps: block.steps.clone(),
            notes: block.notes.clone(),
            kind,
            code: block.code.clone(),
        }
    }

    /// `Name($a, $b) -> Ret` signature line for prompts.
    pub fn signature(&self) -> String {
        let parameters: Vec<String> =
            self.parameters.iter().map(|p| format!("${p}")).collect();
        let mut signature = format!("{}({})", self.name, parameters.join(", "));
        if let Some(return_type) = &self.return_type {
            signature.push_str(&format!(" -> {return_type}"));
        }
        signature
    }

    /// Bind positional args and kwargs to parameter names.
    ///
    /// Extra positional args are dropped; kwargs override positional
    /// bindings of the same name; unknown kwargs bind anyway (the LLM may
    /// invent helpful names and the interpreter tolerates it).
    pub fn bind_arguments(
        &self,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> std::collections::BTreeMap<String, Value> {
        let mut bound = std::collections::BTreeMap::new();
        for (parameter, value) in self.parameters.iter().zip(args.iter()) {
            bound.insert(parameter.clone(), value.clone());
        }
        for (name, value) in kwargs {
            bound.insert(name.trim_start_matches('$').to_string(), value.clone());
        }
        bound
    }

    /// Whether any trigger marks this playbook as the program-start entry
    /// point (`BGN` trigger kind).
    pub fn is_begin_playbook(&self) -> bool {
        self.triggers.iter().any(|t| t.contains(":BGN"))
    }

    /// The PBASM body shown to the LLM when executing this playbook.
    pub fn render_for_prompt(&self) -> String {
        let mut rendered = format!("## {}\n", self.signature());
        if !self.description.is_empty() {
            rendered.push_str(&self.description);
            rendered.push('\n');
        }
        if !self.triggers.is_empty() {
            rendered.push_str("### Triggers\n");
            for trigger in &self.triggers {
                rendered.push_str(&format!("- {trigger}\n"));
            }
        }
        if !self.steps.is_empty() {
            rendered.push_str("### Steps\n");
            for step in &self.steps {
                rendered.push_str(&format!("- {step}\n"));
            }
        }
        if !self.notes.is_empty() {
            rendered.push_str("### Notes\n");
            for note in &self.notes {
                rendered.push_str(&format!("- {note}\n"));
            }
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playbook() -> Playbook {
        Playbook {
            name: "GetOrder".into(),
            parameters: vec!["order_id".into(), "retries".into()],
            return_type: Some("str".into()),
            description: "Fetch an order.".into(),
            triggers: vec!["T1:BGN When the program starts".into()],
            steps: vec!["01:QUE Look up the order".into()],
            notes: vec![],
            kind: PlaybookKind::Markdown,
            code: None,
        }
    }

    #[test]
    fn signature_renders_dollar_params() {
        assert_eq!(playbook().signature(), "GetOrder($order_id, $retries) -> str");
    }

    #[test]
    fn argument_binding() {
        let playbook = playbook();
        let bound = playbook.bind_arguments(
            &[Value::Int(7)],
            &[("retries".to_string(), Value::Int(3))],
        );
        assert_eq!(bound["order_id"], Value::Int(7));
        assert_eq!(bound["retries"], Value::Int(3));
    }

    #[test]
    fn kwargs_override_positional() {
        let playbook = playbook();
        let bound = playbook.bind_arguments(
            &[Value::Int(1), Value::Int(2)],
            &[("order_id".to_string(), Value::Int(9))],
        );
        assert_eq!(bound["order_id"], Value::Int(9));
    }

    #[test]
    fn begin_detection() {
        assert!(playbook().is_begin_playbook());
        let mut other = playbook();
        other.triggers = vec!["T1:MSG When the user asks".into()];
        assert!(!other.is_begin_playbook());
    }
}
