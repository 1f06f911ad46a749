//! PBASM program reader.
//!
//! The core consumes compiled playbook programs: a text document with
//! optional YAML-ish front matter and one or more `# AgentClass[:Kind]`
//! sections, each listing `## PlaybookName($args) -> Ret` playbooks with
//! `### Triggers` / `### Steps` / `### Notes` lists and an optional fenced
//! `python` code body.  Compiling authored `.pb` markdown into this form
//! is the compiler's job, not ours.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{Result, RuntimeError};

/// Agent kind suffix in a section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Ai,
    Human,
    Mcp,
}

/// One `## Playbook` block.
#[derive(Debug, Clone)]
pub struct PbasmPlaybook {
    pub name: String,
    /// Argument names, `$` stripped.
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    /// Prose between the header and the first subsection.
    pub description: String,
    pub triggers: Vec<String>,
    pub steps: Vec<String>,
    pub notes: Vec<String>,
    /// Fenced `python` body, when present (a Python playbook).
    pub code: Option<String>,
}

/// One `# AgentClass` section.
#[derive(Debug, Clone)]
pub struct PbasmAgent {
    pub klass: String,
    pub kind: AgentKind,
    pub description: String,
    pub playbooks: Vec<PbasmPlaybook>,
}

/// A parsed PBASM document.
#[derive(Debug, Clone)]
pub struct PbasmProgram {
    pub front_matter: BTreeMap<String, String>,
    pub agents: Vec<PbasmAgent>,
}

impl PbasmProgram {
    /// Agent section for `klass`, if declared.
    pub fn agent(&self, klass: &str) -> Option<&PbasmAgent> {
        self.agents.iter().find(|a| a.klass == klass)
    }
}

/// Parse a PBASM document.
pub fn parse_pbasm(source: &str) -> Result<PbasmProgram> {
    let agent_re = Regex::new(r"^#\s+([A-Za-z_][A-Za-z0-9_]*)(?::([A-Za-z]+))?\s*$")
        .expect("static regex");
    let playbook_re =
        Regex::new(r"^##\s+([A-Za-z_][A-Za-z0-9_]*)\(([^)]*)\)(?:\s*->\s*(.+))?\s*$")
            .expect("static regex");
    let subsection_re = Regex::new(r"^###\s+(\w+)\s*$").expect("static regex");

    let mut lines = source.lines().peekable();
    let front_matter = parse_front_matter(&mut lines)?;

    let mut agents: Vec<PbasmAgent> = Vec::new();
    let mut subsection: Option<String> = None;
    let mut in_code_fence = false;
    let mut code_acc = String::new();

    for line in lines {
        // Fenced code body for the current playbook.
        if in_code_fence {
            if line.trim_start().starts_with("```") {
                in_code_fence = false;
                if let Some(playbook) = current_playbook(&mut agents) {
                    playbook.code = Some(code_acc.trim_end().to_string());
                }
                code_acc.clear();
            } else {
                code_acc.push_str(line);
                code_acc.push('\n');
            }
            continue;
        }
        if line.trim_start().starts_with("```") {
            in_code_fence = true;
            continue;
        }

        if let Some(captures) = agent_re.captures(line) {
            let kind = match captures.get(2).map(|m| m.as_str().to_lowercase()) {
                None => AgentKind::Ai,
                Some(kind) => match kind.as_str() {
                    "ai" => AgentKind::Ai,
                    "human" => AgentKind::Human,
                    "mcp" => AgentKind::Mcp,
                    other => {
                        return Err(RuntimeError::load(format!(
                            "unknown agent kind `{other}` in `{line}`"
                        )));
                    }
                },
            };
            agents.push(PbasmAgent {
                klass: captures[1].to_string(),
                kind,
                description: String::new(),
                playbooks: Vec::new(),
            });
            subsection = None;
            continue;
        }

        if let Some(captures) = playbook_re.captures(line) {
            let Some(agent) = agents.last_mut() else {
                return Err(RuntimeError::load(format!(
                    "playbook `{line}` appears before any agent section"
                )));
            };
            let parameters = captures[2]
                .split(',')
                .map(|p| p.trim().trim_start_matches('$').to_string())
                .filter(|p| !p.is_empty())
                .collect();
            agent.playbooks.push(PbasmPlaybook {
                name: captures[1].to_string(),
                parameters,
                return_type: captures.get(3).map(|m| m.as_str().trim().to_string()),
                description: String::new(),
                triggers: Vec::new(),
                steps: Vec::new(),
                notes: Vec::new(),
                code: None,
            });
            subsection = None;
            continue;
        }

        if let Some(captures) = subsection_re.captures(line) {
            subsection = Some(captures[1].to_lowercase());
            continue;
        }

        // Content lines attach to the innermost open element.
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Prose before the first agent section is ignored.
        if agents.is_empty() {
            continue;
        }

        match &subsection {
            Some(section) => {
                let item = trimmed.trim_start_matches("- ").to_string();
                if let Some(playbook) = current_playbook(&mut agents) {
                    match section.as_str() {
                        "triggers" => playbook.triggers.push(item),
                        "steps" => playbook.steps.push(item),
                        "notes" => playbook.notes.push(item),
                        _ => {}
                    }
                }
            }
            None => {
                let agent = agents.last_mut().expect("checked non-empty");
                if let Some(playbook) = agent.playbooks.last_mut() {
                    if !playbook.description.is_empty() {
                        playbook.description.push(' ');
                    }
                    playbook.description.push_str(trimmed);
                } else {
                    if !agent.description.is_empty() {
                        agent.description.push(' ');
                    }
                    agent.description.push_str(trimmed);
                }
            }
        }
    }

    if in_code_fence {
        return Err(RuntimeError::load("unterminated code fence"));
    }
    if agents.is_empty() {
        return Err(RuntimeError::load("no agent sections found"));
    }

    Ok(PbasmProgram {
        front_matter,
        agents,
    })
}

fn current_playbook(agents: &mut [PbasmAgent]) -> Option<&mut PbasmPlaybook> {
    agents.last_mut()?.playbooks.last_mut()
}

fn parse_front_matter(
    lines: &mut std::iter::Peekable<std::str::Lines<'_>>,
) -> Result<BTreeMap<String, String>> {
    let mut front_matter = BTreeMap::new();
    if lines.peek().map(|l| l.trim()) != Some("---") {
        return Ok(front_matter);
    }
    lines.next();

    for line in lines.by_ref() {
        let trimmed = line.trim();
        if trimmed == "---" {
            return Ok(front_matter);
        }
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            return Err(RuntimeError::load(format!(
                "malformed front-matter line `{trimmed}`"
            )));
        };
        let key = key.trim().to_string();
        let value = value.trim().trim_matches('"').to_string();
        if front_matter.insert(key.clone(), value).is_some() {
            return Err(RuntimeError::load(format!(
                "duplicate front-matter key `{key}`"
            )));
        }
    }
    Err(RuntimeError::load("unterminated front matter"))
}
