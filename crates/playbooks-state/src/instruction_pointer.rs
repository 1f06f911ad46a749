//! Instruction pointers.
//!
//! An [`InstructionPointer`] identifies the next step of a playbook:
//! `(playbook, line_number, source_line_number, kind)`.  Line numbers use
//! dot-path notation (`"01"`, `"01.02"`, `"01.02.03"`) for nested steps.
//! The step kind suffix encodes the step's semantics in the compiled form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Step semantics, encoded as a three-letter suffix in PBASM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Queue/compute step.
    Que,
    /// Execute an action.
    Exe,
    /// Conditional.
    Cnd,
    /// Else branch.
    Els,
    /// Loop.
    Lop,
    /// Yield control.
    Yld,
    /// Return from the playbook.
    Ret,
    /// Thinking step (internal reasoning, not user-visible).
    Tnk,
}

impl StepKind {
    /// The PBASM suffix for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Que => "QUE",
            StepKind::Exe => "EXE",
            StepKind::Cnd => "CND",
            StepKind::Els => "ELS",
            StepKind::Lop => "LOP",
            StepKind::Yld => "YLD",
            StepKind::Ret => "RET",
            StepKind::Tnk => "TNK",
        }
    }
}

impl FromStr for StepKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUE" => Ok(StepKind::Que),
            "EXE" => Ok(StepKind::Exe),
            "CND" => Ok(StepKind::Cnd),
            "ELS" => Ok(StepKind::Els),
            "LOP" => Ok(StepKind::Lop),
            "YLD" => Ok(StepKind::Yld),
            "RET" => Ok(StepKind::Ret),
            "TNK" => Ok(StepKind::Tnk),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of the next step to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionPointer {
    /// Playbook name.
    pub playbook: String,
    /// Dot-path line number within the playbook (`"01"`, `"01.02"`).
    pub line_number: String,
    /// Line number in the authored source file, when known.
    pub source_line_number: u32,
    /// Step semantics, when the location string carried a kind suffix.
    pub kind: Option<StepKind>,
}

impl InstructionPointer {
    /// Pointer to the first step of `playbook`.
    pub fn start_of(playbook: impl Into<String>) -> Self {
        Self {
            playbook: playbook.into(),
            line_number: "01".to_string(),
            source_line_number: 0,
            kind: None,
        }
    }

    /// Parse a step location of the form `Playbook:Line` or
    /// `Playbook:Line:Type`.
    pub fn parse(location: &str) -> Result<Self, StateError> {
        let parts: Vec<&str> = location.split(':').collect();
        if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(StateError::InvalidStepLocation {
                location: location.to_string(),
                reason: "expected `Playbook:Line[:Type]`".to_string(),
            });
        }

        let kind = if parts.len() >= 3 {
            let parsed =
                StepKind::from_str(parts[2]).map_err(|_| StateError::InvalidStepLocation {
                    location: location.to_string(),
                    reason: format!("unknown step type `{}`", parts[2]),
                })?;
            Some(parsed)
        } else {
            None
        };

        Ok(Self {
            playbook: parts[0].to_string(),
            line_number: parts[1].to_string(),
            source_line_number: 0,
            kind,
        })
    }

    /// Whether this points at a thinking step.
    pub fn is_thinking(&self) -> bool {
        self.kind == Some(StepKind::Tnk)
    }
}

impl fmt::Display for InstructionPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{}:{}:{}", self.playbook, self.line_number, kind),
            None => write!(f, "{}:{}", self.playbook, self.line_number),
        }
    }
}
