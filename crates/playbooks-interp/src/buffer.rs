//! Incremental code buffering.
//!
//! LLM chunks arrive as arbitrary string slices.  The buffer assembles
//! them into lines (dropping ``` fence lines), accumulates the lines, and
//! carves off complete statements as soon as they can be executed:
//!
//! - a single-line statement is complete when it parses and does not end
//!   with `:`;
//! - a compound statement (header ending in `:`) stays open until a line
//!   dedents to the header's indentation or less -- `else`/`elif` headers
//!   at the same indentation merely keep the compound open because the
//!   parse check fails on a dangling header;
//! - anything with unbalanced brackets or an unterminated string waits for
//!   more input.
//!
//! Whether a prefix "parses" is decided by the real parser, so the buffer
//! and the executor can never disagree about statement boundaries.

use crate::parser::parse;

/// Accumulates streamed code and yields executable statements.
#[derive(Debug, Default)]
pub struct IncrementalCodeBuffer {
    /// Partial current line (no newline seen yet).
    line_acc: String,
    /// Complete lines not yet carved into statements.
    buffer: String,
    /// How far into `buffer` lines have been examined.
    processed_up_to: usize,
}

impl IncrementalCodeBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk; returns any statements that became complete.
    pub fn add_chunk(&mut self, chunk: &str) -> Vec<String> {
        let mut statements = Vec::new();
        for c in chunk.chars() {
            self.line_acc.push(c);
            if c == '\n' {
                let line = std::mem::take(&mut self.line_acc);
                if is_fence_line(&line) {
                    continue;
                }
                self.buffer.push_str(&line);
                statements.extend(self.extract_complete_statements());
            }
        }
        statements
    }

    /// Flush at end of stream.
    ///
    /// Returns `(statements, leftover)`: statements completed by the final
    /// (possibly newline-less) line, plus any residue that still does not
    /// form a complete statement -- the caller decides whether that residue
    /// is a terminal syntax error.
    pub fn finish(&mut self) -> (Vec<String>, Option<String>) {
        let mut statements = Vec::new();
        if !self.line_acc.is_empty() {
            let mut line = std::mem::take(&mut self.line_acc);
            if !is_fence_line(&line) {
                line.push('\n');
                self.buffer.push_str(&line);
                statements.extend(self.extract_complete_statements());
            }
        }

        let remainder = self.buffer.trim_end_matches('\n');
        if remainder.trim().is_empty() {
            self.buffer.clear();
            self.processed_up_to = 0;
            return (statements, None);
        }

        // The stream is over: a still-open compound is executable now if it
        // parses (nothing can close it further).
        if parses(remainder) {
            statements.push(remainder.to_string());
            self.buffer.clear();
            self.processed_up_to = 0;
            return (statements, None);
        }

        let leftover = remainder.to_string();
        self.buffer.clear();
        self.processed_up_to = 0;
        (statements, Some(leftover))
    }

    /// Whether unprocessed content is waiting.
    pub fn has_buffered_content(&self) -> bool {
        !self.buffer.trim().is_empty() || !self.line_acc.trim().is_empty()
    }

    /// Current buffered content (for diagnostics).
    pub fn buffered(&self) -> String {
        format!("{}{}", self.buffer, self.line_acc)
    }

    /// Core carving loop over complete lines.
    fn extract_complete_statements(&mut self) -> Vec<String> {
        let mut statements = Vec::new();
        let mut new_content = self.buffer[self.processed_up_to..].to_string();

        while let Some(newline_pos) = new_content.find('\n') {
            let line = new_content[..newline_pos].to_string();
            new_content = new_content[newline_pos + 1..].to_string();
            self.processed_up_to += newline_pos + 1;

            // Blank line after complete accumulated code closes it.
            let before_len = self.processed_up_to - line.len() - 1;
            let accumulated_before = self.buffer[..before_len]
                .trim_end_matches('\n')
                .to_string();
            if line.trim().is_empty() && !accumulated_before.is_empty() {
                if is_complete_statement(&accumulated_before) {
                    statements.push(accumulated_before);
                    self.buffer = self.buffer[self.processed_up_to..].to_string();
                    self.processed_up_to = 0;
                    continue;
                }
            }

            let accumulated = self.buffer[..self.processed_up_to]
                .trim_end_matches('\n')
                .to_string();
            if !is_complete_statement(&accumulated) {
                continue;
            }

            let lines: Vec<&str> = accumulated.split('\n').collect();
            if lines.len() == 1 {
                if !line.trim_end().ends_with(':') {
                    statements.push(accumulated);
                    self.buffer = self.buffer[self.processed_up_to..].to_string();
                    self.processed_up_to = 0;
                }
                continue;
            }

            let first_indent = indent_of(lines[0]);
            let last_indent = indent_of(lines[lines.len() - 1]);
            if last_indent > first_indent {
                // Still inside the compound.
                continue;
            }

            if lines[0].trim_end().ends_with(':') {
                // The dedented line closed the block: emit the block and
                // requeue the dedented line for reprocessing.
                let block = lines[..lines.len() - 1].join("\n");
                statements.push(block);
                let requeued = format!("{}\n", lines[lines.len() - 1]);
                self.buffer =
                    format!("{}{}", requeued, &self.buffer[self.processed_up_to..]);
                self.processed_up_to = 0;
                new_content = self.buffer.clone();
            } else {
                statements.push(accumulated);
                self.buffer = self.buffer[self.processed_up_to..].to_string();
                self.processed_up_to = 0;
            }
        }

        statements
    }
}

fn is_fence_line(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// A statement is complete when strings and brackets balance, it does not
/// end with a dangling `:`, and it parses.
fn is_complete_statement(code: &str) -> bool {
    if code.trim().is_empty() {
        return true;
    }
    if has_unclosed_triple_quotes(code) {
        return false;
    }
    if has_unclosed_brackets(code) {
        return false;
    }
    if code.trim_end().ends_with(':') {
        return false;
    }
    parses(code)
}

fn parses(code: &str) -> bool {
    parse(code).is_ok()
}

fn has_unclosed_triple_quotes(code: &str) -> bool {
    code.matches("\"\"\"").count() % 2 == 1 || code.matches("'''").count() % 2 == 1
}

/// Bracket balance scan, skipping brackets inside string literals.
fn has_unclosed_brackets(code: &str) -> bool {
    let chars: Vec<char> = code.chars().collect();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut string_delim = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' || c == '\'' {
            let triple: String = chars[i..chars.len().min(i + 3)].iter().collect();
            if triple.len() == 3 && (triple == "\"\"\"" || triple == "'''") {
                if !in_string {
                    in_string = true;
                    string_delim = triple;
                    i += 3;
                    continue;
                } else if string_delim == triple {
                    in_string = false;
                    string_delim.clear();
                    i += 3;
                    continue;
                }
            }
            if !in_string {
                in_string = true;
                string_delim = c.to_string();
            } else if string_delim.len() == 1
                && string_delim.chars().next() == Some(c)
                && (i == 0 || chars[i - 1] != '\\')
            {
                in_string = false;
                string_delim.clear();
            }
        }

        if !in_string {
            match c {
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(expected) {
                        return true;
                    }
                }
                _ => {}
            }
        }

        i += 1;
    }

    // An unterminated single-line string also means "wait for more".
    in_string && string_delim.len() == 1 || !stack.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_statement_per_line() {
        let mut buffer = IncrementalCodeBuffer::new();
        let statements = buffer.add_chunk("x = 1\ny = 2\n");
        assert_eq!(statements, vec!["x = 1", "y = 2"]);
        assert!(!buffer.has_buffered_content());
    }

    #[test]
    fn statement_split_across_chunks() {
        let mut buffer = IncrementalCodeBuffer::new();
        assert!(buffer.add_chunk("await Say(\"user\"").is_empty());
        assert!(buffer.add_chunk(", \"Hel").is_empty());
        let statements = buffer.add_chunk("lo!\")\n");
        assert_eq!(statements, vec!["await Say(\"user\", \"Hello!\")"]);
    }

    #[test]
    fn fences_are_stripped() {
        let mut buffer = IncrementalCodeBuffer::new();
        let mut statements = buffer.add_chunk("```python\nx = 1\n");
        statements.extend(buffer.add_chunk("```\n"));
        assert_eq!(statements, vec!["x = 1"]);
    }

    #[test]
    fn fence_split_across_chunks() {
        let mut buffer = IncrementalCodeBuffer::new();
        let mut statements = buffer.add_chunk("``");
        statements.extend(buffer.add_chunk("`python\n"));
        statements.extend(buffer.add_chunk("x = 1\n"));
        assert_eq!(statements, vec!["x = 1"]);
    }

    #[test]
    fn compound_waits_for_dedent() {
        let mut buffer = IncrementalCodeBuffer::new();
        assert!(buffer.add_chunk("if x > 0:\n").is_empty());
        assert!(buffer.add_chunk("    y = 1\n").is_empty());
        // The dedented line closes the block and is requeued.
        let statements = buffer.add_chunk("z = 2\n");
        assert_eq!(statements, vec!["if x > 0:\n    y = 1", "z = 2"]);
    }

    #[test]
    fn else_continues_the_compound() {
        let mut buffer = IncrementalCodeBuffer::new();
        assert!(buffer.add_chunk("if x:\n    a = 1\n").is_empty());
        assert!(buffer.add_chunk("else:\n    a = 2\n").is_empty());
        let statements = buffer.add_chunk("done = True\n");
        assert_eq!(
            statements,
            vec!["if x:\n    a = 1\nelse:\n    a = 2", "done = True"]
        );
    }

    #[test]
    fn unterminated_string_waits() {
        let mut buffer = IncrementalCodeBuffer::new();
        assert!(buffer.add_chunk("s = \"start of a long\n").is_empty());
        assert!(buffer.has_buffered_content());
    }

    #[test]
    fn unmatched_bracket_waits() {
        let mut buffer = IncrementalCodeBuffer::new();
        assert!(buffer.add_chunk("items = [1, 2,\n").is_empty());
        let statements = buffer.add_chunk("3]\n");
        assert_eq!(statements, vec!["items = [1, 2,\n3]"]);
    }

    #[test]
    fn trailing_colon_waits() {
        let mut buffer = IncrementalCodeBuffer::new();
        assert!(buffer.add_chunk("while True:\n").is_empty());
        assert!(buffer.has_buffered_content());
    }

    #[test]
    fn blank_line_closes_complete_code() {
        let mut buffer = IncrementalCodeBuffer::new();
        assert!(buffer.add_chunk("for i in items:\n    x = i\n").is_empty());
        let statements = buffer.add_chunk("\n");
        assert_eq!(statements, vec!["for i in items:\n    x = i"]);
    }

    #[test]
    fn finish_flushes_newline_less_tail() {
        let mut buffer = IncrementalCodeBuffer::new();
        assert!(buffer.add_chunk("x = 41").is_empty());
        let (statements, leftover) = buffer.finish();
        assert_eq!(statements, vec!["x = 41"]);
        assert!(leftover.is_none());
    }

    #[test]
    fn finish_emits_open_compound_when_parseable() {
        let mut buffer = IncrementalCodeBuffer::new();
        buffer.add_chunk("if x:\n    y = 1\n");
        let (statements, leftover) = buffer.finish();
        assert_eq!(statements, vec!["if x:\n    y = 1"]);
        assert!(leftover.is_none());
    }

    #[test]
    fn finish_reports_unparseable_leftover() {
        let mut buffer = IncrementalCodeBuffer::new();
        buffer.add_chunk("if x:\n");
        let (statements, leftover) = buffer.finish();
        assert!(statements.is_empty());
        assert_eq!(leftover.as_deref(), Some("if x:"));
    }

    #[test]
    fn nested_blocks_stay_together() {
        let mut buffer = IncrementalCodeBuffer::new();
        let source = "if a:\n    if b:\n        c = 1\n    d = 2\n";
        assert!(buffer.add_chunk(source).is_empty());
        let statements = buffer.add_chunk("e = 3\n");
        assert_eq!(
            statements,
            vec!["if a:\n    if b:\n        c = 1\n    d = 2", "e = 3"]
        );
    }
}
