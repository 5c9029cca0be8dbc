//! Command-line tokenization.
//!
//! This is deliberately not a shell: there is no variable expansion, globbing, or pipeline
//! syntax. It covers the subset needed to write a program invocation as a single string:
//! whitespace-separated tokens, `"` and `'` quoting, and backslash escaping.

use std::mem;

/// Split a command line into an argument vector.
///
/// The first token is the program path (or name, for PATH lookup); the rest are its arguments.
///
/// Rules:
/// - Runs of spaces and tabs separate tokens.
/// - A `"` or `'` opens a quoted region ended by the same character; the quotes are stripped and
///   whitespace inside does not split the token. The other quote character is literal inside.
/// - A backslash makes the next character literal (so `\ `, `\"`, `\'`, and `\\` work); the
///   backslash itself is consumed.
/// - An unterminated quote or a trailing backslash ends tokenization at that point; whatever had
///   accumulated becomes the final token. Callers wanting stricter handling should validate the
///   input themselves.
#[must_use]
pub fn tokenize(line: &str) -> Vec<String> {
	let mut tokens = Vec::new();
	let mut current = String::new();
	let mut in_token = false;
	let mut chars = line.chars();

	'scan: while let Some(ch) = chars.next() {
		match ch {
			' ' | '\t' => {
				if in_token {
					tokens.push(mem::take(&mut current));
					in_token = false;
				}
			}
			'\\' => {
				in_token = true;
				match chars.next() {
					Some(escaped) => current.push(escaped),
					None => break 'scan,
				}
			}
			quote @ ('"' | '\'') => {
				in_token = true;
				loop {
					match chars.next() {
						None => break 'scan,
						Some('\\') => match chars.next() {
							Some(escaped) => current.push(escaped),
							None => break 'scan,
						},
						Some(c) if c == quote => break,
						Some(c) => current.push(c),
					}
				}
			}
			_ => {
				in_token = true;
				current.push(ch);
			}
		}
	}

	if in_token {
		tokens.push(current);
	}

	tokens
}
