//! Command templating for runner invocations.
//!
//! A runner command such as
//! `bundle exec rspec --format json --out {{resultPath}} {{testExamples}}`
//! is tokenized with shell quoting rules and the placeholders are then
//! substituted token by token, so substituted values never need re-quoting.
//!
//! | Placeholder | Substitution |
//! |-------------|--------------|
//! | `{{testExamples}}` | one token per test path (appended when absent) |
//! | `{{resultPath}}` | the result file path, inside any token |
//! | `{{testNamePattern}}` | an escaped regex alternation of test names |
//! | `{{packages}}` | one token per Go package (appended when absent) |

use std::collections::BTreeMap;
use std::fmt;

use super::{RunnerError, RunnerResult};

pub const TEST_EXAMPLES: &str = "{{testExamples}}";
pub const RESULT_PATH: &str = "{{resultPath}}";
pub const TEST_NAME_PATTERN: &str = "{{testNamePattern}}";
pub const PACKAGES: &str = "{{packages}}";

/// A prepared command: program, arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(&self.program).chain(self.args.iter());
        write!(f, "{}", shell_words::join(words))
    }
}

/// A tokenized command line with unresolved placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    words: Vec<String>,
}

impl CommandTemplate {
    /// Tokenizes `command` using shell quoting rules.
    pub fn parse(command: &str) -> RunnerResult<Self> {
        let words = shell_words::split(command)
            .map_err(|e| RunnerError::CommandBuild(format!("{}: {}", command, e)))?;

        if words.is_empty() {
            return Err(RunnerError::CommandBuild("command is empty".to_string()));
        }

        Ok(Self { words })
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Returns true if any token mentions `placeholder`.
    pub fn contains(&self, placeholder: &str) -> bool {
        self.words.iter().any(|w| w.contains(placeholder))
    }

    /// Replaces a token equal to `placeholder` with `values`, or appends
    /// `values` when no such token exists.
    pub fn splice_or_append(self, placeholder: &str, values: &[String]) -> Self {
        if self.words.iter().any(|w| w == placeholder) {
            self.splice(placeholder, values)
        } else {
            self.append(values.iter().cloned())
        }
    }

    /// Replaces a token equal to `placeholder` with `values`. Does nothing
    /// when no such token exists.
    pub fn splice(mut self, placeholder: &str, values: &[String]) -> Self {
        if let Some(idx) = self.words.iter().position(|w| w == placeholder) {
            self.words.splice(idx..idx + 1, values.iter().cloned());
        }
        self
    }

    /// Replaces every occurrence of `placeholder` inside any token.
    pub fn substitute(mut self, placeholder: &str, value: &str) -> Self {
        for word in &mut self.words {
            if word.contains(placeholder) {
                *word = word.replace(placeholder, value);
            }
        }
        self
    }

    /// Like [`substitute`](Self::substitute) but fails when the placeholder
    /// is missing.
    pub fn require(self, placeholder: &str, value: &str) -> RunnerResult<Self> {
        if !self.contains(placeholder) {
            return Err(RunnerError::CommandBuild(format!(
                "couldn't find '{}' sentinel in command",
                placeholder
            )));
        }
        Ok(self.substitute(placeholder, value))
    }

    /// Appends raw arguments.
    pub fn append<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.words.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> CommandSpec {
        let mut words = self.words.into_iter();
        // parse() guarantees at least one word.
        let program = words.next().unwrap_or_default();
        CommandSpec::new(program).args(words)
    }
}

/// Escapes regex metacharacters `.+*?()|[]{}^$` with a backslash.
pub fn escape_regex(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Builds `(a|b|c)` from escaped names, matching any of them.
pub fn test_name_pattern<S: AsRef<str>>(names: &[S]) -> String {
    let alternatives: Vec<String> = names.iter().map(|n| escape_regex(n.as_ref())).collect();
    format!("({})", alternatives.join("|"))
}
