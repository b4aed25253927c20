//! Message templates for the challenge flow.
//!
//! Templates are plain strings with `{name}`, `{answer}`, `{timeout}` and
//! `{attempts}` placeholders, substituted the same way the HTML pages are.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Welcome, {name}! This chat is protected from bots. \
     Reply with the word \"{answer}\" within {timeout} seconds to stay. Attempts left: {attempts}.";

pub const DEFAULT_RETRY_TEMPLATE: &str = "{name}, that is not right. \
     Reply with the word \"{answer}\" within {timeout} seconds. Attempts left: {attempts}.";

pub const DEFAULT_WELCOME_TEMPLATE: &str = "{name} passed the check. Welcome to the chat!";

pub const DEFAULT_BAN_TEMPLATE: &str = "{name} did not pass the check and was removed.";

/// All text the admission flow can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Templates {
    pub prompt: String,
    pub retry: String,
    pub welcome: String,
    /// `None` disables the ban announcement.
    pub ban: Option<String>,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT_TEMPLATE.to_string(),
            retry: DEFAULT_RETRY_TEMPLATE.to_string(),
            welcome: DEFAULT_WELCOME_TEMPLATE.to_string(),
            ban: Some(DEFAULT_BAN_TEMPLATE.to_string()),
        }
    }
}

/// Values available to a template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub name: &'a str,
    pub answer: &'a str,
    pub timeout_secs: i64,
    pub attempts_left: u32,
}

/// Substitute placeholders in one pass, so values are never re-expanded.
pub fn render(template: &str, vars: &TemplateVars<'_>) -> String {
    let timeout = vars.timeout_secs.to_string();
    let attempts = vars.attempts_left.to_string();
    let placeholders: [(&str, &str); 4] = [
        ("{name}", vars.name),
        ("{answer}", vars.answer),
        ("{timeout}", &timeout),
        ("{attempts}", &attempts),
    ];

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match placeholders.iter().find(|(p, _)| tail.starts_with(p)) {
            Some((placeholder, value)) => {
                out.push_str(value);
                rest = &tail[placeholder.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

impl Templates {
    pub fn render_prompt(&self, vars: &TemplateVars<'_>) -> String {
        render(&self.prompt, vars)
    }

    pub fn render_retry(&self, vars: &TemplateVars<'_>) -> String {
        render(&self.retry, vars)
    }

    pub fn render_welcome(&self, vars: &TemplateVars<'_>) -> String {
        render(&self.welcome, vars)
    }

    pub fn render_ban(&self, vars: &TemplateVars<'_>) -> Option<String> {
        self.ban.as_deref().map(|template| render(template, vars))
    }
}
