// src/templating.rs

use chrono::{DateTime, Local};

/// Values substituted into an alert template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValues {
    pub location: String,
    pub time: String,
    pub date: String,
}

impl TemplateValues {
    /// Captures the current local time and date for `location`.
    pub fn now(location: impl Into<String>) -> Self {
        Self::at(location, Local::now())
    }

    /// Formats `when` the way alert recipients read it, e.g. `3:07:09 PM` and `10/19/2026`.
    pub fn at(location: impl Into<String>, when: DateTime<Local>) -> Self {
        Self {
            location: location.into(),
            time: when.format("%-I:%M:%S %p").to_string(),
            date: when.format("%-m/%-d/%Y").to_string(),
        }
    }

    fn lookup(&self, token: &str) -> Option<&str> {
        match token {
            "location" => Some(&self.location),
            "time" => Some(&self.time),
            "date" => Some(&self.date),
            _ => None,
        }
    }
}

/// Substitutes `{location}`, `{time}` and `{date}` in `template`.
///
/// Unknown tokens are copied through untouched, and substituted values are
/// never scanned again, so a location containing `{date}` stays literal.
pub fn render(template: &str, values: &TemplateValues) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let candidate = &rest[open + 1..];
        match candidate.find('}') {
            Some(close) => match values.lookup(&candidate[..close]) {
                Some(value) => {
                    out.push_str(value);
                    rest = &candidate[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = candidate;
                }
            },
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Produces the outgoing body: `message_override` wins verbatim, otherwise
/// `template` is rendered.
pub fn compose(message_override: Option<&str>, template: &str, values: &TemplateValues) -> String {
    match message_override {
        Some(message) => message.to_string(),
        None => render(template, values),
    }
}
