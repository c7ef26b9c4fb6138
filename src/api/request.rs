//! Request parsing and default resolution for alert requests.

use serde::Deserialize;
use thiserror::Error;

use crate::config::Config;
use crate::core::Recipient;
use crate::templating::{self, TemplateValues};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid request body: {0}")]
    MalformedBody(String),

    #[error("recipients must not be empty")]
    EmptyRecipients,

    #[error("recipients[{0}] must not be blank")]
    BlankRecipient(usize),
}

/// The wire shape of `POST /alert`. Every field is optional.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct AlertRequest {
    pub location: Option<String>,
    /// Full body override; skips the template entirely.
    pub message: Option<String>,
    pub recipients: Option<Vec<String>>,
}

impl AlertRequest {
    /// Parses a raw body. An empty or whitespace-only body means `{}`.
    pub fn from_body(body: &[u8]) -> Result<Self, ValidationError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))
    }

    /// Fills every missing field from `defaults` and renders the body.
    ///
    /// Blank `location` and `message` strings count as absent.
    pub fn resolve(self, defaults: &AlertDefaults) -> Result<ResolvedAlert, ValidationError> {
        let recipients = match self.recipients {
            None => defaults.recipients.clone(),
            Some(list) if list.is_empty() => return Err(ValidationError::EmptyRecipients),
            Some(list) => list
                .into_iter()
                .enumerate()
                .map(|(i, r)| Recipient::parse(r).map_err(|_| ValidationError::BlankRecipient(i)))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let location = non_blank(self.location).unwrap_or_else(|| defaults.default_location.clone());
        let message_override = non_blank(self.message);
        let body = templating::compose(
            message_override.as_deref(),
            &defaults.message_template,
            &TemplateValues::now(location.as_str()),
        );

        Ok(ResolvedAlert {
            location,
            body,
            recipients,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Configuration defaults the API falls back on, snapshotted at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDefaults {
    pub recipients: Vec<Recipient>,
    pub message_template: String,
    pub default_location: String,
    pub test_message: String,
}

impl AlertDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            recipients: config.recipients(),
            message_template: config.alert.message_template.clone(),
            default_location: config.alert.default_location.clone(),
            test_message: config.alert.test_message.clone(),
        }
    }
}

/// One alert with every default applied, ready to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAlert {
    pub location: String,
    pub body: String,
    pub recipients: Vec<Recipient>,
}
