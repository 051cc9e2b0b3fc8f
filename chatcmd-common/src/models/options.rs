use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Options after defaults are applied, keyed by option name.
pub type ResolvedOptions = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    String,
    Number,
    Boolean,
    /// One of `CommandOption::choices`.
    Enum,
}

/// A typed, user-tweakable setting declared by a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOption {
    #[serde(rename = "type")]
    pub kind: OptionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

impl CommandOption {
    pub fn new(kind: OptionKind, default: Value) -> Self {
        Self {
            kind,
            title: None,
            default,
            value: None,
            choices: Vec::new(),
        }
    }

    fn accepts(&self, v: &Value) -> bool {
        match self.kind {
            OptionKind::String => v.is_string(),
            OptionKind::Number => v.is_number(),
            OptionKind::Boolean => v.is_boolean(),
            OptionKind::Enum => v
                .as_str()
                .map(|s| self.choices.iter().any(|c| c == s))
                .unwrap_or(false),
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), Error> {
        if self.kind == OptionKind::Enum && self.choices.is_empty() {
            return Err(Error::Validation(format!("option '{}' is an enum without choices", name)));
        }
        if !self.accepts(&self.default) {
            return Err(Error::Validation(format!(
                "option '{}' default {} is not a valid {:?}",
                name, self.default, self.kind
            )));
        }
        if let Some(v) = &self.value {
            if !self.accepts(v) {
                return Err(Error::Validation(format!(
                    "option '{}' value {} is not a valid {:?}",
                    name, v, self.kind
                )));
            }
        }
        Ok(())
    }

    pub fn effective(&self) -> &Value {
        self.value.as_ref().unwrap_or(&self.default)
    }
}

pub fn validate_options(options: &BTreeMap<String, CommandOption>) -> Result<(), Error> {
    for (name, opt) in options {
        opt.validate(name)?;
    }
    Ok(())
}

pub fn resolve_options(options: &BTreeMap<String, CommandOption>) -> ResolvedOptions {
    options
        .iter()
        .map(|(name, opt)| (name.clone(), opt.effective().clone()))
        .collect()
}
