//! Answer matching
//!
//! Decides whether an incoming reply satisfies an [`Answer`]. Regex rules
//! are compiled once when the catalog loads; custom rules are resolved by
//! name through an injected [`CustomMatcherRegistry`].

mod builtin;

pub use builtin::register_builtins;

use crate::tree::{Answer, AnswerKind};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// A custom answer predicate
pub type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("No custom matcher registered for '{0}'")]
    UnknownCustomMatcher(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Compiled form of an answer's matching rule
#[derive(Debug, Clone)]
pub enum MatchRule {
    Exact(String),
    Regex(Regex),
    Custom(String),
}

impl MatchRule {
    /// Compile an answer's rule. Regexes become case-insensitive and
    /// anchored at the start of the input.
    pub fn compile(answer: &Answer) -> Result<Self, regex::Error> {
        Ok(match &answer.kind {
            AnswerKind::Exact { value } => MatchRule::Exact(value.to_lowercase()),
            AnswerKind::Regex { pattern } => MatchRule::Regex(
                RegexBuilder::new(&format!("^(?:{pattern})"))
                    .case_insensitive(true)
                    .build()?,
            ),
            AnswerKind::Custom { handler } => MatchRule::Custom(handler.clone()),
        })
    }
}

/// An answer together with its compiled rule
#[derive(Debug, Clone)]
pub struct CompiledAnswer {
    pub answer: Answer,
    pub rule: MatchRule,
}

impl CompiledAnswer {
    pub fn compile(answer: Answer) -> Result<Self, regex::Error> {
        let rule = MatchRule::compile(&answer)?;
        Ok(Self { answer, rule })
    }
}

/// Registry of named custom predicates, populated at startup
#[derive(Default)]
pub struct CustomMatcherRegistry {
    predicates: RwLock<HashMap<String, Predicate>>,
}

impl fmt::Debug for CustomMatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomMatcherRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl CustomMatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate. A name can only be registered once.
    pub fn register<F>(&self, name: impl Into<String>, predicate: F) -> Result<(), RegistryError>
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        let mut predicates = self
            .predicates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if predicates.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        tracing::info!(name = %name, "Registered custom matcher");
        predicates.insert(name, Arc::new(predicate));
        Ok(())
    }

    /// Register a predicate, overwriting any existing one of the same name
    pub fn replace<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::info!(name = %name, "Replaced custom matcher");
        self.predicates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name, Arc::new(predicate));
    }

    pub fn lookup(&self, name: &str) -> Option<Predicate> {
        self.predicates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .predicates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Evaluates answers against incoming text
#[derive(Debug, Clone)]
pub struct Matcher {
    custom: Arc<CustomMatcherRegistry>,
}

impl Matcher {
    pub fn new(custom: Arc<CustomMatcherRegistry>) -> Self {
        Self { custom }
    }

    /// Check whether `text` satisfies `answer`. Empty text never matches.
    pub fn matches(&self, answer: &CompiledAnswer, text: &str) -> Result<bool, MatchError> {
        if text.is_empty() {
            return Ok(false);
        }
        match &answer.rule {
            MatchRule::Exact(value) => Ok(text.to_lowercase() == *value),
            MatchRule::Regex(regex) => Ok(regex.is_match(text)),
            MatchRule::Custom(handler) => {
                let predicate = self
                    .custom
                    .lookup(handler)
                    .ok_or_else(|| MatchError::UnknownCustomMatcher(handler.clone()))?;
                Ok(predicate(text))
            }
        }
    }
}
