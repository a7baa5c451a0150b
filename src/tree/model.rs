//! Tree entity types, as authored in a tree document

use serde::{Deserialize, Serialize};

/// Prompt text shared by states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    /// Sent verbatim instead of the generic invalid-answer hint list
    #[serde(default)]
    pub error_response: Option<String>,
}

/// How an answer is compared against incoming text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerKind {
    /// Case-insensitive equality with the whole message
    Exact { value: String },
    /// Case-insensitive regex anchored at the start of the message
    Regex { pattern: String },
    /// Named predicate registered at startup
    Custom { handler: String },
}

/// A matching rule. `name` is unique and doubles as the hint sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub name: String,
    #[serde(flatten)]
    pub kind: AnswerKind,
    #[serde(default)]
    pub description: Option<String>,
}

impl Answer {
    pub fn exact(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AnswerKind::Exact {
                value: value.into(),
            },
            description: None,
        }
    }

    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AnswerKind::Regex {
                pattern: pattern.into(),
            },
            description: None,
        }
    }

    pub fn custom(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AnswerKind::Custom {
                handler: handler.into(),
            },
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Human-readable hint shown when listing valid replies
    pub fn helper_text(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        match &self.kind {
            AnswerKind::Exact { value } => value.clone(),
            AnswerKind::Regex { .. } | AnswerKind::Custom { .. } => self.name.clone(),
        }
    }
}

/// A node in the survey graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub id: String,
    pub message: String,
    /// `None` means the user may retry forever
    #[serde(default)]
    pub num_retries: Option<u32>,
}

/// Directed edge guarded by an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    pub current_state: String,
    pub answer: String,
    pub next_state: String,
    /// Tags applied to every entry this transition records
    #[serde(default)]
    pub tags: Vec<String>,
    /// Lower values are tried first; ties keep document order
    #[serde(default)]
    pub priority: i32,
}

/// Entry label with the people to notify when it is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// A survey, started by texting its trigger keyword
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub trigger: String,
    pub root_state: String,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Serialized form of a set of trees and everything they reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDocument {
    #[serde(default)]
    pub trees: Vec<Tree>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub states: Vec<State>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}
