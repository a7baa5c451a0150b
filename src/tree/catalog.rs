//! Validated, read-only index over a tree document

use super::model::{Message, State, Tag, Transition, Tree, TreeDocument};
use crate::matcher::{CompiledAnswer, CustomMatcherRegistry, MatchRule};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Failed to read tree document: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse tree document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },
    #[error("Trigger '{0}' is used by more than one tree")]
    DuplicateTrigger(String),
    #[error("Tree trigger must not be empty")]
    EmptyTrigger,
    #[error("{referenced_by} refers to unknown {kind} '{id}'")]
    UnknownReference {
        kind: &'static str,
        id: String,
        referenced_by: String,
    },
    #[error("Answer '{answer}' has an invalid pattern: {source}")]
    InvalidPattern {
        answer: String,
        #[source]
        source: regex::Error,
    },
    #[error("State '{state}' has overlapping exact answers '{first}' and '{second}'")]
    OverlappingAnswers {
        state: String,
        first: String,
        second: String,
    },
    #[error("Answer '{answer}' uses unregistered custom matcher '{handler}'")]
    UnknownCustomMatcher { answer: String, handler: String },
}

pub type TreeResult<T> = Result<T, TreeError>;

/// All published trees and the graph they share
#[derive(Debug, Default)]
pub struct TreeCatalog {
    trees: Vec<Tree>,
    /// Lowercased trigger -> index into `trees`
    triggers: HashMap<String, usize>,
    messages: HashMap<String, Message>,
    answers: HashMap<String, CompiledAnswer>,
    states: HashMap<String, State>,
    transitions: HashMap<String, Transition>,
    /// State id -> outgoing transition ids in evaluation order
    outgoing: HashMap<String, Vec<String>>,
    tags: HashMap<String, Tag>,
}

fn index_unique<T>(
    kind: &'static str,
    items: Vec<T>,
    key: impl Fn(&T) -> &str,
) -> TreeResult<HashMap<String, T>> {
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        let id = key(&item).to_string();
        if map.contains_key(&id) {
            return Err(TreeError::DuplicateId { kind, id });
        }
        map.insert(id, item);
    }
    Ok(map)
}

fn require<T>(
    map: &HashMap<String, T>,
    kind: &'static str,
    id: &str,
    referenced_by: impl FnOnce() -> String,
) -> TreeResult<()> {
    if map.contains_key(id) {
        Ok(())
    } else {
        Err(TreeError::UnknownReference {
            kind,
            id: id.to_string(),
            referenced_by: referenced_by(),
        })
    }
}

impl TreeCatalog {
    /// Read and validate a JSON tree document from disk
    pub fn load<P: AsRef<Path>>(path: P) -> TreeResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> TreeResult<Self> {
        let document: TreeDocument = serde_json::from_str(raw)?;
        Self::from_document(document)
    }

    /// Index and validate a document. Every reference must resolve, every
    /// pattern must compile, and no state may carry two exact answers that
    /// accept the same text.
    pub fn from_document(document: TreeDocument) -> TreeResult<Self> {
        let TreeDocument {
            trees,
            messages,
            answers,
            states,
            transitions,
            tags,
        } = document;

        let messages = index_unique("message", messages, |m| m.id.as_str())?;
        let states = index_unique("state", states, |s| s.id.as_str())?;
        let tags = index_unique("tag", tags, |t| t.name.as_str())?;

        let mut compiled = HashMap::with_capacity(answers.len());
        for answer in answers {
            if compiled.contains_key(&answer.name) {
                return Err(TreeError::DuplicateId {
                    kind: "answer",
                    id: answer.name,
                });
            }
            let name = answer.name.clone();
            let answer = CompiledAnswer::compile(answer).map_err(|source| {
                TreeError::InvalidPattern {
                    answer: name.clone(),
                    source,
                }
            })?;
            compiled.insert(name, answer);
        }

        for state in states.values() {
            require(&messages, "message", &state.message, || {
                format!("state '{}'", state.id)
            })?;
        }

        let mut order: Vec<(i32, usize, String, String)> = Vec::with_capacity(transitions.len());
        let mut transition_map = HashMap::with_capacity(transitions.len());
        for (position, transition) in transitions.into_iter().enumerate() {
            let by = || format!("transition '{}'", transition.id);
            require(&states, "state", &transition.current_state, by)?;
            require(&states, "state", &transition.next_state, by)?;
            require(&compiled, "answer", &transition.answer, by)?;
            for tag in &transition.tags {
                require(&tags, "tag", tag, by)?;
            }
            if transition_map.contains_key(&transition.id) {
                return Err(TreeError::DuplicateId {
                    kind: "transition",
                    id: transition.id,
                });
            }
            order.push((
                transition.priority,
                position,
                transition.current_state.clone(),
                transition.id.clone(),
            ));
            transition_map.insert(transition.id.clone(), transition);
        }
        order.sort_by_key(|(priority, position, _, _)| (*priority, *position));

        let mut outgoing: HashMap<String, Vec<String>> = HashMap::new();
        for (_, _, state, id) in order {
            outgoing.entry(state).or_default().push(id);
        }

        for (state, ids) in &outgoing {
            let mut seen: HashMap<String, &str> = HashMap::new();
            for id in ids {
                let answer = &compiled[&transition_map[id].answer];
                if let MatchRule::Exact(value) = &answer.rule {
                    if let Some(first) = seen.insert(value.clone(), &answer.answer.name) {
                        return Err(TreeError::OverlappingAnswers {
                            state: state.clone(),
                            first: first.to_string(),
                            second: answer.answer.name.clone(),
                        });
                    }
                }
            }
        }

        let mut triggers = HashMap::with_capacity(trees.len());
        for (index, tree) in trees.iter().enumerate() {
            let key = tree.trigger.trim().to_lowercase();
            if key.is_empty() {
                return Err(TreeError::EmptyTrigger);
            }
            require(&states, "state", &tree.root_state, || {
                format!("tree '{}'", tree.trigger)
            })?;
            if triggers.insert(key, index).is_some() {
                return Err(TreeError::DuplicateTrigger(tree.trigger.clone()));
            }
        }

        tracing::debug!(
            trees = trees.len(),
            states = states.len(),
            transitions = transition_map.len(),
            "Tree catalog loaded"
        );

        Ok(Self {
            trees,
            triggers,
            messages,
            answers: compiled,
            states,
            transitions: transition_map,
            outgoing,
            tags,
        })
    }

    /// Fail if any custom answer names a predicate the registry lacks
    pub fn validate_custom_matchers(&self, registry: &CustomMatcherRegistry) -> TreeResult<()> {
        let mut answers: Vec<&CompiledAnswer> = self.answers.values().collect();
        answers.sort_by(|a, b| a.answer.name.cmp(&b.answer.name));
        for answer in answers {
            if let MatchRule::Custom(handler) = &answer.rule {
                if !registry.contains(handler) {
                    return Err(TreeError::UnknownCustomMatcher {
                        answer: answer.answer.name.clone(),
                        handler: handler.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Find the tree whose trigger equals `text`, ignoring case and
    /// surrounding whitespace
    pub fn find_by_trigger(&self, text: &str) -> Option<&Tree> {
        self.triggers
            .get(&text.trim().to_lowercase())
            .map(|&index| &self.trees[index])
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn state(&self, id: &str) -> Option<&State> {
        self.states.get(id)
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Message shown by a state
    pub fn state_message(&self, state_id: &str) -> Option<&Message> {
        self.state(state_id)
            .and_then(|state| self.message(&state.message))
    }

    pub fn answer(&self, name: &str) -> Option<&CompiledAnswer> {
        self.answers.get(name)
    }

    pub fn transition(&self, id: &str) -> Option<&Transition> {
        self.transitions.get(id)
    }

    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.get(name)
    }

    /// Outgoing transitions of a state, in evaluation order
    pub fn transitions_from(&self, state_id: &str) -> Vec<&Transition> {
        self.outgoing
            .get(state_id)
            .map(|ids| ids.iter().filter_map(|id| self.transition(id)).collect())
            .unwrap_or_default()
    }

    pub fn is_terminal(&self, state_id: &str) -> bool {
        self.outgoing.get(state_id).is_none_or(Vec::is_empty)
    }

    /// Hint text for every outgoing transition, sorted by answer name
    pub fn hint_lines(&self, state_id: &str) -> Vec<String> {
        let mut answers: Vec<&CompiledAnswer> = self
            .transitions_from(state_id)
            .into_iter()
            .filter_map(|t| self.answer(&t.answer))
            .collect();
        answers.sort_by(|a, b| a.answer.name.cmp(&b.answer.name));
        answers.iter().map(|a| a.answer.helper_text()).collect()
    }
}
