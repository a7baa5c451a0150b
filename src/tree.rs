//! Survey tree model
//!
//! A tree is a static, read-only graph of states joined by answer-guarded
//! transitions. Trees are loaded once into a [`TreeCatalog`] and shared by
//! every running session.

mod catalog;
mod model;

pub use catalog::{TreeCatalog, TreeError};
pub use model::{Answer, AnswerKind, Message, State, Tag, Transition, Tree, TreeDocument};

#[cfg(test)]
pub(crate) use catalog::fixtures;
