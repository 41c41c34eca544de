//! Declarative pipeline interpreter.
//!
//! A [`PipelineModel`](crate::model::PipelineModel) is built into a tree of
//! [`ActionNode`]s through a [`Registry`], then executed against an
//! [`Item`](crate::runtime::Item) inside a [`RunScope`].

pub mod actions;
pub mod consts;
pub mod expr;
mod node;
mod registry;
mod scope;
pub mod template;

pub use actions::{Action, ActionResult, ActionType};
pub use node::{ActionNode, Pipeline};
pub use registry::{ActionFactory, Registry, factory};
pub use scope::{RunScope, Scope};
pub(crate) use scope::{MarkerSettings, as_i64, find_marker};
