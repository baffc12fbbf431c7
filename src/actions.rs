//! Action attachment (C9): turns a nested tree of action definitions
//! into a parallel tree of callables bound to a client context, plus
//! pre-order iteration helpers external collaborators (a CLI, an RPC
//! router) use to register commands/routes without knowing the tree's
//! shape ahead of time.
//!
//! Rust has no structural closures-with-properties that would let
//! `type`/`description`/`input`/`output` metadata attach directly onto a
//! callable function object. The idiomatic shape here keeps the metadata
//! and the handler together on one struct (`ActionDef`) and produces an
//! `AttachedAction` wrapping a closure that already has `ctx` bound in,
//! rather than mutating the handler itself.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;

/// Whether an action reads or writes state. Informational metadata only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// A read that does not mutate the workspace.
    Query,
    /// A write that mutates the workspace.
    Mutation,
}

/// One action's definition: its metadata and its handler.
pub struct ActionDef<Ctx> {
    /// Query or mutation.
    pub kind: ActionKind,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Optional input JSON schema, for external callers to validate against.
    pub input_schema: Option<Value>,
    /// Optional output JSON schema.
    pub output_schema: Option<Value>,
    /// The handler itself: `(ctx, input) -> output`.
    pub handler: Arc<dyn Fn(&Ctx, Value) -> Result<Value> + Send + Sync>,
}

impl<Ctx> Clone for ActionDef<Ctx> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// An arbitrarily nested tree of action definitions, keyed by name at
/// each level.
pub enum Actions<Ctx> {
    /// A callable leaf.
    Leaf(ActionDef<Ctx>),
    /// A named group of further actions.
    Group(HashMap<String, Actions<Ctx>>),
}

/// A leaf that has been bound to a context: calling `invoke` runs the
/// handler; the metadata fields mirror the source `ActionDef`'s.
pub struct AttachedAction<Ctx> {
    /// Query or mutation.
    pub kind: ActionKind,
    /// The definition's description, if any.
    pub description: Option<String>,
    /// The definition's input schema, if any.
    pub input_schema: Option<Value>,
    /// The definition's output schema, if any.
    pub output_schema: Option<Value>,
    ctx: Arc<Ctx>,
    handler: Arc<dyn Fn(&Ctx, Value) -> Result<Value> + Send + Sync>,
}

impl<Ctx> AttachedAction<Ctx> {
    /// Invokes the bound handler with `input`.
    pub fn invoke(&self, input: Value) -> Result<Value> {
        (self.handler)(&self.ctx, input)
    }
}

/// The attached parallel tree, mirroring [`Actions`]'s shape.
pub enum AttachedActions<Ctx> {
    /// A callable leaf, already bound to `ctx`.
    Leaf(AttachedAction<Ctx>),
    /// A named group of further attached actions.
    Group(HashMap<String, AttachedActions<Ctx>>),
}

/// Walks `actions`, binding every leaf's handler to `ctx`.
pub fn attach_actions<Ctx>(actions: &Actions<Ctx>, ctx: Arc<Ctx>) -> AttachedActions<Ctx> {
    match actions {
        Actions::Leaf(def) => AttachedActions::Leaf(AttachedAction {
            kind: def.kind,
            description: def.description.clone(),
            input_schema: def.input_schema.clone(),
            output_schema: def.output_schema.clone(),
            ctx,
            handler: Arc::clone(&def.handler),
        }),
        Actions::Group(children) => AttachedActions::Group(
            children.iter().map(|(name, child)| (name.clone(), attach_actions(child, Arc::clone(&ctx)))).collect(),
        ),
    }
}

/// Pre-order `[leaf, pathSegments]` pairs over an (unattached) action
/// definition tree, for callers that want to register metadata (e.g. to
/// build a CLI `--help` listing) without needing a context yet.
pub fn iterate_actions<Ctx>(actions: &Actions<Ctx>) -> Vec<(&ActionDef<Ctx>, Vec<String>)> {
    let mut out = Vec::new();
    walk_actions(actions, Vec::new(), &mut out);
    out
}

fn walk_actions<'a, Ctx>(
    actions: &'a Actions<Ctx>,
    path: Vec<String>,
    out: &mut Vec<(&'a ActionDef<Ctx>, Vec<String>)>,
) {
    match actions {
        Actions::Leaf(def) => out.push((def, path)),
        Actions::Group(children) => {
            for (name, child) in children {
                let mut next = path.clone();
                next.push(name.clone());
                walk_actions(child, next, out);
            }
        }
    }
}

/// Pre-order `[leaf, pathSegments]` pairs over an attached action tree,
/// for callers (a CLI, an RPC router) registering commands/routes.
pub fn iterate_attached_actions<Ctx>(actions: &AttachedActions<Ctx>) -> Vec<(&AttachedAction<Ctx>, Vec<String>)> {
    let mut out = Vec::new();
    walk_attached(actions, Vec::new(), &mut out);
    out
}

fn walk_attached<'a, Ctx>(
    actions: &'a AttachedActions<Ctx>,
    path: Vec<String>,
    out: &mut Vec<(&'a AttachedAction<Ctx>, Vec<String>)>,
) {
    match actions {
        AttachedActions::Leaf(action) => out.push((action, path)),
        AttachedActions::Group(children) => {
            for (name, child) in children {
                let mut next = path.clone();
                next.push(name.clone());
                walk_attached(child, next, out);
            }
        }
    }
}
