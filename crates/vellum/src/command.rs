//! The tagged command model and its apply/invert semantics.
//!
//! Every command is one atomic, named edit. `apply` mutates the tree and
//! reports `Ok(true)` on success, `Ok(false)` on a structural refusal (the
//! command did nothing), or `Err` on an execution fault. `inverted` is pure
//! data transformation: it builds the dual command with the source and
//! destination carets swapped and never touches the tree.

use std::fmt;
use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use tracing::error;
use vellum_common::{NodeId, VellumResult};

use crate::cursor::{Caret, CaretHint, CaretRange, Side};
use crate::surface::Surface;
use crate::tree::{Fragment, Position, Span};

/// Invoked exactly once when a command is permanently dropped from history
/// (capacity eviction, redo-branch truncation, surface teardown) — never on
/// ordinary undo/redo. Used to release resources retained only for undo.
pub type FinalCallback = Box<dyn FnOnce(&mut Surface)>;

/// Forward/inverse body of a [`Functional`] command.
pub type CommandFn = Arc<dyn Fn(&mut Surface) -> VellumResult<bool>>;

/// Merge hook consulted when two adjacent [`Functional`] commands are being
/// folded into one history step.
pub type MergeFn = Arc<dyn Fn(&Functional, &Functional) -> MergeDecision>;

/// Outcome of a [`MergeFn`].
pub enum MergeDecision {
    /// Fold both commands into the given replacement.
    Replacement(Command),
    /// Keep the first command as the merged result.
    TakeFirst,
    /// Do not merge; both commands stay separate steps.
    Separate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertText {
    pub target: NodeId,
    pub offset: usize,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteText {
    pub target: NodeId,
    pub offset: usize,
    pub data: String,
    /// Only used to decide merge/concatenation order; a backspace run
    /// concatenates new-before-old, a forward-delete run old-before-new.
    pub backward: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceText {
    pub target: NodeId,
    pub offset: usize,
    /// Codepoint length of the range being overwritten.
    pub len: usize,
    pub data: String,
    /// The text the command overwrote, captured on first run.
    pub replaced: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertNode {
    pub node: NodeId,
    pub exec_at: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveNode {
    pub node: NodeId,
    /// Captured from the node's live location on first run.
    pub exec_at: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceNode {
    pub old: NodeId,
    pub new: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertContent {
    pub fragment: Fragment,
    pub exec_at: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveContent {
    pub span: Span,
    /// Captured on first run.
    pub fragment: Option<Fragment>,
    pub exec_at: Option<Position>,
}

/// Transient tracker of an in-progress IME composition session.
///
/// Not independently invertible: the history collapses runs of these into a
/// single `InsertText`/`InsertNode` before a transaction is built, and it is
/// a protocol misuse for one to reach `inverted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertCompositionText {
    pub target: NodeId,
    pub offset: usize,
    /// The running composed string — a whole-session overwrite, not an
    /// append on top of the previous update.
    pub data: String,
    /// Codepoint length of the previous update's text.
    pub replaced_len: usize,
    /// Set on the session's first command when the host inserted a
    /// brand-new text leaf (the caret was not inside one), recording where.
    pub fresh_leaf: Option<Position>,
}

/// Escape hatch for operations outside the closed set, e.g. bulk node
/// relocation. Self-dual by construction; closures own whatever state they
/// need.
#[derive(Clone)]
pub struct Functional {
    pub forward: CommandFn,
    pub inverse: CommandFn,
    pub merge: Option<MergeFn>,
}

impl fmt::Debug for Functional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Functional")
            .field("merge", &self.merge.is_some())
            .finish()
    }
}

#[derive(Debug, EnumAsInner)]
pub enum CommandKind {
    InsertText(InsertText),
    DeleteText(DeleteText),
    ReplaceText(ReplaceText),
    InsertNode(InsertNode),
    RemoveNode(RemoveNode),
    ReplaceNode(ReplaceNode),
    InsertContent(InsertContent),
    RemoveContent(RemoveContent),
    InsertCompositionText(InsertCompositionText),
    Functional(Functional),
}

/// One atomic, invertible edit plus its caret bookkeeping.
pub struct Command {
    pub kind: CommandKind,
    /// Caret immediately before the command. Filled from the live caret by
    /// the manager for the first command of a batch when still `Unknown`.
    pub src_caret: CaretHint,
    /// Caret immediately after the command. Filled with the command's
    /// natural destination at execution time when still `Unknown`.
    pub dest_caret: CaretHint,
    pub(crate) final_callback: Option<FinalCallback>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind)
            .field("src_caret", &self.src_caret)
            .field("dest_caret", &self.dest_caret)
            .field("final_callback", &self.final_callback.is_some())
            .finish()
    }
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            src_caret: CaretHint::Unknown,
            dest_caret: CaretHint::Unknown,
            final_callback: None,
        }
    }

    pub fn insert_text(target: NodeId, offset: usize, data: impl Into<String>) -> Self {
        Self::new(CommandKind::InsertText(InsertText {
            target,
            offset,
            data: data.into(),
        }))
    }

    pub fn delete_text(target: NodeId, offset: usize, data: impl Into<String>, backward: bool) -> Self {
        Self::new(CommandKind::DeleteText(DeleteText {
            target,
            offset,
            data: data.into(),
            backward,
        }))
    }

    pub fn replace_text(target: NodeId, offset: usize, len: usize, data: impl Into<String>) -> Self {
        Self::new(CommandKind::ReplaceText(ReplaceText {
            target,
            offset,
            len,
            data: data.into(),
            replaced: None,
        }))
    }

    pub fn insert_node(node: NodeId, exec_at: Position) -> Self {
        Self::new(CommandKind::InsertNode(InsertNode { node, exec_at }))
    }

    pub fn remove_node(node: NodeId) -> Self {
        Self::new(CommandKind::RemoveNode(RemoveNode { node, exec_at: None }))
    }

    pub fn replace_node(old: NodeId, new: NodeId) -> Self {
        Self::new(CommandKind::ReplaceNode(ReplaceNode { old, new }))
    }

    pub fn insert_content(fragment: Fragment, exec_at: Position) -> Self {
        Self::new(CommandKind::InsertContent(InsertContent { fragment, exec_at }))
    }

    pub fn remove_content(span: Span) -> Self {
        Self::new(CommandKind::RemoveContent(RemoveContent {
            span,
            fragment: None,
            exec_at: None,
        }))
    }

    pub fn functional(forward: CommandFn, inverse: CommandFn) -> Self {
        Self::new(CommandKind::Functional(Functional {
            forward,
            inverse,
            merge: None,
        }))
    }

    pub fn functional_with_merge(forward: CommandFn, inverse: CommandFn, merge: MergeFn) -> Self {
        Self::new(CommandKind::Functional(Functional {
            forward,
            inverse,
            merge: Some(merge),
        }))
    }

    pub fn with_src_caret(mut self, caret: CaretHint) -> Self {
        self.src_caret = caret;
        self
    }

    pub fn with_dest_caret(mut self, caret: CaretHint) -> Self {
        self.dest_caret = caret;
        self
    }

    pub fn with_final_callback(mut self, cb: impl FnOnce(&mut Surface) + 'static) -> Self {
        self.final_callback = Some(Box::new(cb));
        self
    }

    /// Execute the command against the surface, capturing the fields that
    /// only exist after execution (`RemoveNode::exec_at`,
    /// `ReplaceText::replaced`, ...).
    pub fn apply(&mut self, surface: &mut Surface) -> VellumResult<bool> {
        let natural_dest = match &mut self.kind {
            CommandKind::InsertText(c) => {
                surface.tree.splice_text(c.target, c.offset, 0, &c.data)?;
                Some(caret_at(c.target, c.offset + c.data.chars().count()))
            }
            CommandKind::DeleteText(c) => {
                let removed = surface
                    .tree
                    .splice_text(c.target, c.offset, c.data.chars().count(), "")?;
                c.data = removed;
                Some(caret_at(c.target, c.offset))
            }
            CommandKind::ReplaceText(c) => {
                let removed = surface.tree.splice_text(c.target, c.offset, c.len, &c.data)?;
                c.replaced = Some(removed);
                Some(caret_at(c.target, c.offset + c.data.chars().count()))
            }
            CommandKind::InsertNode(c) => {
                if !surface.tree.insert_node(c.node, &c.exec_at)? {
                    return Ok(false);
                }
                Some(caret_at(c.exec_at.node, c.exec_at.offset + 1))
            }
            CommandKind::RemoveNode(c) => {
                let at = surface.tree.detach_node(c.node)?;
                let dest = caret_at(at.node, at.offset);
                c.exec_at = Some(at);
                Some(dest)
            }
            CommandKind::ReplaceNode(c) => {
                surface.tree.replace_node(c.old, c.new)?;
                let at = surface.tree.position_of(c.new)?;
                Some(caret_at(at.node, at.offset + 1))
            }
            CommandKind::InsertContent(c) => {
                if !surface.tree.insert_fragment(&c.fragment, &c.exec_at)? {
                    return Ok(false);
                }
                Some(caret_at(c.exec_at.node, c.exec_at.offset + c.fragment.len()))
            }
            CommandKind::RemoveContent(c) => {
                let (fragment, at) = surface.tree.extract_span(&c.span)?;
                let dest = caret_at(at.node, at.offset);
                c.fragment = Some(fragment);
                c.exec_at = Some(at);
                Some(dest)
            }
            CommandKind::InsertCompositionText(c) => {
                surface
                    .tree
                    .splice_text(c.target, c.offset, c.replaced_len, &c.data)?;
                Some(caret_at(c.target, c.offset + c.data.chars().count()))
            }
            CommandKind::Functional(c) => {
                if !(c.forward)(surface)? {
                    return Ok(false);
                }
                None
            }
        };
        if self.dest_caret.is_unknown() {
            self.dest_caret = match natural_dest {
                Some(range) => CaretHint::At(range),
                None => CaretHint::Keep,
            };
        }
        Ok(true)
    }

    /// Build the dual command, with source and destination carets swapped.
    ///
    /// Returns `None` for `InsertCompositionText` (and for commands whose
    /// execution-derived fields were never captured) — a protocol misuse
    /// that is fatal in development builds and degraded to a log entry in
    /// release builds. Inverses never carry a final callback.
    pub fn inverted(&self) -> Option<Command> {
        let kind = match &self.kind {
            CommandKind::InsertText(c) => CommandKind::DeleteText(DeleteText {
                target: c.target,
                offset: c.offset,
                data: c.data.clone(),
                backward: true,
            }),
            CommandKind::DeleteText(c) => CommandKind::InsertText(InsertText {
                target: c.target,
                offset: c.offset,
                data: c.data.clone(),
            }),
            CommandKind::ReplaceText(c) => {
                let Some(replaced) = c.replaced.clone() else {
                    return self.not_invertible("ReplaceText before execution");
                };
                CommandKind::ReplaceText(ReplaceText {
                    target: c.target,
                    offset: c.offset,
                    len: c.data.chars().count(),
                    data: replaced,
                    replaced: Some(c.data.clone()),
                })
            }
            CommandKind::InsertNode(c) => CommandKind::RemoveNode(RemoveNode {
                node: c.node,
                exec_at: Some(c.exec_at.clone()),
            }),
            CommandKind::RemoveNode(c) => {
                let Some(at) = c.exec_at.clone() else {
                    return self.not_invertible("RemoveNode before execution");
                };
                CommandKind::InsertNode(InsertNode {
                    node: c.node,
                    exec_at: at,
                })
            }
            CommandKind::ReplaceNode(c) => CommandKind::ReplaceNode(ReplaceNode {
                old: c.new,
                new: c.old,
            }),
            CommandKind::InsertContent(c) => {
                let Some(span) = c.fragment.bounds() else {
                    return self.not_invertible("InsertContent with an empty fragment");
                };
                CommandKind::RemoveContent(RemoveContent {
                    span,
                    fragment: Some(c.fragment.clone()),
                    exec_at: Some(c.exec_at.clone()),
                })
            }
            CommandKind::RemoveContent(c) => {
                let (Some(fragment), Some(at)) = (c.fragment.clone(), c.exec_at.clone()) else {
                    return self.not_invertible("RemoveContent before execution");
                };
                CommandKind::InsertContent(InsertContent {
                    fragment,
                    exec_at: at,
                })
            }
            CommandKind::InsertCompositionText(_) => {
                return self.not_invertible("InsertCompositionText");
            }
            CommandKind::Functional(c) => CommandKind::Functional(Functional {
                forward: c.inverse.clone(),
                inverse: c.forward.clone(),
                merge: c.merge.clone(),
            }),
        };
        Some(Command {
            kind,
            src_caret: self.dest_caret.clone(),
            dest_caret: self.src_caret.clone(),
            final_callback: None,
        })
    }

    fn not_invertible(&self, what: &str) -> Option<Command> {
        debug_assert!(false, "cannot invert {what}");
        error!("cannot invert {what}; skipping");
        None
    }

    pub(crate) fn take_final_callback(&mut self) -> Option<FinalCallback> {
        self.final_callback.take()
    }
}

fn caret_at(node: NodeId, offset: usize) -> CaretRange {
    CaretRange::collapsed(Caret::new(node, offset, Side::Middle))
}

/// A command after successful execution: every execution-derived field is
/// present, and the value is ready to be staged, inverted, or replayed.
#[derive(Debug)]
pub struct ExecutedCommand {
    pub(crate) inner: Command,
}

impl ExecutedCommand {
    /// Upgrade a draft that just ran. Asserts the captured fields are there.
    pub(crate) fn upgrade(inner: Command) -> Self {
        match &inner.kind {
            CommandKind::ReplaceText(c) => {
                debug_assert!(c.replaced.is_some(), "ReplaceText must capture replaced text");
            }
            CommandKind::RemoveNode(c) => {
                debug_assert!(c.exec_at.is_some(), "RemoveNode must capture its position");
            }
            CommandKind::RemoveContent(c) => {
                debug_assert!(
                    c.fragment.is_some() && c.exec_at.is_some(),
                    "RemoveContent must capture its fragment and position"
                );
            }
            _ => {}
        }
        Self { inner }
    }

    pub fn command(&self) -> &Command {
        &self.inner
    }

    pub fn kind(&self) -> &CommandKind {
        &self.inner.kind
    }

    pub fn src_caret(&self) -> &CaretHint {
        &self.inner.src_caret
    }

    pub fn dest_caret(&self) -> &CaretHint {
        &self.inner.dest_caret
    }

    pub fn inverted(&self) -> Option<Command> {
        self.inner.inverted()
    }

    pub(crate) fn set_src_caret(&mut self, caret: CaretHint) {
        self.inner.src_caret = caret;
    }

    pub(crate) fn set_dest_caret(&mut self, caret: CaretHint) {
        self.inner.dest_caret = caret;
    }

    /// Redo path: re-run the stored command forward. All derived fields are
    /// already captured, so this recaptures identical values.
    pub(crate) fn reapply(&mut self, surface: &mut Surface) -> VellumResult<bool> {
        self.inner.apply(surface)
    }

    pub(crate) fn take_final_callback(&mut self) -> Option<FinalCallback> {
        self.inner.take_final_callback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Position;

    fn surface_with_text(data: &str) -> (Surface, NodeId) {
        let mut surface = Surface::new();
        let text = surface.tree.new_text(data);
        let root = surface.tree.root();
        surface
            .tree
            .insert_node(text, &Position::new(root, 0))
            .unwrap();
        (surface, text)
    }

    #[test]
    fn insert_text_applies_and_inverts() {
        let (mut surface, text) = surface_with_text("world");
        let mut cmd = Command::insert_text(text, 0, "hello ");
        assert!(cmd.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.text(text).unwrap(), "hello world");

        let mut inv = cmd.inverted().unwrap();
        let del = inv.kind.as_delete_text().unwrap();
        assert_eq!(del.offset, 0);
        assert_eq!(del.data, "hello ");
        assert!(del.backward);

        assert!(inv.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.text(text).unwrap(), "world");
    }

    #[test]
    fn delete_text_normalizes_data_to_what_was_removed() {
        let (mut surface, text) = surface_with_text("héllo");
        let mut cmd = Command::delete_text(text, 1, "xx", true);
        assert!(cmd.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.text(text).unwrap(), "hlo");
        assert_eq!(cmd.kind.as_delete_text().unwrap().data, "él");
    }

    #[test]
    fn replace_text_is_self_dual() {
        let (mut surface, text) = surface_with_text("abcdef");
        let mut cmd = Command::replace_text(text, 1, 3, "XY");
        assert!(cmd.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.text(text).unwrap(), "aXYef");
        assert_eq!(cmd.kind.as_replace_text().unwrap().replaced.as_deref(), Some("bcd"));

        let mut inv = cmd.inverted().unwrap();
        assert!(inv.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.text(text).unwrap(), "abcdef");
    }

    #[test]
    fn remove_node_captures_position() {
        let mut surface = Surface::new();
        let root = surface.tree.root();
        let p = surface.tree.new_element("p");
        surface.tree.insert_node(p, &Position::new(root, 0)).unwrap();

        let mut cmd = Command::remove_node(p);
        assert!(cmd.apply(&mut surface).unwrap());
        assert_eq!(
            cmd.kind.as_remove_node().unwrap().exec_at,
            Some(Position::new(root, 0))
        );

        let mut inv = cmd.inverted().unwrap();
        assert!(inv.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.children(root).unwrap(), &[p]);
    }

    #[test]
    fn insert_node_inside_text_is_a_refusal_not_a_fault() {
        let (mut surface, text) = surface_with_text("hi");
        let p = surface.tree.new_element("p");
        let mut cmd = Command::insert_node(p, Position::new(text, 1));
        assert!(!cmd.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.text(text).unwrap(), "hi");
    }

    #[test]
    fn replace_node_inverts_by_swapping() {
        let mut surface = Surface::new();
        let root = surface.tree.root();
        let old = surface.tree.new_element("p");
        let new = surface.tree.new_element("h1");
        surface.tree.insert_node(old, &Position::new(root, 0)).unwrap();

        let mut cmd = Command::replace_node(old, new);
        assert!(cmd.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.children(root).unwrap(), &[new]);

        let mut inv = cmd.inverted().unwrap();
        assert!(inv.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.children(root).unwrap(), &[old]);
    }

    #[test]
    fn content_commands_round_trip() {
        let mut surface = Surface::new();
        let root = surface.tree.root();
        let ids: Vec<_> = (0..3).map(|_| surface.tree.new_element("p")).collect();
        for (i, id) in ids.iter().enumerate() {
            surface.tree.insert_node(*id, &Position::new(root, i)).unwrap();
        }

        let mut remove = Command::remove_content(Span::new(ids[0], ids[1]));
        assert!(remove.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.children(root).unwrap(), &[ids[2]]);

        let mut insert = remove.inverted().unwrap();
        assert!(insert.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.children(root).unwrap(), &ids[..]);

        let back = insert.inverted().unwrap();
        let span = back.kind.as_remove_content().unwrap().span;
        assert_eq!(span, Span::new(ids[0], ids[1]));
    }

    #[test]
    fn functional_swaps_closures() {
        let mut surface = Surface::new();
        let root = surface.tree.root();
        let marker = surface.tree.new_element("hr");
        let fwd: CommandFn = {
            Arc::new(move |surface: &mut Surface| {
                let root = surface.tree.root();
                surface.tree.insert_node(marker, &Position::new(root, 0))
            })
        };
        let inv: CommandFn = Arc::new(move |surface: &mut Surface| {
            surface.tree.detach_node(marker).map(|_| true)
        });

        let mut cmd = Command::functional(fwd, inv);
        assert!(cmd.apply(&mut surface).unwrap());
        assert_eq!(surface.tree.children(root).unwrap(), &[marker]);

        let mut undo = cmd.inverted().unwrap();
        assert!(undo.apply(&mut surface).unwrap());
        assert!(surface.tree.children(root).unwrap().is_empty());
    }

    #[test]
    fn inverse_swaps_carets() {
        let (mut surface, text) = surface_with_text("");
        let mut cmd = Command::insert_text(text, 0, "ab")
            .with_src_caret(CaretHint::At(caret_at(text, 0)));
        cmd.apply(&mut surface).unwrap();
        assert_eq!(cmd.dest_caret, CaretHint::At(caret_at(text, 2)));

        let inv = cmd.inverted().unwrap();
        assert_eq!(inv.src_caret, CaretHint::At(caret_at(text, 2)));
        assert_eq!(inv.dest_caret, CaretHint::At(caret_at(text, 0)));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn composition_text_has_no_inverse() {
        let cmd = Command::new(CommandKind::InsertCompositionText(InsertCompositionText {
            target: NodeId(1),
            offset: 0,
            data: "x".into(),
            replaced_len: 0,
            fresh_leaf: None,
        }));
        assert!(cmd.inverted().is_none());
    }
}
