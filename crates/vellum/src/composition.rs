//! IME composition session tracking.
//!
//! A session turns each low-level update signal into an
//! `InsertCompositionText` command carrying the running composed string.
//! The history collapses the run into at most one real command when the
//! session's transaction is pushed.

use tracing::warn;
use vellum_common::{NodeId, VellumError, VellumResult};

use crate::command::{Command, CommandKind, InsertCompositionText};
use crate::surface::Surface;
use crate::tree::Position;

#[derive(Debug)]
pub(crate) struct CompositionSession {
    /// The text leaf holding the session.
    target: NodeId,
    /// Session anchor inside the leaf, in codepoints.
    offset: usize,
    /// Where the host-inserted fresh leaf went, when the session did not
    /// start inside an existing text leaf.
    fresh_leaf: Option<Position>,
    /// Codepoint length of the previous update's composed string.
    last_len: usize,
    first_update: bool,
}

impl CompositionSession {
    /// Anchor a session at the live caret. When the caret does not sit
    /// inside a text leaf, insert a fresh empty leaf at the caret's position
    /// (mirroring what the host environment does) and anchor there.
    pub(crate) fn begin(surface: &mut Surface) -> VellumResult<Self> {
        let anchor = surface.caret().map(|range| range.start.clone());
        if let Some(caret) = &anchor {
            if surface.tree.is_text(caret.node) {
                return Ok(Self {
                    target: caret.node,
                    offset: caret.offset,
                    fresh_leaf: None,
                    last_len: 0,
                    first_update: true,
                });
            }
        }

        let at = match &anchor {
            Some(caret) => Position::new(caret.node, caret.offset),
            None => {
                let root = surface.tree.root();
                Position::new(root, surface.tree.children(root)?.len())
            }
        };
        let leaf = surface.tree.new_text("");
        if !surface.tree.insert_node(leaf, &at)? {
            return Err(VellumError::ArgErr(
                "composition anchor cannot host a text leaf".into(),
            ));
        }
        Ok(Self {
            target: leaf,
            offset: 0,
            fresh_leaf: Some(at),
            last_len: 0,
            first_update: true,
        })
    }

    /// Build the command for one update signal. `data` is the whole composed
    /// string so far, not a delta.
    pub(crate) fn next_command(&mut self, data: &str) -> Command {
        let fresh_leaf = if self.first_update {
            self.fresh_leaf.clone()
        } else {
            None
        };
        let cmd = Command::new(CommandKind::InsertCompositionText(InsertCompositionText {
            target: self.target,
            offset: self.offset,
            data: data.to_string(),
            replaced_len: self.last_len,
            fresh_leaf,
        }));
        self.last_len = data.chars().count();
        self.first_update = false;
        cmd
    }

    /// Session end. A cancelled session (empty final data) that created a
    /// fresh leaf removes it again, mirroring the host's cleanup.
    pub(crate) fn finish(self, surface: &mut Surface) {
        if self.last_len == 0 && self.fresh_leaf.is_some() {
            if surface.tree.detach_node(self.target).is_ok() {
                if let Err(err) = surface.tree.purge(self.target) {
                    warn!(%err, "failed to purge a cancelled composition leaf");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Caret, CaretRange, Side};

    #[test]
    fn session_anchors_inside_an_existing_leaf() {
        let mut surface = Surface::new();
        let root = surface.tree.root();
        let text = surface.tree.new_text("ab");
        surface.tree.insert_node(text, &Position::new(root, 0)).unwrap();
        surface.set_caret(CaretRange::collapsed(Caret::new(text, 1, Side::Middle)));

        let mut session = CompositionSession::begin(&mut surface).unwrap();
        assert!(session.fresh_leaf.is_none());

        let cmd = session.next_command("ㅎ");
        let c = cmd.kind.as_insert_composition_text().unwrap();
        assert_eq!((c.target, c.offset, c.replaced_len), (text, 1, 0));

        let cmd = session.next_command("하");
        let c = cmd.kind.as_insert_composition_text().unwrap();
        assert_eq!(c.replaced_len, 1);
        assert!(c.fresh_leaf.is_none());
    }

    #[test]
    fn session_outside_a_leaf_inserts_one() {
        let mut surface = Surface::new();
        let root = surface.tree.root();
        surface.set_caret(CaretRange::collapsed(Caret::new(root, 0, Side::Middle)));

        let mut session = CompositionSession::begin(&mut surface).unwrap();
        assert_eq!(session.fresh_leaf, Some(Position::new(root, 0)));
        assert_eq!(surface.tree.children(root).unwrap().len(), 1);

        let cmd = session.next_command("x");
        assert!(cmd.kind.as_insert_composition_text().unwrap().fresh_leaf.is_some());
        let cmd = session.next_command("xy");
        assert!(cmd.kind.as_insert_composition_text().unwrap().fresh_leaf.is_none());
    }

    #[test]
    fn cancelled_fresh_leaf_session_cleans_up() {
        let mut surface = Surface::new();
        let root = surface.tree.root();

        let session = CompositionSession::begin(&mut surface).unwrap();
        let leaf = session.target;
        assert_eq!(surface.tree.children(root).unwrap(), &[leaf]);

        session.finish(&mut surface);
        assert!(surface.tree.children(root).unwrap().is_empty());
        assert!(!surface.tree.contains(leaf));
    }
}
