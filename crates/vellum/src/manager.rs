//! The per-surface command queue and transaction lifecycle.

use std::mem;

use tracing::{debug, error, instrument, warn};

use crate::command::{Command, ExecutedCommand};
use crate::composition::CompositionSession;
use crate::cursor::{CaretHint, CaretRange};
use crate::surface::Surface;
use crate::undo::{revert_executed, UndoStack};

/// Owns the pending command queue of one editing surface and drives its
/// history. One instance per mounted surface; never shared.
///
/// Every operation resolves failures internally: callers only ever observe
/// boolean success signals, plus a log entry for genuine faults.
#[derive(Debug)]
pub struct CommandManager {
    queue: Vec<Command>,
    history: UndoStack,
    in_transaction: bool,
    commit_next: bool,
    composition: Option<CompositionSession>,
}

impl CommandManager {
    /// `max_undo_steps` is the transaction-history depth; the oldest
    /// transaction is evicted beyond it.
    pub fn new(max_undo_steps: usize) -> Self {
        Self {
            queue: Vec::new(),
            history: UndoStack::new(max_undo_steps),
            in_transaction: false,
            commit_next: false,
            composition: None,
        }
    }

    /// Append a command to the pending queue. No execution occurs.
    pub fn push(&mut self, cmd: Command) {
        self.queue.push(cmd);
    }

    pub fn push_all(&mut self, cmds: impl IntoIterator<Item = Command>) {
        self.queue.extend(cmds);
    }

    /// Execute every queued command in order.
    ///
    /// On the first execution fault the commands run so far are un-executed
    /// in reverse order, the queue is cleared, the failure is logged, and
    /// nothing is recorded — the surface is never left mutated-but-
    /// inconsistent. Structural refusals are treated as "this command did
    /// nothing" and execution continues.
    ///
    /// On success the executed commands land in the history's staging
    /// buffer; the first command's source caret is filled from the live
    /// caret when still unknown, and `final_dest` (when supplied) overrides
    /// the last command's destination caret.
    ///
    /// Returns whether at least one command ran.
    #[instrument(skip_all, fields(queued = self.queue.len()))]
    pub fn handle(&mut self, surface: &mut Surface, final_dest: Option<CaretRange>) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        let live_caret = surface.caret().cloned();
        let queued = mem::take(&mut self.queue);
        let mut executed: Vec<ExecutedCommand> = Vec::with_capacity(queued.len());
        for mut cmd in queued {
            match cmd.apply(surface) {
                Ok(true) => executed.push(ExecutedCommand::upgrade(cmd)),
                Ok(false) => {
                    warn!(?cmd, "command refused by the tree; treated as a no-op");
                }
                Err(err) => {
                    error!(%err, "command failed mid-batch; rolling back");
                    revert_executed(executed, surface);
                    return false;
                }
            }
        }
        if executed.is_empty() {
            return false;
        }

        if let Some(first) = executed.first_mut() {
            if first.command().src_caret.is_unknown() {
                first.set_src_caret(match live_caret {
                    Some(range) => CaretHint::At(range),
                    None => CaretHint::Keep,
                });
            }
        }
        if let Some(dest) = final_dest {
            if let Some(last) = executed.last_mut() {
                last.set_dest_caret(CaretHint::At(dest));
            }
        }
        self.history.stage_all(executed);

        if self.commit_next {
            self.commit_next = false;
            self.commit(surface);
        }
        true
    }

    /// Merge the staging buffer into one transaction and push it.
    ///
    /// Refused while a transaction is open or an IME composition session is
    /// in progress — both would otherwise fragment or corrupt the undo step.
    pub fn commit(&mut self, surface: &mut Surface) -> bool {
        if self.in_transaction {
            debug!("commit refused: a transaction is open");
            return false;
        }
        if self.composition.is_some() {
            debug!("commit refused: composition session in progress");
            return false;
        }
        self.history.push_transaction(surface)
    }

    /// Revert the staged-but-uncommitted batch in reverse order, leaving no
    /// history residue. Used to cleanly roll back a speculative insertion.
    pub fn discard(&mut self, surface: &mut Surface) -> bool {
        self.history.discard_staged(surface)
    }

    /// Open a transaction: per-handle commits are suppressed until
    /// [`CommandManager::close_transaction`]. Idempotent-open — requesting a
    /// transaction while one is open keeps it open. Returns whether this
    /// call opened it.
    pub fn start_transaction(&mut self) -> bool {
        if self.in_transaction {
            return false;
        }
        self.in_transaction = true;
        true
    }

    /// Flush any still-queued commands via `handle`, then commit.
    pub fn close_transaction(&mut self, surface: &mut Surface) -> bool {
        if !self.in_transaction {
            return false;
        }
        if !self.queue.is_empty() {
            self.handle(surface, None);
        }
        self.in_transaction = false;
        self.commit(surface)
    }

    /// Mark that the next successful `handle` should commit immediately
    /// afterward — a hard undo-step boundary right after one specific batch.
    /// With `commit_now` the commit happens right away instead.
    pub fn commit_next_handle(&mut self, surface: &mut Surface, commit_now: bool) {
        if commit_now {
            self.commit(surface);
        } else {
            self.commit_next = true;
        }
    }

    pub fn undo_transaction(&mut self, surface: &mut Surface) -> bool {
        self.history.undo(surface)
    }

    pub fn redo_transaction(&mut self, surface: &mut Surface) -> bool {
        self.history.redo(surface)
    }

    /// Anchor a composition session at the live caret. While a session is in
    /// progress `commit` is refused, so the session's commands accumulate in
    /// the staging buffer until it ends.
    pub fn composition_start(&mut self, surface: &mut Surface) -> bool {
        if self.composition.is_some() {
            warn!("composition session already in progress");
            return false;
        }
        match CompositionSession::begin(surface) {
            Ok(session) => {
                self.composition = Some(session);
                true
            }
            Err(err) => {
                error!(%err, "failed to start a composition session");
                false
            }
        }
    }

    /// One intermediate update: `data` is the whole composed string so far.
    pub fn composition_update(&mut self, surface: &mut Surface, data: &str) -> bool {
        let Some(session) = self.composition.as_mut() else {
            warn!("composition update without an active session");
            return false;
        };
        let cmd = session.next_command(data);
        self.push(cmd);
        self.handle(surface, None)
    }

    /// Session end. Does not commit: the caller decides where the undo-step
    /// boundary goes, and the history collapses the session's run when the
    /// transaction is pushed.
    pub fn composition_end(&mut self, surface: &mut Surface) -> bool {
        match self.composition.take() {
            Some(session) => {
                session.finish(surface);
                true
            }
            None => false,
        }
    }

    pub fn is_composing(&self) -> bool {
        self.composition.is_some()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Whether anything is queued or staged but not yet committed.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty() || self.history.has_staged()
    }

    pub fn stack_len(&self) -> usize {
        self.history.len()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history(&self) -> &UndoStack {
        &self.history
    }

    /// Deterministic teardown: drops queue and session, firing every final
    /// callback still held by the history.
    pub(crate) fn teardown(&mut self, surface: &mut Surface) {
        self.queue.clear();
        self.composition = None;
        self.in_transaction = false;
        self.commit_next = false;
        self.history.teardown(surface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::tree::Position;
    use vellum_common::NodeId;

    fn setup(capacity: usize) -> (Surface, CommandManager, NodeId) {
        let mut surface = Surface::new();
        let root = surface.tree.root();
        let text = surface.tree.new_text("hello");
        surface
            .tree
            .insert_node(text, &Position::new(root, 0))
            .unwrap();
        (surface, CommandManager::new(capacity), text)
    }

    #[test]
    fn handle_executes_in_order_and_stages() {
        let (mut surface, mut mgr, text) = setup(10);
        mgr.push(Command::insert_text(text, 5, " wor"));
        mgr.push(Command::insert_text(text, 9, "ld"));
        assert!(mgr.handle(&mut surface, None));
        assert_eq!(surface.tree.text(text).unwrap(), "hello world");
        assert!(mgr.has_pending());
        assert_eq!(mgr.stack_len(), 0);
    }

    #[test]
    fn failed_batch_rolls_back_completely() {
        let (mut surface, mut mgr, text) = setup(10);
        mgr.push(Command::insert_text(text, 0, "x"));
        // Offset past the end of the leaf: an execution fault.
        mgr.push(Command::insert_text(text, 100, "y"));
        assert!(!mgr.handle(&mut surface, None));
        assert_eq!(surface.tree.text(text).unwrap(), "hello");
        assert!(!mgr.has_pending());
        assert!(!mgr.commit(&mut surface));
    }

    #[test]
    fn refusal_is_skipped_without_rollback() {
        let (mut surface, mut mgr, text) = setup(10);
        let p = surface.tree.new_element("p");
        mgr.push(Command::insert_text(text, 0, "a"));
        mgr.push(Command::insert_node(p, Position::new(text, 1)));
        mgr.push(Command::insert_text(text, 6, "b"));
        assert!(mgr.handle(&mut surface, None));
        assert_eq!(surface.tree.text(text).unwrap(), "ahellob");
        assert!(mgr.commit(&mut surface));
        // Only the two text commands were recorded.
        assert_eq!(mgr.history().get(0).unwrap().len(), 2);
    }

    #[test]
    fn empty_commit_is_refused() {
        let (mut surface, mut mgr, _) = setup(10);
        assert!(!mgr.commit(&mut surface));
        assert_eq!(mgr.stack_len(), 0);
    }

    #[test]
    fn discard_reverts_staged_without_history_residue() {
        let (mut surface, mut mgr, text) = setup(10);
        mgr.push(Command::insert_text(text, 5, "!!!"));
        assert!(mgr.handle(&mut surface, None));
        assert_eq!(surface.tree.text(text).unwrap(), "hello!!!");

        assert!(mgr.discard(&mut surface));
        assert_eq!(surface.tree.text(text).unwrap(), "hello");
        assert!(!mgr.commit(&mut surface));
        assert_eq!(mgr.stack_len(), 0);
    }

    #[test]
    fn transaction_groups_multiple_handles() {
        let (mut surface, mut mgr, text) = setup(10);
        assert!(mgr.start_transaction());
        // Idempotent-open: a second request keeps it open.
        assert!(!mgr.start_transaction());

        mgr.push(Command::insert_text(text, 5, " a"));
        mgr.handle(&mut surface, None);
        assert!(!mgr.commit(&mut surface));

        mgr.push(Command::insert_text(text, 7, "b"));
        assert!(mgr.close_transaction(&mut surface));
        assert_eq!(mgr.stack_len(), 1);

        assert!(mgr.undo_transaction(&mut surface));
        assert_eq!(surface.tree.text(text).unwrap(), "hello");
    }

    #[test]
    fn commit_next_handle_commits_after_the_next_batch() {
        let (mut surface, mut mgr, text) = setup(10);
        mgr.commit_next_handle(&mut surface, false);
        mgr.push(Command::insert_text(text, 0, "x"));
        assert!(mgr.handle(&mut surface, None));
        assert_eq!(mgr.stack_len(), 1);
        assert!(!mgr.has_pending());

        // The flag is one-shot.
        mgr.push(Command::insert_text(text, 0, "y"));
        assert!(mgr.handle(&mut surface, None));
        assert_eq!(mgr.stack_len(), 1);
    }

    #[test]
    fn commit_now_flushes_staging_immediately() {
        let (mut surface, mut mgr, text) = setup(10);
        mgr.push(Command::insert_text(text, 0, "x"));
        mgr.handle(&mut surface, None);
        mgr.commit_next_handle(&mut surface, true);
        assert_eq!(mgr.stack_len(), 1);
    }

    #[test]
    fn commit_refused_while_composing() {
        let (mut surface, mut mgr, text) = setup(10);
        surface.set_caret(crate::cursor::CaretRange::collapsed(
            crate::cursor::Caret::new(text, 5, crate::cursor::Side::Middle),
        ));
        assert!(mgr.composition_start(&mut surface));
        assert!(mgr.composition_update(&mut surface, "ㅎ"));
        assert!(!mgr.commit(&mut surface));
        assert!(mgr.composition_update(&mut surface, "하"));
        assert!(mgr.composition_end(&mut surface));
        assert!(mgr.commit(&mut surface));
        assert_eq!(mgr.stack_len(), 1);
    }
}
