//! Bounded undo/redo history and the merge rules that turn many small
//! executed commands into one undo step.

use std::collections::VecDeque;

use itertools::Itertools;
use tracing::{debug, error, instrument};

use crate::command::{
    Command, CommandKind, ExecutedCommand, FinalCallback, InsertNode, InsertText, MergeDecision,
};
use crate::cursor::{Caret, CaretHint, CaretRange, Side};
use crate::surface::Surface;

/// A merged, ordered group of executed commands treated as a single
/// undo/redo step, with the caret before its first command and after its
/// last. Immutable once built.
#[derive(Debug)]
pub struct Transaction {
    commands: Vec<ExecutedCommand>,
    src_caret: CaretHint,
    dest_caret: CaretHint,
}

impl Transaction {
    fn new(commands: Vec<ExecutedCommand>) -> Self {
        debug_assert!(!commands.is_empty());
        let src_caret = commands
            .first()
            .map(|c| c.src_caret().clone())
            .unwrap_or_default();
        let dest_caret = commands
            .last()
            .map(|c| c.dest_caret().clone())
            .unwrap_or_default();
        Self {
            commands,
            src_caret,
            dest_caret,
        }
    }

    pub fn commands(&self) -> &[ExecutedCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn src_caret(&self) -> &CaretHint {
        &self.src_caret
    }

    pub fn dest_caret(&self) -> &CaretHint {
        &self.dest_caret
    }

    /// Fan out to every constituent command's final callback, each at most
    /// once. Runs synchronously, on permanent removal from history only.
    fn fire_final_callbacks(mut self, surface: &mut Surface) {
        for cmd in &mut self.commands {
            if let Some(cb) = cmd.take_final_callback() {
                cb(surface);
            }
        }
    }
}

/// The bounded, position-addressed transaction history of one surface.
///
/// Transactions `[0, pos)` are done (undoable), `[pos, len)` are undone
/// (redoable). Pushing truncates the redo branch, then evicts the oldest
/// transaction when capacity is exceeded. The staging buffer holds executed
/// commands that have not been committed into a transaction yet.
#[derive(Debug)]
pub struct UndoStack {
    stack: VecDeque<Transaction>,
    pos: usize,
    capacity: usize,
    staged: Vec<ExecutedCommand>,
}

impl UndoStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            stack: VecDeque::new(),
            pos: 0,
            capacity: capacity.max(1),
            staged: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Transaction> {
        self.stack.get(idx)
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn can_undo(&self) -> bool {
        self.pos > 0
    }

    pub fn can_redo(&self) -> bool {
        self.pos < self.stack.len()
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    pub(crate) fn stage(&mut self, cmd: ExecutedCommand) {
        self.staged.push(cmd);
    }

    pub(crate) fn stage_all(&mut self, cmds: impl IntoIterator<Item = ExecutedCommand>) {
        self.staged.extend(cmds);
    }

    /// Invert and apply every staged command in reverse order, leaving no
    /// history residue. Used to roll back a speculative batch.
    pub(crate) fn discard_staged(&mut self, surface: &mut Surface) -> bool {
        if self.staged.is_empty() {
            return false;
        }
        let staged = std::mem::take(&mut self.staged);
        revert_executed(staged, surface);
        true
    }

    /// Merge the staging buffer into one transaction and push it.
    ///
    /// Returns false (pushing nothing) when the buffer is empty or when the
    /// merge passes eliminate every command, e.g. a composition session that
    /// nets to nothing.
    pub(crate) fn push_transaction(&mut self, surface: &mut Surface) -> bool {
        if self.staged.is_empty() {
            return false;
        }
        let staged = std::mem::take(&mut self.staged);
        let collapsed = collapse_composition_runs(staged);
        let merged = merge_adjacent(collapsed);
        if merged.is_empty() {
            debug!("staged batch collapsed to nothing; no transaction pushed");
            return false;
        }

        while self.stack.len() > self.pos {
            if let Some(txn) = self.stack.pop_back() {
                txn.fire_final_callbacks(surface);
            }
        }
        self.stack.push_back(Transaction::new(merged));
        self.pos += 1;
        if self.stack.len() > self.capacity {
            if let Some(evicted) = self.stack.pop_front() {
                evicted.fire_final_callbacks(surface);
            }
            self.pos -= 1;
        }
        true
    }

    /// Invert transaction `pos - 1` in reverse command order and move the
    /// pointer back. No-op at the bottom of the history.
    #[instrument(skip_all)]
    pub(crate) fn undo(&mut self, surface: &mut Surface) -> bool {
        if self.pos == 0 {
            return false;
        }
        let txn = &self.stack[self.pos - 1];
        for cmd in txn.commands.iter().rev() {
            match cmd.inverted() {
                Some(mut inv) => replay(&mut inv, surface),
                None => {
                    debug_assert!(false, "non-invertible command in history");
                    error!("undo skipped a non-invertible command");
                }
            }
        }
        if let CaretHint::At(range) = &txn.src_caret {
            surface.set_caret(range.clone());
        }
        self.pos -= 1;
        true
    }

    /// Re-apply transaction `pos` forward and advance the pointer. No-op at
    /// the top of the history.
    #[instrument(skip_all)]
    pub(crate) fn redo(&mut self, surface: &mut Surface) -> bool {
        if self.pos >= self.stack.len() {
            return false;
        }
        let txn = &mut self.stack[self.pos];
        for cmd in txn.commands.iter_mut() {
            match cmd.reapply(surface) {
                Ok(true) => {}
                Ok(false) => {
                    debug_assert!(false, "redo refused by the tree");
                    error!("redo refused by the tree; history is inconsistent");
                }
                Err(err) => {
                    debug_assert!(false, "redo replay failed: {err}");
                    error!(%err, "redo failed to re-apply a command");
                }
            }
        }
        let dest = txn.dest_caret.clone();
        if let CaretHint::At(range) = dest {
            surface.set_caret(range);
        }
        self.pos += 1;
        true
    }

    /// Drop everything, firing every final callback deterministically.
    pub(crate) fn teardown(&mut self, surface: &mut Surface) {
        for mut cmd in self.staged.drain(..) {
            if let Some(cb) = cmd.take_final_callback() {
                cb(surface);
            }
        }
        while let Some(txn) = self.stack.pop_front() {
            txn.fire_final_callbacks(surface);
        }
        self.pos = 0;
    }
}

/// Invert and apply executed commands in reverse order. Shared by batch
/// rollback and staging discard.
pub(crate) fn revert_executed(commands: Vec<ExecutedCommand>, surface: &mut Surface) {
    for cmd in commands.into_iter().rev() {
        match cmd.inverted() {
            Some(mut inv) => replay(&mut inv, surface),
            None => error!("rollback skipped a non-invertible command"),
        }
    }
}

/// Apply a replayed (inverse or stored) command. Failures here are internal
/// bugs: the tree state was produced by the command's dual, so the replay
/// must succeed. Logged and best-effort continued in release builds.
fn replay(cmd: &mut Command, surface: &mut Surface) {
    match cmd.apply(surface) {
        Ok(true) => {}
        Ok(false) => {
            debug_assert!(false, "replayed command refused by the tree");
            error!("replayed command refused by the tree; history is inconsistent");
        }
        Err(err) => {
            debug_assert!(false, "replayed command failed: {err}");
            error!(%err, "replayed command failed; history is inconsistent");
        }
    }
}

/// Pass 1: collapse every run of consecutive `InsertCompositionText`
/// commands into at most one real command.
fn collapse_composition_runs(cmds: Vec<ExecutedCommand>) -> Vec<ExecutedCommand> {
    let mut out = Vec::with_capacity(cmds.len());
    let mut iter = cmds.into_iter().peekable();
    while let Some(cmd) = iter.next() {
        if cmd.kind().as_insert_composition_text().is_none() {
            out.push(cmd);
            continue;
        }
        let mut run = vec![cmd];
        while iter
            .peek()
            .is_some_and(|c| c.kind().as_insert_composition_text().is_some())
        {
            run.push(iter.next().unwrap());
        }
        if run.len() == 1 && iter.peek().is_none() {
            // The host is expected to terminate a session with at least one
            // more signal; collapsing from the session anchor is a
            // best-effort fallback.
            debug_assert!(false, "composition run of one command with no terminator");
            error!("composition run of one command reached commit; collapsing best-effort");
        }
        if let Some(collapsed) = collapse_run(run) {
            out.push(collapsed);
        }
    }
    out
}

fn collapse_run(run: Vec<ExecutedCommand>) -> Option<ExecutedCommand> {
    let first = run.first()?;
    let first_info = first.kind().as_insert_composition_text()?.clone();
    let src_caret = first.src_caret().clone();
    let final_data = run
        .last()?
        .kind()
        .as_insert_composition_text()?
        .data
        .clone();
    if final_data.is_empty() {
        // Cancelled session: the whole run nets to nothing.
        return None;
    }

    let final_chars = final_data.chars().count();
    let (kind, dest_offset) = match first_info.fresh_leaf {
        // The host inserted a brand-new leaf for the session; the whole run
        // is that one node insertion.
        Some(at) => (
            CommandKind::InsertNode(InsertNode {
                node: first_info.target,
                exec_at: at,
            }),
            final_chars,
        ),
        // Composition data is a whole-session overwrite, so only the final
        // string matters.
        None => (
            CommandKind::InsertText(InsertText {
                target: first_info.target,
                offset: first_info.offset,
                data: final_data,
            }),
            first_info.offset + final_chars,
        ),
    };
    let mut cmd = Command::new(kind);
    cmd.src_caret = src_caret;
    cmd.dest_caret = CaretHint::At(CaretRange::collapsed(Caret::new(
        first_info.target,
        dest_offset,
        Side::Middle,
    )));
    Some(ExecutedCommand::upgrade(cmd))
}

/// Pass 2: fold textually adjacent same-kind neighbours into one command.
fn merge_adjacent(cmds: Vec<ExecutedCommand>) -> Vec<ExecutedCommand> {
    cmds.into_iter().coalesce(merge_pair).collect()
}

#[allow(clippy::result_large_err)]
fn merge_pair(
    mut a: ExecutedCommand,
    mut b: ExecutedCommand,
) -> Result<ExecutedCommand, (ExecutedCommand, ExecutedCommand)> {
    let insert_adjacent = matches!(
        (&a.inner.kind, &b.inner.kind),
        (CommandKind::InsertText(x), CommandKind::InsertText(y))
            if x.target == y.target && y.offset == x.offset + x.data.chars().count()
    );
    if insert_adjacent {
        let extra = b.take_final_callback();
        let dest = b.inner.dest_caret.clone();
        let y = match b.inner.kind {
            CommandKind::InsertText(y) => y,
            _ => unreachable!(),
        };
        if let CommandKind::InsertText(x) = &mut a.inner.kind {
            x.data.push_str(&y.data);
        }
        a.inner.dest_caret = dest;
        chain_final_callback(&mut a.inner, extra);
        return Ok(a);
    }

    // Backward deletions concatenate new-before-old (each successive
    // backspace removes characters closer to the session start); forward
    // deletions old-before-new. Mixed directions must stay separate steps.
    let delete_direction = match (&a.inner.kind, &b.inner.kind) {
        (CommandKind::DeleteText(x), CommandKind::DeleteText(y))
            if x.target == y.target && x.backward == y.backward =>
        {
            if x.backward && y.offset + y.data.chars().count() == x.offset {
                Some(true)
            } else if !x.backward && y.offset == x.offset {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    };
    if let Some(backward) = delete_direction {
        let extra = b.take_final_callback();
        let dest = b.inner.dest_caret.clone();
        let y = match b.inner.kind {
            CommandKind::DeleteText(y) => y,
            _ => unreachable!(),
        };
        if let CommandKind::DeleteText(x) = &mut a.inner.kind {
            if backward {
                x.offset = y.offset;
                let mut data = y.data;
                data.push_str(&x.data);
                x.data = data;
            } else {
                x.data.push_str(&y.data);
            }
        }
        a.inner.dest_caret = dest;
        chain_final_callback(&mut a.inner, extra);
        return Ok(a);
    }

    let decision = match (&a.inner.kind, &b.inner.kind) {
        (CommandKind::Functional(x), CommandKind::Functional(y)) => {
            x.merge.as_ref().map(|hook| hook(x, y))
        }
        _ => None,
    };
    match decision {
        Some(MergeDecision::Replacement(mut cmd)) => {
            if cmd.src_caret.is_unknown() {
                cmd.src_caret = a.inner.src_caret.clone();
            }
            if cmd.dest_caret.is_unknown() {
                cmd.dest_caret = b.inner.dest_caret.clone();
            }
            chain_final_callback(&mut cmd, a.take_final_callback());
            chain_final_callback(&mut cmd, b.take_final_callback());
            Ok(ExecutedCommand::upgrade(cmd))
        }
        Some(MergeDecision::TakeFirst) => {
            let extra = b.take_final_callback();
            a.inner.dest_caret = b.inner.dest_caret.clone();
            chain_final_callback(&mut a.inner, extra);
            Ok(a)
        }
        Some(MergeDecision::Separate) | None => Err((a, b)),
    }
}

/// A merged command inherits the callbacks of the commands it absorbed, so
/// eviction still releases everything.
fn chain_final_callback(cmd: &mut Command, extra: Option<FinalCallback>) {
    let Some(extra) = extra else { return };
    cmd.final_callback = Some(match cmd.final_callback.take() {
        Some(own) => Box::new(move |surface: &mut Surface| {
            own(surface);
            extra(surface);
        }),
        None => extra,
    });
}
