//! Entry type tying one surface to its command manager.

use crate::command::Command;
use crate::cursor::CaretRange;
use crate::manager::CommandManager;
use crate::surface::Surface;
use crate::tree::DocTree;
use crate::undo::UndoStack;

/// One mounted editing surface with its command manager and history, 1:1.
#[derive(Debug)]
pub struct Editor {
    surface: Surface,
    commands: CommandManager,
}

impl Editor {
    /// `max_undo_steps` is the only construction-time configuration: the
    /// depth of the transaction history.
    pub fn new(max_undo_steps: usize) -> Self {
        Self {
            surface: Surface::new(),
            commands: CommandManager::new(max_undo_steps),
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut Surface {
        &mut self.surface
    }

    pub fn tree(&self) -> &DocTree {
        &self.surface.tree
    }

    pub fn tree_mut(&mut self) -> &mut DocTree {
        &mut self.surface.tree
    }

    pub fn manager(&self) -> &CommandManager {
        &self.commands
    }

    pub fn history(&self) -> &UndoStack {
        self.commands.history()
    }

    pub fn push(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }

    pub fn push_all(&mut self, cmds: impl IntoIterator<Item = Command>) {
        self.commands.push_all(cmds);
    }

    pub fn handle(&mut self, final_dest: Option<CaretRange>) -> bool {
        self.commands.handle(&mut self.surface, final_dest)
    }

    pub fn commit(&mut self) -> bool {
        self.commands.commit(&mut self.surface)
    }

    pub fn discard(&mut self) -> bool {
        self.commands.discard(&mut self.surface)
    }

    pub fn start_transaction(&mut self) -> bool {
        self.commands.start_transaction()
    }

    pub fn close_transaction(&mut self) -> bool {
        self.commands.close_transaction(&mut self.surface)
    }

    pub fn commit_next_handle(&mut self, commit_now: bool) {
        self.commands.commit_next_handle(&mut self.surface, commit_now);
    }

    pub fn undo(&mut self) -> bool {
        self.commands.undo_transaction(&mut self.surface)
    }

    pub fn redo(&mut self) -> bool {
        self.commands.redo_transaction(&mut self.surface)
    }

    pub fn composition_start(&mut self) -> bool {
        self.commands.composition_start(&mut self.surface)
    }

    pub fn composition_update(&mut self, data: &str) -> bool {
        self.commands.composition_update(&mut self.surface, data)
    }

    pub fn composition_end(&mut self) -> bool {
        self.commands.composition_end(&mut self.surface)
    }

    pub fn is_composing(&self) -> bool {
        self.commands.is_composing()
    }

    pub fn in_transaction(&self) -> bool {
        self.commands.in_transaction()
    }

    pub fn has_pending(&self) -> bool {
        self.commands.has_pending()
    }

    pub fn stack_len(&self) -> usize {
        self.commands.stack_len()
    }

    pub fn can_undo(&self) -> bool {
        self.commands.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.commands.can_redo()
    }

    pub(crate) fn teardown(&mut self) {
        let Self { surface, commands } = self;
        commands.teardown(surface);
    }
}
