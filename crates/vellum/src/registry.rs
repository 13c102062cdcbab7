//! Side-table of per-surface editors, keyed by a host-facing handle.
//!
//! Lifetime is explicit: the host mounts a surface when its editable area
//! appears and unmounts it when the area goes away. Unmounting flushes
//! every final callback still held by that surface's history — teardown is
//! deterministic, not left to drop order.

use rustc_hash::FxHashMap;
use vellum_common::SurfaceId;

use crate::editor::Editor;

#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    editors: FxHashMap<SurfaceId, Editor>,
    next_id: u64,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&mut self, max_undo_steps: usize) -> SurfaceId {
        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        self.editors.insert(id, Editor::new(max_undo_steps));
        id
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Editor> {
        self.editors.get(&id)
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Editor> {
        self.editors.get_mut(&id)
    }

    /// Tear the surface down, firing its remaining final callbacks, and
    /// drop it. Returns whether the id was mounted.
    pub fn unmount(&mut self, id: SurfaceId) -> bool {
        match self.editors.remove(&id) {
            Some(mut editor) => {
                editor.teardown();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.editors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.editors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::tree::Position;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn mount_assigns_distinct_ids() {
        let mut registry = SurfaceRegistry::new();
        let a = registry.mount(10);
        let b = registry.mount(10);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unmount_fires_final_callbacks_once() {
        let fired = Rc::new(Cell::new(0u32));
        let mut registry = SurfaceRegistry::new();
        let id = registry.mount(10);

        {
            let editor = registry.get_mut(id).unwrap();
            let root = editor.tree().root();
            let text = editor.tree_mut().new_text("");
            editor
                .tree_mut()
                .insert_node(text, &Position::new(root, 0))
                .unwrap();
            let fired = fired.clone();
            editor.push(
                Command::insert_text(text, 0, "x")
                    .with_final_callback(move |_| fired.set(fired.get() + 1)),
            );
            editor.handle(None);
            editor.commit();
        }

        assert!(registry.unmount(id));
        assert_eq!(fired.get(), 1);
        assert!(!registry.unmount(id));
        assert_eq!(fired.get(), 1);
    }
}
