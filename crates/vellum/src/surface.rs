use crate::cursor::CaretRange;
use crate::tree::DocTree;

/// One mounted editing area: the document tree plus the live caret.
///
/// This is the value commands execute against. The engine records caret
/// values opaquely; it only ever writes the caret back when replaying a
/// transaction boundary.
#[derive(Debug)]
pub struct Surface {
    pub tree: DocTree,
    caret: Option<CaretRange>,
}

impl Surface {
    pub fn new() -> Self {
        Self {
            tree: DocTree::new(),
            caret: None,
        }
    }

    pub fn caret(&self) -> Option<&CaretRange> {
        self.caret.as_ref()
    }

    pub fn set_caret(&mut self, caret: CaretRange) {
        self.caret = Some(caret);
    }

    pub fn clear_caret(&mut self) {
        self.caret = None;
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self::new()
    }
}
