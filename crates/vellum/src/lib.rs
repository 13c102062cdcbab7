//! vellum is the command/transaction engine of a rich-text editing surface.
//!
//! Editing operations are expressed as invertible [`Command`]s, executed in
//! batches by a per-surface [`CommandManager`], grouped into
//! [`Transaction`]s, and stored in a bounded [`UndoStack`] that merges
//! keystroke-grained commands (including IME composition runs) into
//! user-perceived undo steps.
//!
//! The engine only executes, inverts, batches, and stores commands —
//! deciding *what* edit a keystroke maps to is the host's job.
#![warn(rustdoc::broken_intra_doc_links)]

pub mod command;
mod composition;
pub mod cursor;
pub mod editor;
pub mod manager;
pub mod registry;
pub mod surface;
pub mod tree;
pub mod undo;

pub use command::{
    Command, CommandFn, CommandKind, DeleteText, ExecutedCommand, FinalCallback, Functional,
    InsertCompositionText, InsertContent, InsertNode, InsertText, MergeDecision, MergeFn,
    RemoveContent, RemoveNode, ReplaceNode, ReplaceText,
};
pub use cursor::{Caret, CaretHint, CaretRange, Side};
pub use editor::Editor;
pub use manager::CommandManager;
pub use registry::SurfaceRegistry;
pub use surface::Surface;
pub use tree::{DocTree, Fragment, NodeKind, Position, Span};
pub use undo::{Transaction, UndoStack};
pub use vellum_common::{NodeId, SurfaceId, VellumError, VellumResult};
