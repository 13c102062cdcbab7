use thiserror::Error;

use crate::NodeId;

pub type VellumResult<T> = Result<T, VellumError>;

#[derive(Error, Debug)]
pub enum VellumError {
    #[error("Index out of bound. The given pos is {pos}, but the length is {len}")]
    OutOfBound { pos: usize, len: usize },
    #[error("Cannot find node ({0})")]
    NodeNotFound(NodeId),
    #[error("Node ({0}) is not a text leaf")]
    NotAText(NodeId),
    #[error("Node ({0}) is not an element")]
    NotAnElement(NodeId),
    #[error("Node ({0}) is already attached. Detach it before inserting it again.")]
    AlreadyAttached(NodeId),
    #[error("Node ({0}) is not attached to the tree")]
    NotAttached(NodeId),
    #[error("Nodes ({0}) and ({1}) do not bound a contiguous sibling span")]
    InvalidSpan(NodeId, NodeId),
    #[error("Invalid argument ({0})")]
    ArgErr(Box<str>),
}
