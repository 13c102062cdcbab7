use serde_json::{json, Value};
use smallvec::SmallVec;
use vellum_common::{NodeId, VellumError, VellumResult};

/// The document tree a surface edits.
///
/// Nodes live in an arena indexed by [`NodeId`]. Detaching a node removes it
/// from its parent's child list but keeps its data in the arena, so a
/// command (or a history entry) holding the id keeps the subtree alive.
/// [`DocTree::purge`] releases a detached subtree for good.
#[derive(Debug)]
pub struct DocTree {
    nodes: Vec<Option<NodeData>>,
    root: NodeId,
}

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element { tag: String, children: Vec<NodeId> },
    Text(String),
}

/// A node-boundary (or in-text) location.
///
/// When `node` is an element, `offset` is an index into its children — a
/// node boundary. When `node` is a text leaf the position sits inside text;
/// node-level insertion there is refused, not performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub node: NodeId,
    pub offset: usize,
}

impl Position {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// Bounds of a contiguous run of siblings, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub first: NodeId,
    pub last: NodeId,
}

impl Span {
    pub fn new(first: NodeId, last: NodeId) -> Self {
        Self { first, last }
    }
}

/// A detached contiguous sibling run, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    nodes: SmallVec<[NodeId; 2]>,
}

impl Fragment {
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn first(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    pub fn last(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    /// The span this fragment would bound once reattached.
    pub fn bounds(&self) -> Option<Span> {
        Some(Span::new(self.first()?, self.last()?))
    }
}

impl DocTree {
    pub fn new() -> Self {
        let mut tree = DocTree {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        let root = tree.alloc(NodeKind::Element {
            tag: "doc".into(),
            children: Vec::new(),
        });
        tree.root = root;
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(NodeData { parent: None, kind }));
        id
    }

    /// Allocate a detached element node.
    pub fn new_element(&mut self, tag: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Element {
            tag: tag.into(),
            children: Vec::new(),
        })
    }

    /// Allocate a detached text leaf.
    pub fn new_text(&mut self, data: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Text(data.into()))
    }

    fn node(&self, id: NodeId) -> VellumResult<&NodeData> {
        self.nodes
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .ok_or(VellumError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> VellumResult<&mut NodeData> {
        self.nodes
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or(VellumError::NodeNotFound(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn kind(&self, id: NodeId) -> VellumResult<&NodeKind> {
        Ok(&self.node(id)?.kind)
    }

    pub fn parent(&self, id: NodeId) -> VellumResult<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    pub fn children(&self, id: NodeId) -> VellumResult<&[NodeId]> {
        match &self.node(id)?.kind {
            NodeKind::Element { children, .. } => Ok(children),
            NodeKind::Text(_) => Err(VellumError::NotAnElement(id)),
        }
    }

    pub fn text(&self, id: NodeId) -> VellumResult<&str> {
        match &self.node(id)?.kind {
            NodeKind::Text(data) => Ok(data),
            NodeKind::Element { .. } => Err(VellumError::NotAText(id)),
        }
    }

    /// Length of a text leaf in unicode codepoints.
    pub fn text_len(&self, id: NodeId) -> VellumResult<usize> {
        Ok(self.text(id)?.chars().count())
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Ok(NodeKind::Text(_)))
    }

    /// Whether the node is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = id;
        loop {
            if cur == self.root {
                return true;
            }
            match self.node(cur).ok().and_then(|n| n.parent) {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }

    /// Delete `del_chars` codepoints at `offset` and insert `insert` in
    /// their place. Returns the removed text.
    ///
    /// Offsets are measured against the pre-splice content; a range past the
    /// end of the leaf is a contract violation, not a recoverable case.
    pub fn splice_text(
        &mut self,
        target: NodeId,
        offset: usize,
        del_chars: usize,
        insert: &str,
    ) -> VellumResult<String> {
        let id = target;
        let data = match &mut self.node_mut(id)?.kind {
            NodeKind::Text(data) => data,
            NodeKind::Element { .. } => return Err(VellumError::NotAText(id)),
        };
        let total = data.chars().count();
        if offset + del_chars > total {
            return Err(VellumError::OutOfBound {
                pos: offset + del_chars,
                len: total,
            });
        }
        let start = byte_offset(data, offset);
        let end = start + byte_offset(&data[start..], del_chars);
        let removed = data[start..end].to_string();
        data.replace_range(start..end, insert);
        Ok(removed)
    }

    /// Attach a detached node at a node boundary.
    ///
    /// Returns `Ok(false)` without mutating anything when the position sits
    /// inside a text leaf (a "surrounds-text" position).
    pub fn insert_node(&mut self, node: NodeId, at: &Position) -> VellumResult<bool> {
        if self.node(node)?.parent.is_some() || node == self.root {
            return Err(VellumError::AlreadyAttached(node));
        }
        {
            let parent = self.node_mut(at.node)?;
            match &mut parent.kind {
                NodeKind::Text(_) => return Ok(false),
                NodeKind::Element { children, .. } => {
                    if at.offset > children.len() {
                        return Err(VellumError::OutOfBound {
                            pos: at.offset,
                            len: children.len(),
                        });
                    }
                    children.insert(at.offset, node);
                }
            }
        }
        self.node_mut(node)?.parent = Some(at.node);
        Ok(true)
    }

    /// Detach a node from its parent, returning the position it held.
    /// The node's data stays in the arena until [`DocTree::purge`].
    pub fn detach_node(&mut self, node: NodeId) -> VellumResult<Position> {
        let parent = self.node(node)?.parent.ok_or(VellumError::NotAttached(node))?;
        let offset = {
            match &mut self.node_mut(parent)?.kind {
                NodeKind::Element { children, .. } => {
                    let idx = children
                        .iter()
                        .position(|c| *c == node)
                        .ok_or(VellumError::NotAttached(node))?;
                    children.remove(idx);
                    idx
                }
                NodeKind::Text(_) => return Err(VellumError::NotAnElement(parent)),
            }
        };
        self.node_mut(node)?.parent = None;
        Ok(Position::new(parent, offset))
    }

    /// Swap `old` for the detached node `new` at `old`'s current location.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> VellumResult<()> {
        if self.node(new)?.parent.is_some() || new == self.root {
            return Err(VellumError::AlreadyAttached(new));
        }
        let at = self.detach_node(old)?;
        let inserted = self.insert_node(new, &at)?;
        debug_assert!(inserted, "replace target position must be a node boundary");
        Ok(())
    }

    /// Where the node currently sits under its parent.
    pub fn position_of(&self, node: NodeId) -> VellumResult<Position> {
        let parent = self.node(node)?.parent.ok_or(VellumError::NotAttached(node))?;
        let offset = self
            .children(parent)?
            .iter()
            .position(|c| *c == node)
            .ok_or(VellumError::NotAttached(node))?;
        Ok(Position::new(parent, offset))
    }

    /// Detach the contiguous sibling run bounded by `span`, returning the
    /// fragment and the position the run occupied.
    pub fn extract_span(&mut self, span: &Span) -> VellumResult<(Fragment, Position)> {
        let first_at = self.position_of(span.first)?;
        let last_at = self.position_of(span.last)?;
        if first_at.node != last_at.node || first_at.offset > last_at.offset {
            return Err(VellumError::InvalidSpan(span.first, span.last));
        }
        let removed: SmallVec<[NodeId; 2]> = {
            match &mut self.node_mut(first_at.node)?.kind {
                NodeKind::Element { children, .. } => {
                    children.drain(first_at.offset..=last_at.offset).collect()
                }
                NodeKind::Text(_) => return Err(VellumError::NotAnElement(first_at.node)),
            }
        };
        for id in &removed {
            self.node_mut(*id)?.parent = None;
        }
        Ok((Fragment { nodes: removed }, first_at))
    }

    /// Reattach a detached fragment at a node boundary. Same refusal rule as
    /// [`DocTree::insert_node`].
    pub fn insert_fragment(&mut self, fragment: &Fragment, at: &Position) -> VellumResult<bool> {
        for id in fragment.nodes() {
            if self.node(*id)?.parent.is_some() || *id == self.root {
                return Err(VellumError::AlreadyAttached(*id));
            }
        }
        {
            let parent = self.node_mut(at.node)?;
            match &mut parent.kind {
                NodeKind::Text(_) => return Ok(false),
                NodeKind::Element { children, .. } => {
                    if at.offset > children.len() {
                        return Err(VellumError::OutOfBound {
                            pos: at.offset,
                            len: children.len(),
                        });
                    }
                    for (i, id) in fragment.nodes().iter().enumerate() {
                        children.insert(at.offset + i, *id);
                    }
                }
            }
        }
        for id in fragment.nodes() {
            self.node_mut(*id)?.parent = Some(at.node);
        }
        Ok(true)
    }

    /// Release a detached subtree's arena slots.
    pub fn purge(&mut self, node: NodeId) -> VellumResult<()> {
        if self.node(node)?.parent.is_some() || node == self.root {
            return Err(VellumError::AlreadyAttached(node));
        }
        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            if let Some(data) = self.nodes.get_mut(id.index()).and_then(|slot| slot.take()) {
                if let NodeKind::Element { children, .. } = data.kind {
                    pending.extend(children);
                }
            }
        }
        Ok(())
    }

    pub fn to_json_value(&self) -> Value {
        self.node_to_value(self.root)
    }

    pub fn node_to_value(&self, id: NodeId) -> Value {
        match self.kind(id) {
            Ok(NodeKind::Text(data)) => json!(data),
            Ok(NodeKind::Element { tag, children }) => json!({
                "tag": tag,
                "children": children
                    .iter()
                    .map(|c| self.node_to_value(*c))
                    .collect::<Vec<_>>(),
            }),
            Err(_) => Value::Null,
        }
    }
}

impl Default for DocTree {
    fn default() -> Self {
        Self::new()
    }
}

fn byte_offset(s: &str, chars: usize) -> usize {
    let mut remaining = chars;
    for (idx, _) in s.char_indices() {
        if remaining == 0 {
            return idx;
        }
        remaining -= 1;
    }
    s.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree_with_text(data: &str) -> (DocTree, NodeId) {
        let mut tree = DocTree::new();
        let text = tree.new_text(data);
        let root = tree.root();
        tree.insert_node(text, &Position::new(root, 0)).unwrap();
        (tree, text)
    }

    #[test]
    fn splice_inserts_and_removes_by_codepoint() {
        let (mut tree, text) = tree_with_text("héllo");
        let removed = tree.splice_text(text, 1, 2, "a").unwrap();
        assert_eq!(removed, "él");
        assert_eq!(tree.text(text).unwrap(), "halo");
    }

    #[test]
    fn splice_past_end_is_out_of_bound() {
        let (mut tree, text) = tree_with_text("hi");
        let err = tree.splice_text(text, 1, 2, "").unwrap_err();
        assert!(matches!(err, VellumError::OutOfBound { pos: 3, len: 2 }));
        assert_eq!(tree.text(text).unwrap(), "hi");
    }

    #[test]
    fn insert_inside_text_is_refused() {
        let (mut tree, text) = tree_with_text("hi");
        let node = tree.new_element("p");
        assert!(!tree.insert_node(node, &Position::new(text, 1)).unwrap());
        assert_eq!(tree.parent(node).unwrap(), None);
    }

    #[test]
    fn detach_returns_prior_position_and_keeps_data() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let a = tree.new_element("p");
        let b = tree.new_element("p");
        tree.insert_node(a, &Position::new(root, 0)).unwrap();
        tree.insert_node(b, &Position::new(root, 1)).unwrap();

        let at = tree.detach_node(b).unwrap();
        assert_eq!(at, Position::new(root, 1));
        assert!(!tree.is_attached(b));
        assert!(tree.contains(b));

        tree.insert_node(b, &at).unwrap();
        assert_eq!(tree.position_of(b).unwrap(), at);
    }

    #[test]
    fn extract_and_reinsert_span() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let ids: Vec<_> = (0..4).map(|_| tree.new_element("p")).collect();
        for (i, id) in ids.iter().enumerate() {
            tree.insert_node(*id, &Position::new(root, i)).unwrap();
        }

        let (fragment, at) = tree.extract_span(&Span::new(ids[1], ids[2])).unwrap();
        assert_eq!(fragment.nodes(), &[ids[1], ids[2]]);
        assert_eq!(at, Position::new(root, 1));
        assert_eq!(tree.children(root).unwrap(), &[ids[0], ids[3]]);

        assert!(tree.insert_fragment(&fragment, &at).unwrap());
        assert_eq!(tree.children(root).unwrap(), &ids[..]);
    }

    #[test]
    fn non_sibling_span_is_invalid() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let outer = tree.new_element("p");
        let inner = tree.new_element("em");
        tree.insert_node(outer, &Position::new(root, 0)).unwrap();
        tree.insert_node(inner, &Position::new(outer, 0)).unwrap();
        let err = tree.extract_span(&Span::new(outer, inner)).unwrap_err();
        assert!(matches!(err, VellumError::InvalidSpan(_, _)));
    }

    #[test]
    fn purge_releases_subtree() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.new_element("p");
        let t = tree.new_text("x");
        tree.insert_node(p, &Position::new(root, 0)).unwrap();
        tree.insert_node(t, &Position::new(p, 0)).unwrap();

        tree.detach_node(p).unwrap();
        tree.purge(p).unwrap();
        assert!(!tree.contains(p));
        assert!(!tree.contains(t));
    }

    #[test]
    fn json_shape() {
        let (mut tree, _) = tree_with_text("hi");
        let p = tree.new_element("p");
        let root = tree.root();
        tree.insert_node(p, &Position::new(root, 1)).unwrap();
        assert_eq!(
            tree.to_json_value(),
            json!({"tag": "doc", "children": ["hi", {"tag": "p", "children": []}]})
        );
    }
}
