//! A naive, simple oracle implementation for differential testing.
//!
//! The outline is a plain nested `Vec` where position is order, so every
//! operation is a direct list edit with no order values or parent links.
use md_blocks::BlockId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: BlockId,
    pub content: String,
    pub children: Vec<Node>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outline {
    roots: Vec<Node>,
}

impl Outline {
    pub fn new() -> Self {
        Self { roots: Vec::new() }
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.flatten().iter().any(|(found, _)| *found == id)
    }

    pub fn len(&self) -> usize {
        self.flatten().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Pre-order `(id, depth)` pairs.
    pub fn flatten(&self) -> Vec<(BlockId, usize)> {
        let mut out = Vec::new();
        Self::walk(&self.roots, 0, &mut out);
        out
    }

    /// Child ids of `parent` (`None` for the top level) in display order.
    pub fn children(&self, parent: Option<BlockId>) -> Vec<BlockId> {
        let list = match parent {
            None => Some(&self.roots),
            Some(parent) => Self::find(&self.roots, parent).map(|node| &node.children),
        };
        list.map(|nodes| nodes.iter().map(|node| node.id).collect())
            .unwrap_or_default()
    }

    /// Inserts a leaf under `parent`, directly after `after` or at the end.
    pub fn insert(
        &mut self,
        parent: Option<BlockId>,
        after: Option<BlockId>,
        id: BlockId,
        content: &str,
    ) -> bool {
        let Some(list) = self.list_mut(parent) else {
            return false;
        };
        let index = match after {
            Some(after) => match list.iter().position(|node| node.id == after) {
                Some(position) => position + 1,
                None => return false,
            },
            None => list.len(),
        };
        list.insert(
            index,
            Node {
                id,
                content: content.to_string(),
                children: Vec::new(),
            },
        );
        true
    }

    /// Removes the node and its subtree, returning every removed id.
    pub fn delete(&mut self, id: BlockId) -> Vec<BlockId> {
        match Self::take(&mut self.roots, id) {
            Some(node) => {
                let mut out = Vec::new();
                Self::walk(std::slice::from_ref(&node), 0, &mut out);
                out.into_iter().map(|(id, _)| id).collect()
            }
            None => Vec::new(),
        }
    }

    /// Moves the node to the end of its previous sibling's children.
    pub fn indent(&mut self, id: BlockId) -> bool {
        let Some(list) = Self::list_containing(&mut self.roots, id) else {
            return false;
        };
        let position = list.iter().position(|node| node.id == id).unwrap();
        if position == 0 {
            return false;
        }
        let node = list.remove(position);
        list[position - 1].children.push(node);
        true
    }

    /// Moves the node directly after its parent in the grandparent's list.
    pub fn outdent(&mut self, id: BlockId) -> bool {
        let parent = match self.parent_of(id) {
            Some(Some(parent)) => parent,
            _ => return false,
        };
        let Some(node) = Self::take(&mut self.roots, id) else {
            return false;
        };
        let grandparent = Self::list_containing(&mut self.roots, parent).unwrap();
        let position = grandparent.iter().position(|n| n.id == parent).unwrap();
        grandparent.insert(position + 1, node);
        true
    }

    /// Moves the node to `to` among its siblings, clamped to the list.
    pub fn reorder(&mut self, id: BlockId, to: usize) -> bool {
        let Some(list) = Self::list_containing(&mut self.roots, id) else {
            return false;
        };
        let from = list.iter().position(|node| node.id == id).unwrap();
        let to = to.min(list.len() - 1);
        if from == to {
            return false;
        }
        let node = list.remove(from);
        list.insert(to, node);
        true
    }

    /// Drops `dragged` next to `target`. Both must share a parent.
    pub fn move_relative(&mut self, dragged: BlockId, target: BlockId, after: bool) -> bool {
        if dragged == target {
            return false;
        }
        match (self.parent_of(dragged), self.parent_of(target)) {
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }
        let list = Self::list_containing(&mut self.roots, dragged).unwrap();
        let from = list.iter().position(|node| node.id == dragged).unwrap();
        let node = list.remove(from);
        let at = list.iter().position(|node| node.id == target).unwrap();
        list.insert(if after { at + 1 } else { at }, node);
        true
    }

    /// `Some(None)` for a top-level node, `None` when absent.
    pub fn parent_of(&self, id: BlockId) -> Option<Option<BlockId>> {
        fn search(nodes: &[Node], parent: Option<BlockId>, id: BlockId) -> Option<Option<BlockId>> {
            for node in nodes {
                if node.id == id {
                    return Some(parent);
                }
                if let Some(found) = search(&node.children, Some(node.id), id) {
                    return Some(found);
                }
            }
            None
        }
        search(&self.roots, None, id)
    }

    fn walk(nodes: &[Node], depth: usize, out: &mut Vec<(BlockId, usize)>) {
        for node in nodes {
            out.push((node.id, depth));
            Self::walk(&node.children, depth + 1, out);
        }
    }

    fn find(nodes: &[Node], id: BlockId) -> Option<&Node> {
        for node in nodes {
            if node.id == id {
                return Some(node);
            }
            if let Some(found) = Self::find(&node.children, id) {
                return Some(found);
            }
        }
        None
    }

    fn find_mut(nodes: &mut [Node], id: BlockId) -> Option<&mut Node> {
        for node in nodes {
            if node.id == id {
                return Some(node);
            }
            if let Some(found) = Self::find_mut(&mut node.children, id) {
                return Some(found);
            }
        }
        None
    }

    fn list_mut(&mut self, parent: Option<BlockId>) -> Option<&mut Vec<Node>> {
        match parent {
            None => Some(&mut self.roots),
            Some(parent) => Self::find_mut(&mut self.roots, parent).map(|node| &mut node.children),
        }
    }

    fn list_containing(nodes: &mut Vec<Node>, id: BlockId) -> Option<&mut Vec<Node>> {
        if nodes.iter().any(|node| node.id == id) {
            return Some(nodes);
        }
        for node in nodes.iter_mut() {
            if let Some(found) = Self::list_containing(&mut node.children, id) {
                return Some(found);
            }
        }
        None
    }

    fn take(nodes: &mut Vec<Node>, id: BlockId) -> Option<Node> {
        let list = Self::list_containing(nodes, id)?;
        let position = list.iter().position(|node| node.id == id)?;
        Some(list.remove(position))
    }
}

/// Page packing written as the plain rule: walk the items, start a new page
/// when the next item does not fit, and treat a heading as needing room for
/// itself plus the following content item.
pub mod layout {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum Item {
        Block(f64),
        Heading(f64),
        Break,
    }

    /// Pages as lists of item indexes. Breaks never appear on a page.
    pub fn pack(items: &[Item], page_height: f64, keep_with_next: bool) -> Vec<Vec<usize>> {
        let mut pages: Vec<Vec<usize>> = vec![Vec::new()];
        let mut used = 0.0;
        for (index, item) in items.iter().enumerate() {
            let height = match item {
                Item::Break => {
                    if !pages.last().unwrap().is_empty() {
                        pages.push(Vec::new());
                        used = 0.0;
                    }
                    continue;
                }
                Item::Block(height) => *height,
                Item::Heading(height) => {
                    let mut next = 0.0;
                    if keep_with_next {
                        for later in &items[index + 1..] {
                            match later {
                                Item::Break => continue,
                                Item::Block(h) | Item::Heading(h) => {
                                    next = f64::min(*h, page_height);
                                    break;
                                }
                            }
                        }
                    }
                    if !pages.last().unwrap().is_empty() && used + height + next > page_height {
                        pages.push(Vec::new());
                        used = 0.0;
                    }
                    pages.last_mut().unwrap().push(index);
                    used += height;
                    continue;
                }
            };
            if !pages.last().unwrap().is_empty() && used + height > page_height {
                pages.push(Vec::new());
                used = 0.0;
            }
            pages.last_mut().unwrap().push(index);
            used += height;
        }
        pages.retain(|page| !page.is_empty());
        pages
    }
}
