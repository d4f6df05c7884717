use crate::tree::{NodeIdx, Tree};

/// Depth-first, left-to-right iteration yielding each node before its descendants.
pub struct Preorder<'a> {
    tree: &'a Tree,
    start: NodeIdx,
    include_self: bool,
    stack: Vec<NodeIdx>,
}

impl<'a> Preorder<'a> {
    fn new(tree: &'a Tree, start: NodeIdx, include_self: bool) -> Self {
        Self {
            tree,
            start,
            include_self,
            stack: vec![start],
        }
    }
}

impl Iterator for Preorder<'_> {
    type Item = NodeIdx;

    fn next(&mut self) -> Option<NodeIdx> {
        loop {
            let curr = self.stack.pop()?;
            self.stack
                .extend(self.tree.children(curr).iter().rev().copied());
            if self.include_self || curr != self.start {
                return Some(curr);
            }
        }
    }
}

/// Depth-first iteration yielding each node after all of its descendants.
///
/// Keeps one `(node, next child position)` entry per level, so auxiliary space is bounded by
/// the depth of the tree.
pub struct Postorder<'a> {
    tree: &'a Tree,
    start: NodeIdx,
    include_self: bool,
    stack: Vec<(NodeIdx, usize)>,
}

impl<'a> Postorder<'a> {
    fn new(tree: &'a Tree, start: NodeIdx, include_self: bool) -> Self {
        Self {
            tree,
            start,
            include_self,
            stack: vec![(start, 0)],
        }
    }
}

impl Iterator for Postorder<'_> {
    type Item = NodeIdx;

    fn next(&mut self) -> Option<NodeIdx> {
        loop {
            let (curr, child_pos) = *self.stack.last()?;
            match self.tree.children(curr).get(child_pos) {
                Some(&child) => {
                    if let Some(top) = self.stack.last_mut() {
                        top.1 += 1;
                    }
                    self.stack.push((child, 0));
                }
                None => {
                    self.stack.pop();
                    if self.include_self || curr != self.start {
                        return Some(curr);
                    }
                }
            }
        }
    }
}

/// Yields every internal node before its first and after its last child; tips appear once.
pub struct PreAndPostorder<'a> {
    tree: &'a Tree,
    start: NodeIdx,
    include_self: bool,
    started: bool,
    stack: Vec<(NodeIdx, usize)>,
}

impl<'a> PreAndPostorder<'a> {
    fn new(tree: &'a Tree, start: NodeIdx, include_self: bool) -> Self {
        Self {
            tree,
            start,
            include_self,
            started: false,
            stack: Vec::new(),
        }
    }
}

impl Iterator for PreAndPostorder<'_> {
    type Item = NodeIdx;

    fn next(&mut self) -> Option<NodeIdx> {
        if !self.started {
            self.started = true;
            if self.tree.is_tip(self.start) {
                return self.include_self.then_some(self.start);
            }
            self.stack.push((self.start, 0));
            if self.include_self {
                return Some(self.start);
            }
        }
        loop {
            let (curr, child_pos) = *self.stack.last()?;
            match self.tree.children(curr).get(child_pos) {
                Some(&child) => {
                    if let Some(top) = self.stack.last_mut() {
                        top.1 += 1;
                    }
                    if !self.tree.is_tip(child) {
                        self.stack.push((child, 0));
                    }
                    return Some(child);
                }
                None => {
                    self.stack.pop();
                    if self.include_self || curr != self.start {
                        return Some(curr);
                    }
                }
            }
        }
    }
}

/// Depth-first iteration over the tips only.
pub struct Tips<'a> {
    tree: &'a Tree,
    start: NodeIdx,
    include_self: bool,
    stack: Vec<NodeIdx>,
}

impl<'a> Tips<'a> {
    fn new(tree: &'a Tree, start: NodeIdx, include_self: bool) -> Self {
        Self {
            tree,
            start,
            include_self,
            stack: vec![start],
        }
    }
}

impl Iterator for Tips<'_> {
    type Item = NodeIdx;

    fn next(&mut self) -> Option<NodeIdx> {
        loop {
            let curr = self.stack.pop()?;
            let children = self.tree.children(curr);
            if children.is_empty() {
                if self.include_self || curr != self.start {
                    return Some(curr);
                }
            } else {
                self.stack.extend(children.iter().rev().copied());
            }
        }
    }
}

/// One of the iterative traversals, as picked by [`Tree::traverse`].
pub enum Traversal<'a> {
    Preorder(Preorder<'a>),
    Postorder(Postorder<'a>),
    PreAndPostorder(PreAndPostorder<'a>),
    Tips(Tips<'a>),
}

impl Iterator for Traversal<'_> {
    type Item = NodeIdx;

    fn next(&mut self) -> Option<NodeIdx> {
        match self {
            Traversal::Preorder(iter) => iter.next(),
            Traversal::Postorder(iter) => iter.next(),
            Traversal::PreAndPostorder(iter) => iter.next(),
            Traversal::Tips(iter) => iter.next(),
        }
    }
}

impl Tree {
    /// Nodes below and including `idx`, parents before children.
    pub fn preorder(&self, idx: NodeIdx) -> Preorder<'_> {
        Preorder::new(self, idx, true)
    }

    /// Nodes below and including `idx`, children before parents.
    pub fn postorder(&self, idx: NodeIdx) -> Postorder<'_> {
        Postorder::new(self, idx, true)
    }

    /// Internal nodes twice (on the way down and up), tips once.
    pub fn pre_and_postorder(&self, idx: NodeIdx) -> PreAndPostorder<'_> {
        PreAndPostorder::new(self, idx, true)
    }

    /// Tips below `idx`. A tip `idx` yields itself only when `include_self` is set.
    pub fn iter_tips(&self, idx: NodeIdx, include_self: bool) -> Tips<'_> {
        Tips::new(self, idx, include_self)
    }

    /// Iterates over the subtree at `idx`.
    ///
    /// `self_before` and `self_after` pick preorder, postorder or both; with neither only tips
    /// are visited. A tip is yielded at most once.
    ///
    /// The iterator borrows the tree, so the structure cannot change while it runs. Use
    /// [`Tree::traverse_recursive`] to edit the tree during a walk.
    ///
    /// # Example
    /// ```
    /// use phylotree::tree;
    /// let tree = tree!("((A,B)x,C)y;");
    /// let names: Vec<&str> = tree
    ///     .traverse(tree.root(), false, true, true)
    ///     .map(|n| tree.node(n).name_str())
    ///     .collect();
    /// assert_eq!(names, vec!["A", "B", "x", "C", "y"]);
    /// ```
    pub fn traverse(
        &self,
        idx: NodeIdx,
        self_before: bool,
        self_after: bool,
        include_self: bool,
    ) -> Traversal<'_> {
        match (self_before, self_after) {
            (true, true) => {
                Traversal::PreAndPostorder(PreAndPostorder::new(self, idx, include_self))
            }
            (true, false) => Traversal::Preorder(Preorder::new(self, idx, include_self)),
            (false, true) => Traversal::Postorder(Postorder::new(self, idx, include_self)),
            (false, false) => Traversal::Tips(Tips::new(self, idx, include_self)),
        }
    }

    /// Recursive walk that calls `visit` with mutable access to the tree.
    ///
    /// Children are read from the live tree at every step, so `visit` may restructure nodes that
    /// were already visited. Uses the call stack, one frame per level.
    pub fn traverse_recursive<F>(
        &mut self,
        idx: NodeIdx,
        self_before: bool,
        self_after: bool,
        include_self: bool,
        visit: &mut F,
    ) where
        F: FnMut(&mut Tree, NodeIdx),
    {
        if self.is_tip(idx) {
            if include_self {
                visit(self, idx);
            }
            return;
        }
        if self_before && include_self {
            visit(self, idx);
        }
        let mut child_pos = 0;
        while let Some(&child) = self.children(idx).get(child_pos) {
            self.traverse_recursive(child, self_before, self_after, true, visit);
            child_pos += 1;
        }
        if self_after && include_self {
            visit(self, idx);
        }
    }
}
