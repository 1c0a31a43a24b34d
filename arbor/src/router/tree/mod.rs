//! A tree structure which services requests for a single HTTP method.

pub(crate) mod node;

use crate::router::pattern::Segment;
use crate::router::tree::node::Node;

/// One route tree. The owning index keeps one per HTTP method.
pub(crate) struct Tree {
    root: Node,
    registered: u64,
}

impl Tree {
    pub(crate) fn new() -> Tree {
        Tree {
            root: Node::root(),
            registered: 0,
        }
    }

    /// Inserts a leaf for the tokenized pattern. Returns `false` when an
    /// identically-tokenizing pattern already terminates there.
    pub(crate) fn insert(&mut self, segments: &[Segment], pattern: String) -> bool {
        let order = self.registered;
        self.registered += 1;
        self.root.insert(segments, pattern, order)
    }

    /// Finds the best-matching registered pattern for the request tokens.
    ///
    /// Ranking: non-wildcard leaves before wildcard leaves, then fewest
    /// dynamic segments traversed, then earliest registration.
    pub(crate) fn lookup(&self, tokens: &[&str]) -> Option<&str> {
        let mut found = Vec::new();
        self.root.collect_from_root(tokens, &mut found);
        found
            .into_iter()
            .min_by_key(|c| (c.wildcard, c.dynamic_count, c.order))
            .map(|c| c.pattern)
    }
}
