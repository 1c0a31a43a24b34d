//! Defines `Node`, the recursive member of a per-method route tree.

use log::trace;

use crate::router::pattern::Segment;

/// A recursive member of `Tree` representing one segment of a registered
/// pattern. A node carries the full canonical pattern only when it is a
/// leaf, that is when a registration terminates on it.
///
/// Node identity is the segment (kind and text): `:id` and `{id}` are
/// distinct children of the same parent, while two registrations sharing
/// `:id` share the node.
pub(crate) struct Node {
    segment: Segment,
    /// Canonical pattern of the route terminating here, leaves only.
    pattern: Option<String>,
    /// Registration order of the leaf, used as the final tie-break.
    order: u64,
    children: Vec<Node>,
}

/// A leaf reached while matching a request path, with the number of
/// dynamic segments traversed to get there.
pub(crate) struct Candidate<'a> {
    pub pattern: &'a str,
    pub wildcard: bool,
    pub dynamic_count: usize,
    pub order: u64,
}

impl Node {
    pub(crate) fn new(segment: Segment) -> Node {
        Node {
            segment,
            pattern: None,
            order: 0,
            children: Vec::new(),
        }
    }

    /// The root sentinel, representing `/`.
    pub(crate) fn root() -> Node {
        Node::new(Segment::Static(String::new()))
    }

    /// Walks (creating as needed) the child path for `segments` and marks
    /// the final node as a leaf. Returns `false` when the leaf is already
    /// occupied, which is how the index detects duplicate registrations.
    pub(crate) fn insert(&mut self, segments: &[Segment], pattern: String, order: u64) -> bool {
        match segments.split_first() {
            None => {
                if self.pattern.is_some() {
                    return false;
                }
                trace!(" adding leaf `{}`", pattern);
                self.pattern = Some(pattern);
                self.order = order;
                true
            }
            Some((first, rest)) => {
                let position = self.children.iter().position(|c| c.segment == *first);
                let child = match position {
                    Some(i) => &mut self.children[i],
                    None => {
                        trace!(" adding child `{}` to `{}`", first, self.segment);
                        self.children.push(Node::new(first.clone()));
                        self.children.last_mut().unwrap()
                    }
                };
                child.insert(rest, pattern, order)
            }
        }
    }

    /// Collects every leaf reachable from the root for the given request
    /// tokens. Selection among candidates happens in `Tree::lookup`.
    pub(crate) fn collect_from_root<'a>(&'a self, tokens: &[&str], out: &mut Vec<Candidate<'a>>) {
        self.descend(tokens, 0, out);
    }

    // The node has already consumed its own segment; `rest` is what its
    // children must account for.
    fn descend<'a>(&'a self, rest: &[&str], dynamic_count: usize, out: &mut Vec<Candidate<'a>>) {
        if rest.is_empty() {
            if let Some(pattern) = &self.pattern {
                out.push(Candidate {
                    pattern,
                    wildcard: self.segment.is_wildcard(),
                    dynamic_count,
                    order: self.order,
                });
            }
            return;
        }
        for child in &self.children {
            child.matches(rest, dynamic_count, out);
        }
    }

    // The node must match `tokens[0]` (or, for a wildcard, the remainder).
    fn matches<'a>(&'a self, tokens: &[&str], dynamic_count: usize, out: &mut Vec<Candidate<'a>>) {
        let (first, rest) = match tokens.split_first() {
            Some(split) => split,
            None => return,
        };

        match &self.segment {
            Segment::Static(text) => {
                if text == first {
                    self.descend(rest, dynamic_count, out);
                }
            }
            Segment::Named(_) | Segment::Braced(_) => {
                self.descend(rest, dynamic_count + 1, out);
            }
            Segment::Wildcard(_) => {
                // Terminal: consumes first and everything after it.
                if let Some(pattern) = &self.pattern {
                    out.push(Candidate {
                        pattern,
                        wildcard: true,
                        dynamic_count: dynamic_count + 1,
                        order: self.order,
                    });
                }
            }
        }
    }
}
