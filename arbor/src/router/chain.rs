//! Pre-computed effective middleware chains for router groups.
//!
//! The cache is keyed by group identity. Group prefixes may contain dynamic
//! segments, so each prefix is lowered to its segment-kind list once at
//! registration and request paths are walked against that list at dispatch
//! time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::middleware::Middleware;
use crate::router::group::GroupData;
use crate::router::pattern::{request_tokens, Segment};

/// One group lowered for dispatch: its compiled prefix and the effective
/// root-to-leaf middleware chain.
struct CompiledGroup {
    segments: Vec<Segment>,
    chain: Vec<Middleware>,
}

struct Computed {
    epoch: u64,
    /// Sorted for dispatch: most segments first, then registration order.
    groups: Vec<CompiledGroup>,
}

/// Caches `group -> effective middleware chain`, invalidated whenever a
/// group is created or gains middleware and recomputed lazily before the
/// next dispatch.
pub(crate) struct ChainCache {
    epoch: AtomicU64,
    computed: Mutex<Computed>,
}

impl ChainCache {
    pub(crate) fn new() -> ChainCache {
        ChainCache {
            epoch: AtomicU64::new(1),
            computed: Mutex::new(Computed {
                epoch: 0,
                groups: Vec::new(),
            }),
        }
    }

    /// Marks the cache stale; the next collect recomputes.
    pub(crate) fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::Release);
    }

    /// Concatenates the effective chains of every group whose prefix
    /// matches `path`, de-duplicated by handler identity while preserving
    /// first occurrence.
    pub(crate) fn collect(&self, groups: &[GroupData], path: &str) -> Vec<Middleware> {
        let epoch = self.epoch.load(Ordering::Acquire);
        let mut computed = self.computed.lock().unwrap();
        if computed.epoch != epoch {
            computed.groups = compile(groups);
            computed.epoch = epoch;
        }

        let tokens = request_tokens(path);
        let mut chain: Vec<Middleware> = Vec::new();
        for group in &computed.groups {
            if prefix_matches(&group.segments, &tokens) {
                for middleware in &group.chain {
                    push_unique(&mut chain, middleware.clone());
                }
            }
        }
        chain
    }
}

/// Appends `middleware` unless a handler with the same identity is already
/// present.
pub(crate) fn push_unique(chain: &mut Vec<Middleware>, middleware: Middleware) {
    let incoming = identity(&middleware);
    if chain.iter().all(|existing| identity(existing) != incoming) {
        chain.push(middleware);
    }
}

fn identity(middleware: &Middleware) -> *const () {
    std::sync::Arc::as_ptr(middleware) as *const ()
}

fn compile(groups: &[GroupData]) -> Vec<CompiledGroup> {
    let mut order: Vec<usize> = (0..groups.len()).collect();
    // Longest prefix (by segment count) first; ties by earliest
    // registration, which is the registry index.
    order.sort_by(|&a, &b| {
        groups[b]
            .segments
            .len()
            .cmp(&groups[a].segments.len())
            .then(a.cmp(&b))
    });

    order
        .into_iter()
        .map(|id| CompiledGroup {
            segments: groups[id].segments.clone(),
            chain: effective_chain(groups, id),
        })
        .collect()
}

/// Root-to-leaf concatenation of group middlewares, de-duplicated by
/// identity.
fn effective_chain(groups: &[GroupData], id: usize) -> Vec<Middleware> {
    let mut lineage = Vec::new();
    let mut current = Some(id);
    while let Some(i) = current {
        lineage.push(i);
        current = groups[i].parent;
    }
    lineage.reverse();

    let mut chain = Vec::new();
    for i in lineage {
        for middleware in &groups[i].middlewares {
            push_unique(&mut chain, middleware.clone());
        }
    }
    chain
}

/// Walks request tokens against a compiled prefix. Dynamic segments match
/// any single token; a wildcard matches the remainder. A prefix shorter
/// than the path still matches (it is a prefix).
fn prefix_matches(segments: &[Segment], tokens: &[&str]) -> bool {
    let mut i = 0;
    for segment in segments {
        match segment {
            Segment::Static(text) => {
                if tokens.get(i).map(|t| *t == text.as_str()) != Some(true) {
                    return false;
                }
                i += 1;
            }
            Segment::Named(_) | Segment::Braced(_) => {
                if i >= tokens.len() {
                    return false;
                }
                i += 1;
            }
            Segment::Wildcard(_) => return true,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::{Handler, HandlerResult};
    use crate::router::pattern::tokenize;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Tag;

    #[async_trait]
    impl Handler for Tag {
        async fn handle(&self, _ctx: &mut Context) -> HandlerResult {
            Ok(())
        }
    }

    fn mw() -> Middleware {
        Arc::new(Tag)
    }

    fn group(prefix: &str, parent: Option<usize>, middlewares: Vec<Middleware>) -> GroupData {
        GroupData {
            prefix: prefix.to_string(),
            segments: tokenize(prefix),
            parent,
            middlewares,
        }
    }

    #[test]
    fn prefix_matching_honors_dynamic_segments() {
        assert!(prefix_matches(&tokenize("/"), &["anything"]));
        assert!(prefix_matches(&tokenize("/v1"), &["v1", "users"]));
        assert!(!prefix_matches(&tokenize("/v1"), &["v2"]));
        assert!(prefix_matches(&tokenize("/v1/:tenant"), &["v1", "acme"]));
        assert!(!prefix_matches(&tokenize("/v1/:tenant"), &["v1"]));
        assert!(prefix_matches(&tokenize("/files/*"), &["files", "a", "b"]));
        assert!(prefix_matches(&tokenize("/files/*"), &["files"]));
    }

    #[test]
    fn effective_chain_concatenates_root_to_leaf() {
        let (a, b, c) = (mw(), mw(), mw());
        let groups = vec![
            group("/", None, vec![a.clone()]),
            group("/v1", Some(0), vec![b.clone()]),
            group("/v1/users", Some(1), vec![c.clone()]),
        ];
        let chain = effective_chain(&groups, 2);
        assert_eq!(chain.len(), 3);
        assert!(Arc::ptr_eq(&chain[0], &a));
        assert!(Arc::ptr_eq(&chain[1], &b));
        assert!(Arc::ptr_eq(&chain[2], &c));
    }

    #[test]
    fn duplicate_identity_is_dropped_keeping_first_occurrence() {
        let (a, b) = (mw(), mw());
        let groups = vec![
            group("/", None, vec![a.clone(), b.clone()]),
            group("/v1", Some(0), vec![a.clone()]),
        ];
        let chain = effective_chain(&groups, 1);
        assert_eq!(chain.len(), 2);
        assert!(Arc::ptr_eq(&chain[0], &a));
        assert!(Arc::ptr_eq(&chain[1], &b));
    }

    #[test]
    fn collect_merges_nested_groups_in_order() {
        let (a, b, c) = (mw(), mw(), mw());
        let groups = vec![
            group("/", None, vec![a.clone()]),
            group("/v1", Some(0), vec![b.clone()]),
            group("/v1/users", Some(1), vec![c.clone()]),
        ];

        let cache = ChainCache::new();
        let chain = cache.collect(&groups, "/v1/users/7");
        // The longest group contributes first, but its chain already embeds
        // the ancestors, so order is root-to-leaf.
        assert_eq!(chain.len(), 3);
        assert!(Arc::ptr_eq(&chain[0], &a));
        assert!(Arc::ptr_eq(&chain[1], &b));
        assert!(Arc::ptr_eq(&chain[2], &c));

        let chain = cache.collect(&groups, "/v1/status");
        assert_eq!(chain.len(), 2);

        let chain = cache.collect(&groups, "/other");
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn invalidation_picks_up_new_middleware() {
        let a = mw();
        let mut groups = vec![group("/", None, vec![a.clone()])];

        let cache = ChainCache::new();
        assert_eq!(cache.collect(&groups, "/x").len(), 1);

        groups[0].middlewares.push(mw());
        // Stale until invalidated.
        assert_eq!(cache.collect(&groups, "/x").len(), 1);
        cache.invalidate();
        assert_eq!(cache.collect(&groups, "/x").len(), 2);
    }
}
