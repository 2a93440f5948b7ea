//! The JWZ message-threading algorithm.
//!
//! Containers live in an arena (`Vec<Slot>`) and point at each other
//! with indices, so parent/child/sibling rewiring never aliases. A
//! slot without an article is a placeholder for a message id that was
//! referenced but never seen; placeholders that end up redundant are
//! pruned before the forest is returned.

use std::collections::HashMap;

use tracing::debug;

/// Input contract for threading: one message-like value.
pub trait Threadable {
    /// The `Message-Id` of this article.
    fn message_id(&self) -> &str;

    /// Referenced ancestor ids, oldest first.
    fn references(&self) -> &[String];

    /// Subject with reply markers stripped (see
    /// [`crate::subject::simplify_subject`]).
    fn simplified_subject(&self) -> String;

    /// Whether the original subject carried a reply marker.
    fn subject_is_reply(&self) -> bool;
}

/// One node of the threaded output forest. `article` is `None` for a
/// placeholder grouping node; such nodes always have at least two
/// children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNode<T> {
    pub article: Option<T>,
    pub children: Vec<ThreadNode<T>>,
}

struct Slot<T> {
    article: Option<T>,
    parent: Option<usize>,
    child: Option<usize>,
    next: Option<usize>,
}

impl<T> Slot<T> {
    fn new(article: Option<T>) -> Self {
        Self {
            article,
            parent: None,
            child: None,
            next: None,
        }
    }
}

/// Thread `articles` into a forest of conversation trees.
///
/// Runs the five JWZ phases in order: container construction from the
/// reference chains, root-set collection, empty-container pruning,
/// child-order reversal (so iteration yields oldest first), and
/// subject-based root merging. Returns the root forest; empty input
/// yields an empty forest.
pub fn thread<T: Threadable>(articles: impl IntoIterator<Item = T>) -> Vec<ThreadNode<T>> {
    let mut arena: Vec<Slot<T>> = Vec::new();
    let mut id_table: HashMap<String, usize> = HashMap::new();
    let mut bogus_id_count = 0usize;

    // Phase 1: build the container graph.
    for article in articles {
        build_container(&mut arena, &mut id_table, &mut bogus_id_count, article);
    }
    if arena.is_empty() {
        return Vec::new();
    }

    // Phase 2: gather parentless containers under a synthetic root.
    let root = arena.len();
    arena.push(Slot::new(None));
    for i in 0..root {
        if arena[i].parent.is_none() {
            debug_assert!(arena[i].next.is_none());
            arena[i].next = arena[root].child;
            arena[root].child = Some(i);
        }
    }

    // Phase 3: drop childless placeholders, hoist single-purpose ones.
    prune_empty_containers(&mut arena, root);

    // Phase 4: reverse every child list so phase 2/1 prepending turns
    // back into arrival order.
    reverse_children(&mut arena, root);

    // Phase 5: merge root-set trees that share a subject.
    gather_subjects(&mut arena, root);

    let mut forest = Vec::new();
    let mut child = arena[root].child;
    while let Some(c) = child {
        child = arena[c].next;
        forest.push(take_tree(&mut arena, c));
    }
    forest
}

fn build_container<T: Threadable>(
    arena: &mut Vec<Slot<T>>,
    id_table: &mut HashMap<String, usize>,
    bogus_id_count: &mut usize,
    article: T,
) {
    let references: Vec<String> = article.references().to_vec();
    let id = article.message_id().to_string();

    let container = match id_table.get(&id).copied() {
        // A placeholder already exists for this id: claim it.
        Some(existing) if arena[existing].article.is_none() => {
            arena[existing].article = Some(article);
            existing
        }
        // Duplicate id: file the second occurrence under a synthesized key.
        Some(_) => {
            *bogus_id_count += 1;
            let bogus = format!("<Bogus-id:{bogus_id_count}>");
            debug!(id = %id, bogus = %bogus, "duplicate message id");
            let slot = push_slot(arena, Some(article));
            id_table.insert(bogus, slot);
            slot
        }
        None => {
            let slot = push_slot(arena, Some(article));
            id_table.insert(id, slot);
            slot
        }
    };

    // Chain the references oldest-to-newest, linking each under its
    // predecessor only if it is still parentless and the link would
    // not close a cycle.
    let mut parent_ref: Option<usize> = None;
    for reference in &references {
        let slot = match id_table.get(reference).copied() {
            Some(slot) => slot,
            None => {
                let slot = push_slot(arena, None);
                id_table.insert(reference.clone(), slot);
                slot
            }
        };

        if let Some(p) = parent_ref
            && arena[slot].parent.is_none()
            && p != slot
            && !subtree_contains(arena, slot, p)
        {
            arena[slot].parent = Some(p);
            arena[slot].next = arena[p].child;
            arena[p].child = Some(slot);
        }
        parent_ref = Some(slot);
    }

    // The last reference becomes the provisional parent, unless that
    // would make the container its own ancestor.
    if let Some(p) = parent_ref
        && (p == container || subtree_contains(arena, container, p))
    {
        parent_ref = None;
    }

    if arena[container].parent.is_some() {
        detach_from_parent(arena, container);
    }

    if let Some(p) = parent_ref {
        arena[container].parent = Some(p);
        arena[container].next = arena[p].child;
        arena[p].child = Some(container);
    }
}

fn push_slot<T>(arena: &mut Vec<Slot<T>>, article: Option<T>) -> usize {
    arena.push(Slot::new(article));
    arena.len() - 1
}

/// Whether `target` occurs anywhere in `node`'s subtree.
fn subtree_contains<T>(arena: &[Slot<T>], node: usize, target: usize) -> bool {
    let mut kid = arena[node].child;
    while let Some(k) = kid {
        if k == target || subtree_contains(arena, k, target) {
            return true;
        }
        kid = arena[k].next;
    }
    false
}

/// Unlink `container` from its parent's child list.
fn detach_from_parent<T>(arena: &mut [Slot<T>], container: usize) {
    let parent = arena[container].parent.expect("detach of parentless container");

    let mut prev: Option<usize> = None;
    let mut cur = arena[parent].child;
    while let Some(c) = cur {
        if c == container {
            break;
        }
        prev = Some(c);
        cur = arena[c].next;
    }
    debug_assert_eq!(cur, Some(container), "container missing from parent's child list");

    match prev {
        None => arena[parent].child = arena[container].next,
        Some(p) => arena[p].next = arena[container].next,
    }
    arena[container].next = None;
    arena[container].parent = None;
}

/// Delete placeholders with no children; splice the children of
/// single-purpose placeholders into their parent. A placeholder in the
/// root set keeps its children together (it marks a thread boundary)
/// unless it has exactly one child.
fn prune_empty_containers<T>(arena: &mut Vec<Slot<T>>, parent: usize) {
    let mut prev: Option<usize> = None;
    let mut cur = arena[parent].child;

    while let Some(c) = cur {
        let next = arena[c].next;
        let is_placeholder = arena[c].article.is_none();

        if is_placeholder && arena[c].child.is_none() {
            match prev {
                None => arena[parent].child = next,
                Some(p) => arena[p].next = next,
            }
            cur = next;
        } else if is_placeholder
            && let Some(first_kid) = arena[c].child
            && (arena[c].parent.is_some() || arena[first_kid].next.is_none())
        {
            // Splice c's children into this list in c's place and
            // reprocess them.
            match prev {
                None => arena[parent].child = Some(first_kid),
                Some(p) => arena[p].next = Some(first_kid),
            }
            let grandparent = arena[c].parent;
            let mut tail = first_kid;
            loop {
                arena[tail].parent = grandparent;
                match arena[tail].next {
                    Some(n) => tail = n,
                    None => break,
                }
            }
            arena[tail].next = next;
            arena[c].child = None;
            arena[c].next = None;
            arena[c].parent = None;
            cur = Some(first_kid);
        } else {
            if arena[c].child.is_some() {
                prune_empty_containers(arena, c);
            }
            prev = Some(c);
            cur = next;
        }
    }
}

fn reverse_children<T>(arena: &mut Vec<Slot<T>>, node: usize) {
    let mut prev: Option<usize> = None;
    let mut kid = arena[node].child;
    while let Some(k) = kid {
        let next = arena[k].next;
        arena[k].next = prev;
        prev = Some(k);
        kid = next;
    }
    arena[node].child = prev;

    let mut kid = arena[node].child;
    while let Some(k) = kid {
        reverse_children(arena, k);
        kid = arena[k].next;
    }
}

/// Subject used to group a root-set container: its own article's, or
/// its first child's when the container is a placeholder.
fn group_subject<T: Threadable>(arena: &[Slot<T>], c: usize) -> String {
    match &arena[c].article {
        Some(article) => article.simplified_subject(),
        None => {
            let kid = arena[c].child.expect("placeholder in root set with no child");
            arena[kid]
                .article
                .as_ref()
                .expect("placeholder child without article after pruning")
                .simplified_subject()
        }
    }
}

fn is_reply<T: Threadable>(arena: &[Slot<T>], c: usize) -> Option<bool> {
    arena[c].article.as_ref().map(Threadable::subject_is_reply)
}

fn gather_subjects<T: Threadable>(arena: &mut Vec<Slot<T>>, root: usize) {
    // First pass: pick the best root-set container per subject. A
    // placeholder beats a real message; a non-reply beats a reply.
    let mut subject_table: HashMap<String, usize> = HashMap::new();
    let mut entries = 0usize;

    let mut cur = arena[root].child;
    while let Some(c) = cur {
        let subject = group_subject(arena, c);
        if !subject.is_empty() {
            let replace = match subject_table.get(&subject) {
                None => true,
                Some(&old) => {
                    let c_placeholder = arena[c].article.is_none();
                    let old_placeholder = arena[old].article.is_none();
                    (c_placeholder && !old_placeholder)
                        || (is_reply(arena, old) == Some(true) && is_reply(arena, c) == Some(false))
                }
            };
            if replace {
                subject_table.insert(subject, c);
                entries += 1;
            }
        }
        cur = arena[c].next;
    }
    if entries == 0 {
        return;
    }

    // Second pass: fold every other container with a matching subject
    // into the table entry.
    let mut prev: Option<usize> = None;
    let mut cur = arena[root].child;
    while let Some(c) = cur {
        let rest = arena[c].next;
        let subject = group_subject(arena, c);
        if subject.is_empty() {
            prev = Some(c);
            cur = rest;
            continue;
        }
        let old = subject_table[&subject];
        if old == c {
            prev = Some(c);
            cur = rest;
            continue;
        }

        // Remove c from the root set.
        match prev {
            None => arena[root].child = rest,
            Some(p) => arena[p].next = rest,
        }
        arena[c].next = None;

        let c_placeholder = arena[c].article.is_none();
        let old_placeholder = arena[old].article.is_none();

        if c_placeholder && old_placeholder {
            // Two placeholder threads with one subject: append c's
            // children onto old's.
            let kids = arena[c].child.take();
            match arena[old].child {
                None => arena[old].child = kids,
                Some(mut tail) => {
                    while let Some(n) = arena[tail].next {
                        tail = n;
                    }
                    arena[tail].next = kids;
                }
            }
            let mut kid = kids;
            while let Some(k) = kid {
                arena[k].parent = Some(old);
                kid = arena[k].next;
            }
        } else if old_placeholder
            || (is_reply(arena, c) == Some(true) && is_reply(arena, old) == Some(false))
        {
            // The entry is a placeholder, or c is the reply: c becomes
            // a child of the entry.
            arena[c].parent = Some(old);
            arena[c].next = arena[old].child;
            arena[old].child = Some(c);
        } else {
            // Neither side wins: the entry turns into a placeholder
            // holding both c and its own former contents.
            let moved = push_slot(arena, None);
            arena[moved].article = arena[old].article.take();
            arena[moved].child = arena[old].child.take();
            let mut kid = arena[moved].child;
            while let Some(k) = kid {
                arena[k].parent = Some(moved);
                kid = arena[k].next;
            }
            arena[c].parent = Some(old);
            arena[moved].parent = Some(old);
            arena[old].child = Some(c);
            arena[c].next = Some(moved);
        }

        cur = rest;
    }
}

fn take_tree<T>(arena: &mut Vec<Slot<T>>, node: usize) -> ThreadNode<T> {
    let article = arena[node].article.take();
    let mut children = Vec::new();
    let mut kid = arena[node].child;
    while let Some(k) = kid {
        kid = arena[k].next;
        children.push(take_tree(arena, k));
    }
    ThreadNode { article, children }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Article;

    fn art(id: &str, subject: &str, refs: &[&str]) -> Article {
        Article::new(id, subject, refs.iter().map(|r| r.to_string()).collect())
    }

    fn ids(node: &ThreadNode<Article>) -> (Option<String>, Vec<(Option<String>, usize)>) {
        (
            node.article.as_ref().map(|a| a.message_id().to_string()),
            node.children
                .iter()
                .map(|c| {
                    (
                        c.article.as_ref().map(|a| a.message_id().to_string()),
                        c.children.len(),
                    )
                })
                .collect(),
        )
    }

    fn assert_no_single_child_placeholder(node: &ThreadNode<Article>) {
        if node.article.is_none() {
            assert!(
                node.children.len() >= 2,
                "placeholder with {} children",
                node.children.len()
            );
        }
        for child in &node.children {
            assert_no_single_child_placeholder(child);
        }
    }

    #[test]
    fn empty_input_yields_empty_forest() {
        let forest = thread(Vec::<Article>::new());
        assert!(forest.is_empty());
    }

    #[test]
    fn chains_follow_references_oldest_first() {
        let forest = thread(vec![
            art("<a>", "topic", &[]),
            art("<b>", "Re: topic", &["<a>"]),
            art("<c>", "Re: topic", &["<a>", "<b>"]),
        ]);

        assert_eq!(forest.len(), 1);
        let (root_id, kids) = ids(&forest[0]);
        assert_eq!(root_id.as_deref(), Some("<a>"));
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].0.as_deref(), Some("<b>"));
        assert_eq!(forest[0].children[0].children[0].article.as_ref().unwrap().message_id(), "<c>");
    }

    #[test]
    fn missing_ancestor_becomes_placeholder_then_prunes() {
        // Both messages reference an unseen ancestor; the placeholder
        // sits in the root set with two children, so it is kept as the
        // thread boundary.
        let forest = thread(vec![
            art("<b>", "alpha", &["<a>"]),
            art("<c>", "beta", &["<a>"]),
        ]);

        assert_eq!(forest.len(), 1);
        assert!(forest[0].article.is_none());
        assert_eq!(forest[0].children.len(), 2);
        for node in &forest[0].children {
            assert!(node.children.is_empty());
        }
    }

    #[test]
    fn placeholder_with_single_child_is_hoisted() {
        let forest = thread(vec![art("<b>", "alpha", &["<a>"])]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].article.as_ref().unwrap().message_id(), "<b>");
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn intermediate_placeholder_is_spliced_out() {
        // <c> references <a> then <b>; <a> is real, <b> never arrives.
        // The placeholder for <b> is below the root, so its child is
        // promoted to hang directly off <a>.
        let forest = thread(vec![
            art("<a>", "topic", &[]),
            art("<c>", "Re: topic", &["<a>", "<b>"]),
        ]);

        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].article.as_ref().unwrap().message_id(), "<a>");
        assert_eq!(forest[0].children.len(), 1);
        assert_eq!(
            forest[0].children[0].article.as_ref().unwrap().message_id(),
            "<c>"
        );
    }

    #[test]
    fn duplicate_ids_are_both_kept() {
        let forest = thread(vec![
            art("<dup>", "one", &[]),
            art("<dup>", "two", &[]),
        ]);
        let mut count = 0;
        for node in &forest {
            if node.article.is_some() {
                count += 1;
            }
            count += node.children.iter().filter(|c| c.article.is_some()).count();
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn self_reference_does_not_cycle() {
        let forest = thread(vec![art("<a>", "loop", &["<a>"])]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].article.as_ref().unwrap().message_id(), "<a>");
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn mutually_referencing_messages_do_not_cycle() {
        let forest = thread(vec![
            art("<a>", "x", &["<b>"]),
            art("<b>", "y", &["<a>"]),
        ]);
        // Whatever shape results, it must be finite and acyclic --
        // take_tree would not terminate otherwise -- and contain both.
        let mut seen = 0;
        let mut stack: Vec<&ThreadNode<Article>> = forest.iter().collect();
        while let Some(n) = stack.pop() {
            if n.article.is_some() {
                seen += 1;
            }
            stack.extend(n.children.iter());
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn reply_merges_under_nonreply_by_subject() {
        // No references at all: the subject gather must pair them,
        // with the non-reply as the representative.
        let forest = thread(vec![
            art("<1>", "Re: foo", &[]),
            art("<2>", "foo", &[]),
        ]);

        assert_eq!(forest.len(), 1);
        let top = &forest[0];
        assert_eq!(top.article.as_ref().unwrap().message_id(), "<2>");
        assert_eq!(top.children.len(), 1);
        assert_eq!(top.children[0].article.as_ref().unwrap().message_id(), "<1>");
    }

    #[test]
    fn merge_two_real_nonreplies_under_fresh_placeholder() {
        let forest = thread(vec![
            art("<1>", "news", &[]),
            art("<2>", "news", &[]),
        ]);

        assert_eq!(forest.len(), 1);
        let top = &forest[0];
        assert!(top.article.is_none());
        assert_eq!(top.children.len(), 2);
        let mut got: Vec<&str> = top
            .children
            .iter()
            .map(|c| c.article.as_ref().unwrap().message_id())
            .collect();
        got.sort_unstable();
        assert_eq!(got, vec!["<1>", "<2>"]);
    }

    #[test]
    fn gather_merges_placeholder_threads_with_same_subject() {
        // Two boundary placeholders whose children share a subject get
        // spliced into one placeholder.
        let forest = thread(vec![
            art("<b>", "saga", &["<a>"]),
            art("<c>", "saga", &["<a>"]),
            art("<e>", "Re: saga", &["<d>"]),
            art("<f>", "saga", &["<d>"]),
        ]);

        assert_eq!(forest.len(), 1);
        assert!(forest[0].article.is_none());
        assert_eq!(forest[0].children.len(), 4);
    }

    #[test]
    fn no_placeholder_ever_has_one_child() {
        let forest = thread(vec![
            art("<a>", "t", &[]),
            art("<b>", "Re: t", &["<a>"]),
            art("<d>", "u", &["<missing1>", "<missing2>"]),
            art("<e>", "Re: u", &["<missing1>", "<missing2>", "<d>"]),
            art("<g>", "v", &["<gone>"]),
            art("<h>", "v", &["<gone>"]),
        ]);
        for node in &forest {
            assert_no_single_child_placeholder(node);
        }
    }

    #[test]
    fn threading_is_idempotent_on_the_same_input() {
        let input = || {
            vec![
                art("<a>", "t", &[]),
                art("<b>", "Re: t", &["<a>"]),
                art("<c>", "Re: t", &["<a>", "<b>"]),
                art("<x>", "other", &["<w>"]),
                art("<y>", "other", &["<w>"]),
            ]
        };
        let first = thread(input());
        let second = thread(input());
        assert_eq!(first, second);
    }
}
