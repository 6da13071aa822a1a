//! Thread reconstruction from a flat post list.
//!
//! Upstream conversation/thread identifiers are unreliable - often absent, or
//! shared across unrelated replies - so grouping layers three independent
//! signals: explicit self-thread flags, shared conversation keys, and
//! reply-graph adjacency restricted to same-author edges. A grouping is only
//! committed when at least two posts corroborate it; everything else stays a
//! standalone post.
//!
//! Pure in-memory computation, no network. Threads are recomputed on every
//! call and never persisted.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::constants::MAX_THREAD_DEPTH;
use crate::model::{chronological, Post, Thread, TimelineItem};

/// Partition `posts` into ordered threads and standalone posts, newest first.
///
/// Duplicates (by id) are collapsed to their first occurrence before
/// grouping; no post id ever appears in two output elements.
#[must_use]
pub fn group_threads(posts: Vec<Post>) -> Vec<TimelineItem> {
    let mut unique: Vec<Post> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();
    for post in posts {
        if !index_of.contains_key(&post.id) {
            index_of.insert(post.id.clone(), unique.len());
            unique.push(post);
        }
    }

    let mut processed: HashSet<String> = HashSet::new();
    let mut items: Vec<TimelineItem> = Vec::new();

    explicit_self_thread_pass(&unique, &index_of, &mut processed, &mut items);
    residual_grouping_pass(&unique, &index_of, &mut processed, &mut items);

    // Anything untouched by both passes is standalone
    for post in &unique {
        if !processed.contains(&post.id) {
            items.push(TimelineItem::Post(post.clone()));
        }
    }

    // Newest first by representative timestamp (a thread is represented by
    // its earliest member, a standalone post by itself)
    items.sort_by(|a, b| chronological(b.representative(), a.representative()));

    debug!(
        input = unique.len(),
        items = items.len(),
        threads = items
            .iter()
            .filter(|i| matches!(i, TimelineItem::Thread(_)))
            .count(),
        "Grouping pass complete"
    );
    items
}

/// Re-expand grouped output back into a flat post list, preserving item
/// order. Used to re-derive groupings from save-store responses.
#[must_use]
pub fn flatten(items: Vec<TimelineItem>) -> Vec<Post> {
    let mut posts = Vec::new();
    for item in items {
        match item {
            TimelineItem::Post(post) => posts.push(post),
            TimelineItem::Thread(thread) => posts.extend(thread.posts),
        }
    }
    posts
}

/// Pass 1: posts flagged as self-threads (or replying to a same-author post
/// in the set) seed candidate groups keyed by conversation id. Posts sharing
/// a group's key are pulled in so the unflagged root joins its thread.
/// Groups need two or more members to become threads here.
fn explicit_self_thread_pass(
    unique: &[Post],
    index_of: &HashMap<String, usize>,
    processed: &mut HashSet<String>,
    items: &mut Vec<TimelineItem>,
) {
    let mut group_keys: Vec<String> = Vec::new();
    let mut group_members: HashMap<String, Vec<String>> = HashMap::new();
    let mut group_author: HashMap<String, String> = HashMap::new();

    for post in unique {
        let replies_to_same_author = post
            .in_reply_to_post_id
            .as_deref()
            .and_then(|rid| index_of.get(rid))
            .is_some_and(|&i| {
                !post.author.id.is_empty() && unique[i].author.id == post.author.id
            });
        if !post.is_self_thread && !replies_to_same_author {
            continue;
        }
        let key = post
            .conversation_id
            .clone()
            .or_else(|| post.thread_id.clone())
            .or_else(|| post.in_reply_to_post_id.clone())
            .unwrap_or_else(|| post.id.clone());
        let members = group_members.entry(key.clone()).or_insert_with(|| {
            group_keys.push(key.clone());
            Vec::new()
        });
        members.push(post.id.clone());
        group_author
            .entry(key)
            .or_insert_with(|| post.author.id.clone());
    }

    // Pull in unflagged same-author posts sharing the key (typically the
    // unflagged root), then close over replies to members so a chain keyed
    // per-parent still assembles into one group.
    for key in &group_keys {
        let author_id = group_author.get(key).cloned().unwrap_or_default();
        let members = group_members.get_mut(key).expect("group exists");
        for post in unique {
            if members.contains(&post.id) {
                continue;
            }
            if !author_id.is_empty() && post.author.id != author_id {
                continue;
            }
            let shares_key = post.conversation_id.as_deref() == Some(key)
                || post.thread_id.as_deref() == Some(key)
                || post.id == *key;
            if shares_key {
                members.push(post.id.clone());
            }
        }
        let mut changed = true;
        while changed {
            changed = false;
            for post in unique {
                if members.contains(&post.id) {
                    continue;
                }
                if !author_id.is_empty() && post.author.id != author_id {
                    continue;
                }
                if post
                    .in_reply_to_post_id
                    .as_deref()
                    .is_some_and(|rid| members.iter().any(|m| m == rid))
                {
                    members.push(post.id.clone());
                    changed = true;
                }
            }
        }
    }

    for key in group_keys {
        let members = group_members.remove(&key).expect("group exists");
        let mut posts: Vec<Post> = members
            .iter()
            .filter(|id| !processed.contains(*id))
            .map(|id| unique[index_of[id]].clone())
            .collect();
        if posts.len() < 2 {
            // Leave singletons for the residual pass
            continue;
        }
        posts.sort_by(chronological);
        for (index, post) in posts.iter_mut().enumerate() {
            post.thread_position = Some(index);
            post.thread_index = Some(index);
            processed.insert(post.id.clone());
        }
        items.push(TimelineItem::Thread(make_thread(key, posts)));
    }
}

/// Pass 2: for every remaining post, gather the posts sharing its thread key
/// or linked transitively through same-author reply edges, elect a root, and
/// walk the reply graph breadth-first (depth-bounded, per-level chronological
/// order). Groups that survive with two or more members become threads;
/// everything else is standalone.
fn residual_grouping_pass(
    unique: &[Post],
    index_of: &HashMap<String, usize>,
    processed: &mut HashSet<String>,
    items: &mut Vec<TimelineItem>,
) {
    // Same-author reply adjacency among unprocessed posts
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for post in unique {
        if processed.contains(&post.id) {
            continue;
        }
        let Some(parent) = post
            .in_reply_to_post_id
            .as_deref()
            .and_then(|rid| index_of.get(rid))
            .map(|&i| &unique[i])
        else {
            continue;
        };
        if !processed.contains(&parent.id) && parent.author.id == post.author.id {
            children.entry(&parent.id).or_default().push(&post.id);
        }
    }

    for seed in unique {
        if processed.contains(&seed.id) {
            continue;
        }
        let key = seed.thread_key().to_string();

        // Gather by shared key, then expand transitively over reply edges
        let mut member_set: HashSet<&str> = HashSet::new();
        let mut frontier: Vec<&str> = Vec::new();
        for post in unique {
            if !processed.contains(&post.id) && post.thread_key() == key {
                member_set.insert(&post.id);
                frontier.push(&post.id);
            }
        }
        while let Some(id) = frontier.pop() {
            let post = &unique[index_of[id]];
            if let Some(parent) = post
                .in_reply_to_post_id
                .as_deref()
                .and_then(|rid| index_of.get(rid))
                .map(|&i| &unique[i])
            {
                if !processed.contains(&parent.id)
                    && parent.author.id == post.author.id
                    && member_set.insert(&parent.id)
                {
                    frontier.push(&parent.id);
                }
            }
            if let Some(kids) = children.get(id) {
                for kid in kids {
                    if !processed.contains(*kid) && member_set.insert(kid) {
                        frontier.push(kid);
                    }
                }
            }
        }

        if member_set.len() == 1 {
            processed.insert(seed.id.clone());
            items.push(TimelineItem::Post(seed.clone()));
            continue;
        }

        let root_id = elect_root(unique, index_of, &member_set);
        let ordered = bounded_walk(unique, index_of, &children, &member_set, root_id);

        // Walk order is final; unreached members (cycles, depth cutoff,
        // key-only siblings) stay unprocessed and re-seed later
        for post in &ordered {
            processed.insert(post.id.clone());
        }

        if ordered.len() >= 2 {
            items.push(TimelineItem::Thread(make_thread(key, ordered)));
        } else {
            // Demoted singleton: drop the positions the walk assigned
            for mut post in ordered {
                post.thread_position = None;
                post.thread_index = None;
                items.push(TimelineItem::Post(post));
            }
        }
    }
}

/// A root is the unique member with no reply target inside the group; when
/// none or several qualify, the earliest member wins.
fn elect_root<'a>(
    unique: &'a [Post],
    index_of: &HashMap<String, usize>,
    member_set: &HashSet<&'a str>,
) -> &'a str {
    let candidates: Vec<&str> = member_set
        .iter()
        .copied()
        .filter(|id| {
            let post = &unique[index_of[*id]];
            post.in_reply_to_post_id
                .as_deref()
                .is_none_or(|rid| !member_set.contains(rid))
        })
        .collect();
    if candidates.len() == 1 {
        return candidates[0];
    }
    member_set
        .iter()
        .copied()
        .min_by(|a, b| chronological(&unique[index_of[*a]], &unique[index_of[*b]]))
        .expect("member set is non-empty")
}

/// Iterative breadth-first walk from the root over the reply adjacency,
/// bounded at [`MAX_THREAD_DEPTH`] levels, visiting each level in
/// chronological order. The visited set guards against reply cycles.
fn bounded_walk(
    unique: &[Post],
    index_of: &HashMap<String, usize>,
    children: &HashMap<&str, Vec<&str>>,
    member_set: &HashSet<&str>,
    root_id: &str,
) -> Vec<Post> {
    let mut ordered: Vec<Post> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut level: Vec<&str> = vec![root_id];
    visited.insert(root_id);
    let mut depth = 0;

    while !level.is_empty() && depth < MAX_THREAD_DEPTH {
        level.sort_by(|a, b| chronological(&unique[index_of[*a]], &unique[index_of[*b]]));
        let mut next: Vec<&str> = Vec::new();
        for id in level {
            ordered.push(unique[index_of[id]].clone());
            if let Some(kids) = children.get(id) {
                for kid in kids {
                    if member_set.contains(kid) && visited.insert(kid) {
                        next.push(kid);
                    }
                }
            }
        }
        level = next;
        depth += 1;
    }

    for (index, post) in ordered.iter_mut().enumerate() {
        post.thread_position = Some(index);
        post.thread_index = Some(index);
    }
    ordered
}

fn make_thread(id: String, posts: Vec<Post>) -> Thread {
    let first = &posts[0];
    Thread {
        id,
        author: first.author.clone(),
        created_at: first.created_at.clone(),
        posts,
    }
}
