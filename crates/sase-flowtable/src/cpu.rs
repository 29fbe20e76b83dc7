//! Worker-to-shard binding
//!
//! A forwarding worker pinned to a core binds itself to that core's shard.
//! Threads that never bind get a stable id on first use, handed out round
//! robin, so they still spread across shards.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static BOUND: Cell<Option<usize>> = const { Cell::new(None) };
    static ASSIGNED: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Restores the previous binding when dropped
#[must_use = "the binding is undone when the guard is dropped"]
#[derive(Debug)]
pub struct ShardBinding {
    prev: Option<usize>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ShardBinding {
    fn drop(&mut self) {
        BOUND.with(|b| b.set(self.prev));
    }
}

/// Bind the calling thread to `shard` until the guard drops
pub fn bind_current_thread(shard: usize) -> ShardBinding {
    let prev = BOUND.with(|b| b.replace(Some(shard)));
    ShardBinding {
        prev,
        _not_send: PhantomData,
    }
}

/// Explicit binding of the calling thread, if any
pub fn bound_shard() -> Option<usize> {
    BOUND.with(Cell::get)
}

/// Shard the calling thread should use in a table of `shards` shards
#[inline]
pub fn current_shard(shards: usize) -> usize {
    let id = bound_shard().unwrap_or_else(thread_id);
    id % shards.max(1)
}

fn thread_id() -> usize {
    ASSIGNED.with(|a| match a.get() {
        Some(id) => id,
        None => {
            let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
            a.set(Some(id));
            id
        }
    })
}
