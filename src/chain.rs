//! The chain of invocation records shared by the universal construction and
//! by both ends of the queue.
//!
//! A chain is a singly linked history: every record points back to the
//! record that was linked right before it. Linking is one atomic swap
//! between the record's back-reference and the chain's `last` cell, which
//! at the same time publishes the record and hands it its predecessor.
//! Resolving a record means resolving its predecessor first, computing the
//! record's outputs from it, then clearing the back-reference.

use std::sync::Arc;

use tracing::trace;

use crate::cell::ExchangeCell;

/// A back-reference. `None` once the owning record is resolved.
pub(crate) type Link<R> = Option<Arc<R>>;

/// Anything that sits in a chain. Enough to link and to tear down.
pub(crate) trait Linked: Sized {
    /// Chain name carried by trace events.
    const CHAIN: &'static str;

    fn previous(&self) -> &ExchangeCell<Link<Self>>;
}

/// A record that can be resolved by helping.
pub(crate) trait Record: Linked {
    /// True once everything a successor reads from this record has been
    /// published, even if the back-reference is not cleared yet.
    fn is_settled(&self) -> bool;

    /// Publishes the outputs of `this`, computed from its resolved
    /// predecessor. Racing helpers may call it concurrently for the same
    /// record; every call must publish the same outputs.
    fn settle(this: &Arc<Self>, predecessor: &Arc<Self>);
}

/// Splices `record` into the chain whose most recent record is held by `last`.
///
/// Afterwards `last` holds `record` and `record` holds what `last` held.
pub(crate) fn link<R: Linked>(last: &ExchangeCell<Link<R>>, record: &Arc<R>) {
    // transient self-loop, broken by the swap below
    record.previous().write(Some(record.clone()));
    last.swap(record.previous());
    trace!(chain = R::CHAIN, "record linked");
}

/// Resolves `record` together with every unresolved predecessor.
///
/// Walks back with an explicit stack until it meets a settled record, then
/// settles the collected records oldest first. The walk only crosses
/// records that were linked before `record` and are still unresolved, so
/// its length is bounded by the contention at link time.
///
/// Returns how many records this call visited. A racing helper may have
/// published some of them first, in which case settling them again is a
/// no-op.
pub(crate) fn help<R: Record>(record: &Arc<R>) -> usize {
    let mut pending: Vec<(Arc<R>, Arc<R>)> = Vec::new();
    let mut current = record.clone();
    while let Some(predecessor) = current.previous().read() {
        let settled = predecessor.is_settled();
        pending.push((current, predecessor.clone()));
        if settled {
            break;
        }
        current = predecessor;
    }

    let visited = pending.len();
    while let Some((record, predecessor)) = pending.pop() {
        R::settle(&record, &predecessor);
        record.previous().write(None);
    }
    trace!(chain = R::CHAIN, visited, "record resolved");
    visited
}

/// Drops a back-chain without recursing once per record.
///
/// Records still referenced from elsewhere stop the walk; whoever drops
/// the last reference continues it.
pub(crate) fn unlink<R: Linked>(mut link: Link<R>) {
    while let Some(record) = link {
        link = match Arc::try_unwrap(record) {
            Ok(record) => record.previous().replace(None),
            Err(_) => None,
        };
    }
}
