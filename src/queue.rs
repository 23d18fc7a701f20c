//! A wait-free linearizable FIFO queue built by hand from two chains.
//!
//! Enqueues are linked into one chain and dequeues into another, exactly
//! like invocations of the universal construction. Resolving an enqueue
//! record hooks it behind its predecessor, which lazily builds a forward
//! list of enqueued values. Resolving a dequeue record makes it claim the
//! enqueue record right after the one its predecessor claimed, if any.

use std::sync::Arc;

use educe::Educe;
use tracing::debug;

use crate::cell::ExchangeCell;
use crate::chain::{self, Link, Linked, Record};
use crate::slot::{HandoffSlot, OnceSlot};

struct EnqueueNode<T> {
    previous: ExchangeCell<Link<EnqueueNode<T>>>,
    // moved out by the dequeue that claims this record
    value: HandoffSlot<T>,
    next: OnceSlot<Arc<EnqueueNode<T>>>,
}

impl<T> EnqueueNode<T> {
    fn sentinel() -> Self {
        EnqueueNode {
            previous: ExchangeCell::new(None),
            value: HandoffSlot::new(),
            next: OnceSlot::new(),
        }
    }

    fn new(value: T) -> Self {
        EnqueueNode {
            previous: ExchangeCell::new(None),
            value: HandoffSlot::with(value),
            next: OnceSlot::new(),
        }
    }
}

impl<T> Linked for EnqueueNode<T> {
    const CHAIN: &'static str = "enqueue";

    fn previous(&self) -> &ExchangeCell<Link<Self>> {
        &self.previous
    }
}

impl<T> Record for EnqueueNode<T> {
    // A successor only needs its predecessor to be reachable from the
    // forward list, which is signalled by the cleared back-reference.
    fn is_settled(&self) -> bool {
        false
    }

    fn settle(this: &Arc<Self>, predecessor: &Arc<Self>) {
        let _ = predecessor.next.set(this.clone());
    }
}

impl<T> Drop for EnqueueNode<T> {
    fn drop(&mut self) {
        // The forward list can be as long as the queue, tear it down in a loop.
        let mut next = self.next.take();
        while let Some(node) = next {
            next = match Arc::try_unwrap(node) {
                Ok(mut node) => node.next.take(),
                Err(_) => None,
            };
        }
    }
}

struct DequeueNode<T> {
    previous: ExchangeCell<Link<DequeueNode<T>>>,
    matched: OnceSlot<Arc<EnqueueNode<T>>>,
    // set only when `matched` is a record no earlier dequeue claimed
    claimed: OnceSlot<Arc<EnqueueNode<T>>>,
}

impl<T> DequeueNode<T> {
    fn sentinel(head: Arc<EnqueueNode<T>>) -> Self {
        DequeueNode {
            previous: ExchangeCell::new(None),
            matched: OnceSlot::with(head),
            claimed: OnceSlot::new(),
        }
    }

    fn new() -> Self {
        DequeueNode {
            previous: ExchangeCell::new(None),
            matched: OnceSlot::new(),
            claimed: OnceSlot::new(),
        }
    }
}

impl<T> Linked for DequeueNode<T> {
    const CHAIN: &'static str = "dequeue";

    fn previous(&self) -> &ExchangeCell<Link<Self>> {
        &self.previous
    }
}

impl<T> Record for DequeueNode<T> {
    fn is_settled(&self) -> bool {
        self.matched.is_set()
    }

    fn settle(this: &Arc<Self>, predecessor: &Arc<Self>) {
        let before = predecessor
            .matched
            .get()
            .expect("predecessor matched before its successor");
        // nothing enqueued past `before` yet means the queue is empty here
        let candidate = before.next.get().unwrap_or(before).clone();
        let _ = this.matched.set(candidate);

        // first writer won, every helper agrees on its choice
        if let Some(matched) = this.matched.get() {
            if !Arc::ptr_eq(matched, before) {
                let _ = this.claimed.set(matched.clone());
            }
        }
    }
}

impl<T> Drop for DequeueNode<T> {
    fn drop(&mut self) {
        chain::unlink(self.previous.get_mut().take());
    }
}

/// A wait-free, linearizable, unbounded multi-producer multi-consumer queue.
///
/// Payloads are only ever moved between threads, never shared, so the
/// queue is `Sync` for any `T: Send`.
///
/// # Examples
///
/// ```
/// use swap_universal::SwapQueue;
///
/// let queue = SwapQueue::new();
/// queue.enqueue(1);
/// queue.enqueue(2);
/// assert_eq!(queue.dequeue(), Some(1));
/// assert_eq!(queue.dequeue(), Some(2));
/// assert_eq!(queue.dequeue(), None);
/// ```
#[derive(Educe)]
#[educe(Debug)]
pub struct SwapQueue<T> {
    #[educe(Debug(ignore))]
    enqueues: ExchangeCell<Link<EnqueueNode<T>>>,
    #[educe(Debug(ignore))]
    dequeues: ExchangeCell<Link<DequeueNode<T>>>,
}

impl<T> SwapQueue<T> {
    pub fn new() -> Self {
        debug!("new queue");
        let head = Arc::new(EnqueueNode::sentinel());
        SwapQueue {
            dequeues: ExchangeCell::new(Some(Arc::new(DequeueNode::sentinel(head.clone())))),
            enqueues: ExchangeCell::new(Some(head)),
        }
    }

    /// Appends `value` at the back of the queue.
    pub fn enqueue(&self, value: T) {
        let node = Arc::new(EnqueueNode::new(value));
        chain::link(&self.enqueues, &node);
        chain::help(&node);
    }

    /// Removes the value at the front of the queue.
    ///
    /// Returns `None` if the queue is empty at the dequeue's linearization
    /// point. An enqueue that is linked but not resolved yet counts as not
    /// having happened; the dequeue does not wait for it.
    pub fn dequeue(&self) -> Option<T> {
        let node = Arc::new(DequeueNode::new());
        self.link_dequeue(&node);
        chain::help(&node);

        // `node` is the only dequeue that ever claims this record
        node.claimed.get()?.value.take()
    }

    fn link_dequeue(&self, node: &Arc<DequeueNode<T>>) {
        chain::link(&self.dequeues, node);
    }
}

impl<T> Default for SwapQueue<T> {
    fn default() -> Self {
        SwapQueue::new()
    }
}
