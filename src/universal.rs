//! Wait-free universal construction based on the atomic swap of two cells.
//!
//! Any sequential object, given as a cloneable state and deterministic
//! operations on it, becomes a linearizable wait-free shared object.
//!
//! ```
//! use swap_universal::{SwapUniversal, Universal};
//!
//! let counter = SwapUniversal::new(0u64);
//! counter.invoke(|n: &mut u64| *n += 2);
//! assert_eq!(counter.invoke(|n: &mut u64| *n), 2);
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use educe::Educe;
use tracing::debug;

use crate::cell::ExchangeCell;
use crate::chain::{self, Link, Linked, Record};
use crate::slot::{HandoffSlot, OnceSlot};

/// An operation of the simulated object.
///
/// `apply` may run several times for the same invocation, on equal copies
/// of the same state, by threads racing to resolve it. It has to be
/// deterministic and must not have effects beyond mutating `state` and
/// returning a value, otherwise linearizability is lost.
///
/// A helper can still be running `apply` after the invoker got its result
/// and returned, which is why [`Universal::invoke`] asks for `'static`
/// operations. Caller data goes in by value, or behind an `Arc`.
pub trait Operation<S>: Send + Sync {
    type Output;

    fn apply(&self, state: &mut S) -> Self::Output;
}

impl<S, R, F> Operation<S> for F
where
    F: Fn(&mut S) -> R + Send + Sync,
{
    type Output = R;

    #[inline]
    fn apply(&self, state: &mut S) -> R {
        self(state)
    }
}

/// A wait-free linearizable shared object over states of type `S`.
pub trait Universal<S> {
    /// Applies `operation` to the shared object and returns its result.
    ///
    /// The operation stays reachable from the shared history until a later
    /// invocation resolves past it, and other threads may run it at any
    /// time until then. It therefore cannot borrow from the caller's stack:
    /// move captured values in instead.
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use swap_universal::{SwapUniversal, Universal};
    ///
    /// let map = SwapUniversal::new(HashMap::from([(String::from("k"), 1)]));
    /// let key = String::from("k");
    /// let found = map.invoke(move |m: &mut HashMap<String, i32>| m.get(&key).copied());
    /// assert_eq!(found, Some(1));
    /// ```
    fn invoke<O>(&self, operation: O) -> O::Output
    where
        O: Operation<S> + 'static,
        O::Output: Send + 'static;
}

// Type-erased view of one invocation, so records with different result
// types can share a chain.
trait Call<S>: Send + Sync {
    fn run(&self, state: &mut S);
}

struct Invocation<S, O: Operation<S>> {
    operation: O,
    result: HandoffSlot<O::Output>,
    marker: PhantomData<fn(&mut S)>,
}

impl<S, O> Call<S> for Invocation<S, O>
where
    O: Operation<S>,
    O::Output: Send,
{
    fn run(&self, state: &mut S) {
        // equal to whatever a racing helper already stored
        let _ = self.result.set(self.operation.apply(state));
    }
}

#[derive(Educe)]
#[educe(Debug(bound))]
struct Node<S> {
    #[educe(Debug(ignore))]
    previous: ExchangeCell<Link<Node<S>>>,
    #[educe(Debug(ignore))]
    call: Option<Arc<dyn Call<S>>>,
    state: OnceSlot<S>,
}

impl<S> Node<S> {
    fn root(initial: S) -> Self {
        Node {
            previous: ExchangeCell::new(None),
            call: None,
            state: OnceSlot::with(initial),
        }
    }
}

impl<S> Linked for Node<S> {
    const CHAIN: &'static str = "universal";

    fn previous(&self) -> &ExchangeCell<Link<Self>> {
        &self.previous
    }
}

impl<S: Clone> Record for Node<S> {
    fn is_settled(&self) -> bool {
        self.state.is_set()
    }

    fn settle(this: &Arc<Self>, predecessor: &Arc<Self>) {
        // the state is published last, so the result is already there too
        if this.is_settled() {
            return;
        }
        let mut state = predecessor
            .state
            .get()
            .expect("predecessor resolved before its successor")
            .clone();
        if let Some(call) = &this.call {
            call.run(&mut state);
        }
        let _ = this.state.set(state);
    }
}

impl<S> Drop for Node<S> {
    fn drop(&mut self) {
        chain::unlink(self.previous.get_mut().take());
    }
}

/// An invocation linked into the chain whose result is not collected yet.
struct Pending<S, O: Operation<S>> {
    node: Arc<Node<S>>,
    invocation: Arc<Invocation<S, O>>,
}

impl<S, O> Pending<S, O>
where
    S: Clone,
    O: Operation<S>,
{
    fn complete(self) -> O::Output {
        chain::help(&self.node);
        // only the invoker takes from its own result slot
        self.invocation
            .result
            .take()
            .expect("resolved invocation carries its result")
    }
}

/// Universal construction whose only synchronization is the pairwise swap
/// of [`ExchangeCell`]s.
///
/// Every [`invoke`](Universal::invoke) links a new record after the current
/// `last` one with a single swap, which fixes its place in the
/// linearization order. It then resolves every still-unresolved record
/// before it, and finally its own.
#[derive(Educe)]
#[educe(Debug(bound))]
pub struct SwapUniversal<S> {
    last: ExchangeCell<Link<Node<S>>>,
}

impl<S> SwapUniversal<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        debug!("new universal construction");
        SwapUniversal {
            last: ExchangeCell::new(Some(Arc::new(Node::root(initial)))),
        }
    }

    // Links the invocation without resolving it.
    fn announce<O>(&self, operation: O) -> Pending<S, O>
    where
        O: Operation<S> + 'static,
        O::Output: Send + 'static,
    {
        let invocation = Arc::new(Invocation {
            operation,
            result: HandoffSlot::new(),
            marker: PhantomData,
        });
        let call: Arc<dyn Call<S>> = invocation.clone();
        let node = Arc::new(Node {
            previous: ExchangeCell::new(None),
            call: Some(call),
            state: OnceSlot::new(),
        });
        chain::link(&self.last, &node);
        Pending { node, invocation }
    }
}

impl<S> Universal<S> for SwapUniversal<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn invoke<O>(&self, operation: O) -> O::Output
    where
        O: Operation<S> + 'static,
        O::Output: Send + 'static,
    {
        self.announce(operation).complete()
    }
}

impl<S> Default for SwapUniversal<S>
where
    S: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        SwapUniversal::new(S::default())
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use lazy_static::lazy_static;

    use super::{SwapUniversal, Universal};
    use crate::chain;

    lazy_static! {
        static ref RUNS: AtomicUsize = AtomicUsize::new(0);
    }

    fn add(delta: i64) -> impl Fn(&mut i64) -> i64 + Send + Sync {
        move |value: &mut i64| {
            let before = *value;
            *value += delta;
            before
        }
    }

    fn get(value: &mut i64) -> i64 {
        *value
    }

    #[test]
    fn sequential_counter() {
        let counter = SwapUniversal::new(0i64);
        assert_eq!(counter.invoke(add(3)), 0);
        assert_eq!(counter.invoke(add(4)), 3);
        assert_eq!(counter.invoke(get), 7);
        assert_eq!(counter.invoke(|_: &mut i64| "no state change"), "no state change");
        assert_eq!(counter.invoke(get), 7);
    }

    #[test]
    fn uncontended_invoke_settles_only_itself() {
        let counter = SwapUniversal::new(0i64);
        for _ in 0..10 {
            let pending = counter.announce(add(1));
            assert_eq!(chain::help(&pending.node), 1);
            pending.complete();
        }
        assert_eq!(counter.invoke(get), 10);
    }

    #[test]
    fn ten_concurrent_increments() {
        const THREADS: usize = 10;
        let counter = Arc::new(SwapUniversal::new(0i64));
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = counter.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let before = counter.invoke(add(1));
                    let seen = counter.invoke(get);
                    // our own increment is visible to our later read
                    assert!(seen > before);
                    before
                })
            })
            .collect();

        let mut befores: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        befores.sort_unstable();
        // each increment observed a distinct predecessor state
        assert_eq!(befores, (0..THREADS as i64).collect::<Vec<_>>());
        assert_eq!(counter.invoke(get), THREADS as i64);
    }

    #[test]
    fn stalled_invoker_does_not_block_others() {
        let counter = Arc::new(SwapUniversal::new(0i64));
        // linked first, then the invoker goes to sleep before helping
        let stalled = counter.announce(add(5));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        counter.invoke(add(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(stalled.node.state.is_set());
        assert_eq!(stalled.complete(), 0);
        assert_eq!(counter.invoke(get), 405);
    }

    #[test]
    fn racing_helpers_agree() {
        const HELPERS: usize = 6;
        let counter = SwapUniversal::new(0i64);
        let first = counter.announce(|value: &mut i64| {
            RUNS.fetch_add(1, Ordering::Relaxed);
            *value += 10;
            *value
        });
        let second = counter.announce(add(1));
        let target = second.node.clone();

        let barrier = Arc::new(Barrier::new(HELPERS));
        let handles: Vec<_> = (0..HELPERS)
            .map(|_| {
                let target = target.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    chain::help(&target);
                    *target.state.get().unwrap()
                })
            })
            .collect();
        let states: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(states.iter().all(|&state| state == 11));
        let runs = RUNS.load(Ordering::Relaxed);
        assert!(runs >= 1 && runs <= HELPERS);
        assert_eq!(first.complete(), 10);
        assert_eq!(second.complete(), 10);
        assert_eq!(counter.invoke(get), 11);
    }

    #[test]
    fn debug_shows_latest_state() {
        let counter = SwapUniversal::new(0i64);
        counter.invoke(add(42));
        assert!(format!("{:?}", counter).contains("42"));
    }

    #[test]
    fn results_only_need_to_be_send() {
        let counter = Arc::new(SwapUniversal::new(0i64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    (0..50)
                        .map(|_| counter.invoke(|value: &mut i64| Cell::new(add(1)(value))))
                        .map(Cell::into_inner)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut befores: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        befores.sort_unstable();
        assert_eq!(befores, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn operations_own_their_captures() {
        let map = SwapUniversal::new(HashMap::new());
        for (i, word) in ["a", "b", "a"].iter().enumerate() {
            let key = word.to_string();
            map.invoke(move |m: &mut HashMap<String, usize>| m.insert(key.clone(), i));
        }
        let key = String::from("a");
        let found = map.invoke(move |m: &mut HashMap<String, usize>| m.get(&key).copied());
        assert_eq!(found, Some(2));

        // shared caller data travels behind an Arc
        let wanted = Arc::new(vec![String::from("a"), String::from("b"), String::from("c")]);
        let lookup = wanted.clone();
        let hits = map.invoke(move |m: &mut HashMap<String, usize>| {
            lookup.iter().filter(|k| m.contains_key(*k)).count()
        });
        assert_eq!(hits, 2);
        assert_eq!(wanted.len(), 3);
    }

    #[test]
    fn unresolved_history_drops_iteratively() {
        let counter = SwapUniversal::new(0i64);
        let mut pending = Vec::new();
        for _ in 0..200_000 {
            pending.push(counter.announce(add(1)));
        }
        // nobody helped, every record still points at its predecessor
        drop(pending);
        drop(counter);
    }
}
