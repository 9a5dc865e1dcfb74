//! Intrusive lock-free multi-producer single-consumer queue.
//!
//! The core follows Dmitry Vyukov's intrusive MPSC node queue: producers
//! exchange the list head with a single atomic swap, the lone consumer
//! walks forward through `next` links. Push never blocks and never fails;
//! pop never blocks but may transiently return nothing while a producer
//! is between its swap and its link store. [`RawMpscQueue`] exposes that
//! contract directly over raw [`Node`] pointers for callers that cannot
//! allocate on push; [`channel`] wraps it in a safe sender/receiver pair
//! that boxes payloads; [`LockedMpscQueue`] adds a mutex around pop so
//! multiple threads can take turns draining.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

/// Intrusive list link. Node types embed this by composition and pass
/// pointers to it through [`RawMpscQueue`].
#[derive(Debug)]
pub struct Node {
    next: AtomicPtr<Node>,
}

impl Node {
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free MPSC core operating on raw [`Node`] pointers. Neither push
/// nor pop allocates.
pub struct RawMpscQueue {
    /// Producer side: the most recently pushed node. Padded so producer
    /// swap traffic and the consumer cursor never share a cache line.
    head: CachePadded<AtomicPtr<Node>>,
    /// Consumer-owned cursor.
    tail: UnsafeCell<*mut Node>,
    /// Sentinel node; boxed so its address survives moves of the queue.
    stub: Box<Node>,
}

// The raw pointers inside are managed under the documented push/pop
// contract; the queue itself carries no thread affinity.
unsafe impl Send for RawMpscQueue {}
unsafe impl Sync for RawMpscQueue {}

impl RawMpscQueue {
    pub fn new() -> Self {
        let stub = Box::new(Node::new());
        let stub_ptr: *mut Node = ptr::from_ref(&*stub).cast_mut();
        Self {
            head: CachePadded::new(AtomicPtr::new(stub_ptr)),
            tail: UnsafeCell::new(stub_ptr),
            stub,
        }
    }

    fn stub_ptr(&self) -> *mut Node {
        ptr::from_ref(&*self.stub).cast_mut()
    }

    /// Pushes a node. Callable from any thread. Returns true iff the
    /// queue was possibly empty before this push; true may be reported
    /// sporadically, false never is.
    ///
    /// # Safety
    ///
    /// `node` must point to a valid [`Node`] that stays alive and
    /// untouched by the caller until a pop hands it back.
    pub unsafe fn push(&self, node: *mut Node) -> bool {
        (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
        let prev = self.head.swap(node, Ordering::AcqRel);
        // The node becomes reachable by the consumer only at this store.
        (*prev).next.store(node, Ordering::Release);
        prev == self.stub_ptr()
    }

    /// Pops the next node, or None if no node is ready. None does not
    /// mean the queue is empty: a producer may be mid-push.
    ///
    /// # Safety
    ///
    /// Only one thread may pop at a time.
    pub unsafe fn pop(&self) -> Option<*mut Node> {
        self.pop_and_check_end().0
    }

    /// Pops the next node and reports definitive emptiness, resolving
    /// the mid-push ambiguity of [`RawMpscQueue::pop`].
    ///
    /// # Safety
    ///
    /// Only one thread may pop at a time.
    pub unsafe fn pop_and_check_end(&self) -> (Option<*mut Node>, bool) {
        let stub = self.stub_ptr();
        let tail_slot = self.tail.get();
        let mut tail = *tail_slot;
        let mut next = (*tail).next.load(Ordering::Acquire);

        if tail == stub {
            if next.is_null() {
                return (None, true);
            }
            *tail_slot = next;
            tail = next;
            next = (*tail).next.load(Ordering::Acquire);
        }

        if !next.is_null() {
            *tail_slot = next;
            return (Some(tail), false);
        }

        let head = self.head.load(Ordering::Acquire);
        if tail != head {
            // A producer swapped head but has not linked yet; the node
            // will surface momentarily.
            return (None, false);
        }

        // Tail is the last node: recycle the stub behind it so the tail
        // node itself can be handed out.
        self.push(stub);

        next = (*tail).next.load(Ordering::Acquire);
        if !next.is_null() {
            *tail_slot = next;
            (Some(tail), false)
        } else {
            (None, false)
        }
    }
}

impl Default for RawMpscQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RawMpscQueue {
    fn drop(&mut self) {
        // Every pushed node must have been popped and reclaimed.
        debug_assert!(self.head.load(Ordering::Relaxed) == self.stub_ptr());
        debug_assert!(unsafe { *self.tail.get() } == self.stub_ptr());
    }
}

#[repr(C)]
struct Entry<T> {
    /// Must stay the first field: queue pointers are casts of this link.
    link: Node,
    value: T,
}

struct Shared<T> {
    raw: RawMpscQueue,
    _marker: PhantomData<T>,
}

// Entries only ever move whole `T` values between threads.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Sole owner at this point: no producer can be mid-push, so None
        // from pop means drained.
        unsafe {
            while let Some(node) = self.raw.pop() {
                drop(Box::from_raw(node.cast::<Entry<T>>()));
            }
        }
    }
}

/// Producer handle for a boxed MPSC queue. Cheap to clone; push from any
/// thread.
pub struct MpscSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for MpscSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send> MpscSender<T> {
    /// Enqueues `value`. Returns true iff the queue was possibly empty
    /// before the push, which hosts can use as a wake-the-consumer hint.
    pub fn push(&self, value: T) -> bool {
        let entry = Box::into_raw(Box::new(Entry {
            link: Node::new(),
            value,
        }));
        unsafe {
            let node = ptr::addr_of_mut!((*entry).link);
            self.shared.raw.push(node)
        }
    }
}

/// Consumer half of a boxed MPSC queue. Popping takes `&mut self`, which
/// pins the single-consumer discipline into the type.
pub struct MpscQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> MpscQueue<T> {
    /// Pops the next value, or None if nothing is ready. None does not
    /// mean the queue is empty; treat it as "try again later".
    pub fn pop(&mut self) -> Option<T> {
        self.pop_and_check_end().0
    }

    /// Pops the next value and reports definitive emptiness.
    pub fn pop_and_check_end(&mut self) -> (Option<T>, bool) {
        let (node, empty) = unsafe { self.shared.raw.pop_and_check_end() };
        let value = node.map(|n| {
            let entry = unsafe { Box::from_raw(n.cast::<Entry<T>>()) };
            entry.value
        });
        (value, empty)
    }

    /// A new producer handle for this queue.
    pub fn sender(&self) -> MpscSender<T> {
        MpscSender {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Creates a boxed MPSC queue, returning the cloneable producer handle
/// and the consumer.
pub fn channel<T: Send>() -> (MpscSender<T>, MpscQueue<T>) {
    let shared = Arc::new(Shared {
        raw: RawMpscQueue::new(),
        _marker: PhantomData,
    });
    (
        MpscSender {
            shared: Arc::clone(&shared),
        },
        MpscQueue { shared },
    )
}

/// MPSC queue with a mutex around the consumer side: any thread may pop,
/// taking turns; push stays lock-free.
pub struct LockedMpscQueue<T> {
    consumer: Mutex<MpscQueue<T>>,
    sender: MpscSender<T>,
}

impl<T: Send> LockedMpscQueue<T> {
    pub fn new() -> Self {
        let (sender, consumer) = channel();
        Self {
            consumer: Mutex::new(consumer),
            sender,
        }
    }

    /// Enqueues `value`; see [`MpscSender::push`] for the return value.
    pub fn push(&self, value: T) -> bool {
        self.sender.push(value)
    }

    /// Pops the next value, or None if nothing is ready right now.
    pub fn try_pop(&self) -> Option<T> {
        self.consumer.lock().pop()
    }

    /// Pops the next value. Returns None only if the queue was
    /// definitively empty at some point during the call.
    pub fn pop(&self) -> Option<T> {
        let mut consumer = self.consumer.lock();
        loop {
            let (value, empty) = consumer.pop_and_check_end();
            if value.is_some() {
                return value;
            }
            if empty {
                return None;
            }
            std::hint::spin_loop();
        }
    }
}

impl<T: Send> Default for LockedMpscQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_fifo_single_thread() {
        let (tx, mut rx) = channel();
        for i in 0..100 {
            tx.push(i);
        }
        for i in 0..100 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_push_reports_possibly_empty() {
        let (tx, mut rx) = channel();
        assert!(tx.push(1));
        assert!(!tx.push(2));
        rx.pop();
        rx.pop();
        // Queue drained: the next push sees it empty again.
        assert!(tx.push(3));
        rx.pop();
    }

    #[test]
    fn test_pop_and_check_end_reports_empty() {
        let (tx, mut rx) = channel::<u32>();
        let (value, empty) = rx.pop_and_check_end();
        assert_eq!(value, None);
        assert!(empty);

        tx.push(7);
        let (value, empty) = rx.pop_and_check_end();
        assert_eq!(value, Some(7));
        assert!(!empty);

        let (value, empty) = rx.pop_and_check_end();
        assert_eq!(value, None);
        assert!(empty);
    }

    #[test]
    fn test_multi_producer_fan_in() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 1_000;

        let (tx, mut rx) = channel();
        let mut handles = Vec::new();
        for p in 0..PRODUCERS {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    tx.push((p, i));
                }
            }));
        }

        let mut seen = vec![Vec::new(); PRODUCERS];
        let mut drained = 0;
        while drained < PRODUCERS * PER_PRODUCER {
            if let Some((p, i)) = rx.pop() {
                seen[p].push(i);
                drained += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        for handle in handles {
            handle.join().expect("producer thread");
        }

        // Per-producer FIFO survives the fan-in.
        for run in &seen {
            assert_eq!(run.len(), PER_PRODUCER);
            assert!(run.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_drop_reclaims_pending_entries() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let (tx, rx) = channel();
            for _ in 0..10 {
                tx.push(Counted(Arc::clone(&drops)));
            }
            drop(rx);
            drop(tx);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_locked_queue_shared_draining() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let queue = Arc::new(LockedMpscQueue::new());
        let mut handles = Vec::new();
        for p in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.push(p * PER_PRODUCER + i);
                }
            }));
        }

        let drained = Arc::new(AtomicUsize::new(0));
        let mut drainers = Vec::new();
        for _ in 0..2 {
            let queue = Arc::clone(&queue);
            let drained = Arc::clone(&drained);
            drainers.push(thread::spawn(move || {
                while drained.load(Ordering::Relaxed) < PRODUCERS * PER_PRODUCER {
                    if queue.pop().is_some() {
                        drained.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().expect("producer thread");
        }
        for handle in drainers {
            handle.join().expect("drainer thread");
        }
        assert_eq!(drained.load(Ordering::Relaxed), PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn test_raw_queue_round_trip() {
        let queue = RawMpscQueue::new();
        let mut nodes: Vec<Box<Node>> = (0..3).map(|_| Box::new(Node::new())).collect();
        let pointers: Vec<*mut Node> = nodes.iter_mut().map(|n| ptr::from_mut(&mut **n)).collect();

        unsafe {
            assert!(queue.push(pointers[0]));
            assert!(!queue.push(pointers[1]));
            assert!(!queue.push(pointers[2]));

            assert_eq!(queue.pop(), Some(pointers[0]));
            assert_eq!(queue.pop(), Some(pointers[1]));
            let (node, empty) = queue.pop_and_check_end();
            assert_eq!(node, Some(pointers[2]));
            assert!(!empty);
            let (node, empty) = queue.pop_and_check_end();
            assert_eq!(node, None);
            assert!(empty);
        }
    }
}
