//! Bounded fan-out of work items to a fixed set of worker threads.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Mutex;
use tracing::trace;

/// Producer handle passed to the `produce` closure of [`dispatch`].
pub struct Dispatcher<T> {
    tx: SyncSender<T>,
    dispatched: usize,
}

impl<T> Dispatcher<T> {
    /// Hand an item to the pool, blocking while every worker is busy and the
    /// channel is full. Returns `false` if the workers are gone.
    pub fn send(&mut self, item: T) -> bool {
        if self.tx.send(item).is_ok() {
            self.dispatched += 1;
            true
        } else {
            false
        }
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }
}

/// Run `produce` on the calling thread while `threads` workers apply `handle`
/// to every item it sends.
///
/// The channel closes when `produce` returns; `dispatch` returns only after
/// every worker has drained it and exited.
pub fn dispatch<T, R>(
    threads: usize,
    produce: impl FnOnce(&mut Dispatcher<T>) -> R,
    handle: impl Fn(T) + Sync,
) -> R
where
    T: Send,
{
    let threads = threads.max(1);
    let (tx, rx) = sync_channel::<T>(threads);
    let rx = Mutex::new(rx);

    std::thread::scope(|s| {
        for id in 0..threads {
            let rx = &rx;
            let handle = &handle;
            s.spawn(move || {
                while let Some(item) = next(rx) {
                    handle(item);
                }
                trace!("worker {id} exiting");
            });
        }

        let mut dispatcher = Dispatcher { tx, dispatched: 0 };
        let result = produce(&mut dispatcher);
        trace!("producer done after {} items", dispatcher.dispatched);
        drop(dispatcher);
        result
    })
}

fn next<T>(rx: &Mutex<Receiver<T>>) -> Option<T> {
    let guard = rx.lock().ok()?;
    guard.recv().ok()
}
