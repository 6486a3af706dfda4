// Reclaimer: releases native handles on a dedicated background thread.
//
// Ownership replaces the weak-observation pattern. The owning value holds a
// `Tracked` guard; dropping the guard is the notification that the owner is
// gone, and it enqueues the (handle, destructor) record. A single worker
// drains the queue, so a destructor never runs twice and never runs while
// the owner is alive.
//
// Queue messages:
// - Reclaim: run the destructor for one record
// - Sync:    barrier, acknowledged once every earlier message is processed
// - Shutdown: stop the worker; records queued later are abandoned

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use jamspell_core::NativeHandle;

/// Thread name of the global reclaimer worker.
pub const GLOBAL_THREAD_NAME: &str = "jamspell-cleanup";

/// A function releasing the native resources behind one handle.
pub type Destructor = Box<dyn FnOnce(NativeHandle) + Send + 'static>;

/// A handle paired with the destructor that matches its allocator.
struct TrackedReference {
    handle: NativeHandle,
    destructor: Destructor,
}

enum Message {
    Reclaim(TrackedReference),
    Sync(Sender<()>),
    Shutdown,
}

#[derive(Default)]
struct Stats {
    tracked: AtomicU64,
    reclaimed: AtomicU64,
    failed: AtomicU64,
}

struct Inner {
    /// `None` when no worker thread could be started; records are then
    /// released on the dropping thread.
    queue: Option<Sender<Message>>,
    stats: Stats,
}

impl Inner {
    /// Invoke the destructor, containing any panic it raises.
    fn reclaim(&self, reference: TrackedReference) {
        let TrackedReference { handle, destructor } = reference;
        match panic::catch_unwind(AssertUnwindSafe(|| destructor(handle))) {
            Ok(()) => {
                self.stats.reclaimed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%handle, "native handle reclaimed");
            }
            Err(payload) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    %handle,
                    reason = panic_message(payload.as_ref()),
                    "native destructor failed"
                );
            }
        }
    }
}

/// Background collector for native handles.
pub struct Reclaimer {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Option<ThreadId>,
}

impl Reclaimer {
    /// Spawn a reclaimer with its own named worker thread.
    pub fn start(thread_name: &str) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let inner = Arc::new(Inner {
            queue: Some(sender),
            stats: Stats::default(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run(receiver, worker_inner))?;

        tracing::debug!(thread = thread_name, "reclaimer started");
        Ok(Self {
            inner,
            worker_id: Some(worker.thread().id()),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// A reclaimer without a worker: every guard releases its handle on the
    /// thread that drops it.
    pub fn inline() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: None,
                stats: Stats::default(),
            }),
            worker: Mutex::new(None),
            worker_id: None,
        }
    }

    /// The process-wide reclaimer, started on first use.
    ///
    /// Falls back to inline release if the worker thread cannot be spawned.
    pub fn global() -> &'static Reclaimer {
        static GLOBAL: OnceLock<Reclaimer> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            Reclaimer::start(GLOBAL_THREAD_NAME).unwrap_or_else(|e| {
                tracing::error!(error = %e, "unable to start reclaimer thread; releasing inline");
                Reclaimer::inline()
            })
        })
    }

    /// Start tracking `handle`. Returns `None` for the null handle, in which
    /// case `destructor` is dropped without being called.
    ///
    /// The returned guard must be owned by the value that owns the handle.
    /// When the guard is dropped, `destructor(handle)` runs exactly once on
    /// the worker thread.
    pub fn track<D>(&self, handle: NativeHandle, destructor: D) -> Option<Tracked>
    where
        D: FnOnce(NativeHandle) + Send + 'static,
    {
        if handle.is_null() {
            return None;
        }
        self.inner.stats.tracked.fetch_add(1, Ordering::Relaxed);
        Some(Tracked {
            reference: Some(TrackedReference {
                handle,
                destructor: Box::new(destructor),
            }),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Block until every record enqueued before this call has been
    /// processed. Returns `false` if the worker is no longer running.
    pub fn sync(&self) -> bool {
        let Some(queue) = &self.inner.queue else {
            return true;
        };
        if self.on_worker_thread() {
            return false;
        }
        let (ack, done) = crossbeam_channel::bounded(1);
        if queue.send(Message::Sync(ack)).is_err() {
            return false;
        }
        done.recv().is_ok()
    }

    /// Stop the worker and wait for it to exit. Records still queued
    /// behind the shutdown request are abandoned.
    pub fn shutdown(&self) {
        if let Some(queue) = &self.inner.queue {
            let _ = queue.send(Message::Shutdown);
        }
        if self.on_worker_thread() {
            return;
        }
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("reclaimer thread panicked");
            }
        }
    }

    /// Number of handles ever tracked.
    pub fn tracked(&self) -> u64 {
        self.inner.stats.tracked.load(Ordering::Relaxed)
    }

    /// Number of destructors that completed.
    pub fn reclaimed(&self) -> u64 {
        self.inner.stats.reclaimed.load(Ordering::Relaxed)
    }

    /// Number of destructors that panicked.
    pub fn failed(&self) -> u64 {
        self.inner.stats.failed.load(Ordering::Relaxed)
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_id == Some(thread::current().id())
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reclaimer")
            .field("inline", &self.inner.queue.is_none())
            .field("tracked", &self.tracked())
            .field("reclaimed", &self.reclaimed())
            .field("failed", &self.failed())
            .finish()
    }
}

fn run(receiver: Receiver<Message>, inner: Arc<Inner>) {
    // recv blocks while the queue is empty and only errors once every
    // sender is gone.
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Reclaim(reference) => inner.reclaim(reference),
            Message::Sync(ack) => {
                let _ = ack.send(());
            }
            Message::Shutdown => break,
        }
    }
    let abandoned = receiver.len();
    tracing::debug!(abandoned, "reclaimer stopped");
}

// ── Tracked ──────────────────────────────────────────────────────

/// Ownership token for one native handle.
///
/// Dropping it schedules the destructor on the reclaimer. It is neither
/// `Clone` nor `Copy`, so the record can only be consumed once.
pub struct Tracked {
    reference: Option<TrackedReference>,
    inner: Arc<Inner>,
}

impl Tracked {
    pub fn handle(&self) -> NativeHandle {
        self.reference
            .as_ref()
            .map_or(NativeHandle::NULL, |r| r.handle)
    }

    /// Release the handle now, on the calling thread.
    pub fn release_now(mut self) {
        if let Some(reference) = self.reference.take() {
            self.inner.reclaim(reference);
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        let Some(reference) = self.reference.take() else {
            return;
        };
        match &self.inner.queue {
            Some(queue) => {
                if let Err(unsent) = queue.send(Message::Reclaim(reference)) {
                    // Worker is gone (shutdown): the OS reclaims the memory
                    // at process exit.
                    if let Message::Reclaim(reference) = unsent.into_inner() {
                        tracing::debug!(handle = %reference.handle, "reclaimer stopped; handle abandoned");
                    }
                }
            }
            None => self.inner.reclaim(reference),
        }
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&self.handle()).finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<NativeHandle>>>, impl Fn() -> Destructor) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let make = move || -> Destructor {
            let log = Arc::clone(&log2);
            Box::new(move |h| log.lock().unwrap().push(h))
        };
        (log, make)
    }

    #[test]
    fn null_handle_is_not_tracked() {
        let reclaimer = Reclaimer::start("test-null").unwrap();
        let (log, make) = recorder();
        assert!(reclaimer.track(NativeHandle::NULL, make()).is_none());
        assert!(reclaimer.sync());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(reclaimer.tracked(), 0);
    }

    #[test]
    fn destructor_waits_for_guard_drop() {
        let reclaimer = Reclaimer::start("test-wait").unwrap();
        let (log, make) = recorder();
        let guard = reclaimer.track(NativeHandle::from_raw(7), make()).unwrap();
        assert_eq!(guard.handle(), NativeHandle::from_raw(7));

        assert!(reclaimer.sync());
        assert!(log.lock().unwrap().is_empty());

        drop(guard);
        assert!(reclaimer.sync());
        assert_eq!(*log.lock().unwrap(), vec![NativeHandle::from_raw(7)]);
        assert_eq!(reclaimer.reclaimed(), 1);
    }

    #[test]
    fn destructor_runs_on_worker_thread() {
        let reclaimer = Reclaimer::start("test-worker-name").unwrap();
        let seen = Arc::new(StdMutex::new(None));
        let seen2 = Arc::clone(&seen);
        let guard = reclaimer
            .track(NativeHandle::from_raw(1), move |_| {
                *seen2.lock().unwrap() = thread::current().name().map(str::to_string);
            })
            .unwrap();
        drop(guard);
        assert!(reclaimer.sync());
        assert_eq!(seen.lock().unwrap().as_deref(), Some("test-worker-name"));
    }

    #[test]
    fn panicking_destructor_does_not_stop_the_loop() {
        let reclaimer = Reclaimer::start("test-panic").unwrap();
        let (log, make) = recorder();

        let bad = reclaimer
            .track(NativeHandle::from_raw(1), |_| panic!("native free failed"))
            .unwrap();
        let good = reclaimer.track(NativeHandle::from_raw(2), make()).unwrap();
        drop(bad);
        drop(good);

        assert!(reclaimer.sync());
        assert_eq!(*log.lock().unwrap(), vec![NativeHandle::from_raw(2)]);
        assert_eq!(reclaimer.failed(), 1);
        assert_eq!(reclaimer.reclaimed(), 1);
    }

    #[test]
    fn release_now_runs_inline_once() {
        let reclaimer = Reclaimer::start("test-now").unwrap();
        let (log, make) = recorder();
        let guard = reclaimer.track(NativeHandle::from_raw(9), make()).unwrap();
        guard.release_now();
        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(reclaimer.sync());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn inline_reclaimer_releases_on_drop() {
        let reclaimer = Reclaimer::inline();
        let (log, make) = recorder();
        drop(reclaimer.track(NativeHandle::from_raw(3), make()));
        assert_eq!(*log.lock().unwrap(), vec![NativeHandle::from_raw(3)]);
        assert!(reclaimer.sync());
    }

    #[test]
    fn guards_dropped_after_shutdown_are_abandoned() {
        let reclaimer = Reclaimer::start("test-shutdown").unwrap();
        let (log, make) = recorder();
        let guard = reclaimer.track(NativeHandle::from_raw(4), make()).unwrap();
        reclaimer.shutdown();
        drop(guard);
        assert!(!reclaimer.sync());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
