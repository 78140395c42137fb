//! Observer events and their delivery thread.
//!
//! Worker threads never call observers directly: they post events into a
//! per-source FIFO, and a single delivery thread drains the queue and
//! invokes the callbacks. That serializes every event for a source and
//! keeps workers decoupled from observer latency (observers must still be
//! non-blocking).

use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

/// Terminal status of a loading (indexing) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Successful,
    Interrupted,
    Failed,
}

/// Classification of an observed file transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoredStatus {
    Unchanged,
    DataAdded,
    Truncated,
}

/// Callbacks delivered to core consumers. All one-way and fire-and-forget;
/// default implementations ignore the event.
pub trait Observer: Send + Sync {
    fn loading_progressed(&self, _percent: u32) {}
    fn loading_finished(&self, _status: LoadStatus) {}
    fn file_changed(&self, _status: MonitoredStatus) {}
    fn search_progressed(&self, _nb_matches: u64, _percent: u32, _initial_line: u64) {}
    fn search_finished(&self) {}
}

#[derive(Debug, Clone)]
pub enum CoreEvent {
    LoadingProgressed(u32),
    LoadingFinished(LoadStatus),
    FileChanged(MonitoredStatus),
    SearchProgressed {
        nb_matches: u64,
        percent: u32,
        initial_line: u64,
    },
    SearchFinished,
}

/// Cloneable posting side of a dispatcher, handed to worker threads.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<Envelope>,
}

impl EventSink {
    pub fn post(&self, event: CoreEvent) {
        // A closed queue means the source is being torn down; late events
        // from a winding-down worker are dropped on the floor.
        let _ = self.tx.send(Envelope::Event(event));
    }
}

enum Envelope {
    Event(CoreEvent),
    Shutdown,
}

/// Per-source event queue plus its delivery thread.
pub struct EventDispatcher {
    tx: Sender<Envelope>,
    observers: Arc<Mutex<Vec<Weak<dyn Observer>>>>,
    delivery: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = channel::<Envelope>();
        let observers: Arc<Mutex<Vec<Weak<dyn Observer>>>> = Arc::new(Mutex::new(Vec::new()));

        let delivery_observers = Arc::clone(&observers);
        let delivery = std::thread::spawn(move || {
            while let Ok(Envelope::Event(event)) = rx.recv() {
                let mut observers = delivery_observers.lock().expect("observer list poisoned");
                observers.retain(|weak| {
                    let Some(observer) = weak.upgrade() else {
                        return false;
                    };
                    deliver(&*observer, &event);
                    true
                });
            }
        });

        Self {
            tx,
            observers,
            delivery: Some(delivery),
        }
    }

    /// Register an observer. Only a weak reference is retained; a dropped
    /// observer is pruned on the next delivery.
    pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
        self.observers
            .lock()
            .expect("observer list poisoned")
            .push(Arc::downgrade(observer));
    }

    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    pub fn post(&self, event: CoreEvent) {
        let _ = self.tx.send(Envelope::Event(event));
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(Envelope::Shutdown);
        if let Some(handle) = self.delivery.take() {
            let _ = handle.join();
        }
    }
}

fn deliver(observer: &dyn Observer, event: &CoreEvent) {
    match *event {
        CoreEvent::LoadingProgressed(percent) => observer.loading_progressed(percent),
        CoreEvent::LoadingFinished(status) => observer.loading_finished(status),
        CoreEvent::FileChanged(status) => observer.file_changed(status),
        CoreEvent::SearchProgressed {
            nb_matches,
            percent,
            initial_line,
        } => observer.search_progressed(nb_matches, percent, initial_line),
        CoreEvent::SearchFinished => observer.search_finished(),
    }
}
