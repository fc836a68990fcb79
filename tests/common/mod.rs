#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use herald::{Config, Envelope, Error, EventHandler, Payload, handler};

#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub id: String,
    pub flag: bool,
}

impl Payload for Note {}

pub fn note(id: &str) -> Note {
    Note {
        id: id.to_string(),
        flag: false,
    }
}

/// Defaults with batch replay off, so handler call counts stay exact.
pub fn quiet_config() -> Config {
    Config::default().with_batch_size(1)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Collects every envelope delivered to its handlers.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Arc<Envelope<Note>>>>>,
}

impl Recorder {
    pub fn handler(&self) -> impl EventHandler<Note> + use<> {
        let seen = self.seen.clone();
        move |env: Arc<Envelope<Note>>| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(env);
                Ok::<_, Error>(())
            }
        }
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|env| env.data().id.clone())
            .collect()
    }
}

pub type Log = Arc<Mutex<Vec<&'static str>>>;

/// Appends `label` to `log` when invoked, for ordering assertions.
pub fn labelled(label: &'static str, log: &Log) -> impl EventHandler<Note> + use<> {
    let log = log.clone();
    handler::sync(move |_: &Envelope<Note>| {
        log.lock().unwrap().push(label);
        Ok(())
    })
}

/// Async variant of [`labelled`]: logs on first poll, then yields before finishing.
pub fn labelled_async(label: &'static str, log: &Log) -> impl EventHandler<Note> + use<> {
    let log = log.clone();
    move |_: Arc<Envelope<Note>>| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(label);
            tokio::task::yield_now().await;
            Ok::<_, Error>(())
        }
    }
}

pub fn failing() -> impl EventHandler<Note> {
    handler::sync(|env: &Envelope<Note>| {
        Err(Error::external(format!("cannot handle {}", env.data().id)))
    })
}

/// Tracks how many handler bodies run at once.
#[derive(Clone, Default)]
pub struct ConcurrencyTracker {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl ConcurrencyTracker {
    pub fn handler(&self, hold: Duration) -> impl EventHandler<Note> + use<> {
        let tracker = self.clone();
        move |_: Arc<Envelope<Note>>| {
            let tracker = tracker.clone();
            async move {
                let now = tracker.current.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(hold).await;
                tracker.current.fetch_sub(1, Ordering::SeqCst);
                tracker.completed.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            }
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}
