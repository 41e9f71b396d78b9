#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

use assistant_engine::ChatTransport;
use editor_host::{MessageTag, ReviewGate, ReviewVerdict, TranscriptSink};
use openrouter_api::{CancellationSignal, ChatRequest, OpenRouterError};

pub enum Scripted {
    Fragments(Vec<String>),
    /// Emits `emit` fragments, then observes cancellation and aborts.
    CancelAfter { fragments: Vec<String>, emit: usize },
    Error(OpenRouterError),
}

/// Deterministic transport fed from a script; repeats the final entry when
/// the script runs dry so loop-bound tests can assert call counts.
pub struct FakeTransport {
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<Vec<String>>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl FakeTransport {
    pub fn scripted(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn responses(texts: &[&str]) -> Self {
        Self::scripted(
            texts
                .iter()
                .map(|text| Scripted::Fragments(vec![(*text).to_string()]))
                .collect(),
        )
    }

    /// Returns the same response for every call, forever.
    pub fn repeating(text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(vec![text.to_string()]),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChatTransport for FakeTransport {
    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationSignal,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<String, OpenRouterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock_unpoisoned(&self.requests).push(request.clone());

        let next = lock_unpoisoned(&self.script).pop_front();
        let next = match (next, &self.repeat) {
            (Some(next), _) => next,
            (None, Some(fragments)) => Scripted::Fragments(fragments.clone()),
            (None, None) => Scripted::Fragments(Vec::new()),
        };

        match next {
            Scripted::Fragments(fragments) => {
                let mut full = String::new();
                for fragment in fragments {
                    if cancel.load(Ordering::Acquire) {
                        return Err(OpenRouterError::Cancelled);
                    }
                    on_delta(&fragment);
                    full.push_str(&fragment);
                }
                Ok(full)
            }
            Scripted::CancelAfter { fragments, emit } => {
                for fragment in fragments.iter().take(emit) {
                    on_delta(fragment);
                }
                cancel.store(true, Ordering::Release);
                Err(OpenRouterError::Cancelled)
            }
            Scripted::Error(error) => Err(error),
        }
    }
}

/// Transport that parks inside `stream` until the test releases it, used to
/// observe the single-active-generation guard from outside.
pub struct GatedTransport {
    gate: Mutex<Receiver<()>>,
}

impl GatedTransport {
    pub fn new() -> (Self, Sender<()>) {
        let (tx, rx) = channel();
        (
            Self {
                gate: Mutex::new(rx),
            },
            tx,
        )
    }
}

impl ChatTransport for GatedTransport {
    fn stream(
        &self,
        _request: &ChatRequest,
        _cancel: &CancellationSignal,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<String, OpenRouterError> {
        let _ = lock_unpoisoned(&self.gate).recv();
        on_delta("released");
        Ok("released".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Begin,
    Delta(String),
    Finalize(String),
    Annotation(&'static str, String),
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        lock_unpoisoned(&self.events).clone()
    }

    pub fn annotations(&self) -> Vec<(&'static str, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Annotation(tag, text) => Some((tag, text)),
                _ => None,
            })
            .collect()
    }

    pub fn finalized(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Finalize(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl TranscriptSink for RecordingSink {
    fn begin_assistant_turn(&self) {
        lock_unpoisoned(&self.events).push(SinkEvent::Begin);
    }

    fn stream_delta(&self, text: &str) {
        lock_unpoisoned(&self.events).push(SinkEvent::Delta(text.to_string()));
    }

    fn finalize_assistant_turn(&self, display_text: &str) {
        lock_unpoisoned(&self.events).push(SinkEvent::Finalize(display_text.to_string()));
    }

    fn annotation(&self, tag: MessageTag, text: &str) {
        lock_unpoisoned(&self.events).push(SinkEvent::Annotation(tag.as_str(), text.to_string()));
    }
}

/// Review gate with a scripted verdict per call; records what it was shown.
pub struct ScriptedReview {
    verdicts: Mutex<VecDeque<ReviewVerdict>>,
    pub seen: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedReview {
    pub fn new(verdicts: Vec<ReviewVerdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn review_count(&self) -> usize {
        lock_unpoisoned(&self.seen).len()
    }
}

impl ReviewGate for ScriptedReview {
    fn review(&self, target: &str, old_content: &str, new_content: &str) -> ReviewVerdict {
        lock_unpoisoned(&self.seen).push((
            target.to_string(),
            old_content.to_string(),
            new_content.to_string(),
        ));

        lock_unpoisoned(&self.verdicts)
            .pop_front()
            .unwrap_or_else(|| ReviewVerdict::Accept(new_content.to_string()))
    }
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
