use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use command_scanner::{scan, CommandRecord, ScannedCommand};
use editor_host::{EditorOps, MessageTag, ReviewGate, TranscriptSink};
use openrouter_api::{
    CancellationSignal, ChatMessage, ChatRequest, OpenRouterClient, OpenRouterConfig,
    OpenRouterError,
};
use tracing::{debug, info, warn};

use crate::context;
use crate::conversation::{CodeBlock, ConversationState};
use crate::dispatch::{DispatchEffect, Dispatcher};
use crate::error::EngineError;
use crate::settings::AssistantSettings;

/// Maximum read/execute follow-up turns chained from one user message.
///
/// The source of each follow-up is the model itself, so without a bound a
/// confused model could keep requesting reads forever.
pub const MAX_FOLLOW_UP_DEPTH: u32 = 8;

/// Pause before a stop-triggered automatic continuation, giving the host a
/// chance to render the stop annotation first.
const AUTO_CONTINUE_DELAY: Duration = Duration::from_millis(500);

/// Blocking transport abstraction consumed by the generation loop.
///
/// The engine runs generations on plain worker threads; async transports
/// bridge with a current-thread runtime (see [`OpenRouterTransport`]).
pub trait ChatTransport: Send + Sync + 'static {
    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationSignal,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<String, OpenRouterError>;
}

/// Production transport backed by the OpenRouter streaming client.
pub struct OpenRouterTransport {
    client: OpenRouterClient,
}

impl OpenRouterTransport {
    pub fn new(config: OpenRouterConfig) -> Result<Self, OpenRouterError> {
        Ok(Self {
            client: OpenRouterClient::new(config)?,
        })
    }
}

impl ChatTransport for OpenRouterTransport {
    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationSignal,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<String, OpenRouterError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                OpenRouterError::Unknown(format!("failed to initialize tokio runtime: {error}"))
            })?;

        runtime.block_on(
            self.client
                .stream_chat(request, Some(cancel), |delta| on_delta(delta)),
        )
    }
}

struct ActiveGeneration {
    cancel: CancellationSignal,
}

/// The conversation-level protocol engine.
///
/// Owns conversation state and the single-active-generation guard; talks to
/// the host only through the `editor_host` contracts fixed at construction.
pub struct ChatEngine {
    settings: AssistantSettings,
    project_root: Option<PathBuf>,
    state: Mutex<ConversationState>,
    transport: Arc<dyn ChatTransport>,
    dispatcher: Dispatcher,
    sink: Arc<dyn TranscriptSink>,
    active: Mutex<Option<ActiveGeneration>>,
}

impl ChatEngine {
    pub fn new(
        settings: AssistantSettings,
        project_root: Option<PathBuf>,
        transport: Arc<dyn ChatTransport>,
        editor: Arc<dyn EditorOps>,
        review: Arc<dyn ReviewGate>,
        sink: Arc<dyn TranscriptSink>,
    ) -> Self {
        let dispatcher = Dispatcher::new(project_root.clone(), editor, review);
        Self {
            settings,
            project_root,
            state: Mutex::new(ConversationState::new()),
            transport,
            dispatcher,
            sink,
            active: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    /// Sends a user message and runs the generation on a named background
    /// thread, so the caller (typically the UI thread) never blocks on
    /// network or process I/O.
    pub fn send_user_message(self: &Arc<Self>, text: &str) -> Result<(), EngineError> {
        let prompt = prepare_prompt(text)?;
        let cancel = self.begin_generation()?;
        self.record_user_turn(&prompt);

        let engine = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("assistant-generation".to_string())
            .spawn(move || engine.run_generation(cancel));

        if let Err(error) = spawned {
            self.clear_active_generation();
            return Err(EngineError::Config(format!(
                "failed to spawn generation thread: {error}"
            )));
        }

        Ok(())
    }

    /// Sends a user message and runs the full generation loop on the calling
    /// thread. Used by headless hosts and tests that need determinism.
    pub fn send_user_message_blocking(&self, text: &str) -> Result<(), EngineError> {
        let prompt = prepare_prompt(text)?;
        let cancel = self.begin_generation()?;
        self.record_user_turn(&prompt);
        self.run_generation(cancel);
        Ok(())
    }

    /// Requests cooperative cancellation of the active generation, if any.
    pub fn cancel_active_generation(&self) {
        let active = lock_unpoisoned(&self.active);
        if let Some(active) = active.as_ref() {
            active.cancel.store(true, Ordering::Release);
            info!("cancellation requested for the active generation");
        }
    }

    pub fn is_generation_active(&self) -> bool {
        lock_unpoisoned(&self.active).is_some()
    }

    /// Clears turn history, the code-block registry, and the first-message
    /// flag in one locked step.
    pub fn clear_history(&self) {
        lock_unpoisoned(&self.state).clear();
        info!("conversation history cleared");
    }

    /// Snapshot of the model-facing history, including synthesized
    /// read/execute follow-up turns.
    pub fn conversation_turns(&self) -> Vec<ChatMessage> {
        lock_unpoisoned(&self.state).turns().to_vec()
    }

    /// Resolves a transcript click back to its registered payload and
    /// applies it through the dispatcher.
    pub fn insert_code_block(&self, block_id: u64) -> Result<(), EngineError> {
        let block = lock_unpoisoned(&self.state)
            .code_block(block_id)
            .cloned()
            .ok_or_else(|| EngineError::Config(format!("unknown code block id {block_id}")))?;

        let record = CommandRecord::InsertCode {
            scope: block.scope,
            code: block.code,
            language: block.language,
        };

        match self.dispatcher.dispatch(&record)? {
            DispatchEffect::Applied(status) => {
                self.sink.annotation(MessageTag::Info, &status);
            }
            DispatchEffect::Declined(message) => {
                self.sink.annotation(MessageTag::Info, &message);
                lock_unpoisoned(&self.state).push_turn(ChatMessage::user(message));
            }
            DispatchEffect::FollowUp(_) | DispatchEffect::Noted(_) => {}
        }

        Ok(())
    }

    fn begin_generation(&self) -> Result<CancellationSignal, EngineError> {
        let mut active = lock_unpoisoned(&self.active);
        if active.is_some() {
            return Err(EngineError::GenerationActive);
        }

        let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));
        *active = Some(ActiveGeneration {
            cancel: Arc::clone(&cancel),
        });

        Ok(cancel)
    }

    fn clear_active_generation(&self) {
        *lock_unpoisoned(&self.active) = None;
    }

    fn record_user_turn(&self, prompt: &str) {
        let mut state = lock_unpoisoned(&self.state);
        state.push_turn(ChatMessage::user(prompt));
        state.mark_first_message_sent();
    }

    /// Drives one user turn to completion, including chained read/execute
    /// follow-ups and capped stop auto-continues. Each loop iteration is one
    /// model call.
    fn run_generation(&self, cancel: CancellationSignal) {
        // The active flag must clear on every exit path, or the conversation
        // would refuse all further sends.
        let _guard = ActiveGenerationGuard { engine: self };

        let mut follow_up_depth = 0u32;
        let mut auto_continues = 0u32;

        loop {
            let request = self.build_request();
            self.sink.begin_assistant_turn();

            let mut buffer = String::new();
            let stream_result = self.transport.stream(&request, &cancel, &mut |delta| {
                buffer.push_str(delta);
                self.sink.stream_delta(delta);
            });

            let raw = match stream_result {
                Ok(full) => full,
                Err(OpenRouterError::Cancelled) => {
                    self.finish_cancelled(&buffer);
                    return;
                }
                Err(error) => {
                    self.sink.finalize_assistant_turn("");
                    self.fail_turn(&EngineError::Api(error));
                    return;
                }
            };

            if cancel.load(Ordering::Acquire) {
                self.finish_cancelled(&buffer);
                return;
            }

            // History records what was sent to the model: the raw response,
            // not the rewritten display text.
            let first_block_id = {
                let mut state = lock_unpoisoned(&self.state);
                state.push_turn(ChatMessage::assistant(raw.clone()));
                state.next_code_block_id()
            };

            let outcome = scan(&raw, first_block_id);

            if outcome.suppress_display {
                let Some(scanned) = outcome.commands.first().cloned() else {
                    self.sink.finalize_assistant_turn(&outcome.display_text);
                    return;
                };

                self.sink.finalize_assistant_turn("");
                self.annotate_short_circuit(&scanned.record);

                if follow_up_depth >= MAX_FOLLOW_UP_DEPTH {
                    self.fail_turn(&EngineError::FollowUpLimit {
                        limit: MAX_FOLLOW_UP_DEPTH,
                    });
                    return;
                }

                match self.dispatcher.dispatch(&scanned.record) {
                    Ok(DispatchEffect::FollowUp(turn)) => {
                        // The follow-up turn lands in history before the
                        // recursive model call that consumes it begins.
                        lock_unpoisoned(&self.state).push_turn(turn);
                        follow_up_depth += 1;
                        debug!(follow_up_depth, "re-entering the model loop");
                        continue;
                    }
                    Ok(effect) => {
                        warn!(?effect, "short-circuit command produced no follow-up");
                        return;
                    }
                    Err(error) => {
                        self.fail_turn(&error);
                        return;
                    }
                }
            }

            self.register_code_blocks(&outcome.commands);
            self.sink.finalize_assistant_turn(&outcome.display_text);

            let mut stopped = false;
            for scanned in &outcome.commands {
                match &scanned.record {
                    CommandRecord::InsertCode { .. } => {
                        if self.settings.code_insertion_enabled {
                            self.apply_edit(&scanned.record);
                        }
                    }
                    CommandRecord::ReplaceFile { .. } => {
                        self.apply_edit(&scanned.record);
                    }
                    CommandRecord::Stop { message } => {
                        info!(message = %message, "stop command received");
                        stopped = true;
                    }
                    // Read/execute always arrive via the suppressed path.
                    CommandRecord::ReadFile { .. } | CommandRecord::Execute { .. } => {}
                }
            }

            if stopped
                && self.settings.auto_continue_enabled
                && auto_continues < self.settings.max_auto_continues
            {
                auto_continues += 1;
                debug!(auto_continues, "scheduling automatic continuation");
                thread::sleep(AUTO_CONTINUE_DELAY);
                if cancel.load(Ordering::Acquire) {
                    return;
                }
                continue;
            }

            return;
        }
    }

    fn build_request(&self) -> ChatRequest {
        let root = self
            .project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let messages = {
            let state = lock_unpoisoned(&self.state);
            context::build(state.turns(), &self.settings, &root)
        };

        ChatRequest::new(self.settings.api_settings.model.clone(), messages)
            .with_temperature(self.settings.api_settings.temperature)
    }

    fn annotate_short_circuit(&self, record: &CommandRecord) {
        match record {
            CommandRecord::ReadFile { path } => {
                self.sink
                    .annotation(MessageTag::Info, &format!("Reading file: {path}"));
            }
            CommandRecord::Execute { command } => {
                self.sink
                    .annotation(MessageTag::Info, &format!("Running command: {command}"));
            }
            _ => {}
        }
    }

    fn register_code_blocks(&self, commands: &[ScannedCommand]) {
        let mut state = lock_unpoisoned(&self.state);
        for scanned in commands {
            if let (
                CommandRecord::InsertCode {
                    scope,
                    code,
                    language,
                },
                Some(block_id),
            ) = (&scanned.record, scanned.block_id)
            {
                state.register_code_block(
                    block_id,
                    CodeBlock {
                        scope: *scope,
                        code: code.clone(),
                        language: language.clone(),
                    },
                );
            }
        }
    }

    fn apply_edit(&self, record: &CommandRecord) {
        match self.dispatcher.dispatch(record) {
            Ok(DispatchEffect::Applied(status)) => {
                self.sink.annotation(MessageTag::Info, &status);
            }
            Ok(DispatchEffect::Declined(message)) => {
                self.sink.annotation(MessageTag::Info, &message);
                lock_unpoisoned(&self.state).push_turn(ChatMessage::user(message));
            }
            Ok(DispatchEffect::FollowUp(_) | DispatchEffect::Noted(_)) => {}
            Err(error) => {
                let text = format!("An error occurred: {error}");
                self.sink.annotation(MessageTag::Error, &text);
                lock_unpoisoned(&self.state).push_turn(ChatMessage::system(text));
            }
        }
    }

    fn finish_cancelled(&self, buffer: &str) {
        // Whatever streamed before the cancel stays visible; nothing is
        // dispatched and no assistant turn is recorded for this response.
        self.sink.finalize_assistant_turn(buffer);
        self.sink
            .annotation(MessageTag::Error, "Generation stopped by the user");
        info!("generation cancelled before completion");
    }

    /// Every terminal failure produces exactly one transcript annotation and
    /// one history record, so the model can adapt on its next turn. Nothing
    /// is retried.
    fn fail_turn(&self, error: &EngineError) {
        let text = format!("An error occurred: {error}");
        warn!(%error, "generation turn failed");
        self.sink.annotation(MessageTag::Error, &text);
        lock_unpoisoned(&self.state).push_turn(ChatMessage::system(text));
    }
}

struct ActiveGenerationGuard<'a> {
    engine: &'a ChatEngine,
}

impl Drop for ActiveGenerationGuard<'_> {
    fn drop(&mut self) {
        self.engine.clear_active_generation();
    }
}

fn prepare_prompt(text: &str) -> Result<String, EngineError> {
    let prompt = text.trim();
    if prompt.is_empty() {
        return Err(EngineError::Config("message must not be empty".to_string()));
    }

    Ok(prompt.to_string())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
