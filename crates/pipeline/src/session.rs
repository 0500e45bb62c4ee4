//! Session lifecycle and task topology
//!
//! A [`Session`] owns one call end to end. On connect it spawns three
//! long-lived tasks over bounded channels:
//!
//! - ingest: caller audio through the voice gate into transcription
//! - engine: final transcripts through reply generation and synthesis
//! - outbound: synthesized audio out to the caller's sink
//!
//! plus a reaper that joins them under a deadline once the session
//! starts closing. Lifecycle is `Connecting -> Active -> Closing ->
//! Closed`, broadcast over a watch channel so every task observes
//! transitions without polling. `begin_close` is idempotent; teardown
//! runs exactly once no matter who triggers it.

use callpipe_config::constants::persona;
use callpipe_config::Settings;
use callpipe_core::{
    CallSink, CallSource, ControlSignal, ConversationHistory, Error, Frame, Message, ReplyModel,
    Result, Synthesizer, Transcriber, TurnSequence,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventBus, PipelineEvent};
use crate::interrupt::InterruptionController;
use crate::outbound::{OutboundHandle, OutboundStreamer};
use crate::reply::{ReplyGenerationStage, ReplyOutcome};
use crate::synth::SpeechSynthesisStage;
use crate::transcription::TranscriptionStage;
use crate::vad::VoiceActivityGate;

/// Direction of the call, selecting persona defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    fn default_system_prompt(&self) -> &'static str {
        match self {
            CallDirection::Inbound => persona::INBOUND_SYSTEM_PROMPT,
            CallDirection::Outbound => persona::OUTBOUND_SYSTEM_PROMPT,
        }
    }

    fn default_greeting(&self) -> &'static str {
        match self {
            CallDirection::Inbound => persona::INBOUND_GREETING,
            CallDirection::Outbound => persona::OUTBOUND_GREETING,
        }
    }
}

/// Caller-supplied metadata validated at session open
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub call_id: String,
    pub direction: CallDirection,
    pub caller_id: Option<String>,
    /// Overrides the direction's default persona when set
    pub system_prompt: Option<String>,
    /// Overrides the direction's default greeting when set
    pub greeting: Option<String>,
}

impl SessionMetadata {
    pub fn new(call_id: impl Into<String>, direction: CallDirection) -> Self {
        Self {
            call_id: call_id.into(),
            direction,
            caller_id: None,
            system_prompt: None,
            greeting: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.call_id.trim().is_empty() {
            return Err(Error::MalformedSessionStart(
                "call_id must not be empty".to_string(),
            ));
        }
        if let Some(prompt) = &self.system_prompt {
            if prompt.trim().is_empty() {
                return Err(Error::MalformedSessionStart(
                    "system_prompt override must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or_else(|| self.direction.default_system_prompt())
    }

    fn greeting(&self) -> &str {
        self.greeting
            .as_deref()
            .unwrap_or_else(|| self.direction.default_greeting())
    }
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Stage-task exit predicate. Matching only the teardown states keeps a
/// task spawned during `Connecting` alive through the `Active` transition.
fn teardown_started(state: &LifecycleState) -> bool {
    matches!(*state, LifecycleState::Closing | LifecycleState::Closed)
}

/// The provider set backing one session
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn Transcriber>,
    pub reply_model: Arc<dyn ReplyModel>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Idempotent close trigger shared by every task.
#[derive(Clone)]
struct Closer {
    state_tx: watch::Sender<LifecycleState>,
    closing: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    outbound: OutboundHandle,
    events: EventBus,
}

impl Closer {
    fn begin_close(&self, reason: &str) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(reason, "session closing");
        self.events.emit(PipelineEvent::SessionClosing {
            reason: reason.to_string(),
        });
        let _ = self.state_tx.send(LifecycleState::Closing);
        // Unblock stages parked on providers or the outbound queue
        self.cancel.notify_waiters();
        self.outbound.close();
    }
}

/// One call, from connect to teardown.
pub struct Session {
    id: Uuid,
    meta: SessionMetadata,
    settings: Settings,
    providers: Providers,
    seq: Arc<TurnSequence>,
    history: Arc<Mutex<ConversationHistory>>,
    events: EventBus,
    interrupt: InterruptionController,
    state_tx: watch::Sender<LifecycleState>,
    closer: Mutex<Option<Closer>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Validate metadata and set up session state. No tasks run until
    /// [`on_connected`](Session::on_connected).
    pub fn open(
        meta: SessionMetadata,
        providers: Providers,
        settings: Settings,
    ) -> Result<Session> {
        meta.validate()?;
        settings
            .validate()
            .map_err(|err| Error::MalformedSessionStart(err.to_string()))?;

        let events = EventBus::new(callpipe_config::constants::session::EVENT_CAPACITY);
        let seq = Arc::new(TurnSequence::new());
        let history = Arc::new(Mutex::new(ConversationHistory::new(meta.system_prompt())));
        let interrupt = InterruptionController::new(seq.clone(), events.clone());
        let (state_tx, _) = watch::channel(LifecycleState::Connecting);

        Ok(Session {
            id: Uuid::new_v4(),
            meta,
            settings,
            providers,
            seq,
            history,
            events,
            interrupt,
            state_tx,
            closer: Mutex::new(None),
            reaper: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the conversation so far
    pub fn transcript(&self) -> Vec<Message> {
        self.history.lock().snapshot()
    }

    /// Attach the caller's streams and start the pipeline tasks.
    pub fn on_connected(
        &self,
        source: Box<dyn CallSource>,
        sink: Box<dyn CallSink>,
    ) -> Result<()> {
        if self.state() != LifecycleState::Connecting {
            return Err(Error::MalformedSessionStart(
                "session already connected".to_string(),
            ));
        }

        let pipeline = &self.settings.pipeline;
        let cancel = self.interrupt.cancel_notify();

        let (outbound, streamer) = OutboundStreamer::new(
            pipeline.outbound_queue,
            self.interrupt.pending_out(),
            self.interrupt.min_live_turn_handle(),
            self.events.clone(),
        );
        let closer = Closer {
            state_tx: self.state_tx.clone(),
            closing: Arc::new(AtomicBool::new(false)),
            cancel: cancel.clone(),
            outbound: outbound.clone(),
            events: self.events.clone(),
        };
        *self.closer.lock() = Some(closer.clone());

        // Final transcripts (or utterance-level STT failures) to the engine
        let (transcript_tx, transcript_rx) =
            mpsc::channel::<Frame>(pipeline.bus_capacity);

        // Mark the session active before any stage task can observe state
        let _ = self.state_tx.send(LifecycleState::Active);
        info!(session_id = %self.id, call_id = %self.meta.call_id, "session active");
        self.events.emit(PipelineEvent::SessionStarted {
            session_id: self.id.to_string(),
        });

        let ingest = self.spawn_ingest(source, transcript_tx, closer.clone());
        let engine = self.spawn_engine(transcript_rx, outbound, cancel, closer.clone());
        let writer = {
            let closer = closer.clone();
            tokio::spawn(async move {
                if streamer.run(sink).await.is_err() {
                    closer.begin_close("outbound sink failed");
                }
            })
        };

        // Reaper: once closing starts, give the tasks a bounded window to
        // drain, then reap whatever is left and declare the session closed.
        let deadline = Duration::from_millis(self.settings.session.teardown_deadline_ms);
        let state_tx = self.state_tx.clone();
        let events = self.events.clone();
        let reaper = tokio::spawn(async move {
            let mut state_rx = state_tx.subscribe();
            let _ = state_rx
                .wait_for(|s| *s == LifecycleState::Closing)
                .await;

            let mut tasks = [ingest, engine, writer];
            let drain = async {
                for task in tasks.iter_mut() {
                    let _ = task.await;
                }
            };
            if tokio::time::timeout(deadline, drain).await.is_err() {
                warn!("teardown deadline exceeded, aborting stage tasks");
                for task in &tasks {
                    task.abort();
                }
            }

            let _ = state_tx.send(LifecycleState::Closed);
            events.emit(PipelineEvent::SessionClosed);
        });
        *self.reaper.lock() = Some(reaper);

        Ok(())
    }

    /// Request teardown. Safe to call any number of times from anywhere.
    pub fn begin_close(&self, reason: &str) {
        if let Some(closer) = self.closer.lock().as_ref() {
            closer.begin_close(reason);
        } else {
            // Never connected; close directly
            if self
                .state_tx
                .send_if_modified(|s| {
                    if *s == LifecycleState::Connecting {
                        *s = LifecycleState::Closed;
                        true
                    } else {
                        false
                    }
                })
            {
                self.events.emit(PipelineEvent::SessionClosed);
            }
        }
    }

    /// The caller's transport dropped. Triggers teardown and waits for it.
    pub async fn on_disconnected(&self) {
        self.begin_close("caller disconnected");
        self.closed().await;
    }

    /// Wait for the session to reach `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|s| *s == LifecycleState::Closed).await;
    }

    fn spawn_ingest(
        &self,
        mut source: Box<dyn CallSource>,
        transcript_tx: mpsc::Sender<Frame>,
        closer: Closer,
    ) -> JoinHandle<()> {
        let mut gate = match VoiceActivityGate::new(self.settings.vad.clone()) {
            Ok(gate) => gate,
            Err(err) => {
                warn!(error = %err, "invalid VAD settings");
                closer.begin_close("invalid VAD settings");
                return tokio::spawn(async {});
            }
        };
        let mut stt = TranscriptionStage::new(
            self.providers.transcriber.clone(),
            Duration::from_millis(self.settings.pipeline.transcribe_timeout_ms),
            self.settings.pipeline.bus_capacity,
            self.events.clone(),
        );
        let interrupt = self.interrupt.clone();
        let events = self.events.clone();
        let seq = self.seq.clone();
        let mut state_rx = self.state_tx.subscribe();

        tokio::spawn(async move {
            loop {
                // The select arms stay await-free: the lifecycle watch
                // borrow is not Send and must drop before any await.
                let next = tokio::select! {
                    _ = state_rx.wait_for(teardown_started) => None,
                    next = source.next_chunk() => Some(next),
                };
                let chunk = match next {
                    None => break,
                    Some(Ok(Some(chunk))) => chunk,
                    Some(Ok(None)) => {
                        debug!("caller stream ended");
                        let _ = transcript_tx
                            .send(Frame::Control(ControlSignal::Shutdown))
                            .await;
                        closer.begin_close("caller stream ended");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "caller stream broke");
                        closer.begin_close("caller stream broke");
                        break;
                    }
                };

                for frame in gate.process(chunk) {
                    match frame {
                        Frame::UtteranceStart => {
                            // Barge-in decision happens before any of the
                            // utterance's audio enters transcription
                            interrupt.on_utterance_start();
                            events.emit(PipelineEvent::UtteranceStarted);
                            stt.begin_utterance();
                        }
                        Frame::Audio(chunk) => {
                            stt.push_audio(chunk).await;
                        }
                        Frame::UtteranceEnd => {
                            let frame = match stt.end_utterance().await {
                                Ok(delta) if delta.text.trim().is_empty() => {
                                    debug!("empty transcript, skipping turn");
                                    continue;
                                }
                                Ok(delta) => Frame::Transcript(delta),
                                Err(err) => Frame::Control(ControlSignal::TurnFailed {
                                    turn: seq.current(),
                                    reason: err.to_string(),
                                }),
                            };
                            if transcript_tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                        _ => {}
                    }
                }
            }
            stt.abort();
        })
    }

    fn spawn_engine(
        &self,
        mut transcript_rx: mpsc::Receiver<Frame>,
        outbound: OutboundHandle,
        cancel: Arc<Notify>,
        closer: Closer,
    ) -> JoinHandle<()> {
        let reply_stage = ReplyGenerationStage::new(
            self.providers.reply_model.clone(),
            Duration::from_millis(self.settings.pipeline.reply_timeout_ms),
            self.seq.clone(),
            cancel.clone(),
            self.events.clone(),
        );
        let synth_stage = SpeechSynthesisStage::new(
            self.providers.synthesizer.clone(),
            Duration::from_millis(self.settings.pipeline.synth_timeout_ms),
            self.seq.clone(),
            cancel,
        );

        let seq = self.seq.clone();
        let history = self.history.clone();
        let interrupt = self.interrupt.clone();
        let events = self.events.clone();
        let greeting = self.meta.greeting().to_string();
        let max_failures = self.settings.session.max_consecutive_failures;
        let speak_fallback = self.settings.session.speak_fallback_on_failure;
        let bus_capacity = self.settings.pipeline.bus_capacity;
        let mut state_rx = self.state_tx.subscribe();

        tokio::spawn(async move {
            let mut engine = Engine {
                reply_stage,
                synth_stage,
                outbound,
                seq,
                history,
                interrupt,
                events,
                speak_fallback,
                bus_capacity,
                consecutive_failures: 0,
            };

            // Turn 0: scripted greeting, no transcription or generation.
            // Not part of the conversation history; failure here is not
            // worth ending the call over.
            engine.speak_scripted(&greeting).await;

            loop {
                let next = tokio::select! {
                    _ = state_rx.wait_for(teardown_started) => break,
                    next = transcript_rx.recv() => next,
                };
                let Some(frame) = next else { break };

                match frame {
                    Frame::Transcript(delta) if delta.is_final => {
                        engine.run_turn(delta.text).await;
                    }
                    Frame::Control(ControlSignal::TurnFailed { turn, reason }) => {
                        warn!(turn, reason = %reason, "transcription failed, dropping utterance");
                        engine.consecutive_failures += 1;
                        engine
                            .events
                            .emit(PipelineEvent::TurnFailed { turn, reason });
                    }
                    Frame::Control(ControlSignal::Shutdown) => break,
                    _ => {}
                }

                if engine.consecutive_failures >= max_failures {
                    closer.begin_close("too many consecutive failures");
                    break;
                }
            }
        })
    }
}

/// Per-session turn loop state, owned by the engine task.
struct Engine {
    reply_stage: ReplyGenerationStage,
    synth_stage: SpeechSynthesisStage,
    outbound: OutboundHandle,
    seq: Arc<TurnSequence>,
    history: Arc<Mutex<ConversationHistory>>,
    interrupt: InterruptionController,
    events: EventBus,
    speak_fallback: bool,
    bus_capacity: usize,
    consecutive_failures: u32,
}

impl Engine {
    /// Synthesize a fixed utterance on the current turn, bypassing the
    /// reply model. Used for the greeting and failure fallbacks.
    async fn speak_scripted(&self, text: &str) {
        let token = self.seq.mint();
        self.interrupt.turn_started();
        self.events.emit(PipelineEvent::TurnStarted {
            turn: token.turn(),
        });

        let (cue_tx, cue_rx) = mpsc::channel(2);
        let _ = cue_tx
            .send(Frame::ReplyText {
                token,
                text: text.to_string(),
            })
            .await;
        let _ = cue_tx
            .send(Frame::Control(ControlSignal::EndOfReply))
            .await;
        drop(cue_tx);

        match self
            .synth_stage
            .run_turn(token, cue_rx, self.outbound.clone())
            .await
        {
            Ok(()) => self.events.emit(PipelineEvent::TurnCompleted {
                turn: token.turn(),
            }),
            Err(err) if err.is_cancellation() => {}
            Err(Error::StreamClosed) => {}
            Err(err) => {
                warn!(error = %err, "scripted synthesis failed");
            }
        }
        self.interrupt.turn_resolved();
    }

    /// One full turn: commit the user's words, generate and speak a reply,
    /// commit the reply only if generation completed.
    async fn run_turn(&mut self, user_text: String) {
        self.history.lock().append_user_turn(&user_text);

        self.seq.advance();
        let token = self.seq.mint();
        self.interrupt.turn_started();
        self.events.emit(PipelineEvent::TurnStarted {
            turn: token.turn(),
        });

        let snapshot = self.history.lock().snapshot();
        let (cue_tx, cue_rx) = mpsc::channel(self.bus_capacity);
        let (outcome, synthesis) = tokio::join!(
            self.reply_stage.run_turn(token, snapshot, cue_tx),
            self.synth_stage
                .run_turn(token, cue_rx, self.outbound.clone()),
        );
        self.interrupt.turn_resolved();

        match outcome {
            ReplyOutcome::Completed(reply_text) => {
                // The reply is committed once generation completes, even
                // if playback was then cut short
                self.history.lock().append_assistant_turn(&reply_text);
                match synthesis {
                    Ok(()) => {
                        self.consecutive_failures = 0;
                        self.events.emit(PipelineEvent::TurnCompleted {
                            turn: token.turn(),
                        });
                    }
                    Err(err) if err.is_cancellation() => {}
                    // Outbound queue closed under us: the session is
                    // tearing down, not a provider fault
                    Err(Error::StreamClosed) => {}
                    Err(err) => self.fail_turn(token.turn(), err).await,
                }
            }
            ReplyOutcome::Cancelled => {
                debug!(turn = token.turn(), "turn cancelled by barge-in");
            }
            ReplyOutcome::Failed(err) => {
                self.fail_turn(token.turn(), err).await;
            }
        }
    }

    async fn fail_turn(&mut self, turn: u64, err: Error) {
        self.consecutive_failures += 1;
        self.events.emit(PipelineEvent::TurnFailed {
            turn,
            reason: err.to_string(),
        });
        if self.speak_fallback {
            self.speak_scripted(persona::FAILURE_FALLBACK).await;
        }
    }
}
