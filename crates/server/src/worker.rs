//! Per-client pipeline worker
//!
//! Runs the ASR -> LLM -> TTS -> send pipeline for one client, one job at
//! a time. The interruption flag is checked cooperatively at every state
//! transition and before each sentence dispatch; a cancelled reply leaves
//! the client session intact. No error escapes the worker: each one is
//! logged and the worker returns to idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use voice_gateway_codec::fragment_chunk;
use voice_gateway_core::{Error, Turn};
use voice_gateway_pipeline::{SentenceSplitter, SentenceSplitterConfig};

use crate::client::{LogicalClient, SendJob, WorkerJob, WorkerPhase};
use crate::metrics::GatewayMetrics;
use crate::observer::ObserverFrame;
use crate::state::AppState;

/// Worker main loop; lives as long as the client
pub async fn run_worker(state: Arc<AppState>, client: Arc<LogicalClient>) {
    loop {
        let job = client.jobs().take().await;
        client.clear_interrupt();

        let result = match job {
            WorkerJob::Greet => speak_greeting(&state, &client).await,
            WorkerJob::Utterance(samples) => handle_utterance(&state, &client, &samples).await,
        };

        if let Err(e) = result {
            tracing::error!(
                client_ip = %client.ip(),
                error = %e,
                "pipeline job failed",
            );
        }

        client.set_phase(WorkerPhase::Idle);
    }
}

/// Speak the opening statement for a newly welcomed client
async fn speak_greeting(state: &Arc<AppState>, client: &Arc<LogicalClient>) -> Result<(), Error> {
    client.set_phase(WorkerPhase::Generating);

    let (token_tx, token_rx) = mpsc::channel::<String>(32);
    let llm = state.llm.clone();
    let generation = tokio::spawn(async move { llm.opening_statement(token_tx).await });

    let reply = speak_stream(state, client, token_rx).await?;

    if let Ok(Err(e)) = generation.await {
        tracing::warn!(client_ip = %client.ip(), error = %e, "greeting generation failed");
    }

    if !reply.is_empty() {
        client.push_turn(Turn::assistant(reply.clone()));
        state
            .observers
            .publish(ObserverFrame::reply_text(client.ip(), &reply));
    }

    Ok(())
}

/// Full pipeline for one user utterance
async fn handle_utterance(
    state: &Arc<AppState>,
    client: &Arc<LogicalClient>,
    samples: &[f32],
) -> Result<(), Error> {
    client.set_phase(WorkerPhase::Transcribing);

    let text = match state
        .recognizer
        .transcribe(samples, &state.settings.pipeline.language_hint)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            // Transient by policy: stay silent and return to idle
            tracing::warn!(client_ip = %client.ip(), error = %e, "transcription failed");
            return Ok(());
        }
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        tracing::debug!(client_ip = %client.ip(), "empty transcription, nothing to answer");
        return Ok(());
    }

    tracing::info!(client_ip = %client.ip(), text = %text, "utterance transcribed");
    state
        .observers
        .publish(ObserverFrame::utterance(client.ip(), &text));

    // Snapshot before appending so the new text is not doubled in the
    // prompt; the LLM receives it as the separate user message.
    let history = client.dialogue_snapshot();
    client.push_turn(Turn::user(text.clone()));

    client.set_phase(WorkerPhase::Generating);

    let (token_tx, token_rx) = mpsc::channel::<String>(32);
    let llm = state.llm.clone();
    let generation = tokio::spawn(async move {
        llm.stream_reply(&history, &text, token_tx).await
    });

    let reply = speak_stream(state, client, token_rx).await?;

    match generation.await {
        Ok(Err(e)) => {
            tracing::warn!(client_ip = %client.ip(), error = %e, "reply generation failed");
        }
        Err(e) => {
            tracing::error!(client_ip = %client.ip(), error = %e, "generation task panicked");
        }
        Ok(Ok(())) => {}
    }

    if !reply.is_empty() {
        client.push_turn(Turn::assistant(reply.clone()));
        state
            .observers
            .publish(ObserverFrame::reply_text(client.ip(), &reply));
    }

    Ok(())
}

/// Consume reply tokens, dispatching each complete sentence to TTS and
/// the sender. Sentence synthesis overlaps the paced sending of earlier
/// chunks; the worker only settles into `Sending` once all text is
/// dispatched, and stays there until the sender drains.
///
/// Returns the full reply text; an interruption stops the stream early
/// and returns what was spoken so far.
async fn speak_stream(
    state: &Arc<AppState>,
    client: &Arc<LogicalClient>,
    mut tokens: mpsc::Receiver<String>,
) -> Result<String, Error> {
    let mut splitter = SentenceSplitter::new(SentenceSplitterConfig::default());
    let mut spoken = String::new();
    let mut pending_acks = Vec::new();

    while let Some(token) = tokens.recv().await {
        for sentence in splitter.push(&token) {
            match speak_sentence(state, client, &sentence).await? {
                Some(ack) => {
                    pending_acks.push(ack);
                    push_sentence(&mut spoken, &sentence);
                }
                // Dropping the receiver cancels generation upstream
                None => return Ok(spoken),
            }
        }
    }

    if let Some(rest) = splitter.flush() {
        if let Some(ack) = speak_sentence(state, client, &rest).await? {
            pending_acks.push(ack);
            push_sentence(&mut spoken, &rest);
        }
    }

    // Hold the Sending phase until the last fragment is on the wire so
    // speech arriving during the paced send still counts as barge-in
    client.set_phase(WorkerPhase::Sending);
    for ack in pending_acks {
        if ack.await.is_err() {
            if client.is_interrupted() {
                note_reply_aborted(state, client);
            }
            break;
        }
    }

    Ok(spoken)
}

fn push_sentence(spoken: &mut String, sentence: &str) {
    if !spoken.is_empty() {
        spoken.push(' ');
    }
    spoken.push_str(sentence);
}

/// Synthesize and enqueue one sentence as one chunk.
///
/// Returns the sender's completion ack, or `None` when the reply was
/// interrupted and the caller should abandon the rest of the stream.
async fn speak_sentence(
    state: &Arc<AppState>,
    client: &Arc<LogicalClient>,
    text: &str,
) -> Result<Option<oneshot::Receiver<()>>, Error> {
    if client.is_interrupted() {
        note_reply_aborted(state, client);
        return Ok(None);
    }

    client.set_phase(WorkerPhase::Synthesizing);

    let voice = &state.settings.pipeline.tts_voice_id;
    let mp3 = match state.synthesizer.synthesize(text, voice).await {
        Ok(mp3) => mp3,
        Err(e) => {
            tracing::error!(client_ip = %client.ip(), error = %e, "synthesis failed");
            match state
                .canned
                .get_or_synthesize(state.synthesizer.as_ref(), voice)
                .await
            {
                Some(canned) => canned.as_ref().clone(),
                // Synthesizer is down entirely; skip this sentence
                None => {
                    let (done, ack) = oneshot::channel();
                    let _ = done.send(());
                    return Ok(Some(ack));
                }
            }
        }
    };

    if client.is_interrupted() {
        note_reply_aborted(state, client);
        return Ok(None);
    }

    let chunk_index = client.next_chunk_index();
    let datagrams = fragment_chunk(
        client.session_id(),
        chunk_index,
        &mp3,
        state.settings.transport.fragment_max_bytes,
    );

    GatewayMetrics::incr(&state.metrics.chunks_sent);
    tracing::debug!(
        client_ip = %client.ip(),
        chunk_index,
        bytes = mp3.len(),
        fragments = datagrams.len(),
        "chunk queued",
    );

    let (done, ack) = oneshot::channel();
    if client
        .fragment_sender()
        .send(SendJob {
            chunk_index,
            datagrams,
            done,
        })
        .await
        .is_err()
    {
        return Err(Error::ChannelClosed);
    }

    Ok(Some(ack))
}

/// Abort bookkeeping once an interruption took effect: skip a chunk
/// index so late fragments read as stale, and start the cooldown
fn note_reply_aborted(state: &Arc<AppState>, client: &Arc<LogicalClient>) {
    let cooldown = Duration::from_millis(state.settings.pipeline.interrupt_cooldown_ms);
    client.note_interruption(cooldown);
    tracing::info!(client_ip = %client.ip(), "reply aborted by interruption");
}
