//! Logical client state
//!
//! The durable server-side identity of one caller, keyed by remote IP.
//! The port is mutable metadata: NATs rotate source ports per datagram on
//! some stacks, and a rotated port must not restart the dialogue.
//!
//! Locking discipline: every field has its own short-lived lock or
//! atomic; none is ever held across an await point. The receive loop owns
//! the decoder, VAD, and trigger buffer (it is the only caller); the
//! worker owns the dialogue mutations for its own client.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use voice_gateway_codec::{AdpcmDecoder, AdpcmEncoder, CodecError};
use voice_gateway_core::{DialogueHistory, SessionId, Turn, VadFactory, VoiceDetector};
use voice_gateway_core::audio::BLOCK_SAMPLES;
use voice_gateway_pipeline::{TriggerBuffer, TriggerConfig};

/// Work handed to the pipeline worker through the single-slot channel
#[derive(Clone)]
pub enum WorkerJob {
    /// Speak the opening statement to a newly welcomed client
    Greet,
    /// Transcribe and answer one complete utterance
    Utterance(Arc<Vec<f32>>),
}

/// Pipeline worker state machine positions
///
/// The numeric order matters: the receive loop raises the interruption
/// flag only when the worker is past `Generating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum WorkerPhase {
    Idle = 0,
    Transcribing = 1,
    Generating = 2,
    Synthesizing = 3,
    Sending = 4,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerPhase::Transcribing,
            2 => WorkerPhase::Generating,
            3 => WorkerPhase::Synthesizing,
            4 => WorkerPhase::Sending,
            _ => WorkerPhase::Idle,
        }
    }
}

/// One chunk's worth of ready-to-send fragment datagrams
///
/// `done` resolves when the last fragment went out; it is dropped
/// unresolved when the chunk is aborted or flushed, which is how the
/// worker learns its reply was cut off.
pub struct SendJob {
    pub chunk_index: u32,
    pub datagrams: Vec<Bytes>,
    pub done: tokio::sync::oneshot::Sender<()>,
}

/// Single-slot job channel with overwrite semantics
///
/// Audio is realtime: a stale utterance has no value, so offering a new
/// job while one is queued replaces it instead of queueing behind it.
pub struct JobSlot {
    slot: Mutex<Option<WorkerJob>>,
    notify: Notify,
}

impl JobSlot {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Offer a job; returns true when an unclaimed job was superseded
    pub fn offer(&self, job: WorkerJob) -> bool {
        let superseded = self.slot.lock().replace(job).is_some();
        self.notify.notify_one();
        superseded
    }

    /// Wait for and claim the next job
    pub async fn take(&self) -> WorkerJob {
        loop {
            if let Some(job) = self.slot.lock().take() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    /// Drop any unclaimed job
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

/// Everything a new client needs that is not derivable from its address
pub struct ClientBuilder {
    pub vad_factory: Arc<dyn VadFactory>,
    pub trigger_config: TriggerConfig,
    pub dialogue_limit: usize,
    pub fragment_queue_depth: usize,
}

/// The durable per-caller state, keyed by IP in the registry
pub struct LogicalClient {
    ip: IpAddr,
    session_id: SessionId,
    current_addr: Mutex<SocketAddr>,
    welcomed: AtomicBool,
    last_activity: Mutex<Instant>,
    chunk_counter: AtomicU32,
    phase: AtomicU8,
    interrupted: AtomicBool,
    interrupt_cooldown_until: Mutex<Instant>,
    dialogue: Mutex<DialogueHistory>,
    decoder: Mutex<AdpcmDecoder>,
    encoder: Mutex<AdpcmEncoder>,
    vad: Mutex<Box<dyn VoiceDetector>>,
    trigger: Mutex<TriggerBuffer>,
    jobs: JobSlot,
    frag_tx: mpsc::Sender<SendJob>,
    frag_rx: Mutex<Option<mpsc::Receiver<SendJob>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LogicalClient {
    pub fn new(addr: SocketAddr, builder: &ClientBuilder) -> Arc<Self> {
        let (frag_tx, frag_rx) = mpsc::channel(builder.fragment_queue_depth);
        let now = Instant::now();

        Arc::new(Self {
            ip: addr.ip(),
            session_id: SessionId::generate(),
            current_addr: Mutex::new(addr),
            welcomed: AtomicBool::new(false),
            last_activity: Mutex::new(now),
            chunk_counter: AtomicU32::new(0),
            phase: AtomicU8::new(WorkerPhase::Idle as u8),
            interrupted: AtomicBool::new(false),
            interrupt_cooldown_until: Mutex::new(now),
            dialogue: Mutex::new(DialogueHistory::new(builder.dialogue_limit)),
            decoder: Mutex::new(AdpcmDecoder::new()),
            encoder: Mutex::new(AdpcmEncoder::new()),
            vad: Mutex::new(builder.vad_factory.create()),
            trigger: Mutex::new(TriggerBuffer::new(builder.trigger_config.clone())),
            jobs: JobSlot::new(),
            frag_tx,
            frag_rx: Mutex::new(Some(frag_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    // --- address & activity ---

    pub fn current_addr(&self) -> SocketAddr {
        *self.current_addr.lock()
    }

    /// Adopt a new source port; returns the old port when it changed.
    /// Everything else about the client is untouched.
    pub fn migrate(&self, addr: SocketAddr) -> Option<u16> {
        let mut current = self.current_addr.lock();
        if current.port() == addr.port() {
            return None;
        }
        let old_port = current.port();
        *current = addr;
        Some(old_port)
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_activity.lock())
    }

    #[cfg(test)]
    pub(crate) fn touch_at(&self, now: Instant) {
        *self.last_activity.lock() = now;
    }

    // --- greeting ---

    /// Flip the welcome flag; true exactly once per client lifetime
    pub fn mark_welcomed(&self) -> bool {
        !self.welcomed.swap(true, Ordering::SeqCst)
    }

    pub fn is_welcomed(&self) -> bool {
        self.welcomed.load(Ordering::SeqCst)
    }

    // --- chunk sequencing & interruption ---

    pub fn next_chunk_index(&self) -> u32 {
        self.chunk_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_chunk_index(&self) -> u32 {
        self.chunk_counter.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Whether an interruption is allowed at `now` (cooldown debounce)
    pub fn can_interrupt(&self, now: Instant) -> bool {
        now >= *self.interrupt_cooldown_until.lock()
    }

    pub fn raise_interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    /// Worker-side bookkeeping once an interruption took effect: skip an
    /// index so late fragments of the aborted chunk read as stale, and
    /// debounce further interruptions.
    pub fn note_interruption(&self, cooldown: Duration) {
        self.chunk_counter.fetch_add(1, Ordering::SeqCst);
        *self.interrupt_cooldown_until.lock() = Instant::now() + cooldown;
    }

    // --- audio path (receive loop only) ---

    /// Decode one ADPCM payload with the persistent inbound state
    pub fn decode_audio(&self, payload: &[u8]) -> Result<Vec<f32>, CodecError> {
        self.decoder.lock().decode(payload)
    }

    /// Outbound-direction codec state. The MP3 reply path does not use
    /// it, but it shares the client's lifetime exactly so a compressed
    /// PCM downlink can be added without a registry change.
    pub fn encode_outbound(&self, samples: &[f32]) -> Result<Vec<u8>, CodecError> {
        self.encoder.lock().encode(samples)
    }

    /// Run VAD + trigger framing over decoded samples.
    ///
    /// Returns at most one flushed utterance per call; samples past a
    /// flush keep accumulating toward the next one. A trailing partial
    /// block is dropped, the wire contract frames audio in 512-sample
    /// blocks.
    pub fn feed_samples(&self, samples: &[f32]) -> Option<Vec<f32>> {
        let mut vad = self.vad.lock();
        let mut trigger = self.trigger.lock();

        let mut utterance = None;
        for block in samples.chunks_exact(BLOCK_SAMPLES) {
            let is_speech = vad.is_speech(block);
            if let Some(flushed) = trigger.push(block, is_speech) {
                utterance = Some(flushed);
            }
        }
        utterance
    }

    // --- dialogue ---

    pub fn dialogue_snapshot(&self) -> Vec<Turn> {
        self.dialogue.lock().snapshot()
    }

    pub fn push_turn(&self, turn: Turn) {
        self.dialogue.lock().push(turn);
    }

    pub fn dialogue_len(&self) -> usize {
        self.dialogue.lock().len()
    }

    /// Session soft reset: drop dialogue and framing state, keep the
    /// decoder state and the welcome flag so the stream stays decodable
    /// and no second greeting fires.
    pub fn reset_session(&self) {
        self.dialogue.lock().clear();
        self.trigger.lock().reset();
        self.vad.lock().reset();
        self.jobs.clear();
    }

    // --- worker plumbing ---

    pub fn jobs(&self) -> &JobSlot {
        &self.jobs
    }

    pub fn fragment_sender(&self) -> mpsc::Sender<SendJob> {
        self.frag_tx.clone()
    }

    /// Claim the fragment queue receiver (sender task startup, once)
    pub fn take_fragment_receiver(&self) -> Option<mpsc::Receiver<SendJob>> {
        self.frag_rx.lock().take()
    }

    pub fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Abort the worker and sender; called by the reaper
    pub fn abort_tasks(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for LogicalClient {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_gateway_pipeline::{EnergyVadConfig, EnergyVadFactory};

    fn builder() -> ClientBuilder {
        ClientBuilder {
            vad_factory: Arc::new(EnergyVadFactory::new(EnergyVadConfig::default())),
            trigger_config: TriggerConfig {
                silence_blocks_for_flush: 2,
                max_utterance_blocks: 100,
                preroll_blocks: 0,
            },
            dialogue_limit: 4,
            fragment_queue_depth: 8,
        }
    }

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.5:{port}").parse().unwrap()
    }

    #[test]
    fn test_migration_updates_port_only() {
        let client = LogicalClient::new(addr(40001), &builder());
        let session = client.session_id();
        client.push_turn(Turn::user("hello"));

        assert_eq!(client.migrate(addr(40002)), Some(40001));
        assert_eq!(client.current_addr().port(), 40002);
        assert_eq!(client.session_id(), session);
        assert_eq!(client.dialogue_len(), 1);

        // Same port is not a migration
        assert_eq!(client.migrate(addr(40002)), None);
    }

    #[test]
    fn test_welcomed_flips_once() {
        let client = LogicalClient::new(addr(40001), &builder());
        assert!(client.mark_welcomed());
        assert!(!client.mark_welcomed());
        assert!(client.is_welcomed());
    }

    #[test]
    fn test_chunk_counter_monotonic() {
        let client = LogicalClient::new(addr(40001), &builder());
        assert_eq!(client.next_chunk_index(), 0);
        assert_eq!(client.next_chunk_index(), 1);

        client.note_interruption(Duration::from_millis(500));
        // The aborted epoch's index is skipped
        assert_eq!(client.next_chunk_index(), 3);
    }

    #[test]
    fn test_interrupt_cooldown_gates() {
        let client = LogicalClient::new(addr(40001), &builder());
        let now = Instant::now();

        assert!(client.can_interrupt(now));
        client.note_interruption(Duration::from_millis(500));
        assert!(!client.can_interrupt(Instant::now()));
        assert!(client.can_interrupt(Instant::now() + Duration::from_secs(1)));
    }

    #[test]
    fn test_reset_session_keeps_decoder_and_welcome() {
        let client = LogicalClient::new(addr(40001), &builder());
        client.mark_welcomed();
        client.push_turn(Turn::user("hello"));

        let tone: Vec<f32> = (0..1024)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin())
            .collect();
        let mut encoder = AdpcmEncoder::new();
        let block1 = encoder.encode(&tone[..512]).unwrap();
        let block2 = encoder.encode(&tone[512..]).unwrap();

        client.decode_audio(&block1).unwrap();
        client.reset_session();

        assert_eq!(client.dialogue_len(), 0);
        assert!(client.is_welcomed());

        // Decoder state survived the reset: the second block decodes as a
        // continuation, matching a control decoder that saw both blocks
        let mut control = AdpcmDecoder::new();
        control.decode(&block1).unwrap();
        let expected = control.decode(&block2).unwrap();

        assert_eq!(client.decode_audio(&block2).unwrap(), expected);
    }

    #[test]
    fn test_feed_samples_triggers_on_silence() {
        let client = LogicalClient::new(addr(40001), &builder());

        let loud: Vec<f32> = (0..BLOCK_SAMPLES)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin())
            .collect();
        let quiet = vec![0.0f32; BLOCK_SAMPLES * 3];

        assert!(client.feed_samples(&loud).is_none());
        // Hangover keeps some silent blocks "speech"; send enough to flush
        let mut utterance = None;
        for _ in 0..4 {
            if let Some(u) = client.feed_samples(&quiet) {
                utterance = Some(u);
                break;
            }
        }
        assert!(utterance.is_some());
    }

    #[tokio::test]
    async fn test_job_slot_supersedes() {
        let slot = JobSlot::new();

        assert!(!slot.offer(WorkerJob::Utterance(Arc::new(vec![1.0]))));
        assert!(slot.offer(WorkerJob::Utterance(Arc::new(vec![2.0]))));

        match slot.take().await {
            WorkerJob::Utterance(samples) => assert_eq!(*samples, vec![2.0]),
            WorkerJob::Greet => panic!("expected the superseding utterance"),
        }
    }

    #[tokio::test]
    async fn test_job_slot_wakes_waiter() {
        let slot = Arc::new(JobSlot::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.take().await })
        };

        tokio::task::yield_now().await;
        slot.offer(WorkerJob::Greet);

        assert!(matches!(waiter.await.unwrap(), WorkerJob::Greet));
    }

    #[test]
    fn test_outbound_encoder_state_persists() {
        let client = LogicalClient::new(addr(40001), &builder());
        let tone: Vec<f32> = (0..512).map(|i| (i as f32 / 512.0).sin()).collect();

        let first = client.encode_outbound(&tone).unwrap();
        let second = client.encode_outbound(&tone).unwrap();
        assert_ne!(first, second);
    }
}
