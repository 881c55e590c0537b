//! End-to-end gateway scenarios over loopback UDP
//!
//! Each test runs a real receive loop against stub collaborators and
//! drives it with datagrams from plain client sockets. Distinct loopback
//! addresses (127.0.0.x) stand in for distinct remote IPs.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use voice_gateway_codec::{
    decode_packet, encode_packet, AdpcmEncoder, FragmentHeader, PacketType,
};
use voice_gateway_config::Settings;
use voice_gateway_core::{
    Error, LanguageModel, Result as CoreResult, SpeechRecognizer, SpeechSynthesizer, Turn,
};
use voice_gateway_pipeline::{EnergyVadConfig, EnergyVadFactory};
use voice_gateway_server::{run_receive_loop, AppState, GatewayMetrics};

// --- stub collaborators ---

struct StubRecognizer {
    text: &'static str,
}

#[async_trait]
impl SpeechRecognizer for StubRecognizer {
    async fn transcribe(&self, _samples: &[f32], _language_hint: &str) -> CoreResult<String> {
        Ok(self.text.to_string())
    }

    fn model_name(&self) -> &str {
        "stub-asr"
    }
}

struct StubLlm {
    opening: &'static str,
    reply: &'static str,
}

impl StubLlm {
    async fn send_words(text: &str, tokens: mpsc::Sender<String>) -> CoreResult<()> {
        for word in text.split_inclusive(' ') {
            if tokens.send(word.to_string()).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LanguageModel for StubLlm {
    async fn stream_reply(
        &self,
        _history: &[Turn],
        _user_text: &str,
        tokens: mpsc::Sender<String>,
    ) -> CoreResult<()> {
        Self::send_words(self.reply, tokens).await
    }

    async fn opening_statement(&self, tokens: mpsc::Sender<String>) -> CoreResult<()> {
        Self::send_words(self.opening, tokens).await
    }

    fn model_name(&self) -> &str {
        "stub-llm"
    }
}

struct StubTts {
    payload_bytes: usize,
}

#[async_trait]
impl SpeechSynthesizer for StubTts {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> CoreResult<Vec<u8>> {
        if self.payload_bytes == 0 {
            return Err(Error::Tts("stubbed failure".to_string()));
        }
        Ok(vec![0xAA; self.payload_bytes])
    }

    fn model_name(&self) -> &str {
        "stub-tts"
    }
}

// --- harness ---

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    // 3 blocks of trailing silence flush an utterance
    settings.audio.silence_ms_for_flush = 96;
    settings.audio.preroll_blocks = 2;
    settings.transport.fragment_gap_ms = 1;
    settings.server.reap_idle_ms = 300;
    settings
}

async fn start_gateway(
    settings: Settings,
    recognizer_text: &'static str,
    opening: &'static str,
    reply: &'static str,
    tts_bytes: usize,
) -> (Arc<AppState>, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = socket.local_addr().unwrap();

    let settings = Arc::new(settings);
    let state = Arc::new(AppState::new(
        settings.clone(),
        Arc::new(socket),
        Arc::new(StubRecognizer {
            text: recognizer_text,
        }),
        Arc::new(StubLlm { opening, reply }),
        Arc::new(StubTts {
            payload_bytes: tts_bytes,
        }),
        Arc::new(EnergyVadFactory::new(EnergyVadConfig::from(
            &settings.audio,
        ))),
    ));

    tokio::spawn(run_receive_loop(state.clone()));
    (state, server_addr)
}

struct TestClient {
    socket: UdpSocket,
    server: SocketAddr,
    encoder: AdpcmEncoder,
}

impl TestClient {
    async fn bind(ip: &str, server: SocketAddr) -> Self {
        Self {
            socket: UdpSocket::bind((ip, 0)).await.unwrap(),
            server,
            encoder: AdpcmEncoder::new(),
        }
    }

    async fn send_hello(&self) {
        self.socket
            .send_to(&encode_packet(PacketType::ControlHello, &[]), self.server)
            .await
            .unwrap();
    }

    async fn send_reset(&self) {
        self.socket
            .send_to(&encode_packet(PacketType::ControlReset, &[]), self.server)
            .await
            .unwrap();
    }

    /// Loud blocks followed by enough silence to trigger an utterance
    async fn send_speech_burst(&mut self) {
        let loud: Vec<f32> = (0..512)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin())
            .collect();
        let quiet = vec![0.0f32; 512];

        for _ in 0..5 {
            let payload = self.encoder.encode(&loud).unwrap();
            self.socket
                .send_to(
                    &encode_packet(PacketType::CompressionAdpcm, &payload),
                    self.server,
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        // Hangover (4 blocks) + flush threshold (3 blocks) with margin
        for _ in 0..12 {
            let payload = self.encoder.encode(&quiet).unwrap();
            self.socket
                .send_to(
                    &encode_packet(PacketType::CompressionAdpcm, &payload),
                    self.server,
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Receive one TTS fragment, or None on timeout
    async fn recv_fragment(&self, wait: Duration) -> Option<(FragmentHeader, Vec<u8>)> {
        let mut buf = vec![0u8; 2048];
        let (len, _) = timeout(wait, self.socket.recv_from(&mut buf)).await.ok()?.ok()?;

        let (packet_type, payload) = decode_packet(&buf[..len]).ok()?;
        assert_eq!(packet_type, PacketType::CompressionTtsMp3Fragment);
        let (header, mp3) = FragmentHeader::decode(payload).ok()?;
        Some((header, mp3.to_vec()))
    }
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// --- scenarios ---

/// S1: HELLO then audio from rotating source ports yields one logical
/// client, one greeting, and the latest observed port.
#[tokio::test(flavor = "multi_thread")]
async fn greeting_once_under_port_churn() {
    let (state, server) = start_gateway(fast_settings(), "hello", "Welcome aboard.", "ok.", 1000).await;

    let client_ip: IpAddr = "127.0.0.1".parse().unwrap();
    let a = TestClient::bind("127.0.0.1", server).await;
    let b = TestClient::bind("127.0.0.1", server).await;
    let mut c = TestClient::bind("127.0.0.1", server).await;

    a.send_hello().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Audio from two further ports; no new greeting may fire
    let quiet = vec![0.0f32; 512];
    let payload = b.encoder.clone().encode(&quiet).unwrap();
    b.socket
        .send_to(
            &encode_packet(PacketType::CompressionAdpcm, &payload),
            server,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let payload = c.encoder.encode(&quiet).unwrap();
    c.socket
        .send_to(
            &encode_packet(PacketType::CompressionAdpcm, &payload),
            server,
        )
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            state.registry.count() == 1
                && state
                    .registry
                    .get(client_ip)
                    .map(|cl| cl.current_addr().port() == c.socket.local_addr().unwrap().port())
                    .unwrap_or(false)
        })
        .await
    );

    assert_eq!(GatewayMetrics::get(&state.metrics.greetings_sent), 1);
    assert_eq!(GatewayMetrics::get(&state.metrics.clients_created), 1);
    assert_eq!(GatewayMetrics::get(&state.metrics.clients_migrated), 2);
}

/// S2: a recognized utterance comes back as exactly ceil(4100/1371) = 3
/// fragments sharing one session and chunk, indexes 0..3.
#[tokio::test(flavor = "multi_thread")]
async fn utterance_roundtrip_fragments() {
    let (_state, server) = start_gateway(fast_settings(), "hello", "", "hi there.", 4100).await;

    let mut client = TestClient::bind("127.0.0.1", server).await;
    client.send_speech_burst().await;

    let mut fragments = Vec::new();
    while fragments.len() < 3 {
        match client.recv_fragment(Duration::from_secs(5)).await {
            Some(fragment) => fragments.push(fragment),
            None => break,
        }
    }

    assert_eq!(fragments.len(), 3, "expected exactly 3 fragments");

    let session = fragments[0].0.session_id;
    let chunk = fragments[0].0.chunk_index;
    let mut total = 0usize;

    for (i, (header, mp3)) in fragments.iter().enumerate() {
        assert_eq!(header.session_id, session);
        assert_eq!(header.chunk_index, chunk);
        assert_eq!(header.fragment_index, i as u16);
        assert_eq!(header.fragment_count, 3);
        total += mp3.len();
    }
    assert_eq!(total, 4100);

    // No fourth fragment follows
    assert!(client
        .recv_fragment(Duration::from_millis(300))
        .await
        .is_none());
}

/// S3: fresh speech mid-send aborts the in-flight chunk; its remaining
/// fragments never appear, and the next reply uses a higher chunk index.
#[tokio::test(flavor = "multi_thread")]
async fn interruption_aborts_in_flight_chunk() {
    let mut settings = fast_settings();
    // ~30 fragments, 20 ms apart: a ~600 ms window to interrupt
    settings.transport.fragment_gap_ms = 20;
    let (state, server) =
        start_gateway(settings, "hello", "", "stop scammers now.", 40_000).await;

    let mut client = TestClient::bind("127.0.0.1", server).await;
    client.send_speech_burst().await;

    // Wait for the reply to start flowing
    let first = client
        .recv_fragment(Duration::from_secs(5))
        .await
        .expect("first fragment of the reply");
    let aborted_chunk = first.0.chunk_index;
    let total_fragments = first.0.fragment_count as usize;
    assert!(total_fragments >= 20);

    // Barge in while fragments are still pacing out
    client.send_speech_burst().await;

    let mut aborted_count = 1usize;
    let mut new_chunk = None;
    let deadline = Instant::now() + Duration::from_secs(10);

    while Instant::now() < deadline {
        let Some((header, _)) = client.recv_fragment(Duration::from_secs(2)).await else {
            break;
        };
        if header.chunk_index == aborted_chunk {
            assert!(
                new_chunk.is_none(),
                "aborted chunk resumed after the new chunk began"
            );
            aborted_count += 1;
        } else {
            assert!(header.chunk_index > aborted_chunk);
            new_chunk = Some(header.chunk_index);
            if header.fragment_index + 1 == header.fragment_count {
                break;
            }
        }
    }

    assert!(
        aborted_count < total_fragments,
        "interrupted chunk was sent in full ({aborted_count}/{total_fragments})"
    );
    assert!(new_chunk.is_some(), "no reply to the interrupting utterance");
    assert_eq!(GatewayMetrics::get(&state.metrics.interruptions), 1);
}

/// S4: a flood of length-mismatched packets is counted and dropped with
/// no crash and no registry growth.
#[tokio::test(flavor = "multi_thread")]
async fn malformed_flood_is_counted_and_contained() {
    let (state, server) = start_gateway(fast_settings(), "hello", "", "ok.", 1000).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    // Declares 100 payload bytes, carries 3
    let mut bad = vec![PacketType::CompressionAdpcm as u8];
    bad.extend_from_slice(&100u32.to_be_bytes());
    bad.extend_from_slice(&[1, 2, 3]);

    for i in 0..10_000usize {
        socket.send_to(&bad, server).await.unwrap();
        if i % 50 == 49 {
            // Let the receive loop drain so loopback buffers never drop
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            GatewayMetrics::get(&state.metrics.malformed_packets) == 10_000
        })
        .await,
        "malformed counter reached {} of 10000",
        GatewayMetrics::get(&state.metrics.malformed_packets)
    );
    assert_eq!(state.registry.count(), 0);

    // The loop is still alive and serving
    let hello_client = TestClient::bind("127.0.0.1", server).await;
    hello_client.send_hello().await;
    assert!(wait_until(Duration::from_secs(2), || state.registry.count() == 1).await);
}

/// S5: only the idle client is reaped; the active one keeps its
/// dialogue history and welcome flag.
#[tokio::test(flavor = "multi_thread")]
async fn reap_removes_idle_client_only() {
    let (state, server) = start_gateway(fast_settings(), "hello", "", "ok.", 1000).await;

    let idle_ip: IpAddr = "127.0.0.2".parse().unwrap();
    let active_ip: IpAddr = "127.0.0.3".parse().unwrap();

    let idle = TestClient::bind("127.0.0.2", server).await;
    let active = TestClient::bind("127.0.0.3", server).await;

    idle.send_hello().await;
    active.send_hello().await;
    assert!(wait_until(Duration::from_secs(2), || state.registry.count() == 2).await);

    let active_client = state.registry.get(active_ip).unwrap();
    active_client.push_turn(Turn::user("I think this caller is fake"));

    // Let the idle window (300 ms) lapse, keeping the active client warm
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        active.send_hello().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    state.reap_now(Instant::now());

    assert!(state.registry.get(idle_ip).is_none(), "idle client survived");
    let survivor = state.registry.get(active_ip).expect("active client reaped");
    assert!(survivor.is_welcomed());
    assert_eq!(survivor.dialogue_len(), 1);
    assert_eq!(GatewayMetrics::get(&state.metrics.clients_reaped), 1);
}

/// S6: CONTROL_RESET empties the dialogue but keeps the welcome flag, so
/// later audio does not re-greet.
#[tokio::test(flavor = "multi_thread")]
async fn reset_clears_dialogue_without_regreeting() {
    let (state, server) = start_gateway(fast_settings(), "hello", "Welcome.", "ok.", 1000).await;

    let client_ip: IpAddr = "127.0.0.1".parse().unwrap();
    let mut client = TestClient::bind("127.0.0.1", server).await;

    client.send_hello().await;
    assert!(wait_until(Duration::from_secs(2), || {
        state.registry.get(client_ip).is_some()
    })
    .await);

    let handle = state.registry.get(client_ip).unwrap();
    handle.push_turn(Turn::user("hello"));
    handle.push_turn(Turn::assistant("hi"));

    client.send_reset().await;
    assert!(wait_until(Duration::from_secs(2), || handle.dialogue_len() == 0).await);
    assert!(handle.is_welcomed());

    // Subsequent audio is served without a second greeting
    client.send_speech_burst().await;
    assert!(
        wait_until(Duration::from_secs(2), || {
            GatewayMetrics::get(&state.metrics.utterances_detected) >= 1
        })
        .await
    );
    assert_eq!(GatewayMetrics::get(&state.metrics.greetings_sent), 1);
}

/// Unknown packet types are counted separately from malformed ones.
#[tokio::test(flavor = "multi_thread")]
async fn unknown_type_counted_separately() {
    let (state, server) = start_gateway(fast_settings(), "hello", "", "ok.", 1000).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut unknown = vec![99u8];
    unknown.extend_from_slice(&0u32.to_be_bytes());
    socket.send_to(&unknown, server).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            GatewayMetrics::get(&state.metrics.unknown_packets) == 1
        })
        .await
    );
    assert_eq!(GatewayMetrics::get(&state.metrics.malformed_packets), 0);
    assert_eq!(state.registry.count(), 0);
}

/// TTS hard failure falls back to silence-with-logging rather than
/// killing the worker; the session keeps serving.
#[tokio::test(flavor = "multi_thread")]
async fn tts_failure_does_not_kill_session() {
    // payload_bytes == 0 makes the stub synthesizer fail every call
    let (state, server) = start_gateway(fast_settings(), "hello", "", "ok.", 0).await;

    let client_ip: IpAddr = "127.0.0.1".parse().unwrap();
    let mut client = TestClient::bind("127.0.0.1", server).await;
    client.send_speech_burst().await;

    assert!(
        wait_until(Duration::from_secs(3), || {
            GatewayMetrics::get(&state.metrics.utterances_detected) >= 1
        })
        .await
    );

    // No audio could be produced, but the client record is healthy and
    // the dialogue advanced
    let handle = state.registry.get(client_ip).unwrap();
    assert!(wait_until(Duration::from_secs(3), || handle.dialogue_len() >= 1).await);
    assert!(client
        .recv_fragment(Duration::from_millis(300))
        .await
        .is_none());
}
