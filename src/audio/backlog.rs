//! # Fragment Backlog
//!
//! Queue between a connection and its session loop. Decoding can fall behind
//! arrival, so what waits here is bounded twice:
//!
//! - **Audio**: a fragment that would push the queued audio past the bound is
//!   refused on the spot. An empty backlog always admits one fragment, however
//!   long, so an oversized fragment still reaches the buffer and its overrun
//!   handling.
//! - **Messages**: at most `max_messages` entries, whatever their duration, so
//!   a flood of malformed messages is bounded too.
//!
//! The sender side belongs to the connection, the receiver side to the session
//! loop. Queued audio is tracked in an atomic shared by the two halves.

use crate::audio::session::Inbound;
use crate::audio::wav;
use crate::error::FragmentError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Message cap used by the WebSocket transport.
pub const DEFAULT_MAX_MESSAGES: usize = 64;

/// Create a backlog bounded to `max_secs` of queued audio and `max_messages` entries.
pub fn fragment_backlog(max_secs: f64, max_messages: usize) -> (BacklogSender, BacklogReceiver) {
    let (tx, rx) = mpsc::channel(max_messages.max(1));
    let queued_micros = Arc::new(AtomicU64::new(0));

    let sender = BacklogSender {
        tx,
        queued_micros: Arc::clone(&queued_micros),
        max_micros: to_micros(max_secs),
    };
    let receiver = BacklogReceiver { rx, queued_micros };
    (sender, receiver)
}

struct Queued {
    inbound: Inbound,
    micros: u64,
}

/// Why a message was not queued. The message is handed back.
#[derive(Debug)]
pub enum PushError {
    /// Too much audio or too many messages already waiting.
    Full { inbound: Inbound, queued_ms: u64, max_ms: u64 },
    /// The session loop is gone.
    Closed(Inbound),
}

impl PushError {
    /// The error to report to the client, if this refusal should be reported at all.
    pub fn to_fragment_error(&self) -> Option<FragmentError> {
        match self {
            PushError::Full {
                queued_ms, max_ms, ..
            } => Some(FragmentError::Backlogged {
                queued_ms: *queued_ms,
                max_ms: *max_ms,
            }),
            PushError::Closed(_) => None,
        }
    }

    pub fn inbound(&self) -> &Inbound {
        match self {
            PushError::Full { inbound, .. } | PushError::Closed(inbound) => inbound,
        }
    }
}

pub struct BacklogSender {
    tx: mpsc::Sender<Queued>,
    queued_micros: Arc<AtomicU64>,
    max_micros: u64,
}

impl BacklogSender {
    /// Queue a message without waiting.
    pub fn try_push(&self, inbound: Inbound) -> Result<(), PushError> {
        let micros = audio_micros(&inbound);
        let queued = self.queued_micros.load(Ordering::Acquire);

        if queued > 0 && queued.saturating_add(micros) > self.max_micros {
            return Err(self.full(inbound, queued));
        }

        self.queued_micros.fetch_add(micros, Ordering::AcqRel);
        match self.tx.try_send(Queued { inbound, micros }) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.queued_micros.fetch_sub(micros, Ordering::AcqRel);
                match err {
                    TrySendError::Full(queued_msg) => Err(self.full(queued_msg.inbound, queued)),
                    TrySendError::Closed(queued_msg) => Err(PushError::Closed(queued_msg.inbound)),
                }
            }
        }
    }

    /// Audio currently waiting, in seconds.
    pub fn queued_seconds(&self) -> f64 {
        self.queued_micros.load(Ordering::Acquire) as f64 / 1_000_000.0
    }

    fn full(&self, inbound: Inbound, queued: u64) -> PushError {
        PushError::Full {
            inbound,
            queued_ms: queued / 1000,
            max_ms: self.max_micros / 1000,
        }
    }
}

pub struct BacklogReceiver {
    rx: mpsc::Receiver<Queued>,
    queued_micros: Arc<AtomicU64>,
}

impl BacklogReceiver {
    /// Next message, or `None` once the sender is dropped and the backlog is drained.
    pub async fn recv(&mut self) -> Option<Inbound> {
        let Queued { inbound, micros } = self.rx.recv().await?;
        self.queued_micros.fetch_sub(micros, Ordering::AcqRel);
        Some(inbound)
    }
}

/// Duration of a fragment as declared by its header; 0 for anything that will
/// not get past validation anyway.
fn audio_micros(inbound: &Inbound) -> u64 {
    match inbound {
        Inbound::Fragment(fragment) => wav::validate(&fragment.bytes)
            .map(|frame| to_micros(frame.duration_seconds()))
            .unwrap_or(0),
        Inbound::Malformed { .. } => 0,
    }
}

fn to_micros(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1_000_000.0) as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::DecodeWindow;
    use crate::audio::session::{
        run_session, AudioFragment, FragmentTransport, OutboundResult, SessionController,
    };
    use crate::audio::wav::encode_fragment;
    use crate::error::DecoderError;
    use crate::transcription::{Hypothesis, IncrementalTranscriber, SpeechDecoder};
    use async_trait::async_trait;
    use std::time::Duration;

    const RATE: u32 = 16000;

    fn fragment(id: &str, samples: usize) -> Inbound {
        Inbound::Fragment(AudioFragment::new(
            id,
            encode_fragment(RATE, 16, &vec![0u8; samples * 2]),
        ))
    }

    #[tokio::test]
    async fn test_audio_past_bound_is_refused() {
        let (tx, mut rx) = fragment_backlog(0.5, DEFAULT_MAX_MESSAGES);

        for i in 0..5 {
            assert!(tx.try_push(fragment(&i.to_string(), 1600)).is_ok());
        }
        assert_eq!(tx.queued_seconds(), 0.5);

        match tx.try_push(fragment("late", 1600)) {
            Err(err @ PushError::Full { .. }) => {
                assert_eq!(err.inbound().fragment_id(), Some("late"));
                assert_eq!(
                    err.to_fragment_error(),
                    Some(FragmentError::Backlogged {
                        queued_ms: 500,
                        max_ms: 500
                    })
                );
            }
            other => panic!("expected a full backlog, got {:?}", other),
        }

        // Draining one fragment makes room for another
        let first = rx.recv().await.unwrap();
        assert_eq!(first.fragment_id(), Some("0"));
        assert!(tx.try_push(fragment("retry", 1600)).is_ok());
        assert_eq!(tx.queued_seconds(), 0.5);
    }

    #[tokio::test]
    async fn test_empty_backlog_admits_oversized_fragment() {
        let (tx, _rx) = fragment_backlog(0.5, DEFAULT_MAX_MESSAGES);

        assert!(tx.try_push(fragment("long", 32000)).is_ok());
        assert_eq!(tx.queued_seconds(), 2.0);
        assert!(matches!(
            tx.try_push(fragment("next", 160)),
            Err(PushError::Full { .. })
        ));
    }

    #[tokio::test]
    async fn test_message_count_is_bounded() {
        let (tx, _rx) = fragment_backlog(0.5, 2);
        let malformed = || Inbound::Malformed {
            fragment_id: Some("m".to_string()),
            reason: "invalid message".to_string(),
        };

        assert!(tx.try_push(malformed()).is_ok());
        assert!(tx.try_push(malformed()).is_ok());
        assert!(matches!(tx.try_push(malformed()), Err(PushError::Full { .. })));
        assert_eq!(tx.queued_seconds(), 0.0);
    }

    #[tokio::test]
    async fn test_closed_session_is_not_reported_to_client() {
        let (tx, rx) = fragment_backlog(0.5, 4);
        drop(rx);

        let err = tx.try_push(fragment("gone", 160)).unwrap_err();
        assert!(matches!(err, PushError::Closed(_)));
        assert!(err.to_fragment_error().is_none());
        assert_eq!(tx.queued_seconds(), 0.0);
    }

    /// Takes longer per pass than the fragments take to arrive.
    struct SlowDecoder;

    impl SpeechDecoder for SlowDecoder {
        fn name(&self) -> &str {
            "slow"
        }

        fn decode(&mut self, _window: &DecodeWindow<'_>) -> Result<Hypothesis, DecoderError> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(Hypothesis::default())
        }
    }

    struct BacklogTransport {
        backlog: BacklogReceiver,
        sent: Vec<OutboundResult>,
    }

    #[async_trait]
    impl FragmentTransport for BacklogTransport {
        async fn next_fragment(&mut self) -> Option<Inbound> {
            self.backlog.recv().await
        }

        fn send_result(&mut self, result: OutboundResult) {
            self.sent.push(result);
        }

        fn terminate(&mut self, _reason: &str) {}
    }

    #[tokio::test]
    async fn test_slow_session_keeps_queued_audio_bounded() {
        let (tx, rx) = fragment_backlog(0.5, DEFAULT_MAX_MESSAGES);
        let controller =
            SessionController::new("slow", IncrementalTranscriber::new(Box::new(SlowDecoder)));

        let session = tokio::spawn(async move {
            let mut transport = BacklogTransport {
                backlog: rx,
                sent: Vec::new(),
            };
            let counters = run_session(controller, &mut transport).await;
            (counters, transport.sent.len())
        });

        let mut refused = 0;
        for i in 0..50 {
            if let Err(err) = tx.try_push(fragment(&i.to_string(), 1600)) {
                assert!(err.to_fragment_error().is_some());
                refused += 1;
            }
            assert!(tx.queued_seconds() <= 0.5);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        drop(tx);

        let (counters, answered) = session.await.unwrap();
        assert!(refused > 0);
        assert_eq!(counters.accepted as usize, 50 - refused);
        assert_eq!(answered, 50 - refused);
    }
}
