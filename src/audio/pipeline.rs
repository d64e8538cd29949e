//! Progressive audio decode pipeline
//!
//! Accumulates audio tokens, groups them into fixed-size chunks, and submits
//! each chunk to a serialized decode queue: one spawned worker consuming a
//! FIFO channel, so at most one decode call is in flight and fragments come
//! back in submission order regardless of individual decode latency.
//!
//! A failed chunk decode permanently disables progressive decoding for the
//! request; end-of-stream finalize then attempts exactly one whole-sequence
//! fallback decode, bounded below by the decodable minimum and above by the
//! lifetime token ceiling.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio::tokens::{TokenScanner, extract_speaker};
use crate::codec;
use crate::collaborators::{AudioBytesFormat, AudioTokenDecoder, DecodedAudio};
use crate::config::BridgeConfig;
use crate::error::Result;

/// Bytes of trailing audio-mode text kept for the speaker heuristic.
const TEXT_TAIL_LIMIT: usize = 2048;

/// Events the pipeline hands back to the transcoder for emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Token counters crossed the progress interval or a chunk finished.
    Progress { received: u64, decoded: u64 },
    /// A decoded fragment re-encoded as a standalone playable WAV unit.
    Fragment { wav_base64: String },
}

struct DecodeJob {
    tokens: Vec<u32>,
    speaker: String,
}

enum DecodeOutcome {
    Decoded { token_count: u64, samples: Vec<i16> },
    Failed { token_count: u64 },
}

pub struct AudioPipeline {
    chunk_tokens: usize,
    max_tokens: usize,
    min_tokens: usize,
    progress_interval: u64,
    max_inline_chars: usize,
    default_speaker: String,
    sample_rate: u32,

    decoder: Arc<dyn AudioTokenDecoder>,
    scanner: TokenScanner,
    buffer: Vec<u32>,
    all_tokens: Vec<u32>,
    text_tail: String,

    received: u64,
    decoded: u64,
    last_progress: u64,

    progressive_failed: bool,
    ceiling_exceeded: bool,
    cumulative: Vec<i16>,
    fragment_count: usize,

    job_tx: Option<mpsc::UnboundedSender<DecodeJob>>,
    result_rx: mpsc::UnboundedReceiver<DecodeOutcome>,
    in_flight: usize,
}

impl AudioPipeline {
    /// Spawns the decode worker; must be called inside a tokio runtime.
    pub fn new(config: &BridgeConfig, decoder: Arc<dyn AudioTokenDecoder>) -> Self {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<DecodeJob>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<DecodeOutcome>();

        let worker_decoder = decoder.clone();
        let sample_rate = config.sample_rate;
        tokio::spawn(async move {
            let mut failed = false;
            while let Some(job) = job_rx.recv().await {
                let token_count = job.tokens.len() as u64;
                let outcome = if failed {
                    // A prior chunk failed; drain the queue without calling
                    // the decoder again.
                    DecodeOutcome::Failed { token_count }
                } else {
                    match decode_to_samples(
                        worker_decoder.as_ref(),
                        &job.tokens,
                        &job.speaker,
                        sample_rate,
                    )
                    .await
                    {
                        Ok(samples) => DecodeOutcome::Decoded {
                            token_count,
                            samples,
                        },
                        Err(e) => {
                            warn!(error = %e, tokens = token_count, "chunk decode failed");
                            failed = true;
                            DecodeOutcome::Failed { token_count }
                        }
                    }
                };
                if result_tx.send(outcome).is_err() {
                    return;
                }
            }
        });

        Self {
            chunk_tokens: config.audio_chunk_tokens,
            max_tokens: config.max_audio_tokens,
            min_tokens: config.min_decode_tokens,
            progress_interval: config.progress_interval,
            max_inline_chars: config.max_inline_audio_chars,
            default_speaker: config.default_speaker.clone(),
            sample_rate,
            decoder,
            scanner: TokenScanner::new(),
            buffer: Vec::new(),
            all_tokens: Vec::new(),
            text_tail: String::new(),
            received: 0,
            decoded: 0,
            last_progress: 0,
            progressive_failed: false,
            ceiling_exceeded: false,
            cumulative: Vec::new(),
            fragment_count: 0,
            job_tx: Some(job_tx),
            result_rx,
            in_flight: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    pub fn has_tokens(&self) -> bool {
        !self.all_tokens.is_empty()
    }

    /// Feed one audio-mode content delta: extract tokens and enqueue them.
    pub fn feed_text(&mut self, text: &str) -> Vec<PipelineEvent> {
        self.push_text_tail(text);
        let tokens = self.scanner.feed(text);
        self.enqueue(&tokens)
    }

    /// Append tokens to the lifetime list and the chunk buffer, submitting
    /// full chunks to the decode queue.
    pub fn enqueue(&mut self, tokens: &[u32]) -> Vec<PipelineEvent> {
        let mut events = self.poll();
        if tokens.is_empty() {
            return events;
        }

        self.received += tokens.len() as u64;
        self.all_tokens.extend_from_slice(tokens);

        if self.all_tokens.len() > self.max_tokens {
            if !self.ceiling_exceeded {
                warn!(
                    received = self.all_tokens.len(),
                    ceiling = self.max_tokens,
                    "audio token ceiling exceeded, rejecting audio for this request"
                );
                self.ceiling_exceeded = true;
                self.buffer.clear();
            }
            return events;
        }

        self.buffer.extend_from_slice(tokens);
        while self.buffer.len() >= self.chunk_tokens {
            let chunk: Vec<u32> = self.buffer.drain(..self.chunk_tokens).collect();
            self.submit(chunk);
        }

        if self.received - self.last_progress >= self.progress_interval {
            self.last_progress = self.received;
            events.push(PipelineEvent::Progress {
                received: self.received,
                decoded: self.decoded,
            });
        }
        events
    }

    /// Collect any decode results that completed since the last call.
    pub fn poll(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(outcome) = self.result_rx.try_recv() {
            self.handle_outcome(outcome, &mut events);
        }
        events
    }

    /// End of stream: flush the remaining buffered tokens through one last
    /// decode, await queue drain, and produce the final audio payload.
    ///
    /// Returns the remaining pipeline events plus the finalized WAV bytes,
    /// `None` when the request ends without audio.
    pub async fn finalize(&mut self) -> (Vec<PipelineEvent>, Option<Vec<u8>>) {
        let mut events = Vec::new();

        let leftover = self.scanner.flush();
        if !leftover.is_empty() {
            events.extend(self.enqueue(&leftover));
        }

        // Final sub-chunk decode; fewer tokens than the decodable minimum are
        // silently dropped.
        if !self.ceiling_exceeded && !self.progressive_failed && self.buffer.len() >= self.min_tokens
        {
            let chunk: Vec<u32> = self.buffer.drain(..).collect();
            self.submit(chunk);
        }
        self.buffer.clear();

        // Close the queue and drain it in submission order.
        self.job_tx = None;
        while self.in_flight > 0 {
            match self.result_rx.recv().await {
                Some(outcome) => self.handle_outcome(outcome, &mut events),
                None => break,
            }
        }

        let final_audio = self.final_audio().await;
        (events, final_audio)
    }

    async fn final_audio(&mut self) -> Option<Vec<u8>> {
        if !self.progressive_failed && self.fragment_count > 0 {
            // Progressive decoding worked; re-encode the cumulative raw
            // sample buffer once.
            return match codec::encode_wav(&self.cumulative, self.sample_rate) {
                Ok(wav) => Some(wav),
                Err(e) => {
                    warn!(error = %e, "final audio encode failed");
                    None
                }
            };
        }

        let total = self.all_tokens.len();
        if total < self.min_tokens || total > self.max_tokens {
            return None;
        }

        // One whole-sequence fallback decode. Losing audio here is a
        // partial-success outcome, not a request failure.
        let speaker = self.speaker();
        match decode_to_samples(
            self.decoder.as_ref(),
            &self.all_tokens,
            &speaker,
            self.sample_rate,
        )
        .await
        {
            Ok(samples) => {
                self.decoded = self.received;
                match codec::encode_wav(&samples, self.sample_rate) {
                    Ok(wav) => Some(wav),
                    Err(e) => {
                        warn!(error = %e, "fallback audio encode failed");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, tokens = total, "fallback decode failed, completing without audio");
                None
            }
        }
    }

    fn handle_outcome(&mut self, outcome: DecodeOutcome, events: &mut Vec<PipelineEvent>) {
        self.in_flight -= 1;
        match outcome {
            DecodeOutcome::Decoded {
                token_count,
                samples,
            } => {
                self.decoded += token_count;
                self.fragment_count += 1;
                self.cumulative.extend_from_slice(&samples);
                match codec::encode_wav(&samples, self.sample_rate) {
                    Ok(wav) => {
                        let encoded = BASE64.encode(&wav);
                        if encoded.len() <= self.max_inline_chars {
                            events.push(PipelineEvent::Fragment {
                                wav_base64: encoded,
                            });
                        } else {
                            debug!(
                                size = encoded.len(),
                                "fragment exceeds inline ceiling, suppressing emission"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "fragment encode failed"),
                }
            }
            DecodeOutcome::Failed { token_count } => {
                self.decoded += token_count;
                if !self.progressive_failed {
                    self.progressive_failed = true;
                }
            }
        }
        events.push(PipelineEvent::Progress {
            received: self.received,
            decoded: self.decoded,
        });
    }

    fn submit(&mut self, tokens: Vec<u32>) {
        if self.progressive_failed {
            return;
        }
        let job = DecodeJob {
            speaker: self.speaker(),
            tokens,
        };
        if let Some(tx) = &self.job_tx
            && tx.send(job).is_ok()
        {
            self.in_flight += 1;
        }
    }

    fn speaker(&self) -> String {
        extract_speaker(&self.text_tail).unwrap_or_else(|| self.default_speaker.clone())
    }

    fn push_text_tail(&mut self, text: &str) {
        self.text_tail.push_str(text);
        if self.text_tail.len() > TEXT_TAIL_LIMIT {
            let cut = self.text_tail.len() - TEXT_TAIL_LIMIT;
            let cut = (cut..self.text_tail.len())
                .find(|&i| self.text_tail.is_char_boundary(i))
                .unwrap_or(0);
            self.text_tail.drain(..cut);
        }
    }
}

async fn decode_to_samples(
    decoder: &dyn AudioTokenDecoder,
    tokens: &[u32],
    speaker: &str,
    sample_rate: u32,
) -> Result<Vec<i16>> {
    let DecodedAudio { bytes, format } = decoder.decode(tokens, speaker, sample_rate).await?;
    match format {
        AudioBytesFormat::Pcm16 => Ok(codec::pcm16_from_le_bytes(&bytes)),
        AudioBytesFormat::Wav => {
            let (samples, _) = codec::decode_wav(&bytes)?;
            Ok(samples)
        }
    }
}
