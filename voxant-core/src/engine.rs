//! Three-tier reply pipeline: quick template, cached reply, streaming LLM
//! with overlapped speech synthesis.
//!
//! The LLM tier streams tokens under a state-dependent deadline; when the
//! first sentence boundary appears, a child TTS task starts synthesizing it
//! while the rest of the stream arrives. The parent awaits the child, speaks
//! the remainder, and concatenates audio in order. A timeout with a partial
//! stream keeps the prefix; the prospect never hears an error.

use crate::breaker::CircuitBreaker;
use crate::cache::response::ResponseCache;
use crate::error::TtsError;
use crate::intents::{IntentFlags, ObjectionKind};
use crate::latency::{marks, LatencyTracker};
use crate::llm::{FirstSentenceHook, LlmProvider};
use crate::prompt::{LeadContext, PromptBuilder};
use crate::quality::{QualityScorer, ReplySource};
use crate::quick;
use crate::states::{ConversationState, SalesState};
use crate::tts::TtsEngine;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Soft ceiling on spoken reply length (~12 seconds of speech).
pub const MAX_REPLY_WORDS: usize = 55;

/// Everything the engine needs to produce one reply.
#[derive(Debug)]
pub struct TurnInput<'a> {
    pub call_id: i64,
    pub lead_id: i64,
    /// State the agent speaks in, after routing.
    pub state: SalesState,
    pub flags: IntentFlags,
    pub objection: Option<ObjectionKind>,
    pub lead: &'a LeadContext,
    pub conv: &'a ConversationState,
    pub transcript: &'a str,
    pub user_text: &'a str,
}

/// First-sentence synthesis started while the LLM stream was still running.
struct OverlappedSynthesis {
    sentence: String,
    handle: JoinHandle<Result<Vec<u8>, TtsError>>,
}

/// A generated reply with its provenance and optional audio file.
#[derive(Debug, Clone)]
pub struct EngineReply {
    pub text: String,
    pub source: ReplySource,
    /// Disk-cache file name playable via the audio route, when synthesis
    /// succeeded. `None` degrades to carrier-native speech.
    pub audio_file: Option<String>,
}

/// Orchestrates the quick -> cache -> LLM+TTS pipeline.
pub struct ResponseEngine {
    llm: Arc<dyn LlmProvider>,
    tts: Arc<TtsEngine>,
    cache: Arc<ResponseCache>,
    quality: Arc<QualityScorer>,
    prompts: PromptBuilder,
    llm_breaker: Arc<CircuitBreaker>,
    tts_breaker: Arc<CircuitBreaker>,
    max_tokens: u32,
    serial_fallback: bool,
}

impl ResponseEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tts: Arc<TtsEngine>,
        cache: Arc<ResponseCache>,
        quality: Arc<QualityScorer>,
        prompts: PromptBuilder,
        max_tokens: u32,
        serial_fallback: bool,
    ) -> Self {
        Self {
            llm,
            tts,
            cache,
            quality,
            prompts,
            llm_breaker: Arc::new(CircuitBreaker::with_defaults("llm")),
            tts_breaker: Arc::new(CircuitBreaker::with_defaults("tts")),
            max_tokens,
            serial_fallback,
        }
    }

    pub fn llm_breaker(&self) -> Arc<CircuitBreaker> {
        self.llm_breaker.clone()
    }

    pub fn tts_breaker(&self) -> Arc<CircuitBreaker> {
        self.tts_breaker.clone()
    }

    /// Produce the reply for one turn.
    pub async fn respond(&self, input: TurnInput<'_>, tracker: &mut LatencyTracker) -> EngineReply {
        // Repair and identification turns are deterministic regardless of tier.
        if input.flags.tech_issue && !input.conv.tech_exhausted {
            let text = quick::tech_repair_phrase(input.conv.tech_issues).to_string();
            return self.finish_quick(input, text, tracker).await;
        }
        if input.flags.who_is_this && !input.state.quick_eligible() {
            let text = quick::identification_reply(
                &self.prompts.agent_name,
                &self.prompts.company_name,
                &input.lead.title,
                &input.lead.company,
            );
            return self.finish_quick(input, text, tracker).await;
        }
        if input.user_text.trim().is_empty() && input.state != SalesState::CallStart {
            return self
                .finish_quick(input, quick::reprompt().to_string(), tracker)
                .await;
        }

        // Tier 1: deterministic templates for the simple states.
        if input.state.quick_eligible() {
            if let Some(text) = quick::quick_response(
                input.state,
                &input.flags,
                input.user_text,
                input.lead.first_name(),
                input.conv.channel,
                &self.prompts.agent_name,
                &self.prompts.company_name,
            ) {
                return self.finish_quick(input, text, tracker).await;
            }
        }

        // Tier 2: previously generated reply for the same (state, lead, text).
        if let Some(cached) = self
            .cache
            .get(input.state.id(), input.lead_id, input.user_text)
        {
            info!(
                target: "voxant::cache",
                call_id = input.call_id,
                state = %input.state,
                "serving cached reply"
            );
            let audio_file = self.synthesize_checked(&cached).await;
            tracker.mark(marks::TTS_DONE);
            self.submit_quality(&cached, ReplySource::Cached, input.user_text);
            return EngineReply {
                text: cached,
                source: ReplySource::Cached,
                audio_file,
            };
        }

        // Tier 3: the model.
        self.llm_tier(input, tracker).await
    }

    async fn llm_tier(&self, input: TurnInput<'_>, tracker: &mut LatencyTracker) -> EngineReply {
        if !self.llm_breaker.allow() {
            warn!(
                target: "voxant::breaker",
                call_id = input.call_id,
                "llm circuit open, using fallback template"
            );
            return self
                .finish_quick(input, quick::safe_fallback().to_string(), tracker)
                .await;
        }

        let prompt = self.prompts.build(
            input.state,
            input.lead,
            input.conv,
            input.transcript,
            input.user_text,
            input.objection.map(|o| o.label()).unwrap_or(""),
        );
        tracker.mark(marks::PROMPT_BUILT);

        let deadline = input.state.llm_timeout();

        // First-sentence hook: spawn the child synthesis task and hand the
        // sentence plus its join handle back over a oneshot. Dropping the
        // receiver (serial path, timeout-before-sentence) simply orphans a
        // cached synthesis.
        let (handle_tx, handle_rx) = oneshot::channel::<OverlappedSynthesis>();
        let hook: Option<FirstSentenceHook> = if self.serial_fallback {
            None
        } else {
            let tts = self.tts.clone();
            Some(Box::new(move |sentence: String| {
                let text = sentence.clone();
                let handle = tokio::spawn(async move { tts.synthesize(&text).await });
                let _ = handle_tx.send(OverlappedSynthesis { sentence, handle });
            }))
        };

        let llm_result = if self.serial_fallback {
            self.llm
                .complete(&prompt, self.max_tokens, deadline)
                .await
        } else {
            self.llm
                .complete_streaming(&prompt, self.max_tokens, deadline, hook)
                .await
        };
        tracker.mark(marks::LLM_DONE);

        let raw = match llm_result {
            Ok(text) => {
                self.llm_breaker.record_success();
                text
            }
            Err(e) => {
                if e.is_transient() {
                    self.llm_breaker.record_failure();
                }
                warn!(
                    target: "voxant::latency",
                    call_id = input.call_id,
                    state = %input.state,
                    error = %e,
                    "llm tier failed, using fallback template"
                );
                String::new()
            }
        };

        let cleaned = clean_reply(&raw, input.lead.first_name());
        if cleaned.is_empty() {
            return self
                .finish_quick(input, quick::safe_fallback().to_string(), tracker)
                .await;
        }

        let audio_file = self.assemble_audio(&cleaned, handle_rx).await;
        tracker.mark(marks::TTS_DONE);

        self.cache
            .set(input.state.id(), input.lead_id, input.user_text, &cleaned);
        self.submit_quality(&cleaned, ReplySource::Llm, input.user_text);

        EngineReply {
            text: cleaned,
            source: ReplySource::Llm,
            audio_file,
        }
    }

    /// Join the overlapped first-sentence audio (if any) with the remainder,
    /// falling back to synthesizing the whole cleaned reply.
    async fn assemble_audio(
        &self,
        cleaned: &str,
        mut handle_rx: oneshot::Receiver<OverlappedSynthesis>,
    ) -> Option<String> {
        if !self.tts_breaker.allow() {
            warn!(target: "voxant::breaker", "tts circuit open, degrading to carrier voice");
            return None;
        }

        let result = match handle_rx.try_recv() {
            Ok(overlapped) => self.join_overlapped(cleaned, overlapped).await,
            Err(_) => self.tts.synthesize_to_file(cleaned).await,
        };

        match result {
            Ok(file) => {
                self.tts_breaker.record_success();
                Some(file)
            }
            Err(e) => {
                if e.is_transient() {
                    self.tts_breaker.record_failure();
                }
                warn!(error = %e, "tts failed, degrading to carrier voice");
                None
            }
        }
    }

    async fn join_overlapped(
        &self,
        cleaned: &str,
        overlapped: OverlappedSynthesis,
    ) -> Result<String, TtsError> {
        // The child synthesized the raw stream's first sentence. It is only
        // reusable if cleaning left that exact prefix intact; otherwise the
        // whole cleaned reply is synthesized fresh (the orphaned audio still
        // lands in the cache under its own key).
        let first = overlapped.sentence;
        if first.is_empty() || !cleaned.starts_with(&first) {
            return self.tts.synthesize_to_file(cleaned).await;
        }

        let child_audio = overlapped
            .handle
            .await
            .map_err(|e| TtsError::SynthesisFailed {
                message: format!("overlapped synthesis task failed: {e}"),
            })??;

        let remainder = cleaned[first.len()..].trim();
        if remainder.is_empty() {
            return self.tts.store_combined(cleaned, child_audio).await;
        }

        let rest_audio = self.tts.synthesize(remainder).await?;
        let mut joined = child_audio;
        joined.extend_from_slice(&rest_audio);
        self.tts.store_combined(cleaned, joined).await
    }

    async fn finish_quick(
        &self,
        input: TurnInput<'_>,
        text: String,
        tracker: &mut LatencyTracker,
    ) -> EngineReply {
        debug!(
            target: "voxant::cache",
            call_id = input.call_id,
            state = %input.state,
            "quick tier reply"
        );
        let audio_file = self.synthesize_checked(&text).await;
        tracker.mark(marks::TTS_DONE);
        self.submit_quality(&text, ReplySource::Quick, input.user_text);
        EngineReply {
            text,
            source: ReplySource::Quick,
            audio_file,
        }
    }

    async fn synthesize_checked(&self, text: &str) -> Option<String> {
        if !self.tts_breaker.allow() {
            return None;
        }
        match self.tts.synthesize_to_file(text).await {
            Ok(file) => {
                self.tts_breaker.record_success();
                Some(file)
            }
            Err(e) => {
                if e.is_transient() {
                    self.tts_breaker.record_failure();
                }
                warn!(error = %e, "tts failed, degrading to carrier voice");
                None
            }
        }
    }

    /// Quality scoring happens off the critical path.
    fn submit_quality(&self, reply: &str, source: ReplySource, user_text: &str) {
        let quality = self.quality.clone();
        let reply = reply.to_string();
        let user_text = user_text.to_string();
        tokio::spawn(async move {
            quality.score_and_record(&reply, source, &user_text);
        });
    }
}

/// Normalize a generated reply for speech: strip speaker labels and stray
/// greetings, collapse whitespace, keep at most one question, and truncate on
/// a sentence boundary past the speech-time ceiling.
pub fn clean_reply(text: &str, lead_first_name: &str) -> String {
    const LABELS: &[&str] = &["agent:", "ai agent:", "assistant:", "lead:", "user:"];

    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let mut trimmed = line.trim();
        loop {
            let lower = trimmed.to_lowercase();
            let mut stripped = false;
            for label in LABELS {
                if lower.starts_with(label) {
                    trimmed = trimmed[label.len()..].trim_start();
                    stripped = true;
                    break;
                }
            }
            if !stripped {
                break;
            }
        }
        if !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }
    let mut cleaned = lines.join(" ");
    cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    // Drop a repeated greeting; the opener already said hello.
    let name = lead_first_name.trim();
    if !name.is_empty() {
        let greeting = format!("hi {}", name.to_lowercase());
        if cleaned.to_lowercase().starts_with(&greeting) {
            let rest = cleaned[greeting.len()..]
                .trim_start_matches([' ', ',', '-', '—', '!'])
                .to_string();
            if !rest.is_empty() {
                cleaned = rest;
            }
        }
    }

    cleaned = truncate_on_sentence(&cleaned, MAX_REPLY_WORDS);

    // At most one question per reply
    if let Some(first_q) = cleaned.find('?') {
        let tail = cleaned[first_q + 1..].replace('?', ".");
        cleaned = format!("{}{}", &cleaned[..first_q + 1], tail);
    }

    cleaned.trim().to_string()
}

/// Keep whole sentences while the word total stays within `max_words`; a
/// single overlong sentence is hard-truncated instead.
fn truncate_on_sentence(text: &str, max_words: usize) -> String {
    if text.split_whitespace().count() <= max_words {
        return text.to_string();
    }

    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_end = chars.peek().map(|n| n.is_whitespace()).unwrap_or(true);
            if at_end {
                sentences.push(current.trim().to_string());
                current.clear();
            }
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }

    let mut kept: Vec<String> = Vec::new();
    let mut words = 0usize;
    for sentence in sentences {
        let count = sentence.split_whitespace().count();
        if words + count > max_words {
            break;
        }
        words += count;
        kept.push(sentence);
    }

    if kept.is_empty() {
        let joined = text
            .split_whitespace()
            .take(max_words)
            .collect::<Vec<_>>()
            .join(" ");
        format!("{}.", joined.trim_end_matches([',', ';', ' ']))
    } else {
        kept.join(" ")
    }
}
