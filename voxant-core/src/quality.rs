//! Reply quality scoring with baseline alerting.
//!
//! Five weighted sub-scores (length, sentiment, question density, engagement,
//! coherence) produce an overall 0-100 score per reply. A sliding window over
//! recent scores backs the operator metrics endpoint and a degradation alert
//! when the windowed mean falls below the configured baseline. Scoring is
//! cheap and always invoked off the critical path.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{info, warn};

const POSITIVE_MARKERS: &[&str] = &[
    "makes sense",
    "great",
    "perfect",
    "exactly",
    "agreed",
    "sounds good",
    "interested",
    "that's helpful",
    "absolutely",
];

const NEGATIVE_MARKERS: &[&str] = &[
    "not interested",
    "waste of time",
    "irrelevant",
    "boring",
    "confusing",
    "unhelpful",
    "terrible",
];

const ENGAGEMENT_MARKERS: &[&str] = &[
    "how", "when", "what", "tell me", "show me", "explain", "interested", "curious", "question",
    "ask",
];

const COMMON_WORDS: &[&str] = &[
    "is", "are", "the", "a", "an", "to", "of", "in", "for", "and", "or", "that", "this", "with",
];

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Quick,
    Cached,
    Llm,
}

impl ReplySource {
    pub fn label(self) -> &'static str {
        match self {
            ReplySource::Quick => "quick",
            ReplySource::Cached => "cached",
            ReplySource::Llm => "llm",
        }
    }
}

/// Quality analysis of a single reply.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub source: ReplySource,
    pub word_count: usize,
    pub length_score: f64,
    pub sentiment_score: f64,
    pub question_density: f64,
    pub density_score: f64,
    pub engagement_score: f64,
    pub coherence_score: f64,
    pub overall: f64,
}

/// Windowed quality status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    Excellent,
    Good,
    Acceptable,
    Degraded,
    Poor,
    NoData,
}

impl QualityStatus {
    fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            QualityStatus::Excellent
        } else if score >= 75.0 {
            QualityStatus::Good
        } else if score >= 65.0 {
            QualityStatus::Acceptable
        } else if score >= 50.0 {
            QualityStatus::Degraded
        } else {
            QualityStatus::Poor
        }
    }
}

/// Aggregate quality report served at `/calls/quality/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct QualityAggregate {
    pub total_responses: u64,
    pub response_distribution: ResponseDistribution,
    pub quality_metrics: QualityMetrics,
    pub quality_status: QualityStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseDistribution {
    pub quick: u64,
    pub cached: u64,
    pub llm: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityMetrics {
    pub avg_overall_score: f64,
    pub avg_length_words: f64,
    pub avg_sentiment_score: f64,
    pub avg_question_density: f64,
    pub avg_engagement_level: f64,
}

#[derive(Debug, Default)]
struct ScorerWindow {
    recent: VecDeque<QualityReport>,
    total: u64,
    distribution: ResponseDistribution,
    sum_length: f64,
    sum_sentiment: f64,
    sum_density: f64,
    sum_engagement: f64,
}

/// Multi-factor reply scorer with a bounded window of recent scores.
#[derive(Debug)]
pub struct QualityScorer {
    baseline: f64,
    alert_margin: f64,
    window_len: usize,
    inner: Mutex<ScorerWindow>,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(75.0, 5.0, 50)
    }
}

impl QualityScorer {
    pub fn new(baseline: f64, alert_margin: f64, window_len: usize) -> Self {
        Self {
            baseline,
            alert_margin,
            window_len,
            inner: Mutex::new(ScorerWindow::default()),
        }
    }

    /// Score one reply. Pure; does not touch the window.
    pub fn analyze(&self, reply: &str, source: ReplySource, user_input: &str) -> QualityReport {
        let reply_lower = reply.to_lowercase();
        let user_lower = user_input.to_lowercase();

        let word_count = reply.split_whitespace().count();
        let length_score = score_length(word_count);
        let sentiment_score = score_sentiment(&reply_lower);

        let question_count = reply.matches('?').count();
        let sentence_count = reply
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count()
            .max(1);
        let question_density = question_count as f64 / sentence_count as f64;
        let density_score = score_question_density(question_density);

        let engagement_score = score_engagement(&reply_lower, question_count > 0);
        let coherence_score = score_coherence(&reply_lower, &user_lower);

        let overall = length_score * 0.20
            + sentiment_score * 0.25
            + density_score * 0.20
            + engagement_score * 0.15
            + coherence_score * 0.20;

        QualityReport {
            source,
            word_count,
            length_score,
            sentiment_score,
            question_density,
            density_score,
            engagement_score,
            coherence_score,
            overall,
        }
    }

    /// Score a reply and fold it into the window, emitting the quality event
    /// and the degradation alert if the windowed mean dropped too far.
    pub fn score_and_record(
        &self,
        reply: &str,
        source: ReplySource,
        user_input: &str,
    ) -> QualityReport {
        let report = self.analyze(reply, source, user_input);
        info!(
            target: "voxant::quality",
            source = source.label(),
            overall = report.overall,
            words = report.word_count,
            "reply scored"
        );
        self.record(report.clone());
        report
    }

    fn record(&self, report: QualityReport) {
        let mut inner = self.inner.lock().expect("quality window lock poisoned");
        inner.total += 1;
        match report.source {
            ReplySource::Quick => inner.distribution.quick += 1,
            ReplySource::Cached => inner.distribution.cached += 1,
            ReplySource::Llm => inner.distribution.llm += 1,
        }
        inner.sum_length += report.word_count as f64;
        inner.sum_sentiment += report.sentiment_score;
        inner.sum_density += report.question_density;
        inner.sum_engagement += report.engagement_score;

        inner.recent.push_back(report);
        while inner.recent.len() > self.window_len {
            inner.recent.pop_front();
        }

        let windowed_mean =
            inner.recent.iter().map(|r| r.overall).sum::<f64>() / inner.recent.len() as f64;
        if windowed_mean < self.baseline - self.alert_margin {
            warn!(
                target: "voxant::quality",
                windowed_mean,
                baseline = self.baseline,
                "quality degraded below baseline"
            );
        }
    }

    /// Current alert state, if the windowed mean is below baseline - margin.
    pub fn current_alert(&self) -> Option<f64> {
        let inner = self.inner.lock().expect("quality window lock poisoned");
        if inner.recent.is_empty() {
            return None;
        }
        let mean = inner.recent.iter().map(|r| r.overall).sum::<f64>() / inner.recent.len() as f64;
        (mean < self.baseline - self.alert_margin).then_some(mean)
    }

    /// Aggregate report for the operator endpoint.
    pub fn report(&self) -> QualityAggregate {
        let inner = self.inner.lock().expect("quality window lock poisoned");
        if inner.total == 0 {
            return QualityAggregate {
                total_responses: 0,
                response_distribution: ResponseDistribution::default(),
                quality_metrics: QualityMetrics::default(),
                quality_status: QualityStatus::NoData,
            };
        }

        let total = inner.total as f64;
        let windowed_mean = if inner.recent.is_empty() {
            0.0
        } else {
            inner.recent.iter().map(|r| r.overall).sum::<f64>() / inner.recent.len() as f64
        };

        QualityAggregate {
            total_responses: inner.total,
            response_distribution: inner.distribution.clone(),
            quality_metrics: QualityMetrics {
                avg_overall_score: round2(windowed_mean),
                avg_length_words: round2(inner.sum_length / total),
                avg_sentiment_score: round2(inner.sum_sentiment / total),
                avg_question_density: round2(inner.sum_density / total),
                avg_engagement_level: round2(inner.sum_engagement / total),
            },
            quality_status: QualityStatus::from_score(windowed_mean),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Voice replies are short: the sweet spot runs from a phrase up to the
/// ~55-word speech-time ceiling the cleaner enforces.
fn score_length(word_count: usize) -> f64 {
    match word_count {
        0 => 0.0,
        1..=4 => 40.0,
        5..=55 => 100.0,
        56..=80 => 70.0,
        _ => 50.0,
    }
}

fn score_sentiment(reply_lower: &str) -> f64 {
    let positive = POSITIVE_MARKERS
        .iter()
        .filter(|m| reply_lower.contains(*m))
        .count();
    let negative = NEGATIVE_MARKERS
        .iter()
        .filter(|m| reply_lower.contains(*m))
        .count();
    if positive + negative == 0 {
        return 70.0;
    }
    (positive as f64 / (positive + negative) as f64 * 100.0).min(100.0)
}

/// One question per one-to-two-sentence reply is the norm for voice.
fn score_question_density(density: f64) -> f64 {
    if density == 0.0 {
        70.0
    } else if density <= 1.0 {
        if density >= 0.2 { 100.0 } else { 80.0 }
    } else {
        60.0
    }
}

fn score_engagement(reply_lower: &str, has_question: bool) -> f64 {
    let markers = ENGAGEMENT_MARKERS
        .iter()
        .filter(|m| reply_lower.contains(*m))
        .count();
    let base = (markers * 20) as f64 + if has_question { 40.0 } else { 0.0 };
    base.min(100.0)
}

fn content_words(text: &str) -> std::collections::HashSet<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3 && !COMMON_WORDS.contains(w))
        .collect()
}

fn score_coherence(reply_lower: &str, user_lower: &str) -> f64 {
    let user_words = content_words(user_lower);
    if user_words.is_empty() {
        return 80.0;
    }
    let reply_words = content_words(reply_lower);
    let overlap = reply_words.intersection(&user_words).count();
    let ratio = overlap as f64 / user_words.len() as f64;
    (ratio * 100.0).clamp(60.0, 100.0)
}
