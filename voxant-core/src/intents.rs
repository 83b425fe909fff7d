//! Single-pass intent classification over prospect utterances.
//!
//! One lowercased, whitespace-normalized scan produces a flags record over
//! thirteen intents. Pattern tables are compiled into the binary as `const`
//! phrase lists; detection is substring matching and stays well under the
//! half-millisecond budget for utterances of a few hundred characters.

const NO_TIME: &[&str] = &[
    "no time",
    "can't talk",
    "cant talk",
    "busy",
    "in a meeting",
    "call back later",
    "not now",
];

const JUST_TELL: &[&str] = &[
    "just tell me",
    "what do you want",
    "get to the point",
    "cut to the chase",
    "say it",
];

const HOSTILE: &[&str] = &[
    "stop calling",
    "don't call",
    "dont call",
    "remove me",
    "take me off",
    "leave me alone",
    "scammer",
    "scam",
    "spam",
];

const NOT_INTERESTED: &[&str] = &[
    "not interested",
    "no interest",
    "no thanks",
    "don't need",
    "dont need",
    "we're good",
    "we are good",
];

const TECH_ISSUE: &[&str] = &[
    "can't hear",
    "cant hear",
    "hard to hear",
    "breaking up",
    "bad connection",
    "connection issue",
    "cutting out",
    "static",
    "echo",
    "speak up",
];

const WHO_IS_THIS: &[&str] = &[
    "who is this",
    "who are you",
    "who's calling",
    "what is this about",
    "what's this about",
    "what is this",
];

const PERMISSION_YES: &[&str] = &[
    "sure",
    "okay",
    "ok",
    "go ahead",
    "yeah",
    "yes",
    "yep",
    "fine",
    "a minute",
    "quickly",
];

const PERMISSION_NO: &[&str] = &["no", "not now", "can't", "cant", "don't", "dont", "busy"];

const GUARDED: &[&str] = &[
    "not sure",
    "hard to say",
    "depends",
    "maybe",
    "can't share",
    "cant share",
    "prefer not",
];

const CONFIRM_YES: &[&str] = &[
    "yes",
    "yeah",
    "yep",
    "correct",
    "right",
    "exactly",
    "that's accurate",
    "sounds right",
    "fair way to say it",
];

const RESONANCE: &[&str] = &[
    "makes sense",
    "that's true",
    "exactly",
    "we see that",
    "sounds familiar",
    "agreed",
];

const HESITATION: &[&str] = &[
    "maybe",
    "not sure",
    "need to think",
    "send info",
    "send me something",
    "email me",
    "circle back",
    "later",
];

const SCHEDULE: &[&str] = &[
    "demo",
    "meeting",
    "calendar",
    "book",
    "schedule",
    "send invite",
    "send times",
    "tomorrow",
    "next week",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
];

fn contains_any(text: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| text.contains(p))
}

/// Flags record over the thirteen recognized intents.
///
/// Multiple intents may fire on one utterance; `hostile`, `not_interested`,
/// `no_time`, and `tech_issue` take precedence during routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntentFlags {
    pub no_time: bool,
    pub just_tell: bool,
    pub hostile: bool,
    pub not_interested: bool,
    pub tech_issue: bool,
    pub who_is_this: bool,
    pub permission_yes: bool,
    pub permission_no: bool,
    pub guarded: bool,
    pub confirm_yes: bool,
    pub resonance: bool,
    pub hesitation: bool,
    pub schedule: bool,
}

impl IntentFlags {
    /// Classify an utterance in a single pass.
    pub fn detect(utterance: &str) -> Self {
        let text = normalize_utterance(utterance);

        if text.is_empty() {
            // An empty speech result is a non-answer.
            return Self {
                guarded: true,
                ..Self::default()
            };
        }

        let permission_yes = contains_any(&text, PERMISSION_YES);
        let word_count = text.split_whitespace().count();

        Self {
            no_time: contains_any(&text, NO_TIME),
            just_tell: contains_any(&text, JUST_TELL),
            hostile: contains_any(&text, HOSTILE),
            not_interested: contains_any(&text, NOT_INTERESTED),
            tech_issue: contains_any(&text, TECH_ISSUE),
            who_is_this: contains_any(&text, WHO_IS_THIS),
            permission_yes,
            permission_no: contains_any(&text, PERMISSION_NO) && !permission_yes,
            guarded: word_count <= 2 || contains_any(&text, GUARDED),
            confirm_yes: contains_any(&text, CONFIRM_YES),
            resonance: contains_any(&text, RESONANCE),
            hesitation: contains_any(&text, HESITATION),
            schedule: contains_any(&text, SCHEDULE),
        }
    }

    /// Whether any interrupt-class intent fired. These reroute before reply
    /// generation and disqualify the quick tier's happy-path templates.
    pub fn high_priority(&self) -> bool {
        self.hostile || self.not_interested || self.no_time || self.tech_issue
    }

    /// A substantive answer: something beyond a hedge or a two-word shrug.
    pub fn substantive(&self) -> bool {
        !self.guarded
    }
}

/// Lowercase and collapse internal whitespace.
pub fn normalize_utterance(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Objection categories used for state-8 prompt selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectionKind {
    Price,
    Timing,
    Authority,
    Competition,
}

impl ObjectionKind {
    pub fn label(self) -> &'static str {
        match self {
            ObjectionKind::Price => "price",
            ObjectionKind::Timing => "timing",
            ObjectionKind::Authority => "authority",
            ObjectionKind::Competition => "competition",
        }
    }
}

const OBJECTION_PRICE: &[&str] = &["expensive", "cost", "budget", "afford", "price", "pricing"];
const OBJECTION_TIMING: &[&str] = &[
    "not now",
    "later",
    "next quarter",
    "need time",
    "think about",
    "follow up later",
];
const OBJECTION_AUTHORITY: &[&str] = &[
    "talk to",
    "check with",
    "boss",
    "manager",
    "leadership",
    "team needs",
];
const OBJECTION_COMPETITION: &[&str] = &[
    "already have",
    "already use",
    "we use",
    "competitor",
    "another tool",
    "other solution",
];

/// Detect a stated objection, if any. Categories are checked in priority
/// order; the first match wins.
pub fn detect_objection(utterance: &str) -> Option<ObjectionKind> {
    let text = normalize_utterance(utterance);
    if text.is_empty() {
        return None;
    }
    if contains_any(&text, OBJECTION_PRICE) {
        Some(ObjectionKind::Price)
    } else if contains_any(&text, OBJECTION_TIMING) {
        Some(ObjectionKind::Timing)
    } else if contains_any(&text, OBJECTION_AUTHORITY) {
        Some(ObjectionKind::Authority)
    } else if contains_any(&text, OBJECTION_COMPETITION) {
        Some(ObjectionKind::Competition)
    } else {
        None
    }
}

/// Buying signals tracked alongside intents for lead scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyingSignal {
    NextStepsInquiry,
    PricingInquiry,
    PositiveSentiment,
}

/// Detect buying signals in an utterance.
pub fn detect_buying_signals(utterance: &str) -> Vec<BuyingSignal> {
    let text = normalize_utterance(utterance);
    let mut signals = Vec::new();
    if contains_any(
        &text,
        &["how does", "when can", "what's next", "how do we start", "show me"],
    ) {
        signals.push(BuyingSignal::NextStepsInquiry);
    }
    if contains_any(&text, &["pricing", "cost", "how much", "investment"]) {
        signals.push(BuyingSignal::PricingInquiry);
    }
    if contains_any(&text, &["sounds good", "interested", "makes sense", "like this"]) {
        signals.push(BuyingSignal::PositiveSentiment);
    }
    signals
}
