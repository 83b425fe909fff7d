//! The 13-state sales conversation machine.
//!
//! States are a closed enumeration; routing is a total function over
//! `(state, intents, conversation)` so every input has a defined next state
//! and the exit state is absorbing. BANT sub-scores only ever move up within
//! a call.

use crate::intents::{BuyingSignal, IntentFlags, ObjectionKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard cap on repair attempts for audio/connection trouble.
pub const TECH_ISSUE_LIMIT: u32 = 2;

/// Conversation states of the SPIN-derived sales flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalesState {
    /// S0 — greet and confirm the prospect can hear us.
    CallStart,
    /// S1 — ask for time permission with a micro-agenda.
    Permission,
    /// S2 — first open discovery question.
    OpenDiscovery,
    /// S3 — deeper probe, guarded handling.
    ProbeDiscovery,
    /// S4 — reflect the pain back and confirm.
    PainConfirm,
    /// S5 — light quantification, transition to value.
    ValueTransition,
    /// S6 — core value proposition with a reframe.
    ValueProposition,
    /// S7 — deep engagement and proof.
    DeepEngagement,
    /// S8 — address a stated objection.
    ObjectionHandling,
    /// S9 — authority and process mapping.
    AuthorityMapping,
    /// S10 — follow-up consent / de-risked next step.
    FollowUpConsent,
    /// S11 — lock in a concrete slot.
    Scheduling,
    /// S12 — graceful exit. Terminal.
    Exit,
}

/// Coarse phase buckets kept for analytics fields on the call row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Opening,
    Discovery,
    Presentation,
    ObjectionHandling,
    Closing,
}

impl SalesState {
    pub const ALL: [SalesState; 13] = [
        SalesState::CallStart,
        SalesState::Permission,
        SalesState::OpenDiscovery,
        SalesState::ProbeDiscovery,
        SalesState::PainConfirm,
        SalesState::ValueTransition,
        SalesState::ValueProposition,
        SalesState::DeepEngagement,
        SalesState::ObjectionHandling,
        SalesState::AuthorityMapping,
        SalesState::FollowUpConsent,
        SalesState::Scheduling,
        SalesState::Exit,
    ];

    /// Numeric id 0..=12, stored on the call row.
    pub fn id(self) -> u8 {
        match self {
            SalesState::CallStart => 0,
            SalesState::Permission => 1,
            SalesState::OpenDiscovery => 2,
            SalesState::ProbeDiscovery => 3,
            SalesState::PainConfirm => 4,
            SalesState::ValueTransition => 5,
            SalesState::ValueProposition => 6,
            SalesState::DeepEngagement => 7,
            SalesState::ObjectionHandling => 8,
            SalesState::AuthorityMapping => 9,
            SalesState::FollowUpConsent => 10,
            SalesState::Scheduling => 11,
            SalesState::Exit => 12,
        }
    }

    pub fn from_id(id: u8) -> Option<SalesState> {
        SalesState::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn phase(self) -> ConversationPhase {
        match self {
            SalesState::CallStart | SalesState::Permission => ConversationPhase::Opening,
            SalesState::OpenDiscovery
            | SalesState::ProbeDiscovery
            | SalesState::PainConfirm
            | SalesState::ValueTransition => ConversationPhase::Discovery,
            SalesState::ValueProposition | SalesState::DeepEngagement => {
                ConversationPhase::Presentation
            }
            SalesState::ObjectionHandling => ConversationPhase::ObjectionHandling,
            SalesState::AuthorityMapping
            | SalesState::FollowUpConsent
            | SalesState::Scheduling
            | SalesState::Exit => ConversationPhase::Closing,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SalesState::Exit
    }

    /// States whose replies are deterministic enough for the quick tier.
    pub fn quick_eligible(self) -> bool {
        matches!(
            self,
            SalesState::CallStart | SalesState::Permission | SalesState::Exit
        )
    }

    /// States the prospect can be mid-presentation in; an objection from here
    /// is resumable.
    pub fn is_presentation(self) -> bool {
        matches!(
            self,
            SalesState::ValueProposition | SalesState::DeepEngagement
        )
    }

    /// LLM deadline for replies generated in this state.
    pub fn llm_timeout(self) -> Duration {
        match self {
            // Simple: templated or near-templated turns
            SalesState::CallStart
            | SalesState::Permission
            | SalesState::PainConfirm
            | SalesState::Exit => Duration::from_secs(4),
            // Complex: reframes, proof, objection handling
            SalesState::ValueProposition
            | SalesState::DeepEngagement
            | SalesState::ObjectionHandling => Duration::from_secs(6),
            // Moderate: everything else
            _ => Duration::from_secs(5),
        }
    }

    /// Carrier-side speech gather timeout, matched to state complexity.
    pub fn gather_timeout_secs(self) -> u8 {
        match self.llm_timeout().as_secs() {
            4 => 4,
            6 => 6,
            _ => 5,
        }
    }
}

impl std::fmt::Display for SalesState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.id())
    }
}

/// Channel the call arrived through; calibrates tone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    ColdCall,
    WarmReferral,
    Inbound,
}

impl Channel {
    /// Infer from the lead's source tag.
    pub fn from_source(source: &str) -> Self {
        let s = source.to_lowercase();
        if s.contains("inbound") {
            Channel::Inbound
        } else if s.contains("referral") || s.contains("warm") {
            Channel::WarmReferral
        } else {
            Channel::ColdCall
        }
    }

    pub fn tone_profile(self) -> &'static str {
        match self {
            Channel::Inbound => "helpful_direct",
            Channel::WarmReferral => "warm_confident",
            Channel::ColdCall => "neutral_curious",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::ColdCall => "cold_call",
            Channel::WarmReferral => "warm_referral",
            Channel::Inbound => "inbound",
        }
    }
}

/// BANT qualification sub-scores, each 0..=100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BantScore {
    pub budget: u8,
    pub authority: u8,
    pub need: u8,
    pub timeline: u8,
}

impl BantScore {
    pub fn overall(&self) -> f64 {
        (self.budget as f64 + self.authority as f64 + self.need as f64 + self.timeline as f64) / 4.0
    }

    pub fn tier(&self) -> LeadTier {
        let overall = self.overall();
        if overall >= 75.0 {
            LeadTier::Hot
        } else if overall >= 50.0 {
            LeadTier::Warm
        } else if overall >= 30.0 {
            LeadTier::Lukewarm
        } else {
            LeadTier::Cold
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadTier {
    Hot,
    Warm,
    Lukewarm,
    Cold,
}

impl LeadTier {
    pub fn label(self) -> &'static str {
        match self {
            LeadTier::Hot => "hot_lead",
            LeadTier::Warm => "warm_lead",
            LeadTier::Lukewarm => "lukewarm",
            LeadTier::Cold => "cold_lead",
        }
    }
}

fn text_has(text: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| text.contains(p))
}

/// Per-call conversation state, rebuilt from the call row each turn and
/// exclusively owned by the handler for the duration of that turn.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub state: SalesState,
    pub entered_at: DateTime<Utc>,
    /// Turns spent in the current state.
    pub state_turns: u32,
    /// Questions asked in the current state.
    pub state_questions: u32,
    pub turn_count: u32,
    pub bant: BantScore,
    pub intent_history: Vec<IntentFlags>,
    pub objections: Vec<ObjectionKind>,
    pub buying_signals: Vec<BuyingSignal>,
    pub pain_points: u32,
    /// Repair attempts spent on audio trouble. Hard-capped at
    /// `TECH_ISSUE_LIMIT`; a further report sets `tech_exhausted` instead.
    pub tech_issues: u32,
    /// A tech issue arrived with no repair budget left; routing exits.
    pub tech_exhausted: bool,
    pub end_call: bool,
    pub channel: Channel,
    /// Presentation state to resume after a handled objection.
    pub resume_state: Option<SalesState>,
}

impl ConversationState {
    pub fn new(channel: Channel) -> Self {
        Self {
            state: SalesState::CallStart,
            entered_at: Utc::now(),
            state_turns: 0,
            state_questions: 0,
            turn_count: 0,
            bant: BantScore::default(),
            intent_history: Vec::new(),
            objections: Vec::new(),
            buying_signals: Vec::new(),
            pain_points: 0,
            tech_issues: 0,
            tech_exhausted: false,
            end_call: false,
            channel,
            resume_state: None,
        }
    }

    /// Record a prospect turn before routing: intent bookkeeping, BANT
    /// updates, pain-point and tech-issue counters.
    pub fn observe_turn(&mut self, user_text: &str, flags: &IntentFlags) {
        self.turn_count += 1;
        self.intent_history.push(*flags);

        if flags.tech_issue {
            if self.tech_issues < TECH_ISSUE_LIMIT {
                self.tech_issues += 1;
            } else {
                self.tech_exhausted = true;
            }
        }

        let text = crate::intents::normalize_utterance(user_text);
        if text_has(
            &text,
            &[
                "challenge", "problem", "difficult", "frustrating", "slow", "manual", "pain",
                "issue",
            ],
        ) {
            self.pain_points += 1;
        }

        if let Some(objection) = crate::intents::detect_objection(user_text) {
            self.objections.push(objection);
        }
        self.buying_signals
            .extend(crate::intents::detect_buying_signals(user_text));

        self.update_bant(&text);
    }

    /// Keyword-driven BANT scoring. Sub-scores are monotone non-decreasing:
    /// once a signal is detected it is never unlearned.
    fn update_bant(&mut self, text: &str) {
        if text_has(text, &["budget", "allocated", "spend", "cost", "$", "usd"]) {
            if text_has(text, &["100k", "150k", "200k"]) {
                self.bant.budget = self.bant.budget.max(80);
            } else {
                self.bant.budget = self.bant.budget.max(55);
            }
        }

        if text_has(
            text,
            &["i decide", "my decision", "i approve", "i can sign", "i own"],
        ) {
            self.bant.authority = self.bant.authority.max(85);
        } else if text_has(text, &["vp", "director", "head of", "founder", "ceo", "chief"]) {
            self.bant.authority = self.bant.authority.max(70);
        } else if text_has(text, &["talk to my", "check with", "need approval"]) {
            self.bant.authority = self.bant.authority.max(35);
        }

        self.bant.need = self.bant.need.max(match self.pain_points {
            0 => 0,
            1 => 50,
            2 => 70,
            _ => 88,
        });

        if text_has(
            text,
            &["urgent", "asap", "this month", "this quarter", "immediately"],
        ) {
            self.bant.timeline = self.bant.timeline.max(85);
        } else if text_has(text, &["soon", "next quarter", "planning", "next month"]) {
            self.bant.timeline = self.bant.timeline.max(65);
        }
    }

    /// Transition into `next`, resetting per-state counters. Entering the
    /// objection state from a presentation state records where to resume.
    pub fn enter(&mut self, next: SalesState) {
        if self.state == next {
            return;
        }
        if next == SalesState::ObjectionHandling && self.state.is_presentation() {
            self.resume_state = Some(self.state);
        }
        self.state = next;
        self.entered_at = Utc::now();
        self.state_turns = 0;
        self.state_questions = 0;
        if next == SalesState::Exit {
            self.end_call = true;
        }
    }

    /// Bookkeeping after the agent replies in the current state.
    pub fn record_reply(&mut self, reply: &str) {
        self.state_turns += 1;
        if reply.contains('?') {
            self.state_questions += 1;
        }
    }
}

/// Route to the state the agent should speak in now.
///
/// Total over `(state, intents, conversation)`; `Exit` has no out-edges.
/// Interrupt intents are checked in precedence order before per-state logic.
pub fn route(
    cur: SalesState,
    flags: &IntentFlags,
    objection: Option<ObjectionKind>,
    conv: &ConversationState,
) -> SalesState {
    use SalesState::*;

    if cur.is_terminal() || conv.end_call {
        return Exit;
    }

    if flags.hostile || flags.not_interested {
        return Exit;
    }

    if flags.tech_issue {
        return if conv.tech_exhausted { Exit } else { cur };
    }

    // One-turn identification reply; no state advance.
    if flags.who_is_this {
        return cur;
    }

    if flags.no_time {
        // At the very top of the call, offer the short path instead of giving up.
        return if cur == CallStart { Permission } else { Exit };
    }

    match cur {
        CallStart => {
            if flags.substantive() || flags.permission_yes {
                Permission
            } else {
                CallStart
            }
        }
        Permission => {
            if flags.permission_yes {
                OpenDiscovery
            } else if flags.permission_no {
                Exit
            } else {
                Permission
            }
        }
        OpenDiscovery => {
            if conv.state_questions >= 2 || flags.substantive() {
                ProbeDiscovery
            } else {
                OpenDiscovery
            }
        }
        ProbeDiscovery => {
            if flags.guarded {
                ProbeDiscovery
            } else if conv.state_turns >= 1 {
                PainConfirm
            } else {
                ProbeDiscovery
            }
        }
        PainConfirm => {
            if flags.confirm_yes {
                ValueTransition
            } else {
                ProbeDiscovery
            }
        }
        ValueTransition => ValueProposition,
        ValueProposition => {
            if objection.is_some() {
                ObjectionHandling
            } else if flags.schedule {
                Scheduling
            } else if flags.resonance || flags.confirm_yes {
                DeepEngagement
            } else {
                ValueProposition
            }
        }
        DeepEngagement => {
            if objection.is_some() {
                ObjectionHandling
            } else if flags.schedule {
                Scheduling
            } else if flags.hesitation {
                FollowUpConsent
            } else {
                DeepEngagement
            }
        }
        ObjectionHandling => {
            if flags.schedule {
                Scheduling
            } else if objection.is_none() && conv.state_turns >= 1 {
                conv.resume_state.unwrap_or(Scheduling)
            } else {
                ObjectionHandling
            }
        }
        AuthorityMapping => {
            if flags.schedule {
                Scheduling
            } else if flags.hesitation {
                FollowUpConsent
            } else {
                Scheduling
            }
        }
        FollowUpConsent => {
            if flags.schedule || flags.permission_yes || flags.confirm_yes {
                Scheduling
            } else if flags.permission_no {
                Exit
            } else {
                FollowUpConsent
            }
        }
        Scheduling => {
            if flags.schedule {
                Exit
            } else if flags.hesitation {
                FollowUpConsent
            } else {
                Scheduling
            }
        }
        Exit => Exit,
    }
}
