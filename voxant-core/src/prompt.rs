//! State-keyed prompt assembly.
//!
//! One template per sales state, with `{slot}` placeholders filled from the
//! lead, the conversation state, and a bounded transcript tail. Missing slots
//! render as empty strings rather than erroring.

use crate::states::{ConversationState, SalesState};
use std::collections::HashMap;

/// Default cap on the transcript tail carried into the prompt.
pub const TRANSCRIPT_TAIL_CHARS: usize = 800;

/// Default cap on total prompt size.
pub const PROMPT_CHAR_BUDGET: usize = 6000;

/// Lead fields visible to prompt assembly. No other PII enters the prompt.
#[derive(Debug, Clone, Default)]
pub struct LeadContext {
    pub name: String,
    pub company: String,
    pub title: String,
    pub industry: String,
}

impl LeadContext {
    pub fn first_name(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() {
            "there"
        } else {
            name.split_whitespace().next().unwrap_or("there")
        }
    }
}

/// Builds state-specific prompts within a fixed character budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub agent_name: String,
    pub company_name: String,
    pub tail_chars: usize,
    pub char_budget: usize,
}

impl PromptBuilder {
    pub fn new(agent_name: impl Into<String>, company_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            company_name: company_name.into(),
            tail_chars: TRANSCRIPT_TAIL_CHARS,
            char_budget: PROMPT_CHAR_BUDGET,
        }
    }

    /// Assemble the prompt for one reply.
    pub fn build(
        &self,
        state: SalesState,
        lead: &LeadContext,
        conv: &ConversationState,
        transcript: &str,
        user_text: &str,
        objection_type: &str,
    ) -> String {
        let template = state_template(state);

        let mut slots: HashMap<&str, String> = HashMap::new();
        slots.insert("agent_name", self.agent_name.clone());
        slots.insert("company_name", self.company_name.clone());
        slots.insert("lead_name", non_empty_or(&lead.name, "there"));
        slots.insert("lead_title", non_empty_or(&lead.title, "your role"));
        slots.insert("lead_company", non_empty_or(&lead.company, "your company"));
        slots.insert("lead_industry", non_empty_or(&lead.industry, "your industry"));
        slots.insert("channel", conv.channel.label().to_string());
        slots.insert("tone_profile", conv.channel.tone_profile().to_string());
        slots.insert(
            "transcript_tail",
            transcript_tail(transcript, self.tail_chars).to_string(),
        );
        slots.insert("user_input", user_text.trim().to_string());
        slots.insert("state_turn_count", conv.state_turns.to_string());
        slots.insert("state_question_count", conv.state_questions.to_string());
        slots.insert("objection_type", objection_type.to_string());

        let mut prompt = fill(template, &slots);
        if prompt.chars().count() > self.char_budget {
            prompt = prompt.chars().take(self.char_budget).collect();
        }
        prompt
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Last `limit` characters of the transcript, on a char boundary.
pub fn transcript_tail(transcript: &str, limit: usize) -> &str {
    let count = transcript.chars().count();
    if count <= limit {
        return transcript;
    }
    let skip = count - limit;
    let (idx, _) = transcript.char_indices().nth(skip).unwrap_or((0, ' '));
    &transcript[idx..]
}

/// Replace `{slot}` placeholders; unknown slots render empty.
fn fill(template: &str, slots: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                if let Some(value) = slots.get(key) {
                    out.push_str(value);
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn state_template(state: SalesState) -> &'static str {
    match state {
        SalesState::CallStart => {
            "You are {agent_name}, a voice agent from {company_name} calling {lead_name} at {lead_company} ({lead_industry}).\n\
             Channel: {channel}. Tone: {tone_profile}.\n\
             Transcript so far: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             The opener has already been played. Confirm they heard you and are willing to listen. \
             If they asked who you are, clarify in one sentence that you are {agent_name} from {company_name}. \
             Do not mention product, features, or pricing, and do not re-greet them.\n\
             Reply in 1-2 sentences with at most one short confirmation question."
        }
        SalesState::Permission => {
            "You are {agent_name} from {company_name} calling {lead_name}, {lead_title} at {lead_company}.\n\
             Channel: {channel}. Tone: {tone_profile}. Turn {state_turn_count} in this step.\n\
             Recent exchange: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Ask for a few minutes of their time with a one-line agenda, and make it easy to say no. \
             Reference a credible reason for reaching out to someone in {lead_industry}. \
             No features, no pricing, no pressure.\n\
             Reply in 2-3 sentences ending in one simple time question."
        }
        SalesState::OpenDiscovery => {
            "You are {agent_name} from {company_name} talking to {lead_name}, {lead_title} at {lead_company} ({lead_industry}).\n\
             Tone: {tone_profile}. Questions asked in this step so far: {state_question_count} of 2.\n\
             Transcript: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Ask ONE safe discovery question: multiple-choice, a range, or a comparison. \
             Never ask 'what's your biggest challenge', never ask why, never stack questions. \
             Accept vague answers without pushing.\n\
             Reply in 1-2 sentences with exactly one question."
        }
        SalesState::ProbeDiscovery => {
            "You are {agent_name} from {company_name} talking to {lead_name} at {lead_company} ({lead_industry}).\n\
             Transcript: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Ask one deeper but safe question: frequency, scope, trigger, or a confirmation label \
             of something they actually said. No why-questions, no traps, no unverifiable claims.\n\
             Reply in 1-2 sentences with at most one question."
        }
        SalesState::PainConfirm => {
            "You are {agent_name} from {company_name} talking to {lead_name} at {lead_company}.\n\
             Transcript: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Reflect the problem you heard back in ONE clear sentence using their own words, \
             then ask one confirmation question like 'did I get that right?'. \
             Do not pitch anything yet.\n\
             Reply in 1-2 sentences with one confirmation question."
        }
        SalesState::ValueTransition => {
            "You are {agent_name} from {company_name} talking to {lead_name} at {lead_company}.\n\
             Transcript: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Ask one light quantification question using ranges ('daily or weekly?', \
             'a handful or hundreds?'). Soften with 'roughly' and accept proxy answers.\n\
             Reply in 1-2 sentences with one range question."
        }
        SalesState::ValueProposition => {
            "You are {agent_name} from {company_name} talking to {lead_name} at {lead_company} ({lead_industry}).\n\
             Transcript with the confirmed problem: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Offer one crisp insight that reframes their problem as common and solvable, using \
             external attribution ('what we typically see in {lead_industry}...'). \
             No ROI claims, no pricing, no feature list.\n\
             Reply in 2-3 sentences with one low-pressure check question."
        }
        SalesState::DeepEngagement => {
            "You are {agent_name} from {company_name} talking to {lead_name} at {lead_company} ({lead_industry}).\n\
             Tone: {tone_profile}.\n\
             Transcript: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Map their confirmed problem to a high-level way teams handle it, in operational terms, \
             optionally with one anonymized example. Then invite a short walk-through. \
             No feature dump, no guarantees.\n\
             Reply in 2-3 sentences with one exploration question."
        }
        SalesState::ObjectionHandling => {
            "You are {agent_name} from {company_name} talking to {lead_name} at {lead_company}.\n\
             Transcript: {transcript_tail}\n\
             Their objection ({objection_type}): {user_input}\n\n\
             Handle it calmly: acknowledge, clarify if needed, reframe with external attribution, \
             and confirm with a fair next-step question. Never argue, never guarantee, \
             never disparage whatever they use today.\n\
             Reply in 2-3 sentences with one question."
        }
        SalesState::AuthorityMapping => {
            "You are {agent_name} from {company_name} talking to {lead_name}, {lead_title} at {lead_company}.\n\
             Transcript: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Understand their evaluation process lightly. Ask about process, not authority; \
             never ask 'are you the decision maker'.\n\
             Reply in 1-2 sentences with one curious question."
        }
        SalesState::FollowUpConsent => {
            "You are {agent_name} from {company_name} talking to {lead_name} at {lead_company}.\n\
             Transcript: {transcript_tail}\n\
             Their hesitation: {user_input}\n\n\
             Acknowledge the hesitation briefly, then offer one small, reversible next step that is \
             useful to them even if there is no fit. Confirm their preference.\n\
             Reply in 2-3 sentences with one clear offer and a confirmation question."
        }
        SalesState::Scheduling => {
            "You are {agent_name} from {company_name} talking to {lead_name} at {lead_company}.\n\
             Transcript: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Lock in a next step: offer two concrete time windows, confirm what they want to see, \
             and recap the plan. Keep it light; no pressure language.\n\
             Reply in 2-3 sentences with one or two confirmation questions."
        }
        SalesState::Exit => {
            "You are {agent_name} from {company_name} wrapping up a call with {lead_name} at {lead_company}.\n\
             Transcript: {transcript_tail}\n\
             Their last message: {user_input}\n\n\
             Exit gracefully: thank them, optionally offer a short email overview, and end. \
             No guilt, no further questions beyond one optional offer, no pitching.\n\
             Reply in 1-2 sentences."
        }
    }
}
