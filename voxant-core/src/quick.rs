//! Deterministic template replies for the simple states.
//!
//! Skips the LLM entirely when the state is predictable enough that a
//! pre-written line is indistinguishable from a generated one. Templates
//! slot-fill the lead's first name and calibrate slightly by channel tone.

use crate::intents::IntentFlags;
use crate::states::{Channel, SalesState};

/// A quick reply only applies when the prospect's input is itself simple.
const MAX_QUICK_INPUT_CHARS: usize = 50;

/// Decide whether this `(state, input)` pair can be answered from the table.
pub fn should_use_quick_response(state: SalesState, user_input: &str) -> bool {
    match state {
        SalesState::CallStart | SalesState::Exit => true,
        SalesState::Permission => user_input.len() < MAX_QUICK_INPUT_CHARS,
        _ => false,
    }
}

/// Look up a deterministic reply. Returns `None` when the state needs the LLM.
pub fn quick_response(
    state: SalesState,
    flags: &IntentFlags,
    user_input: &str,
    first_name: &str,
    channel: Channel,
    agent_name: &str,
    company_name: &str,
) -> Option<String> {
    if !should_use_quick_response(state, user_input) {
        return None;
    }
    let name = if first_name.trim().is_empty() {
        "there"
    } else {
        first_name.trim()
    };

    match state {
        SalesState::CallStart => {
            if user_input.trim().is_empty() {
                // Nothing heard yet: greet again rather than re-prompt.
                return Some(opener(name, agent_name, company_name));
            }
            if flags.who_is_this {
                return Some(format!(
                    "This is {agent_name} from {company_name} — we work with companies on operations efficiency. Did I catch you at a bad time?"
                ));
            }
            if flags.permission_yes || flags.confirm_yes {
                return Some("Great. Before we continue — can you hear me clearly?".to_string());
            }
            Some("Got it. Can you hear me okay?".to_string())
        }
        SalesState::Permission => {
            if flags.no_time || flags.permission_no {
                return Some(
                    "No problem at all. Would a quick email overview be helpful, or shall I let you go?"
                        .to_string(),
                );
            }
            if flags.permission_yes {
                let line = match channel {
                    Channel::WarmReferral => format!(
                        "Appreciate it, {name}. One quick question about your current setup, and I'll either share something useful or get out of your way. Sound good?"
                    ),
                    Channel::Inbound =>
                        "Perfect. Let me ask one question about what prompted you to reach out, and we'll take it from there. Sound good?".to_string(),
                    Channel::ColdCall =>
                        "Perfect. I'll ask one question about your current setup, and based on that I'll either share something useful or get out of your way. Sound good?".to_string(),
                };
                return Some(line);
            }
            Some(format!("Thanks, {name}. Do you have a few minutes?"))
        }
        SalesState::Exit => {
            if flags.hostile || flags.not_interested {
                return Some(
                    "Totally understand. I'll remove you from our list. Have a great day.".to_string(),
                );
            }
            if flags.tech_issue {
                return Some(
                    "No worries — seems like the connection isn't great. I'll let you go. Have a good day."
                        .to_string(),
                );
            }
            if flags.hesitation {
                return Some("I'll send you something via email. Thanks for the time.".to_string());
            }
            Some(format!("Thanks for your time, {name} — have a great day."))
        }
        _ => None,
    }
}

/// Repair phrase played when the prospect reports audio trouble.
pub fn tech_repair_phrase(attempt: u32) -> &'static str {
    if attempt <= 1 {
        "Sorry — you're breaking up a bit. Can you hear me clearly?"
    } else {
        "Got it — let me try once more. Can you hear me now?"
    }
}

/// Deterministic fallback when generation produced nothing usable.
pub fn safe_fallback() -> &'static str {
    "Got it. What's the best way to think about that on your side?"
}

/// Gentle re-prompt for an empty speech result.
pub fn reprompt() -> &'static str {
    "Sorry, I didn't catch that — could you say that again?"
}

/// One-turn identification reply for "who is this" outside the opening.
pub fn identification_reply(
    agent_name: &str,
    company_name: &str,
    title: &str,
    company: &str,
) -> String {
    let title = if title.trim().is_empty() { "your role" } else { title.trim() };
    let company = if company.trim().is_empty() {
        "your company"
    } else {
        company.trim()
    };
    format!(
        "This is {agent_name} from {company_name} — I'm reaching out because you're listed as {title} at {company}. Did I catch you at a bad time?"
    )
}

/// The opener played when the carrier first connects the call.
pub fn opener(first_name: &str, agent_name: &str, company_name: &str) -> String {
    let name = if first_name.trim().is_empty() {
        "there"
    } else {
        first_name.trim()
    };
    format!("Hi {name} — this is {agent_name} calling from {company_name}. Did I catch you at a bad time?")
}
