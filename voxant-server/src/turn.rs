//! The webhook-facing critical path: one prospect utterance in, one markup
//! document out.
//!
//! Persistence and the client broadcast are scheduled, never awaited; the
//! transcript append is the only durability requirement, and it rides a
//! fresh pooled connection in a background task.

use crate::db::{self, CallRow, Db, LeadRow};
use crate::gateway::GatewayEvent;
use crate::state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use voxant_core::carrier::{gather_markup, hangup_markup, VoiceOutput};
use voxant_core::engine::TurnInput;
use voxant_core::intents::{detect_objection, IntentFlags};
use voxant_core::latency::{marks, LatencyTracker};
use voxant_core::prompt::LeadContext;
use voxant_core::quick;
use voxant_core::states::{route, SalesState};

fn lead_context(lead: &LeadRow) -> LeadContext {
    LeadContext {
        name: lead.name.clone(),
        company: lead.company.clone(),
        title: lead.title.clone(),
        industry: lead.industry.clone(),
    }
}

fn safe_template_markup() -> String {
    hangup_markup(&VoiceOutput::Say {
        text: "Thanks for your time — we'll follow up shortly. Have a great day.".to_string(),
    })
}

fn exit_markup(state: &AppState) -> String {
    hangup_markup(&VoiceOutput::Say {
        text: format!(
            "Thanks for your time — this is {} from {} signing off. Have a great day.",
            state.config.agent.agent_name, state.config.agent.company_name
        ),
    })
}

/// Handle the carrier's first webhook: play the opener and gather speech.
pub async fn handle_initial(state: &Arc<AppState>, call_id: i64, carrier_sid: &str) -> String {
    let call = match db::get_call(&state.db, call_id).await {
        Ok(Some(call)) => call,
        Ok(None) => {
            warn!(call_id, "initial webhook for unknown call");
            return voxant_core::carrier::empty_markup();
        }
        Err(e) => {
            error!(call_id, error = %e, "failed to load call");
            return safe_template_markup();
        }
    };
    let lead = match db::get_lead(&state.db, call.lead_id).await {
        Ok(Some(lead)) => lead,
        _ => {
            warn!(call_id, lead_id = call.lead_id, "initial webhook with unknown lead");
            return voxant_core::carrier::empty_markup();
        }
    };

    if let Err(e) = db::mark_in_progress(&state.db, call_id, carrier_sid).await {
        error!(call_id, error = %e, "failed to mark call in progress");
    }
    state.broadcaster.publish(GatewayEvent::CallInProgress {
        call_id,
        lead_id: call.lead_id,
    });

    let opener = quick::opener(
        lead_context(&lead).first_name(),
        &state.config.agent.agent_name,
        &state.config.agent.company_name,
    );

    let output = match state.tts.synthesize_to_file(&opener).await {
        Ok(file) => VoiceOutput::Play {
            url: state.audio_url(call_id, &file),
        },
        Err(e) => {
            warn!(call_id, error = %e, "opener synthesis failed, using carrier voice");
            VoiceOutput::Say {
                text: opener.clone(),
            }
        }
    };

    let opener_chunk = format!("AGENT: {opener}");
    let pool = state.db.clone();
    tokio::spawn(async move {
        if let Err(e) = db::append_transcript(&pool, call_id, &opener_chunk).await {
            error!(call_id, error = %e, "failed to persist opener");
        }
    });

    gather_markup(
        &output,
        &format!("/webhook/{call_id}/turn"),
        SalesState::CallStart.gather_timeout_secs(),
    )
}

/// Handle one conversational turn.
pub async fn handle_turn(state: &Arc<AppState>, call_id: i64, speech_result: &str) -> String {
    let mut tracker = LatencyTracker::new(call_id);

    let call = match db::get_call(&state.db, call_id).await {
        Ok(Some(call)) => call,
        Ok(None) => {
            warn!(call_id, "turn webhook for unknown call");
            return voxant_core::carrier::empty_markup();
        }
        Err(e) => {
            error!(call_id, error = %e, "failed to load call");
            return safe_template_markup();
        }
    };

    // A turn after hangup or exit gets the exit document, nothing more.
    if call.is_terminal() || call.sales_state == SalesState::Exit.id() as i64 {
        return exit_markup(state);
    }

    let lead = match db::get_lead(&state.db, call.lead_id).await {
        Ok(Some(lead)) => lead,
        _ => {
            warn!(call_id, lead_id = call.lead_id, "turn webhook with unknown lead");
            return voxant_core::carrier::empty_markup();
        }
    };

    run_turn(state, &call, &lead, speech_result, &mut tracker).await
}

async fn run_turn(
    state: &Arc<AppState>,
    call: &CallRow,
    lead: &LeadRow,
    speech_result: &str,
    tracker: &mut LatencyTracker,
) -> String {
    let call_id = call.id;
    let user_text = speech_result.trim();

    let mut conv = db::conversation_from_call(call, &lead.source);
    let flags = IntentFlags::detect(user_text);
    let objection = detect_objection(user_text);
    conv.observe_turn(user_text, &flags);

    let speak_state = route(conv.state, &flags, objection, &conv);
    if speak_state != conv.state {
        info!(
            call_id,
            from = %conv.state,
            to = %speak_state,
            "state transition"
        );
    }
    conv.enter(speak_state);

    let lead_ctx = lead_context(lead);
    let reply = state
        .engine
        .respond(
            TurnInput {
                call_id,
                lead_id: lead.id,
                state: speak_state,
                flags,
                objection,
                lead: &lead_ctx,
                conv: &conv,
                transcript: &call.full_transcript,
                user_text,
            },
            tracker,
        )
        .await;
    conv.record_reply(&reply.text);

    // Durability: both transcript chunks plus the conversation columns commit
    // together in the background. The reply goes out without waiting.
    let user_chunk = (!user_text.is_empty()).then(|| format!("LEAD: {user_text}"));
    let agent_chunk = format!("AGENT: {}", reply.text);
    let delta = match &user_chunk {
        Some(user) => format!("{user}\n{agent_chunk}"),
        None => agent_chunk.clone(),
    };
    {
        let pool: Db = state.db.clone();
        let conv = conv.clone();
        tokio::spawn(async move {
            if let Err(e) =
                db::persist_turn(&pool, call_id, &conv, user_chunk.as_deref(), &agent_chunk).await
            {
                error!(call_id, error = %e, "turn persistence failed");
            }
        });
    }
    tracker.mark(marks::PERSIST_DONE);

    state.broadcaster.publish(GatewayEvent::CallTranscriptUpdate {
        call_id,
        delta,
    });

    let output = match &reply.audio_file {
        Some(file) => VoiceOutput::Play {
            url: state.audio_url(call_id, file),
        },
        None => VoiceOutput::Say {
            text: reply.text.clone(),
        },
    };

    let markup = if conv.end_call {
        hangup_markup(&output)
    } else {
        gather_markup(
            &output,
            &format!("/webhook/{call_id}/turn"),
            speak_state.gather_timeout_secs(),
        )
    };

    tracker.emit();
    markup
}
