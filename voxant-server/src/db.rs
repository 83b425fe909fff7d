//! Persistence: calls, leads, and the denormalized transcript rows.
//!
//! SQLite via sqlx with one pool per process. The `calls.full_transcript`
//! blob is the source of truth for transcripts; the `transcripts` table is a
//! lazy denormalization refreshed after each turn commit. Appends happen
//! SQL-side so concurrent writers cannot interleave a read-modify-write.

use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::info;
use voxant_core::states::{BantScore, Channel, ConversationState, SalesState};

pub type Db = Pool<Sqlite>;

/// Open the connection pool, creating the database file when missing.
pub async fn connect(url: &str, max_connections: u32) -> Result<Db> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create tables and indexes. Idempotent.
pub async fn init_schema(db: &Db) -> Result<()> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL DEFAULT '',
            company TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            industry TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            context TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lead_id INTEGER NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
            carrier_call_sid TEXT,
            phone_number TEXT,
            status TEXT NOT NULL DEFAULT 'queued',
            sales_state INTEGER NOT NULL DEFAULT 0,
            full_transcript TEXT NOT NULL DEFAULT '',
            transcript_summary TEXT,
            sentiment TEXT,
            interest_level TEXT,
            recording_url TEXT,
            bant_budget INTEGER NOT NULL DEFAULT 0,
            bant_authority INTEGER NOT NULL DEFAULT 0,
            bant_need INTEGER NOT NULL DEFAULT 0,
            bant_timeline INTEGER NOT NULL DEFAULT 0,
            bant_overall REAL NOT NULL DEFAULT 0,
            turn_count INTEGER NOT NULL DEFAULT 0,
            state_turns INTEGER NOT NULL DEFAULT 0,
            state_questions INTEGER NOT NULL DEFAULT 0,
            tech_issue_count INTEGER NOT NULL DEFAULT 0,
            pain_points_count INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            ended_at TEXT,
            duration_secs INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_calls_lead ON calls(lead_id);
        CREATE INDEX IF NOT EXISTS idx_calls_sid ON calls(carrier_call_sid);

        CREATE TABLE IF NOT EXISTS transcripts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            call_id INTEGER NOT NULL UNIQUE REFERENCES calls(id) ON DELETE CASCADE,
            lead_id INTEGER NOT NULL,
            carrier_call_sid TEXT,
            full_transcript TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
    .execute(db)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeadRow {
    pub id: i64,
    pub name: String,
    pub company: String,
    pub title: String,
    pub industry: String,
    pub phone: String,
    pub email: String,
    pub source: String,
    pub context: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CallRow {
    pub id: i64,
    pub lead_id: i64,
    pub carrier_call_sid: Option<String>,
    pub phone_number: Option<String>,
    pub status: String,
    pub sales_state: i64,
    pub full_transcript: String,
    pub transcript_summary: Option<String>,
    pub sentiment: Option<String>,
    pub interest_level: Option<String>,
    pub recording_url: Option<String>,
    pub bant_budget: i64,
    pub bant_authority: i64,
    pub bant_need: i64,
    pub bant_timeline: i64,
    pub bant_overall: f64,
    pub turn_count: i64,
    pub state_turns: i64,
    pub state_questions: i64,
    pub tech_issue_count: i64,
    pub pain_points_count: i64,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub duration_secs: Option<i64>,
}

impl CallRow {
    /// Lifecycle states after which no further turns are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "completed" | "failed" | "canceled" | "no_answer" | "busy"
        )
    }
}

/// Fields for inserting a lead.
#[derive(Debug, Clone, Default)]
pub struct NewLead {
    pub name: String,
    pub company: String,
    pub title: String,
    pub industry: String,
    pub phone: String,
    pub email: String,
    pub source: String,
}

pub async fn create_lead(db: &Db, lead: &NewLead) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO leads (name, company, title, industry, phone, email, source)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&lead.name)
    .bind(&lead.company)
    .bind(&lead.title)
    .bind(&lead.industry)
    .bind(&lead.phone)
    .bind(&lead.email)
    .bind(&lead.source)
    .execute(db)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_lead(db: &Db, id: i64) -> Result<Option<LeadRow>> {
    let row = sqlx::query_as::<_, LeadRow>(
        "SELECT id, name, company, title, industry, phone, email, source, context
         FROM leads WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn create_call(db: &Db, lead_id: i64, phone_number: &str) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO calls (lead_id, phone_number, status) VALUES (?, ?, 'queued')",
    )
    .bind(lead_id)
    .bind(phone_number)
    .execute(db)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_call(db: &Db, id: i64) -> Result<Option<CallRow>> {
    let row = sqlx::query_as::<_, CallRow>("SELECT * FROM calls WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

/// Record the carrier connecting: status, sid, and the start timestamp (only
/// once, so redelivered webhooks do not move it).
pub async fn mark_in_progress(db: &Db, call_id: i64, carrier_sid: &str) -> Result<()> {
    sqlx::query(
        "UPDATE calls SET
            status = 'in_progress',
            carrier_call_sid = COALESCE(carrier_call_sid, NULLIF(?, '')),
            started_at = COALESCE(started_at, ?)
         WHERE id = ?",
    )
    .bind(carrier_sid)
    .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    .bind(call_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Apply a lifecycle status callback. Idempotent: repeated deliveries of the
/// same terminal status leave the row unchanged, and the duration is computed
/// exactly once.
pub async fn apply_status(db: &Db, call_id: i64, status: &str, carrier_sid: &str) -> Result<()> {
    let status = status.replace('-', "_");
    sqlx::query(
        "UPDATE calls SET
            status = ?,
            carrier_call_sid = COALESCE(carrier_call_sid, NULLIF(?, ''))
         WHERE id = ?",
    )
    .bind(&status)
    .bind(carrier_sid)
    .bind(call_id)
    .execute(db)
    .await?;

    if status == "completed" {
        sqlx::query(
            "UPDATE calls SET
                ended_at = COALESCE(ended_at, ?),
                duration_secs = COALESCE(
                    duration_secs,
                    CAST((julianday(COALESCE(ended_at, ?)) - julianday(started_at)) * 86400 AS INTEGER)
                )
             WHERE id = ? AND started_at IS NOT NULL",
        )
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
        .bind(call_id)
        .execute(db)
        .await?;
    }
    Ok(())
}

pub async fn set_recording_url(db: &Db, call_id: i64, url: &str) -> Result<()> {
    sqlx::query("UPDATE calls SET recording_url = ? WHERE id = ?")
        .bind(url)
        .bind(call_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Append a chunk to the transcript blob. The concatenation happens SQL-side
/// so interleaved writers cannot lose lines.
pub async fn append_transcript(db: &Db, call_id: i64, chunk: &str) -> Result<()> {
    sqlx::query(
        "UPDATE calls SET full_transcript =
            CASE WHEN full_transcript = '' THEN ?1
                 ELSE full_transcript || char(10) || ?1 END
         WHERE id = ?2",
    )
    .bind(chunk)
    .bind(call_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Persist one turn: both transcript chunks, the conversation columns, and
/// the denormalized transcript row, in a single transaction. Runs on a fresh
/// pooled connection off the critical path.
pub async fn persist_turn(
    db: &Db,
    call_id: i64,
    conv: &ConversationState,
    user_chunk: Option<&str>,
    agent_chunk: &str,
) -> Result<()> {
    let mut tx = db.begin().await?;

    let mut chunk = String::new();
    if let Some(user) = user_chunk {
        chunk.push_str(user);
        chunk.push('\n');
    }
    chunk.push_str(agent_chunk);

    sqlx::query(
        "UPDATE calls SET full_transcript =
            CASE WHEN full_transcript = '' THEN ?1
                 ELSE full_transcript || char(10) || ?1 END
         WHERE id = ?2",
    )
    .bind(&chunk)
    .bind(call_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE calls SET
            sales_state = ?, turn_count = ?, state_turns = ?, state_questions = ?,
            tech_issue_count = ?, pain_points_count = ?,
            bant_budget = ?, bant_authority = ?, bant_need = ?, bant_timeline = ?,
            bant_overall = ?, interest_level = ?
         WHERE id = ?",
    )
    .bind(conv.state.id() as i64)
    .bind(conv.turn_count as i64)
    .bind(conv.state_turns as i64)
    .bind(conv.state_questions as i64)
    .bind(conv.tech_issues as i64)
    .bind(conv.pain_points as i64)
    .bind(conv.bant.budget as i64)
    .bind(conv.bant.authority as i64)
    .bind(conv.bant.need as i64)
    .bind(conv.bant.timeline as i64)
    .bind(conv.bant.overall())
    .bind(conv.bant.tier().label())
    .bind(call_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO transcripts (call_id, lead_id, carrier_call_sid, full_transcript, updated_at)
         SELECT id, lead_id, carrier_call_sid, full_transcript, ?
         FROM calls WHERE id = ?
         ON CONFLICT(call_id) DO UPDATE SET
            full_transcript = excluded.full_transcript,
            updated_at = excluded.updated_at",
    )
    .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    .bind(call_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(target: "voxant::latency", call_id, "turn persisted");
    Ok(())
}

/// Rebuild the in-memory conversation state from a call row. Fields the row
/// does not carry (intent history, resume state) start empty and are
/// re-derived as the conversation continues.
pub fn conversation_from_call(call: &CallRow, lead_source: &str) -> ConversationState {
    let mut conv = ConversationState::new(Channel::from_source(lead_source));
    conv.state = SalesState::from_id(call.sales_state as u8).unwrap_or(SalesState::CallStart);
    conv.turn_count = call.turn_count as u32;
    conv.state_turns = call.state_turns as u32;
    conv.state_questions = call.state_questions as u32;
    conv.tech_issues = call.tech_issue_count as u32;
    conv.pain_points = call.pain_points_count as u32;
    conv.bant = BantScore {
        budget: call.bant_budget as u8,
        authority: call.bant_authority as u8,
        need: call.bant_need as u8,
        timeline: call.bant_timeline as u8,
    };
    conv.end_call = conv.state.is_terminal();
    conv
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Db {
        let db = connect("sqlite::memory:", 2).await.unwrap();
        init_schema(&db).await.unwrap();
        db
    }

    async fn seed(db: &Db) -> (i64, i64) {
        let lead_id = create_lead(
            db,
            &NewLead {
                name: "Maya Chen".into(),
                company: "Northwind".into(),
                title: "VP Operations".into(),
                industry: "Logistics".into(),
                phone: "+15550100".into(),
                email: "maya@northwind.example".into(),
                source: "cold list".into(),
            },
        )
        .await
        .unwrap();
        let call_id = create_call(db, lead_id, "+15550100").await.unwrap();
        (lead_id, call_id)
    }

    #[tokio::test]
    async fn test_schema_init_idempotent() {
        let db = test_db().await;
        init_schema(&db).await.unwrap();
    }

    #[tokio::test]
    async fn test_lead_and_call_round_trip() {
        let db = test_db().await;
        let (lead_id, call_id) = seed(&db).await;

        let lead = get_lead(&db, lead_id).await.unwrap().unwrap();
        assert_eq!(lead.name, "Maya Chen");

        let call = get_call(&db, call_id).await.unwrap().unwrap();
        assert_eq!(call.lead_id, lead_id);
        assert_eq!(call.status, "queued");
        assert_eq!(call.sales_state, 0);
        assert!(!call.is_terminal());
    }

    #[tokio::test]
    async fn test_transcript_append_order() {
        let db = test_db().await;
        let (_, call_id) = seed(&db).await;

        append_transcript(&db, call_id, "AGENT: Hi Maya").await.unwrap();
        append_transcript(&db, call_id, "LEAD: hello").await.unwrap();

        let call = get_call(&db, call_id).await.unwrap().unwrap();
        assert_eq!(call.full_transcript, "AGENT: Hi Maya\nLEAD: hello");
    }

    #[tokio::test]
    async fn test_status_idempotent() {
        let db = test_db().await;
        let (_, call_id) = seed(&db).await;

        mark_in_progress(&db, call_id, "CA123").await.unwrap();
        let first = get_call(&db, call_id).await.unwrap().unwrap();
        assert_eq!(first.status, "in_progress");
        let started = first.started_at.clone().unwrap();

        // Redelivery does not move started_at or overwrite the sid
        mark_in_progress(&db, call_id, "CA999").await.unwrap();
        let second = get_call(&db, call_id).await.unwrap().unwrap();
        assert_eq!(second.started_at.unwrap(), started);
        assert_eq!(second.carrier_call_sid.unwrap(), "CA123");

        apply_status(&db, call_id, "completed", "").await.unwrap();
        let done = get_call(&db, call_id).await.unwrap().unwrap();
        let ended = done.ended_at.clone().unwrap();
        let duration = done.duration_secs;

        apply_status(&db, call_id, "completed", "").await.unwrap();
        let again = get_call(&db, call_id).await.unwrap().unwrap();
        assert_eq!(again.ended_at.clone().unwrap(), ended);
        assert_eq!(again.duration_secs, duration);
        assert!(again.is_terminal());
    }

    #[tokio::test]
    async fn test_status_normalizes_dashes() {
        let db = test_db().await;
        let (_, call_id) = seed(&db).await;
        apply_status(&db, call_id, "no-answer", "").await.unwrap();
        let call = get_call(&db, call_id).await.unwrap().unwrap();
        assert_eq!(call.status, "no_answer");
        assert!(call.is_terminal());
    }

    #[tokio::test]
    async fn test_persist_turn_batches_everything() {
        let db = test_db().await;
        let (lead_id, call_id) = seed(&db).await;

        let mut conv = ConversationState::new(Channel::ColdCall);
        let flags = voxant_core::IntentFlags::detect("we have budget allocated, 150k");
        conv.observe_turn("we have budget allocated, 150k", &flags);
        conv.enter(SalesState::OpenDiscovery);
        conv.record_reply("How do you handle it today?");

        persist_turn(
            &db,
            call_id,
            &conv,
            Some("LEAD: we have budget allocated, 150k"),
            "AGENT: How do you handle it today?",
        )
        .await
        .unwrap();

        let call = get_call(&db, call_id).await.unwrap().unwrap();
        assert!(call.full_transcript.contains("LEAD: we have budget"));
        assert!(call.full_transcript.contains("AGENT: How do you"));
        assert_eq!(call.sales_state, 2);
        assert_eq!(call.turn_count, 1);
        assert_eq!(call.bant_budget, 80);

        let row: (i64, String) =
            sqlx::query_as("SELECT lead_id, full_transcript FROM transcripts WHERE call_id = ?")
                .bind(call_id)
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(row.0, lead_id);
        assert_eq!(row.1, call.full_transcript);
    }

    #[tokio::test]
    async fn test_conversation_round_trips_through_call_row() {
        let db = test_db().await;
        let (_, call_id) = seed(&db).await;

        let mut conv = ConversationState::new(Channel::ColdCall);
        let flags = voxant_core::IntentFlags::detect("the manual process is a problem");
        conv.observe_turn("the manual process is a problem", &flags);
        conv.enter(SalesState::ProbeDiscovery);
        conv.record_reply("Does it come up daily or weekly?");

        persist_turn(&db, call_id, &conv, None, "AGENT: Does it come up daily or weekly?")
            .await
            .unwrap();

        let call = get_call(&db, call_id).await.unwrap().unwrap();
        let rebuilt = conversation_from_call(&call, "cold list");
        assert_eq!(rebuilt.state, SalesState::ProbeDiscovery);
        assert_eq!(rebuilt.turn_count, conv.turn_count);
        assert_eq!(rebuilt.state_questions, conv.state_questions);
        assert_eq!(rebuilt.bant, conv.bant);
        assert_eq!(rebuilt.pain_points, conv.pain_points);
        assert!(!rebuilt.end_call);
    }

    #[tokio::test]
    async fn test_terminal_state_rebuild_sets_end_call() {
        let db = test_db().await;
        let (_, call_id) = seed(&db).await;

        let mut conv = ConversationState::new(Channel::ColdCall);
        conv.enter(SalesState::Exit);
        persist_turn(&db, call_id, &conv, None, "AGENT: Thanks, goodbye.")
            .await
            .unwrap();

        let call = get_call(&db, call_id).await.unwrap().unwrap();
        let rebuilt = conversation_from_call(&call, "");
        assert_eq!(rebuilt.state, SalesState::Exit);
        assert!(rebuilt.end_call);
    }
}
