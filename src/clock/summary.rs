//! Narrative round summaries, generated in the background on entering BREAK.

use super::ClockContext;
use crate::llm::{SummaryLine, SummaryRequest};
use crate::protocol::ServerMessage;
use crate::types::*;
use chrono::Utc;
use std::collections::HashMap;

/// Generate, persist and announce the summary for one round.
///
/// Every failure ends up as an `error` status; nothing is returned to the
/// caller.
pub async fn generate_round_summary(ctx: &ClockContext, session_id: &str, round_number: u32) {
    ctx.broadcaster
        .publish(
            session_id,
            ServerMessage::SummaryStatus {
                round_number,
                status: SummaryStatus::Generating,
                text: None,
                message: None,
            },
        )
        .await;
    save_summary(ctx, session_id, round_number, SummaryStatus::Generating, None, None).await;

    let result = match &ctx.judge {
        Some(judge) => match build_request(ctx, session_id, round_number).await {
            Ok(request) => judge.summarize(request).await.map_err(|e| e.to_string()),
            Err(e) => Err(e),
        },
        None => Err("No judge configured".to_string()),
    };

    let msg = match result {
        Ok(text) => {
            tracing::info!(session_id, round_number, "Round summary completed");
            save_summary(
                ctx,
                session_id,
                round_number,
                SummaryStatus::Completed,
                Some(text.clone()),
                None,
            )
            .await;
            ServerMessage::SummaryStatus {
                round_number,
                status: SummaryStatus::Completed,
                text: Some(text),
                message: None,
            }
        }
        Err(error) => {
            tracing::warn!(session_id, round_number, "Round summary failed: {}", error);
            save_summary(
                ctx,
                session_id,
                round_number,
                SummaryStatus::Error,
                None,
                Some(error.clone()),
            )
            .await;
            ServerMessage::SummaryStatus {
                round_number,
                status: SummaryStatus::Error,
                text: None,
                message: Some(error),
            }
        }
    };

    ctx.broadcaster.publish(session_id, msg).await;
}

async fn build_request(
    ctx: &ClockContext,
    session_id: &str,
    round_number: u32,
) -> Result<SummaryRequest, String> {
    let players = ctx
        .store
        .players(session_id)
        .await
        .map_err(|e| e.to_string())?;
    let names: HashMap<&str, &str> = players
        .iter()
        .map(|p| (p.id.as_str(), p.display_name.as_str()))
        .collect();

    let entries = ctx
        .store
        .round_entries(session_id, round_number)
        .await
        .map_err(|e| e.to_string())?;

    let lines = entries
        .iter()
        .filter_map(|entry| {
            let evaluation = entry.evaluation.as_ref()?;
            Some(SummaryLine {
                display_name: names
                    .get(entry.player_id.as_str())
                    .copied()
                    .unwrap_or("Someone")
                    .to_string(),
                text: entry.raw_text.clone(),
                outcome: evaluation.selected_variant_text.clone(),
                points: evaluation.breakdown.total,
            })
        })
        .collect();

    Ok(SummaryRequest {
        round_number,
        lines,
    })
}

async fn save_summary(
    ctx: &ClockContext,
    session_id: &str,
    round_number: u32,
    status: SummaryStatus,
    text: Option<String>,
    error: Option<String>,
) {
    let summary = RoundSummary {
        session_id: session_id.to_string(),
        round_number,
        status,
        text,
        error,
        updated_at: Utc::now(),
    };

    let result = async {
        let mut tx = ctx.store.begin(session_id).await?;
        tx.upsert_round_summary(summary).await?;
        tx.commit().await
    }
    .await;

    if let Err(e) = result {
        tracing::error!(session_id, round_number, "Failed to persist round summary: {}", e);
    }
}
