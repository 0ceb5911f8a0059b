//! Reservation tools: reserve, release, renew.
//!
//! Reservations are advisory. Granting always succeeds and writes the
//! record; conflicts ride along in the response so the caller can decide
//! whether to proceed, wait, or coordinate.

use crate::errors::ToolError;
use crate::helpers;
use crate::params::{
    ReleaseReservationsParams, RenewReservationsParams, ReserveFilePathsParams,
};
use std::sync::Arc;
use tracing::info;
use waggle_core::Ctx;
use waggle_core::model::ModelManager;
use waggle_core::model::file_reservation::FileReservationBmc;

const DEFAULT_TTL_SECONDS: u64 = 3600;
const DEFAULT_EXTEND_SECONDS: u64 = 1800;

pub async fn reserve_file_paths_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ReserveFilePathsParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    let ttl = params.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);
    let exclusive = params.exclusive.unwrap_or(true);
    let reason = params.reason.clone().unwrap_or_default();

    FileReservationBmc::sweep_expired(ctx, mm, project.id)
        .await
        .map_err(ToolError::from)?;
    let mut active = FileReservationBmc::list_active(ctx, mm, project.id)
        .await
        .map_err(ToolError::from)?;

    let now = chrono::Utc::now().naive_utc();
    let mut granted = Vec::new();
    let mut conflicts = Vec::new();

    let _archive_guard = mm
        .acquire_archive_lock(Some(agent.name.clone()))
        .await
        .map_err(ToolError::from)?;

    for path in &params.paths {
        let holders =
            FileReservationBmc::conflicts_for(&active, agent.id, path, exclusive, now);
        if !holders.is_empty() {
            conflicts.push(serde_json::json!({
                "path": path,
                "holders": holders.iter().map(|c| serde_json::json!({
                    "agent": c.holder,
                    "path_pattern": c.path_pattern,
                    "exclusive": c.exclusive,
                    "expires_ts": c.expires_ts.and_utc().to_rfc3339(),
                })).collect::<Vec<_>>(),
            }));
        }

        let reservation = FileReservationBmc::create(
            ctx, mm, project.id, agent.id, path, exclusive, &reason, ttl,
        )
        .await
        .map_err(ToolError::from)?;
        FileReservationBmc::write_artifact(
            mm,
            &project.slug,
            &project.human_key,
            &agent.name,
            &reservation,
        )
        .await
        .map_err(ToolError::from)?;

        granted.push(serde_json::json!({
            "id": reservation.id,
            "path_pattern": reservation.path_pattern,
            "exclusive": reservation.exclusive,
            "reason": reservation.reason,
            "expires_ts": reservation.expires_ts.and_utc().to_rfc3339(),
        }));
        active.push(waggle_core::model::file_reservation::HeldReservation {
            reservation,
            holder_name: agent.name.clone(),
        });
    }

    info!(
        agent = %agent.name,
        granted = granted.len(),
        conflicts = conflicts.len(),
        "file reservations issued"
    );
    Ok(serde_json::json!({ "granted": granted, "conflicts": conflicts }))
}

pub async fn release_reservations_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ReleaseReservationsParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    let released = FileReservationBmc::release(
        ctx,
        mm,
        project.id,
        agent.id,
        params.reservation_ids.as_deref(),
        params.paths.as_deref(),
    )
    .await
    .map_err(ToolError::from)?;
    Ok(serde_json::json!({
        "released": released,
        "released_at": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn renew_reservations_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: RenewReservationsParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    let renewed = FileReservationBmc::renew(
        ctx,
        mm,
        project.id,
        agent.id,
        params.extend_seconds.unwrap_or(DEFAULT_EXTEND_SECONDS),
        params.reservation_ids.as_deref(),
        params.paths.as_deref(),
    )
    .await
    .map_err(ToolError::from)?;

    // Refresh the on-disk artifacts to reflect the new expiries.
    if !renewed.is_empty() {
        let _archive_guard = mm
            .acquire_archive_lock(Some(agent.name.clone()))
            .await
            .map_err(ToolError::from)?;
        for item in &renewed {
            let reservation = FileReservationBmc::get(ctx, mm, item.id)
                .await
                .map_err(ToolError::from)?;
            FileReservationBmc::write_artifact(
                mm,
                &project.slug,
                &project.human_key,
                &agent.name,
                &reservation,
            )
            .await
            .map_err(ToolError::from)?;
        }
    }

    let payload: Vec<serde_json::Value> = renewed
        .iter()
        .map(|item| {
            serde_json::json!({
                "id": item.id,
                "path_pattern": item.path_pattern,
                "old_expires_ts": item.old_expires_ts.and_utc().to_rfc3339(),
                "new_expires_ts": item.new_expires_ts.and_utc().to_rfc3339(),
            })
        })
        .collect();
    Ok(serde_json::json!({ "renewed": payload.len(), "reservations": payload }))
}
