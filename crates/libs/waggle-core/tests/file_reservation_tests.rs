mod common;

use common::{TestContext, seed_project_and_agent};
use waggle_core::model::agent::{AgentBmc, AgentForCreate};
use waggle_core::model::file_reservation::FileReservationBmc;
use waggle_core::store::archive;

#[tokio::test(flavor = "multi_thread")]
async fn grants_are_advisory_and_report_conflicts() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");
    let beta = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        AgentForCreate {
            project_id: project.id,
            name: Some("GreenCastle".to_string()),
            program: "claude-code".to_string(),
            model: "opus".to_string(),
            task_description: String::new(),
        },
    )
    .await
    .expect("register beta");

    let alpha_lease = FileReservationBmc::create(
        &tc.ctx, &tc.mm, project.id, alpha.id, "src/**", true, "refactor", 3600,
    )
    .await
    .expect("alpha reserve");

    let active = FileReservationBmc::list_active(&tc.ctx, &tc.mm, project.id)
        .await
        .expect("active");
    let now = chrono::Utc::now().naive_utc();
    let conflicts =
        FileReservationBmc::conflicts_for(&active, beta.id, "src/app.py", true, now);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].holder, "BlueLake");
    assert_eq!(conflicts[0].path_pattern, "src/**");

    // The grant still succeeds: advisory model.
    let beta_lease = FileReservationBmc::create(
        &tc.ctx, &tc.mm, project.id, beta.id, "src/app.py", true, "edit", 3600,
    )
    .await
    .expect("beta reserve despite conflict");
    assert_ne!(alpha_lease.id, beta_lease.id);

    let active = FileReservationBmc::list_active(&tc.ctx, &tc.mm, project.id)
        .await
        .expect("active after both");
    assert_eq!(active.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn ttl_below_floor_is_clamped() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");

    let lease = FileReservationBmc::create(
        &tc.ctx, &tc.mm, project.id, alpha.id, "docs/*.md", true, "", 2,
    )
    .await
    .expect("reserve with tiny ttl");

    let lifetime = lease.expires_ts - lease.created_ts;
    assert!(lifetime >= chrono::Duration::seconds(59), "ttl clamped to floor");
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_rows_are_swept_as_released_on_listing() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");

    let lease = FileReservationBmc::create(
        &tc.ctx, &tc.mm, project.id, alpha.id, "src/*", true, "", 3600,
    )
    .await
    .expect("reserve");

    // Force the lease into the past.
    let db = tc.mm.db_for_test();
    let stmt = db
        .prepare("UPDATE file_reservations SET expires_ts = '2020-01-01 00:00:00' WHERE id = ?")
        .await
        .expect("prepare");
    stmt.execute([lease.id]).await.expect("expire");

    let active = FileReservationBmc::list_active(&tc.ctx, &tc.mm, project.id)
        .await
        .expect("active");
    assert!(active.is_empty(), "expired lease must not be listed active");

    let all = FileReservationBmc::list_all(&tc.ctx, &tc.mm, project.id)
        .await
        .expect("all");
    assert_eq!(all.len(), 1);
    assert!(
        all[0].reservation.released_ts.is_some(),
        "sweep must mark expired rows released"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn release_is_idempotent_and_scoped() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");

    FileReservationBmc::create(&tc.ctx, &tc.mm, project.id, alpha.id, "src/*", true, "", 3600)
        .await
        .expect("reserve one");
    FileReservationBmc::create(&tc.ctx, &tc.mm, project.id, alpha.id, "docs/*", true, "", 3600)
        .await
        .expect("reserve two");

    let released = FileReservationBmc::release(
        &tc.ctx,
        &tc.mm,
        project.id,
        alpha.id,
        None,
        Some(&["src/*".to_string()]),
    )
    .await
    .expect("release by path");
    assert_eq!(released, 1);

    // Releasing the same path again is a no-op.
    let released_again = FileReservationBmc::release(
        &tc.ctx,
        &tc.mm,
        project.id,
        alpha.id,
        None,
        Some(&["src/*".to_string()]),
    )
    .await
    .expect("release again");
    assert_eq!(released_again, 0);

    // Releasing everything else.
    let rest = FileReservationBmc::release(&tc.ctx, &tc.mm, project.id, alpha.id, None, None)
        .await
        .expect("release rest");
    assert_eq!(rest, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn renew_extends_from_max_of_now_and_expiry_keeping_id() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");

    let lease = FileReservationBmc::create(
        &tc.ctx, &tc.mm, project.id, alpha.id, "docs/*.md", true, "", 3600,
    )
    .await
    .expect("reserve");

    let renewed = FileReservationBmc::renew(
        &tc.ctx, &tc.mm, project.id, alpha.id, 7200, None, None,
    )
    .await
    .expect("renew");
    assert_eq!(renewed.len(), 1);
    assert_eq!(renewed[0].id, lease.id, "renewal never allocates a new id");
    assert!(renewed[0].new_expires_ts > renewed[0].old_expires_ts);

    let refreshed = FileReservationBmc::get(&tc.ctx, &tc.mm, lease.id)
        .await
        .expect("get");
    assert_eq!(refreshed.expires_ts, renewed[0].new_expires_ts);
}

#[tokio::test(flavor = "multi_thread")]
async fn artifact_is_addressed_by_sha1_and_refreshed() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");

    let lease = FileReservationBmc::create(
        &tc.ctx, &tc.mm, project.id, alpha.id, "docs/*.md", true, "writing", 3600,
    )
    .await
    .expect("reserve");
    FileReservationBmc::write_artifact(&tc.mm, &project.slug, &project.human_key, "BlueLake", &lease)
        .await
        .expect("write artifact");

    let rel = archive::reservation_record_path(&project.slug, "docs/*.md");
    let artifact = tc.repo_root().join(&rel);
    assert!(artifact.exists(), "artifact at sha1(path_pattern)");

    let before: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact).expect("read")).expect("json");

    let renewed =
        FileReservationBmc::renew(&tc.ctx, &tc.mm, project.id, alpha.id, 7200, None, None)
            .await
            .expect("renew");
    let refreshed = FileReservationBmc::get(&tc.ctx, &tc.mm, renewed[0].id)
        .await
        .expect("get renewed");
    FileReservationBmc::write_artifact(&tc.mm, &project.slug, &project.human_key, "BlueLake", &refreshed)
        .await
        .expect("refresh artifact");

    let after: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact).expect("read")).expect("json");
    assert_ne!(
        before["expires_ts"], after["expires_ts"],
        "artifact must reflect the renewed expiry"
    );
}
