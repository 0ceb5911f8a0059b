mod common;

use common::TestService;
use waggle_mcp::params::{
    MacroPrepareThreadParams, MacroReservationCycleParams, MacroStartSessionParams,
};
use waggle_mcp::tools::macros;

#[tokio::test(flavor = "multi_thread")]
async fn start_session_boots_project_agent_reservations_and_inbox() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");

    let result = macros::start_session_impl(
        &ts.ctx,
        &ts.mm,
        MacroStartSessionParams {
            human_key: key.clone(),
            program: "claude-code".to_string(),
            model: "opus".to_string(),
            task_description: "auth refactor".to_string(),
            agent_name: Some("BlueLake".to_string()),
            reservation_paths: Some(vec!["src/auth/*".to_string()]),
            reservation_reason: None,
            reservation_ttl_seconds: None,
            inbox_limit: None,
        },
    )
    .await
    .expect("start session");

    assert_eq!(result["agent"]["name"], "BlueLake");
    assert_eq!(result["project"]["human_key"], key);
    assert_eq!(result["reservations"]["granted"].as_array().expect("granted").len(), 1);
    assert!(result["inbox"].as_array().expect("inbox").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn start_session_requires_absolute_human_key() {
    let ts = TestService::new().await;
    let err = macros::start_session_impl(
        &ts.ctx,
        &ts.mm,
        MacroStartSessionParams {
            human_key: "relative/path".to_string(),
            program: "claude-code".to_string(),
            model: "opus".to_string(),
            task_description: String::new(),
            agent_name: None,
            reservation_paths: None,
            reservation_reason: None,
            reservation_ttl_seconds: None,
            inbox_limit: None,
        },
    )
    .await
    .expect_err("relative human key rejected");
    assert_eq!(err.kind_name(), "INVALID_ARGUMENT");
}

#[tokio::test(flavor = "multi_thread")]
async fn reservation_cycle_with_auto_release() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    macros::start_session_impl(
        &ts.ctx,
        &ts.mm,
        MacroStartSessionParams {
            human_key: key.clone(),
            program: "claude-code".to_string(),
            model: "opus".to_string(),
            task_description: String::new(),
            agent_name: Some("BlueLake".to_string()),
            reservation_paths: None,
            reservation_reason: None,
            reservation_ttl_seconds: None,
            inbox_limit: None,
        },
    )
    .await
    .expect("bootstrap");

    let result = macros::reservation_cycle_impl(
        &ts.ctx,
        &ts.mm,
        MacroReservationCycleParams {
            project_key: key.clone(),
            agent_name: "BlueLake".to_string(),
            paths: vec!["docs/*.md".to_string()],
            ttl_seconds: None,
            exclusive: Some(true),
            reason: None,
            auto_release: Some(true),
        },
    )
    .await
    .expect("cycle");

    assert_eq!(result["reservations"]["granted"].as_array().expect("granted").len(), 1);
    assert_eq!(result["released"]["released"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn prepare_thread_registers_and_summarizes() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    macros::start_session_impl(
        &ts.ctx,
        &ts.mm,
        MacroStartSessionParams {
            human_key: key.clone(),
            program: "claude-code".to_string(),
            model: "opus".to_string(),
            task_description: String::new(),
            agent_name: Some("BlueLake".to_string()),
            reservation_paths: None,
            reservation_reason: None,
            reservation_ttl_seconds: None,
            inbox_limit: None,
        },
    )
    .await
    .expect("bootstrap");

    // Seed the thread with one message carrying action items.
    let sent = waggle_mcp::tools::messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        waggle_mcp::params::SendMessageParams {
            project_key: key.clone(),
            sender_name: "BlueLake".to_string(),
            to: vec!["BlueLake".to_string()],
            subject: "Plan".to_string(),
            body_md: "- [ ] TODO write tests\n- roll out slowly".to_string(),
            cc: None,
            bcc: None,
            importance: None,
            ack_required: None,
            thread_id: Some("T-1".to_string()),
            attachment_paths: None,
            convert_images: None,
            auto_contact_if_blocked: None,
        },
    )
    .await
    .expect("seed thread");
    assert_eq!(sent["count"], 1);

    let result = macros::prepare_thread_impl(
        &ts.ctx,
        &ts.mm,
        ts.service.llm_for_test(),
        MacroPrepareThreadParams {
            project_key: key.clone(),
            thread_id: "T-1".to_string(),
            program: "claude-code".to_string(),
            model: "opus".to_string(),
            agent_name: Some("GreenCastle".to_string()),
            task_description: String::new(),
            register_if_missing: Some(true),
            include_examples: None,
            inbox_limit: None,
            llm_mode: Some(false),
        },
    )
    .await
    .expect("prepare thread");

    assert_eq!(result["agent"]["name"], "GreenCastle");
    assert_eq!(result["thread"]["total_messages"], 1);
    let summary = &result["thread"]["summary"];
    assert_eq!(summary["open_actions"], 1);
    assert_eq!(summary["participants"][0], "BlueLake");
}
