mod common;

use common::TestService;
use waggle_mcp::params::{
    EnsureProjectParams, FetchInboxParams, MessageStateParams, RegisterAgentParams,
    ReplyMessageParams, SendMessageParams, SetContactPolicyParams,
};
use waggle_mcp::tools::{agent, messaging, project};

async fn setup_agent(ts: &TestService, key: &str, name: &str) -> serde_json::Value {
    project::ensure_project_impl(
        &ts.ctx,
        &ts.mm,
        EnsureProjectParams {
            human_key: key.to_string(),
        },
    )
    .await
    .expect("ensure project");
    agent::register_agent_impl(
        &ts.ctx,
        &ts.mm,
        RegisterAgentParams {
            project_key: key.to_string(),
            program: "claude-code".to_string(),
            model: "opus".to_string(),
            name: Some(name.to_string()),
            task_description: "testing".to_string(),
            attachments_policy: None,
        },
    )
    .await
    .expect("register agent")
}

fn send_params(key: &str, from: &str, to: &[&str], subject: &str, body: &str) -> SendMessageParams {
    SendMessageParams {
        project_key: key.to_string(),
        sender_name: from.to_string(),
        to: to.iter().map(|s| s.to_string()).collect(),
        subject: subject.to_string(),
        body_md: body.to_string(),
        cc: None,
        bcc: None,
        importance: None,
        ack_required: None,
        thread_id: None,
        attachment_paths: None,
        convert_images: None,
        auto_contact_if_blocked: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_self_send_lands_in_inbox_and_archive() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;

    let result = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        send_params(&key, "BlueLake", &["BlueLake"], "Test", "hello"),
    )
    .await
    .expect("send");
    assert_eq!(result["count"], 1);
    let message_id = result["deliveries"][0]["payload"]["id"].as_i64().expect("id");
    assert!(message_id > 0);

    let inbox = messaging::fetch_inbox_impl(
        &ts.ctx,
        &ts.mm,
        FetchInboxParams {
            project_key: key.clone(),
            agent_name: "BlueLake".to_string(),
            limit: None,
            urgent_only: None,
            include_bodies: None,
            since_ts: None,
        },
    )
    .await
    .expect("inbox");
    let items = inbox.as_array().expect("array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["subject"], "Test");

    // Canonical markdown exists under messages/YYYY/MM/ and contains the
    // subject plus front-matter fields.
    let slug = waggle_core::utils::slugs::slugify(&key);
    let messages_dir = ts.repo_root().join("projects").join(&slug).join("messages");
    let mut found = None;
    for entry in walk(&messages_dir) {
        if entry.extension().is_some_and(|e| e == "md") {
            found = Some(entry);
            break;
        }
    }
    let canonical = found.expect("canonical markdown written");
    let content = std::fs::read_to_string(canonical).expect("read canonical");
    assert!(content.contains("subject: \"Test\""));
    assert!(content.contains("from: \"BlueLake\""));
    assert!(content.contains("hello"));
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(walk(&path));
            } else {
                out.push(path);
            }
        }
    }
    out
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_recipient_fails_fast_with_structured_payload() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;

    let err = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        send_params(&key, "BlueLake", &["NoSuchAgent"], "Hi", "x"),
    )
    .await
    .expect_err("unknown recipient");
    assert_eq!(err.kind_name(), "RECIPIENT_NOT_FOUND");
    assert!(err.recoverable);
    assert_eq!(err.data["unknown_local"][0], "NoSuchAgent");
    assert!(err.data["hint"].as_str().expect("hint").contains("resource://agents/"));

    // Nothing was persisted.
    let inbox = messaging::fetch_inbox_impl(
        &ts.ctx,
        &ts.mm,
        FetchInboxParams {
            project_key: key.clone(),
            agent_name: "BlueLake".to_string(),
            limit: None,
            urgent_only: None,
            include_bodies: None,
            since_ts: None,
        },
    )
    .await
    .expect("inbox");
    assert!(inbox.as_array().expect("array").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn recipient_normalization_is_case_and_whitespace_insensitive() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;

    let result = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        send_params(&key, "BlueLake", &[" bluelake ", "BlueLake"], "Dup", "x"),
    )
    .await
    .expect("send");
    // Both spellings resolve to the same recipient; one delivery row.
    let payload = &result["deliveries"][0]["payload"];
    assert_eq!(payload["to"].as_array().expect("to").len(), 1);
    assert_eq!(payload["to"][0], "BlueLake");
}

#[tokio::test(flavor = "multi_thread")]
async fn contact_gating_denies_then_auto_allows_via_overlapping_reservations() {
    let mut config = waggle_common::WaggleConfig::default();
    config.contact.enforcement_enabled = true;
    let ts = TestService::new_with_config(config).await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    setup_agent(&ts, &key, "GreenCastle").await;

    agent::set_contact_policy_impl(
        &ts.ctx,
        &ts.mm,
        SetContactPolicyParams {
            project_key: key.clone(),
            agent_name: "GreenCastle".to_string(),
            policy: "contacts_only".to_string(),
        },
    )
    .await
    .expect("set contacts_only");

    let err = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        send_params(&key, "BlueLake", &["GreenCastle"], "Hi", "x"),
    )
    .await
    .expect_err("contacts_only denies");
    assert_eq!(err.kind_name(), "CONTACT_REQUIRED");
    assert_eq!(err.data["recipients_blocked"][0], "GreenCastle");

    // Overlapping active reservations + auto policy allow the same send.
    use waggle_mcp::params::ReserveFilePathsParams;
    use waggle_mcp::tools::files;
    files::reserve_file_paths_impl(
        &ts.ctx,
        &ts.mm,
        ReserveFilePathsParams {
            project_key: key.clone(),
            agent_name: "BlueLake".to_string(),
            paths: vec!["src/*".to_string()],
            ttl_seconds: None,
            exclusive: Some(true),
            reason: None,
        },
    )
    .await
    .expect("alpha reserve");
    files::reserve_file_paths_impl(
        &ts.ctx,
        &ts.mm,
        ReserveFilePathsParams {
            project_key: key.clone(),
            agent_name: "GreenCastle".to_string(),
            paths: vec!["src/app.py".to_string()],
            ttl_seconds: None,
            exclusive: Some(true),
            reason: None,
        },
    )
    .await
    .expect("beta reserve");

    agent::set_contact_policy_impl(
        &ts.ctx,
        &ts.mm,
        SetContactPolicyParams {
            project_key: key.clone(),
            agent_name: "GreenCastle".to_string(),
            policy: "auto".to_string(),
        },
    )
    .await
    .expect("set auto");

    let result = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        send_params(&key, "BlueLake", &["GreenCastle"], "Hi again", "x"),
    )
    .await
    .expect("send passes under auto with overlap");
    assert_eq!(result["count"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn reply_preserves_thread_and_prefixes_subject_once() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    setup_agent(&ts, &key, "GreenCastle").await;

    let sent = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        send_params(&key, "BlueLake", &["GreenCastle"], "Plan", "start"),
    )
    .await
    .expect("send");
    let original_id = sent["deliveries"][0]["payload"]["id"].as_i64().expect("id");

    let reply = messaging::reply_message_impl(
        &ts.ctx,
        &ts.mm,
        ReplyMessageParams {
            project_key: key.clone(),
            message_id: original_id,
            sender_name: "GreenCastle".to_string(),
            body_md: "ack".to_string(),
            to: None,
            cc: None,
            bcc: None,
            subject_prefix: None,
        },
    )
    .await
    .expect("reply");

    assert_eq!(reply["thread_id"], original_id.to_string());
    assert_eq!(reply["reply_to"], original_id);
    let subject = reply["deliveries"][0]["payload"]["subject"].as_str().expect("subject");
    assert!(subject.to_lowercase().starts_with("re:"));

    // Replying to the reply does not stack prefixes.
    let reply_id = reply["deliveries"][0]["payload"]["id"].as_i64().expect("reply id");
    let second = messaging::reply_message_impl(
        &ts.ctx,
        &ts.mm,
        ReplyMessageParams {
            project_key: key.clone(),
            message_id: reply_id,
            sender_name: "BlueLake".to_string(),
            body_md: "thanks".to_string(),
            to: None,
            cc: None,
            bcc: None,
            subject_prefix: None,
        },
    )
    .await
    .expect("second reply");
    let subject = second["deliveries"][0]["payload"]["subject"].as_str().expect("subject");
    assert_eq!(subject, "Re: Plan");
    assert_eq!(second["thread_id"], original_id.to_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn reservation_enforcement_blocks_message_writes() {
    let mut config = waggle_common::WaggleConfig::default();
    config.reservations.enforcement_enabled = true;
    // Keep contact gating out of the way for this scenario.
    config.contact.enforcement_enabled = false;
    let ts = TestService::new_with_config(config).await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    setup_agent(&ts, &key, "GreenCastle").await;

    // GreenCastle exclusively reserves BlueLake's entire mailbox surface.
    use waggle_mcp::params::ReserveFilePathsParams;
    use waggle_mcp::tools::files;
    files::reserve_file_paths_impl(
        &ts.ctx,
        &ts.mm,
        ReserveFilePathsParams {
            project_key: key.clone(),
            agent_name: "GreenCastle".to_string(),
            paths: vec!["agents/BlueLake/outbox/*".to_string()],
            ttl_seconds: None,
            exclusive: Some(true),
            reason: Some("hold".to_string()),
        },
    )
    .await
    .expect("reserve mailbox surface");

    let err = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        send_params(&key, "BlueLake", &["GreenCastle"], "Hi", "x"),
    )
    .await
    .expect_err("reservation conflict");
    assert_eq!(err.kind_name(), "FILE_RESERVATION_CONFLICT");
    assert!(err.recoverable);
    let conflicts = err.data["conflicts"].as_array().expect("conflicts");
    assert!(!conflicts.is_empty());
    assert_eq!(conflicts[0]["holder"], "GreenCastle");
}

#[tokio::test(flavor = "multi_thread")]
async fn shared_reservations_never_block_message_writes() {
    let mut config = waggle_common::WaggleConfig::default();
    config.reservations.enforcement_enabled = true;
    let ts = TestService::new_with_config(config).await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    setup_agent(&ts, &key, "GreenCastle").await;

    // A shared (observe-only) reservation over the whole mailbox surface.
    use waggle_mcp::params::ReserveFilePathsParams;
    use waggle_mcp::tools::files;
    files::reserve_file_paths_impl(
        &ts.ctx,
        &ts.mm,
        ReserveFilePathsParams {
            project_key: key.clone(),
            agent_name: "GreenCastle".to_string(),
            paths: vec!["agents/**".to_string()],
            ttl_seconds: None,
            exclusive: Some(false),
            reason: Some("watching".to_string()),
        },
    )
    .await
    .expect("shared reserve");

    let result = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        send_params(&key, "BlueLake", &["GreenCastle"], "Hi", "x"),
    )
    .await
    .expect("shared reservations gate nothing");
    assert_eq!(result["count"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_agent_name_is_invalid_argument() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;

    let err = messaging::fetch_inbox_impl(
        &ts.ctx,
        &ts.mm,
        FetchInboxParams {
            project_key: key.clone(),
            agent_name: "blue lake!".to_string(),
            limit: None,
            urgent_only: None,
            include_bodies: None,
            since_ts: None,
        },
    )
    .await
    .expect_err("bad charset rejected before lookup");
    assert_eq!(err.kind_name(), "INVALID_ARGUMENT");
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_read_and_acknowledge_are_idempotent_via_tools() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;

    let sent = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        send_params(&key, "BlueLake", &["BlueLake"], "Note", "x"),
    )
    .await
    .expect("send");
    let id = sent["deliveries"][0]["payload"]["id"].as_i64().expect("id");

    let params = || MessageStateParams {
        project_key: key.clone(),
        agent_name: "BlueLake".to_string(),
        message_id: id,
    };

    let first = messaging::acknowledge_message_impl(&ts.ctx, &ts.mm, params())
        .await
        .expect("ack");
    assert_eq!(first["acknowledged"], true);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let second = messaging::acknowledge_message_impl(&ts.ctx, &ts.mm, params())
        .await
        .expect("ack again");
    assert_eq!(first["acknowledged_at"], second["acknowledged_at"]);
    assert_eq!(first["read_at"], second["read_at"]);
}
