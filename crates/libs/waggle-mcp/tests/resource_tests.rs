mod common;

use common::TestService;
use waggle_mcp::params::{
    EnsureProjectParams, MessageStateParams, RegisterAgentParams, SendMessageParams,
};
use waggle_mcp::resources;
use waggle_mcp::tools::{agent, messaging, project};

async fn setup_agent(ts: &TestService, key: &str, name: &str) {
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
            task_description: String::new(),
            attachments_policy: None,
        },
    )
    .await
    .expect("register agent");
}

async fn send(ts: &TestService, key: &str, from: &str, to: &str, subject: &str, ack: bool) -> i64 {
    let result = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        SendMessageParams {
            project_key: key.to_string(),
            sender_name: from.to_string(),
            to: vec![to.to_string()],
            subject: subject.to_string(),
            body_md: "body".to_string(),
            cc: None,
            bcc: None,
            importance: Some("urgent".to_string()),
            ack_required: Some(ack),
            thread_id: None,
            attachment_paths: None,
            convert_images: None,
            auto_contact_if_blocked: None,
        },
    )
    .await
    .expect("send");
    result["deliveries"][0]["payload"]["id"].as_i64().expect("id")
}

fn body_json(result: &rmcp::model::ReadResourceResult) -> serde_json::Value {
    match &result.contents[0] {
        rmcp::model::ResourceContents::TextResourceContents { text, .. } => {
            serde_json::from_str(text).expect("json body")
        }
        other => panic!("unexpected contents: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn projects_resource_lists_created_projects() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;

    let result = resources::read_resource_impl(&ts.service, "resource://projects")
        .await
        .expect("read projects");
    let payload = body_json(&result);
    let projects = payload.as_array().expect("array");
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["human_key"], key);
}

#[tokio::test(flavor = "multi_thread")]
async fn agents_directory_includes_unread_counts() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    setup_agent(&ts, &key, "GreenCastle").await;
    send(&ts, &key, "BlueLake", "GreenCastle", "Unread one", false).await;

    let slug = waggle_core::utils::slugs::slugify(&key);
    let result =
        resources::read_resource_impl(&ts.service, &format!("resource://agents/{slug}"))
            .await
            .expect("read agents");
    let payload = body_json(&result);
    let agents = payload["agents"].as_array().expect("agents");
    let green = agents
        .iter()
        .find(|a| a["name"] == "GreenCastle")
        .expect("green in directory");
    assert_eq!(green["unread_count"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn ack_required_view_clears_after_acknowledge() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    setup_agent(&ts, &key, "GreenCastle").await;
    let id = send(&ts, &key, "BlueLake", "GreenCastle", "Please ack", true).await;

    let slug = waggle_core::utils::slugs::slugify(&key);
    let uri = format!("resource://views/ack-required/GreenCastle?project={slug}");

    let before = body_json(
        &resources::read_resource_impl(&ts.service, &uri)
            .await
            .expect("view before"),
    );
    assert_eq!(before["count"], 1);
    assert_eq!(before["messages"][0]["id"], id);

    let first_ack = messaging::acknowledge_message_impl(
        &ts.ctx,
        &ts.mm,
        MessageStateParams {
            project_key: key.clone(),
            agent_name: "GreenCastle".to_string(),
            message_id: id,
        },
    )
    .await
    .expect("acknowledge");

    let after = body_json(
        &resources::read_resource_impl(&ts.service, &uri)
            .await
            .expect("view after"),
    );
    assert_eq!(after["count"], 0);

    // A second acknowledge returns the original timestamps.
    let second_ack = messaging::acknowledge_message_impl(
        &ts.ctx,
        &ts.mm,
        MessageStateParams {
            project_key: key.clone(),
            agent_name: "GreenCastle".to_string(),
            message_id: id,
        },
    )
    .await
    .expect("second acknowledge");
    assert_eq!(first_ack["acknowledged_at"], second_ack["acknowledged_at"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn inbox_resource_accepts_query_in_last_segment() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    send(&ts, &key, "BlueLake", "BlueLake", "Hello", false).await;

    let slug = waggle_core::utils::slugs::slugify(&key);
    let uri = format!("resource://inbox/BlueLake?project={slug}&limit=5&urgent_only=true");
    let payload = body_json(
        &resources::read_resource_impl(&ts.service, &uri)
            .await
            .expect("inbox resource"),
    );
    let items = payload.as_array().expect("array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["subject"], "Hello");
}

#[tokio::test(flavor = "multi_thread")]
async fn thread_resource_returns_ascending_messages() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    let first = send(&ts, &key, "BlueLake", "BlueLake", "Plan", false).await;

    messaging::reply_message_impl(
        &ts.ctx,
        &ts.mm,
        waggle_mcp::params::ReplyMessageParams {
            project_key: key.clone(),
            message_id: first,
            sender_name: "BlueLake".to_string(),
            body_md: "followup".to_string(),
            to: None,
            cc: None,
            bcc: None,
            subject_prefix: None,
        },
    )
    .await
    .expect("reply");

    let slug = waggle_core::utils::slugs::slugify(&key);
    let uri = format!("resource://thread/{first}?project={slug}&include_bodies=true");
    let payload = body_json(
        &resources::read_resource_impl(&ts.service, &uri)
            .await
            .expect("thread resource"),
    );
    let messages = payload["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["id"], first);
}

#[tokio::test(flavor = "multi_thread")]
async fn file_reservations_resource_reflects_lazy_expiry() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;

    waggle_mcp::tools::files::reserve_file_paths_impl(
        &ts.ctx,
        &ts.mm,
        waggle_mcp::params::ReserveFilePathsParams {
            project_key: key.clone(),
            agent_name: "BlueLake".to_string(),
            paths: vec!["src/*".to_string()],
            ttl_seconds: None,
            exclusive: Some(true),
            reason: None,
        },
    )
    .await
    .expect("reserve");

    // Force the reservation into the past, then list: the row must be
    // reported as released.
    let db = ts.mm.db_for_test();
    let stmt = db
        .prepare("UPDATE file_reservations SET expires_ts = '2020-01-01 00:00:00'")
        .await
        .expect("prepare");
    stmt.execute(()).await.expect("expire");

    let slug = waggle_core::utils::slugs::slugify(&key);
    let all = body_json(
        &resources::read_resource_impl(
            &ts.service,
            &format!("resource://file_reservations/{slug}"),
        )
        .await
        .expect("reservations resource"),
    );
    let rows = all.as_array().expect("array");
    assert_eq!(rows.len(), 1);
    assert!(rows[0]["released_ts"].is_string(), "swept as released");

    let active = body_json(
        &resources::read_resource_impl(
            &ts.service,
            &format!("resource://file_reservations/{slug}?active_only=true"),
        )
        .await
        .expect("active reservations resource"),
    );
    assert!(active.as_array().expect("array").is_empty());
}
