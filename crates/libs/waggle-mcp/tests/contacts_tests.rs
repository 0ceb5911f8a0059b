mod common;

use common::TestService;
use waggle_mcp::params::{
    EnsureProjectParams, FetchInboxParams, MacroContactHandshakeParams, RegisterAgentParams,
    RequestContactParams, RespondContactParams, SendMessageParams, SetContactPolicyParams,
};
use waggle_mcp::tools::{agent, contacts, macros, messaging, project};

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

#[tokio::test(flavor = "multi_thread")]
async fn request_contact_creates_pending_link_and_intro_message() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    setup_agent(&ts, &key, "GreenCastle").await;

    let result = contacts::request_contact_impl(
        &ts.ctx,
        &ts.mm,
        RequestContactParams {
            project_key: key.clone(),
            from_agent: "BlueLake".to_string(),
            to_agent: "GreenCastle".to_string(),
            to_project: None,
            reason: Some("coordinating the migration".to_string()),
            ttl_seconds: None,
            register_if_missing: None,
        },
    )
    .await
    .expect("request contact");
    assert_eq!(result["status"], "pending");
    assert_eq!(result["to"], "GreenCastle");

    // The ack-required introduction landed despite no prior link.
    let inbox = messaging::fetch_inbox_impl(
        &ts.ctx,
        &ts.mm,
        FetchInboxParams {
            project_key: key.clone(),
            agent_name: "GreenCastle".to_string(),
            limit: None,
            urgent_only: None,
            include_bodies: Some(true),
            since_ts: None,
        },
    )
    .await
    .expect("inbox");
    let items = inbox.as_array().expect("array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["ack_required"], true);
    assert!(
        items[0]["subject"]
            .as_str()
            .expect("subject")
            .contains("Contact request from BlueLake")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn respond_contact_approves_and_unlocks_contacts_only_sends() {
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
    .expect("set policy");

    contacts::request_contact_impl(
        &ts.ctx,
        &ts.mm,
        RequestContactParams {
            project_key: key.clone(),
            from_agent: "BlueLake".to_string(),
            to_agent: "GreenCastle".to_string(),
            to_project: None,
            reason: None,
            ttl_seconds: None,
            register_if_missing: None,
        },
    )
    .await
    .expect("request");

    let response = contacts::respond_contact_impl(
        &ts.ctx,
        &ts.mm,
        RespondContactParams {
            project_key: key.clone(),
            to_agent: "GreenCastle".to_string(),
            from_agent: "BlueLake".to_string(),
            accept: true,
            ttl_seconds: Some(3600),
            from_project: None,
        },
    )
    .await
    .expect("respond");
    assert_eq!(response["approved"], true);
    assert_eq!(response["status"], "approved");

    let result = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        SendMessageParams {
            project_key: key.clone(),
            sender_name: "BlueLake".to_string(),
            to: vec!["GreenCastle".to_string()],
            subject: "After approval".to_string(),
            body_md: "now allowed".to_string(),
            cc: None,
            bcc: None,
            importance: None,
            ack_required: None,
            thread_id: None,
            attachment_paths: None,
            convert_images: None,
            auto_contact_if_blocked: None,
        },
    )
    .await
    .expect("send after approval");
    assert_eq!(result["count"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocked_response_denies_hard() {
    let mut config = waggle_common::WaggleConfig::default();
    config.contact.enforcement_enabled = true;
    let ts = TestService::new_with_config(config).await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    setup_agent(&ts, &key, "GreenCastle").await;

    contacts::respond_contact_impl(
        &ts.ctx,
        &ts.mm,
        RespondContactParams {
            project_key: key.clone(),
            to_agent: "GreenCastle".to_string(),
            from_agent: "BlueLake".to_string(),
            accept: false,
            ttl_seconds: None,
            from_project: None,
        },
    )
    .await
    .expect("block");

    let err = messaging::send_message_impl(
        &ts.ctx,
        &ts.mm,
        SendMessageParams {
            project_key: key.clone(),
            sender_name: "BlueLake".to_string(),
            to: vec!["GreenCastle".to_string()],
            subject: "Hi".to_string(),
            body_md: "x".to_string(),
            cc: None,
            bcc: None,
            importance: None,
            ack_required: Some(true),
            thread_id: None,
            attachment_paths: None,
            convert_images: None,
            auto_contact_if_blocked: None,
        },
    )
    .await
    .expect_err("blocked link denies even ack-required traffic");
    assert_eq!(err.kind_name(), "CONTACT_BLOCKED");
    assert!(!err.recoverable);
}

#[tokio::test(flavor = "multi_thread")]
async fn list_contacts_shows_outgoing_links() {
    let ts = TestService::new().await;
    let key = ts.project_key("backend");
    setup_agent(&ts, &key, "BlueLake").await;
    setup_agent(&ts, &key, "GreenCastle").await;

    contacts::request_contact_impl(
        &ts.ctx,
        &ts.mm,
        RequestContactParams {
            project_key: key.clone(),
            from_agent: "BlueLake".to_string(),
            to_agent: "GreenCastle".to_string(),
            to_project: None,
            reason: Some("intro".to_string()),
            ttl_seconds: None,
            register_if_missing: None,
        },
    )
    .await
    .expect("request");

    let contacts_list = contacts::list_contacts_impl(
        &ts.ctx,
        &ts.mm,
        waggle_mcp::params::ListContactsParams {
            project_key: key.clone(),
            agent_name: "BlueLake".to_string(),
        },
    )
    .await
    .expect("list");
    let entries = contacts_list.as_array().expect("array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["to"], "GreenCastle");
    assert_eq!(entries[0]["status"], "pending");
}

#[tokio::test(flavor = "multi_thread")]
async fn handshake_macro_auto_accepts_and_sends_welcome() {
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
    .expect("set policy");

    let result = macros::contact_handshake_impl(
        &ts.ctx,
        &ts.mm,
        MacroContactHandshakeParams {
            project_key: key.clone(),
            requester: "BlueLake".to_string(),
            target: "GreenCastle".to_string(),
            reason: None,
            ttl_seconds: Some(3600),
            auto_accept: Some(true),
            welcome_subject: Some("Welcome".to_string()),
            welcome_body: Some("glad to coordinate".to_string()),
            to_project: None,
            register_if_missing: None,
            program: None,
            model: None,
        },
    )
    .await
    .expect("handshake");

    assert_eq!(result["request"]["status"], "pending");
    assert_eq!(result["response"]["approved"], true);
    assert!(result["welcome_message"]["count"].is_number());
}
