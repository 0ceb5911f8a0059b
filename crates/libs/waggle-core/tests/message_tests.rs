mod common;

use common::{TestContext, seed_project_and_agent};
use waggle_core::model::agent::{AgentBmc, AgentForCreate};
use waggle_core::model::message::{
    InboxFilter, MessageBmc, MessageForCreate, RecipientForCreate,
};

async fn send(
    tc: &TestContext,
    project_id: i64,
    sender_id: i64,
    to: &[i64],
    subject: &str,
    body: &str,
    thread_id: Option<&str>,
    importance: &str,
    ack_required: bool,
) -> i64 {
    MessageBmc::create(
        &tc.ctx,
        &tc.mm,
        MessageForCreate {
            project_id,
            sender_id,
            recipients: to
                .iter()
                .map(|id| RecipientForCreate {
                    agent_id: *id,
                    kind: "to",
                })
                .collect(),
            subject: subject.to_string(),
            body_md: body.to_string(),
            thread_id: thread_id.map(String::from),
            importance: importance.to_string(),
            ack_required,
            attachments: vec![],
        },
    )
    .await
    .expect("create message")
}

#[tokio::test(flavor = "multi_thread")]
async fn create_requires_a_recipient() {
    let tc = TestContext::new().await.expect("test context");
    let (project, agent) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");

    let err = MessageBmc::create(
        &tc.ctx,
        &tc.mm,
        MessageForCreate {
            project_id: project.id,
            sender_id: agent.id,
            recipients: vec![],
            subject: "empty".to_string(),
            body_md: "body".to_string(),
            thread_id: None,
            importance: "normal".to_string(),
            ack_required: false,
            attachments: vec![],
        },
    )
    .await
    .expect_err("no recipients");
    assert!(matches!(err, waggle_core::Error::InvalidInput(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn inbox_lists_newest_first_with_sender_and_kind() {
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

    let first = send(&tc, project.id, alpha.id, &[beta.id], "first", "a", None, "normal", false).await;
    let second = send(&tc, project.id, alpha.id, &[beta.id], "second", "b", None, "urgent", false).await;

    let inbox = MessageBmc::list_inbox(
        &tc.ctx,
        &tc.mm,
        project.id,
        beta.id,
        &InboxFilter {
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .expect("inbox");

    assert_eq!(inbox.len(), 2);
    assert_eq!(inbox[0].message.id, second);
    assert_eq!(inbox[1].message.id, first);
    assert_eq!(inbox[0].message.sender_name, "BlueLake");
    assert_eq!(inbox[0].kind, "to");

    let urgent_only = MessageBmc::list_inbox(
        &tc.ctx,
        &tc.mm,
        project.id,
        beta.id,
        &InboxFilter {
            urgent_only: true,
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .expect("urgent inbox");
    assert_eq!(urgent_only.len(), 1);
    assert_eq!(urgent_only[0].message.id, second);
}

#[tokio::test(flavor = "multi_thread")]
async fn sender_last_active_bumps_on_send() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");

    send(&tc, project.id, alpha.id, &[alpha.id], "self", "note", None, "normal", false).await;

    let refreshed = AgentBmc::get(&tc.ctx, &tc.mm, alpha.id).await.expect("get");
    assert!(refreshed.last_active_ts >= alpha.last_active_ts);
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_read_is_set_once() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");
    let id = send(&tc, project.id, alpha.id, &[alpha.id], "hi", "x", None, "normal", false).await;

    let first = MessageBmc::mark_read(&tc.ctx, &tc.mm, id, alpha.id)
        .await
        .expect("mark read")
        .expect("recipient exists");
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let second = MessageBmc::mark_read(&tc.ctx, &tc.mm, id, alpha.id)
        .await
        .expect("mark read again")
        .expect("recipient exists");

    assert_eq!(first, second, "second call must return the original timestamp");
}

#[tokio::test(flavor = "multi_thread")]
async fn acknowledge_sets_read_as_side_effect_and_is_idempotent() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");
    let id = send(&tc, project.id, alpha.id, &[alpha.id], "ack me", "x", None, "high", true).await;

    let (read_first, ack_first) = MessageBmc::acknowledge(&tc.ctx, &tc.mm, id, alpha.id)
        .await
        .expect("acknowledge");
    assert!(read_first.is_some());
    assert!(ack_first.is_some());

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let (read_second, ack_second) = MessageBmc::acknowledge(&tc.ctx, &tc.mm, id, alpha.id)
        .await
        .expect("acknowledge again");
    assert_eq!(read_first, read_second);
    assert_eq!(ack_first, ack_second);
}

#[tokio::test(flavor = "multi_thread")]
async fn thread_collects_by_key_and_numeric_seed() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");

    let seed = send(&tc, project.id, alpha.id, &[alpha.id], "Plan", "start", None, "normal", false).await;
    let reply_key = seed.to_string();
    let reply =
        send(&tc, project.id, alpha.id, &[alpha.id], "Re: Plan", "ack", Some(&reply_key), "normal", false).await;

    let thread = MessageBmc::list_thread(&tc.ctx, &tc.mm, project.id, &reply_key)
        .await
        .expect("thread");
    let ids: Vec<i64> = thread.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![seed, reply], "ascending order, seed included by id");
}

#[tokio::test(flavor = "multi_thread")]
async fn search_ranks_and_survives_junk_queries() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");

    send(&tc, project.id, alpha.id, &[alpha.id], "Build plan", "the build plan for users", None, "normal", false).await;
    send(&tc, project.id, alpha.id, &[alpha.id], "Lunch", "tacos", None, "normal", false).await;

    let hits = MessageBmc::search(&tc.ctx, &tc.mm, project.id, "\"build plan\"", 10)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].subject, "Build plan");

    let prefix_hits = MessageBmc::search(&tc.ctx, &tc.mm, project.id, "buil*", 10)
        .await
        .expect("prefix search");
    assert_eq!(prefix_hits.len(), 1);

    // Junk and syntactically broken queries degrade to empty, not error.
    assert!(MessageBmc::search(&tc.ctx, &tc.mm, project.id, "*", 10).await.expect("junk").is_empty());
    assert!(
        MessageBmc::search(&tc.ctx, &tc.mm, project.id, "\"unbalanced", 10)
            .await
            .expect("broken syntax")
            .is_empty()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn ack_pending_view_clears_on_acknowledge() {
    let tc = TestContext::new().await.expect("test context");
    let (project, alpha) = seed_project_and_agent(&tc, "/p", "BlueLake").await.expect("seed");
    let id = send(&tc, project.id, alpha.id, &[alpha.id], "need ack", "x", None, "urgent", true).await;

    let pending = MessageBmc::list_ack_pending(&tc.ctx, &tc.mm, project.id, alpha.id, None, 10)
        .await
        .expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message.id, id);

    MessageBmc::acknowledge(&tc.ctx, &tc.mm, id, alpha.id)
        .await
        .expect("acknowledge");

    let pending = MessageBmc::list_ack_pending(&tc.ctx, &tc.mm, project.id, alpha.id, None, 10)
        .await
        .expect("pending after ack");
    assert!(pending.is_empty());
}
