/// Concurrency checks against a real WAL database with a multi-connection pool
use futures::future::join_all;
use review_desk::{
    config::ServerConfig,
    db::{self, DatabaseOptions},
    moderation::{ActionType, EntityType, RequestStatus, Snapshot},
    roles::Role,
    AppContext, DeskError,
};
use serde_json::{json, Value};
use tempfile::TempDir;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

/// The directory must outlive the context
async fn setup() -> (TempDir, AppContext, i64) {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::create_pool(&dir.path().join("desk.sqlite"), DatabaseOptions::default())
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();

    let ctx = AppContext::from_pool(ServerConfig::for_testing(SECRET), pool);
    let topic = ctx.topics.create("What I Learned Today", None).await.unwrap();
    (dir, ctx, topic.id)
}

fn content(value: Value) -> Snapshot {
    value.as_object().cloned().unwrap()
}

async fn publish(ctx: &AppContext, topic_id: i64, text: &str) -> i64 {
    let request = ctx
        .intake
        .submit(
            "student-1",
            EntityType::Reflection,
            ActionType::Create,
            None,
            Some(content(json!({"topic_id": topic_id, "content": text}))),
        )
        .await
        .unwrap();
    ctx.resolver
        .approve(request.id, "staff-1")
        .await
        .unwrap()
        .entity_id
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_submissions_succeed_or_conflict() {
    let (_dir, ctx, topic_id) = setup().await;

    let mut reflection_ids = Vec::new();
    for i in 0..8 {
        reflection_ids.push(publish(&ctx, topic_id, &format!("Reflection {}", i)).await);
    }

    for round in 0..5 {
        let handles: Vec<_> = reflection_ids
            .iter()
            .flat_map(|&id| [id, id])
            .enumerate()
            .map(|(i, id)| {
                let intake = ctx.intake.clone();
                tokio::spawn(async move {
                    intake
                        .submit(
                            "student-1",
                            EntityType::Reflection,
                            ActionType::Update,
                            Some(id),
                            Some(content(json!({"content": format!("Round {} edit {}", round, i)}))),
                        )
                        .await
                })
            })
            .collect();

        let mut accepted = 0;
        let mut duplicates = 0;
        for result in join_all(handles).await {
            match result.unwrap() {
                Ok(_) => accepted += 1,
                Err(DeskError::DuplicatePendingRequest { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(accepted, 8, "one accepted edit per reflection");
        assert_eq!(duplicates, 8);
        assert_eq!(ctx.requests.pending_count().await.unwrap(), 8);

        for request in ctx.requests.list(Some(RequestStatus::Pending)).await.unwrap() {
            ctx.resolver.reject(request.id, "staff-1", None).await.unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_resolutions_have_one_winner_each() {
    let (_dir, ctx, topic_id) = setup().await;

    let mut request_ids = Vec::new();
    for i in 0..10 {
        let request = ctx
            .intake
            .submit(
                "student-1",
                EntityType::Reflection,
                ActionType::Create,
                None,
                Some(content(json!({"topic_id": topic_id, "content": format!("Draft {}", i)}))),
            )
            .await
            .unwrap();
        request_ids.push(request.id);
    }

    let handles: Vec<_> = request_ids
        .iter()
        .flat_map(|&id| [(id, true), (id, false)])
        .map(|(id, approve)| {
            let resolver = ctx.resolver.clone();
            tokio::spawn(async move {
                if approve {
                    resolver.approve(id, "staff-1").await
                } else {
                    resolver.reject(id, "staff-2", Some("Too short")).await
                }
            })
        })
        .collect();

    let mut winners = 0;
    for result in join_all(handles).await {
        match result.unwrap() {
            Ok(_) => winners += 1,
            Err(DeskError::AlreadyResolved(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 10);
    assert_eq!(ctx.audit.recent(100).await.unwrap().len(), 10);

    let approved = ctx
        .requests
        .list(Some(RequestStatus::Approved))
        .await
        .unwrap()
        .len();
    assert_eq!(ctx.reflections.fetch_all().await.unwrap().len(), approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_comments_are_all_kept_in_order() {
    let (_dir, ctx, topic_id) = setup().await;
    let id = publish(&ctx, topic_id, "Talk about it").await;

    let handles: Vec<_> = (0..30)
        .map(|i| {
            let comments = ctx.comments.clone();
            tokio::spawn(async move {
                comments
                    .add_comment(id, &format!("parent-{}", i), Role::Parent, &format!("Note {}", i))
                    .await
            })
        })
        .collect();

    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    let thread = ctx.comments.list_comments(id).await.unwrap();
    assert_eq!(thread.len(), 30);
    for pair in thread.windows(2) {
        assert!(pair[0].id < pair[1].id);
        assert!(pair[0].created_at <= pair[1].created_at);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn direct_delete_racing_edits_leaves_nothing_pending() {
    let (_dir, ctx, topic_id) = setup().await;

    for i in 0..6 {
        let id = publish(&ctx, topic_id, &format!("Entry {}", i)).await;

        let edit = tokio::spawn({
            let intake = ctx.intake.clone();
            async move {
                intake
                    .submit(
                        "student-1",
                        EntityType::Reflection,
                        ActionType::Update,
                        Some(id),
                        Some(content(json!({"content": "Late edit"}))),
                    )
                    .await
            }
        });
        let removal = tokio::spawn({
            let reflections = ctx.reflections.clone();
            async move { reflections.delete_direct(id, "staff-1").await }
        });

        removal.await.unwrap().unwrap();
        match edit.await.unwrap() {
            Ok(request) => {
                // The edit landed first and was closed by the delete
                let closed = ctx.requests.get(request.id).await.unwrap();
                assert_eq!(closed.status, RequestStatus::Rejected);
            }
            Err(DeskError::NotFound(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(ctx.requests.pending_count().await.unwrap(), 0);
    assert!(ctx.reflections.fetch_all().await.unwrap().is_empty());
}
