//! Room lifecycle scenarios and notification bus concurrency

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use rg_core::{Permissions, RoomError, SessionContext, SessionDataStore};
use rg_gateway::bridge::ClientHandle;
use rg_gateway::notify::NotificationBus;
use rg_gateway::room::{NewRoom, RoomRegistry};
use rg_gateway::Services;

const SESSION: &str = "s-1";

fn registry() -> RoomRegistry {
    RoomRegistry::new(
        4,
        Arc::new(SessionDataStore::<SessionContext>::new()),
        Services::in_memory(),
    )
}

fn open(registry: &RoomRegistry, creator: &str) -> ClientHandle {
    let (handle, _rx) = ClientHandle::new();
    registry
        .create_room(
            NewRoom {
                session_id: SESSION.to_string(),
                creator_id: creator.to_string(),
                app_id: "app-1".to_string(),
                app_name: "Finance Desktop".to_string(),
                backend_connection_id: "$conn".to_string(),
                sharing_allowed: true,
                recording: None,
            },
            handle.clone(),
        )
        .unwrap();
    handle
}

fn join(registry: &RoomRegistry, user: &str, permissions: &str) -> ClientHandle {
    let (handle, _rx) = ClientHandle::new();
    registry
        .join_room(SESSION, user, handle.clone(), Permissions::parse(permissions))
        .unwrap();
    handle
}

#[tokio::test]
async fn test_single_admin_leaves_alone() {
    let registry = registry();
    open(&registry, "user1");

    registry.leave_room(SESSION, "user1").await.unwrap();
    assert!(registry.get(SESSION).is_none());
}

#[tokio::test]
async fn test_cohost_keeps_room_open() {
    let registry = registry();
    open(&registry, "user1");
    join(&registry, "user2", "admin");

    registry.leave_room(SESSION, "user1").await.unwrap();
    let room = registry.get(SESSION).unwrap();
    assert_eq!(room.participant_ids(), vec!["user2".to_string()]);
}

#[tokio::test]
async fn test_viewer_leaves_admin_remains() {
    let registry = registry();
    open(&registry, "user1");
    registry
        .add_invitee(SESSION, "user2", Permissions::parse("mouse"))
        .unwrap();
    join(&registry, "user2", "mouse");

    registry.leave_room(SESSION, "user2").await.unwrap();
    let room = registry.get(SESSION).unwrap();
    assert_eq!(room.participant_count(), 1);
    // The invitation survives the departure
    assert_eq!(room.invitee("user2"), Some(Permissions::parse("mouse")));
}

#[tokio::test]
async fn test_last_privileged_leaving_closes_despite_viewers() {
    let registry = registry();
    open(&registry, "user1");
    let viewer = join(&registry, "user2", "mouse,keyboard");

    registry.leave_room(SESSION, "user1").await.unwrap();
    assert!(registry.get(SESSION).is_none());
    assert!(viewer.is_closed());
}

#[tokio::test]
async fn test_invitee_capacity() {
    let registry = registry();
    open(&registry, "user1");

    for i in 2..=5 {
        registry
            .add_invitee(SESSION, &format!("user{}", i), Permissions::parse("mouse"))
            .unwrap();
    }
    let err = registry
        .add_invitee(SESSION, "user6", Permissions::parse("mouse"))
        .unwrap_err();
    assert!(matches!(err, RoomError::InviteeLimit { limit: 4 }));

    let room = registry.get(SESSION).unwrap();
    assert_eq!(room.invitee_count(), 5);
    assert!(room.invitee("user6").is_none());

    // Re-granting an existing invitee is not a new invitation
    registry
        .add_invitee(SESSION, "user2", Permissions::parse("admin"))
        .unwrap();
    assert_eq!(room.invitee("user2"), Some(Permissions::parse("admin")));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let registry = registry();
    let host = open(&registry, "user1");

    assert!(registry.close(SESSION).await);
    assert!(host.is_closed());
    assert!(!registry.close(SESSION).await);
    assert!(registry.is_empty());
    assert!(matches!(
        registry.join_room(SESSION, "user1", ClientHandle::new().0, Permissions::full()),
        Err(RoomError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_broadcasts_never_lose_every_signal() {
    let bus = Arc::new(NotificationBus::new());
    let mut subscriptions: Vec<_> = (0..8)
        .map(|_| bus.subscribe_all(&["app-1"], Uuid::new_v4()))
        .collect();

    let stop = Arc::new(AtomicBool::new(false));
    let broadcasters: Vec<_> = (0..16)
        .map(|_| {
            let bus = Arc::clone(&bus);
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                let mut sent = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    sent += bus.broadcast("app-1");
                    tokio::task::yield_now().await;
                }
                sent
            })
        })
        .collect();

    // Every subscriber keeps being woken while the broadcasters run
    for _ in 0..3 {
        for subscription in subscriptions.iter_mut() {
            let woken = tokio::time::timeout(Duration::from_secs(2), subscription.changed()).await;
            assert_eq!(woken.ok(), Some(true));
        }
    }

    stop.store(true, Ordering::Relaxed);
    let mut total = 0;
    for broadcaster in broadcasters {
        total += broadcaster.await.unwrap();
    }
    assert!(total >= 8 * 3);

    drop(subscriptions);
    assert_eq!(bus.subscriber_count("app-1"), 0);
}
