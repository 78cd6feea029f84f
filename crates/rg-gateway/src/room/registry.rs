//! Process-wide room registry

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::gauge;

use rg_core::traits::{tags, AuditEvent};
use rg_core::{Permissions, RoomError, SessionContext, SessionDataStore};
use rg_protocol::{opcode, Instruction};

use super::{
    handles, has_privileged, members_instruction, push_all, route_key, snapshot, Departure,
    Grants, NewRoom, Participant, Room, RoomState,
};
use crate::bridge::ClientHandle;
use crate::metrics::ROOMS_ACTIVE;
use crate::services::Services;

/// All open rooms of this gateway, keyed by session id
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Room>>,
    invitee_limit: usize,
    sessions: Arc<SessionDataStore<SessionContext>>,
    services: Services,
}

impl RoomRegistry {
    pub fn new(
        invitee_limit: usize,
        sessions: Arc<SessionDataStore<SessionContext>>,
        services: Services,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            invitee_limit,
            sessions,
            services,
        }
    }

    /// Maximum number of invitees besides the creator
    pub fn invitee_limit(&self) -> usize {
        self.invitee_limit
    }

    /// Open a room with its creator as host and sole invitee
    pub fn create_room(
        &self,
        new: NewRoom,
        handle: ClientHandle,
    ) -> Result<Arc<Participant>, RoomError> {
        match self.rooms.entry(new.session_id.clone()) {
            Entry::Occupied(entry) => Err(RoomError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                let creator = Arc::new(Participant::new(
                    new.creator_id.clone(),
                    handle,
                    Grants::host(),
                ));
                tracing::info!(
                    "Room {} created by {} for app {}",
                    new.session_id,
                    new.creator_id,
                    new.app_id
                );
                entry.insert(Arc::new(Room::open(new, Arc::clone(&creator))));
                gauge!(ROOMS_ACTIVE).increment(1.0);
                Ok(creator)
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(session_id).map(|r| Arc::clone(&r))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.rooms.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.rooms.iter().map(|r| r.key().clone()).collect()
    }

    fn open_room(&self, session_id: &str) -> Result<Arc<Room>, RoomError> {
        self.get(session_id)
            .ok_or_else(|| RoomError::NotFound(session_id.to_string()))
    }

    /// Grant `user_id` the right to join.
    ///
    /// A user already invited has their grant replaced; a new invitee fails
    /// once the limit is reached.
    pub fn add_invitee(
        &self,
        session_id: &str,
        user_id: &str,
        permissions: Permissions,
    ) -> Result<(), RoomError> {
        let room = self.open_room(session_id)?;
        if user_id == room.creator_id {
            return Ok(());
        }

        let mut state = room.state.lock();
        if state.closed {
            return Err(RoomError::Closed(session_id.to_string()));
        }
        if !state.invitees.contains_key(user_id) {
            let invited = state
                .invitees
                .keys()
                .filter(|u| u.as_str() != room.creator_id)
                .count();
            if invited >= self.invitee_limit {
                return Err(RoomError::InviteeLimit {
                    limit: self.invitee_limit,
                });
            }
        }
        state.invitees.insert(user_id.to_string(), permissions);
        tracing::debug!("Invited {} to room {} ({})", user_id, session_id, permissions);
        Ok(())
    }

    /// Attach a connection to an existing room.
    ///
    /// The creator rejoins as host; anyone else gets the role of their grant.
    /// Every participant then receives the new membership snapshot.
    pub fn join_room(
        &self,
        session_id: &str,
        user_id: &str,
        handle: ClientHandle,
        permissions: Permissions,
    ) -> Result<Arc<Participant>, RoomError> {
        let room = self.open_room(session_id)?;

        let mut state = room.state.lock();
        if state.closed {
            return Err(RoomError::Closed(session_id.to_string()));
        }
        if state.participants.contains_key(user_id) {
            return Err(RoomError::AlreadyJoined(user_id.to_string()));
        }

        let grants = if user_id == room.creator_id {
            Grants::host()
        } else {
            Grants::for_grant(&permissions)
        };
        let participant = Arc::new(Participant::new(user_id, handle, grants));
        state
            .participants
            .insert(user_id.to_string(), Arc::clone(&participant));
        tracing::info!(
            "{} joined room {} as {} ({} connected)",
            user_id,
            session_id,
            grants.role,
            state.participants.len()
        );

        push_all(&handles(&state), &members_instruction(&snapshot(&state)));
        Ok(participant)
    }

    /// Remove `user_id`'s participant entry. Their invitation is kept.
    pub async fn leave_room(&self, session_id: &str, user_id: &str) -> Result<(), RoomError> {
        let room = self.open_room(session_id)?;
        let departure = {
            let mut state = room.state.lock();
            if state.closed || state.participants.remove(user_id).is_none() {
                return Ok(());
            }
            let notify = state.invitees.len() > 1;
            evaluate(&state, notify)
        };
        self.settle(&room, departure).await;
        Ok(())
    }

    /// Leave on behalf of the transport behind `handle`.
    ///
    /// Only removes the participant entry that belongs to this connection, so
    /// a stale connection cannot evict a user who has since rejoined.
    /// Returns whether an entry was removed.
    pub async fn leave_connection(
        &self,
        session_id: &str,
        handle: &ClientHandle,
    ) -> Result<bool, RoomError> {
        let room = self.open_room(session_id)?;
        let departure = {
            let mut state = room.state.lock();
            if state.closed {
                return Ok(false);
            }
            let user_id = state
                .participants
                .iter()
                .find(|(_, p)| p.is_connection(handle))
                .map(|(user_id, _)| user_id.clone());
            let Some(user_id) = user_id else {
                return Ok(false);
            };
            state.participants.remove(&user_id);
            tracing::info!("{} left room {}", user_id, session_id);
            let notify = state.invitees.len() > 1;
            evaluate(&state, notify)
        };
        self.settle(&room, departure).await;
        Ok(true)
    }

    /// Revoke `user_id`'s invitation and disconnect them if connected
    pub async fn remove_user(&self, session_id: &str, user_id: &str) -> Result<(), RoomError> {
        let room = self.open_room(session_id)?;
        if user_id == room.creator_id {
            return Err(RoomError::CannotRemoveCreator);
        }

        let departure = {
            let mut state = room.state.lock();
            if state.closed {
                return Err(RoomError::Closed(session_id.to_string()));
            }
            state.invitees.remove(user_id);
            if let Some(participant) = state.participants.remove(user_id) {
                disconnect(&participant, session_id);
            }
            evaluate(&state, false)
        };
        tracing::info!("Removed {} from room {}", user_id, session_id);
        self.settle(&room, departure).await;
        Ok(())
    }

    /// Change the grant of `user_id`.
    ///
    /// The stored invitation is updated so a later rejoin inherits it. A
    /// connected participant takes the new role at once and is told its new
    /// permission. The creator always stays host. Returns whether a connected
    /// participant was updated. A user who is neither invited nor connected
    /// is refused, so new users only enter through [`Self::add_invitee`].
    pub async fn set_permission(
        &self,
        session_id: &str,
        user_id: &str,
        permissions: Permissions,
    ) -> Result<bool, RoomError> {
        let room = self.open_room(session_id)?;
        if user_id == room.creator_id {
            return Ok(false);
        }

        let (updated, departure) = {
            let mut state = room.state.lock();
            if state.closed {
                return Err(RoomError::Closed(session_id.to_string()));
            }
            if !state.invitees.contains_key(user_id) && !state.participants.contains_key(user_id) {
                return Err(RoomError::NotInvited(user_id.to_string()));
            }
            if let Some(stored) = state.invitees.get_mut(user_id) {
                *stored = permissions;
            }
            let updated = match state.participants.get(user_id) {
                Some(participant) => {
                    let grants = Grants::for_grant(&permissions);
                    participant.set_grants(grants);
                    participant.handle().try_send(&Instruction::new(
                        opcode::USER_PERMISSION,
                        [grants.permissions().to_string()],
                    ));
                    true
                }
                None => false,
            };
            (updated, evaluate(&state, false))
        };
        tracing::info!(
            "Set permission {} for {} in room {}",
            permissions,
            user_id,
            session_id
        );
        self.settle(&room, departure).await;
        Ok(updated)
    }

    /// End sharing: drop every invitation but the creator's and disconnect
    /// everyone else. The creator receives an empty membership snapshot.
    /// Returns the users whose invitation was revoked.
    pub async fn stop_share(&self, session_id: &str) -> Result<Vec<String>, RoomError> {
        let room = self.open_room(session_id)?;

        let (revoked, departure) = {
            let mut state = room.state.lock();
            if state.closed {
                return Err(RoomError::Closed(session_id.to_string()));
            }
            let creator_id = room.creator_id.as_str();

            let revoked: Vec<String> = state
                .invitees
                .keys()
                .filter(|u| u.as_str() != creator_id)
                .cloned()
                .collect();
            state.invitees.retain(|u, _| u == creator_id);

            let kicked: Vec<Arc<Participant>> = state
                .participants
                .values()
                .filter(|p| p.user_id() != creator_id)
                .cloned()
                .collect();
            state.participants.retain(|u, _| u == creator_id);
            for participant in &kicked {
                disconnect(participant, session_id);
            }

            if let Some(creator) = state.participants.get(creator_id) {
                creator.handle().try_send(&members_instruction(&[]));
            }
            (revoked, evaluate(&state, false))
        };
        tracing::info!(
            "Stopped sharing room {} ({} invitations revoked)",
            session_id,
            revoked.len()
        );
        self.settle(&room, departure).await;
        Ok(revoked)
    }

    /// A room `creator_id` opened for `app_id` and is not connected to
    pub fn find_reconnectable(&self, app_id: &str, creator_id: &str) -> Option<Arc<Room>> {
        self.rooms
            .iter()
            .find(|r| {
                r.creator_id == creator_id
                    && r.app_id == app_id
                    && !r.is_closed()
                    && !r.is_connected(creator_id)
            })
            .map(|r| Arc::clone(r.value()))
    }

    /// Push the current membership snapshot to every participant
    pub fn push_members(&self, session_id: &str) -> Result<(), RoomError> {
        let room = self.open_room(session_id)?;
        let state = room.state.lock();
        push_all(&handles(&state), &members_instruction(&snapshot(&state)));
        Ok(())
    }

    /// Run the close cascade for `session_id`. Returns false when the room
    /// was already gone.
    pub async fn close(&self, session_id: &str) -> bool {
        match self.get(session_id) {
            Some(room) => self.close_room(&room).await,
            None => false,
        }
    }

    async fn settle(&self, room: &Arc<Room>, departure: Departure) {
        match departure {
            Departure::Close => {
                self.close_room(room).await;
            }
            Departure::Notify(handles, members) => push_all(&handles, &members),
            Departure::Unchanged => {}
        }
    }

    /// Close cascade. Each step runs even when an earlier one failed.
    async fn close_room(&self, room: &Arc<Room>) -> bool {
        let participants = {
            let mut state = room.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            std::mem::take(&mut state.participants)
        };
        let session_id = room.session_id();

        for participant in participants.values() {
            tracing::debug!("Disconnecting {} from room {}", participant.user_id(), session_id);
            participant.handle().close();
        }

        if self
            .rooms
            .remove_if(session_id, |_, r| Arc::ptr_eq(r, room))
            .is_some()
        {
            gauge!(ROOMS_ACTIVE).decrement(1.0);
        }

        let context = self.sessions.remove(session_id);

        if let Err(e) = self
            .services
            .repository
            .delete_active_session(session_id)
            .await
        {
            tracing::error!("Failed to delete session record {}: {}", session_id, e);
        }

        if let Err(e) = self.services.route_cache.delete(&route_key(session_id)).await {
            tracing::error!("Failed to delete route of {}: {}", session_id, e);
        }

        if let Some(job) = &room.recording {
            if let Err(e) = self.services.recordings.enqueue(job).await {
                tracing::error!("Failed to enqueue recording {}: {}", job.recording_id, e);
            }
        }

        if let Some(context) = context.filter(|c| c.is_authenticated()) {
            self.services.audit.record(
                AuditEvent::for_session(tags::EXIT, &context).with_user(room.creator_id()),
            );
        }

        tracing::info!(
            "Room {} closed ({} rooms, {} sessions open)",
            session_id,
            self.rooms.len(),
            self.sessions.len()
        );
        true
    }
}

/// Decide what follows a departure. A room without a privileged
/// participant closes; otherwise `notify` pushes the new snapshot.
fn evaluate(state: &RoomState, notify: bool) -> Departure {
    if !has_privileged(state) {
        Departure::Close
    } else if notify {
        Departure::Notify(handles(state), members_instruction(&snapshot(state)))
    } else {
        Departure::Unchanged
    }
}

fn disconnect(participant: &Participant, session_id: &str) {
    participant
        .handle()
        .try_send(&Instruction::new(opcode::REMOVE_SHARE, [session_id]));
    participant.handle().close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::adapters::MemoryBackend;
    use rg_core::traits::RouteCache;
    use rg_core::{Role, SessionIdentity};

    fn registry() -> (RoomRegistry, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let registry = RoomRegistry::new(
            4,
            Arc::new(SessionDataStore::new()),
            Services::with_backend(backend.clone()),
        );
        (registry, backend)
    }

    fn new_room(session_id: &str, creator: &str) -> NewRoom {
        NewRoom {
            session_id: session_id.to_string(),
            creator_id: creator.to_string(),
            app_id: "app1".to_string(),
            app_name: "Finance Desktop".to_string(),
            backend_connection_id: "$conn".to_string(),
            sharing_allowed: true,
            recording: None,
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_create_room_twice_fails() {
        let (registry, _) = registry();
        let (h1, _rx1) = ClientHandle::new();
        let (h2, _rx2) = ClientHandle::new();

        let host = registry.create_room(new_room("s1", "user1"), h1).unwrap();
        assert_eq!(host.role(), Role::Host);
        assert!(matches!(
            registry.create_room(new_room("s1", "user2"), h2),
            Err(RoomError::AlreadyExists(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_join_pushes_members_to_everyone() {
        let (registry, _) = registry();
        let (h1, mut rx1) = ClientHandle::new();
        let (h2, mut rx2) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1).unwrap();
        registry
            .add_invitee("s1", "user2", Permissions::parse("mouse"))
            .unwrap();

        let viewer = registry
            .join_room("s1", "user2", h2, Permissions::parse("mouse"))
            .unwrap();
        assert_eq!(viewer.role(), Role::Viewer);

        let to_host = drain(&mut rx1);
        let to_viewer = drain(&mut rx2);
        assert_eq!(to_host.len(), 1);
        assert_eq!(to_host, to_viewer);
        assert!(to_host[0].starts_with("7.members,"));
    }

    #[tokio::test]
    async fn test_join_twice_is_refused() {
        let (registry, _) = registry();
        let (h1, _rx1) = ClientHandle::new();
        let (h2, _rx2) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1).unwrap();
        assert!(matches!(
            registry.join_room("s1", "user1", h2, Permissions::default()),
            Err(RoomError::AlreadyJoined(_))
        ));
    }

    #[tokio::test]
    async fn test_creator_rejoins_as_host() {
        let (registry, _) = registry();
        let (h1, _rx1) = ClientHandle::new();
        let (h2, _rx2) = ClientHandle::new();
        let (h3, _rx3) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1.clone()).unwrap();
        registry
            .join_room("s1", "user2", h2, Permissions::parse("admin"))
            .unwrap();

        registry.leave_connection("s1", &h1).await.unwrap();
        let room = registry.find_reconnectable("app1", "user1").unwrap();
        assert_eq!(room.session_id(), "s1");

        let host = registry
            .join_room("s1", "user1", h3, Permissions::default())
            .unwrap();
        assert_eq!(host.role(), Role::Host);
        assert!(registry.find_reconnectable("app1", "user1").is_none());
    }

    #[tokio::test]
    async fn test_stale_connection_does_not_evict_rejoined_user() {
        let (registry, _) = registry();
        let (h1, _rx1) = ClientHandle::new();
        let (old, _rx_old) = ClientHandle::new();
        let (new, _rx_new) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1).unwrap();
        registry
            .add_invitee("s1", "user2", Permissions::parse("mouse"))
            .unwrap();

        registry
            .join_room("s1", "user2", old.clone(), Permissions::parse("mouse"))
            .unwrap();
        registry.leave_room("s1", "user2").await.unwrap();
        registry
            .join_room("s1", "user2", new, Permissions::parse("mouse"))
            .unwrap();

        assert!(!registry.leave_connection("s1", &old).await.unwrap());
        assert!(registry.get("s1").unwrap().is_connected("user2"));
    }

    #[tokio::test]
    async fn test_remove_user() {
        let (registry, _) = registry();
        let (h1, _rx1) = ClientHandle::new();
        let (h2, mut rx2) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1).unwrap();
        registry
            .add_invitee("s1", "user2", Permissions::parse("keyboard"))
            .unwrap();
        registry
            .join_room("s1", "user2", h2.clone(), Permissions::parse("keyboard"))
            .unwrap();
        drain(&mut rx2);

        assert!(matches!(
            registry.remove_user("s1", "user1").await,
            Err(RoomError::CannotRemoveCreator)
        ));

        registry.remove_user("s1", "user2").await.unwrap();
        let room = registry.get("s1").unwrap();
        assert!(!room.is_connected("user2"));
        assert!(room.invitee("user2").is_none());
        assert!(h2.is_closed());
        assert_eq!(drain(&mut rx2), vec!["12.remove-share,2.s1;".to_string()]);
    }

    #[tokio::test]
    async fn test_set_permission_updates_participant_and_invitee() {
        let (registry, _) = registry();
        let (h1, _rx1) = ClientHandle::new();
        let (h2, mut rx2) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1).unwrap();
        registry
            .add_invitee("s1", "user2", Permissions::parse("mouse"))
            .unwrap();
        let participant = registry
            .join_room("s1", "user2", h2, Permissions::parse("mouse"))
            .unwrap();
        drain(&mut rx2);

        let updated = registry
            .set_permission("s1", "user2", Permissions::parse("admin"))
            .await
            .unwrap();
        assert!(updated);
        assert_eq!(participant.role(), Role::CoHost);
        assert_eq!(
            registry.get("s1").unwrap().invitee("user2"),
            Some(Permissions::parse("admin"))
        );
        assert_eq!(
            drain(&mut rx2),
            vec!["15.user-permission,20.admin,keyboard,mouse;".to_string()]
        );

        assert!(!registry
            .set_permission("s1", "user1", Permissions::default())
            .await
            .unwrap());
        let host = registry.get("s1").unwrap().participant("user1").unwrap();
        assert_eq!(host.role(), Role::Host);
    }

    #[tokio::test]
    async fn test_set_permission_refuses_strangers() {
        let (registry, _) = registry();
        let (h1, _rx1) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1).unwrap();

        assert!(matches!(
            registry
                .set_permission("s1", "user9", Permissions::parse("admin"))
                .await,
            Err(RoomError::NotInvited(_))
        ));
        let room = registry.get("s1").unwrap();
        assert!(room.invitee("user9").is_none());
        assert_eq!(room.invitee_count(), 1);
    }

    #[tokio::test]
    async fn test_demoting_last_cohost_closes_room() {
        let (registry, _) = registry();
        let (h1, _rx1) = ClientHandle::new();
        let (h2, _rx2) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1.clone()).unwrap();
        registry
            .join_room("s1", "user2", h2.clone(), Permissions::parse("admin"))
            .unwrap();
        registry.leave_connection("s1", &h1).await.unwrap();
        assert!(registry.contains("s1"));

        registry
            .set_permission("s1", "user2", Permissions::parse("mouse"))
            .await
            .unwrap();
        assert!(!registry.contains("s1"));
        assert!(h2.is_closed());
    }

    #[tokio::test]
    async fn test_stop_share() {
        let (registry, _) = registry();
        let (h1, mut rx1) = ClientHandle::new();
        let (h2, _rx2) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1).unwrap();
        for user in ["user2", "user3"] {
            registry
                .add_invitee("s1", user, Permissions::parse("mouse"))
                .unwrap();
        }
        registry
            .join_room("s1", "user2", h2.clone(), Permissions::parse("mouse"))
            .unwrap();
        drain(&mut rx1);

        let mut revoked = registry.stop_share("s1").await.unwrap();
        revoked.sort();
        assert_eq!(revoked, vec!["user2", "user3"]);
        assert!(h2.is_closed());

        let room = registry.get("s1").unwrap();
        assert_eq!(room.invitee_count(), 1);
        assert_eq!(room.participant_ids(), vec!["user1"]);
        assert_eq!(drain(&mut rx1), vec!["7.members,2.[];".to_string()]);
    }

    #[tokio::test]
    async fn test_close_cascade_effects() {
        let (registry, backend) = registry();
        let sessions = Arc::clone(&registry.sessions);
        let context = SessionContext::new(SessionIdentity {
            session_id: "s1".to_string(),
            tenant_id: "t1".to_string(),
            user_id: "user1".to_string(),
            app_id: "app1".to_string(),
            app_name: "Finance Desktop".to_string(),
            client_ip: None,
            recording: true,
        });
        context.mark_authenticated("win-01");
        sessions.insert("s1", context);
        backend
            .put(&route_key("s1"), "10.0.0.1:8080", Duration::from_secs(60))
            .await
            .unwrap();

        let mut new = new_room("s1", "user1");
        new.recording = Some(rg_core::traits::RecordingJob {
            recording_id: "s1".to_string(),
            session_id: "s1".to_string(),
            tenant_id: "t1".to_string(),
            user_id: "user1".to_string(),
            app_name: "Finance Desktop".to_string(),
            client_ip: None,
            started_at: chrono::Utc::now(),
        });
        let (h1, _rx1) = ClientHandle::new();
        registry.create_room(new, h1.clone()).unwrap();

        assert!(registry.close("s1").await);
        assert!(h1.is_closed());
        assert!(!registry.contains("s1"));
        assert!(!sessions.contains("s1"));
        assert_eq!(backend.deleted_sessions(), vec!["s1"]);
        assert_eq!(backend.route(&route_key("s1")), None);
        assert_eq!(backend.queued_recordings().len(), 1);
        let exits: Vec<_> = backend
            .audit_events()
            .into_iter()
            .filter(|e| e.tag == tags::EXIT)
            .collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].user_id, "user1");

        assert!(!registry.close("s1").await);
        assert_eq!(backend.queued_recordings().len(), 1);
    }

    #[tokio::test]
    async fn test_unauthenticated_close_has_no_exit_event() {
        let (registry, backend) = registry();
        let (h1, _rx1) = ClientHandle::new();
        registry.create_room(new_room("s1", "user1"), h1).unwrap();
        registry.leave_room("s1", "user1").await.unwrap();

        assert!(!registry.contains("s1"));
        assert!(backend
            .audit_events()
            .iter()
            .all(|e| e.tag != tags::EXIT));
    }
}
