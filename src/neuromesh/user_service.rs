//! User and session persistence.
//!
//! The user service is the single writer for `User` and `Session` nodes.
//! Web users are keyed by their session id (the first turn from a new
//! session upserts a `web_session` user), and sessions carry an expiry that
//! is extended on activity.

use crate::neuromesh::domain::{
    format_timestamp, prop_str, prop_time, Session, SessionStatus, User, UserStatus,
};
use crate::neuromesh::graph::{GraphError, GraphStore, Properties};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const USER_LABEL: &str = "User";
const SESSION_LABEL: &str = "Session";
const HAS_SESSION: &str = "HAS_SESSION";

/// Single-writer repository for `User` and `Session` nodes.
pub struct UserService {
    graph: Arc<dyn GraphStore>,
}

impl UserService {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Declare constraints and indexes for the labels this service owns.
    /// Idempotent; called at startup.
    pub async fn ensure_schema(&self) -> Result<(), GraphError> {
        self.graph.create_unique_constraint(USER_LABEL, "id").await?;
        self.graph
            .create_unique_constraint(SESSION_LABEL, "id")
            .await?;
        self.graph.create_index(USER_LABEL, "session_id").await?;
        self.graph.create_index(SESSION_LABEL, "user_id").await?;
        self.graph.create_index(SESSION_LABEL, "status").await?;
        Ok(())
    }

    /// Upsert the user for a web session: created on the first turn, touched
    /// (status active, `last_seen` bumped) on every subsequent one.
    pub async fn ensure_user(&self, session_id: &str) -> Result<User, GraphError> {
        let now = Utc::now();
        if let Some(props) = self.graph.get_node(USER_LABEL, session_id).await? {
            let mut update = Properties::new();
            update.insert("last_seen".into(), format_timestamp(&now).into());
            update.insert("status".into(), UserStatus::Active.as_str().into());
            update.insert("updated_at".into(), format_timestamp(&now).into());
            self.graph.update_node(USER_LABEL, session_id, update).await?;
            return Ok(self.user_from_props(&props, now));
        }

        let user = User {
            id: session_id.to_string(),
            session_id: session_id.to_string(),
            user_type: "web_session".to_string(),
            status: UserStatus::Active,
            last_seen: now,
            created_at: now,
            updated_at: now,
        };
        self.graph
            .add_node(USER_LABEL, &user.id, self.user_to_props(&user))
            .await?;
        Ok(user)
    }

    /// Fetch a user by id.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, GraphError> {
        Ok(self
            .graph
            .get_node(USER_LABEL, user_id)
            .await?
            .map(|props| self.user_from_props(&props, Utc::now())))
    }

    /// Create a session for a user with the given lifetime and link it with a
    /// `HAS_SESSION` edge.
    pub async fn create_session(
        &self,
        session_id: &str,
        user_id: &str,
        duration: Duration,
    ) -> Result<Session, GraphError> {
        let now = Utc::now();
        let session = Session {
            id: session_id.to_string(),
            user_id: user_id.to_string(),
            status: SessionStatus::Active,
            expires_at: now + duration,
            created_at: now,
            updated_at: now,
        };
        self.graph
            .add_node(SESSION_LABEL, &session.id, self.session_to_props(&session))
            .await?;
        self.graph
            .add_edge(
                USER_LABEL,
                user_id,
                SESSION_LABEL,
                &session.id,
                HAS_SESSION,
                Properties::new(),
            )
            .await?;
        Ok(session)
    }

    /// Fetch an existing session, or create one with `duration` if absent.
    pub async fn ensure_session(
        &self,
        session_id: &str,
        user_id: &str,
        duration: Duration,
    ) -> Result<Session, GraphError> {
        if let Some(session) = self.get_session(session_id).await? {
            return Ok(session);
        }
        self.create_session(session_id, user_id, duration).await
    }

    /// Fetch a session by id.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, GraphError> {
        Ok(self
            .graph
            .get_node(SESSION_LABEL, session_id)
            .await?
            .map(|props| self.session_from_props(&props)))
    }

    /// Push a session's expiry further out. No-op for non-active sessions.
    pub async fn extend_session(
        &self,
        session_id: &str,
        duration: Duration,
    ) -> Result<(), GraphError> {
        let session = match self.get_session(session_id).await? {
            Some(s) if s.status == SessionStatus::Active => s,
            _ => return Ok(()),
        };
        let now = Utc::now();
        let mut update = Properties::new();
        update.insert("expires_at".into(), format_timestamp(&(now + duration)).into());
        update.insert("updated_at".into(), format_timestamp(&now).into());
        self.graph.update_node(SESSION_LABEL, &session.id, update).await
    }

    /// Transition a session to `expired`.
    pub async fn expire_session(&self, session_id: &str) -> Result<(), GraphError> {
        self.set_session_status(session_id, SessionStatus::Expired)
            .await
    }

    /// Transition a session to `closed`.
    pub async fn close_session(&self, session_id: &str) -> Result<(), GraphError> {
        self.set_session_status(session_id, SessionStatus::Closed)
            .await
    }

    async fn set_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), GraphError> {
        let mut update = Properties::new();
        update.insert("status".into(), status.as_str().into());
        update.insert("updated_at".into(), format_timestamp(&Utc::now()).into());
        self.graph.update_node(SESSION_LABEL, session_id, update).await
    }

    fn user_to_props(&self, user: &User) -> Properties {
        let mut props = Properties::new();
        props.insert("id".into(), user.id.clone().into());
        props.insert("session_id".into(), user.session_id.clone().into());
        props.insert("user_type".into(), user.user_type.clone().into());
        props.insert("status".into(), user.status.as_str().into());
        props.insert("last_seen".into(), format_timestamp(&user.last_seen).into());
        props.insert("created_at".into(), format_timestamp(&user.created_at).into());
        props.insert("updated_at".into(), format_timestamp(&user.updated_at).into());
        props
    }

    fn user_from_props(&self, props: &Properties, fallback_now: DateTime<Utc>) -> User {
        User {
            id: prop_str(props, "id"),
            session_id: prop_str(props, "session_id"),
            user_type: prop_str(props, "user_type"),
            status: UserStatus::parse(&prop_str(props, "status")).unwrap_or(UserStatus::Active),
            last_seen: prop_time(props, "last_seen").unwrap_or(fallback_now),
            created_at: prop_time(props, "created_at").unwrap_or(fallback_now),
            updated_at: prop_time(props, "updated_at").unwrap_or(fallback_now),
        }
    }

    fn session_to_props(&self, session: &Session) -> Properties {
        let mut props = Properties::new();
        props.insert("id".into(), session.id.clone().into());
        props.insert("user_id".into(), session.user_id.clone().into());
        props.insert("status".into(), session.status.as_str().into());
        props.insert("expires_at".into(), format_timestamp(&session.expires_at).into());
        props.insert("created_at".into(), format_timestamp(&session.created_at).into());
        props.insert("updated_at".into(), format_timestamp(&session.updated_at).into());
        props
    }

    fn session_from_props(&self, props: &Properties) -> Session {
        let now = Utc::now();
        Session {
            id: prop_str(props, "id"),
            user_id: prop_str(props, "user_id"),
            status: SessionStatus::parse(&prop_str(props, "status"))
                .unwrap_or(SessionStatus::Active),
            expires_at: prop_time(props, "expires_at").unwrap_or(now),
            created_at: prop_time(props, "created_at").unwrap_or(now),
            updated_at: prop_time(props, "updated_at").unwrap_or(now),
        }
    }
}
