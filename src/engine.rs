//! Engine Module
//!
//! The server core that ties every component together.
//!
//! ## Responsibilities
//! - Own the container registry and the subscription engine
//! - Keep the command table both protocols dispatch through
//! - Track live sessions (mirrored into `__meta__/sessions`)
//! - Answer access checks and authenticate users (`__meta__/users`)
//! - Pause and resume the server

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::auth::{Auth, Rule};
use crate::config::Config;
use crate::container::{Container, ContainerManager, VOLATILE_MAP};
use crate::dispatch::CommandTable;
use crate::error::{Result, TesseraError};
use crate::network::Session;
use crate::protocol::{Command, Data};
use crate::pubsub::{EventInfo, SubscriptionEngine};

/// Meta container listing connected sessions (id -> peer address)
pub const SESSIONS_META: &str = "__meta__/sessions";

/// Meta container holding credentials (user -> password)
pub const USERS_META: &str = "__meta__/users";

/// Meta container routing names to other servers (name -> `host[:port]`)
pub const CLUSTERS_META: &str = "__meta__/clusters";

/// The server core
///
/// ## Concurrency Model
/// Shared by every session thread behind an `Arc`. Containers synchronize
/// themselves; the engine's own tables each sit behind their own lock and no
/// method holds two of them at once.
pub struct Engine {
    config: Config,

    containers: Arc<ContainerManager>,

    subscriptions: SubscriptionEngine,

    commands: CommandTable,

    auth: RwLock<Auth>,

    /// session id -> session; weak so a closed session can go away
    sessions: Mutex<HashMap<u64, Weak<Session>>>,

    sessions_meta: Arc<dyn Container>,

    users_meta: Arc<dyn Container>,

    next_session_id: AtomicU64,

    next_query_id: AtomicU32,

    paused: AtomicBool,
}

impl Engine {
    /// Build the engine and start the event delivery worker
    ///
    /// On startup:
    /// 1. Register container type aliases
    /// 2. Create the meta containers
    /// 3. Load users from the config
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let containers = Arc::new(ContainerManager::new());
        for (alias, real_type) in &config.aliases {
            containers.add_alias(alias, real_type)?;
        }

        let sessions_meta = containers.create(VOLATILE_MAP, SESSIONS_META)?;
        let users_meta = containers.create(VOLATILE_MAP, USERS_META)?;
        for (user, password) in &config.users {
            users_meta.set(Data::from(user), Data::from(password), Data::None)?;
        }

        let subscriptions = SubscriptionEngine::start(Arc::clone(&containers))?;

        tracing::debug!(
            "Engine ready: {} alias(es), {} user(s)",
            config.aliases.len(),
            config.users.len()
        );

        Ok(Self {
            config,
            containers,
            subscriptions,
            commands: CommandTable::new(),
            auth: RwLock::new(Auth::new()),
            sessions: Mutex::new(HashMap::new()),
            sessions_meta,
            users_meta,
            next_session_id: AtomicU64::new(1),
            next_query_id: AtomicU32::new(1),
            paused: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn containers(&self) -> &Arc<ContainerManager> {
        &self.containers
    }

    pub fn subscriptions(&self) -> &SubscriptionEngine {
        &self.subscriptions
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn next_query_id(&self) -> u32 {
        self.next_query_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Publish a mutation of `container` to its subscribers
    pub fn publish(
        &self,
        container: &Arc<dyn Container>,
        event_code: Command,
        key: Data,
        value: Data,
        metadata: Data,
    ) {
        self.subscriptions
            .publish(EventInfo::new(container.id(), event_code, key, value, metadata));
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_session(&self, session: &Arc<Session>) {
        self.sessions.lock().insert(session.id(), Arc::downgrade(session));

        let key = Data::from(session.id().to_string());
        let value = Data::from(session.peer());
        match self.sessions_meta.set(key.clone(), value.clone(), Data::None) {
            Ok(()) => self.publish(&self.sessions_meta, Command::Set, key, value, Data::None),
            Err(e) => tracing::warn!("Cannot record session {}: {}", session.id(), e),
        }
    }

    /// Forget a session and everything it registered
    pub fn unregister_session(&self, session_id: u64) {
        self.sessions.lock().remove(&session_id);
        self.subscriptions.remove_session(session_id);

        let key = Data::from(session_id.to_string());
        if self.sessions_meta.delete(&key).is_ok() {
            self.publish(&self.sessions_meta, Command::Delete, key, Data::None, Data::None);
        }
        tracing::debug!("Session {} unregistered", session_id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Stop accepting and disconnect every session except `keep`
    pub fn pause(&self, keep: u64) {
        self.paused.store(true, Ordering::Release);

        let others: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .iter()
            .filter(|(id, _)| **id != keep)
            .filter_map(|(_, s)| s.upgrade())
            .collect();

        tracing::info!("Server paused, dropping {} session(s)", others.len());
        for session in others {
            session.close();
        }
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        tracing::info!("Server resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Close every session and stop event delivery
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for session in sessions {
            session.close();
        }
        self.subscriptions.shutdown();
    }

    // =========================================================================
    // Access Control
    // =========================================================================

    /// Fail with `AccessDenied` unless `session` may run `command` on the object
    pub fn check_access(
        &self,
        session: &Session,
        object_type: &str,
        object_name: &str,
        command: &str,
    ) -> Result<()> {
        let tokens = session.tokens();
        match self.auth.read().check(object_type, object_name, command, &tokens) {
            Rule::Allow => Ok(()),
            Rule::Deny => Err(TesseraError::AccessDenied(format!(
                "{} denied on {}",
                command, object_name
            ))),
        }
    }

    pub fn add_rule(
        &self,
        object_type: &str,
        object_name: &str,
        command: &str,
        rule: Rule,
        token: Option<&str>,
    ) {
        self.auth.write().add_rule(object_type, object_name, command, rule, token);
    }

    pub fn set_default_rule(&self, rule: Rule) {
        self.auth.write().set_default_rule(rule);
    }

    /// Check a user's password and hand the session the user's token
    pub fn authenticate(&self, session: &Session, user: &str, password: &str) -> Result<()> {
        let denied = || TesseraError::AccessDenied(format!("authentication failed for {}", user));

        let record = self.users_meta.get_record(&Data::from(user)).map_err(|_| denied())?;
        if record.value.as_bytes() != Some(password.as_bytes()) {
            tracing::warn!("Session {}: bad password for {}", session.id(), user);
            return Err(denied());
        }

        session.add_token(user);
        tracing::debug!("Session {} authenticated as {}", session.id(), user);
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.subscriptions.shutdown();
    }
}
