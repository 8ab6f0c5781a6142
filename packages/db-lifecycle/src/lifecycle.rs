//! Connection lifecycle: authenticate → extend schema → sync → ready → close.
//!
//! The host composes a [`Lifecycle`] once through [`LifecycleBuilder`],
//! registering every schema participant up front, then calls
//! [`Lifecycle::start`] and hands the returned [`DbContext`] to whatever needs
//! the database. [`Lifecycle::stop`] consumes the manager, so the handle can
//! only be closed once.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::db::DbConfig;
use crate::error::LifecycleError;
use crate::infra::db::diagnostics::lifecycle_counters;
use crate::infra::db::DbHandle;
use crate::schema::{sync_schema, SchemaHook, SchemaModel, SchemaParticipant, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unconfigured,
    Authenticating,
    SchemaExtending,
    Syncing,
    Ready,
    Closing,
    Closed,
    /// Authentication or sync failed; the process is expected to exit.
    Failed,
    /// Daemon-controller process; owns no connection.
    Detached,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Authenticating => "authenticating",
            LifecycleState::SchemaExtending => "schema_extending",
            LifecycleState::Syncing => "syncing",
            LifecycleState::Ready => "ready",
            LifecycleState::Closing => "closing",
            LifecycleState::Closed => "closed",
            LifecycleState::Failed => "failed",
            LifecycleState::Detached => "detached",
        };
        f.write_str(s)
    }
}

/// What the rest of the process gets once the database is ready.
#[derive(Debug, Clone)]
pub struct DbContext {
    pub db: DbHandle,
    pub dm: Arc<SchemaModel>,
}

pub struct LifecycleBuilder {
    config: DbConfig,
    hook: SchemaHook,
}

impl LifecycleBuilder {
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            hook: SchemaHook::new(),
        }
    }

    /// Add a schema participant. Participants run in the order registered.
    pub fn register<P: SchemaParticipant + 'static>(mut self, participant: P) -> Self {
        self.hook.register(participant);
        self
    }

    /// Validate the configuration and freeze the participant list.
    pub fn build(self) -> Result<Lifecycle, LifecycleError> {
        self.config.validate()?;
        debug!(
            "lifecycle=built dialect={} process_mode={:?} participants={}",
            self.config.dialect,
            self.config.process_mode,
            self.hook.len()
        );
        Ok(Lifecycle {
            config: self.config,
            hook: self.hook,
            state: LifecycleState::Unconfigured,
            context: None,
            last_sync: None,
        })
    }
}

pub struct Lifecycle {
    config: DbConfig,
    hook: SchemaHook,
    state: LifecycleState,
    context: Option<DbContext>,
    last_sync: Option<SyncReport>,
}

impl Lifecycle {
    pub fn builder(config: DbConfig) -> LifecycleBuilder {
        LifecycleBuilder::new(config)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// The published handle and model; `Some` only while [`LifecycleState::Ready`].
    pub fn context(&self) -> Option<&DbContext> {
        match self.state {
            LifecycleState::Ready => self.context.as_ref(),
            _ => None,
        }
    }

    /// Result of the schema sync, if one ran.
    pub fn last_sync(&self) -> Option<&SyncReport> {
        self.last_sync.as_ref()
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("lifecycle=transition from={} to={}", self.state, next);
        self.state = next;
    }

    /// Bring the database up.
    ///
    /// Returns `Ok(None)` for a daemon-controller process, which owns no
    /// connection. Errors from authentication or sync leave the manager in
    /// [`LifecycleState::Failed`] with its pool closed.
    pub async fn start(&mut self) -> Result<Option<DbContext>, LifecycleError> {
        if self.state != LifecycleState::Unconfigured {
            return Err(LifecycleError::config(format!(
                "lifecycle start called in state {}",
                self.state
            )));
        }

        if !self.config.process_mode.owns_connection() {
            info!(
                "db=detached process_mode={:?} reason=no_connection_owned",
                self.config.process_mode
            );
            self.transition(LifecycleState::Detached);
            return Ok(None);
        }

        self.transition(LifecycleState::Authenticating);
        let db = match DbHandle::open(&self.config) {
            Ok(db) => db,
            Err(e) => {
                self.transition(LifecycleState::Failed);
                return Err(e);
            }
        };
        if let Err(e) = db.authenticate().await {
            self.fail(&db).await;
            return Err(e);
        }
        info!("db=connected url={} dialect={}", db.url(), db.dialect());

        self.transition(LifecycleState::SchemaExtending);
        let mut dm = SchemaModel::new();
        self.hook.broadcast(&db, &mut dm);

        self.transition(LifecycleState::Syncing);
        if self.config.process_mode.syncs_schema() {
            match sync_schema(&db, &dm, self.config.schema_drop).await {
                Ok(report) => self.last_sync = Some(report),
                Err(e) => {
                    self.fail(&db).await;
                    return Err(e);
                }
            }
        } else {
            lifecycle_counters::schema_sync_skipped();
            info!(
                "schema_sync=skipped process_mode={:?} objects={}",
                self.config.process_mode,
                dm.len()
            );
        }

        let context = DbContext {
            db,
            dm: Arc::new(dm),
        };
        self.context = Some(context.clone());
        self.transition(LifecycleState::Ready);
        lifecycle_counters::log_snapshot("ready");
        Ok(Some(context))
    }

    async fn fail(&mut self, db: &DbHandle) {
        self.transition(LifecycleState::Failed);
        db.close().await;
    }

    /// Close the handle and release every pooled connection.
    pub async fn stop(mut self) {
        match self.state {
            LifecycleState::Ready => {}
            LifecycleState::Detached => {
                debug!("db=stop skipped=detached");
                return;
            }
            other => {
                warn!("db=stop skipped state={}", other);
                return;
            }
        }

        let Some(context) = self.context.take() else {
            return;
        };
        self.transition(LifecycleState::Closing);
        info!("db=closing url={}", context.db.url());
        context.db.close().await;
        self.transition(LifecycleState::Closed);
        info!("db=closed url={}", context.db.url());
        lifecycle_counters::log_snapshot("close");
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state)
            .field("dialect", &self.config.dialect)
            .field("process_mode", &self.config.process_mode)
            .field("hook", &self.hook)
            .finish()
    }
}
