//! StateManager - actor that owns TaskStore
//!
//! Processes commands via channels for thread-safe access to persistent state.
//! Every opsd component talks to the store through a cloned handle.

use std::path::Path;

use taskstore::{Filter, IndexValue, Record, Store};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{Approval, Artifact, Job, Kpi, MemoryNote, ProcessRun, ProcessStep, Run, Schedule, Task};

use super::messages::{StateCommand, StateError, StateResponse, StoreOp};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the store in `store_dir`
    pub fn spawn(store_dir: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_dir = %store_dir.as_ref().display(), "spawn: called");
        let mut store = Store::open(store_dir.as_ref())?;

        // Index layout may have changed since these records were written
        let mut rebuilt = 0;
        rebuilt += store.rebuild_indexes::<Run>()?;
        rebuilt += store.rebuild_indexes::<Task>()?;
        rebuilt += store.rebuild_indexes::<Approval>()?;
        rebuilt += store.rebuild_indexes::<Artifact>()?;
        rebuilt += store.rebuild_indexes::<Kpi>()?;
        rebuilt += store.rebuild_indexes::<MemoryNote>()?;
        rebuilt += store.rebuild_indexes::<ProcessRun>()?;
        rebuilt += store.rebuild_indexes::<ProcessStep>()?;
        rebuilt += store.rebuild_indexes::<Job>()?;
        rebuilt += store.rebuild_indexes::<Schedule>()?;
        info!(rebuilt, "Rebuilt record indexes");

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");
        Ok(Self { tx })
    }

    async fn call<R, F>(&self, op: F) -> StateResponse<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Store) -> StateResponse<R> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let op: StoreOp = Box::new(move |store| {
            let _ = reply_tx.send(op(store));
        });
        self.tx
            .send(StateCommand::Execute(op))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Persist a new record, returning its allocated id
    pub async fn create<T: Record>(&self, record: T) -> StateResponse<i64> {
        debug!(collection = T::collection_name(), "create: called");
        self.call(move |store| Ok(store.create(record)?)).await
    }

    pub async fn get<T: Record>(&self, id: i64) -> StateResponse<Option<T>> {
        debug!(collection = T::collection_name(), %id, "get: called");
        self.call(move |store| Ok(store.get(id)?)).await
    }

    /// Like `get`, but a missing record is `StateError::NotFound`
    pub async fn get_required<T: Record>(&self, id: i64) -> StateResponse<T> {
        match self.get::<T>(id).await? {
            Some(record) => Ok(record),
            None => {
                debug!(collection = T::collection_name(), %id, "get_required: missing");
                Err(StateError::NotFound(format!("{} {}", T::collection_name(), id)))
            }
        }
    }

    pub async fn update<T: Record>(&self, record: T) -> StateResponse<()> {
        debug!(collection = T::collection_name(), id = record.id(), "update: called");
        self.call(move |store| Ok(store.update(record)?)).await
    }

    /// Conditional update guarded by the persisted value of an indexed field
    pub async fn update_if<T: Record>(&self, record: T, field: &str, expected: IndexValue) -> StateResponse<bool> {
        debug!(collection = T::collection_name(), id = record.id(), %field, "update_if: called");
        let field = field.to_string();
        self.call(move |store| Ok(store.update_if(record, &field, &expected)?))
            .await
    }

    /// List records matching all filters, ascending by id
    pub async fn list<T: Record>(&self, filters: Vec<Filter>) -> StateResponse<Vec<T>> {
        debug!(collection = T::collection_name(), filter_count = filters.len(), "list: called");
        self.call(move |store| Ok(store.list(&filters)?)).await
    }

    pub async fn delete<T: Record>(&self, id: i64) -> StateResponse<()> {
        debug!(collection = T::collection_name(), %id, "delete: called");
        self.call(move |store| Ok(store.delete::<T>(id)?)).await
    }

    /// Ask the actor to stop; pending commands already queued still run
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Execute(op) => op(&mut store),
            StateCommand::Shutdown => {
                info!("StateManager actor shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}
