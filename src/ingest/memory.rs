//! In-memory command log.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{CommandStore, CommandStoreError, JobCommand};
use crate::core::types::CommandId;

#[derive(Default)]
struct Log {
    commands: BTreeMap<CommandId, JobCommand>,
    next_id: i64,
}

/// Command log kept in memory.
///
/// Ids start at 1 and increase monotonically. Data is not persisted across
/// restarts.
pub struct InMemoryCommandLog {
    log: RwLock<Log>,
}

impl InMemoryCommandLog {
    /// Create an empty command log.
    pub fn new() -> Self {
        Self {
            log: RwLock::new(Log::default()),
        }
    }

    /// Number of pending commands.
    pub fn len(&self) -> usize {
        self.log.read().map(|log| log.commands.len()).unwrap_or(0)
    }

    /// Whether no commands are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCommandLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandStore for InMemoryCommandLog {
    async fn append(&self, command: JobCommand) -> Result<CommandId, CommandStoreError> {
        let mut log = self
            .log
            .write()
            .map_err(|_| CommandStoreError::LockPoisoned)?;
        log.next_id += 1;
        let command_id = CommandId::new(log.next_id);
        log.commands
            .insert(command_id, command.with_command_id(command_id));
        Ok(command_id)
    }

    async fn find_pending(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<JobCommand>, CommandStoreError> {
        let log = self
            .log
            .read()
            .map_err(|_| CommandStoreError::LockPoisoned)?;
        Ok(log
            .commands
            .values()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn delete(&self, command_ids: &[CommandId]) -> Result<usize, CommandStoreError> {
        let mut log = self
            .log
            .write()
            .map_err(|_| CommandStoreError::LockPoisoned)?;
        Ok(command_ids
            .iter()
            .filter(|id| log.commands.remove(id).is_some())
            .count())
    }
}
