use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use portico_core::{ProxyRecord, ProxyStore};
use portico_errors::{ControlError, Result};
use portico_memory::{Memory, PROXIES_DB};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Fleet table written through to the `proxies` table.
///
/// Every mutation of a key runs under that key's shard lock, including the
/// storage write, so a removal and a concurrent update always serialize.
pub struct ProxyTable {
    records: DashMap<SocketAddr, ProxyRecord>,
    memory: Arc<Memory>,
}

impl ProxyTable {
    pub fn new(memory: Arc<Memory>) -> Self {
        Self { records: DashMap::new(), memory }
    }

    pub fn load(memory: Arc<Memory>) -> Result<Self> {
        let table = Self::new(memory);
        let rows: Vec<ProxyRecord> = table.memory.all(PROXIES_DB).map_err(ControlError::storage)?;
        for record in rows {
            table.records.insert(record.key(), record);
        }
        info!("loaded {} managed proxies", table.records.len());
        Ok(table)
    }

    fn persist(&self, record: &ProxyRecord) -> Result<()> {
        self.memory
            .put(PROXIES_DB, &record.key().to_string(), record)
            .map_err(ControlError::storage)
    }
}

impl ProxyStore for ProxyTable {
    fn insert(&self, record: ProxyRecord) -> Result<()> {
        match self.records.entry(record.key()) {
            Entry::Occupied(_) => Err(ControlError::conflict(format!(
                "proxy {} is already registered",
                record.key()
            ))),
            Entry::Vacant(slot) => {
                self.persist(&record)?;
                slot.insert(record);
                Ok(())
            }
        }
    }

    fn get(&self, key: &SocketAddr) -> Option<ProxyRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    fn list(&self) -> Vec<ProxyRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    fn remove(&self, key: &SocketAddr) -> Result<Option<ProxyRecord>> {
        match self.records.entry(*key) {
            Entry::Vacant(_) => Ok(None),
            Entry::Occupied(slot) => {
                self.memory
                    .delete(PROXIES_DB, &key.to_string())
                    .map_err(ControlError::storage)?;
                Ok(Some(slot.remove()))
            }
        }
    }

    fn modify(
        &self,
        key: &SocketAddr,
        f: &mut dyn FnMut(&mut ProxyRecord) -> bool,
    ) -> Result<Option<ProxyRecord>> {
        let Some(mut slot) = self.records.get_mut(key) else {
            return Ok(None);
        };
        let mut next = slot.value().clone();
        if f(&mut next) {
            self.persist(&next)?;
            *slot.value_mut() = next.clone();
        }
        Ok(Some(next))
    }
}
