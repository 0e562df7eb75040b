use anyhow::{Context, Result};
use dashmap::DashMap;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Table names shared by the registries.
pub const ROUTES_DB: &str = "routes";
pub const PROXIES_DB: &str = "proxies";
pub const METRICS_DB: &str = "metrics";

const LMDB_MAX_TABLES: u32 = 16;
const LMDB_MAP_SIZE: usize = 1 << 30;

type Table = Database<Bytes, Bytes>;

/// Key/value persistence with one named table per registry.
///
/// Values are MessagePack with field names, so rows stay readable when a
/// struct gains optional fields. Both engines return keys in byte order.
pub struct Memory {
    engine: Engine,
}

enum Engine {
    Lmdb { env: Env, tables: DashMap<String, Table> },
    InProcess { tables: DashMap<String, BTreeMap<String, Vec<u8>>> },
}

impl Memory {
    /// Opens (creating if needed) an LMDB environment in `path`.
    pub fn open_lmdb<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).with_context(|| format!("create data dir {}", path.display()))?;
        // SAFETY: the environment is opened once per process and never
        // mapped by a second `Env` for the same path.
        let env = unsafe {
            EnvOpenOptions::new()
                .max_dbs(LMDB_MAX_TABLES)
                .map_size(LMDB_MAP_SIZE)
                .open(path)
                .with_context(|| format!("open lmdb at {}", path.display()))?
        };
        let memory = Self { engine: Engine::Lmdb { env, tables: DashMap::new() } };
        for table in [ROUTES_DB, PROXIES_DB, METRICS_DB] {
            memory.lmdb_table(table)?;
        }
        Ok(memory)
    }

    pub fn memory() -> Self {
        Self { engine: Engine::InProcess { tables: DashMap::new() } }
    }

    /// Opens the engine named in config (`lmdb` or `memory`).
    pub fn open(engine: &str, path: &str) -> Result<Self> {
        match engine {
            "lmdb" => Self::open_lmdb(path),
            "memory" => Ok(Self::memory()),
            other => anyhow::bail!("unknown memory engine `{other}` (expected lmdb or memory)"),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.engine, Engine::Lmdb { .. })
    }

    fn lmdb_table(&self, name: &str) -> Result<Table> {
        let Engine::Lmdb { env, tables } = &self.engine else {
            anyhow::bail!("not an lmdb engine");
        };
        if let Some(table) = tables.get(name) {
            return Ok(*table);
        }
        let mut wtxn = env.write_txn()?;
        let table: Table = env
            .create_database(&mut wtxn, Some(name))
            .with_context(|| format!("create table {name}"))?;
        wtxn.commit()?;
        tables.insert(name.to_string(), table);
        Ok(table)
    }

    fn write_raw(&self, table: &str, rows: Vec<(String, Vec<u8>)>) -> Result<()> {
        match &self.engine {
            Engine::Lmdb { env, .. } => {
                let db = self.lmdb_table(table)?;
                let mut wtxn = env.write_txn()?;
                for (key, value) in &rows {
                    db.put(&mut wtxn, key.as_bytes(), value)?;
                }
                wtxn.commit().with_context(|| format!("commit {} rows to {table}", rows.len()))
            }
            Engine::InProcess { tables } => {
                tables.entry(table.to_string()).or_default().extend(rows);
                Ok(())
            }
        }
    }

    fn read_raw(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match &self.engine {
            Engine::Lmdb { env, .. } => {
                let db = self.lmdb_table(table)?;
                let rtxn = env.read_txn()?;
                Ok(db.get(&rtxn, key.as_bytes())?.map(<[u8]>::to_vec))
            }
            Engine::InProcess { tables } => {
                Ok(tables.get(table).and_then(|t| t.get(key).cloned()))
            }
        }
    }

    fn scan_raw(&self, table: &str) -> Result<Vec<(String, Vec<u8>)>> {
        match &self.engine {
            Engine::Lmdb { env, .. } => {
                let db = self.lmdb_table(table)?;
                let rtxn = env.read_txn()?;
                let rows = db
                    .iter(&rtxn)?
                    .map(|row| -> Result<(String, Vec<u8>)> {
                        let (k, v) = row?;
                        Ok((String::from_utf8_lossy(k).into_owned(), v.to_vec()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(rows)
            }
            Engine::InProcess { tables } => Ok(tables
                .get(table)
                .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()),
        }
    }

    /// Upserts one row.
    pub fn put<T: Serialize>(&self, db: &str, key: &str, value: &T) -> Result<()> {
        let encoded = rmp_serde::to_vec_named(value).with_context(|| format!("encode {db}/{key}"))?;
        self.write_raw(db, vec![(key.to_string(), encoded)])
    }

    /// Upserts several rows; on LMDB they land in one transaction.
    pub fn put_many<T, I>(&self, db: &str, entries: I) -> Result<()>
    where
        T: Serialize,
        I: IntoIterator<Item = (String, T)>,
    {
        let rows = entries
            .into_iter()
            .map(|(key, value)| -> Result<(String, Vec<u8>)> {
                let encoded = rmp_serde::to_vec_named(&value).with_context(|| format!("encode {db}/{key}"))?;
                Ok((key, encoded))
            })
            .collect::<Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(());
        }
        self.write_raw(db, rows)
    }

    pub fn get<T: DeserializeOwned>(&self, db: &str, key: &str) -> Result<Option<T>> {
        self.read_raw(db, key)?
            .map(|bytes| rmp_serde::from_slice(&bytes).with_context(|| format!("decode {db}/{key}")))
            .transpose()
    }

    /// Removing a missing key is not an error.
    pub fn delete(&self, db: &str, key: &str) -> Result<()> {
        match &self.engine {
            Engine::Lmdb { env, .. } => {
                let table = self.lmdb_table(db)?;
                let mut wtxn = env.write_txn()?;
                table.delete(&mut wtxn, key.as_bytes())?;
                wtxn.commit()?;
            }
            Engine::InProcess { tables } => {
                if let Some(mut table) = tables.get_mut(db) {
                    table.remove(key);
                }
            }
        }
        Ok(())
    }

    /// Every row of a table with its key, in key order.
    pub fn entries<T: DeserializeOwned>(&self, db: &str) -> Result<Vec<(String, T)>> {
        self.scan_raw(db)?
            .into_iter()
            .map(|(key, bytes)| -> Result<(String, T)> {
                let value = rmp_serde::from_slice(&bytes).with_context(|| format!("decode {db}/{key}"))?;
                Ok((key, value))
            })
            .collect()
    }

    pub fn all<T: DeserializeOwned>(&self, db: &str) -> Result<Vec<T>> {
        Ok(self.entries(db)?.into_iter().map(|(_, v)| v).collect())
    }
}
