use crate::models::{non_empty, validate_path, validate_targets, NewRoute, Route, RoutePatch};
use crate::store::RouteStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use portico_errors::{ControlError, Result};
use portico_memory::{Memory, ROUTES_DB};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// On-disk row; `seq` preserves registration order across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRoute {
    seq: u64,
    route: Route,
}

struct SlotState {
    route: Route,
    /// Cursor moved since the last write.
    dirty: bool,
    /// Set by delete so in-flight holders of the slot never write it back.
    removed: bool,
}

struct RouteSlot {
    seq: u64,
    state: Mutex<SlotState>,
}

impl RouteSlot {
    fn new(seq: u64, route: Route) -> Arc<Self> {
        Arc::new(Self {
            seq,
            state: Mutex::new(SlotState { route, dirty: false, removed: false }),
        })
    }
}

/// In-process route table, written through to the `routes` table.
///
/// Each route sits behind its own mutex, so selections on different routes
/// never contend. Paths are claimed through a separate index so two
/// concurrent registrations of one path cannot both succeed.
pub struct RouteRegistry {
    routes: DashMap<String, Arc<RouteSlot>>,
    paths: DashMap<String, String>,
    next_seq: AtomicU64,
    memory: Arc<Memory>,
    #[cfg(test)]
    fail_deletes: std::sync::atomic::AtomicBool,
}

impl RouteRegistry {
    pub fn new(memory: Arc<Memory>) -> Self {
        Self {
            routes: DashMap::new(),
            paths: DashMap::new(),
            next_seq: AtomicU64::new(0),
            memory,
            #[cfg(test)]
            fail_deletes: Default::default(),
        }
    }

    /// Rebuilds the table from storage.
    pub fn load(memory: Arc<Memory>) -> Result<Self> {
        let registry = Self::new(memory);
        let mut rows: Vec<StoredRoute> =
            registry.memory.all(ROUTES_DB).map_err(ControlError::storage)?;
        rows.sort_by_key(|r| r.seq);

        let mut max_seq = None;
        for StoredRoute { seq, mut route } in rows {
            if route.targets.is_empty() {
                warn!(route = %route.id, path = %route.path, "skipping stored route without targets");
                continue;
            }
            if route.current >= route.targets.len() {
                route.current = 0;
            }
            if registry.paths.contains_key(&route.path) {
                warn!(route = %route.id, path = %route.path, "skipping stored route with duplicate path");
                continue;
            }
            registry.paths.insert(route.path.clone(), route.id.clone());
            registry.routes.insert(route.id.clone(), RouteSlot::new(seq, route));
            max_seq = Some(max_seq.map_or(seq, |m: u64| m.max(seq)));
        }
        registry.next_seq.store(max_seq.map_or(0, |m| m + 1), Ordering::SeqCst);
        info!("loaded {} routes", registry.routes.len());
        Ok(registry)
    }

    fn slot(&self, id: &str) -> Result<Arc<RouteSlot>> {
        self.routes
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| ControlError::not_found(format!("route `{id}` not found")))
    }

    fn persist(&self, seq: u64, route: &Route) -> Result<()> {
        self.memory
            .put(ROUTES_DB, &route.id, &StoredRoute { seq, route: route.clone() })
            .map_err(ControlError::storage)
    }

    fn delete_row(&self, id: &str) -> Result<()> {
        #[cfg(test)]
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ControlError::storage(anyhow::anyhow!("injected delete failure")));
        }
        self.memory.delete(ROUTES_DB, id).map_err(ControlError::storage)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteStore for RouteRegistry {
    fn create(&self, new: NewRoute) -> Result<Route> {
        let path = validate_path(&new.path)?;
        let targets = validate_targets(new.targets)?;

        match self.paths.entry(path.clone()) {
            Entry::Occupied(_) => {
                Err(ControlError::conflict(format!("a route for path `{path}` already exists")))
            }
            Entry::Vacant(claim) => {
                let route = Route {
                    id: Uuid::new_v4().to_string(),
                    path,
                    targets,
                    current: 0,
                    name: non_empty(new.name),
                    description: non_empty(new.description),
                };
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                // Dropping the vacant claim on a failed write leaves the path free.
                self.persist(seq, &route)?;
                self.routes.insert(route.id.clone(), RouteSlot::new(seq, route.clone()));
                claim.insert(route.id.clone());
                info!(route = %route.id, path = %route.path, targets = route.targets.len(), "route created");
                Ok(route)
            }
        }
    }

    fn list(&self) -> Vec<Route> {
        let slots: Vec<Arc<RouteSlot>> = self.routes.iter().map(|s| s.value().clone()).collect();
        let mut rows: Vec<(u64, Route)> = slots
            .iter()
            .filter_map(|slot| {
                let state = slot.state.lock();
                (!state.removed).then(|| (slot.seq, state.route.clone()))
            })
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, r)| r).collect()
    }

    fn get(&self, id: &str) -> Result<Route> {
        let slot = self.slot(id)?;
        let state = slot.state.lock();
        if state.removed {
            return Err(ControlError::not_found(format!("route `{id}` not found")));
        }
        Ok(state.route.clone())
    }

    fn update(&self, id: &str, patch: RoutePatch) -> Result<Route> {
        let slot = self.slot(id)?;
        let targets = patch.targets.map(validate_targets).transpose()?;

        let mut state = slot.state.lock();
        if state.removed {
            return Err(ControlError::not_found(format!("route `{id}` not found")));
        }
        let mut next = state.route.clone();
        if patch.name.is_some() {
            next.name = non_empty(patch.name);
        }
        if patch.description.is_some() {
            next.description = non_empty(patch.description);
        }
        if let Some(targets) = targets {
            next.targets = targets;
            if next.current >= next.targets.len() {
                next.current = next.targets.len() - 1;
            }
        }
        self.persist(slot.seq, &next)?;
        state.route = next.clone();
        state.dirty = false;
        info!(route = %id, targets = next.targets.len(), current = next.current, "route updated");
        Ok(next)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        if state.removed {
            return Err(ControlError::not_found(format!("route `{id}` not found")));
        }
        // Storage first: a failed delete leaves the route fully registered.
        self.delete_row(id)?;
        state.removed = true;
        self.routes.remove_if(id, |_, s| Arc::ptr_eq(s, &slot));
        self.paths.remove_if(&state.route.path, |_, owner| owner == id);
        info!(route = %id, path = %state.route.path, "route deleted");
        Ok(())
    }

    fn select_target(&self, id: &str) -> Result<String> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        if state.removed {
            return Err(ControlError::not_found(format!("route `{id}` not found")));
        }
        let len = state.route.targets.len();
        let idx = state.route.current;
        let target = state.route.targets[idx].clone();
        if len > 1 {
            state.route.current = (idx + 1) % len;
            state.dirty = true;
        }
        debug!(route = %id, index = idx, target = %target, "target selected");
        Ok(target)
    }

    fn flush(&self) -> Result<usize> {
        let slots: Vec<Arc<RouteSlot>> = self.routes.iter().map(|s| s.value().clone()).collect();
        let mut written = 0;
        for slot in slots {
            let mut state = slot.state.lock();
            if state.removed || !state.dirty {
                continue;
            }
            self.persist(slot.seq, &state.route)?;
            state.dirty = false;
            written += 1;
        }
        if written > 0 {
            debug!("flushed {written} route cursors");
        }
        Ok(written)
    }
}
