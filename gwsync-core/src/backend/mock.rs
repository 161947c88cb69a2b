//! In-process control plane that records every call.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Backend, BackendError, BackendProvider, RemoteKind, RemoteObject, Result};
use crate::model::{Environment, GatewayMode};

/// A call the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(RemoteKind),
    Get(RemoteKind, String),
    Update(RemoteKind, String),
    Delete(RemoteKind, String),
    Activate,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(RemoteKind, String), Value>,
    calls: Vec<Call>,
    failures: VecDeque<BackendError>,
    fail_activate: bool,
    next_id: u64,
}

pub struct MockBackend {
    mode: GatewayMode,
    state: Mutex<State>,
}

impl MockBackend {
    /// In dashboard mode the mock assigns its own ids, like the real dashboard.
    pub fn new(mode: GatewayMode) -> Self {
        Self {
            mode,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, Call::Create(_)))
    }

    pub fn updates(&self) -> usize {
        self.count(|c| matches!(c, Call::Update(..)))
    }

    pub fn deletes(&self) -> usize {
        self.count(|c| matches!(c, Call::Delete(..)))
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn object(&self, kind: RemoteKind, id: &str) -> Option<Value> {
        self.state().objects.get(&(kind, id.to_string())).cloned()
    }

    pub fn objects(&self, kind: RemoteKind) -> Vec<(String, Value)> {
        self.state()
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, id), v)| (id.clone(), v.clone()))
            .collect()
    }

    /// Puts an object in place without recording a call.
    pub fn insert_object(&self, kind: RemoteKind, id: &str, value: Value) {
        self.state().objects.insert((kind, id.to_string()), value);
    }

    /// Drops an object behind the reconciler's back.
    pub fn remove_object(&self, kind: RemoteKind, id: &str) -> Option<Value> {
        self.state().objects.remove(&(kind, id.to_string()))
    }

    /// The next CRUD call fails with `err`.
    pub fn fail_next(&self, err: BackendError) {
        self.state().failures.push_back(err);
    }

    pub fn fail_activate(&self, fail: bool) {
        self.state().fail_activate = fail;
    }

    fn begin(&self, call: Call) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.calls.push(call);
        let failure = state.failures.pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

fn requested_id(body: &Value) -> Option<String> {
    ["api_id", "id", "cert_id"]
        .iter()
        .filter_map(|k| body.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn not_found(kind: RemoteKind, id: &str) -> BackendError {
    BackendError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn mode(&self) -> GatewayMode {
        self.mode
    }

    async fn create(&self, kind: RemoteKind, body: &Value) -> Result<RemoteObject> {
        let mut state = self.begin(Call::Create(kind))?;
        state.next_id += 1;
        let internal = format!("mock-{}", state.next_id);

        let id = match self.mode {
            GatewayMode::Dashboard => internal.clone(),
            GatewayMode::Gateway => requested_id(body).unwrap_or_else(|| internal.clone()),
        };
        if state.objects.contains_key(&(kind, id.clone())) {
            return Err(BackendError::Rejected(format!("{} {} already exists", kind, id)));
        }

        let mut representation = body.clone();
        if let Value::Object(map) = &mut representation {
            map.insert("_id".to_string(), json!(internal));
            map.insert("created_at".to_string(), json!("2024-01-01T00:00:00Z"));
        }
        state.objects.insert((kind, id.clone()), representation.clone());
        Ok(RemoteObject { id, representation })
    }

    async fn get(&self, kind: RemoteKind, id: &str) -> Result<RemoteObject> {
        let state = self.begin(Call::Get(kind, id.to_string()))?;
        let representation = state
            .objects
            .get(&(kind, id.to_string()))
            .cloned()
            .ok_or_else(|| not_found(kind, id))?;
        Ok(RemoteObject {
            id: id.to_string(),
            representation,
        })
    }

    async fn update(&self, kind: RemoteKind, id: &str, body: &Value) -> Result<RemoteObject> {
        let mut state = self.begin(Call::Update(kind, id.to_string()))?;
        let existing = state
            .objects
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| not_found(kind, id))?;

        let mut representation = body.clone();
        if let (Value::Object(new), Value::Object(old)) = (&mut representation, &*existing) {
            for key in ["_id", "created_at"] {
                if let Some(v) = old.get(key) {
                    new.insert(key.to_string(), v.clone());
                }
            }
        }
        *existing = representation.clone();
        Ok(RemoteObject {
            id: id.to_string(),
            representation,
        })
    }

    async fn delete(&self, kind: RemoteKind, id: &str) -> Result<()> {
        let mut state = self.begin(Call::Delete(kind, id.to_string()))?;
        state
            .objects
            .remove(&(kind, id.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(kind, id))
    }

    async fn activate_changes(&self) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Activate);
        if state.fail_activate {
            return Err(BackendError::Status {
                status: 500,
                body: "reload failed".to_string(),
            });
        }
        Ok(())
    }
}

/// Hands out one shared [`MockBackend`] for every environment and remembers
/// which environments were asked for.
pub struct MockProvider {
    env: Environment,
    backend: Arc<MockBackend>,
    requested: Mutex<Vec<Environment>>,
}

impl MockProvider {
    pub fn new(env: Environment, backend: Arc<MockBackend>) -> Self {
        Self {
            env,
            backend,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn backend_handle(&self) -> Arc<MockBackend> {
        self.backend.clone()
    }

    pub fn requested(&self) -> Vec<Environment> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl BackendProvider for MockProvider {
    fn environment(&self) -> &Environment {
        &self.env
    }

    fn backend(&self, env: &Environment) -> Result<Arc<dyn Backend>> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(env.clone());
        Ok(self.backend.clone())
    }
}
