//! In-memory identity provider
//!
//! Keeps pools, resource servers and clients in process memory and counts
//! every call and creation so tests can assert idempotency. Failures can be
//! queued per operation, and a create can be made to lose a race: the object
//! is inserted as if by a concurrent caller and `AlreadyExists` is returned.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Result, TollgateError};
use crate::provider::types::{ClientSpec, M2mClient, ResourceServer, UserPool};
use crate::provider::{pool_discovery_url, IdentityProviderAdmin};

/// Administrative operations, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    /// `list_pools`
    ListPools,
    /// `create_pool`
    CreatePool,
    /// `list_resource_servers`
    ListResourceServers,
    /// `create_resource_server`
    CreateResourceServer,
    /// `add_scopes`
    AddScopes,
    /// `list_clients`
    ListClients,
    /// `create_client`
    CreateClient,
    /// `describe_client`
    DescribeClient,
    /// `delete_client`
    DeleteClient,
}

#[derive(Debug, Default)]
struct State {
    pools: Vec<UserPool>,
    servers: HashMap<String, Vec<ResourceServer>>,
    clients: HashMap<String, Vec<M2mClient>>,
    calls: HashMap<ProviderOp, usize>,
    created: HashMap<ProviderOp, usize>,
    failures: HashMap<ProviderOp, VecDeque<TollgateError>>,
    races: HashMap<ProviderOp, usize>,
    reveal_secrets: bool,
}

/// In-memory [`IdentityProviderAdmin`].
#[derive(Debug)]
pub struct MemoryProviderAdmin {
    issuer_base: String,
    state: Mutex<State>,
}

impl Default for MemoryProviderAdmin {
    fn default() -> Self {
        Self::new("https://idp.example.test")
    }
}

impl MemoryProviderAdmin {
    /// Creates an empty provider whose discovery URLs start with `issuer_base`.
    pub fn new(issuer_base: &str) -> Self {
        Self {
            issuer_base: issuer_base.to_string(),
            state: Mutex::new(State {
                reveal_secrets: true,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queues `error` to be returned by the next call of `op`.
    pub fn fail_next(&self, op: ProviderOp, error: TollgateError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Makes the next `count` creates of `op` lose a race.
    pub fn lose_next_race(&self, op: ProviderOp, count: usize) {
        *self.lock().races.entry(op).or_default() += count;
    }

    /// Controls whether `describe_client` returns secrets.
    pub fn set_reveal_secrets(&self, reveal: bool) {
        self.lock().reveal_secrets = reveal;
    }

    /// Number of calls made to `op`, including failed ones.
    pub fn calls(&self, op: ProviderOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of objects created by `op` (including race winners).
    pub fn created(&self, op: ProviderOp) -> usize {
        self.lock().created.get(&op).copied().unwrap_or(0)
    }

    /// Total resource servers across pools.
    pub fn resource_server_count(&self) -> usize {
        self.lock().servers.values().map(Vec::len).sum()
    }

    /// Total clients across pools.
    pub fn client_count(&self) -> usize {
        self.lock().clients.values().map(Vec::len).sum()
    }

    /// Seeds a pool directly.
    pub fn insert_pool(&self, name: &str) -> UserPool {
        let pool = UserPool {
            id: format!("pool-{}", Uuid::new_v4().simple()),
            name: name.to_string(),
        };
        self.lock().pools.push(pool.clone());
        pool
    }

    /// Records a call and pops any queued failure.
    fn enter(&self, op: ProviderOp) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(error) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error.into());
        }
        Ok(state)
    }

    fn take_race(state: &mut State, op: ProviderOp) -> bool {
        match state.races.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

fn require_pool(state: &State, pool_id: &str) -> Result<()> {
    if state.pools.iter().any(|p| p.id == pool_id) {
        Ok(())
    } else {
        Err(TollgateError::NotFound(format!("pool {}", pool_id)).into())
    }
}

fn without_secret(mut client: M2mClient) -> M2mClient {
    client.client_secret = None;
    client
}

#[async_trait]
impl IdentityProviderAdmin for MemoryProviderAdmin {
    async fn list_pools(&self) -> Result<Vec<UserPool>> {
        let state = self.enter(ProviderOp::ListPools)?;
        Ok(state.pools.clone())
    }

    async fn create_pool(&self, name: &str) -> Result<UserPool> {
        let mut state = self.enter(ProviderOp::CreatePool)?;
        let raced = Self::take_race(&mut state, ProviderOp::CreatePool);
        if raced || state.pools.iter().any(|p| p.name == name) {
            if raced {
                state.pools.push(UserPool {
                    id: format!("pool-{}", Uuid::new_v4().simple()),
                    name: name.to_string(),
                });
                *state.created.entry(ProviderOp::CreatePool).or_default() += 1;
            }
            return Err(TollgateError::AlreadyExists(format!("pool {}", name)).into());
        }
        let pool = UserPool {
            id: format!("pool-{}", Uuid::new_v4().simple()),
            name: name.to_string(),
        };
        state.pools.push(pool.clone());
        *state.created.entry(ProviderOp::CreatePool).or_default() += 1;
        Ok(pool)
    }

    async fn list_resource_servers(&self, pool_id: &str) -> Result<Vec<ResourceServer>> {
        let state = self.enter(ProviderOp::ListResourceServers)?;
        require_pool(&state, pool_id)?;
        Ok(state.servers.get(pool_id).cloned().unwrap_or_default())
    }

    async fn create_resource_server(
        &self,
        pool_id: &str,
        server: &ResourceServer,
    ) -> Result<ResourceServer> {
        let mut state = self.enter(ProviderOp::CreateResourceServer)?;
        require_pool(&state, pool_id)?;
        let raced = Self::take_race(&mut state, ProviderOp::CreateResourceServer);
        let exists = state
            .servers
            .get(pool_id)
            .is_some_and(|s| s.iter().any(|s| s.identifier == server.identifier));
        if raced && !exists {
            state
                .servers
                .entry(pool_id.to_string())
                .or_default()
                .push(server.clone());
            *state.created.entry(ProviderOp::CreateResourceServer).or_default() += 1;
        }
        if raced || exists {
            return Err(
                TollgateError::AlreadyExists(format!("resource server {}", server.identifier))
                    .into(),
            );
        }
        state
            .servers
            .entry(pool_id.to_string())
            .or_default()
            .push(server.clone());
        *state.created.entry(ProviderOp::CreateResourceServer).or_default() += 1;
        Ok(server.clone())
    }

    async fn add_scopes(
        &self,
        pool_id: &str,
        identifier: &str,
        scopes: &BTreeSet<String>,
    ) -> Result<ResourceServer> {
        let mut state = self.enter(ProviderOp::AddScopes)?;
        let server = state
            .servers
            .get_mut(pool_id)
            .and_then(|s| s.iter_mut().find(|s| s.identifier == identifier))
            .ok_or_else(|| TollgateError::NotFound(format!("resource server {}", identifier)))?;
        server.scopes.extend(scopes.iter().cloned());
        Ok(server.clone())
    }

    async fn list_clients(&self, pool_id: &str) -> Result<Vec<M2mClient>> {
        let state = self.enter(ProviderOp::ListClients)?;
        require_pool(&state, pool_id)?;
        Ok(state
            .clients
            .get(pool_id)
            .map(|c| c.iter().cloned().map(without_secret).collect())
            .unwrap_or_default())
    }

    async fn create_client(&self, pool_id: &str, spec: &ClientSpec) -> Result<M2mClient> {
        let mut state = self.enter(ProviderOp::CreateClient)?;
        require_pool(&state, pool_id)?;
        let raced = Self::take_race(&mut state, ProviderOp::CreateClient);
        let client = M2mClient {
            pool_id: pool_id.to_string(),
            client_id: Uuid::new_v4().simple().to_string(),
            client_name: spec.client_name.clone(),
            client_secret: spec
                .generate_secret
                .then(|| format!("secret-{}", Uuid::new_v4().simple())),
            allowed_grants: spec.allowed_grants.clone(),
            allowed_scopes: spec.allowed_scopes.clone(),
        };
        // Client names are not unique on every provider; this one enforces it.
        let exists = state
            .clients
            .get(pool_id)
            .is_some_and(|c| c.iter().any(|c| c.client_name == spec.client_name));
        if raced && !exists {
            state
                .clients
                .entry(pool_id.to_string())
                .or_default()
                .push(client);
            *state.created.entry(ProviderOp::CreateClient).or_default() += 1;
            return Err(TollgateError::AlreadyExists(format!("client {}", spec.client_name)).into());
        }
        if exists {
            return Err(TollgateError::AlreadyExists(format!("client {}", spec.client_name)).into());
        }
        state
            .clients
            .entry(pool_id.to_string())
            .or_default()
            .push(client.clone());
        *state.created.entry(ProviderOp::CreateClient).or_default() += 1;
        Ok(client)
    }

    async fn describe_client(&self, pool_id: &str, client_id: &str) -> Result<M2mClient> {
        let state = self.enter(ProviderOp::DescribeClient)?;
        let client = state
            .clients
            .get(pool_id)
            .and_then(|c| c.iter().find(|c| c.client_id == client_id))
            .cloned()
            .ok_or_else(|| TollgateError::NotFound(format!("client {}", client_id)))?;
        Ok(if state.reveal_secrets {
            client
        } else {
            without_secret(client)
        })
    }

    async fn delete_client(&self, pool_id: &str, client_id: &str) -> Result<()> {
        let mut state = self.enter(ProviderOp::DeleteClient)?;
        if let Some(clients) = state.clients.get_mut(pool_id) {
            clients.retain(|c| c.client_id != client_id);
        }
        Ok(())
    }

    fn discovery_url(&self, pool_id: &str) -> String {
        pool_discovery_url(&self.issuer_base, pool_id)
    }
}
