//! Access contexts and scope enforcement
//!
//! Every public operation carries an [`AccessContext`] describing the
//! caller: agent identity, optional tenant, role, and capability grants.
//! Backends apply [`AccessContext::can_access_memory`] as a filter on every
//! read path; the write path rejects scope escalations.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::MnemographError;
use crate::memory::types::{Memory, Scope};

/// Caller role, in increasing order of privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Agent,
    Supervisor,
    System,
}

/// Capability grants expanding what an agent-role context may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadShared,
    WriteShared,
    ReadGlobal,
    WriteGlobal,
}

impl FromStr for Permission {
    type Err = MnemographError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_shared" => Ok(Permission::ReadShared),
            "write_shared" => Ok(Permission::WriteShared),
            "read_global" => Ok(Permission::ReadGlobal),
            "write_global" => Ok(Permission::WriteGlobal),
            other => Err(MnemographError::validation(
                "permissions",
                format!("unknown permission '{other}'"),
            )),
        }
    }
}

/// Per-request caller identity and capability bundle.
///
/// Constructed per request, passed by value down the call chain, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessContext {
    pub agent_id: String,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub permissions: HashSet<Permission>,
    #[serde(default)]
    pub allow_shared: bool,
    #[serde(default)]
    pub allow_global: bool,
}

impl AccessContext {
    /// Plain agent context with no extra grants
    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            tenant_id: None,
            role: Role::Agent,
            permissions: HashSet::new(),
            allow_shared: false,
            allow_global: false,
        }
    }

    /// Supervisor context: reads shared and global, writes shared
    pub fn supervisor(agent_id: impl Into<String>) -> Self {
        Self {
            role: Role::Supervisor,
            ..Self::agent(agent_id)
        }
    }

    /// System context: unrestricted
    pub fn system() -> Self {
        Self {
            role: Role::System,
            ..Self::agent("system")
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn with_shared_access(mut self) -> Self {
        self.allow_shared = true;
        self
    }

    pub fn with_global_access(mut self) -> Self {
        self.allow_global = true;
        self
    }

    /// Whether this context may read memories of the given scope at all.
    ///
    /// Private is always readable (ownership is checked per memory in
    /// [`Self::can_access_memory`]).
    pub fn can_read(&self, scope: Scope) -> bool {
        match scope {
            Scope::Private => true,
            Scope::Shared => {
                self.allow_shared
                    || self.permissions.contains(&Permission::ReadShared)
                    || matches!(self.role, Role::Supervisor | Role::System)
            }
            Scope::Global => {
                self.allow_global
                    || self.permissions.contains(&Permission::ReadGlobal)
                    || matches!(self.role, Role::Supervisor | Role::System)
            }
        }
    }

    /// Whether this context may write memories of the given scope
    pub fn can_write(&self, scope: Scope) -> bool {
        match scope {
            Scope::Private => true,
            Scope::Shared => {
                self.permissions.contains(&Permission::WriteShared)
                    || matches!(self.role, Role::Supervisor | Role::System)
            }
            Scope::Global => {
                self.permissions.contains(&Permission::WriteGlobal)
                    || self.role == Role::System
            }
        }
    }

    /// Full per-memory access decision used by every backend read path
    pub fn can_access_memory(&self, memory: &Memory) -> bool {
        if self.role == Role::System {
            return true;
        }
        match memory.scope {
            Scope::Private => memory.agent_id == self.agent_id,
            Scope::Shared => self.can_read(Scope::Shared) && self.tenant_matches(memory),
            Scope::Global => self.can_read(Scope::Global),
        }
    }

    /// Deterministic ordered list of scopes this context may read
    pub fn readable_scopes(&self) -> Vec<Scope> {
        let mut scopes = vec![Scope::Private];
        if self.can_read(Scope::Shared) {
            scopes.push(Scope::Shared);
        }
        if self.can_read(Scope::Global) {
            scopes.push(Scope::Global);
        }
        scopes
    }

    /// Tenant rule for shared memories: visible when the context carries
    /// no tenant, or when the tenant ids are equal.
    fn tenant_matches(&self, memory: &Memory) -> bool {
        match &self.tenant_id {
            None => true,
            Some(tenant) => memory.tenant_id.as_deref() == Some(tenant.as_str()),
        }
    }
}
