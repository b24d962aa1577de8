//! Per-workspace tool manifests.
//!
//! A manifest is the authoritative list of what a tenant may call: argument
//! shapes, policy metadata and timeouts. Lookups go through a TTL cache so a
//! hot workspace never blocks on its backing source; refresh is coalesced
//! and safe to race. A workspace with no manifest resolves to an empty one,
//! and every planned call then fails policy, which is the intended containment.

use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Primitive argument types a tool may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    String,
    Integer,
    Number,
    Boolean,
}

/// One declared tool argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    pub kind: ArgKind,
    #[serde(default)]
    pub required: bool,
}

impl ArgumentSpec {
    pub fn required(name: &str, kind: ArgKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ArgKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }
}

/// Policy metadata enforced by the policy engine and broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub max_rps_per_workspace: u32,
    pub requires_workspace: bool,
    pub idempotent: bool,
    pub write: bool,
}

/// One callable tool as the manifest declares it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifestEntry {
    pub name: String,
    pub args: Vec<ArgumentSpec>,
    pub policy: ToolPolicy,
    /// Per-call deadline; the broker default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ToolManifestEntry {
    pub fn required_args(&self) -> impl Iterator<Item = &ArgumentSpec> {
        self.args.iter().filter(|a| a.required)
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

/// The full manifest for one workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolManifest {
    entries: Vec<ToolManifestEntry>,
}

impl ToolManifest {
    pub fn new(entries: Vec<ToolManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, tool: &str) -> Option<&ToolManifestEntry> {
        self.entries.iter().find(|e| e.name == tool)
    }

    pub fn contains(&self, tool: &str) -> bool {
        self.get(tool).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolManifestEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The built-in manifest for the servicios vertical. Workspaces that
    /// bring their own manifest source override this entirely.
    pub fn servicios_default() -> Self {
        let read = |rps| ToolPolicy {
            max_rps_per_workspace: rps,
            requires_workspace: true,
            idempotent: true,
            write: false,
        };
        let write = |rps| ToolPolicy {
            max_rps_per_workspace: rps,
            requires_workspace: true,
            idempotent: false,
            write: true,
        };
        Self::new(vec![
            ToolManifestEntry {
                name: "get_business_hours".into(),
                args: vec![],
                policy: read(5),
                timeout_ms: Some(800),
            },
            ToolManifestEntry {
                name: "get_service_packages".into(),
                args: vec![],
                policy: read(5),
                timeout_ms: Some(800),
            },
            ToolManifestEntry {
                name: "query_knowledge_base".into(),
                args: vec![ArgumentSpec::required("query", ArgKind::String)],
                policy: read(5),
                timeout_ms: Some(900),
            },
            ToolManifestEntry {
                name: "check_service_availability".into(),
                args: vec![
                    ArgumentSpec::required("preferred_date", ArgKind::String),
                    ArgumentSpec::optional("preferred_time", ArgKind::String),
                    ArgumentSpec::optional("service_type", ArgKind::String),
                ],
                policy: read(5),
                timeout_ms: Some(800),
            },
            ToolManifestEntry {
                name: "book_appointment".into(),
                args: vec![
                    ArgumentSpec::required("service_type", ArgKind::String),
                    ArgumentSpec::required("preferred_date", ArgKind::String),
                    ArgumentSpec::required("preferred_time", ArgKind::String),
                    ArgumentSpec::required("client_name", ArgKind::String),
                    ArgumentSpec::required("client_email", ArgKind::String),
                    ArgumentSpec::optional("client_phone", ArgKind::String),
                ],
                policy: write(2),
                timeout_ms: Some(1500),
            },
            ToolManifestEntry {
                name: "cancel_appointment".into(),
                args: vec![ArgumentSpec::required("booking_id", ArgKind::String)],
                policy: write(2),
                timeout_ms: Some(1200),
            },
            ToolManifestEntry {
                name: "reschedule_appointment".into(),
                args: vec![
                    ArgumentSpec::required("booking_id", ArgKind::String),
                    ArgumentSpec::required("preferred_date", ArgKind::String),
                    ArgumentSpec::required("preferred_time", ArgKind::String),
                ],
                policy: write(2),
                timeout_ms: Some(1500),
            },
        ])
    }
}

/// Where manifests come from (admin API, DB, fixture…).
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, workspace_id: &str) -> Result<ToolManifest>;
}

/// Fixed in-memory source: per-workspace manifests plus an optional
/// default for unlisted workspaces.
#[derive(Default)]
pub struct StaticManifestSource {
    workspaces: HashMap<String, ToolManifest>,
    default: Option<ToolManifest>,
}

impl StaticManifestSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(mut self, workspace_id: &str, manifest: ToolManifest) -> Self {
        self.workspaces.insert(workspace_id.to_string(), manifest);
        self
    }

    /// Serve this manifest to every workspace not explicitly listed.
    pub fn with_default(mut self, manifest: ToolManifest) -> Self {
        self.default = Some(manifest);
        self
    }
}

#[async_trait]
impl ManifestSource for StaticManifestSource {
    async fn fetch(&self, workspace_id: &str) -> Result<ToolManifest> {
        Ok(self
            .workspaces
            .get(workspace_id)
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_default())
    }
}

/// TTL-cached manifest lookup shared process-wide.
pub struct CachedManifestStore {
    source: Arc<dyn ManifestSource>,
    cache: Cache<String, Arc<ToolManifest>>,
}

impl CachedManifestStore {
    /// Default cache TTL. Operators may tune below this bound.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(source: Arc<dyn ManifestSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: Cache::builder().time_to_live(ttl).max_capacity(10_000).build(),
        }
    }

    /// Resolve the manifest for a workspace. Concurrent misses for the same
    /// workspace coalesce into a single source fetch; a failing source
    /// degrades to an empty manifest rather than an error.
    pub async fn manifest(&self, workspace_id: &str) -> Arc<ToolManifest> {
        let source = Arc::clone(&self.source);
        let key = workspace_id.to_string();
        self.cache
            .get_with(key.clone(), async move {
                match source.fetch(&key).await {
                    Ok(manifest) => Arc::new(manifest),
                    Err(error) => {
                        warn!(workspace = %key, %error, "manifest fetch failed, serving empty");
                        Arc::new(ToolManifest::default())
                    }
                }
            })
            .await
    }

    /// Drop the cached manifest for a workspace (admin-triggered refresh).
    pub async fn invalidate(&self, workspace_id: &str) {
        self.cache.invalidate(workspace_id).await;
    }
}
