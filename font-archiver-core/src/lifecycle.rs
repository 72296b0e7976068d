//! Repository lifecycle and the advisory gates checked before any transfer.
//!
//! Nothing here prompts. The shell asks the user, then passes the answers in as
//! an [`ExistingRepoPolicy`] and a [`GateDecisions`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{RemoteConfig, MIB};
use crate::contract::{
    AccountInfo, NewRepository, RateLimit, RemoteError, RemoteRepo, RemoteStore, RepoHandle,
};

/// Plan name that triggers the storage-class advisory.
pub const FREE_PLAN: &str = "free";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    Created,
    Replaced,
    AppendedTo,
}

/// What to do when the repository already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingRepoPolicy {
    Replace,
    Append,
}

/// A non-fatal precondition that needs an explicit override to proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryGate {
    /// The account plan has a small large-file storage quota.
    StorageClass { plan: String },
    /// The transfer is larger than the warning size.
    LargeTransfer { bytes: u64, warn_bytes: u64 },
}

impl fmt::Display for AdvisoryGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvisoryGate::StorageClass { plan } => write!(
                f,
                "the `{plan}` plan has limited large-file storage; large uploads may exceed the quota"
            ),
            AdvisoryGate::LargeTransfer { bytes, .. } => write!(
                f,
                "upload size is large ({:.2} MB); monthly data transfer limits may affect the upload",
                *bytes as f64 / MIB as f64
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot determine the remote identity: {0}")]
    Identity(#[source] RemoteError),

    #[error("cannot look up repository {repo}: {source}")]
    Lookup {
        repo: RepoHandle,
        #[source]
        source: RemoteError,
    },

    #[error("cannot delete repository {repo}: {source}")]
    Delete {
        repo: RepoHandle,
        #[source]
        source: RemoteError,
    },

    #[error("cannot create repository {repo}: {source}")]
    Create {
        repo: RepoHandle,
        #[source]
        source: RemoteError,
    },

    #[error("declined: {0}")]
    Declined(AdvisoryGate),
}

/// Result of the precondition check.
#[derive(Debug, Clone)]
pub struct Preconditions {
    pub account: AccountInfo,
    pub rate_limit: Option<RateLimit>,
    pub gates: Vec<AdvisoryGate>,
}

/// Fetch the account and rate limit and list the advisory gates that apply.
///
/// Only a failure to identify the account is fatal.
pub async fn assess_preconditions(
    store: &dyn RemoteStore,
    total_bytes: u64,
    warn_bytes: u64,
) -> Result<Preconditions, LifecycleError> {
    let account = store
        .current_user()
        .await
        .map_err(LifecycleError::Identity)?;
    let plan = account.plan.clone().unwrap_or_else(|| "unknown".to_string());
    info!(login = %account.login, plan = %plan, "Authenticated");

    let rate_limit = match store.rate_limit().await {
        Ok(limit) => {
            info!(remaining = limit.remaining, limit = limit.limit, "API rate limit");
            Some(limit)
        }
        Err(e) => {
            warn!(error = %e, "Could not read API rate limit");
            None
        }
    };

    let mut gates = Vec::new();
    if plan.eq_ignore_ascii_case(FREE_PLAN) {
        warn!(plan = %plan, "Free plan has limited large-file storage");
        gates.push(AdvisoryGate::StorageClass { plan });
    }
    info!(
        size_mb = %format!("{:.2}", total_bytes as f64 / MIB as f64),
        "Checking data transfer size"
    );
    if total_bytes > warn_bytes {
        warn!(
            size_mb = %format!("{:.2}", total_bytes as f64 / MIB as f64),
            "Upload size is large"
        );
        gates.push(AdvisoryGate::LargeTransfer {
            bytes: total_bytes,
            warn_bytes,
        });
    }

    Ok(Preconditions {
        account,
        rate_limit,
        gates,
    })
}

/// Overrides supplied by the user for the advisory gates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateDecisions {
    pub accept_storage_class: bool,
    pub accept_large_transfer: bool,
}

impl GateDecisions {
    pub fn accept_all() -> Self {
        Self {
            accept_storage_class: true,
            accept_large_transfer: true,
        }
    }

    pub fn accepts(&self, gate: &AdvisoryGate) -> bool {
        match gate {
            AdvisoryGate::StorageClass { .. } => self.accept_storage_class,
            AdvisoryGate::LargeTransfer { .. } => self.accept_large_transfer,
        }
    }

    /// Fails on the first gate that was not overridden.
    pub fn resolve(&self, gates: &[AdvisoryGate]) -> Result<(), LifecycleError> {
        match gates.iter().find(|gate| !self.accepts(gate)) {
            Some(gate) => {
                info!(gate = %gate, "Precondition declined");
                Err(LifecycleError::Declined(gate.clone()))
            }
            None => Ok(()),
        }
    }
}

/// Creation parameters for the archive repository.
pub fn new_repository(config: &RemoteConfig) -> NewRepository {
    NewRepository {
        name: config.repo_name.clone(),
        description: config.description.clone(),
        private: config.private,
        has_issues: true,
        has_projects: false,
        has_wiki: false,
    }
}

pub async fn find_repo(
    store: &dyn RemoteStore,
    handle: &RepoHandle,
) -> Result<Option<RemoteRepo>, LifecycleError> {
    store
        .get_repo(handle)
        .await
        .map_err(|source| LifecycleError::Lookup {
            repo: handle.clone(),
            source,
        })
}

/// A repository that is ready to receive files.
#[derive(Debug, Clone)]
pub struct EnsuredRepo {
    pub state: RepoState,
    pub repo: RemoteRepo,
}

/// Make sure `handle` exists. An existing repository is either appended to or
/// deleted and recreated; after a deletion this waits `grace` before creating.
pub async fn ensure_repo(
    store: &dyn RemoteStore,
    handle: &RepoHandle,
    request: &NewRepository,
    policy: ExistingRepoPolicy,
    grace: Duration,
) -> Result<EnsuredRepo, LifecycleError> {
    let state = match find_repo(store, handle).await? {
        Some(repo) if policy == ExistingRepoPolicy::Append => {
            info!(repo = %handle, "Appending to existing repository");
            return Ok(EnsuredRepo {
                state: RepoState::AppendedTo,
                repo,
            });
        }
        Some(_) => {
            store
                .delete_repo(handle)
                .await
                .map_err(|source| LifecycleError::Delete {
                    repo: handle.clone(),
                    source,
                })?;
            info!(repo = %handle, grace_secs = grace.as_secs_f32(), "Deleted repository");
            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
            RepoState::Replaced
        }
        None => RepoState::Created,
    };

    let repo = store
        .create_repo(request)
        .await
        .map_err(|source| LifecycleError::Create {
            repo: handle.clone(),
            source,
        })?;
    info!(repo = %handle, url = %repo.html_url, ?state, "Created repository");
    Ok(EnsuredRepo { state, repo })
}
