//! Idempotent Provisioner - Find-or-Create
//!
//! The workflow's central primitive. Each step locates its resource by
//! scope key and only creates it when the lookup comes back empty.
//!
//! Duplicate creation is guarded twice:
//! - in-process, provisioning is serialized per scope key
//! - across processes, the program's uniqueness constraint is the final
//!   arbiter: "already in use" re-runs the lookup and uses the winner
//!
//! A creation whose outcome is unknown (transport failure after submit)
//! is never blindly retried; the lookup runs again first. A transport
//! failure before the submit leaves nothing behind, so a resource the
//! lookup then finds was created elsewhere and is reported as found.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

use crate::domain::{Resource, ScopeKey};
use crate::error::{Error, Result};
use crate::ports::ledger::LedgerClient;
use crate::ports::repository::ProvisionOutcome;

use super::creator::Creator;
use super::locator::Locator;

/// Default number of creation attempts per step.
pub const DEFAULT_MAX_CREATE_ATTEMPTS: u32 = 3;

/// One find-or-create step: a scope key plus a way to create the resource.
#[async_trait]
pub trait ProvisionStep<L: LedgerClient>: Send + Sync {
  /// Resource the step provisions.
  type Output: Resource;

  /// Key that selects at most one existing resource.
  fn scope(&self) -> ScopeKey;

  /// Create the resource. Only called after the lookup found nothing.
  async fn create(&self, creator: &Creator<L>) -> Result<Self::Output>;
}

/// A provisioned resource and whether this run created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned<R> {
  /// Already existed; creation parameters were ignored.
  Found(R),
  /// Created by this run.
  Created(R),
}

impl<R> Provisioned<R> {
  /// The resource snapshot.
  pub fn resource(&self) -> &R {
    match self {
      Self::Found(r) | Self::Created(r) => r,
    }
  }

  /// Consume into the resource snapshot.
  pub fn into_inner(self) -> R {
    match self {
      Self::Found(r) | Self::Created(r) => r,
    }
  }

  /// Found or created.
  pub fn outcome(&self) -> ProvisionOutcome {
    match self {
      Self::Found(_) => ProvisionOutcome::Found,
      Self::Created(_) => ProvisionOutcome::Created,
    }
  }

  /// Whether this run created the resource.
  pub fn was_created(&self) -> bool {
    matches!(self, Self::Created(_))
  }
}

/// Per-scope-key async locks.
#[derive(Default)]
struct KeyedLocks {
  locks: Mutex<HashMap<ScopeKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
  async fn lock(&self, key: ScopeKey) -> OwnedMutexGuard<()> {
    let lock = {
      let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
      Arc::clone(locks.entry(key).or_default())
    };
    lock.lock_owned().await
  }
}

/// Why the previous creation attempt did not produce a resource.
#[derive(Clone, Copy, PartialEq, Eq)]
enum PreviousAttempt {
  None,
  LostRace,
  OutcomeUnknown,
}

/// Composes [`Locator`] and [`Creator`] into idempotent provisioning.
pub struct Provisioner<L: LedgerClient> {
  locator: Locator<L>,
  creator: Creator<L>,
  locks: KeyedLocks,
  max_create_attempts: u32,
}

impl<L: LedgerClient> Provisioner<L> {
  /// Create a provisioner over the given ledger.
  pub fn new(ledger: Arc<L>) -> Self {
    Self {
      locator: Locator::new(Arc::clone(&ledger)),
      creator: Creator::new(ledger),
      locks: KeyedLocks::default(),
      max_create_attempts: DEFAULT_MAX_CREATE_ATTEMPTS,
    }
  }

  /// Override the number of creation attempts (at least one).
  pub fn with_max_create_attempts(mut self, attempts: u32) -> Self {
    self.max_create_attempts = attempts.max(1);
    self
  }

  /// The locator used for lookups.
  pub fn locator(&self) -> &Locator<L> {
    &self.locator
  }

  /// Find the step's resource, or create it if it does not exist.
  ///
  /// On the found path the step's creation parameters are ignored, even
  /// if they differ from the existing resource.
  #[instrument(skip_all, fields(kind = %<S::Output as Resource>::KIND, key = %step.scope()))]
  pub async fn provision<S: ProvisionStep<L>>(&self, step: &S) -> Result<Provisioned<S::Output>> {
    let scope = step.scope();
    let _guard = self.locks.lock(scope).await;

    let mut previous = PreviousAttempt::None;
    let mut last_error = None;
    let mut attempts = 0;
    loop {
      if let Some(existing) = self.locator.locate::<S::Output>(&scope).await? {
        info!(address = %existing.address(), "Found existing resource");
        return Ok(match previous {
          PreviousAttempt::OutcomeUnknown => Provisioned::Created(existing),
          PreviousAttempt::None | PreviousAttempt::LostRace => Provisioned::Found(existing),
        });
      }

      if attempts == self.max_create_attempts {
        return Err(last_error.unwrap_or_else(|| Error::Transport("creation not attempted".to_string())));
      }
      attempts += 1;

      match step.create(&self.creator).await {
        Ok(created) => return Ok(Provisioned::Created(created)),
        Err(err) if err.is_already_exists() => {
          warn!(attempt = attempts, error = %err, "Lost creation race, re-locating");
          previous = PreviousAttempt::LostRace;
          last_error = Some(err);
        }
        Err(err @ Error::OutcomeUnknown { .. }) => {
          warn!(attempt = attempts, error = %err, "Creation outcome unknown, re-locating");
          previous = PreviousAttempt::OutcomeUnknown;
          last_error = Some(err);
        }
        Err(err @ Error::Transport(_)) => {
          // Failed before submitting; an earlier attempt's outcome still stands.
          warn!(attempt = attempts, error = %err, "Creation not submitted, re-locating");
          last_error = Some(err);
        }
        Err(err) => return Err(err),
      }
    }
  }
}
