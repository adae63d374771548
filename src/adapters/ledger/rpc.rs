//! RPC Ledger - Rate-limited JSON-RPC LedgerClient
//!
//! Wraps reqwest with rate limiting, retries, and optional request
//! signing for the ledger's JSON-RPC endpoint.
//!
//! Reads are idempotent and retried with exponential backoff on any
//! transport failure. Submissions are retried only when the request
//! provably never reached the node (connect failure, HTTP 429); any
//! later failure leaves the outcome unknown and is surfaced as
//! `Transport` so the caller can re-locate before trying again.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::{
  AccountFilter, AccountState, LedgerIdentity, ResourceKind, SignedTransaction, TxReceipt,
};
use crate::ports::ledger::{LedgerClient, LedgerError, ProgramError};

use super::auth::RpcAuth;

/// Commitment level submissions wait for.
pub const CONFIRMED: &str = "confirmed";

/// Configuration for the RPC ledger client.
#[derive(Debug, Clone)]
pub struct RpcLedgerConfig {
  /// JSON-RPC endpoint.
  pub rpc_url: String,
  /// Margin program address.
  pub program_id: LedgerIdentity,
  /// Per-request timeout (submissions include confirmation time).
  pub timeout: Duration,
  /// Maximum retries on transient errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
  /// Request rate ceiling.
  pub requests_per_second: NonZeroU32,
}

/// Whether a request may be repeated after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
  /// Reads: always safe to repeat.
  Always,
  /// Submissions: only if the node never saw the request.
  IfNotSent,
}

enum Attempt<T> {
  Done(Result<T, LedgerError>),
  Retry(LedgerError),
}

#[derive(Serialize)]
struct RpcRequest<'a> {
  jsonrpc: &'static str,
  id: String,
  method: &'a str,
  params: Value,
}

#[derive(Deserialize)]
struct RpcEnvelope<T> {
  result: Option<T>,
  error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
  code: i64,
  message: String,
  #[serde(default)]
  data: Option<Value>,
}

impl RpcErrorBody {
  /// Program rejections carry a `ProgramError` in `data`; other server
  /// errors (node behind, unhealthy) are transport-level.
  fn into_ledger_error(self) -> LedgerError {
    if let Some(program) = self
      .data
      .and_then(|data| serde_json::from_value::<ProgramError>(data).ok())
    {
      return LedgerError::Rejected(program);
    }
    if (-32099..=-32000).contains(&self.code) {
      LedgerError::Transport(format!("rpc error {}: {}", self.code, self.message))
    } else {
      LedgerError::Decode(format!("rpc error {}: {}", self.code, self.message))
    }
  }
}

#[derive(Deserialize)]
struct WithContext<T> {
  value: T,
}

#[derive(Deserialize)]
struct TokenAmount {
  amount: String,
}

/// Exponential backoff before retry `attempt` (1-based), saturating.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
  base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

/// JSON-RPC ledger client.
pub struct RpcLedger {
  http: Client,
  config: RpcLedgerConfig,
  auth: Option<RpcAuth>,
  limiter: DefaultDirectRateLimiter,
}

impl RpcLedger {
  /// Create a new RPC ledger client.
  pub fn new(config: RpcLedgerConfig, auth: Option<RpcAuth>) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build HTTP client")?;
    let limiter = RateLimiter::direct(Quota::per_second(config.requests_per_second));

    Ok(Self {
      http,
      config,
      auth,
      limiter,
    })
  }

  /// Execute a JSON-RPC call with rate limiting and retries.
  async fn call<T: DeserializeOwned>(&self, method: &str, params: Value, replay: Replay) -> Result<T, LedgerError> {
    let body = serde_json::to_string(&RpcRequest {
      jsonrpc: "2.0",
      id: Uuid::new_v4().to_string(),
      method,
      params,
    })
    .map_err(|e| LedgerError::Decode(e.to_string()))?;

    let mut last_error = None;
    for attempt in 0..=self.config.max_retries {
      if attempt > 0 {
        let delay = backoff_delay(self.config.retry_base_delay, attempt);
        debug!(method, attempt, delay_ms = delay.as_millis(), "Retrying RPC request");
        sleep(delay).await;
      }
      self.limiter.until_ready().await;

      match self.attempt(&body, replay).await {
        Attempt::Done(result) => return result,
        Attempt::Retry(err) => {
          warn!(method, attempt, error = %err, "RPC request failed");
          last_error = Some(err);
        }
      }
    }

    Err(last_error.unwrap_or_else(|| LedgerError::Transport("max retries exceeded".to_string())))
  }

  async fn attempt<T: DeserializeOwned>(&self, body: &str, replay: Replay) -> Attempt<T> {
    let mut request = self
      .http
      .post(&self.config.rpc_url)
      .header(CONTENT_TYPE, "application/json")
      .body(body.to_string());
    if let Some(auth) = &self.auth {
      for (name, value) in auth.headers(body) {
        request = request.header(name, value);
      }
    }

    let unknown = |err: LedgerError| match replay {
      Replay::Always => Attempt::Retry(err),
      Replay::IfNotSent => Attempt::Done(Err(err)),
    };

    let response = match request.send().await {
      Ok(response) => response,
      Err(e) if e.is_connect() => return Attempt::Retry(LedgerError::Transport(e.to_string())),
      Err(e) => return unknown(LedgerError::Transport(e.to_string())),
    };

    match response.status() {
      StatusCode::TOO_MANY_REQUESTS => {
        return Attempt::Retry(LedgerError::Transport("rate limited".to_string()));
      }
      status if status.is_server_error() => {
        return unknown(LedgerError::Transport(format!("server error: {status}")));
      }
      status if !status.is_success() => {
        return Attempt::Done(Err(LedgerError::Transport(format!("HTTP {status}"))));
      }
      _ => {}
    }

    let envelope: RpcEnvelope<T> = match response.json().await {
      Ok(envelope) => envelope,
      Err(e) if e.is_decode() => return Attempt::Done(Err(LedgerError::Decode(e.to_string()))),
      Err(e) => return unknown(LedgerError::Transport(e.to_string())),
    };
    Attempt::Done(match (envelope.result, envelope.error) {
      (_, Some(error)) => Err(error.into_ledger_error()),
      (Some(result), None) => Ok(result),
      (None, None) => Err(LedgerError::Decode("empty RPC response".to_string())),
    })
  }
}

#[async_trait]
impl LedgerClient for RpcLedger {
  fn program_id(&self) -> LedgerIdentity {
    self.config.program_id
  }

  #[instrument(skip(self), fields(address = %address))]
  async fn get_account(&self, address: &LedgerIdentity) -> Result<Option<AccountState>, LedgerError> {
    let response: WithContext<Option<AccountState>> = self
      .call(
        "getAccount",
        json!([address, { "programId": self.config.program_id, "encoding": "json" }]),
        Replay::Always,
      )
      .await?;
    Ok(response.value)
  }

  #[instrument(skip(self, filters), fields(kind = %kind, filters = filters.len()))]
  async fn find_accounts(
    &self,
    kind: ResourceKind,
    filters: &[AccountFilter],
  ) -> Result<Vec<AccountState>, LedgerError> {
    let response: WithContext<Vec<AccountState>> = self
      .call(
        "findAccounts",
        json!([self.config.program_id, { "kind": kind, "filters": filters }]),
        Replay::Always,
      )
      .await?;
    debug!(matches = response.value.len(), "Accounts listed");
    Ok(response.value)
  }

  async fn token_balance(&self, token_account: &LedgerIdentity) -> Result<Option<u64>, LedgerError> {
    let response: WithContext<Option<TokenAmount>> = self
      .call("getTokenAccountBalance", json!([token_account]), Replay::Always)
      .await?;
    response
      .value
      .map(|t| {
        t.amount
          .parse::<u64>()
          .map_err(|e| LedgerError::Decode(format!("token amount `{}`: {e}", t.amount)))
      })
      .transpose()
  }

  #[instrument(skip_all, fields(signature = %transaction.id()))]
  async fn submit(&self, transaction: &SignedTransaction) -> Result<TxReceipt, LedgerError> {
    let bytes = serde_json::to_vec(transaction).map_err(|e| LedgerError::Decode(e.to_string()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    let receipt: TxReceipt = self
      .call(
        "sendTransaction",
        json!([encoded, { "encoding": "base64", "commitment": CONFIRMED }]),
        Replay::IfNotSent,
      )
      .await?;
    debug!(slot = receipt.slot, "Transaction confirmed");
    Ok(receipt)
  }

  async fn is_healthy(&self) -> bool {
    match self.call::<String>("getHealth", json!([]), Replay::Always).await {
      Ok(status) => status == "ok",
      Err(e) => {
        warn!(error = %e, "Ledger health check failed");
        false
      }
    }
  }
}
