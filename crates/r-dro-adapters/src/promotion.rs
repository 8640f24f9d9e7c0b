//! ---
//! dro_section: "05-external-interfaces"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Collaborator API adapters and retry policy."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::retry::{retry_idempotent, RetryPolicy};
use crate::{AdapterError, Result};

/// Role a region's data store currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbRole {
    Primary,
    Replica,
}

/// Seam over the database control API: promote command plus role query.
#[async_trait]
pub trait DatabaseControl: Send + Sync {
    async fn role(&self, region_id: &str) -> Result<DbRole>;
    /// Issue the promote/switchover command. Must tolerate repetition.
    async fn begin_promotion(&self, region_id: &str) -> Result<()>;
}

/// Production database control client speaking HTTP+JSON.
#[derive(Debug, Clone)]
pub struct HttpDatabaseControl {
    client: reqwest::Client,
    urls: IndexMap<String, String>,
    timeout: Duration,
}

impl HttpDatabaseControl {
    pub fn new(client: reqwest::Client, urls: IndexMap<String, String>, timeout: Duration) -> Self {
        Self {
            client,
            urls,
            timeout,
        }
    }

    fn base(&self, region_id: &str) -> Result<&str> {
        self.urls
            .get(region_id)
            .map(|url| url.trim_end_matches('/'))
            .ok_or_else(|| AdapterError::UnknownRegion(region_id.to_owned()))
    }
}

#[async_trait]
impl DatabaseControl for HttpDatabaseControl {
    async fn role(&self, region_id: &str) -> Result<DbRole> {
        let url = format!("{}/role", self.base(region_id)?);
        let body: serde_json::Value = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|err| AdapterError::MalformedBody(err.to_string()))?;
        match body.get("role").and_then(|v| v.as_str()) {
            Some("primary") => Ok(DbRole::Primary),
            Some("replica") | Some("secondary") => Ok(DbRole::Replica),
            other => Err(AdapterError::MalformedBody(format!(
                "unexpected role value: {other:?}"
            ))),
        }
    }

    async fn begin_promotion(&self, region_id: &str) -> Result<()> {
        let url = format!("{}/promote", self.base(region_id)?);
        self.client
            .post(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Promotes a secondary database replica to primary role, idempotently.
///
/// Idempotence is mandatory: the coordinator may retry this step after a
/// crash, and an already-primary target is a no-op success.
pub struct PromotionController {
    control: Arc<dyn DatabaseControl>,
    retry: RetryPolicy,
    timeout: Duration,
    poll: Duration,
}

impl PromotionController {
    pub fn new(control: Arc<dyn DatabaseControl>, timeout: Duration, poll: Duration) -> Self {
        Self {
            control,
            retry: RetryPolicy::default(),
            timeout,
            poll,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Promote `region_id` and wait until its role endpoint reports primary,
    /// bounded by the configured timeout.
    pub async fn promote(&self, region_id: &str) -> Result<()> {
        let current = retry_idempotent("db.role", &self.retry, || async {
            self.control.role(region_id).await
        })
        .await?;
        if current == DbRole::Primary {
            debug!(region = region_id, "region already primary; promotion is a no-op");
            return Ok(());
        }

        retry_idempotent("db.promote", &self.retry, || async {
            self.control.begin_promotion(region_id).await
        })
        .await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match self.control.role(region_id).await {
                Ok(DbRole::Primary) => {
                    info!(region = region_id, "promotion completed");
                    return Ok(());
                }
                Ok(DbRole::Replica) => {
                    debug!(region = region_id, "promotion still in progress");
                }
                Err(err) if err.is_transient() => {
                    debug!(region = region_id, error = %err, "role query failed during promotion wait");
                }
                Err(err) => return Err(err),
            }
            if Instant::now() + self.poll > deadline {
                return Err(AdapterError::PromotionTimeout {
                    region: region_id.to_owned(),
                    waited_secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeControl {
        role: Mutex<DbRole>,
        promote_calls: AtomicU32,
        /// Role queries remaining before a started promotion converges.
        converge_after: Mutex<u32>,
    }

    impl FakeControl {
        fn primary() -> Self {
            Self {
                role: Mutex::new(DbRole::Primary),
                promote_calls: AtomicU32::new(0),
                converge_after: Mutex::new(0),
            }
        }

        fn replica(converge_after: u32) -> Self {
            Self {
                role: Mutex::new(DbRole::Replica),
                promote_calls: AtomicU32::new(0),
                converge_after: Mutex::new(converge_after),
            }
        }
    }

    #[async_trait]
    impl DatabaseControl for FakeControl {
        async fn role(&self, _region: &str) -> Result<DbRole> {
            let mut role = self.role.lock();
            if self.promote_calls.load(Ordering::SeqCst) > 0 && *role == DbRole::Replica {
                let mut remaining = self.converge_after.lock();
                if *remaining == 0 {
                    *role = DbRole::Primary;
                } else {
                    *remaining -= 1;
                }
            }
            Ok(*role)
        }

        async fn begin_promotion(&self, _region: &str) -> Result<()> {
            self.promote_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller(control: Arc<FakeControl>) -> PromotionController {
        PromotionController::new(
            control,
            Duration::from_millis(200),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn promoting_an_already_primary_region_is_a_no_op() {
        let control = Arc::new(FakeControl::primary());
        let controller = controller(control.clone());

        controller.promote("eu-west").await.unwrap();
        controller.promote("eu-west").await.unwrap();

        assert_eq!(control.promote_calls.load(Ordering::SeqCst), 0);
        assert_eq!(control.role("eu-west").await.unwrap(), DbRole::Primary);
    }

    #[tokio::test]
    async fn promotion_waits_for_role_flip() {
        let control = Arc::new(FakeControl::replica(2));
        let controller = controller(control.clone());

        controller.promote("eu-west").await.unwrap();
        assert_eq!(control.promote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(control.role("eu-west").await.unwrap(), DbRole::Primary);
    }

    #[tokio::test]
    async fn promotion_times_out_when_role_never_flips() {
        let control = Arc::new(FakeControl::replica(u32::MAX));
        let controller = controller(control);

        let err = controller.promote("eu-west").await.unwrap_err();
        assert!(matches!(err, AdapterError::PromotionTimeout { .. }));
    }
}
