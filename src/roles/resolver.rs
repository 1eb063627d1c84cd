use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::cache::RoleCache;
use crate::error::AppResult;
use crate::ledger::{normalize_address, validate_address, LedgerGateway, LedgerOperation, TxHandle};
use crate::store::models::Role;

/// Where a resolved role came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleSource {
    Cache,
    Ledger,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedRole {
    pub role: Role,
    pub source: RoleSource,
}

/// Role assignment and lookup over the ledger with a local cache in front.
pub struct RoleResolver {
    ledger: Arc<dyn LedgerGateway>,
    cache: Arc<RoleCache>,
    default_role: Role,
}

impl RoleResolver {
    pub fn new(ledger: Arc<dyn LedgerGateway>, cache: Arc<RoleCache>, default_role: Role) -> Self {
        Self {
            ledger,
            cache,
            default_role,
        }
    }

    pub fn cache(&self) -> &RoleCache {
        &self.cache
    }

    /// Submit `assignRole` and cache the role once the ledger accepted the transaction
    #[instrument(skip(self))]
    pub async fn assign(&self, address: &str, role: Role) -> AppResult<TxHandle> {
        validate_address(address)?;
        let address = normalize_address(address);

        let tx = self
            .ledger
            .submit(&LedgerOperation::AssignRole {
                address: address.clone(),
                role,
            })
            .await?;

        self.cache.assign(&address, role);
        info!(tx_hash = %tx, %address, %role, "Role assigned");
        Ok(tx)
    }

    /// Cache first, then the ledger, then the configured default role.
    ///
    /// Never fails on ledger trouble: an unreachable ledger, an empty role or an
    /// unknown role string all resolve to the default role. Only a malformed
    /// address is an error.
    pub async fn resolve(&self, address: &str) -> AppResult<ResolvedRole> {
        validate_address(address)?;
        let address = normalize_address(address);
        let address = address.as_str();

        if let Some(role) = self.cache.lookup(address) {
            return Ok(ResolvedRole {
                role,
                source: RoleSource::Cache,
            });
        }

        match self.ledger.get_role(address).await {
            Ok(Some(raw)) => match raw.parse::<Role>() {
                Ok(role) => Ok(ResolvedRole {
                    role,
                    source: RoleSource::Ledger,
                }),
                Err(_) => {
                    warn!(address, raw_role = %raw, default = %self.default_role, "Unknown ledger role, using default");
                    Ok(self.fallback())
                }
            },
            Ok(None) => Ok(self.fallback()),
            Err(e) => {
                warn!(address, error = %e, default = %self.default_role, "⚠️ Ledger role read failed, using default");
                Ok(self.fallback())
            }
        }
    }

    fn fallback(&self) -> ResolvedRole {
        ResolvedRole {
            role: self.default_role,
            source: RoleSource::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::ledger::mock::MockLedger;

    const ADDR: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn resolver(ledger: Arc<MockLedger>) -> RoleResolver {
        RoleResolver::new(ledger, Arc::new(RoleCache::new()), Role::Student)
    }

    #[tokio::test]
    async fn test_assign_populates_cache() {
        let ledger = Arc::new(MockLedger::new());
        let resolver = resolver(ledger.clone());

        resolver.assign(ADDR, Role::Teacher).await.unwrap();
        assert_eq!(resolver.cache().lookup(ADDR), Some(Role::Teacher));

        // Served from cache even when the ledger is down
        ledger.set_fail_reads(true);
        let resolved = resolver.resolve(ADDR).await.unwrap();
        assert_eq!(resolved.role, Role::Teacher);
        assert_eq!(resolved.source, RoleSource::Cache);
        assert_eq!(ledger.read_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_assign_does_not_cache() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_fail_submit(true);
        let resolver = resolver(ledger.clone());

        assert!(resolver.assign(ADDR, Role::Admin).await.is_err());
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_read_does_not_populate_cache() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_ledger_role(ADDR, "admin");
        let resolver = resolver(ledger.clone());

        let resolved = resolver.resolve(ADDR).await.unwrap();
        assert_eq!(resolved.role, Role::Admin);
        assert_eq!(resolved.source, RoleSource::Ledger);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_uppercase_prefix_reads_ledger_role() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_ledger_role(ADDR, "admin");
        let resolver = resolver(ledger.clone());

        let upper = format!("0X{}", &ADDR[2..].to_uppercase());
        let resolved = resolver.resolve(&upper).await.unwrap();
        assert_eq!(resolved.role, Role::Admin);
        assert_eq!(resolved.source, RoleSource::Ledger);

        resolver.assign(&upper, Role::Teacher).await.unwrap();
        assert_eq!(resolver.cache().lookup(ADDR), Some(Role::Teacher));
    }

    #[tokio::test]
    async fn test_degraded_mode_falls_back_to_default() {
        let ledger = Arc::new(MockLedger::new());
        let resolver = resolver(ledger.clone());

        // No role on ledger
        assert_eq!(resolver.resolve(ADDR).await.unwrap().source, RoleSource::Default);

        // Unknown role string
        ledger.set_ledger_role(ADDR, "dean");
        assert_eq!(resolver.resolve(ADDR).await.unwrap().role, Role::Student);

        // Ledger unreachable
        ledger.set_fail_reads(true);
        let resolved = resolver.resolve(ADDR).await.unwrap();
        assert_eq!(resolved.role, Role::Student);
        assert_eq!(resolved.source, RoleSource::Default);
    }

    #[tokio::test]
    async fn test_malformed_address_is_rejected() {
        let ledger = Arc::new(MockLedger::new());
        let resolver = resolver(ledger.clone());

        assert!(matches!(resolver.resolve("0x12").await, Err(AppError::InvalidAddress(_))));
        assert!(matches!(
            resolver.assign("nope", Role::Teacher).await,
            Err(AppError::InvalidAddress(_))
        ));
        assert_eq!(ledger.submit_count(), 0);
    }
}
