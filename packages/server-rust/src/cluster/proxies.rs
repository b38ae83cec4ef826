//! Proxy manager: registration, removal and full routing reinit.

use std::sync::Arc;

use topom_core::{is_valid_server_addr, Proxy, Snapshot};
use tracing::{info, warn};

use super::context;
use super::error::{group_entity, proxy_entity, TopomError, TopomResult};
use super::topom::Topom;

impl Topom {
    /// Registers the proxy listening on `admin_addr` and brings it online
    /// with the full slot table and sentinel list.
    ///
    /// The proxy stays registered if bringing it online fails; reinit it once
    /// it is reachable.
    ///
    /// # Errors
    ///
    /// Validation error for a malformed address or a token already
    /// registered; external errors while contacting the proxy.
    pub async fn create_proxy(&self, expected: Option<u64>, admin_addr: &str) -> TopomResult<Arc<Snapshot>> {
        if !is_valid_server_addr(admin_addr) {
            return Err(TopomError::validation(proxy_entity(admin_addr), "invalid admin address"));
        }
        let mut txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();

        let model = self
            .call(proxy_entity(admin_addr), self.clients.proxy.model(admin_addr))
            .await?;
        let token = if model.token.is_empty() {
            uuid::Uuid::new_v4().simple().to_string()
        } else {
            model.token
        };
        if snapshot.proxies.contains_key(&token) {
            return Err(TopomError::validation(proxy_entity(&token), "already exists"));
        }
        let proxy = Proxy {
            id: snapshot.max_proxy_id() + 1,
            token,
            admin_addr: admin_addr.to_string(),
            proxy_addr: model.proxy_addr,
            datacenter: model.datacenter,
            start_time: model.start_time,
        };
        self.call(proxy_entity(&proxy.token), self.clients.proxy.xping(&proxy))
            .await?;

        let (next, ()) = txn
            .commit(|s| {
                s.proxies.insert(proxy.token.clone(), proxy.clone());
                Ok(())
            })
            .await?;
        info!(proxy = %proxy.token, id = proxy.id, admin_addr, "proxy created");
        self.reinit(&next, &proxy).await?;
        Ok(next)
    }

    /// Shuts a proxy down and unregisters it. With `force` an unreachable
    /// proxy is unregistered anyway.
    ///
    /// # Errors
    ///
    /// Validation error for an unknown token; the shutdown error unless `force`.
    pub async fn remove_proxy(&self, expected: Option<u64>, token: &str, force: bool) -> TopomResult<Arc<Snapshot>> {
        let mut txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();
        let proxy = snapshot
            .proxies
            .get(token)
            .ok_or_else(|| TopomError::validation(proxy_entity(token), "doesn't exist"))?;

        if let Err(e) = self
            .call(proxy_entity(token), self.clients.proxy.shutdown(proxy))
            .await
        {
            if !force {
                return Err(e);
            }
            warn!(proxy = token, error = %e, "proxy shutdown failed, removing anyway");
        }

        let (next, ()) = txn
            .commit(|s| {
                s.proxies.remove(token);
                Ok(())
            })
            .await?;
        self.stats.forget_proxy(token);
        info!(proxy = token, force, "proxy removed");
        Ok(next)
    }

    /// Pushes the full slot table and sentinel list to a proxy and starts it.
    ///
    /// Refused while sentinels report a replica as master of some group,
    /// unless `allow_conflict`: the table would route writes to a server that
    /// is no longer the master. Does not change the topology.
    ///
    /// # Errors
    ///
    /// Validation error for an unknown token or an unaccepted conflict;
    /// external errors while contacting the proxy.
    pub async fn reinit_proxy(
        &self,
        expected: Option<u64>,
        token: &str,
        allow_conflict: bool,
    ) -> TopomResult<Arc<Snapshot>> {
        let txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();
        let proxy = snapshot
            .proxies
            .get(token)
            .ok_or_else(|| TopomError::validation(proxy_entity(token), "doesn't exist"))?;
        if !allow_conflict {
            self.check_ha_conflict(&snapshot)?;
        }
        self.reinit(&snapshot, proxy).await?;
        info!(proxy = token, "proxy reinitialized");
        Ok(snapshot)
    }

    fn check_ha_conflict(&self, snapshot: &Snapshot) -> TopomResult<()> {
        let masters = self.stats.ha_masters();
        for (gid, reported) in masters.iter() {
            let Some(g) = snapshot.group(*gid) else { continue };
            if g.index_of(reported).is_some_and(|i| i > 0) {
                return Err(TopomError::validation(
                    group_entity(*gid),
                    format!("sentinels report {reported} as master (ha conflict)"),
                ));
            }
        }
        Ok(())
    }

    async fn reinit(&self, snapshot: &Snapshot, proxy: &Proxy) -> TopomResult<()> {
        let target = proxy_entity(&proxy.token);
        let slots = context::all_slots(snapshot, Some(proxy));
        self.call(target.clone(), self.clients.proxy.fill_slots(proxy, &slots))
            .await?;
        self.call(target.clone(), self.clients.proxy.start(proxy))
            .await?;
        self.call(
            target,
            self.clients.proxy.set_sentinels(proxy, &snapshot.sentinel),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use topom_core::Health;

    use super::*;
    use crate::testing::{assign_slots, test_topom};

    #[tokio::test]
    async fn create_registers_and_initializes() {
        let (topom, fakes) = test_topom(4).await;
        let s = topom.create_proxy(None, "10.0.0.20:11080").await.unwrap();
        let p = s.proxies.values().next().unwrap();
        assert_eq!(p.id, 1);
        assert_eq!(p.token, "token-10.0.0.20:11080");
        assert_eq!(p.admin_addr, "10.0.0.20:11080");
        assert!(fakes.proxy.is_started("10.0.0.20:11080"));
        assert_eq!(fakes.proxy.slot_count("10.0.0.20:11080"), 4);

        let err = topom
            .create_proxy(None, "10.0.0.20:11080")
            .await
            .unwrap_err();
        assert!(matches!(err, TopomError::Validation { .. }));

        let s = topom.create_proxy(None, "10.0.0.21:11080").await.unwrap();
        assert_eq!(s.proxies["token-10.0.0.21:11080"].id, 2);
    }

    #[tokio::test]
    async fn unreachable_proxy_is_not_registered() {
        let (topom, fakes) = test_topom(4).await;
        assert!(topom.create_proxy(None, "not-an-addr").await.is_err());
        fakes.proxy.fail("10.0.0.20:11080");
        let err = topom
            .create_proxy(None, "10.0.0.20:11080")
            .await
            .unwrap_err();
        assert!(matches!(err, TopomError::External { .. }));
        assert!(topom.snapshot().proxies.is_empty());
    }

    #[tokio::test]
    async fn remove_needs_force_when_unreachable() {
        let (topom, fakes) = test_topom(4).await;
        topom.create_proxy(None, "10.0.0.20:11080").await.unwrap();
        let token = "token-10.0.0.20:11080";
        topom.refresh_proxy_stats().await;
        assert!(topom.stats().proxy(token).stats().is_some());
        fakes.proxy.fail("10.0.0.20:11080");

        assert!(topom.remove_proxy(None, token, false).await.is_err());
        assert_eq!(topom.snapshot().proxies.len(), 1);
        let s = topom.remove_proxy(None, token, true).await.unwrap();
        assert!(s.proxies.is_empty());
        assert!(matches!(topom.stats().proxy(token), Health::Pending));
        assert!(topom.remove_proxy(None, token, true).await.is_err());
    }

    #[tokio::test]
    async fn reinit_pushes_table_and_respects_ha_conflict() {
        let (topom, fakes) = test_topom(4).await;
        topom.create_group(None, 1).await.unwrap();
        topom.add_server(None, 1, "10.0.0.1:6379", "").await.unwrap();
        topom.add_server(None, 1, "10.0.0.2:6379", "").await.unwrap();
        assign_slots(&topom, 1, &[0, 1]).await;
        topom.create_proxy(None, "10.0.0.20:11080").await.unwrap();
        let token = "token-10.0.0.20:11080";

        let version = topom.version();
        let s = topom.reinit_proxy(Some(version), token, false).await.unwrap();
        assert_eq!(s.version, version);
        assert_eq!(
            fakes.proxy.slot("10.0.0.20:11080", 1).unwrap().backend_addr,
            "10.0.0.1:6379"
        );

        topom
            .stats()
            .set_ha_masters(BTreeMap::from([(1, "10.0.0.2:6379".to_string())]));
        let err = topom.reinit_proxy(None, token, false).await.unwrap_err();
        assert!(err.to_string().contains("ha conflict"));
        topom.reinit_proxy(None, token, true).await.unwrap();
    }
}
