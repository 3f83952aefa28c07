use super::protocol::{ClusterJoinCheck, JoinRequest, JoinRole};
use super::result::JoinCheckResult;
use crate::core::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{Instrument, info_span};

/// Name and order of a check as advertised to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CheckEntry {
    name: String,
    order: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckManifest {
    checks: Vec<CheckEntry>,
}

/// Final outcome of a join handshake, from this node's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDecision {
    pub result: JoinCheckResult,
    /// The check that produced a non-`Ok` result, if any.
    pub decided_by: Option<String>,
}

impl JoinDecision {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Ordered set of join checks run whenever two nodes attempt to merge.
#[derive(Default, Clone)]
pub struct JoinCheckRegistry {
    checks: Vec<Arc<dyn ClusterJoinCheck>>,
}

impl JoinCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a check, keeping the list sorted by `(order, name)`.
    pub fn register(&mut self, check: Arc<dyn ClusterJoinCheck>) -> &mut Self {
        let key = (check.order(), check.name().to_string());
        let position = self
            .checks
            .iter()
            .position(|existing| (existing.order(), existing.name().to_string()) > key)
            .unwrap_or(self.checks.len());
        self.checks.insert(position, check);
        self
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Runs the handshake on the node that accepted the connection.
    pub async fn run_accept(&self, request: &mut JoinRequest) -> Result<JoinDecision> {
        debug_assert_eq!(request.role(), JoinRole::Acceptor);
        let span = info_span!("join.accept", node = %request.local_node());
        self.run(request).instrument(span).await
    }

    /// Runs the handshake on the node that opened the connection.
    pub async fn run_connect(&self, request: &mut JoinRequest) -> Result<JoinDecision> {
        debug_assert_eq!(request.role(), JoinRole::Initiator);
        let span = info_span!("join.connect", node = %request.local_node());
        self.run(request).instrument(span).await
    }

    fn manifest(&self) -> CheckManifest {
        CheckManifest {
            checks: self
                .checks
                .iter()
                .map(|c| CheckEntry {
                    name: c.name().to_string(),
                    order: c.order(),
                })
                .collect(),
        }
    }

    async fn run(&self, request: &mut JoinRequest) -> Result<JoinDecision> {
        let role = request.role();
        let peer = exchange(request, role, &self.manifest()).await?;

        let local: BTreeMap<&str, &Arc<dyn ClusterJoinCheck>> =
            self.checks.iter().map(|c| (c.name(), c)).collect();
        let schedule = match role {
            JoinRole::Acceptor => schedule(&self.manifest(), &peer),
            JoinRole::Initiator => schedule(&peer, &self.manifest()),
        };

        for entry in schedule {
            let peer_has = peer.checks.iter().any(|p| p.name == entry.name);
            let local_result = match local.get(entry.name.as_str()) {
                Some(check) if peer_has => match role {
                    JoinRole::Acceptor => check.accept(request).await?,
                    JoinRole::Initiator => check.connect(request).await?,
                },
                Some(check) => {
                    warn!("Peer lacks join check '{}'", entry.name);
                    check.on_unknown(request).await?
                }
                // Peer runs its own fallback for this one.
                None => JoinCheckResult::Ok,
            };

            let peer_result: JoinCheckResult = exchange(request, role, &local_result).await?;
            let result = local_result.merge(peer_result.from_peer_view());

            if result.is_ok() {
                debug!("Join check '{}' passed", entry.name);
                continue;
            }
            info!(
                "Join check '{}' on node '{}' concluded {:?}",
                entry.name,
                request.local_node(),
                result
            );
            return Ok(JoinDecision {
                result,
                decided_by: Some(entry.name),
            });
        }

        Ok(JoinDecision {
            result: JoinCheckResult::Ok,
            decided_by: None,
        })
    }
}

/// Sends ours and reads theirs; the initiator always speaks first.
/// Union of both manifests in walk order.
///
/// Both sides must walk the same sequence to stay in step, so a check known
/// to both nodes is placed by the acceptor's order.
fn schedule(acceptor: &CheckManifest, initiator: &CheckManifest) -> Vec<CheckEntry> {
    let mut schedule = acceptor.checks.clone();
    for entry in &initiator.checks {
        match schedule.iter().find(|a| a.name == entry.name) {
            Some(known) if known.order != entry.order => warn!(
                "Join check '{}' ordered {} by acceptor and {} by initiator",
                entry.name, known.order, entry.order
            ),
            Some(_) => {}
            None => schedule.push(entry.clone()),
        }
    }
    schedule.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name)));
    schedule
}

async fn exchange<T>(request: &mut JoinRequest, role: JoinRole, ours: &T) -> Result<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    match role {
        JoinRole::Initiator => {
            request.send(ours).await?;
            request.receive().await
        }
        JoinRole::Acceptor => {
            let theirs = request.receive().await?;
            request.send(ours).await?;
            Ok(theirs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::PassivationTarget;
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        order: i32,
        result: JoinCheckResult,
    }

    #[async_trait]
    impl ClusterJoinCheck for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        async fn accept(&self, request: &mut JoinRequest) -> Result<JoinCheckResult> {
            let _: String = request.receive().await?;
            request.send("ack").await?;
            Ok(self.result.clone())
        }

        async fn connect(&self, request: &mut JoinRequest) -> Result<JoinCheckResult> {
            request.send("hello").await?;
            let _: String = request.receive().await?;
            Ok(JoinCheckResult::Ok)
        }
    }

    fn fixed(name: &'static str, order: i32, result: JoinCheckResult) -> Arc<dyn ClusterJoinCheck> {
        Arc::new(Fixed { name, order, result })
    }

    async fn handshake(acceptor: JoinCheckRegistry, initiator: JoinCheckRegistry) -> (JoinDecision, JoinDecision) {
        let (a, b) = tokio::io::duplex(4096);
        let mut accept = JoinRequest::new(a, JoinRole::Acceptor, "acceptor");
        let mut connect = JoinRequest::new(b, JoinRole::Initiator, "initiator");
        let (accepted, connected) = tokio::join!(
            acceptor.run_accept(&mut accept),
            initiator.run_connect(&mut connect)
        );
        (accepted.unwrap(), connected.unwrap())
    }

    #[test]
    fn registry_sorts_by_order_then_name() {
        let mut registry = JoinCheckRegistry::new();
        registry
            .register(fixed("zeta", 10, JoinCheckResult::Ok))
            .register(fixed("alpha", 10, JoinCheckResult::Ok))
            .register(fixed("identity", 1, JoinCheckResult::Ok));
        assert_eq!(registry.check_names(), vec!["identity", "alpha", "zeta"]);
    }

    #[tokio::test]
    async fn earlier_disconnect_wins_over_later_checks() {
        let build = || {
            let mut registry = JoinCheckRegistry::new();
            registry
                .register(fixed(
                    "late",
                    10,
                    JoinCheckResult::passivate(PassivationTarget::ThisNode, "late"),
                ))
                .register(fixed("early", 1, JoinCheckResult::disconnect("early")));
            registry
        };

        let (accepted, connected) = handshake(build(), build()).await;
        assert_eq!(accepted.decided_by.as_deref(), Some("early"));
        assert!(matches!(accepted.result, JoinCheckResult::Disconnect { .. }));
        assert_eq!(connected.result, accepted.result);
    }

    #[tokio::test]
    async fn acceptor_passivation_is_mirrored_on_initiator() {
        let build = || {
            let mut registry = JoinCheckRegistry::new();
            registry.register(fixed(
                "state",
                10,
                JoinCheckResult::passivate(PassivationTarget::OtherNode, "initiator steps down"),
            ));
            registry
        };

        let (accepted, connected) = handshake(build(), build()).await;
        assert!(matches!(
            accepted.result,
            JoinCheckResult::Passivate { target: PassivationTarget::OtherNode, .. }
        ));
        assert!(matches!(
            connected.result,
            JoinCheckResult::Passivate { target: PassivationTarget::ThisNode, .. }
        ));
    }

    #[tokio::test]
    async fn check_missing_on_peer_passivates_any_node() {
        let mut acceptor = JoinCheckRegistry::new();
        acceptor
            .register(fixed("shared", 5, JoinCheckResult::Ok))
            .register(fixed("extra", 7, JoinCheckResult::Ok));
        let mut initiator = JoinCheckRegistry::new();
        initiator.register(fixed("shared", 5, JoinCheckResult::Ok));

        let (accepted, connected) = handshake(acceptor, initiator).await;
        assert_eq!(accepted.decided_by.as_deref(), Some("extra"));
        assert!(matches!(
            connected.result,
            JoinCheckResult::Passivate { target: PassivationTarget::AnyNode, .. }
        ));
    }

    #[tokio::test]
    async fn shared_check_follows_acceptor_order() {
        let mut acceptor = JoinCheckRegistry::new();
        acceptor
            .register(fixed("first", 1, JoinCheckResult::disconnect("first")))
            .register(fixed("second", 5, JoinCheckResult::Ok));
        let mut initiator = JoinCheckRegistry::new();
        initiator
            .register(fixed("first", 9, JoinCheckResult::Ok))
            .register(fixed("second", 5, JoinCheckResult::Ok));
        assert_eq!(initiator.check_names(), vec!["second", "first"]);

        let (accepted, connected) = handshake(acceptor, initiator).await;
        assert_eq!(accepted.decided_by.as_deref(), Some("first"));
        assert_eq!(connected.decided_by.as_deref(), Some("first"));
        assert_eq!(connected.result, accepted.result);
    }

    #[tokio::test]
    async fn all_passing_checks_accept_the_join() {
        let build = || {
            let mut registry = JoinCheckRegistry::new();
            registry.register(fixed("one", 1, JoinCheckResult::Ok));
            registry
        };
        let (accepted, connected) = handshake(build(), build()).await;
        assert!(accepted.is_ok());
        assert!(connected.is_ok());
        assert_eq!(connected.decided_by, None);
    }
}
