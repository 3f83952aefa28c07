use crate::cluster::{ClusterJoinCheck, JoinCheckResult, JoinRequest, PassivationTarget};
use crate::config::DatabaseIdentity;
use crate::core::Result;
use crate::database::DatabaseManager;
use crate::migration::ConfigurationStore;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const TOKEN_PREFIX: &str = ".join-token-";

#[derive(Debug, Serialize, Deserialize)]
struct Challenge {
    token_file: String,
    identity: DatabaseIdentity,
    stale: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChallengeReply {
    token: Option<String>,
    identity: DatabaseIdentity,
    stale: bool,
}

/// Verifies two nodes see the same shared storage and the same database.
///
/// The acceptor drops a random token into its shared directory and asks the
/// initiator to read it back; if the initiator finds it, both nodes mount the
/// same storage. Database identities are compared directly. A node whose
/// in-memory configuration no longer matches what is stored on disk is
/// considered stale, which tells the nodes who should step aside.
pub struct SharedIdentityCheck {
    shared_home: PathBuf,
    database: Arc<DatabaseManager>,
    config_store: Arc<dyn ConfigurationStore>,
}

impl SharedIdentityCheck {
    pub const NAME: &'static str = "shared-identity";

    pub fn new(
        shared_home: impl Into<PathBuf>,
        database: Arc<DatabaseManager>,
        config_store: Arc<dyn ConfigurationStore>,
    ) -> Self {
        Self {
            shared_home: shared_home.into(),
            database,
            config_store,
        }
    }

    fn identity(&self) -> DatabaseIdentity {
        self.database.handle().config().identity()
    }

    async fn is_stale(&self) -> bool {
        match self.config_store.load_data_source_configuration().await {
            Ok(Some(stored)) => stored.identity() != self.identity(),
            Ok(None) => false,
            Err(err) => {
                warn!("Could not read stored data source configuration: {}", err);
                false
            }
        }
    }

    /// The acceptor's verdict, from the acceptor's view.
    pub fn decide(
        same_storage: bool,
        same_database: bool,
        local_stale: bool,
        remote_stale: bool,
    ) -> JoinCheckResult {
        match (same_storage, same_database) {
            (true, true) => JoinCheckResult::Ok,
            (true, false) => {
                let target = match (local_stale, remote_stale) {
                    (true, false) => PassivationTarget::ThisNode,
                    (true, true) => PassivationTarget::AnyNode,
                    _ => PassivationTarget::OtherNode,
                };
                JoinCheckResult::passivate(
                    target,
                    "Nodes share storage but point at different databases",
                )
            }
            (false, true) => JoinCheckResult::passivate(
                PassivationTarget::AnyNode,
                "Nodes share a database but not their shared storage",
            ),
            (false, false) => JoinCheckResult::disconnect(
                "Nodes share neither storage nor database; they belong to different clusters",
            ),
        }
    }

    async fn read_token(&self, token_file: &str) -> Option<String> {
        if !is_plain_file_name(token_file) {
            warn!("Peer sent suspicious token file name '{}'", token_file);
            return None;
        }
        match fs::read_to_string(self.shared_home.join(token_file)).await {
            Ok(token) => Some(token),
            Err(err) => {
                debug!("Token '{}' not visible in shared home: {}", token_file, err);
                None
            }
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

/// Token file written for one challenge.
///
/// Removed asynchronously once the reply is in; if the check is abandoned
/// before that, Drop removes it synchronously since it cannot await.
struct TokenFile(Option<PathBuf>);

impl TokenFile {
    async fn remove(mut self) {
        if let Some(path) = self.0.take() {
            if let Err(err) = fs::remove_file(&path).await {
                report_removal_error(&path, err);
            }
        }
    }
}

impl Drop for TokenFile {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                report_removal_error(&path, err);
            }
        }
    }
}

fn report_removal_error(path: &Path, err: std::io::Error) {
    if err.kind() != std::io::ErrorKind::NotFound {
        warn!("Failed to remove join token {}: {}", path.display(), err);
    }
}

#[async_trait]
impl ClusterJoinCheck for SharedIdentityCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn order(&self) -> i32 {
        1
    }

    async fn accept(&self, request: &mut JoinRequest) -> Result<JoinCheckResult> {
        let token = uuid::Uuid::new_v4().to_string();
        let token_file = format!("{TOKEN_PREFIX}{}", uuid::Uuid::new_v4());
        fs::create_dir_all(&self.shared_home).await?;
        let path = self.shared_home.join(&token_file);
        fs::write(&path, &token).await?;
        let token_guard = TokenFile(Some(path));

        let local_stale = self.is_stale().await;
        let local_identity = self.identity();
        request
            .send(&Challenge {
                token_file,
                identity: local_identity.clone(),
                stale: local_stale,
            })
            .await?;

        let reply: ChallengeReply = request.receive().await?;
        token_guard.remove().await;
        let same_storage = reply.token.as_deref() == Some(token.as_str());
        let same_database = reply.identity == local_identity;
        let verdict = Self::decide(same_storage, same_database, local_stale, reply.stale);
        request.send(&verdict).await?;
        Ok(verdict)
    }

    async fn connect(&self, request: &mut JoinRequest) -> Result<JoinCheckResult> {
        let challenge: Challenge = request.receive().await?;
        let token = self.read_token(&challenge.token_file).await;
        request
            .send(&ChallengeReply {
                token,
                identity: self.identity(),
                stale: self.is_stale().await,
            })
            .await?;

        let verdict: JoinCheckResult = request.receive().await?;
        Ok(verdict.from_peer_view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_table() {
        assert_eq!(SharedIdentityCheck::decide(true, true, false, false), JoinCheckResult::Ok);
        assert!(matches!(
            SharedIdentityCheck::decide(true, false, false, false),
            JoinCheckResult::Passivate { target: PassivationTarget::OtherNode, .. }
        ));
        assert!(matches!(
            SharedIdentityCheck::decide(true, false, true, false),
            JoinCheckResult::Passivate { target: PassivationTarget::ThisNode, .. }
        ));
        assert!(matches!(
            SharedIdentityCheck::decide(true, false, false, true),
            JoinCheckResult::Passivate { target: PassivationTarget::OtherNode, .. }
        ));
        assert!(matches!(
            SharedIdentityCheck::decide(false, true, true, true),
            JoinCheckResult::Passivate { target: PassivationTarget::AnyNode, .. }
        ));
        assert!(matches!(
            SharedIdentityCheck::decide(false, false, false, false),
            JoinCheckResult::Disconnect { .. }
        ));
    }

    fn token_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with(TOKEN_PREFIX))
                    .count()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn token_is_removed_when_peer_hangs_up() {
        use crate::cluster::JoinRole;
        use crate::config::DataSourceConfig;
        use crate::database::NoopConnector;
        use crate::migration::FileConfigurationStore;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let shared = dir.path().join("shared");
        let database = DatabaseManager::open(
            DataSourceConfig::new("db-main", "app", "pw"),
            Arc::new(NoopConnector),
        )
        .await
        .unwrap();
        let check = SharedIdentityCheck::new(
            &shared,
            Arc::new(database),
            Arc::new(FileConfigurationStore::new(dir.path().join("datasource.json"))),
        );

        let (a, b) = tokio::io::duplex(4096);
        let mut accept = JoinRequest::new(a, JoinRole::Acceptor, "acceptor");
        let mut connect = JoinRequest::new(b, JoinRole::Initiator, "initiator");
        let peer = async {
            let challenge: Challenge = connect.receive().await.unwrap();
            assert!(shared.join(&challenge.token_file).exists());
            drop(connect);
        };
        let (accepted, ()) = tokio::join!(check.accept(&mut accept), peer);

        assert!(accepted.is_err());
        assert_eq!(token_files(&shared), 0);
    }

    #[test]
    fn token_names_cannot_escape_shared_home() {
        assert!(is_plain_file_name(".join-token-abc"));
        assert!(!is_plain_file_name("../etc/passwd"));
        assert!(!is_plain_file_name("/etc/passwd"));
        assert!(!is_plain_file_name("a/b"));
        assert!(!is_plain_file_name(""));
    }
}
