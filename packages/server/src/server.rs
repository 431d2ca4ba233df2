//! Server facade: configuration plus start/stop for the process entry point.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use crate::{
    connection::ConnectionRegistry,
    error::{ServerError, SocketError},
    handler::{BroadcastHandler, ChainedHandler},
    manager::{ConnectionLifecycle, ConnectionManager, DEFAULT_BACKLOG},
    socket::SocketConfig,
};

/// Listening configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// IPv4 or IPv6 literal to bind to
    pub host: String,
    pub port: u16,
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Stream socket config whose family matches `host`.
    ///
    /// # Errors
    ///
    /// [`SocketError::InvalidAddress`] if `host` is not an IP literal.
    pub fn socket_config(&self) -> Result<SocketConfig, SocketError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| SocketError::InvalidAddress {
                family: "IP",
                address: self.host.clone(),
            })?;
        Ok(SocketConfig::tcp_for(&ip))
    }
}

/// Build a [`ConnectionManager`] whose handler chain broadcasts every message.
pub fn broadcast_manager(config: &ServerConfig) -> Result<ConnectionManager, ServerError> {
    let registry = ConnectionRegistry::new();

    let mut chain = ChainedHandler::new();
    chain.add(Box::new(BroadcastHandler::new(registry.clone())));

    let manager = ConnectionManager::new(config.socket_config()?, Arc::new(chain), registry)?
        .with_backlog(config.backlog);
    Ok(manager)
}

/// TCP chat server.
///
/// # Example
///
/// ```no_run
/// use kairo_server::{ChatServer, ServerConfig};
///
/// let server = ChatServer::from_config(ServerConfig::new("127.0.0.1", 8080))?;
/// server.start()?;
/// // ... wait for a termination signal ...
/// server.stop();
/// # Ok::<(), kairo_server::ServerError>(())
/// ```
pub struct ChatServer {
    manager: Box<dyn ConnectionLifecycle>,
    config: ServerConfig,
}

impl ChatServer {
    pub fn new(manager: Box<dyn ConnectionLifecycle>, config: ServerConfig) -> Self {
        Self { manager, config }
    }

    /// Wire a broadcasting chat server for `config`.
    pub fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        let manager = broadcast_manager(&config)?;
        Ok(Self::new(Box::new(manager), config))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start listening on the configured address.
    pub fn start(&self) -> Result<(), ServerError> {
        self.manager.start(&self.config.host, self.config.port)?;
        tracing::info!(
            "Connect with: kairo-client --host {} --port {}",
            self.config.host,
            self.local_addr().map_or(self.config.port, |a| a.port())
        );
        Ok(())
    }

    /// Idempotent.
    pub fn stop(&self) {
        self.manager.stop();
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.manager.local_addr()
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.manager.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::MockConnectionLifecycle;
    use mockall::predicate::eq;

    #[test]
    fn test_socket_config_follows_host_family() {
        // テスト項目: ホストのアドレスファミリーに応じたソケット設定が選ばれる
        // given (前提条件):
        let v4 = ServerConfig::new("127.0.0.1", 0);
        let v6 = ServerConfig::new("::1", 0);
        let bad = ServerConfig::new("localhost", 0);

        // when (操作) / then (期待する結果):
        assert_eq!(v4.socket_config().unwrap(), SocketConfig::tcp_v4());
        assert_eq!(v6.socket_config().unwrap(), SocketConfig::tcp_v6());
        assert!(matches!(
            bad.socket_config(),
            Err(SocketError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_default_config() {
        // テスト項目: デフォルト設定は 0.0.0.0:8080、バックログ 5
        let config = ServerConfig::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.backlog, 5);
    }

    #[test]
    fn test_from_config_rejects_hostname() {
        // テスト項目: IP リテラルでないホストでは起動前に失敗する
        // when (操作):
        let result = ChatServer::from_config(ServerConfig::new("example.com", 0));

        // then (期待する結果):
        assert!(matches!(
            result,
            Err(ServerError::StartFailed(SocketError::InvalidAddress { .. }))
        ));
    }

    #[test]
    fn test_start_delegates_configured_address() {
        // テスト項目: start は設定されたアドレスでマネージャを起動する
        // given (前提条件):
        let mut manager = MockConnectionLifecycle::new();
        manager
            .expect_start()
            .with(eq("127.0.0.1"), eq(9000u16))
            .times(1)
            .returning(|_, _| Ok(()));
        manager.expect_local_addr().returning(|| None);
        manager.expect_stop().returning(|| ());
        let server = ChatServer::new(Box::new(manager), ServerConfig::new("127.0.0.1", 9000));

        // when (操作):
        let result = server.start();

        // then (期待する結果):
        assert!(result.is_ok());
    }

    #[test]
    fn test_start_failure_propagates() {
        // テスト項目: マネージャの起動失敗はそのまま呼び出し元に返る
        // given (前提条件):
        let mut manager = MockConnectionLifecycle::new();
        manager
            .expect_start()
            .returning(|_, _| Err(ServerError::InvalidState("stopped")));
        manager.expect_stop().returning(|| ());
        let server = ChatServer::new(Box::new(manager), ServerConfig::default());

        // when (操作):
        let result = server.start();

        // then (期待する結果):
        assert!(matches!(result, Err(ServerError::InvalidState("stopped"))));
    }

    #[test]
    fn test_drop_stops_manager() {
        // テスト項目: ChatServer を drop するとマネージャが停止される
        // given (前提条件):
        let mut manager = MockConnectionLifecycle::new();
        manager.expect_stop().times(1).returning(|| ());
        let server = ChatServer::new(Box::new(manager), ServerConfig::default());

        // when (操作):
        drop(server);

        // then (期待する結果):
        // times(1) の検証はモックの drop 時に行われる
    }
}
