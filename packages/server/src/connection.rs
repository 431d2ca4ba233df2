//! Live connections and the registry shared by the accept loop, workers and
//! handlers.

use std::{fmt, net::SocketAddr, sync::Arc};

use kairo_shared::time::get_jst_timestamp;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{error::SocketError, socket::TransportSocket};

/// Shared handle to a connection.
///
/// One clone lives in the registry, one in the worker serving the connection.
/// Sender identity is pointer identity of this handle.
pub type ConnectionRef = Arc<Connection>;

/// One accepted client connection.
pub struct Connection {
    id: Uuid,
    peer: Option<SocketAddr>,
    /// Unix timestamp when accepted (in JST, milliseconds)
    connected_at: i64,
    socket: TransportSocket,
}

impl Connection {
    pub fn new(socket: TransportSocket) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: socket.peer_addr(),
            connected_at: get_jst_timestamp(),
            socket,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_valid()
    }

    /// Send the whole buffer to the client.
    pub fn send(&self, bytes: &[u8]) -> Result<(), SocketError> {
        self.socket.send_all(bytes)
    }

    pub fn receive(&self) -> Result<Vec<u8>, SocketError> {
        self.socket.receive()
    }

    /// Idempotent; unblocks a worker waiting in [`receive`](Self::receive).
    pub fn shutdown(&self) {
        self.socket.shutdown();
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer {
            Some(peer) => write!(f, "{} ({})", self.id, peer),
            None => write!(f, "{}", self.id),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected_at", &self.connected_at)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Registry of currently connected clients, in accept order.
///
/// Cloning yields another handle to the same registry. Every operation takes
/// the single registry mutex. Writes to a registered connection happen only
/// under that mutex: [`admit`](Self::admit) sends the greeting with it held,
/// and broadcasters send through [`with_connections`](Self::with_connections).
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<Vec<ConnectionRef>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: ConnectionRef) {
        let mut connections = self.connections.lock();
        connections.push(connection);
        tracing::debug!("Registry size is now {}", connections.len());
    }

    /// Send `greeting` to `connection` and register it, under one lock.
    ///
    /// No broadcast can reach the connection before its greeting. On a send
    /// error the connection is left unregistered.
    pub fn admit(&self, connection: ConnectionRef, greeting: &[u8]) -> Result<(), SocketError> {
        let mut connections = self.connections.lock();
        connection.send(greeting)?;
        connections.push(connection);
        tracing::debug!("Registry size is now {}", connections.len());
        Ok(())
    }

    /// Remove `connection`. Returns `false` if it was not registered.
    pub fn remove(&self, connection: &ConnectionRef) -> bool {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|c| !Arc::ptr_eq(c, connection));
        before != connections.len()
    }

    pub fn contains(&self, connection: &ConnectionRef) -> bool {
        self.connections
            .lock()
            .iter()
            .any(|c| Arc::ptr_eq(c, connection))
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` over the registered connections while holding the registry lock.
    pub fn with_connections<R>(&self, f: impl FnOnce(&[ConnectionRef]) -> R) -> R {
        let connections = self.connections.lock();
        f(&connections)
    }

    /// Shut down every registered connection and empty the registry.
    ///
    /// Returns the number of connections that were shut down.
    pub fn shutdown_all(&self) -> usize {
        let mut connections = self.connections.lock();
        for connection in connections.iter() {
            connection.shutdown();
        }
        let count = connections.len();
        connections.clear();
        count
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::socket::SocketConfig;

    /// A connected pair: the server-side `Connection` and the client socket.
    pub(crate) fn connected_pair() -> (ConnectionRef, TransportSocket) {
        let listener = TransportSocket::create(SocketConfig::tcp_v4()).unwrap();
        listener.bind("127.0.0.1", 0).unwrap();
        listener.listen(5).unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = TransportSocket::connect_to("127.0.0.1", port).unwrap();
        let accepted = listener.accept().unwrap();
        (Arc::new(Connection::new(accepted)), client)
    }

    #[test]
    fn test_insert_and_remove() {
        // テスト項目: 登録した接続を削除でき、削除は 1 回だけ成功する
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let (alice, _alice_client) = connected_pair();
        let (bob, _bob_client) = connected_pair();
        registry.insert(alice.clone());
        registry.insert(bob.clone());

        // when (操作):
        let first = registry.remove(&alice);
        let second = registry.remove(&alice);

        // then (期待する結果):
        assert!(first);
        assert!(!second);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&alice));
        assert!(registry.contains(&bob));
    }

    #[test]
    fn test_admit_greets_then_registers() {
        // テスト項目: admit は挨拶を送ってから接続を登録する
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let (alice, alice_client) = connected_pair();

        // when (操作):
        let result = registry.admit(alice.clone(), b"welcome\n");

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(registry.contains(&alice));
        assert_eq!(alice_client.receive().unwrap(), b"welcome\n");
    }

    #[test]
    fn test_admit_failure_leaves_connection_unregistered() {
        // テスト項目: 挨拶の送信に失敗した接続は登録されない
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let (alice, _alice_client) = connected_pair();
        alice.shutdown();

        // when (操作):
        let result = registry.admit(alice.clone(), b"welcome\n");

        // then (期待する結果):
        assert!(matches!(result, Err(SocketError::SocketClosed)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        // テスト項目: クローンしたレジストリは同じ状態を共有する
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let handle = registry.clone();
        let (alice, _alice_client) = connected_pair();

        // when (操作):
        handle.insert(alice.clone());

        // then (期待する結果):
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&alice));
    }

    #[test]
    fn test_with_connections_preserves_accept_order() {
        // テスト項目: with_connections は登録順に接続を返す
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let (alice, _a) = connected_pair();
        let (bob, _b) = connected_pair();
        let (charlie, _c) = connected_pair();
        for c in [&alice, &bob, &charlie] {
            registry.insert(c.clone());
        }

        // when (操作):
        let ids: Vec<Uuid> = registry.with_connections(|cs| cs.iter().map(|c| c.id()).collect());

        // then (期待する結果):
        assert_eq!(ids, vec![alice.id(), bob.id(), charlie.id()]);
    }

    #[test]
    fn test_shutdown_all_closes_and_clears() {
        // テスト項目: shutdown_all は全接続を閉じてレジストリを空にする
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let (alice, alice_client) = connected_pair();
        let (bob, _bob_client) = connected_pair();
        registry.insert(alice.clone());
        registry.insert(bob.clone());

        // when (操作):
        let count = registry.shutdown_all();

        // then (期待する結果):
        assert_eq!(count, 2);
        assert!(registry.is_empty());
        assert!(!alice.is_open());
        assert!(!bob.is_open());
        assert!(alice_client.receive().unwrap().is_empty());
        // 2 回目はレジストリが空なので何もしない
        assert_eq!(registry.shutdown_all(), 0);
    }

    #[test]
    fn test_connection_records_peer_address() {
        // テスト項目: 接続はピアアドレスと接続時刻を保持する
        // when (操作):
        let (connection, client) = connected_pair();

        // then (期待する結果):
        assert_eq!(connection.peer(), client.local_addr());
        assert!(connection.connected_at() > 0);
        assert!(connection.to_string().starts_with(&connection.id().to_string()));
    }
}
