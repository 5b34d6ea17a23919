use super::frame::{read_frame, read_frame_timeout, write_frame, FrameError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// A framed TCP connection to a remote peer
#[derive(Debug)]
pub struct Connection {
    inner: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    /// Wrap an accepted stream
    pub fn new(inner: TcpStream) -> Result<Self, ConnectionError> {
        let peer = inner.peer_addr().map_err(ConnectionError::Connect)?;
        Ok(Self { inner, peer })
    }

    /// Connect to `addr` (`host:port`) within `limit`
    pub async fn connect(addr: &str, limit: Duration) -> Result<Self, ConnectionError> {
        let stream = tokio::time::timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout(addr.to_string()))?
            .map_err(ConnectionError::Connect)?;

        // Control traffic is small request/response frames
        stream.set_nodelay(true).map_err(ConnectionError::Connect)?;

        Self::new(stream)
    }

    pub async fn send(&mut self, body: &str) -> Result<(), ConnectionError> {
        Ok(write_frame(&mut self.inner, body).await?)
    }

    /// Next frame, or `None` once the peer has closed
    pub async fn recv(&mut self) -> Result<Option<String>, ConnectionError> {
        Ok(read_frame(&mut self.inner).await?)
    }

    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<Option<String>, ConnectionError> {
        Ok(read_frame_timeout(&mut self.inner, limit).await?)
    }

    /// Send one frame and wait up to `limit` for the reply
    pub async fn request(&mut self, body: &str, limit: Duration) -> Result<String, ConnectionError> {
        self.send(body).await?;
        self.recv_timeout(limit)
            .await?
            .ok_or(ConnectionError::Closed)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConnectionError> {
        self.inner.local_addr().map_err(ConnectionError::Connect)
    }

    /// Flush and shut down the write half
    pub async fn close(mut self) -> Result<(), ConnectionError> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| ConnectionError::Frame(FrameError::Io(e)))
    }
}

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("Connection failed: {0}")]
    Connect(std::io::Error),

    #[error("Connection closed by peer")]
    Closed,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConnectionError::ConnectTimeout(_) | ConnectionError::Frame(FrameError::Timeout)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_request_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream).unwrap();
            let request = conn.recv().await.unwrap().unwrap();
            conn.send(&format!("echo:{}", request)).await.unwrap();
        });

        let mut conn = Connection::connect(&addr.to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        let reply = conn.request("PING", Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, "echo:PING");

        server.await.unwrap();
        assert!(conn.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_to_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let mut conn = Connection::connect(&addr.to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        let err = conn.request("PING", Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // grab a free port, then release it
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        assert!(Connection::connect(&addr.to_string(), Duration::from_secs(1))
            .await
            .is_err());
    }
}
