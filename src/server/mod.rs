// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::s3_http::S3HttpHandler;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    async fn serve(&self, addr: SocketAddr)
        -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Binds a listener with TCP_NODELAY and SO_REUSEADDR set.
pub fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // Disable Nagle's algorithm; responses are written in one go.
    socket.set_nodelay(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    TcpListener::from_std(socket.into())
}

/// S3 HTTP connection manager using Axum.
#[derive(Clone)]
pub struct S3HttpConnectionManager {
    handler: S3HttpHandler,
}

impl S3HttpConnectionManager {
    pub fn new(handler: S3HttpHandler) -> Self {
        Self { handler }
    }

    /// Serves on an already bound listener until the connection loop fails.
    pub async fn serve_listener(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.handler.clone().router();
        axum::serve(listener, app).await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionManager for S3HttpConnectionManager {
    async fn serve(
        &self,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = bind_listener(addr)?;
        tracing::info!(addr = %listener.local_addr()?, "S3 HTTP server listening (TCP_NODELAY=true)");
        self.serve_listener(listener).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BaseHandler;
    use crate::storage::in_memory::InMemoryStorage;
    use crate::storage::StorageBackend;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_serves_requests_over_tcp() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let manager =
            S3HttpConnectionManager::new(S3HttpHandler::new(BaseHandler::new(storage)));

        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { manager.serve_listener(listener).await });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"PUT /tcp-bucket HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");

        server.abort();
    }
}
