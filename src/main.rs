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

use clap::Parser;
use s3lite::config::{validate_data_dir, BackendKind, Config};
use s3lite::handler::BaseHandler;
use s3lite::observability::tracing_setup;
use s3lite::s3_http::S3HttpHandler;
use s3lite::server::{ConnectionManager, S3HttpConnectionManager};
use s3lite::storage::file_storage::FileStorage;
use s3lite::storage::in_memory::InMemoryStorage;
use s3lite::storage::StorageBackend;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "s3lite")]
#[command(about = "Single-node S3-style object store backed by the local filesystem", long_about = None)]
struct Args {
    /// Port to listen on; keeps the host part of the configured address
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory for buckets and objects
    #[arg(short, long)]
    dir: Option<String>,

    /// Full address to listen on (e.g., 0.0.0.0:9000); wins over --port
    #[arg(short, long)]
    listen: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing with format from environment
    tracing_setup::init_tracing_from_env();

    let args = Args::parse();

    // Load config from file, if one was given
    let cfg = Config::load(args.config.as_deref())?;

    // Command line args override config file
    let mut addr: SocketAddr = args.listen.as_ref().unwrap_or(&cfg.listen_addr).parse()?;
    if let (None, Some(port)) = (&args.listen, args.port) {
        addr.set_port(port);
    }

    let storage: Arc<dyn StorageBackend> = match cfg.storage.kind()? {
        BackendKind::File => {
            let dir = PathBuf::from(args.dir.as_ref().unwrap_or(&cfg.storage.path));
            validate_data_dir(&dir)?;
            Arc::new(FileStorage::new(&dir).await?)
        }
        BackendKind::InMemory => {
            tracing::warn!("in-memory backend selected, data is lost on exit");
            Arc::new(InMemoryStorage::new())
        }
    };

    let handler = S3HttpHandler::new(BaseHandler::new(storage))
        .with_max_object_size(cfg.storage.max_object_size);
    let server = S3HttpConnectionManager::new(handler);
    tracing::info!("s3lite HTTP server listening on {}", addr);

    tokio::select! {
        r = server.serve(addr) => {
            if let Err(e) = r {
                tracing::error!("server exited with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("ctrl-c received, shutting down");
        }
    }

    Ok(())
}
