//! Local stream endpoints addressed by path.
//!
//! On Unix these are domain sockets (`$TMPDIR/<name>.sock` for bare names),
//! on Windows named pipes (`\\.\pipe\<name>`). Both sides of `pipe://`
//! targets end up here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::StreamPair;
use crate::error::Result;

static PIPE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A fresh pipe path, unique within this process and unlikely to collide
/// with other processes.
pub fn generate_pipe_path() -> String {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let seq = PIPE_SEQ.fetch_add(1, Ordering::Relaxed);
    pipe_path(&format!("duplexwire-{}-{:x}-{}", std::process::id(), started, seq))
}

/// Resolve a pipe name to a platform path.
///
/// Names that already look like paths are used verbatim.
pub fn pipe_path(name: &str) -> String {
    #[cfg(unix)]
    {
        if name.contains('/') {
            name.to_string()
        } else {
            std::env::temp_dir()
                .join(format!("{}.sock", name))
                .to_string_lossy()
                .into_owned()
        }
    }

    #[cfg(windows)]
    {
        if name.starts_with(r"\\") {
            name.to_string()
        } else {
            format!(r"\\.\pipe\{}", name)
        }
    }
}

#[cfg(unix)]
mod unix_impl {
    use std::path::Path;

    use async_trait::async_trait;
    use tokio::net::{UnixListener, UnixStream};

    use super::super::Acceptor;
    use super::*;

    /// Listening domain socket; the socket file is removed on drop.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    impl PipeListener {
        /// Bind `path`, replacing a stale socket file left by a dead process.
        pub async fn bind(path: &str) -> Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }
            Ok(Self {
                listener: UnixListener::bind(path)?,
                path: path.to_string(),
            })
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!("Removing {} failed: {}", self.path, e);
            }
        }
    }

    #[async_trait]
    impl Acceptor for PipeListener {
        async fn accept(&self) -> Result<StreamPair> {
            let (stream, _) = self.listener.accept().await?;
            let (reader, writer) = stream.into_split();
            Ok(StreamPair {
                reader: Box::pin(reader),
                writer: Box::pin(writer),
                remote: self.path.clone(),
            })
        }

        fn local(&self) -> String {
            format!("pipe://{}", self.path)
        }
    }

    pub(crate) async fn connect(path: &str) -> Result<StreamPair> {
        let stream = UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        Ok(StreamPair {
            reader: Box::pin(reader),
            writer: Box::pin(writer),
            remote: path.to_string(),
        })
    }
}

#[cfg(windows)]
mod windows_impl {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};
    use tokio::sync::Mutex;

    use super::super::Acceptor;
    use super::*;

    const ERROR_PIPE_BUSY: i32 = 231;

    /// Named pipe listener.
    ///
    /// Always holds one unconnected server instance so clients never observe
    /// a missing pipe between accepts.
    pub struct PipeListener {
        path: String,
        next: Mutex<NamedPipeServer>,
    }

    impl PipeListener {
        /// Create the first Named Pipe server instance.
        pub async fn bind(path: &str) -> Result<Self> {
            let first = ServerOptions::new().first_pipe_instance(true).create(path)?;
            Ok(Self {
                path: path.to_string(),
                next: Mutex::new(first),
            })
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    #[async_trait]
    impl Acceptor for PipeListener {
        async fn accept(&self) -> Result<StreamPair> {
            let mut next = self.next.lock().await;
            next.connect().await?;
            let fresh = ServerOptions::new().create(&self.path)?;
            let connected = std::mem::replace(&mut *next, fresh);
            Ok(StreamPair::from_stream(connected, self.path.clone()))
        }

        fn local(&self) -> String {
            format!("pipe://{}", self.path)
        }
    }

    pub(crate) async fn connect(path: &str) -> Result<StreamPair> {
        let client = loop {
            match ClientOptions::new().open(path) {
                Ok(client) => break client,
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(e.into()),
            }
        };
        Ok(StreamPair::from_stream(client, path.to_string()))
    }
}

#[cfg(unix)]
pub(crate) use unix_impl::connect;
#[cfg(unix)]
pub use unix_impl::PipeListener;

#[cfg(windows)]
pub(crate) use windows_impl::connect;
#[cfg(windows)]
pub use windows_impl::PipeListener;
