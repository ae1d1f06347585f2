//! Platform pipe endpoints: Unix domain sockets, or named pipes on Windows.
//!
//! A [`Listener`] serves exactly one peer: [`Listener::accept`] consumes
//! it, and the relay creates a fresh one for every accept cycle.

#[cfg(unix)]
pub use unix::{ClientStream, Listener, ServerStream, connect};
#[cfg(windows)]
pub use windows::{ClientStream, Listener, ServerStream, connect};

#[cfg(unix)]
mod unix {
    use std::{
        io,
        path::{Path, PathBuf},
    };
    use tokio::net::{UnixListener, UnixStream};

    pub type ServerStream = UnixStream;
    pub type ClientStream = UnixStream;

    /// A bound socket path, removed again on drop.
    pub struct Listener {
        inner: UnixListener,
        path: PathBuf,
    }

    impl Listener {
        /// Bind `path`, replacing a stale socket file.
        pub fn bind(path: &Path) -> io::Result<Self> {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            let inner = UnixListener::bind(path)?;
            Ok(Self {
                inner,
                path: path.to_path_buf(),
            })
        }

        /// Wait for one peer.
        pub async fn accept(self) -> io::Result<ServerStream> {
            let (stream, _addr) = self.inner.accept().await?;
            Ok(stream)
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    pub async fn connect(path: &Path) -> io::Result<ClientStream> {
        UnixStream::connect(path).await
    }
}

#[cfg(windows)]
mod windows {
    use std::{io, path::Path};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    pub type ServerStream = NamedPipeServer;
    pub type ClientStream = NamedPipeClient;

    /// A single named pipe instance.
    pub struct Listener {
        server: NamedPipeServer,
    }

    impl Listener {
        pub fn bind(path: &Path) -> io::Result<Self> {
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path.as_os_str())?;
            Ok(Self { server })
        }

        pub async fn accept(self) -> io::Result<ServerStream> {
            self.server.connect().await?;
            Ok(self.server)
        }
    }

    pub async fn connect(path: &Path) -> io::Result<ClientStream> {
        ClientOptions::new().open(path.as_os_str())
    }
}
