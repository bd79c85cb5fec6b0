//! Host-wide exclusion per repository.
//!
//! On Linux the lock is a datagram socket bound to an abstract address
//! (see unix(7)) derived from the configuration directory and the repository
//! path. The kernel releases it when the socket closes, including when the
//! process dies, so stale locks cannot exist. Other platforms get no lock.

use std::path::Path;

use tracing::debug;

use crate::error::LockError;
use crate::model::Repository;

/// `sun_path` holds 108 bytes, one of which is the leading NUL.
const MAX_NAME_LEN: usize = 107;

/// Held for as long as the repository is in use.
#[derive(Debug)]
pub struct RepositoryLock {
    name: String,
    #[cfg(target_os = "linux")]
    _socket: std::os::unix::net::UnixDatagram,
}

impl RepositoryLock {
    /// Abstract socket name for `repo` under `confdir`.
    ///
    /// Names that would not fit a socket address are replaced by a hash.
    pub fn name_for(confdir: &Path, repo: &Repository) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let name = format!("borg-sya:{}:{}", confdir.display(), repo.path);
        if name.len() <= MAX_NAME_LEN {
            return name;
        }
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        format!("borg-sya:{:016x}", hasher.finish())
    }

    pub fn acquire(confdir: &Path, repo: &Repository) -> Result<Self, LockError> {
        let name = Self::name_for(confdir, repo);
        let lock = Self::bind(name, &repo.name)?;
        debug!(lock = %lock.name, "acquired repository lock");
        Ok(lock)
    }

    #[cfg(target_os = "linux")]
    fn bind(name: String, repository: &str) -> Result<Self, LockError> {
        use std::io::ErrorKind;
        use std::os::linux::net::SocketAddrExt;
        use std::os::unix::net::{SocketAddr, UnixDatagram};

        let addr = SocketAddr::from_abstract_name(name.as_bytes()).map_err(|source| {
            LockError::Io {
                repository: repository.to_string(),
                source,
            }
        })?;
        match UnixDatagram::bind_addr(&addr) {
            Ok(socket) => Ok(Self {
                name,
                _socket: socket,
            }),
            Err(err) if err.kind() == ErrorKind::AddrInUse => Err(LockError::InUse {
                repository: repository.to_string(),
            }),
            Err(source) => Err(LockError::Io {
                repository: repository.to_string(),
                source,
            }),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn bind(name: String, _repository: &str) -> Result<Self, LockError> {
        Ok(Self { name })
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        debug!(lock = %self.name, "released repository lock");
    }
}
