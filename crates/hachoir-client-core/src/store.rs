use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::cookie::{
    CookieAttributes, CookieJar, CookieLookup, delete_cookie, parse_cookie_assignment,
    read_cookie, unescape, write_cookie,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store_io_failed:{}:{source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store_decode_failed:{}:{source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Named-string persistence for viewer options.
///
/// Mirrors what a page can do with `document.cookie`: values are plain
/// strings, written with an optional lifetime and read back by name. The
/// request layer also renders a `Cookie` header from the store and feeds
/// server `Set-Cookie` lines back into it.
pub trait OptionStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get(&self, name: &str) -> Result<Option<String>, Self::Error>;
    fn set(&self, name: &str, value: &str, expires_seconds: Option<i64>)
    -> Result<(), Self::Error>;
    fn delete(&self, name: &str) -> Result<(), Self::Error>;
    fn entries(&self) -> Result<Vec<(String, String)>, Self::Error>;

    fn cookie_header(&self) -> Result<String, Self::Error> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "))
    }

    /// Apply a server `Set-Cookie` line. Unparsable lines are ignored.
    fn absorb_set_cookie(&self, line: &str) -> Result<(), Self::Error> {
        let now = Utc::now();
        let Some(record) = parse_cookie_assignment(line, now) else {
            return Ok(());
        };
        if record.is_expired(now) {
            return self.delete(&record.name);
        }
        let expires_seconds = record
            .expires_at
            .map(|expires_at| (expires_at - now).num_seconds());
        self.set(&record.name, &unescape(&record.value), expires_seconds)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ephemeral store without expiry handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptionStore for MemoryStore {
    type Error = std::convert::Infallible;

    fn get(&self, name: &str) -> Result<Option<String>, Self::Error> {
        Ok(lock(&self.values).get(name).cloned())
    }

    fn set(
        &self,
        name: &str,
        value: &str,
        _expires_seconds: Option<i64>,
    ) -> Result<(), Self::Error> {
        lock(&self.values).insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), Self::Error> {
        lock(&self.values).remove(name);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, String)>, Self::Error> {
        Ok(lock(&self.values)
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }
}

/// Browser-like cookie storage: values are escaped on write, expiry is
/// enforced on read, and lookups scan the rendered cookie string.
#[derive(Debug, Default)]
pub struct CookieJarStore {
    jar: Mutex<CookieJar>,
    lookup: CookieLookup,
}

impl CookieJarStore {
    #[must_use]
    pub fn new(lookup: CookieLookup) -> Self {
        Self::from_jar(CookieJar::new(), lookup)
    }

    #[must_use]
    pub fn from_jar(jar: CookieJar, lookup: CookieLookup) -> Self {
        Self {
            jar: Mutex::new(jar),
            lookup,
        }
    }

    pub fn lookup(&self) -> CookieLookup {
        self.lookup
    }

    /// What a page would read from `document.cookie` right now.
    pub fn cookie_string(&self) -> String {
        lock(&self.jar).cookie_string(Utc::now())
    }

    pub fn snapshot(&self) -> CookieJar {
        let mut jar = lock(&self.jar).clone();
        jar.purge_expired(Utc::now());
        jar
    }

    fn write(&self, name: &str, value: &str, expires_seconds: Option<i64>) {
        let now = Utc::now();
        let assignment = write_cookie(
            name,
            value,
            &CookieAttributes {
                expires_seconds,
                ..CookieAttributes::default()
            },
            now,
        );
        lock(&self.jar).apply(&assignment, now);
    }

    fn remove(&self, name: &str) {
        let now = Utc::now();
        lock(&self.jar).apply(&delete_cookie(name, now), now);
    }

    fn absorb(&self, line: &str) {
        let now = Utc::now();
        let applied = lock(&self.jar).apply(line, now);
        if !applied {
            tracing::debug!(line = %line, "ignoring unparsable Set-Cookie line");
        }
    }
}

impl OptionStore for CookieJarStore {
    type Error = std::convert::Infallible;

    fn get(&self, name: &str) -> Result<Option<String>, Self::Error> {
        Ok(read_cookie(&self.cookie_string(), name, self.lookup))
    }

    fn set(
        &self,
        name: &str,
        value: &str,
        expires_seconds: Option<i64>,
    ) -> Result<(), Self::Error> {
        self.write(name, value, expires_seconds);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), Self::Error> {
        self.remove(name);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, String)>, Self::Error> {
        Ok(self
            .snapshot()
            .records()
            .iter()
            .map(|record| (record.name.clone(), unescape(&record.value)))
            .collect())
    }

    fn cookie_header(&self) -> Result<String, Self::Error> {
        Ok(self.cookie_string())
    }

    fn absorb_set_cookie(&self, line: &str) -> Result<(), Self::Error> {
        self.absorb(line);
        Ok(())
    }
}

/// Cookie jar persisted as JSON so options survive between runs.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cookies: CookieJarStore,
}

impl FileStore {
    /// Open `path`, starting empty when it does not exist yet. Expired
    /// cookies are dropped on load.
    pub fn open(path: impl Into<PathBuf>, lookup: CookieLookup) -> Result<Self, StoreError> {
        let path = path.into();
        let jar = match fs::read(&path) {
            Ok(bytes) => {
                let mut jar: CookieJar =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
                        path: path.clone(),
                        source,
                    })?;
                jar.purge_expired(Utc::now());
                jar
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => CookieJar::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        tracing::debug!(path = %path.display(), cookies = jar.records().len(), "opened cookie file");
        Ok(Self {
            path,
            cookies: CookieJarStore::from_jar(jar, lookup),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cookie_string(&self) -> String {
        self.cookies.cookie_string()
    }

    fn persist(&self) -> Result<(), StoreError> {
        let io_error = |source: io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let bytes =
            serde_json::to_vec_pretty(&self.cookies.snapshot()).map_err(|source| {
                StoreError::Decode {
                    path: self.path.clone(),
                    source,
                }
            })?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, bytes).map_err(io_error)?;
        fs::rename(&staging, &self.path).map_err(io_error)
    }
}

impl OptionStore for FileStore {
    type Error = StoreError;

    fn get(&self, name: &str) -> Result<Option<String>, Self::Error> {
        Ok(read_cookie(
            &self.cookies.cookie_string(),
            name,
            self.cookies.lookup(),
        ))
    }

    fn set(
        &self,
        name: &str,
        value: &str,
        expires_seconds: Option<i64>,
    ) -> Result<(), Self::Error> {
        self.cookies.write(name, value, expires_seconds);
        self.persist()
    }

    fn delete(&self, name: &str) -> Result<(), Self::Error> {
        self.cookies.remove(name);
        self.persist()
    }

    fn entries(&self) -> Result<Vec<(String, String)>, Self::Error> {
        Ok(self
            .cookies
            .snapshot()
            .records()
            .iter()
            .map(|record| (record.name.clone(), unescape(&record.value)))
            .collect())
    }

    fn cookie_header(&self) -> Result<String, Self::Error> {
        Ok(self.cookies.cookie_string())
    }

    fn absorb_set_cookie(&self, line: &str) -> Result<(), Self::Error> {
        self.cookies.absorb(line);
        self.persist()
    }
}
