//! Transport-free core of the hachoir viewer client: the option map sent to
//! the viewer, cookie-style persistence for it, and the page seams a session
//! renders into.

pub mod config;
pub mod cookie;
pub mod options;
pub mod store;
pub mod view;

pub use config::{ConfigError, ResolvedBaseUrl, resolve_base_url, resolve_state_file};
pub use cookie::{CookieJar, CookieLookup, OPTION_COOKIE_TTL_SECONDS};
pub use options::{OptionsError, PayloadEncoding, ViewerOptions};
pub use store::{CookieJarStore, FileStore, MemoryStore, OptionStore, StoreError};
pub use view::{MemoryPage, PageView, StatusPlacement};
