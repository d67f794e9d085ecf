pub mod cache;
pub mod error;
pub mod healthcheck;
pub mod http;
pub mod ignore;
pub mod memory;
pub mod traits;

pub use cache::DataCache;
pub use error::StoreError;
pub use healthcheck::{DEFAULT_HEALTHCHECK_PATH, publish as publish_healthcheck, render as render_healthcheck};
pub use http::{HttpStore, HttpStoreConfig};
pub use ignore::PathIgnoreList;
pub use memory::InMemoryStore;
pub use traits::{Store, Transaction};
