pub mod bundle;
pub mod client_info;
pub mod data;
pub mod error;
pub mod fetch;
pub mod topic;
pub mod transaction;

pub use bundle::{DataModule, DeletedFiles, PolicyBundle, PolicyModule};
pub use client_info::{ClientInfo, ClientStat};
pub use data::{
    DataEntryReport, DataSourceEntry, DataUpdate, DataUpdateReport, SaveMethod,
    ServerDataSourceConfig,
};
pub use error::{CoreError, Result};
pub use fetch::FetchEvent;
pub use topic::{Topic, non_intersecting_dirs};
pub use transaction::{StoreTransaction, TransactionLogState, TransactionType};
