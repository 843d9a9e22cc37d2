//! tcshare-storage: server-side object store + OpenDAL operator factory
//!
//! [`FileStore`] keeps one file per uploaded object under a root directory.
//! Readers serve exact byte ranges; writers append sequentially and delete
//! the partial object unless explicitly ended.

pub mod health;
pub mod operator;
pub mod reader;
pub mod store;
pub mod writer;

pub use health::check_writable;
pub use operator::{build_operator, check_endpoint_tls, S3Credentials};
pub use reader::ObjectReader;
pub use store::{FileStore, StoreOptions};
pub use writer::ObjectWriter;
