#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Object-store clients used to ship backup parts off-host.
//!
//! Layout: `store.rs` (capability traits, file digests), `model.rs` (object and
//! container metadata), `swift.rs` (Swift v1 over HTTP), `fs.rs` (directory-backed
//! store), `registry.rs` (catalogue name resolution), `error.rs`.

pub mod error;
pub mod fs;
pub mod model;
pub mod registry;
pub mod store;
pub mod swift;

pub use error::{StoreError, StoreResult};
pub use fs::{FsService, FsStore};
pub use model::{ContainerInfo, ObjectInfo};
pub use registry::{FILESYSTEM_SERVICE_TYPE, StoreRegistry};
pub use store::{ObjectStore, ServiceClient, file_md5};
pub use swift::{SwiftContainer, SwiftService};
