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

//! Durable, queue-driven pipeline that splits backup files and ships the parts to
//! an object store.
//!
//! Requests move `ready/ -> processing/ -> complete/`, each hop driven by a
//! [`QueueWorker`] running one [`Stage`]; requests that keep failing end in a
//! dead-letter queue. All state lives in the queue directories, so a restarted
//! worker resumes where the last one stopped.
//!
//! Layout: `request.rs` (job descriptor and parts), `queue.rs` (directory queues),
//! `digest.rs` (streaming checksums), `split.rs` (splitters), `transfer.rs`
//! (transferers), `stage/` (split and upload stages), `worker.rs` (poll loop and
//! retry policy), `reconcile.rs` (duplicate cleanup), `layout.rs` (queue layout and
//! worker wiring from settings), `error.rs`.

pub mod digest;
pub mod error;
pub mod layout;
pub mod queue;
pub mod reconcile;
pub mod request;
pub mod split;
pub mod stage;
pub mod transfer;
pub mod worker;

pub use digest::{DigestAlgorithm, file_md5};
pub use error::{PipelineError, PipelineResult};
pub use layout::{QueueSet, Workers, splitter_for};
pub use queue::{DirQueue, MATCH_ALL, WorkQueue};
pub use reconcile::{reconcile, reconcile_abandoned};
pub use request::{MANIFEST_SUFFIX, Part, PartKind, REQUEST_SUFFIX, Request};
pub use split::{CommandSplitter, NativeSplitter, Splitter};
pub use stage::{SplitStage, Stage, UploadStage};
pub use transfer::{
    Destination, LocalCopyTransferer, ObjectStoreTransferer, TransferReceipt, Transferer,
};
pub use worker::{IterationOutcome, QueueWorker, WorkerPolicy};
