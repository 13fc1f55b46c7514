pub mod assembler;
pub mod finalize;
pub mod session;

pub use finalize::{FinalizeOutcome, FinalizePipeline};
pub use session::{
    InitiateUpload, ProgressCounters, UploadPhase, UploadProgress, UploadSession,
    UploadSessionStore, UploadStatus, sanitize_file_name, spawn_cleanup_task,
};
