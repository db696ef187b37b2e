pub mod codec;
pub mod config;
pub mod backend;
pub mod pageio;
pub mod manifest;
pub mod reader;
pub mod transfer;

pub use backend::{Backend, BackendError, ContainerHandle, LocalBackend, MemoryBackend, ShareScope};
pub use codec::{decode, encode, CodecError};
pub use config::TransferConfig;
pub use manifest::{compute_container_count, Manifest, ManifestError, ProgressBitmap};
pub use reader::SequentialMultiFileReader;
pub use transfer::{DownloadOrchestrator, TransferError, UploadOrchestrator};
