pub mod client;
pub mod controller;
pub mod envelope;
pub mod events;
pub mod payload;

pub use client::RelayClient;
pub use controller::{
    ControllerView, Download, Notification, NotificationKind, NotificationLevel, Phase,
    PendingTransform, SelectedFile, UploadController, UploadState, DOWNLOAD_FILE_NAME,
};
pub use envelope::{TransformRequest, TransformResponse, DEFAULT_RETRY_DELAY};
pub use payload::{ImagePayload, PayloadError, FALLBACK_MIME_TYPE};
