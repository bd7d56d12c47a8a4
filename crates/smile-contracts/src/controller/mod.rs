//! Client-side image lifecycle.
//!
//! `UploadController` owns the original/transformed images and the single
//! in-flight transform attempt. Every user action and relay reply goes
//! through one `&mut self` method, so transitions never interleave.

mod view;

use std::fs;
use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::client::RelayClient;
use crate::envelope::{TransformRequest, TransformResponse};
use crate::payload::{mime_for_path, ImagePayload};

pub use view::ControllerView;

/// File name used when exporting the transformed image.
pub const DOWNLOAD_FILE_NAME: &str = "transformed-smile.png";

pub const INVALID_FILE_MESSAGE: &str = "Please upload an image file";
pub const EMPTY_FILE_MESSAGE: &str = "The selected image is empty";
pub const TRANSFORMED_MESSAGE: &str = "Teeth transformed successfully!";
pub const DOWNLOADED_MESSAGE: &str = "Image downloaded!";
pub const FALLBACK_ERROR_MESSAGE: &str = "Failed to transform image. Please try again.";

/// A file as handed over by a picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub declared_mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, declared_mime: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_mime,
            bytes,
        }
    }

    /// Reads a file from disk, declaring its MIME type from the extension.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image")
            .to_string();
        Ok(Self {
            name,
            declared_mime: mime_for_path(path).map(str::to_string),
            bytes,
        })
    }

    /// Declared MIME, or one inferred from the file name.
    pub fn mime_type(&self) -> Option<String> {
        self.declared_mime
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_ascii_lowercase)
            .or_else(|| mime_for_path(Path::new(&self.name)).map(str::to_string))
    }

    /// Same encoding a browser `FileReader.readAsDataURL` produces.
    pub fn to_data_url(&self) -> Option<String> {
        let mime = self.mime_type()?;
        Some(format!("data:{mime};base64,{}", BASE64.encode(&self.bytes)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    InvalidInput,
    RateLimited,
    Failure,
    Transformed,
    Downloaded,
}

/// A user-visible toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub kind: NotificationKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u64>,
}

impl Notification {
    fn error(kind: NotificationKind, message: impl Into<String>, attempt: Option<u64>) -> Self {
        Self {
            level: NotificationLevel::Error,
            kind,
            message: message.into(),
            attempt,
        }
    }

    fn success(kind: NotificationKind, message: impl Into<String>, attempt: Option<u64>) -> Self {
        Self {
            level: NotificationLevel::Success,
            kind,
            message: message.into(),
            attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Empty,
    Ready {
        original: ImagePayload,
    },
    Transforming {
        original: ImagePayload,
        /// Result of the previous attempt when this one is a regenerate.
        previous: Option<ImagePayload>,
        attempt: u64,
    },
    Done {
        original: ImagePayload,
        transformed: ImagePayload,
    },
}

/// Discriminant of `UploadState`, handy for rendering and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Empty,
    Ready,
    Transforming,
    Done,
}

impl UploadState {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Empty => Phase::Empty,
            Self::Ready { .. } => Phase::Ready,
            Self::Transforming { .. } => Phase::Transforming,
            Self::Done { .. } => Phase::Done,
        }
    }
}

/// A transform call the caller must deliver to the relay and report back
/// through `complete_transform`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransform {
    pub attempt: u64,
    pub request: TransformRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: &'static str,
    pub image: ImagePayload,
}

#[derive(Debug)]
pub struct UploadController {
    state: UploadState,
    next_attempt: u64,
    notifications: Vec<Notification>,
}

impl Default for UploadController {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadController {
    pub fn new() -> Self {
        Self {
            state: UploadState::Empty,
            next_attempt: 1,
            notifications: Vec::new(),
        }
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn is_transforming(&self) -> bool {
        matches!(self.state, UploadState::Transforming { .. })
    }

    pub fn original(&self) -> Option<&ImagePayload> {
        match &self.state {
            UploadState::Empty => None,
            UploadState::Ready { original }
            | UploadState::Transforming { original, .. }
            | UploadState::Done { original, .. } => Some(original),
        }
    }

    /// The image shown in the "transformed" panel, including the previous
    /// result while a regenerate is in flight.
    pub fn transformed(&self) -> Option<&ImagePayload> {
        match &self.state {
            UploadState::Done { transformed, .. } => Some(transformed),
            UploadState::Transforming { previous, .. } => previous.as_ref(),
            _ => None,
        }
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn view(&self) -> ControllerView<'_> {
        ControllerView::of(self)
    }

    /// Loads a user-selected file as the new original image.
    ///
    /// Non-image files are rejected with one error notification and leave the
    /// state untouched. Ignored while a transform is in flight.
    pub fn select_file(&mut self, file: SelectedFile) -> bool {
        if self.is_transforming() {
            return false;
        }
        let Some(mime) = file.mime_type().filter(|mime| mime.starts_with("image/")) else {
            self.notifications.push(Notification::error(
                NotificationKind::InvalidInput,
                INVALID_FILE_MESSAGE,
                None,
            ));
            return false;
        };
        if file.bytes.is_empty() {
            self.notifications.push(Notification::error(
                NotificationKind::InvalidInput,
                EMPTY_FILE_MESSAGE,
                None,
            ));
            return false;
        }
        self.state = UploadState::Ready {
            original: ImagePayload::new(mime, file.bytes),
        };
        true
    }

    /// Starts a transform (or regenerate) of the current original.
    ///
    /// Returns `None` when there is no original or an attempt is already in
    /// flight.
    pub fn begin_transform(&mut self) -> Option<PendingTransform> {
        let (original, previous) = match std::mem::replace(&mut self.state, UploadState::Empty) {
            UploadState::Ready { original } => (original, None),
            UploadState::Done {
                original,
                transformed,
            } => (original, Some(transformed)),
            other => {
                self.state = other;
                return None;
            }
        };
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let request = TransformRequest::new(&original);
        self.state = UploadState::Transforming {
            original,
            previous,
            attempt,
        };
        Some(PendingTransform { attempt, request })
    }

    /// Applies the relay's reply for `attempt`.
    ///
    /// Replies for any attempt other than the one in flight are dropped, so a
    /// reply arriving after `reset()` or a second reply for an already
    /// resolved attempt changes nothing and notifies nobody.
    pub fn complete_transform(&mut self, attempt: u64, response: TransformResponse) -> bool {
        let (original, previous) = match std::mem::replace(&mut self.state, UploadState::Empty) {
            UploadState::Transforming {
                original,
                previous,
                attempt: in_flight,
            } if in_flight == attempt => (original, previous),
            other => {
                self.state = other;
                return false;
            }
        };

        match response {
            TransformResponse::Success { image } => {
                self.state = UploadState::Done {
                    original,
                    transformed: image,
                };
                self.notifications.push(Notification::success(
                    NotificationKind::Transformed,
                    TRANSFORMED_MESSAGE,
                    Some(attempt),
                ));
            }
            TransformResponse::RateLimited { retry_delay, .. } => {
                self.state = Self::settle(original, previous);
                self.notifications.push(Notification::error(
                    NotificationKind::RateLimited,
                    format!("Rate limited by AI service. Please retry in about {retry_delay}."),
                    Some(attempt),
                ));
            }
            TransformResponse::Failure { error } => {
                self.state = Self::settle(original, previous);
                let message = if error.trim().is_empty() {
                    FALLBACK_ERROR_MESSAGE.to_string()
                } else {
                    error
                };
                self.notifications.push(Notification::error(
                    NotificationKind::Failure,
                    message,
                    Some(attempt),
                ));
            }
        }
        true
    }

    /// `begin_transform` + relay call + `complete_transform` in one step.
    pub fn transform_with<C: RelayClient + ?Sized>(&mut self, client: &C) -> bool {
        let Some(pending) = self.begin_transform() else {
            return false;
        };
        let response = client.transform(&pending.request);
        self.complete_transform(pending.attempt, response)
    }

    /// Drops both images. Safe to call from any state, any number of times.
    pub fn reset(&mut self) {
        self.state = UploadState::Empty;
    }

    /// Exports the transformed image on screen, including the previous result
    /// while a regenerate is in flight. No-op without one.
    pub fn download(&mut self) -> Option<Download> {
        let download = Download {
            file_name: DOWNLOAD_FILE_NAME,
            image: self.transformed()?.clone(),
        };
        self.notifications.push(Notification::success(
            NotificationKind::Downloaded,
            DOWNLOADED_MESSAGE,
            None,
        ));
        Some(download)
    }

    fn settle(original: ImagePayload, previous: Option<ImagePayload>) -> UploadState {
        match previous {
            Some(transformed) => UploadState::Done {
                original,
                transformed,
            },
            None => UploadState::Ready { original },
        }
    }
}
