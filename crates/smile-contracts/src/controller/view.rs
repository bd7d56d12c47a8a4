use serde::Serialize;

use super::{Phase, UploadController};
use crate::payload::ImagePayload;

pub const TRANSFORM_LABEL: &str = "Transform Teeth";
pub const TRANSFORMING_LABEL: &str = "Transforming...";
pub const TRANSFORMED_PLACEHOLDER: &str = "Your transformed smile will appear here";

/// Snapshot of what the screen should show for the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerView<'a> {
    pub phase: Phase,
    #[serde(skip)]
    pub original: Option<&'a ImagePayload>,
    #[serde(skip)]
    pub transformed: Option<&'a ImagePayload>,
    pub show_upload_prompt: bool,
    pub can_transform: bool,
    pub can_regenerate: bool,
    pub can_download: bool,
    pub can_reset: bool,
    pub transform_label: &'static str,
    pub transformed_placeholder: Option<&'static str>,
}

impl<'a> ControllerView<'a> {
    pub(super) fn of(controller: &'a UploadController) -> Self {
        let phase = controller.phase();
        let original = controller.original();
        let transformed = controller.transformed();
        let busy = phase == Phase::Transforming;
        Self {
            phase,
            original,
            transformed,
            show_upload_prompt: original.is_none(),
            can_transform: original.is_some() && !busy,
            can_regenerate: phase == Phase::Done,
            can_download: transformed.is_some(),
            can_reset: original.is_some(),
            transform_label: if busy {
                TRANSFORMING_LABEL
            } else {
                TRANSFORM_LABEL
            },
            transformed_placeholder: if original.is_some() && transformed.is_none() {
                Some(TRANSFORMED_PLACEHOLDER)
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::SelectedFile;
    use super::*;

    #[test]
    fn empty_view_only_offers_upload() {
        let controller = UploadController::new();
        let view = controller.view();
        assert!(view.show_upload_prompt);
        assert!(!view.can_transform);
        assert!(!view.can_reset);
        assert!(!view.can_download);
    }

    #[test]
    fn transforming_view_disables_trigger() {
        let mut controller = UploadController::new();
        controller.select_file(SelectedFile::new(
            "a.png",
            Some("image/png".to_string()),
            vec![1],
        ));
        assert!(controller.view().can_transform);
        assert_eq!(
            controller.view().transformed_placeholder,
            Some(TRANSFORMED_PLACEHOLDER)
        );

        controller.begin_transform();
        let view = controller.view();
        assert!(!view.can_transform);
        assert!(!view.can_regenerate);
        assert_eq!(view.transform_label, TRANSFORMING_LABEL);
        assert!(view.can_reset);
    }
}
