//! Tool-result formatting for the reasoning engine.
//!
//! Results containing an image become an ordered multimodal array; text-only
//! results collapse to one newline-joined string. Images are also written to
//! the frame store, which never affects the payload.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bimpilot_core::{ContentBlock, ContentPart, ToolPayload};
use tokio::sync::Mutex;
use tracing::warn;

use crate::frames::{FrameError, FrameHistoryBuffer, FrameRecord};

/// Build the engine payload for a tool's content blocks.
pub fn format_blocks(blocks: &[ContentBlock]) -> ToolPayload {
    if blocks.iter().any(ContentBlock::is_image) {
        let parts = blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Image { data, mime_type } => ContentPart::Image {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                },
                text => ContentPart::Text {
                    text: text.render_text().unwrap_or_default(),
                },
            })
            .collect();
        ToolPayload::Parts(parts)
    } else {
        let text = blocks
            .iter()
            .filter_map(ContentBlock::render_text)
            .collect::<Vec<_>>()
            .join("\n");
        ToolPayload::Text(text)
    }
}

/// A formatted result plus the frames written while formatting it.
#[derive(Debug, Clone)]
pub struct FormattedResult {
    pub payload: ToolPayload,
    pub frames: Vec<FrameRecord>,
}

/// Formats results and persists their images.
#[derive(Clone, Default)]
pub struct ResultFormatter {
    frames: Option<Arc<Mutex<FrameHistoryBuffer>>>,
}

impl ResultFormatter {
    pub fn new(frames: Option<Arc<Mutex<FrameHistoryBuffer>>>) -> Self {
        Self { frames }
    }

    pub async fn format(&self, blocks: &[ContentBlock]) -> FormattedResult {
        let mut frames = Vec::new();
        if let Some(buffer) = &self.frames {
            for block in blocks {
                if let ContentBlock::Image { data, mime_type } = block {
                    match persist(buffer, data, mime_type).await {
                        Ok(record) => frames.push(record),
                        Err(e) => warn!(error = %e, mime_type = %mime_type, "Frame not persisted"),
                    }
                }
            }
        }

        FormattedResult {
            payload: format_blocks(blocks),
            frames,
        }
    }
}

async fn persist(
    buffer: &Mutex<FrameHistoryBuffer>,
    data: &str,
    mime_type: &str,
) -> Result<FrameRecord, FrameError> {
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| FrameError::Decode(e.to_string()))?;
    buffer.lock().await.record(&bytes, mime_type).await
}
