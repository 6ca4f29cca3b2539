//! Image attachment to rendered document conversion.
//!
//! Extraction sends the image to a vision model. When `synthesize` is set,
//! a second call turns the extracted description into styled HTML;
//! otherwise the extraction output is rendered as-is. All scratch files
//! live in one temporary directory that is removed when the stage returns.

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::error::TransformError;
use crate::llm::{strip_code_fence, VisionModel};
use crate::mail_reader::message::Attachment;
use crate::settings::TransformConfig;

pub mod render;

use render::Renderer;

#[derive(Debug, Clone, PartialEq)]
pub struct TransformResult {
    pub filename: String,
    pub document: Vec<u8>,
}

pub struct DocumentTransformer {
    model: Arc<dyn VisionModel>,
    renderer: Arc<dyn Renderer>,
    synthesize: bool,
    extraction_prompt: String,
    synthesis_prompt: String,
}

/// `scan.png` becomes `scan.pdf`.
pub fn document_filename(source: &str) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("document");
    format!("{}.pdf", stem)
}

impl DocumentTransformer {
    pub fn new(
        model: Arc<dyn VisionModel>,
        renderer: Arc<dyn Renderer>,
        config: &TransformConfig,
    ) -> Self {
        Self {
            model,
            renderer,
            synthesize: config.synthesize,
            extraction_prompt: config.extraction_prompt.clone(),
            synthesis_prompt: config.synthesis_prompt.clone(),
        }
    }

    async fn extract(&self, image: &Attachment) -> Result<String, TransformError> {
        let uploaded = self
            .model
            .upload(&image.data, &image.content_type, &image.filename)
            .await?;

        let extracted = self
            .model
            .generate_from_file(&self.extraction_prompt, &uploaded)
            .await;

        // Release the remote copy whether or not generation worked.
        if let Err(e) = self.model.delete(&uploaded).await {
            warn!("Failed to delete uploaded file {}: {}", uploaded.name, e);
        }

        Ok(extracted?)
    }

    async fn markup(&self, image: &Attachment) -> Result<String, TransformError> {
        let extracted = self.extract(image).await?;
        let markup = if self.synthesize {
            let prompt = format!("{}\n\n{}", self.synthesis_prompt.trim_end(), extracted);
            self.model.complete(&prompt).await?
        } else {
            extracted
        };

        let markup = strip_code_fence(&markup);
        if markup.is_empty() {
            return Err(TransformError::EmptyMarkup);
        }
        Ok(markup.to_string())
    }

    /// Converts one image into a PDF. The scratch directory is deleted on
    /// every return path, including errors from the model or renderer.
    pub async fn transform(&self, image: &Attachment) -> Result<TransformResult, TransformError> {
        let workdir = tempfile::Builder::new()
            .prefix("inbox-responder-")
            .tempdir()?;

        let markup = self.markup(image).await?;

        let markup_path = workdir.path().join("document.html");
        let output_path = workdir.path().join("document.pdf");
        tokio::fs::write(&markup_path, markup.as_bytes()).await?;

        self.renderer.render(&markup_path, &output_path).await?;
        let document = tokio::fs::read(&output_path).await?;

        info!(
            "Rendered {} into a {} byte document",
            image.filename,
            document.len()
        );
        Ok(TransformResult {
            filename: document_filename(&image.filename),
            document,
        })
    }
}

/// First attachment whose content type is an image.
pub fn first_image(attachments: &[Attachment]) -> Option<&Attachment> {
    attachments.iter().find(|attachment| attachment.is_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModelError, RenderError};
    use crate::llm::{TextModel, UploadedFile};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeVision {
        calls: Mutex<Vec<String>>,
        fail_generate: bool,
    }

    impl FakeVision {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextModel for FakeVision {
        async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
            self.calls.lock().unwrap().push("complete".into());
            assert!(prompt.contains("a table with two rows"));
            Ok("```html\n<html><body>styled</body></html>\n```".into())
        }
    }

    #[async_trait]
    impl VisionModel for FakeVision {
        async fn upload(
            &self,
            _data: &[u8],
            mime_type: &str,
            _display_name: &str,
        ) -> Result<UploadedFile, ModelError> {
            self.calls.lock().unwrap().push("upload".into());
            Ok(UploadedFile {
                name: "files/1".into(),
                uri: "uri".into(),
                mime_type: mime_type.into(),
            })
        }

        async fn generate_from_file(
            &self,
            _prompt: &str,
            _file: &UploadedFile,
        ) -> Result<String, ModelError> {
            self.calls.lock().unwrap().push("generate".into());
            if self.fail_generate {
                Err(ModelError::Empty { provider: "fake" })
            } else {
                Ok("a table with two rows".into())
            }
        }

        async fn delete(&self, _file: &UploadedFile) -> Result<(), ModelError> {
            self.calls.lock().unwrap().push("delete".into());
            Ok(())
        }
    }

    // Copies the markup into the output and remembers where it worked.
    #[derive(Default)]
    struct CopyRenderer {
        seen_dirs: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    #[async_trait]
    impl Renderer for CopyRenderer {
        async fn render(&self, input: &Path, output: &Path) -> Result<(), RenderError> {
            self.seen_dirs
                .lock()
                .unwrap()
                .push(input.parent().unwrap().to_path_buf());
            if self.fail {
                return Err(RenderError::Failed { code: Some(1), stderr: "boom".into() });
            }
            std::fs::copy(input, output).unwrap();
            Ok(())
        }
    }

    fn image() -> Attachment {
        Attachment {
            filename: "form.png".into(),
            content_type: "image/png".into(),
            data: vec![1, 2, 3],
        }
    }

    fn config(synthesize: bool) -> TransformConfig {
        TransformConfig {
            synthesize,
            ..TransformConfig::default()
        }
    }

    #[tokio::test]
    async fn two_call_transform_renders_synthesized_markup() {
        let model = Arc::new(FakeVision::default());
        let renderer = Arc::new(CopyRenderer::default());
        let stage = DocumentTransformer::new(model.clone(), renderer.clone(), &config(true));

        let result = stage.transform(&image()).await.unwrap();
        assert_eq!(result.filename, "form.pdf");
        assert_eq!(result.document, b"<html><body>styled</body></html>");
        assert_eq!(model.calls(), ["upload", "generate", "delete", "complete"]);

        let dirs = renderer.seen_dirs.lock().unwrap();
        assert!(!dirs[0].exists(), "scratch directory must be removed");
    }

    #[tokio::test]
    async fn single_call_transform_renders_extraction_output() {
        let model = Arc::new(FakeVision::default());
        let renderer = Arc::new(CopyRenderer::default());
        let stage = DocumentTransformer::new(model.clone(), renderer, &config(false));

        let result = stage.transform(&image()).await.unwrap();
        assert_eq!(result.document, b"a table with two rows");
        assert_eq!(model.calls(), ["upload", "generate", "delete"]);
    }

    #[tokio::test]
    async fn uploaded_file_is_deleted_when_generation_fails() {
        let model = Arc::new(FakeVision {
            fail_generate: true,
            ..FakeVision::default()
        });
        let stage =
            DocumentTransformer::new(model.clone(), Arc::new(CopyRenderer::default()), &config(true));

        let err = stage.transform(&image()).await.unwrap_err();
        assert!(matches!(err, TransformError::Model(_)));
        assert_eq!(model.calls(), ["upload", "generate", "delete"]);
    }

    #[tokio::test]
    async fn render_failure_still_cleans_up() {
        let renderer = Arc::new(CopyRenderer {
            fail: true,
            ..CopyRenderer::default()
        });
        let stage = DocumentTransformer::new(
            Arc::new(FakeVision::default()),
            renderer.clone(),
            &config(true),
        );

        let err = stage.transform(&image()).await.unwrap_err();
        assert!(matches!(err, TransformError::Render(_)));
        let dirs = renderer.seen_dirs.lock().unwrap();
        assert!(!dirs[0].exists());
    }

    #[test]
    fn picks_first_image_attachment() {
        let pdf = Attachment {
            filename: "a.pdf".into(),
            content_type: "application/pdf".into(),
            data: vec![],
        };
        let attachments = vec![pdf, image(), Attachment { filename: "b.jpg".into(), ..image() }];
        assert_eq!(first_image(&attachments).unwrap().filename, "form.png");
        assert!(first_image(&attachments[..1]).is_none());
    }

    #[test]
    fn document_name_follows_source_stem() {
        assert_eq!(document_filename("scan.png"), "scan.pdf");
        assert_eq!(document_filename(""), "document.pdf");
    }
}
