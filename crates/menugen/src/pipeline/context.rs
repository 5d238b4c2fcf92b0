use crate::models::{ExtractionResult, GenerationResult, MenuItem, PreprocessedImage};

pub struct PipelineContext {
    // Input
    pub session_id: String,
    pub image_url: String,

    // Preprocessing result
    pub preprocessed: Option<PreprocessedImage>,

    // Extraction result
    pub extraction: Option<ExtractionResult>,

    // Parsed items, replaced by the stored copies once persisted
    pub items: Vec<MenuItem>,

    // Set once the session row exists, so its final status can be written
    pub session_persisted: bool,

    // One entry per item once the batch finished
    pub generated: Vec<GenerationResult>,
}

impl PipelineContext {
    pub fn new(session_id: &str, image_url: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            image_url: image_url.to_string(),
            preprocessed: None,
            extraction: None,
            items: Vec::new(),
            session_persisted: false,
            generated: Vec::new(),
        }
    }

    /// Image reference handed to the extractor: the preprocessed one when
    /// available.
    pub fn source_image(&self) -> &str {
        self.preprocessed
            .as_ref()
            .map(|p| p.url.as_str())
            .filter(|url| !url.is_empty())
            .unwrap_or(self.image_url.as_str())
    }

    /// Copies generation outcomes onto the matching items.
    pub fn apply_generation_results(&mut self, results: Vec<GenerationResult>) {
        for result in &results {
            if let Some(item) = self.items.iter_mut().find(|i| i.id == result.item_id) {
                item.generation_status = result.item_status();
                if result.is_success() {
                    item.image_url = Some(result.image_url.clone());
                }
            }
        }
        self.generated = results;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemGenerationStatus;

    #[test]
    fn test_source_image_prefers_preprocessed_url() {
        let mut ctx = PipelineContext::new("s", "raw.jpg");
        assert_eq!(ctx.source_image(), "raw.jpg");

        ctx.preprocessed = Some(PreprocessedImage {
            url: "normalized.jpg".to_string(),
            ..Default::default()
        });
        assert_eq!(ctx.source_image(), "normalized.jpg");
    }

    #[test]
    fn test_apply_generation_results() {
        let mut ctx = PipelineContext::new("s", "raw.jpg");
        ctx.items = vec![
            MenuItem::new("Soup").with_id("a"),
            MenuItem::new("Salad").with_id("b"),
        ];

        ctx.apply_generation_results(vec![
            GenerationResult::success("a", "https://img/a.png"),
            GenerationResult::failed("b", "Max retries exceeded"),
        ]);

        assert_eq!(ctx.items[0].generation_status, ItemGenerationStatus::Completed);
        assert_eq!(ctx.items[0].image_url.as_deref(), Some("https://img/a.png"));
        assert_eq!(ctx.items[1].generation_status, ItemGenerationStatus::Failed);
        assert!(ctx.items[1].image_url.is_none());
        assert_eq!(ctx.generated.len(), 2);
    }
}
