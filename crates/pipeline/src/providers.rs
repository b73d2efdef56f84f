//! External provider seams consumed by the pipeline steps.
//!
//! Implementations classify their own failures: a 503 or a timeout is
//! `transient`, a rejected request is `permanent`, a rate limit is `quota`.
//! The stub implementations are deterministic and fully offline, for dev
//! wiring and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use slidegen_core::{
    BBox, Fit, ImageRef, Layout, PageSize, ProjectId, Region, RegionKind, StepError,
};

/// Short-lived credentials for the slides backend, resolved per project.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: String,
}

/// Handle to a created (or found) external presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationHandle {
    pub id: String,
    pub url: String,
}

/// A region placed on a slide, in page coordinates.
#[derive(Debug, Clone)]
pub struct PlacedRegion {
    pub region: Region,
    pub x_pt: f64,
    pub y_pt: f64,
    pub w_pt: f64,
    pub h_pt: f64,
}

/// Everything needed to fill one slide.
#[derive(Debug, Clone)]
pub struct SlidePlan {
    /// Deck position, from the source image ordinal.
    pub ordinal: u32,
    pub fit: Fit,
    pub regions: Vec<PlacedRegion>,
}

/// Resolves per-project credentials for the slides backend.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Missing or unresolvable credentials classify `permanent`.
    async fn credentials_for(&self, project: ProjectId) -> Result<Credentials, StepError>;
}

/// Turns one source image into a structured layout.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn extract_layout(&self, image: &ImageRef) -> Result<Layout, StepError>;
}

/// Creates and fills the external presentation.
#[async_trait]
pub trait SlidesProvider: Send + Sync {
    /// Idempotent create: the same `request_key` always resolves to the same
    /// presentation, so a re-run after a crash reuses it instead of leaking
    /// a duplicate deck.
    async fn find_or_create_presentation(
        &self,
        creds: &Credentials,
        request_key: &str,
        title: &str,
        page_size: PageSize,
    ) -> Result<PresentationHandle, StepError>;

    /// Fill the presentation, one slide per plan. Returns the slide count.
    async fn populate(
        &self,
        creds: &Credentials,
        presentation_id: &str,
        slides: &[SlidePlan],
    ) -> Result<usize, StepError>;
}

/// Token provider that hands out one fixed token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Default for StaticTokenProvider {
    fn default() -> Self {
        Self::new("dev-token")
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn credentials_for(&self, _project: ProjectId) -> Result<Credentials, StepError> {
        Ok(Credentials {
            access_token: self.token.clone(),
        })
    }
}

/// Offline analysis: one full-width text region carrying the filename.
#[derive(Debug, Default)]
pub struct StubAnalysisProvider {
    calls: AtomicUsize,
}

impl StubAnalysisProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of extractions performed, for idempotency assertions.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for StubAnalysisProvider {
    async fn extract_layout(&self, image: &ImageRef) -> Result<Layout, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let caption = image
            .original_filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&image.original_filename)
            .to_string();
        Ok(Layout::new(
            1280.0,
            720.0,
            vec![Region {
                id: format!("{}-caption", image.id),
                order: 0,
                kind: RegionKind::Text,
                bbox: BBox {
                    x: 64.0,
                    y: 48.0,
                    w: 1152.0,
                    h: 96.0,
                },
                text: Some(caption),
                style: None,
                confidence: 1.0,
            }],
        ))
    }
}

/// Offline slides backend keyed by request key.
#[derive(Debug, Default)]
pub struct StubSlidesProvider {
    decks: Mutex<HashMap<String, PresentationHandle>>,
    populate_calls: AtomicUsize,
}

impl StubSlidesProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn populate_count(&self) -> usize {
        self.populate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SlidesProvider for StubSlidesProvider {
    async fn find_or_create_presentation(
        &self,
        _creds: &Credentials,
        request_key: &str,
        _title: &str,
        _page_size: PageSize,
    ) -> Result<PresentationHandle, StepError> {
        let mut decks = self.decks.lock().await;
        let handle = decks.entry(request_key.to_string()).or_insert_with(|| {
            let id = format!("stub-{request_key}");
            PresentationHandle {
                url: format!("https://slides.invalid/d/{id}"),
                id,
            }
        });
        Ok(handle.clone())
    }

    async fn populate(
        &self,
        _creds: &Credentials,
        _presentation_id: &str,
        slides: &[SlidePlan],
    ) -> Result<usize, StepError> {
        self.populate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(slides.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidegen_core::ImageId;

    fn image(name: &str) -> ImageRef {
        ImageRef {
            id: ImageId::new(),
            ordinal: 0,
            storage_key: format!("uploads/{name}"),
            sha256: "ef".repeat(32),
            original_filename: name.to_string(),
        }
    }

    #[tokio::test]
    async fn stub_analysis_captions_from_the_filename() {
        let provider = StubAnalysisProvider::new();
        let layout = provider.extract_layout(&image("revenue.png")).await.unwrap();
        assert_eq!(layout.regions[0].text.as_deref(), Some("revenue"));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn stub_slides_create_is_idempotent_per_request_key() {
        let provider = StubSlidesProvider::new();
        let creds = Credentials {
            access_token: "t".into(),
        };
        let a = provider
            .find_or_create_presentation(&creds, "deck-1", "Deck", PageSize::Widescreen16x9)
            .await
            .unwrap();
        let b = provider
            .find_or_create_presentation(&creds, "deck-1", "Deck", PageSize::Widescreen16x9)
            .await
            .unwrap();
        assert_eq!(a, b);
    }
}
