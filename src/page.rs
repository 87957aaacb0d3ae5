//! The page-source boundary.
//!
//! Rendering a document page to text or image bytes belongs to a
//! document-source adapter, not to this crate. The pipeline consumes pages
//! through the [`PageSource`] trait only; image absence degrades processing
//! to text-only, it never aborts a page.

/// One page of a document, as seen by the pipeline.
///
/// Adapters should compute text and image lazily on first access and cache
/// the result for the object's lifetime — both can be expensive (layout
/// analysis, rasterisation) and each is requested more than once per page.
pub trait PageSource: Send + Sync {
    /// 1-indexed page number.
    fn page_number(&self) -> u32;

    /// The page's raw text, if any can be extracted.
    fn text(&self) -> Option<String>;

    /// Rendered image bytes (PNG), if the page is renderable.
    ///
    /// Returning `None` switches the page to text-only processing.
    fn image(&self) -> Option<Vec<u8>>;
}

/// An in-memory page, useful for tests and for documents that arrive
/// pre-rendered.
#[derive(Debug, Clone)]
pub struct StaticPage {
    page_number: u32,
    text: Option<String>,
    image: Option<Vec<u8>>,
}

impl StaticPage {
    pub fn new(page_number: u32, text: Option<String>, image: Option<Vec<u8>>) -> Self {
        Self {
            page_number,
            text,
            image,
        }
    }

    /// A text-only page.
    pub fn text_only(page_number: u32, text: impl Into<String>) -> Self {
        Self::new(page_number, Some(text.into()), None)
    }
}

impl PageSource for StaticPage {
    fn page_number(&self) -> u32 {
        self.page_number
    }

    fn text(&self) -> Option<String> {
        self.text.clone()
    }

    fn image(&self) -> Option<Vec<u8>> {
        self.image.clone()
    }
}
