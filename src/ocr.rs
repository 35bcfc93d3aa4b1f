use serde::Serialize;

/// Image rendered in place of text (e.g. an institution logo used as its name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub src: String,
    pub alt: String,
}

/// Text recognition for names rendered as images.
///
/// Implementations may return `None` at any time; callers fall back to the
/// image alt text or drop the value.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, image: &ImageRef) -> Option<String>;
}

/// Recognizer used when no OCR backend is configured.
pub struct NoopRecognizer;

impl Recognizer for NoopRecognizer {
    fn recognize(&self, _image: &ImageRef) -> Option<String> {
        None
    }
}
