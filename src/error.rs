use thiserror::Error;

/// Everything that can go wrong between receiving image bytes and producing a
/// palette.
#[derive(Error, Debug)]
pub enum PaletteError {
    #[error("Unable to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Image is empty")]
    EmptyImage,
    #[error("n_colors must be between 1 and {max}, got {requested}")]
    InvalidColorCount { requested: i64, max: usize },
    #[error("{name} must be within [-100, 100], got {value}")]
    AdjustmentOutOfRange { name: &'static str, value: i32 },
    #[error("Clustering failed: {0}")]
    Clustering(String),
}

impl PaletteError {
    /// Whether the caller is to blame (bad bytes, bad parameters).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Clustering(_))
    }
}

pub type Result<T, E = PaletteError> = std::result::Result<T, E>;
