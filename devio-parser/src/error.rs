#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("payload too large: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, ParserError>;
