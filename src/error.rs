use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("feed transport error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("payload decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
    #[error("float parse error: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error("unsupported stream: {0}")]
    UnknownStream(String),
    #[error("chart sink error: {0}")]
    ChartSink(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_display_string() {
        let error = AppError::UnknownStream("btcusdt@depth".to_string());
        let rendered = simd_json::to_string(&error).expect("error serializes");
        assert_eq!(rendered, r#""unsupported stream: btcusdt@depth""#);
    }

    #[test]
    fn float_parse_failures_convert_with_question_mark() {
        fn parse(raw: &str) -> Result<f64, AppError> {
            Ok(raw.parse::<f64>()?)
        }
        assert!(matches!(parse("97k"), Err(AppError::ParseFloat(_))));
    }
}
