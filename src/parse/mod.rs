// src/parse/mod.rs — Turning uploaded bytes into datasets and images

pub mod image;
pub mod tabular;

use std::sync::Arc;

use thiserror::Error;

use crate::session::{SessionData, SessionKind};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("upload is empty")]
    EmptyUpload,

    #[error("table has no data rows")]
    EmptyTable,

    #[error("table needs at least one feature column and one label column")]
    TooFewColumns,

    #[error("no label column found (expected one of: {expected})")]
    MissingLabelColumn { expected: String },

    #[error("row {row}: column '{column}' is not numeric: '{value}'")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row {row}: label is empty")]
    MissingLabel { row: usize },

    #[error("text upload is not valid UTF-8")]
    NotUtf8,

    #[error("delimited text is malformed: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet is unreadable: {0}")]
    Spreadsheet(#[from] zip::result::ZipError),

    #[error("spreadsheet is unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("image could not be decoded: {0}")]
    Image(#[from] ::image::ImageError),

    #[error("image has zero width or height")]
    EmptyImage,
}

/// Parse an upload as the declared kind.
pub fn parse_upload(kind: SessionKind, bytes: &[u8]) -> Result<SessionData, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::EmptyUpload);
    }
    match kind {
        SessionKind::Tabular(use_case) => {
            let dataset = tabular::parse_dataset(bytes, use_case)?;
            Ok(SessionData::Tabular {
                use_case,
                dataset: Arc::new(dataset),
            })
        }
        SessionKind::Image => {
            let image = image::decode_image(bytes)?;
            Ok(SessionData::Image {
                image: Arc::new(image),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TabularUse;

    #[test]
    fn test_empty_upload_rejected_for_every_kind() {
        for kind in [
            SessionKind::Tabular(TabularUse::Classifier),
            SessionKind::Tabular(TabularUse::Expert),
            SessionKind::Image,
        ] {
            assert!(matches!(parse_upload(kind, b""), Err(ParseError::EmptyUpload)));
        }
    }

    #[test]
    fn test_declared_kind_is_respected() {
        let csv = b"a,b,label\n1,2,x\n";
        assert!(parse_upload(SessionKind::Tabular(TabularUse::Classifier), csv).is_ok());
        assert!(matches!(
            parse_upload(SessionKind::Image, csv),
            Err(ParseError::Image(_))
        ));
    }
}
