//! Structured receipt payload
//!
//! Every receipt keeps a JSON document next to its columns: what the analyzer
//! returned, what validation concluded and how the receipt relates to other
//! receipts. Known sections are typed; anything else lands in `extensions` so
//! older or newer documents still load.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analysis::AnalysisErrorCode;
use crate::validation::ValidationWarning;

/// Remote analyzer response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Extracted receipt fields, uninterpreted
    #[serde(default)]
    pub receipt: Map<String, Value>,
    /// Any other keys the analyzer sent
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of the validation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetadata {
    pub warnings: Vec<ValidationWarning>,
    pub validated_at: NaiveDate,
}

/// Link between a receipt and an earlier one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DuplicateAnnotation {
    /// Uploaded file hashes to the same digest as the original's file
    ContentIdentical {
        duplicate_of_receipt_id: String,
        /// Digest algorithm used for the match
        source: String,
    },
    /// Same receipt number, issue date and total as the candidate
    BusinessCandidate {
        duplicate_candidate_of_receipt_id: String,
    },
}

/// Why remote analysis failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub code: AnalysisErrorCode,
    pub message: String,
    pub retriable: bool,
}

/// The payload document stored with each receipt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<DuplicateAnnotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    #[serde(default, flatten)]
    pub extensions: Map<String, Value>,
}

impl ReceiptPayload {
    /// Payload for a byte-identical re-upload of `original_id`
    pub fn content_duplicate(original_id: &str) -> Self {
        Self {
            duplicate: Some(DuplicateAnnotation::ContentIdentical {
                duplicate_of_receipt_id: original_id.to_string(),
                source: "sha256".to_string(),
            }),
            ..Default::default()
        }
    }

    /// Payload for a failed analysis
    pub fn failed(code: AnalysisErrorCode, message: &str, retriable: bool) -> Self {
        Self {
            failure: Some(FailureDetail {
                code,
                message: message.to_string(),
                retriable,
            }),
            ..Default::default()
        }
    }

    /// Id of the receipt this one is a content duplicate of
    pub fn duplicate_of(&self) -> Option<&str> {
        match &self.duplicate {
            Some(DuplicateAnnotation::ContentIdentical {
                duplicate_of_receipt_id,
                ..
            }) => Some(duplicate_of_receipt_id),
            _ => None,
        }
    }

    /// Id of the business-duplicate candidate
    pub fn duplicate_candidate_of(&self) -> Option<&str> {
        match &self.duplicate {
            Some(DuplicateAnnotation::BusinessCandidate {
                duplicate_candidate_of_receipt_id,
            }) => Some(duplicate_candidate_of_receipt_id),
            _ => None,
        }
    }
}
