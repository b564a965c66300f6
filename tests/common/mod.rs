#![allow(dead_code)]

pub mod doubles;
pub mod strategies;

pub use doubles::*;
pub use strategies::*;

use filings_pipeline::messaging::{DocumentIndexRecord, FileReference, JobPayload, QueueEnvelope};

pub fn index_envelope(id: i64, year: i32) -> QueueEnvelope {
    QueueEnvelope::new(JobPayload::DocumentIndex(DocumentIndexRecord {
        id,
        url: format!("https://www.sec.gov/Archives/edgar/full-index/{year}/QTR1/company.idx"),
        year,
        is_new: None,
    }))
}

pub fn file_envelope(wrap: fn(FileReference) -> JobPayload, file: FileReference) -> QueueEnvelope {
    QueueEnvelope::new(wrap(file))
}
