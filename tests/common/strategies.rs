use proptest::prelude::*;

use filings_pipeline::messaging::{
    DocumentCollection, DocumentIndexRecord, DocumentListRecord, FileReference, JobPayload,
    NextKey, QueueEnvelope,
};

/// Strategy for generating statement file paths
pub fn path_strategy() -> impl Strategy<Value = String> {
    "/tmp/[a-z0-9_]{1,16}\\.sql"
}

pub fn process_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_-]{0,31}"
}

pub fn document_index_strategy() -> impl Strategy<Value = DocumentIndexRecord> {
    (
        1i64..1_000_000,
        "https://www\\.sec\\.gov/Archives/edgar/full-index/[0-9]{4}/QTR[1-4]/company\\.idx",
        1993i32..2030,
        prop::option::of(any::<bool>()),
    )
        .prop_map(|(id, url, year, is_new)| DocumentIndexRecord {
            id,
            url,
            year,
            is_new,
        })
}

pub fn document_list_strategy() -> impl Strategy<Value = DocumentListRecord> {
    (
        prop::option::of(1i64..1_000_000),
        prop::option::of("[0-9]{10}"),
        prop::option::of("[A-Z][A-Za-z ]{0,30}"),
        prop::option::of("(10-K|10-Q|8-K|S-1)"),
        prop::option::of("20[0-2][0-9]-[01][0-9]-[0-3][0-9]"),
        prop::option::of("edgar/data/[0-9]{4,8}/[0-9-]{20}\\.txt"),
    )
        .prop_map(
            |(id, cik, company_name, form_type, date_filed, file_name)| DocumentListRecord {
                id,
                cik,
                company_name,
                form_type,
                date_filed,
                file_name,
            },
        )
}

pub fn file_reference_strategy() -> impl Strategy<Value = FileReference> {
    (
        prop::option::of(path_strategy()),
        prop::option::of("[ -~]{0,40}"),
        prop::option::of(process_name_strategy()),
        prop::option::of(1u32..500),
    )
        .prop_map(|(path, body, name, qty)| FileReference {
            path,
            body,
            name,
            qty,
        })
}

pub fn document_collection_strategy() -> impl Strategy<Value = DocumentCollection> {
    (
        prop::collection::vec(document_list_strategy(), 0..4),
        process_name_strategy(),
        0u32..100,
    )
        .prop_map(|(documents, name, qty)| DocumentCollection {
            documents,
            name,
            qty,
        })
}

pub fn job_payload_strategy() -> impl Strategy<Value = JobPayload> {
    prop_oneof![
        document_index_strategy().prop_map(JobPayload::DocumentIndex),
        file_reference_strategy().prop_map(JobPayload::DocumentSql),
        file_reference_strategy().prop_map(JobPayload::DocumentListSql),
        file_reference_strategy().prop_map(JobPayload::DocumentListSqlSelect),
        file_reference_strategy().prop_map(JobPayload::DocumentListSqlUpdate),
        document_list_strategy().prop_map(JobPayload::DocumentList),
        document_collection_strategy().prop_map(JobPayload::DocumentCollection),
    ]
}

pub fn next_key_strategy() -> impl Strategy<Value = NextKey> {
    prop_oneof![
        any::<i64>().prop_map(NextKey::Number),
        "[a-zA-Z][a-zA-Z0-9]{0,12}".prop_map(NextKey::Text),
    ]
}

pub fn envelope_strategy() -> impl Strategy<Value = QueueEnvelope> {
    (
        job_payload_strategy(),
        prop::option::of(next_key_strategy()),
        prop::option::of(any::<bool>()),
        prop::option::of(0i32..4),
    )
        .prop_map(|(job, next, is_new, type_generate)| QueueEnvelope {
            job,
            next,
            is_new,
            type_generate,
        })
}
