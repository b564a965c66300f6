//! Concrete collaborators wired up by the binaries: local files, the
//! document downloader and the PostgreSQL-backed repositories.

pub mod downloader;
pub mod file_store;
pub mod postgres;

pub use downloader::HttpDocumentDownloader;
pub use file_store::LocalFileStore;
pub use postgres::{
    validate_identifier, PgContentProcessor, PgDocumentIndexRepository, PgDocumentListRepository,
    PgSqlExecutor,
};
