use murmur_session::SessionError;
use murmur_storage::StorageError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to open message database '{database_path}': {source}"))]
    OpenStorage {
        stage: &'static str,
        database_path: String,
        source: StorageError,
    },
    #[snafu(display("failed to start session for '{collection}': {source}"))]
    StartSession {
        stage: &'static str,
        collection: String,
        source: SessionError,
    },
    #[snafu(display("failed to read terminal input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}
