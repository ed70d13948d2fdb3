use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn io_errors_convert_with_context_prefix() {
        let err: Error = std::io::Error::other("disk full").into();
        assert_eq!(err.to_string(), "io error: disk full");
    }

    #[test]
    fn migration_errors_render_their_message() {
        let err = Error::Migration("memos v3 failed".to_string());
        assert_eq!(err.to_string(), "migration error: memos v3 failed");
    }
}
