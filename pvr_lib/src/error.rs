use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("error reading file")]
    Io(#[from] std::io::Error),

    #[error("error parsing data")]
    Binrw(binrw::Error),

    #[error("file ends before the declared data size")]
    Truncated,
}

impl From<binrw::Error> for ReadError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                ReadError::Truncated
            }
            other => ReadError::Binrw(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("error writing file")]
    Io(#[from] std::io::Error),

    #[error("error serialising data")]
    Binrw(#[from] binrw::Error),

    #[error("{0}")]
    InvalidParameter(&'static str),
}
