pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
	#[error("Unavailable: {message}")]
	Unavailable { message: String },
}
impl From<lumen_storage::Error> for Error {
	fn from(err: lumen_storage::Error) -> Self {
		match err {
			lumen_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			lumen_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			lumen_storage::Error::Unavailable(message) => Self::Unavailable { message },
			lumen_storage::Error::Qdrant(inner) => Self::Qdrant { message: inner.to_string() },
		}
	}
}

impl From<color_eyre::Report> for Error {
	fn from(err: color_eyre::Report) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
