use semver::{Version, VersionReq};
use strum::EnumIs;
use thiserror::Error;
use xapschema::{ProtocolError, SchemaError};

#[derive(Debug, Error, EnumIs)]
pub enum XapError {
    /// A value marked read-only was written to.
    #[error("The object is read-only.")]
    ReadOnly,

    /// A local holder was requested for an absent value.
    #[error("Cannot build a local holder for {context}: the value is absent.")]
    NullValue { context: String },

    /// The held data cannot soundly stand for the requested type.
    #[error("Cannot represent a value of runtime type `{from}` as `{to}`.")]
    UnsupportedConversion { from: String, to: String },

    /// A codec could not be generated. The cache keeps no entry for the key, so a later
    /// call retries the build.
    #[error("Failed to build codec {key}: {reason}")]
    CodecBuild { key: String, reason: String },

    /// An object did not expose a field its shape declares.
    #[error("Object of type `{shape}` does not expose field {id} as declared by its shape.")]
    ShapeMismatch { shape: String, id: u16 },

    /// Malformed payload, propagated untouched from the reader.
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] ProtocolError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file '{file}': {source}")]
    ManifestParseError {
        source: toml::de::Error,
        file: String,
    },

    #[error("Key `{key}` not found in {context}")]
    KeyNotFound { key: String, context: String },

    #[error("Invalid compiled codec table: {0}")]
    InvalidArtifact(String),

    #[error("Incompatible compiled codec table. Required: {req}, found: {version}")]
    IncompatibleArtifact { req: VersionReq, version: Version },

    #[error("An unknown error occurred: {0}")]
    Unknown(String),
}

pub type XapResult<T> = Result<T, XapError>;
