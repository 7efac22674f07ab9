/// Name of the environment variable containing the path to the codec configuration file.
/// If not set, defaults to
///  (1) on Linux and macOS: `$XDG_CONFIG_HOME/xap/codec.toml` or `$HOME/.config/xap/codec.toml`
///  (2) on Windows: `%APPDATA%\xap\codec.toml`
pub const ENV_CODEC_CONFIG_PATH: &str = "XAP_CONFIG_PATH";

/// Magic bytes opening every compiled codec table.
pub const AOT_MAGIC_BYTES: [u8; 8] = *b"\0XAPAOT\0";

/// Version of this crate, checked against compiled codec tables.
pub const XAPCORE_VERSION: &str = env!("CARGO_PKG_VERSION");
