//! Error handling for the gattlink CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("GATT error: {0}")]
    Gatt(#[from] gattlink_core::GattError),

    #[error("BLE backend error: {0}")]
    Backend(#[from] gattlink_ble::BackendError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Characteristic {uuid} not found on {address}")]
    CharacteristicNotFound { address: String, uuid: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use gattlink_ble::BackendError;

    #[test]
    fn test_backend_errors_convert_with_context() {
        fn bring_up() -> Result<()> {
            Err(BackendError::NoMatchingAdapter {
                selector: "hci9".to_string(),
            })?;
            Ok(())
        }

        let err = bring_up().unwrap_err();
        assert!(matches!(err, CliError::Backend(_)));
        assert!(err.to_string().starts_with("BLE backend error:"), "{}", err);
        assert!(err.to_string().contains("hci9"), "{}", err);
    }
}
