use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpgradeError {
    /// No conversion exists between the two versions, or the world holds data
    /// the target version cannot represent.
    #[error("cannot convert world from version {from} to {to}: {reason}")]
    UnsupportedConversion { from: u8, to: u8, reason: String },
}

pub type UpgradeResult<T> = std::result::Result<T, UpgradeError>;
