#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A single raw unit could not be decoded. Recoverable: the unit is skipped.
    #[error("unit decode error: {reason}")]
    UnitDecode { reason: String },

    /// An on-chain helper call failed. Recoverable the same way as `UnitDecode`.
    #[error("remote query error: {reason}")]
    RemoteQuery { reason: String },

    /// A post-decoding rule failed. Its mutation is discarded.
    #[error("post-decoding rule error: {reason}")]
    Rule { reason: String },

    /// Two decoders claimed the same routing key.
    #[error("decoder load error: {reason}")]
    Load { reason: String },

    #[error("parse error: {reason}")]
    Parse { reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn unit(reason: impl Into<String>) -> Self {
        Self::UnitDecode {
            reason: reason.into(),
        }
    }

    pub fn remote(reason: impl Into<String>) -> Self {
        Self::RemoteQuery {
            reason: reason.into(),
        }
    }

    pub fn rule(reason: impl Into<String>) -> Self {
        Self::Rule {
            reason: reason.into(),
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Whether the orchestrator absorbs this error locally instead of failing the decode.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnitDecode { .. } | Self::RemoteQuery { .. } | Self::Rule { .. }
        )
    }
}
