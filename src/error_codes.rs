use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

/// Machine-readable error codes surfaced through the `error` event channel
/// and the CLI's JSON error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidParameter,
    InvalidParameters,
    UpdateError,
    BatchUpdateError,
    PresetNotFound,
    CannotDeleteBuiltin,
    PresetApplyError,
    PresetSaveError,
    GeometryRecreateError,
    CameraPositionError,
    CameraTargetError,
    CameraResetError,
    RenderError,
    ImageExportError,
    CodeExportError,
    NotInitialized,
    InvalidOverride,
    UnsupportedFormat,
    ConfigError,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::InvalidParameters => "INVALID_PARAMETERS",
            Self::UpdateError => "UPDATE_ERROR",
            Self::BatchUpdateError => "BATCH_UPDATE_ERROR",
            Self::PresetNotFound => "PRESET_NOT_FOUND",
            Self::CannotDeleteBuiltin => "CANNOT_DELETE_BUILTIN",
            Self::PresetApplyError => "PRESET_APPLY_ERROR",
            Self::PresetSaveError => "PRESET_SAVE_ERROR",
            Self::GeometryRecreateError => "GEOMETRY_RECREATE_ERROR",
            Self::CameraPositionError => "CAMERA_POSITION_ERROR",
            Self::CameraTargetError => "CAMERA_TARGET_ERROR",
            Self::CameraResetError => "CAMERA_RESET_ERROR",
            Self::RenderError => "RENDER_ERROR",
            Self::ImageExportError => "IMAGE_EXPORT_ERROR",
            Self::CodeExportError => "CODE_EXPORT_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::InvalidOverride => "INVALID_OVERRIDE",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::ConfigError => "CONFIG_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl ErrorCode {
    /// Codes caused by bad input rather than a failing operation; the CLI
    /// exits with status 2 for these.
    pub fn is_usage(self) -> bool {
        matches!(
            self,
            Self::InvalidParameter
                | Self::InvalidParameters
                | Self::InvalidOverride
                | Self::UnsupportedFormat
                | Self::PresetNotFound
                | Self::ConfigError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
    pub recoverable: bool,
}

impl CodedError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            recoverable: true,
        }
    }

    pub fn usage(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.as_str().to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}
