//! Error types shared by the pipeline, passes and the effect merger.

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building shaders or preparing passes.
///
/// Everything except [`Error::Capability`] is a validation error: the caller that triggered the
/// merge (usually an effect-list mutation) receives it synchronously and can recover by undoing
/// the change. Capability errors never reach the render loop; [`Pass::initialize`] turns them
/// into a disabled pass.
///
/// [`Pass::initialize`]: crate::pass::Pass::initialize
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("convolution effects cannot be merged ({effects})")]
    ConvolutionConflict { effects: String },

    #[error("effects that transform UVs are incompatible with convolution effects ({convolution})")]
    UvTransformWithConvolution { convolution: String },

    #[error("effect `{effect}` declares neither `main_image` nor `main_uv`")]
    MissingEntryPoint { effect: String },

    #[error("effect `{effect}` has a malformed entry point: {reason}")]
    MalformedEntryPoint { effect: String, reason: String },

    #[error("effect `{effect}` declares `{symbol}` but its shader never defines it")]
    UndeclaredSymbol { effect: String, symbol: String },

    #[error("shader data for prefix `{prefix}` was merged twice")]
    NamespaceCollision { prefix: String },

    #[error("G-Buffer channel `{channel}` is part of a dependency cycle")]
    DependencyCycle { channel: String },

    #[error("unknown G-Buffer channel `{channel}`")]
    UnknownChannel { channel: String },

    #[error("device capability missing: {0}")]
    Capability(String),
}

impl Error {
    /// Returns `true` for errors caused by an invalid effect set or registry.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Error::Capability(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_errors_are_not_validation_errors() {
        assert!(!Error::Capability("float targets".into()).is_validation());
        assert!(
            Error::ConvolutionConflict {
                effects: "a, b".into()
            }
            .is_validation()
        );
    }

    #[test]
    fn messages_name_the_offending_effects() {
        let err = Error::ConvolutionConflict {
            effects: "blur, sharpen".into(),
        };
        assert_eq!(
            err.to_string(),
            "convolution effects cannot be merged (blur, sharpen)"
        );
    }
}
