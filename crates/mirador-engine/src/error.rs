use thiserror::Error;

use crate::gpu::{GpuError, ShaderVariant};

/// Errors surfaced synchronously by a render call.
///
/// Contract violations (missing image, zero-sized target, missing uniform) are
/// fatal to the call and never retried. Dropped tiles and context loss are
/// recovered internally and do not appear here.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("render: image must be loaded before it can be drawn")]
    MissingImage,

    #[error("render: target surface must have a non-zero size (got {width}x{height})")]
    InvalidTarget { width: u32, height: u32 },

    #[error("destination buffer holds {actual} bytes, the image needs {expected}")]
    DestinationSize { expected: usize, actual: usize },

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("error creating GPU context: {0:#}")]
    ContextCreation(anyhow::Error),

    #[error("could not access location for uniform `{name}` in the {variant} program")]
    MissingUniform { variant: ShaderVariant, name: &'static str },

    #[error("uniform `{name}` in the {variant} program has an unexpected type")]
    UniformType { variant: ShaderVariant, name: &'static str },

    #[error("failed to parse the {variant} shader: {message}")]
    ShaderParse { variant: ShaderVariant, message: String },

    #[error("no program linked for the {0} shader")]
    ProgramNotLinked(ShaderVariant),

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

pub type Result<T> = std::result::Result<T, RenderError>;
