//! Renderer error types.

use bay_state::Coe;
use thiserror::Error;

pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("cluster distro {distro:?} is not supported for {coe} (supported: {supported})")]
    UnsupportedDistro {
        coe: Coe,
        distro: String,
        supported: String,
    },

    #[error("{coe} template requires parameter {parameter}")]
    MissingParameter { coe: Coe, parameter: &'static str },
}
