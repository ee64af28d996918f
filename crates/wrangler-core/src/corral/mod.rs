//! Concrete model families.

mod regression;

pub mod linear_regression;
pub mod logistic_regression;
pub mod lstm;
pub mod text_lstm;

pub use linear_regression::LinearRegressionModel;
pub use logistic_regression::LogisticRegressionModel;
pub use lstm::LstmModel;
pub use text_lstm::TextLstmModel;

use tch::{Device, Kind, Tensor};

/// Moves a caller-provided batch onto the model device as float.
pub(crate) fn to_float(xs: &Tensor, device: Device) -> Tensor {
    xs.to_device(device).to_kind(Kind::Float)
}
