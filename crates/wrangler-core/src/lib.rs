pub mod architecture;
pub mod batch;
pub mod config;
pub mod corral;
pub mod error;
pub mod layers;
pub mod losses;
pub mod model;
pub mod saver;
pub mod summary;

pub use architecture::{Architecture, Forward};
pub use batch::Batch;
pub use config::{Activation, DenseParams, DeviceChoice, GraphParams, ModelParams, RecurrentParams, Shape, TrainingParams};
pub use error::WranglerError;
pub use model::Model;
pub use saver::Saver;
pub use summary::SummaryWriter;
