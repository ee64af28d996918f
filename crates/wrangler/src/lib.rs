pub mod dataset;
pub mod tester;
pub mod wrangler;

pub use dataset::DatasetManager;
pub use tester::{CheckResult, ModelTester, TestReport};
pub use wrangler::{ModelWrangler, TrainReport};
