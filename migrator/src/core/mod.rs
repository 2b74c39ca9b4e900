pub mod backup;
pub mod check;
pub mod client;
pub mod driver;
pub mod operator;
pub mod recovery;
pub mod sequence;
pub mod step;

pub use driver::MigrationDriver;
pub use sequence::{SequenceReport, SequenceRunner};
pub use step::{MigrationStep, StepError, StepOutcome, StepRunner};
