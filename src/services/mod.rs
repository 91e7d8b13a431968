pub mod course_progress;
pub mod grader;
pub mod ledger;
pub mod recommender;

pub use grader::Grader;
