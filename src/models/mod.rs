pub mod course;
pub mod progress;
pub mod test_spec;
pub mod unit;

pub use course::{Course, CourseDetail, CourseProgress, NewCourseRequest, ReorderUnitsRequest};
pub use progress::{ProgressRecord, ProgressStatus, ProgressSummary, RecordAttemptRequest};
pub use test_spec::{GradeRequest, GradeResponse, NewTestSpecRequest, SubmissionResult, TestSpec};
pub use unit::{ExercisePayload, NewUnitRequest, Unit, UnitKind, UnitRow};
