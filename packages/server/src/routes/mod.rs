mod analyses;
mod health;

pub use analyses::{get_analysis, submit_analysis, SubmitAnalysisRequest, SubmitAnalysisResponse};
pub use health::health_handler;
