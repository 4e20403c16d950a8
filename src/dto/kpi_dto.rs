use serde::Deserialize;
use validator::Validate;

// Body de compute / recompute
#[derive(Debug, Deserialize, Validate)]
pub struct HourRequest {
    #[validate(length(min = 1))]
    pub hour_start: String,
}
