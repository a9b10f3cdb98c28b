pub mod header;
pub mod utils;

pub use header::draw_header;
pub use utils::{job_status_color, measurement, truncate};
