mod apply;
mod status;

pub use apply::{ApplyArgs, cmd_apply};
pub use status::cmd_status;
