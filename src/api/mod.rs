pub mod middleware;
pub mod routes;

pub use middleware::log_request_errors;
pub use routes::{
    concat_videos, create_session, delete_session, delete_upload, download_output, get_session,
    health, index, merge_command_preview, merge_videos, options, upload_video,
};
