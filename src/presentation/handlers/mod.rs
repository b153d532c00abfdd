mod audio;
mod error;
mod health;
mod platforms;
mod tasks;

pub use audio::extract_audio_handler;
pub use error::{ApiError, ErrorResponse};
pub use health::health_handler;
pub use platforms::platform_task_handler;
pub use tasks::{
    create_task_handler, delete_task_handler, get_task_handler, list_tasks_handler,
    subtitle_handler,
};
