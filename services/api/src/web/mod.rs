pub mod rest;
pub mod state;

// Re-export the handlers to make them easily accessible
// to the binary that will build the web server router.
pub use rest::{
    chat_handler, create_session_handler, get_session_handler, get_submission_handler,
    start_session_handler, submit_session_handler,
};
