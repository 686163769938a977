pub mod completion_llm;
pub mod db;

pub use completion_llm::OpenAiCompletionAdapter;
pub use db::PgRepository;
