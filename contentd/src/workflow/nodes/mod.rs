//! Canonical nodes of the article-creation workflow

mod check_image;
mod check_text;
mod generate_image;
mod organize;
mod post_process;
mod search;
mod write;

pub use check_image::CheckImageNode;
pub use check_text::CheckTextNode;
pub use generate_image::GenerateImageNode;
pub use organize::OrganizeNode;
pub use post_process::PostProcessNode;
pub use search::SearchNode;
pub use write::WriteNode;

pub const SEARCH: &str = "search";
pub const ORGANIZE: &str = "organize";
pub const WRITE: &str = "write";
pub const CHECK_TEXT: &str = "check_text";
pub const GENERATE_IMAGE: &str = "generate_image";
pub const CHECK_IMAGE: &str = "check_image";
pub const POST_PROCESS: &str = "post_process";
