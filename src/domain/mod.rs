pub mod submission;
pub mod template;
pub mod viewer;
pub mod notification;
pub mod progress;

pub use submission::*;
pub use template::*;
pub use viewer::*;
pub use notification::*;
pub use progress::*;
