pub mod root;
pub mod submissions;
pub mod notifications;
