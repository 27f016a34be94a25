pub mod bootstrap;
pub mod dialog_flow;
pub mod edit_buffer;
pub mod session;
pub mod timer;
