//! Platform layer: the winit window, the Vulkan context for it, keyboard state and
//! the event pump feeding the render loop.

mod events;
mod input;
mod window;

pub use events::{InputHandler, Platform};
pub use input::{InputState, KeyCode};
pub use window::Window;
