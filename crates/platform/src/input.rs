//! Keyboard state gathered between frames.

use std::collections::HashSet;

use winit::event::{ElementState, KeyEvent};
use winit::keyboard::PhysicalKey;

pub use winit::keyboard::KeyCode;

/// Tracks which keys are held and which changed since the last frame.
#[derive(Debug, Default)]
pub struct InputState {
    /// Currently pressed keys
    pressed_keys: HashSet<KeyCode>,
    /// Keys that were just pressed this frame
    just_pressed_keys: HashSet<KeyCode>,
    /// Keys that were just released this frame
    just_released_keys: HashSet<KeyCode>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once the current frame's input has been consumed.
    pub fn begin_frame(&mut self) {
        self.just_pressed_keys.clear();
        self.just_released_keys.clear();
    }

    /// Feed a winit keyboard event. Keys without a physical code are ignored.
    pub fn on_key_event(&mut self, event: &KeyEvent) {
        let PhysicalKey::Code(key) = event.physical_key else {
            return;
        };
        match event.state {
            ElementState::Pressed => self.on_key_pressed(key),
            ElementState::Released => self.on_key_released(key),
        }
    }

    /// Handle a key press. Auto-repeat of a held key is not a new press.
    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.insert(key);
        }
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        if self.pressed_keys.remove(&key) {
            self.just_released_keys.insert(key);
        }
    }

    /// Drop all held keys, e.g. when the window loses focus.
    pub fn release_all(&mut self) {
        self.just_released_keys.extend(self.pressed_keys.drain());
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    pub fn is_key_just_released(&self, key: KeyCode) -> bool {
        self.just_released_keys.contains(&key)
    }

    /// Keys pressed since the last [`begin_frame`](Self::begin_frame), in no order.
    pub fn just_pressed(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.just_pressed_keys.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_is_reported_once() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Tab);
        input.on_key_pressed(KeyCode::Tab);
        assert!(input.is_key_just_pressed(KeyCode::Tab));
        assert_eq!(input.just_pressed().count(), 1);

        input.begin_frame();
        input.on_key_pressed(KeyCode::Tab);
        assert!(input.is_key_pressed(KeyCode::Tab));
        assert!(!input.is_key_just_pressed(KeyCode::Tab));
    }

    #[test]
    fn test_release() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::ArrowUp);
        input.begin_frame();
        input.on_key_released(KeyCode::ArrowUp);
        assert!(!input.is_key_pressed(KeyCode::ArrowUp));
        assert!(input.is_key_just_released(KeyCode::ArrowUp));

        // Releasing a key that was never pressed changes nothing.
        input.on_key_released(KeyCode::Digit1);
        assert!(!input.is_key_just_released(KeyCode::Digit1));
    }

    #[test]
    fn test_release_all_on_focus_loss() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::ArrowLeft);
        input.on_key_pressed(KeyCode::ArrowRight);
        input.release_all();
        assert!(!input.is_key_pressed(KeyCode::ArrowLeft));
        assert!(input.is_key_just_released(KeyCode::ArrowRight));
    }
}
