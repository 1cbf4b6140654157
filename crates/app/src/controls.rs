//! Keyboard controls for the background effects.
//!
//! - `Tab` cycles effects, `1`..`9` select one directly
//! - `Left`/`Right` pick one of the 16 push-constant components
//! - `Up`/`Down` nudge the picked component of the active effect

use tracing::{debug, info, warn};

use ember_platform::{InputState, KeyCode};
use ember_renderer::Engine;

const COMPONENTS: usize = 16;
const NUDGE: f32 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Command {
    NextEffect,
    SelectEffect(usize),
    PickComponent(isize),
    Nudge(f32),
}

const DIGITS: [KeyCode; 9] = [
    KeyCode::Digit1,
    KeyCode::Digit2,
    KeyCode::Digit3,
    KeyCode::Digit4,
    KeyCode::Digit5,
    KeyCode::Digit6,
    KeyCode::Digit7,
    KeyCode::Digit8,
    KeyCode::Digit9,
];

#[derive(Debug, Default)]
pub struct EffectControls {
    component: usize,
}

impl EffectControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies this frame's key presses to `engine`.
    pub fn apply(&mut self, input: &InputState, engine: &mut Engine) {
        for command in commands(input) {
            self.execute(command, engine);
        }
    }

    fn execute(&mut self, command: Command, engine: &mut Engine) {
        match command {
            Command::NextEffect => {
                engine.select_next_effect();
            }
            Command::SelectEffect(index) => {
                if let Err(e) = engine.select_effect(index) {
                    warn!("{}", e);
                }
            }
            Command::PickComponent(step) => {
                self.pick(step);
                let (param, lane) = self.slot();
                info!("Editing data{}[{}]", param + 1, lane);
            }
            Command::Nudge(delta) => {
                let (param, lane) = self.slot();
                let Some(effect) = engine.active_effect_mut() else {
                    return;
                };
                if let Some(value) = effect.data.param_mut(param) {
                    value[lane] += delta;
                    debug!("{}: data{} = {:?}", effect.name, param + 1, value);
                }
            }
        }
    }

    fn pick(&mut self, step: isize) {
        self.component = (self.component as isize + step).rem_euclid(COMPONENTS as isize) as usize;
    }

    /// Parameter block and lane of the picked component.
    fn slot(&self) -> (usize, usize) {
        (self.component / 4, self.component % 4)
    }
}

/// Commands for the keys pressed this frame, in a fixed order.
fn commands(input: &InputState) -> Vec<Command> {
    let mut commands = Vec::new();
    if input.is_key_just_pressed(KeyCode::Tab) {
        commands.push(Command::NextEffect);
    }
    if let Some(index) = DIGITS.iter().position(|&key| input.is_key_just_pressed(key)) {
        commands.push(Command::SelectEffect(index));
    }
    if input.is_key_just_pressed(KeyCode::ArrowLeft) {
        commands.push(Command::PickComponent(-1));
    }
    if input.is_key_just_pressed(KeyCode::ArrowRight) {
        commands.push(Command::PickComponent(1));
    }
    // Held keys keep nudging every frame.
    if input.is_key_pressed(KeyCode::ArrowUp) {
        commands.push(Command::Nudge(NUDGE));
    }
    if input.is_key_pressed(KeyCode::ArrowDown) {
        commands.push(Command::Nudge(-NUDGE));
    }
    commands
}
