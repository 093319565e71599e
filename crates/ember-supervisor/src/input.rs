//! Host keyboard decoding
//!
//! Host stdin delivers bytes, not scancodes. Plain bytes map through
//! [`Key::from_byte`]; the escape prefixes a terminal emulator sends for
//! Alt and the arrow keys are folded into single keys:
//!
//! - `ESC 1`..`ESC 9` → Alt+F1..F9 (terminal switch)
//! - `ESC b` / `ESC f` → Alt+B / Alt+F (word motion)
//! - `ESC [ C` / `ESC [ D` → Right / Left

use ember_kernel::Key;

const ESC: u8 = 0x1B;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Plain,
    Escape,
    Csi,
}

/// Byte-stream to key decoder.
#[derive(Clone, Debug, Default)]
pub struct KeyDecoder {
    state: State,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a key once a sequence is complete.
    pub fn feed(&mut self, byte: u8) -> Option<Key> {
        match self.state {
            State::Plain if byte == ESC => {
                self.state = State::Escape;
                None
            }
            State::Plain => Key::from_byte(byte),
            State::Escape => {
                self.state = State::Plain;
                match byte {
                    b'1'..=b'9' => Some(Key::AltFunction(byte - b'0')),
                    b'[' => {
                        self.state = State::Csi;
                        None
                    }
                    b'a'..=b'z' => Some(Key::Alt(byte)),
                    _ => None,
                }
            }
            State::Csi => {
                self.state = State::Plain;
                match byte {
                    b'C' => Some(Key::Right),
                    b'D' => Some(Key::Left),
                    _ => None,
                }
            }
        }
    }
}
