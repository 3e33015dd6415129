use tracing::trace;

/// Spectrum keys, named after their legend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    CapsShift,
    Z,
    X,
    C,
    V,
    A,
    S,
    D,
    F,
    G,
    Q,
    W,
    E,
    R,
    T,
    D1,
    D2,
    D3,
    D4,
    D5,
    D0,
    D9,
    D8,
    D7,
    D6,
    P,
    O,
    I,
    U,
    Y,
    Enter,
    L,
    K,
    J,
    H,
    Space,
    SymbolShift,
    M,
    N,
    B,
}

/// Keys in matrix order: row by row, bit 0 first.
const MATRIX: [[Key; 5]; 8] = [
    [Key::CapsShift, Key::Z, Key::X, Key::C, Key::V],
    [Key::A, Key::S, Key::D, Key::F, Key::G],
    [Key::Q, Key::W, Key::E, Key::R, Key::T],
    [Key::D1, Key::D2, Key::D3, Key::D4, Key::D5],
    [Key::D0, Key::D9, Key::D8, Key::D7, Key::D6],
    [Key::P, Key::O, Key::I, Key::U, Key::Y],
    [Key::Enter, Key::L, Key::K, Key::J, Key::H],
    [Key::Space, Key::SymbolShift, Key::M, Key::N, Key::B],
];

impl Key {
    /// Row (address line A8 + row) and bit of the key.
    pub fn matrix(self) -> (usize, u8) {
        for (row, keys) in MATRIX.iter().enumerate() {
            if let Some(bit) = keys.iter().position(|&key| key == self) {
                return (row, bit as u8);
            }
        }
        (0, 0)
    }

    /// Maps a host key code (`KeyboardEvent.code` naming) to a Spectrum key.
    pub fn from_code(code: &str) -> Option<Key> {
        let key = match code {
            "ShiftLeft" | "ShiftRight" => Key::CapsShift,
            "ControlLeft" | "ControlRight" | "AltLeft" | "AltRight" => Key::SymbolShift,
            "Enter" => Key::Enter,
            "Space" => Key::Space,
            "Digit0" => Key::D0,
            "Digit1" => Key::D1,
            "Digit2" => Key::D2,
            "Digit3" => Key::D3,
            "Digit4" => Key::D4,
            "Digit5" => Key::D5,
            "Digit6" => Key::D6,
            "Digit7" => Key::D7,
            "Digit8" => Key::D8,
            "Digit9" => Key::D9,
            _ => {
                let letter = code.strip_prefix("Key")?;
                return MATRIX
                    .iter()
                    .flatten()
                    .copied()
                    .find(|key| format!("{:?}", key) == letter);
            }
        };
        Some(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoystickButton {
    Right,
    Left,
    Down,
    Up,
    Fire,
}

/// Key matrix and joystick state as the ULA and joystick ports see it.
#[derive(Debug, Clone)]
pub struct Keyboard {
    /// Active low, bits 0-4.
    rows: [u8; 8],
    /// Kempston layout, active high.
    joystick: u8,
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyboard {
    pub fn new() -> Self {
        Self {
            rows: [0xFF; 8],
            joystick: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn press(&mut self, key: Key) {
        let (row, bit) = key.matrix();
        self.rows[row] &= !(1 << bit);
    }

    pub fn release(&mut self, key: Key) {
        let (row, bit) = key.matrix();
        self.rows[row] |= 1 << bit;
    }

    pub fn key_down(&mut self, code: &str) {
        match Key::from_code(code) {
            Some(key) => self.press(key),
            None => trace!("[KEYS] Unmapped key down: {}", code),
        }
    }

    pub fn key_up(&mut self, code: &str) {
        if let Some(key) = Key::from_code(code) {
            self.release(key);
        }
    }

    /// Rows selected by the zero bits of the port's high byte, ANDed.
    pub fn read_rows(&self, high: u8) -> u8 {
        self.rows
            .iter()
            .enumerate()
            .filter(|(row, _)| high & (1 << row) == 0)
            .fold(0xFF, |acc, (_, &bits)| acc & bits)
    }

    pub fn set_button(&mut self, button: JoystickButton, pressed: bool) {
        let bit = match button {
            JoystickButton::Right => 0x01,
            JoystickButton::Left => 0x02,
            JoystickButton::Down => 0x04,
            JoystickButton::Up => 0x08,
            JoystickButton::Fire => 0x10,
        };
        if pressed {
            self.joystick |= bit;
        } else {
            self.joystick &= !bit;
        }
    }

    pub fn kempston(&self) -> u8 {
        self.joystick
    }

    /// Fuller box layout, active low: up, down, left, right, fire on bit 7.
    pub fn fuller(&self) -> u8 {
        let pressed = |bit: u8| self.joystick & bit != 0;
        let mut value = 0xFF;
        if pressed(0x08) {
            value &= !0x01;
        }
        if pressed(0x04) {
            value &= !0x02;
        }
        if pressed(0x02) {
            value &= !0x04;
        }
        if pressed(0x01) {
            value &= !0x08;
        }
        if pressed(0x10) {
            value &= !0x80;
        }
        value
    }
}
