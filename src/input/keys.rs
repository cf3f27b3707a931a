// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Host key and modifier definitions, and their HID translation.

use bitflags::bitflags;

use crate::hid::usage::{self, modifier};

bitflags! {
    /// Logical modifier state reported by the host with every key event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HostModifiers: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2;
        const META = 1 << 3;
    }
}

/// Logical modifiers paired with their left-side HID bit. The right-side
/// bit is the left one shifted up by four.
const MODIFIER_GROUPS: [(HostModifiers, u8); 4] = [
    (HostModifiers::CONTROL, modifier::LEFT_CTRL),
    (HostModifiers::SHIFT, modifier::LEFT_SHIFT),
    (HostModifiers::ALT, modifier::LEFT_ALT),
    (HostModifiers::META, modifier::LEFT_META),
];

impl HostModifiers {
    /// HID modifier byte for this flag snapshot.
    ///
    /// Each logical modifier maps to its left-side bit; the flag snapshot
    /// does not say which physical key is held.
    pub fn to_hid(self) -> u8 {
        MODIFIER_GROUPS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .fold(0, |mask, (_, left)| mask | left)
    }
}

/// Physical modifier keys currently down, learned from modifier key events.
///
/// Refines the host flag snapshot to the side(s) actually held, so holding
/// both Shift keys reports both bits and releasing one keeps the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeldModifiers(u8);

impl HeldModifiers {
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Record a modifier key going down or up. `bit` is its HID modifier bit.
    pub fn update(&mut self, bit: u8, down: bool) {
        if down {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    /// HID modifier byte for `flags`.
    ///
    /// The modifier owning `changed` (the key of the current event, if it is
    /// a modifier) follows the tracked keys alone. Every other modifier
    /// follows the snapshot, on the tracked side(s) when known and the left
    /// side otherwise. Keys the snapshot no longer reports are forgotten.
    pub fn resolve(&mut self, flags: HostModifiers, changed: Option<u8>) -> u8 {
        let own = changed.map_or(0, both_sides);
        let mut mask = self.0 & own;
        for (flag, left) in MODIFIER_GROUPS {
            let group = both_sides(left);
            if group == own {
                continue;
            }
            let held = self.0 & group;
            if flags.contains(flag) {
                mask |= if held != 0 { held } else { left };
            } else {
                self.0 &= !group;
            }
        }
        mask
    }
}

/// Left and right bits of the modifier `bit` belongs to.
fn both_sides(bit: u8) -> u8 {
    let left = (bit & 0x0F) | (bit >> 4);
    left | (left << 4)
}

/// Physical keys the host can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    Num1,
    Num2,
    Num3,
    Num4,
    Num5,
    Num6,
    Num7,
    Num8,
    Num9,
    Num0,
    Enter,
    Escape,
    Backspace,
    Tab,
    Space,
    Minus,
    Equal,
    LeftBracket,
    RightBracket,
    Backslash,
    Semicolon,
    Apostrophe,
    Grave,
    Comma,
    Dot,
    Slash,
    CapsLock,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    Insert,
    Home,
    PageUp,
    Delete,
    End,
    PageDown,
    Right,
    Left,
    Down,
    Up,
    LeftCtrl,
    LeftShift,
    LeftAlt,
    LeftMeta,
    RightCtrl,
    RightShift,
    RightAlt,
    RightMeta,
}

impl Key {
    /// Translate a Linux evdev key code (`KEY_*` in `input-event-codes.h`).
    pub fn from_evdev(code: u16) -> Option<Key> {
        use Key::*;
        let key = match code {
            1 => Escape,
            2 => Num1,
            3 => Num2,
            4 => Num3,
            5 => Num4,
            6 => Num5,
            7 => Num6,
            8 => Num7,
            9 => Num8,
            10 => Num9,
            11 => Num0,
            12 => Minus,
            13 => Equal,
            14 => Backspace,
            15 => Tab,
            16 => Q,
            17 => W,
            18 => E,
            19 => R,
            20 => T,
            21 => Y,
            22 => U,
            23 => I,
            24 => O,
            25 => P,
            26 => LeftBracket,
            27 => RightBracket,
            28 => Enter,
            29 => LeftCtrl,
            30 => A,
            31 => S,
            32 => D,
            33 => F,
            34 => G,
            35 => H,
            36 => J,
            37 => K,
            38 => L,
            39 => Semicolon,
            40 => Apostrophe,
            41 => Grave,
            42 => LeftShift,
            43 => Backslash,
            44 => Z,
            45 => X,
            46 => C,
            47 => V,
            48 => B,
            49 => N,
            50 => M,
            51 => Comma,
            52 => Dot,
            53 => Slash,
            54 => RightShift,
            56 => LeftAlt,
            57 => Space,
            58 => CapsLock,
            59 => F1,
            60 => F2,
            61 => F3,
            62 => F4,
            63 => F5,
            64 => F6,
            65 => F7,
            66 => F8,
            67 => F9,
            68 => F10,
            87 => F11,
            88 => F12,
            97 => RightCtrl,
            100 => RightAlt,
            102 => Home,
            103 => Up,
            104 => PageUp,
            105 => Left,
            106 => Right,
            107 => End,
            108 => Down,
            109 => PageDown,
            110 => Insert,
            111 => Delete,
            125 => LeftMeta,
            126 => RightMeta,
            _ => return None,
        };
        Some(key)
    }

    /// HID usage code for this key.
    pub fn to_hid(self) -> u8 {
        use Key::*;
        match self {
            A => usage::A,
            B => usage::B,
            C => usage::C,
            D => usage::D,
            E => usage::E,
            F => usage::F,
            G => usage::G,
            H => usage::H,
            I => usage::I,
            J => usage::J,
            K => usage::K,
            L => usage::L,
            M => usage::M,
            N => usage::N,
            O => usage::O,
            P => usage::P,
            Q => usage::Q,
            R => usage::R,
            S => usage::S,
            T => usage::T,
            U => usage::U,
            V => usage::V,
            W => usage::W,
            X => usage::X,
            Y => usage::Y,
            Z => usage::Z,
            Num1 => usage::KEY_1,
            Num2 => usage::KEY_2,
            Num3 => usage::KEY_3,
            Num4 => usage::KEY_4,
            Num5 => usage::KEY_5,
            Num6 => usage::KEY_6,
            Num7 => usage::KEY_7,
            Num8 => usage::KEY_8,
            Num9 => usage::KEY_9,
            Num0 => usage::KEY_0,
            Enter => usage::ENTER,
            Escape => usage::ESCAPE,
            Backspace => usage::BACKSPACE,
            Tab => usage::TAB,
            Space => usage::SPACE,
            Minus => usage::MINUS,
            Equal => usage::EQUAL,
            LeftBracket => usage::LEFT_BRACKET,
            RightBracket => usage::RIGHT_BRACKET,
            Backslash => usage::BACKSLASH,
            Semicolon => usage::SEMICOLON,
            Apostrophe => usage::APOSTROPHE,
            Grave => usage::GRAVE,
            Comma => usage::COMMA,
            Dot => usage::DOT,
            Slash => usage::SLASH,
            CapsLock => usage::CAPS_LOCK,
            F1 => usage::F1,
            F2 => usage::F2,
            F3 => usage::F3,
            F4 => usage::F4,
            F5 => usage::F5,
            F6 => usage::F6,
            F7 => usage::F7,
            F8 => usage::F8,
            F9 => usage::F9,
            F10 => usage::F10,
            F11 => usage::F11,
            F12 => usage::F12,
            Insert => usage::INSERT,
            Home => usage::HOME,
            PageUp => usage::PAGE_UP,
            Delete => usage::DELETE,
            End => usage::END,
            PageDown => usage::PAGE_DOWN,
            Right => usage::RIGHT,
            Left => usage::LEFT,
            Down => usage::DOWN,
            Up => usage::UP,
            LeftCtrl => usage::LEFT_CTRL,
            LeftShift => usage::LEFT_SHIFT,
            LeftAlt => usage::LEFT_ALT,
            LeftMeta => usage::LEFT_META,
            RightCtrl => usage::RIGHT_CTRL,
            RightShift => usage::RIGHT_SHIFT,
            RightAlt => usage::RIGHT_ALT,
            RightMeta => usage::RIGHT_META,
        }
    }
}

/// A key usage plus the modifier needed to produce a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub usage: u8,
    pub modifier: u8,
}

impl KeyStroke {
    const fn plain(usage: u8) -> Self {
        Self { usage, modifier: 0 }
    }

    const fn shifted(usage: u8) -> Self {
        Self {
            usage,
            modifier: modifier::LEFT_SHIFT,
        }
    }
}

/// Keystroke producing an ASCII character on a US layout.
///
/// Returns `None` for characters without a mapping (most control
/// characters, DEL, anything outside 7-bit ASCII).
pub fn stroke_for_char(c: char) -> Option<KeyStroke> {
    if !c.is_ascii() {
        return None;
    }
    let stroke = match c {
        'a'..='z' => KeyStroke::plain(usage::A + (c as u8 - b'a')),
        'A'..='Z' => KeyStroke::shifted(usage::A + (c as u8 - b'A')),
        '0' => KeyStroke::plain(usage::KEY_0),
        '1'..='9' => KeyStroke::plain(usage::KEY_1 + (c as u8 - b'1')),
        ' ' => KeyStroke::plain(usage::SPACE),
        '\n' => KeyStroke::plain(usage::ENTER),
        '\t' => KeyStroke::plain(usage::TAB),
        '-' => KeyStroke::plain(usage::MINUS),
        '=' => KeyStroke::plain(usage::EQUAL),
        '[' => KeyStroke::plain(usage::LEFT_BRACKET),
        ']' => KeyStroke::plain(usage::RIGHT_BRACKET),
        '\\' => KeyStroke::plain(usage::BACKSLASH),
        ';' => KeyStroke::plain(usage::SEMICOLON),
        '\'' => KeyStroke::plain(usage::APOSTROPHE),
        '`' => KeyStroke::plain(usage::GRAVE),
        ',' => KeyStroke::plain(usage::COMMA),
        '.' => KeyStroke::plain(usage::DOT),
        '/' => KeyStroke::plain(usage::SLASH),
        '!' => KeyStroke::shifted(usage::KEY_1),
        '@' => KeyStroke::shifted(usage::KEY_2),
        '#' => KeyStroke::shifted(usage::KEY_3),
        '$' => KeyStroke::shifted(usage::KEY_4),
        '%' => KeyStroke::shifted(usage::KEY_5),
        '^' => KeyStroke::shifted(usage::KEY_6),
        '&' => KeyStroke::shifted(usage::KEY_7),
        '*' => KeyStroke::shifted(usage::KEY_8),
        '(' => KeyStroke::shifted(usage::KEY_9),
        ')' => KeyStroke::shifted(usage::KEY_0),
        '_' => KeyStroke::shifted(usage::MINUS),
        '+' => KeyStroke::shifted(usage::EQUAL),
        '{' => KeyStroke::shifted(usage::LEFT_BRACKET),
        '}' => KeyStroke::shifted(usage::RIGHT_BRACKET),
        '|' => KeyStroke::shifted(usage::BACKSLASH),
        ':' => KeyStroke::shifted(usage::SEMICOLON),
        '"' => KeyStroke::shifted(usage::APOSTROPHE),
        '~' => KeyStroke::shifted(usage::GRAVE),
        '<' => KeyStroke::shifted(usage::COMMA),
        '>' => KeyStroke::shifted(usage::DOT),
        '?' => KeyStroke::shifted(usage::SLASH),
        _ => return None,
    };
    Some(stroke)
}
