//! RFID reader input threads
//!
//! Readers behave like keyboards: they either write to the process' stdin
//! (serial/tty readers) or inject global key events (USB HID readers). Both
//! sources run on their own OS thread for the life of the process and hand
//! complete card ids to the arbiter queue.

use crate::error::{AccessError, Result};
use crate::rfid::decoder::RfidDecoder;
use log::{error, info, warn};
use rdev::{EventType, Key as RdevKey, listen};
use std::io::Read;
use tokio::sync::mpsc::Sender;

/// Read card ids from stdin until EOF.
pub fn spawn_stdin_reader(scans: Sender<String>) -> Result<()> {
    std::thread::Builder::new()
        .name("rfid-stdin".into())
        .spawn(move || {
            let mut decoder = RfidDecoder::new();
            let stdin = std::io::stdin();

            for byte in stdin.lock().bytes() {
                let byte = match byte {
                    Ok(b) => b,
                    Err(e) => {
                        error!("RFID stdin read failed: {}", e);
                        break;
                    }
                };
                if let Some(card) = decoder.push(byte as char)
                    && scans.blocking_send(card).is_err()
                {
                    break;
                }
            }
            info!("RFID stdin reader stopped");
        })
        .map_err(|e| AccessError::device(format!("cannot spawn RFID reader: {}", e)))?;

    info!("RFID reader listening on stdin");
    Ok(())
}

/// Capture global key events, decoding card ids and the optional trigger key.
pub fn spawn_keyboard_wedge(
    scans: Sender<String>,
    triggers: Option<Sender<()>>,
    trigger_key: Option<RdevKey>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("rfid-keyboard".into())
        .spawn(move || {
            let mut state = WedgeState::new(trigger_key);
            let result = listen(move |event| match state.mapping(event) {
                Some(WedgeInput::Card(card)) => {
                    let _ = scans.blocking_send(card);
                }
                Some(WedgeInput::Trigger) => {
                    if let Some(triggers) = &triggers {
                        let _ = triggers.blocking_send(());
                    }
                }
                None => {}
            });
            if let Err(e) = result {
                error!("Global key listener failed: {:?}", e);
            }
        })
        .map_err(|e| AccessError::device(format!("cannot spawn key listener: {}", e)))?;

    info!("RFID reader listening for keyboard input");
    Ok(())
}

/// Parse a configured trigger key name.
pub fn parse_trigger_key(name: &str) -> Option<RdevKey> {
    let key = match name.to_ascii_lowercase().as_str() {
        "space" => RdevKey::Space,
        "enter" | "return" => RdevKey::Return,
        "pause" => RdevKey::Pause,
        "f1" => RdevKey::F1,
        "f2" => RdevKey::F2,
        "f3" => RdevKey::F3,
        "f4" => RdevKey::F4,
        "f5" => RdevKey::F5,
        "f6" => RdevKey::F6,
        "f7" => RdevKey::F7,
        "f8" => RdevKey::F8,
        "f9" => RdevKey::F9,
        "f10" => RdevKey::F10,
        "f11" => RdevKey::F11,
        "f12" => RdevKey::F12,
        other => {
            warn!("Unknown trigger key {:?}", other);
            return None;
        }
    };
    Some(key)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WedgeInput {
    Card(String),
    Trigger,
}

struct WedgeState {
    decoder: RfidDecoder,
    trigger_key: Option<RdevKey>,
}

impl WedgeState {
    fn new(trigger_key: Option<RdevKey>) -> Self {
        WedgeState {
            decoder: RfidDecoder::new(),
            trigger_key,
        }
    }

    fn mapping(&mut self, event: rdev::Event) -> Option<WedgeInput> {
        let EventType::KeyRelease(key) = event.event_type else {
            return None;
        };

        if self.trigger_key == Some(key) {
            return Some(WedgeInput::Trigger);
        }

        let c = Self::digit_key(key).or(match key {
            RdevKey::Return | RdevKey::KpReturn => Some('\n'),
            RdevKey::Escape | RdevKey::Backspace => Some('\x1b'),
            _ => None,
        })?;
        self.decoder.push(c).map(WedgeInput::Card)
    }

    fn digit_key(key: RdevKey) -> Option<char> {
        match key {
            RdevKey::Num0 | RdevKey::Kp0 => Some('0'),
            RdevKey::Num1 | RdevKey::Kp1 => Some('1'),
            RdevKey::Num2 | RdevKey::Kp2 => Some('2'),
            RdevKey::Num3 | RdevKey::Kp3 => Some('3'),
            RdevKey::Num4 | RdevKey::Kp4 => Some('4'),
            RdevKey::Num5 | RdevKey::Kp5 => Some('5'),
            RdevKey::Num6 | RdevKey::Kp6 => Some('6'),
            RdevKey::Num7 | RdevKey::Kp7 => Some('7'),
            RdevKey::Num8 | RdevKey::Kp8 => Some('8'),
            RdevKey::Num9 | RdevKey::Kp9 => Some('9'),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn release(key: RdevKey) -> rdev::Event {
        rdev::Event {
            time: SystemTime::now(),
            name: None,
            event_type: EventType::KeyRelease(key),
        }
    }

    #[test]
    fn test_wedge_decodes_card_and_trigger() {
        let mut state = WedgeState::new(Some(RdevKey::F12));
        let keys = [
            RdevKey::Num1,
            RdevKey::Num2,
            RdevKey::Num3,
            RdevKey::Num4,
            RdevKey::Kp5,
            RdevKey::Num6,
            RdevKey::Num7,
            RdevKey::Num8,
            RdevKey::Return,
        ];
        let out: Vec<_> = keys.into_iter().filter_map(|k| state.mapping(release(k))).collect();
        assert_eq!(out, vec![WedgeInput::Card("12345678".into())]);

        assert_eq!(state.mapping(release(RdevKey::F12)), Some(WedgeInput::Trigger));
    }

    #[test]
    fn test_wedge_ignores_presses_and_letters() {
        let mut state = WedgeState::new(None);
        let press = rdev::Event {
            time: SystemTime::now(),
            name: None,
            event_type: EventType::KeyPress(RdevKey::Num1),
        };
        assert_eq!(state.mapping(press), None);
        assert_eq!(state.mapping(release(RdevKey::KeyA)), None);
        assert_eq!(state.decoder.pending(), "");
    }

    #[test]
    fn test_parse_trigger_key() {
        assert_eq!(parse_trigger_key("F5"), Some(RdevKey::F5));
        assert_eq!(parse_trigger_key("space"), Some(RdevKey::Space));
        assert_eq!(parse_trigger_key("hyper"), None);
    }
}
