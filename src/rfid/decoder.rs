//! Character stream to card id decoder for keyboard-style RFID readers

/// Readers type the card number as digits, usually followed by Enter.
pub const CARD_DIGITS: usize = 10;
/// Shortest buffer accepted when the reader terminates early with Enter.
pub const MIN_CARD_DIGITS: usize = 8;

#[derive(Debug, Default)]
pub struct RfidDecoder {
    buffer: String,
}

impl RfidDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one character; returns a card id once one is complete.
    ///
    /// Ten digits emit immediately. A newline emits what was collected if it
    /// holds at least eight digits. Control characters reset the buffer;
    /// other printable characters are ignored.
    pub fn push(&mut self, c: char) -> Option<String> {
        if c.is_ascii_digit() {
            self.buffer.push(c);
            if self.buffer.len() == CARD_DIGITS {
                return Some(std::mem::take(&mut self.buffer));
            }
            return None;
        }

        if c == '\n' || c == '\r' {
            let token = std::mem::take(&mut self.buffer);
            return (token.len() >= MIN_CARD_DIGITS).then_some(token);
        }

        if c.is_control() {
            self.buffer.clear();
        }
        None
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
