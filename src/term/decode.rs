//! Decoding of raw terminal bytes into logical keys.

use ::tracing::trace;

const ESC: u8 = 0x1b;
const BACKSPACE: u8 = 0x08;
const DEL: u8 = 0x7f;

/// Runaway guard: no sane CSI sequence carries more parameter bytes than
/// this.
const MAX_CSI_PARAMS: usize = 16;

/// A logical key decoded from the terminal byte stream.
///
/// This is the key identifier the tracker operates on: equality here defines
/// "same key" for repeat and release purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Up arrow.
    Up,
    /// Down arrow.
    Down,
    /// Left arrow.
    Left,
    /// Right arrow.
    Right,
    /// Home key.
    Home,
    /// End key.
    End,
    /// Page-up key.
    PageUp,
    /// Page-down key.
    PageDown,
    /// Forward-delete key.
    Delete,
    /// Enter / return.
    Enter,
    /// Horizontal tab.
    Tab,
    /// Backspace.
    Backspace,
    /// A lone escape press.
    Esc,
    /// A control chord, carrying the lowercase letter (Ctrl-D is
    /// `Ctrl('d')`).
    Ctrl(char),
    /// A printable character, including multi-byte UTF-8.
    Char(char),
}

/// Outcome of attempting to decode one key from the front of the buffer.
enum Decoded {
    /// `.0` bytes form the given key.
    Key(usize, Key),
    /// `.0` bytes are valid but uninteresting (or garbage); skip them.
    Drop(usize),
    /// The buffer holds the prefix of a sequence; wait for more bytes.
    Incomplete,
}

/// Streaming decoder for terminal input bytes.
///
/// Terminals do not respect read boundaries: an arrow key's three-byte CSI
/// sequence may arrive split across two reads, and a multi-byte UTF-8
/// character may arrive one byte at a time. The decoder buffers whatever
/// prefix has arrived and completes it on a later [`feed`].
///
/// Ambiguity note: a lone `ESC` byte is indistinguishable from the start of
/// an escape sequence until the next byte arrives (or doesn't). [`feed`]
/// therefore never emits `Esc` on a trailing `ESC`; call [`flush`] when the
/// input has gone quiet to resolve it.
///
/// [`feed`]: Self::feed
/// [`flush`]: Self::flush
#[derive(Debug, Default)]
pub struct Decoder {
    pending: Vec<u8>,
}

impl Decoder {
    /// Constructs a new decoder with no pending bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk of input bytes, returning every key the chunk
    /// completed. An incomplete trailing sequence is retained for the next
    /// call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Key> {
        self.pending.extend_from_slice(bytes);

        let mut keys = Vec::new();
        loop {
            match Self::decode_one(&self.pending) {
                Decoded::Key(consumed, key) => {
                    self.pending.drain(..consumed);
                    keys.push(key);
                }
                Decoded::Drop(consumed) => {
                    self.pending.drain(..consumed);
                }
                Decoded::Incomplete => break,
            }
        }
        keys
    }

    /// Resolve pending bytes once the input has gone quiet.
    ///
    /// A pending lone `ESC` becomes [`Key::Esc`]; any other stranded prefix
    /// is an aborted sequence and is discarded.
    pub fn flush(&mut self) -> Option<Key> {
        let key = match self.pending.as_slice() {
            [] => None,
            [ESC] => Some(Key::Esc),
            stranded => {
                trace!(len = stranded.len(), "Discarding stranded input bytes");
                None
            }
        };
        self.pending.clear();
        key
    }

    /// Attempt to decode a single key from the front of `buf`.
    fn decode_one(buf: &[u8]) -> Decoded {
        let Some(&first) = buf.first() else {
            return Decoded::Incomplete;
        };

        match first {
            ESC => Self::decode_escape(buf),
            b'\r' | b'\n' => Decoded::Key(1, Key::Enter),
            b'\t' => Decoded::Key(1, Key::Tab),
            BACKSPACE | DEL => Decoded::Key(1, Key::Backspace),
            // Remaining C0 controls map onto Ctrl-letter chords.
            0x01..=0x1a => Decoded::Key(1, Key::Ctrl((b'a' + first - 1) as char)),
            0x00 | 0x1c..=0x1f => Decoded::Drop(1),
            _ => Self::decode_utf8(buf),
        }
    }

    /// Decode a sequence starting with `ESC`: CSI (`ESC [`), SS3 (`ESC O`),
    /// or a plain escape press.
    fn decode_escape(buf: &[u8]) -> Decoded {
        match buf.get(1) {
            // Possibly a lone Esc; only `flush` can say for sure.
            None => Decoded::Incomplete,
            Some(b'[') => Self::decode_csi(buf),
            Some(b'O') => match buf.get(2) {
                None => Decoded::Incomplete,
                Some(final_byte) => Self::cursor_key(*final_byte)
                    .map(|key| Decoded::Key(3, key))
                    .unwrap_or(Decoded::Drop(3)),
            },
            // ESC followed by an unrelated byte: emit the escape press and
            // let the next byte decode on its own.
            Some(_) => Decoded::Key(1, Key::Esc),
        }
    }

    /// Decode `ESC [ <params> <final>`. The final byte of a CSI sequence is
    /// the first byte in `0x40..=0x7e` after the parameters.
    fn decode_csi(buf: &[u8]) -> Decoded {
        for (index, &byte) in buf.iter().enumerate().skip(2) {
            if (0x40..=0x7e).contains(&byte) {
                let consumed = index + 1;
                let params = &buf[2..index];
                return Self::csi_key(params, byte)
                    .map(|key| Decoded::Key(consumed, key))
                    .unwrap_or(Decoded::Drop(consumed));
            }
            if index - 2 >= MAX_CSI_PARAMS {
                return Decoded::Drop(index + 1);
            }
        }
        Decoded::Incomplete
    }

    /// Map a complete CSI sequence onto a key, if it names one we care
    /// about.
    fn csi_key(params: &[u8], final_byte: u8) -> Option<Key> {
        match final_byte {
            b'~' => match params {
                b"1" | b"7" => Some(Key::Home),
                b"3" => Some(Key::Delete),
                b"4" | b"8" => Some(Key::End),
                b"5" => Some(Key::PageUp),
                b"6" => Some(Key::PageDown),
                _ => None,
            },
            _ if params.is_empty() => Self::cursor_key(final_byte),
            _ => None,
        }
    }

    /// The cursor-key finals shared by CSI and SS3 encodings.
    fn cursor_key(final_byte: u8) -> Option<Key> {
        match final_byte {
            b'A' => Some(Key::Up),
            b'B' => Some(Key::Down),
            b'C' => Some(Key::Right),
            b'D' => Some(Key::Left),
            b'H' => Some(Key::Home),
            b'F' => Some(Key::End),
            _ => None,
        }
    }

    /// Decode a printable character, buffering partial UTF-8.
    fn decode_utf8(buf: &[u8]) -> Decoded {
        let len = match buf[0] {
            byte if byte < 0x80 => 1,
            byte if byte & 0xe0 == 0xc0 => 2,
            byte if byte & 0xf0 == 0xe0 => 3,
            byte if byte & 0xf8 == 0xf0 => 4,
            // A stray continuation byte can't start anything valid.
            _ => return Decoded::Drop(1),
        };

        if buf.len() < len {
            return Decoded::Incomplete;
        }

        match ::std::str::from_utf8(&buf[..len]) {
            Ok(s) => match s.chars().next() {
                Some(c) => Decoded::Key(len, Key::Char(c)),
                None => Decoded::Drop(len),
            },
            Err(_) => Decoded::Drop(1),
        }
    }
}
