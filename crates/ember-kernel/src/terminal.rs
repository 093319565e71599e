//! Virtual terminals
//!
//! Each terminal owns a 127-character line editor, an 80x25 text screen and
//! a mode (echo, canonical). Keys go to whichever terminal is visible;
//! output goes to the writing task's own terminal whether or not it is on
//! screen. Writes return the bytes to mirror on a host console: the same
//! characters the screen rendered, with escape commands stripped.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use ember_hal::layout::{SCREEN_COLS, SCREEN_ROWS};

use crate::types::ProcessId;

/// Characters a line can hold (the newline makes 128)
pub const LINE_CAPACITY: usize = 127;

/// Light grey on black
pub const DEFAULT_ATTR: u8 = 0x07;

const ESC: u8 = 0x1B;
const BS: u8 = 0x08;
const CELLS: usize = SCREEN_COLS * SCREEN_ROWS;

/// A decoded key press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    /// Printable character
    Char(u8),
    Enter,
    Backspace,
    Left,
    Right,
    /// Ctrl + letter (lowercase)
    Ctrl(u8),
    /// Alt + letter (lowercase)
    Alt(u8),
    /// Alt + F1..F12 (1-based)
    AltFunction(u8),
    /// F1..F12 (1-based)
    Function(u8),
}

impl Key {
    /// Decode one byte from a byte-oriented keyboard (a host tty).
    pub fn from_byte(b: u8) -> Option<Key> {
        match b {
            b'\r' | b'\n' => Some(Key::Enter),
            0x7F | BS => Some(Key::Backspace),
            0x01..=0x1A => Some(Key::Ctrl(b'a' + b - 1)),
            0x20..=0x7E => Some(Key::Char(b)),
            _ => None,
        }
    }
}

/// Terminal line discipline flags
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TermMode {
    /// Echo typed characters
    pub echo: bool,
    /// Deliver input a line at a time with editing
    pub canonical: bool,
}

impl Default for TermMode {
    fn default() -> Self {
        Self {
            echo: true,
            canonical: true,
        }
    }
}

/// Side effects of one key press.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyOutcome {
    /// Bytes to mirror on the host console
    pub echo: Vec<u8>,
    /// Ctrl-C was pressed
    pub interrupt: bool,
    /// Alt+Fn asked for another visible terminal (0-based)
    pub switch_to: Option<usize>,
}

// ============================================================================
// Line editor
// ============================================================================

/// Editable input line. Every edit returns the bytes that redraw it.
#[derive(Clone, Debug, Default)]
pub struct LineEditor {
    buf: Vec<u8>,
    cursor: usize,
    complete: bool,
}

impl LineEditor {
    pub fn contents(&self) -> &[u8] {
        &self.buf
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Enter was pressed and the line has not been read yet.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn tail_redraw(&self, out: &mut Vec<u8>, trailing_blank: bool) {
        let tail = &self.buf[self.cursor..];
        out.extend_from_slice(tail);
        let mut back = tail.len();
        if trailing_blank {
            out.push(b' ');
            back += 1;
        }
        out.extend(core::iter::repeat(BS).take(back));
    }

    pub fn insert(&mut self, c: u8) -> Vec<u8> {
        let mut out = Vec::new();
        if self.complete || self.buf.len() >= LINE_CAPACITY {
            return out;
        }
        self.buf.insert(self.cursor, c);
        self.cursor += 1;
        out.push(c);
        self.tail_redraw(&mut out, false);
        out
    }

    pub fn backspace(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.complete || self.cursor == 0 {
            return out;
        }
        self.cursor -= 1;
        self.buf.remove(self.cursor);
        out.push(BS);
        self.tail_redraw(&mut out, true);
        out
    }

    pub fn left(&mut self) -> Vec<u8> {
        if self.complete || self.cursor == 0 {
            return Vec::new();
        }
        self.cursor -= 1;
        vec![BS]
    }

    pub fn right(&mut self) -> Vec<u8> {
        if self.complete || self.cursor == self.buf.len() {
            return Vec::new();
        }
        self.cursor += 1;
        vec![self.buf[self.cursor - 1]]
    }

    pub fn home(&mut self) -> Vec<u8> {
        if self.complete {
            return Vec::new();
        }
        let out = vec![BS; self.cursor];
        self.cursor = 0;
        out
    }

    pub fn end(&mut self) -> Vec<u8> {
        if self.complete {
            return Vec::new();
        }
        let out = self.buf[self.cursor..].to_vec();
        self.cursor = self.buf.len();
        out
    }

    /// Alt-B: back over one run of alphanumeric or other bytes.
    pub fn word_left(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let Some(&c) = self.cursor.checked_sub(1).and_then(|i| self.buf.get(i)) else {
            return out;
        };
        let alnum = c.is_ascii_alphanumeric();
        while self.cursor > 0 && self.buf[self.cursor - 1].is_ascii_alphanumeric() == alnum {
            out.extend(self.left());
        }
        out
    }

    /// Alt-F: forward over one run.
    pub fn word_right(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let Some(&c) = self.buf.get(self.cursor) else {
            return out;
        };
        let alnum = c.is_ascii_alphanumeric();
        while self.cursor < self.buf.len() && self.buf[self.cursor].is_ascii_alphanumeric() == alnum {
            out.extend(self.right());
        }
        out
    }

    /// Ctrl-W: delete the run before the cursor.
    pub fn delete_word(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.complete {
            return out;
        }
        let Some(&c) = self.cursor.checked_sub(1).and_then(|i| self.buf.get(i)) else {
            return out;
        };
        let alnum = c.is_ascii_alphanumeric();
        while self.cursor > 0 && self.buf[self.cursor - 1].is_ascii_alphanumeric() == alnum {
            out.extend(self.backspace());
        }
        out
    }

    /// Ctrl-U: erase from the start of the line to the cursor.
    pub fn kill_line(&mut self) -> Vec<u8> {
        let n = self.cursor;
        if self.complete || n == 0 {
            return Vec::new();
        }
        self.buf.drain(..n);
        self.cursor = 0;
        let mut out = vec![BS; n];
        out.extend_from_slice(&self.buf);
        out.extend(core::iter::repeat(b' ').take(n));
        out.extend(core::iter::repeat(BS).take(self.buf.len() + n));
        out
    }

    /// Ctrl-L: forget a line still being edited.
    pub fn discard(&mut self) {
        if !self.complete {
            self.buf.clear();
            self.cursor = 0;
        }
    }

    /// Enter: the line becomes readable.
    pub fn finish(&mut self) -> Vec<u8> {
        if self.complete {
            return Vec::new();
        }
        let mut out = self.end();
        out.push(b'\n');
        self.complete = true;
        out
    }

    /// Drop the line and mark an empty one complete.
    pub fn cancel(&mut self) {
        self.buf.clear();
        self.cursor = 0;
        self.complete = true;
    }

    /// Append a raw byte (non-canonical input).
    pub fn push_raw(&mut self, c: u8) -> bool {
        if self.buf.len() >= LINE_CAPACITY {
            return false;
        }
        self.buf.push(c);
        self.cursor = self.buf.len();
        true
    }

    /// Take the completed line, newline included, at most `max` bytes.
    pub fn take_line(&mut self, max: usize) -> Option<Vec<u8>> {
        if !self.complete {
            return None;
        }
        let mut line = core::mem::take(&mut self.buf);
        line.push(b'\n');
        line.truncate(max);
        self.cursor = 0;
        self.complete = false;
        Some(line)
    }

    /// Take up to `max` raw bytes from the front.
    pub fn take_raw(&mut self, max: usize) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }
        let n = max.min(self.buf.len());
        let taken: Vec<u8> = self.buf.drain(..n).collect();
        self.cursor = self.buf.len();
        Some(taken)
    }
}

// ============================================================================
// Screen
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Escape {
    Idle,
    Start,
    Params(u32),
}

/// Text-mode screen: 80x25 cells of (attribute << 8 | character).
#[derive(Clone, Debug)]
pub struct Screen {
    cells: Vec<u16>,
    row: usize,
    col: usize,
    attr: u8,
    saved: (usize, usize),
    escape: Escape,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            cells: vec![blank(DEFAULT_ATTR); CELLS],
            row: 0,
            col: 0,
            attr: DEFAULT_ATTR,
            saved: (0, 0),
            escape: Escape::Idle,
        }
    }
}

fn blank(attr: u8) -> u16 {
    (attr as u16) << 8 | b' ' as u16
}

impl Screen {
    pub fn cells(&self) -> &[u16] {
        &self.cells
    }

    /// Cursor as (row, column).
    pub fn cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    pub fn attr(&self) -> u8 {
        self.attr
    }

    /// Characters of one row, trailing blanks trimmed.
    pub fn row_text(&self, row: usize) -> String {
        let start = row * SCREEN_COLS;
        let text: String = self.cells[start..start + SCREEN_COLS]
            .iter()
            .map(|c| (*c & 0xFF) as u8 as char)
            .collect();
        String::from(text.trim_end())
    }

    pub fn clear(&mut self) {
        self.cells.fill(blank(self.attr));
        self.row = 0;
        self.col = 0;
    }

    /// Render bytes, returning what a host console should show.
    pub fn write(&mut self, data: &[u8]) -> Vec<u8> {
        let mut mirror = Vec::with_capacity(data.len());
        for &b in data {
            self.feed(b, &mut mirror);
        }
        mirror
    }

    fn feed(&mut self, b: u8, mirror: &mut Vec<u8>) {
        match self.escape {
            Escape::Idle if b == ESC => self.escape = Escape::Start,
            Escape::Idle => {
                self.put(b);
                mirror.push(b);
            }
            Escape::Start if b == b'[' => self.escape = Escape::Params(0),
            Escape::Start => self.escape = Escape::Idle,
            Escape::Params(n) if b.is_ascii_digit() => {
                self.escape = Escape::Params(n.saturating_mul(10).saturating_add((b - b'0') as u32));
            }
            Escape::Params(n) => {
                self.escape = Escape::Idle;
                self.command(b, n);
            }
        }
    }

    fn command(&mut self, cmd: u8, n: u32) {
        match cmd {
            b'f' => self.attr = (self.attr & 0xF0) | (n % 16) as u8,
            b'b' => self.attr = (self.attr & 0x0F) | (((n % 16) as u8) << 4),
            b'p' => {
                let pos = (n as usize).min(CELLS - 1);
                self.row = pos / SCREEN_COLS;
                self.col = pos % SCREEN_COLS;
            }
            b'e' => {
                let start = self.row * SCREEN_COLS + self.col;
                let end = (self.row + 1) * SCREEN_COLS;
                self.cells[start..end].fill(blank(self.attr));
            }
            b'r' => self.attr = DEFAULT_ATTR,
            b'c' => self.clear(),
            b's' => self.saved = (self.row, self.col),
            b'S' => (self.row, self.col) = self.saved,
            _ => {}
        }
    }

    fn put(&mut self, b: u8) {
        match b {
            b'\n' => self.newline(),
            b'\r' => self.col = 0,
            BS => {
                if self.col > 0 {
                    self.col -= 1;
                } else if self.row > 0 {
                    self.row -= 1;
                    self.col = SCREEN_COLS - 1;
                }
            }
            _ => {
                self.cells[self.row * SCREEN_COLS + self.col] = (self.attr as u16) << 8 | b as u16;
                self.col += 1;
                if self.col == SCREEN_COLS {
                    self.newline();
                }
            }
        }
    }

    fn newline(&mut self) {
        self.col = 0;
        if self.row + 1 < SCREEN_ROWS {
            self.row += 1;
            return;
        }
        self.cells.copy_within(SCREEN_COLS.., 0);
        let attr = self.attr;
        self.cells[CELLS - SCREEN_COLS..].fill(blank(attr));
    }
}

// ============================================================================
// Terminal
// ============================================================================

/// One virtual terminal.
#[derive(Clone, Debug)]
pub struct Terminal {
    index: usize,
    /// Foreground task (the one keys and Ctrl-C go to)
    pub owner: Option<ProcessId>,
    mode: TermMode,
    line: LineEditor,
    screen: Screen,
}

impl Terminal {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            owner: None,
            mode: TermMode::default(),
            line: LineEditor::default(),
            screen: Screen::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mode(&self) -> TermMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TermMode) {
        self.mode = mode;
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn line(&self) -> &LineEditor {
        &self.line
    }

    /// A read would complete now.
    pub fn input_ready(&self) -> bool {
        if self.mode.canonical {
            self.line.is_complete()
        } else {
            !self.line.contents().is_empty()
        }
    }

    /// Task output.
    pub fn write(&mut self, data: &[u8]) -> Vec<u8> {
        self.screen.write(data)
    }

    /// Take input for a read of at most `max` bytes; `None` means block.
    pub fn take_input(&mut self, max: usize) -> Option<Vec<u8>> {
        if self.mode.canonical {
            self.line.take_line(max)
        } else {
            self.line.take_raw(max)
        }
    }

    /// Apply one key press.
    pub fn key(&mut self, key: Key) -> KeyOutcome {
        let mut outcome = KeyOutcome::default();
        let echo = match key {
            Key::AltFunction(n) if (1..=12).contains(&n) => {
                outcome.switch_to = Some(n as usize - 1);
                Vec::new()
            }
            Key::Ctrl(b'c') => {
                outcome.interrupt = true;
                self.line.cancel();
                b"^C\n".to_vec()
            }
            Key::Ctrl(b'l') => {
                self.screen.clear();
                self.line.discard();
                Vec::new()
            }
            _ if !self.mode.canonical => self.raw_key(key),
            Key::Char(c) if (0x20..0x7F).contains(&c) => self.line.insert(c),
            Key::Enter | Key::Ctrl(b'm') | Key::Ctrl(b'j') => self.line.finish(),
            Key::Backspace | Key::Ctrl(b'h') => self.line.backspace(),
            Key::Left | Key::Ctrl(b'b') => self.line.left(),
            Key::Right | Key::Ctrl(b'f') => self.line.right(),
            Key::Ctrl(b'a') => self.line.home(),
            Key::Ctrl(b'e') => self.line.end(),
            Key::Ctrl(b'u') => self.line.kill_line(),
            Key::Ctrl(b'w') => self.line.delete_word(),
            Key::Alt(b'b') => self.line.word_left(),
            Key::Alt(b'f') => self.line.word_right(),
            _ => Vec::new(),
        };
        if self.mode.echo && !echo.is_empty() {
            outcome.echo = self.screen.write(&echo);
        }
        outcome
    }

    fn raw_key(&mut self, key: Key) -> Vec<u8> {
        let byte = match key {
            Key::Char(c) => c,
            Key::Enter => b'\n',
            Key::Backspace => BS,
            Key::Ctrl(c) => c & 0x1F,
            _ => return Vec::new(),
        };
        if self.line.push_raw(byte) && byte != BS {
            vec![byte]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_str(term: &mut Terminal, s: &str) {
        for b in s.bytes() {
            term.key(Key::Char(b));
        }
    }

    #[test]
    fn test_canonical_line() {
        let mut term = Terminal::new(0);
        type_str(&mut term, "ls");
        assert!(!term.input_ready());
        assert_eq!(term.take_input(128), None);
        term.key(Key::Enter);
        assert!(term.input_ready());
        assert_eq!(term.take_input(128), Some(b"ls\n".to_vec()));
        assert!(!term.input_ready());
        assert_eq!(term.screen().row_text(0), "ls");
    }

    #[test]
    fn test_line_capacity() {
        let mut term = Terminal::new(0);
        for _ in 0..200 {
            term.key(Key::Char(b'x'));
        }
        term.key(Key::Enter);
        let line = term.take_input(1024).unwrap();
        assert_eq!(line.len(), LINE_CAPACITY + 1);
        assert_eq!(*line.last().unwrap(), b'\n');
    }

    #[test]
    fn test_short_read_truncates() {
        let mut term = Terminal::new(0);
        type_str(&mut term, "hello");
        term.key(Key::Enter);
        assert_eq!(term.take_input(3), Some(b"hel".to_vec()));
        assert!(!term.input_ready());
    }

    #[test]
    fn test_editing_keys() {
        let mut term = Terminal::new(0);
        type_str(&mut term, "helo");
        term.key(Key::Left);
        term.key(Key::Char(b'l'));
        assert_eq!(term.line().contents(), b"hello");
        term.key(Key::Ctrl(b'a'));
        term.key(Key::Char(b'>'));
        assert_eq!(term.line().contents(), b">hello");
        term.key(Key::Ctrl(b'e'));
        term.key(Key::Backspace);
        assert_eq!(term.line().contents(), b">hell");
        term.key(Key::Ctrl(b'u'));
        assert_eq!(term.line().contents(), b"");
    }

    #[test]
    fn test_word_motion_and_delete() {
        let mut term = Terminal::new(0);
        type_str(&mut term, "cat frame0.txt");
        term.key(Key::Ctrl(b'w'));
        assert_eq!(term.line().contents(), b"cat frame0.");
        term.key(Key::Ctrl(b'w'));
        assert_eq!(term.line().contents(), b"cat frame0");
        term.key(Key::Ctrl(b'w'));
        assert_eq!(term.line().contents(), b"cat ");

        type_str(&mut term, "a.b");
        term.key(Key::Alt(b'b'));
        assert_eq!(term.line().cursor(), 6);
        term.key(Key::Alt(b'b'));
        assert_eq!(term.line().cursor(), 5);
        term.key(Key::Alt(b'b'));
        assert_eq!(term.line().cursor(), 4);
        term.key(Key::Alt(b'f'));
        assert_eq!(term.line().cursor(), 5);
        term.key(Key::Alt(b'f'));
        assert_eq!(term.line().cursor(), 6);
    }

    #[test]
    fn test_kill_line_keeps_text_after_cursor() {
        let mut term = Terminal::new(0);
        type_str(&mut term, "hello world");
        for _ in 0..5 {
            term.key(Key::Left);
        }
        term.key(Key::Ctrl(b'u'));
        assert_eq!(term.line().contents(), b"world");
        assert_eq!(term.line().cursor(), 0);
        assert_eq!(term.screen().row_text(0), "world");

        term.key(Key::Ctrl(b'e'));
        term.key(Key::Ctrl(b'u'));
        assert!(term.line().contents().is_empty());
    }

    #[test]
    fn test_ctrl_l_clears_screen_and_pending_line() {
        let mut term = Terminal::new(0);
        term.write(b"ember> ");
        type_str(&mut term, "half typed");
        term.key(Key::Ctrl(b'l'));
        assert!(term.line().contents().is_empty());
        assert_eq!(term.screen().cursor(), (0, 0));
        assert_eq!(term.screen().row_text(0), "");
    }

    #[test]
    fn test_ctrl_c_cancels_line() {
        let mut term = Terminal::new(0);
        type_str(&mut term, "counter");
        let outcome = term.key(Key::Ctrl(b'c'));
        assert!(outcome.interrupt);
        assert_eq!(term.take_input(128), Some(b"\n".to_vec()));
    }

    #[test]
    fn test_alt_function_switch() {
        let mut term = Terminal::new(0);
        assert_eq!(term.key(Key::AltFunction(2)).switch_to, Some(1));
        assert_eq!(term.key(Key::Function(2)).switch_to, None);
    }

    #[test]
    fn test_echo_off() {
        let mut term = Terminal::new(0);
        term.set_mode(TermMode {
            echo: false,
            canonical: true,
        });
        let outcome = term.key(Key::Char(b'x'));
        assert!(outcome.echo.is_empty());
        assert_eq!(term.screen().row_text(0), "");
    }

    #[test]
    fn test_raw_mode_delivers_bytes() {
        let mut term = Terminal::new(0);
        term.set_mode(TermMode {
            echo: false,
            canonical: false,
        });
        assert!(!term.input_ready());
        term.key(Key::Char(b'q'));
        term.key(Key::Char(b'w'));
        assert_eq!(term.take_input(1), Some(b"q".to_vec()));
        assert_eq!(term.take_input(8), Some(b"w".to_vec()));
        assert_eq!(term.take_input(8), None);
    }

    #[test]
    fn test_key_from_byte() {
        assert_eq!(Key::from_byte(b'\n'), Some(Key::Enter));
        assert_eq!(Key::from_byte(0x03), Some(Key::Ctrl(b'c')));
        assert_eq!(Key::from_byte(0x7F), Some(Key::Backspace));
        assert_eq!(Key::from_byte(b'a'), Some(Key::Char(b'a')));
        assert_eq!(Key::from_byte(0x1B), None);
    }

    #[test]
    fn test_screen_escape_commands() {
        let mut screen = Screen::default();
        let mirror = screen.write(b"\x1b[4fred\x1b[r ok");
        assert_eq!(mirror, b"red ok".to_vec());
        assert_eq!(screen.cells()[0] >> 8, 0x04);
        assert_eq!(screen.cells()[3] >> 8, DEFAULT_ATTR as u16);

        screen.write(b"\x1b[1b");
        assert_eq!(screen.attr(), 0x17);

        screen.write(b"\x1b[160pX");
        assert_eq!(screen.row_text(2), "X");

        screen.write(b"\x1b[s\x1b[0p\x1b[e\x1b[S");
        assert_eq!(screen.row_text(0), "");
        assert_eq!(screen.cursor(), (2, 1));

        screen.write(b"\x1b[c");
        assert_eq!(screen.cursor(), (0, 0));
        assert_eq!(screen.row_text(2), "");
    }

    #[test]
    fn test_screen_scrolls() {
        let mut screen = Screen::default();
        for i in 0..SCREEN_ROWS + 1 {
            screen.write(alloc::format!("line{}\n", i).as_bytes());
        }
        assert_eq!(screen.row_text(0), "line2");
        assert_eq!(screen.cursor(), (SCREEN_ROWS - 1, 0));
    }

    #[test]
    fn test_screen_wraps_long_lines() {
        let mut screen = Screen::default();
        screen.write(&[b'a'; SCREEN_COLS + 2]);
        assert_eq!(screen.row_text(1), "aa");
    }
}
