//! PTY line-editing emulation. A small, deterministic state machine over
//! input bytes — not a real terminal library.

/// What happened as a result of feeding one byte to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEditorEvent {
    /// Nothing externally observable yet; `echo` (if any) should be
    /// written to the client.
    Echo(Vec<u8>),
    /// A complete line was submitted; `echo` is what to write before
    /// delivering `line` to the reader.
    Line { echo: Vec<u8>, line: String },
    /// End-of-file was signalled (`\x04` on an empty line).
    Eof { echo: Vec<u8> },
}

/// Cooked-terminal line editor: translates `\r` to a submitted line,
/// handles backspace (`\x7f`) and EOT (`\x04`), and echoes as it goes.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: String,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one input byte and reports what happened.
    pub fn feed(&mut self, byte: u8) -> LineEditorEvent {
        match byte {
            b'\r' => {
                let line = std::mem::take(&mut self.buffer);
                LineEditorEvent::Line {
                    echo: b"\r\n".to_vec(),
                    line,
                }
            }
            0x7f => {
                if self.buffer.pop().is_some() {
                    LineEditorEvent::Echo(b"\x08 \x08".to_vec())
                } else {
                    LineEditorEvent::Echo(Vec::new())
                }
            }
            0x04 => {
                if self.buffer.is_empty() {
                    LineEditorEvent::Eof {
                        echo: b"\r\n".to_vec(),
                    }
                } else {
                    let line = std::mem::take(&mut self.buffer);
                    LineEditorEvent::Line {
                        echo: b"\r\n".to_vec(),
                        line,
                    }
                }
            }
            printable => {
                self.buffer.push(printable as char);
                LineEditorEvent::Echo(vec![printable])
            }
        }
    }
}

/// Raw-mode line framing: scans the incoming byte stream for `\n`, with no
/// `\r` translation.
#[derive(Debug, Default)]
pub struct RawLineScanner {
    buffer: Vec<u8>,
}

impl RawLineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes, returning any complete (newline-terminated)
    /// lines found so far. Bytes after the last `\n` remain buffered.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
            lines.push(line);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_bytes_echo_and_buffer() {
        let mut editor = LineEditor::new();
        assert_eq!(editor.feed(b'h'), LineEditorEvent::Echo(vec![b'h']));
        assert_eq!(editor.buffer, "h");
    }

    #[test]
    fn cr_submits_line_and_echoes_crlf() {
        let mut editor = LineEditor::new();
        editor.feed(b't');
        editor.feed(b'r');
        editor.feed(b'u');
        editor.feed(b'e');
        let event = editor.feed(b'\r');
        assert_eq!(
            event,
            LineEditorEvent::Line {
                echo: b"\r\n".to_vec(),
                line: "true".to_string(),
            }
        );
    }

    #[test]
    fn del_erases_previous_char() {
        let mut editor = LineEditor::new();
        editor.feed(b'a');
        editor.feed(b'b');
        let event = editor.feed(0x7f);
        assert_eq!(event, LineEditorEvent::Echo(b"\x08 \x08".to_vec()));
        assert_eq!(editor.buffer, "a");
    }

    #[test]
    fn eot_on_empty_line_signals_eof() {
        let mut editor = LineEditor::new();
        let event = editor.feed(0x04);
        assert_eq!(
            event,
            LineEditorEvent::Eof {
                echo: b"\r\n".to_vec(),
            }
        );
    }

    #[test]
    fn eot_on_nonempty_line_submits_it() {
        let mut editor = LineEditor::new();
        editor.feed(b'x');
        let event = editor.feed(0x04);
        assert_eq!(
            event,
            LineEditorEvent::Line {
                echo: b"\r\n".to_vec(),
                line: "x".to_string(),
            }
        );
    }

    #[test]
    fn cr_and_eot_split_a_run_of_commands_then_echo_crlf_on_eof() {
        // false\rtrue\r\x04 -> two submitted lines, then EOF with a bare
        // \r\n echo (the terminal still moves to a fresh line on Ctrl-D).
        let mut editor = LineEditor::new();
        let mut submitted = Vec::new();
        let mut last = None;
        for byte in b"false\rtrue\r\x04" {
            last = Some(editor.feed(*byte));
            if let LineEditorEvent::Line { line, .. } = last.clone().unwrap() {
                submitted.push(line);
            }
        }
        assert_eq!(submitted, vec!["false", "true"]);
        assert_eq!(
            last,
            Some(LineEditorEvent::Eof {
                echo: b"\r\n".to_vec(),
            })
        );
    }

    #[test]
    fn raw_scanner_does_not_translate_cr() {
        let mut scanner = RawLineScanner::new();
        let lines = scanner.feed(b"false\ntrue\n");
        assert_eq!(lines, vec!["false".to_string(), "true".to_string()]);
    }
}
