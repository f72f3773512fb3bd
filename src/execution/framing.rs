//! Reconstruction of framed units from the engine's byte stream.
//!
//! The engine interleaves plain program output with embedded JSON objects
//! and gives no delimiters beyond balanced braces — chunks can split a unit
//! at any byte. [`StreamReassembler`] accumulates chunks and extracts
//! complete units: a JSON object is recognized by the `{"type":"` token and
//! bounded by brace counting that treats quoted strings (with backslash
//! escapes) as opaque; anything else is split on newlines, each complete
//! line emitted with its terminating `\n` intact and the trailing partial
//! segment retained for the next read.
//!
//! The JSON probe runs before newline splitting. That order is part of the
//! wire contract with the engine; it also means plain text that happens to
//! contain the token would be misread as the start of an object, so the
//! engine must never echo it (see DESIGN.md).

const JSON_START_TOKEN: &str = "{\"type\":\"";

#[derive(Debug, Default)]
pub struct StreamReassembler {
    buffer: String,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read chunk; returns every unit completed by it, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut units = Vec::new();
        loop {
            if let Some(start) = self.buffer.find(JSON_START_TOKEN) {
                match find_json_end(&self.buffer, start) {
                    Some(end) => {
                        units.push(self.buffer[start..=end].to_string());
                        // Text around the object stays buffered.
                        self.buffer.replace_range(start..=end, "");
                        continue;
                    }
                    // Object not complete yet; wait for more bytes.
                    None => break,
                }
            }

            if let Some(last) = self.buffer.rfind('\n') {
                let complete: String = self.buffer.drain(..=last).collect();
                units.extend(complete.split_inclusive('\n').map(str::to_string));
            }
            break;
        }
        units
    }

    /// Stream ended: hand back any non-empty remainder as a final unit.
    pub fn finish(self) -> Option<String> {
        (!self.buffer.is_empty()).then_some(self.buffer)
    }
}

/// Index of the `}` closing the object that opens at `start`, or `None` if
/// the object is still incomplete. Characters inside quoted strings are
/// opaque; a backslash escapes the following character.
fn find_json_end(content: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in content[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}
