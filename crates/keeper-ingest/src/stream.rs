//! C1 — bounded-memory JSON array streamer.
//!
//! Scans a byte stream known to encode a UTF-8 JSON array of objects and
//! yields each top-level object without ever buffering more than the
//! current partial object plus one read chunk. A full parse is infeasible
//! on multi-GB exports; only top-level `[`/`{`/`}`/`]` boundaries matter,
//! so a hand-rolled scanner beats a general streaming JSON parser here.

use std::io::Read;

use keeper_core::CompanionError;

/// Bytes read from the underlying reader per fill — bounds how far a
/// single `read()` call can push the buffer past the last token boundary.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    PreArray,
    BetweenElements,
    InObject,
    Done,
}

/// Iterates the top-level objects of a JSON array one at a time.
pub struct JsonArrayStreamer<R: Read> {
    reader: R,
    buf: Vec<u8>,
    /// Scan position within `buf`.
    cursor: usize,
    /// Valid-data boundary within `buf`.
    filled: usize,
    state: State,
    /// Start of the in-progress top-level element within `buf`, if any.
    token_start: Option<usize>,
    depth: u32,
    in_string: bool,
    escaped: bool,
    eof: bool,
}

impl<R: Read> JsonArrayStreamer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(CHUNK_SIZE),
            cursor: 0,
            filled: 0,
            state: State::PreArray,
            token_start: None,
            depth: 0,
            in_string: false,
            escaped: false,
            eof: false,
        }
    }

    /// Pull more bytes from the reader, compacting the buffer first so we
    /// never retain more than the current in-progress element plus one chunk.
    fn fill(&mut self) -> Result<usize, CompanionError> {
        let keep_from = self.token_start.unwrap_or(self.cursor);
        if keep_from > 0 {
            self.buf.drain(0..keep_from);
            self.cursor -= keep_from;
            self.filled -= keep_from;
            if let Some(ts) = self.token_start.as_mut() {
                *ts -= keep_from;
            }
        }

        let start = self.buf.len();
        self.buf.resize(start + CHUNK_SIZE, 0);
        let n = self.reader.read(&mut self.buf[start..])?;
        self.buf.truncate(start + n);
        self.filled = self.buf.len();
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Ensure at least one more byte is available at `cursor`, or report EOF.
    fn ensure_byte(&mut self) -> Result<bool, CompanionError> {
        while self.cursor >= self.filled {
            if self.eof {
                return Ok(false);
            }
            self.fill()?;
        }
        Ok(true)
    }

    fn next_object(&mut self) -> Option<Result<serde_json::Value, CompanionError>> {
        loop {
            match self.state {
                State::Done => return None,
                State::PreArray => match self.ensure_byte() {
                    Ok(false) => {
                        return Some(Err(CompanionError::MalformedInput(
                            "input ended before array start".into(),
                        )))
                    }
                    Err(e) => return Some(Err(e)),
                    Ok(true) => {
                        let b = self.buf[self.cursor];
                        if b.is_ascii_whitespace() {
                            self.cursor += 1;
                        } else if b == b'[' {
                            self.cursor += 1;
                            self.state = State::BetweenElements;
                        } else {
                            return Some(Err(CompanionError::MalformedInput(format!(
                                "expected '[' at stream start, found byte {:#04x}",
                                b
                            ))));
                        }
                    }
                },
                State::BetweenElements => match self.ensure_byte() {
                    Ok(false) => {
                        return Some(Err(CompanionError::MalformedInput(
                            "input ended without closing ']'".into(),
                        )))
                    }
                    Err(e) => return Some(Err(e)),
                    Ok(true) => {
                        let b = self.buf[self.cursor];
                        if b.is_ascii_whitespace() || b == b',' {
                            self.cursor += 1;
                        } else if b == b']' {
                            self.cursor += 1;
                            self.state = State::Done;
                        } else if b == b'{' {
                            self.token_start = Some(self.cursor);
                            self.depth = 1;
                            self.in_string = false;
                            self.escaped = false;
                            self.cursor += 1;
                            self.state = State::InObject;
                        } else {
                            return Some(Err(CompanionError::MalformedInput(format!(
                                "non-object top-level element starting with byte {:#04x}",
                                b
                            ))));
                        }
                    }
                },
                State::InObject => match self.ensure_byte() {
                    Ok(false) => {
                        return Some(Err(CompanionError::MalformedInput(
                            "unterminated object at end of stream".into(),
                        )))
                    }
                    Err(e) => return Some(Err(e)),
                    Ok(true) => {
                        let b = self.buf[self.cursor];
                        if self.in_string {
                            if self.escaped {
                                self.escaped = false;
                            } else if b == b'\\' {
                                self.escaped = true;
                            } else if b == b'"' {
                                self.in_string = false;
                            }
                        } else if b == b'"' {
                            self.in_string = true;
                        } else if b == b'{' {
                            self.depth += 1;
                        } else if b == b'}' {
                            self.depth -= 1;
                        }
                        self.cursor += 1;

                        if !self.in_string && self.depth == 0 {
                            let start = self.token_start.take().unwrap();
                            let slice = &self.buf[start..self.cursor];
                            let result = serde_json::from_slice::<serde_json::Value>(slice)
                                .map_err(|e| {
                                    CompanionError::MalformedInput(format!(
                                        "failed to parse top-level object: {e}"
                                    ))
                                });
                            self.state = State::BetweenElements;
                            return Some(result);
                        }
                    }
                },
            }
        }
    }
}

impl<R: Read> Iterator for JsonArrayStreamer<R> {
    type Item = Result<serde_json::Value, CompanionError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(json: &str) -> Result<Vec<serde_json::Value>, CompanionError> {
        JsonArrayStreamer::new(Cursor::new(json.as_bytes().to_vec())).collect()
    }

    #[test]
    fn yields_all_objects_in_order() {
        let out = collect(r#"[{"a":1},{"b":2},{"c":[1,2,3]}]"#).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["a"], 1);
        assert_eq!(out[2]["c"][1], 2);
    }

    #[test]
    fn handles_whitespace_and_nested_braces_and_strings() {
        let json = r#"
        [
            { "text": "has a } brace and a [ bracket", "nested": {"x": {"y": 1}} },
            {"escaped": "quote \" inside"}
        ]"#;
        let out = collect(json).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["nested"]["x"]["y"], 1);
        assert_eq!(out[1]["escaped"], "quote \" inside");
    }

    #[test]
    fn empty_array_yields_nothing() {
        let out = collect("[]").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn rejects_non_array_top_level() {
        let err = collect(r#"{"a":1}"#).unwrap_err();
        assert!(matches!(err, CompanionError::MalformedInput(_)));
    }

    #[test]
    fn rejects_non_object_array_element() {
        let err = collect(r#"[1, 2, 3]"#).unwrap_err();
        assert!(matches!(err, CompanionError::MalformedInput(_)));
    }

    #[test]
    fn rejects_unterminated_object() {
        let err = collect(r#"[{"a": 1"#).unwrap_err();
        assert!(matches!(err, CompanionError::MalformedInput(_)));
    }

    #[test]
    fn large_array_yields_exact_count_independent_of_chunking() {
        let mut s = String::from("[");
        for i in 0..12_000 {
            if i > 0 {
                s.push(',');
            }
            s.push_str(&format!(r#"{{"i":{i},"pad":"{}"}}"#, "x".repeat(50)));
        }
        s.push(']');
        let out = collect(&s).unwrap();
        assert_eq!(out.len(), 12_000);
        assert_eq!(out[11_999]["i"], 11_999);
    }

    #[test]
    fn buffer_stays_bounded_relative_to_largest_object() {
        // One huge object among many small ones: the streamer must not
        // retain the whole stream, only roughly one chunk + the largest
        // single in-progress object at any time.
        let mut s = String::from("[");
        s.push_str(r#"{"small":1},"#);
        s.push_str(&format!(r#"{{"big":"{}"}}"#, "y".repeat(500_000)));
        s.push_str(r#",{"small":2}"#);
        s.push(']');
        let mut streamer = JsonArrayStreamer::new(Cursor::new(s.into_bytes()));
        let first = streamer.next().unwrap().unwrap();
        assert_eq!(first["small"], 1);
        let second = streamer.next().unwrap().unwrap();
        assert_eq!(second["big"].as_str().unwrap().len(), 500_000);
        // after consuming the big object, the buffer must have been
        // compacted well below the object's own size plus a few chunks.
        assert!(streamer.buf.len() < 500_000 / 4);
        let third = streamer.next().unwrap().unwrap();
        assert_eq!(third["small"], 2);
        assert!(streamer.next().is_none());
    }
}
