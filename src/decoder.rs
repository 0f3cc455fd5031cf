//! Incremental decoding of chunked byte streams.
//!
//! [`Utf8Decoder`] turns arbitrarily split bytes into text, holding back an
//! incomplete trailing character until the rest of it arrives.
//! [`NdjsonDecoder`] builds on it to reassemble newline-delimited
//! [`StreamRecord`]s.

use tracing::warn;

use crate::protocol::StreamRecord;

/// Stateful UTF-8 decoder. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete character at the end of the chunk.
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Flushes a dangling partial character at end of input.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

/// Reassembles NDJSON records from raw chunks.
///
/// After every [`push`](Self::push) the line buffer holds exactly the text
/// after the last newline seen so far. Lines that fail to parse are logged
/// and dropped; they never abort the stream.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    utf8: Utf8Decoder,
    buffer: String,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
        let text = self.utf8.decode(chunk);
        self.buffer.push_str(&text);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let complete: String = self.buffer.drain(..=last_newline).collect();
        complete.split('\n').filter_map(parse_line).collect()
    }

    /// Best-effort parse of whatever remains once the stream has ended.
    pub fn finish(&mut self) -> Option<StreamRecord> {
        let tail = self.utf8.finish();
        self.buffer.push_str(&tail);
        let residue = std::mem::take(&mut self.buffer);
        parse_line(&residue)
    }

    /// The not yet newline-terminated tail.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

fn parse_line(line: &str) -> Option<StreamRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamRecord>(line) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(error = %err, line, "NDJSON parse error");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "{\"token\":\"Grüße \"}\n{\"token\":\"日本\"}\n{\"token\":\"🦀\\n\"}\n{\"done\":true}\n";

    fn decode_in_chunks(bytes: &[u8], sizes: &[usize]) -> Vec<StreamRecord> {
        let mut decoder = NdjsonDecoder::new();
        let mut records = Vec::new();
        let mut offset = 0;
        let mut sizes = sizes.iter().cycle();
        while offset < bytes.len() {
            let size = (*sizes.next().unwrap()).max(1);
            let end = (offset + size).min(bytes.len());
            records.extend(decoder.push(&bytes[offset..end]));
            offset = end;
        }
        records.extend(decoder.finish());
        records
    }

    #[test]
    fn utf8_character_split_across_chunks() {
        let bytes = "é🦀".as_bytes();
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..3]), "é");
        assert_eq!(decoder.decode(&bytes[3..5]), "");
        assert_eq!(decoder.decode(&bytes[5..]), "🦀");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn utf8_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xe6\x97"), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn whole_stream_in_one_chunk() {
        let records = decode_in_chunks(STREAM.as_bytes(), &[STREAM.len()]);
        assert_eq!(
            records,
            vec![
                StreamRecord::Token("Grüße ".to_string()),
                StreamRecord::Token("日本".to_string()),
                StreamRecord::Token("🦀\n".to_string()),
                StreamRecord::Done,
            ]
        );
    }

    #[test]
    fn any_split_point_yields_the_same_records() {
        let bytes = STREAM.as_bytes();
        let expected = decode_in_chunks(bytes, &[bytes.len()]);
        for split in 1..bytes.len() {
            let mut decoder = NdjsonDecoder::new();
            let mut records = decoder.push(&bytes[..split]);
            records.extend(decoder.push(&bytes[split..]));
            records.extend(decoder.finish());
            assert_eq!(records, expected, "split at byte {}", split);
        }
    }

    #[test]
    fn irregular_chunk_sizes_yield_the_same_records() {
        let bytes = STREAM.as_bytes();
        let expected = decode_in_chunks(bytes, &[bytes.len()]);
        for sizes in [&[1][..], &[2, 3], &[7, 1, 5], &[13, 2]] {
            assert_eq!(decode_in_chunks(bytes, sizes), expected, "sizes {:?}", sizes);
        }
    }

    #[test]
    fn buffer_holds_suffix_after_last_newline() {
        let mut decoder = NdjsonDecoder::new();
        let records = decoder.push(b"{\"token\":\"a\"}\n{\"tok");
        assert_eq!(records, vec![StreamRecord::Token("a".to_string())]);
        assert_eq!(decoder.pending(), "{\"tok");

        assert!(decoder.push(b"en\":\"b\"}").is_empty());
        assert_eq!(decoder.pending(), "{\"token\":\"b\"}");

        let records = decoder.push(b"\n");
        assert_eq!(records, vec![StreamRecord::Token("b".to_string())]);
        assert_eq!(decoder.pending(), "");
    }

    #[test]
    fn malformed_and_blank_lines_are_skipped() {
        let mut decoder = NdjsonDecoder::new();
        let records = decoder.push(b"\n   \n{not json}\n{\"token\":\"ok\"}\r\n{\"unknown\":1}\n");
        assert_eq!(records, vec![StreamRecord::Token("ok".to_string())]);
    }

    #[test]
    fn residue_without_newline_is_parsed_at_end() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(b"{\"token\":\"tail\"}").is_empty());
        assert_eq!(decoder.finish(), Some(StreamRecord::Token("tail".to_string())));

        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(b"{\"token\":\"cut").is_empty());
        assert_eq!(decoder.finish(), None);
    }
}
