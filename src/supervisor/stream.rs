// Stream Capture
//
// Reads a child's stdout/stderr as lines on a dedicated thread. Bytes are
// decoded lossily and never interpreted. `\r` ends a line too, so progress
// output that redraws in place still arrives line by line.

use std::io::{BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};
use tracing::debug;

const MAX_LINE_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Line(String),
    Closed,
}

/// Spawn a reader thread; `on_event` gets every line, then exactly one `Closed`
pub fn spawn_line_reader<R, F>(
    label: &str,
    kind: StreamKind,
    reader: R,
    mut on_event: F,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    F: FnMut(StreamEvent) + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-{}", label, kind.as_str()))
        .spawn(move || {
            read_lines(reader, &mut on_event);
            debug!(stream = kind.as_str(), "stream closed");
            on_event(StreamEvent::Closed);
        })
}

fn emit<F: FnMut(StreamEvent)>(line: &mut Vec<u8>, on_event: &mut F) {
    on_event(StreamEvent::Line(String::from_utf8_lossy(line).into_owned()));
    line.clear();
}

/// Never buffers more than `MAX_LINE_BYTES`; the rest of an overlong line is
/// dropped up to the next separator.
fn read_lines<R: Read, F: FnMut(StreamEvent)>(reader: R, on_event: &mut F) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(256);
    let mut discarding = false;
    let mut after_cr = false;
    loop {
        let chunk = match reader.fill_buf() {
            Ok(chunk) => chunk,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        if chunk.is_empty() {
            break;
        }
        let consumed = chunk.len();
        for &byte in chunk {
            match byte {
                b'\n' | b'\r' => {
                    // \r\n is one separator
                    let crlf = byte == b'\n' && after_cr;
                    after_cr = byte == b'\r';
                    if discarding {
                        discarding = false;
                    } else if !(crlf && line.is_empty()) {
                        emit(&mut line, on_event);
                    }
                }
                _ => {
                    after_cr = false;
                    if discarding {
                        continue;
                    }
                    line.push(byte);
                    if line.len() >= MAX_LINE_BYTES {
                        emit(&mut line, on_event);
                        discarding = true;
                    }
                }
            }
        }
        reader.consume(consumed);
    }
    if !line.is_empty() {
        emit(&mut line, on_event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    #[test]
    fn test_lines_then_closed() {
        let input = b"first\r\nsecond\n\xffbad utf8\nno newline".to_vec();
        let (tx, rx) = mpsc::channel();
        let handle = spawn_line_reader("test", StreamKind::Stdout, Cursor::new(input), move |e| {
            let _ = tx.send(e);
        })
        .unwrap();
        handle.join().unwrap();

        let events: Vec<StreamEvent> = rx.iter().collect();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], StreamEvent::Line("first".into()));
        assert_eq!(events[1], StreamEvent::Line("second".into()));
        assert!(matches!(&events[2], StreamEvent::Line(l) if l.ends_with("bad utf8")));
        assert_eq!(events[3], StreamEvent::Line("no newline".into()));
        assert_eq!(events[4], StreamEvent::Closed);
    }

    fn collect(input: Vec<u8>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        read_lines(Cursor::new(input), &mut |e| events.push(e));
        events
    }

    #[test]
    fn test_overlong_line_is_capped() {
        let mut input = vec![b'a'; 1024 * 1024];
        input.extend_from_slice(b"\nafter\n");
        let events = collect(input);
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::Line(line) => {
                assert_eq!(line.len(), MAX_LINE_BYTES);
                assert!(line.bytes().all(|b| b == b'a'));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events[1], StreamEvent::Line("after".into()));

        // no separator at all
        let events = collect(vec![b'x'; 3 * MAX_LINE_BYTES + 5]);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Line(l) if l.len() == MAX_LINE_BYTES));
    }

    #[test]
    fn test_carriage_return_splits_lines() {
        let events = collect(b"speed 100 H/s\rspeed 200 H/s\rspeed 300 H/s".to_vec());
        assert_eq!(
            events,
            vec![
                StreamEvent::Line("speed 100 H/s".into()),
                StreamEvent::Line("speed 200 H/s".into()),
                StreamEvent::Line("speed 300 H/s".into()),
            ]
        );

        // blank lines survive, \r\n does not double up
        let events = collect(b"a\r\n\nb\r\rc\n".to_vec());
        assert_eq!(
            events,
            vec![
                StreamEvent::Line("a".into()),
                StreamEvent::Line("".into()),
                StreamEvent::Line("b".into()),
                StreamEvent::Line("".into()),
                StreamEvent::Line("c".into()),
            ]
        );
    }

    #[test]
    fn test_shell_metacharacters_are_plain_text() {
        let input = b"$(rm -rf /) `id`; echo pwned\n".to_vec();
        let (tx, rx) = mpsc::channel();
        spawn_line_reader("test", StreamKind::Stderr, Cursor::new(input), move |e| {
            let _ = tx.send(e);
        })
        .unwrap()
        .join()
        .unwrap();
        assert_eq!(
            rx.recv().unwrap(),
            StreamEvent::Line("$(rm -rf /) `id`; echo pwned".into())
        );
    }
}
