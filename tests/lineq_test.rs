/*!
 * Line Queue Tests
 * Tests for terminator-aware reassembly of byte chunks into lines
 */

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use runloop::LineQueue;

#[test]
fn test_single_complete_line() {
    let mut lineq = LineQueue::new();
    lineq.feed(b"hello\r\n");

    assert_eq!(lineq.read_line(), Some("hello\r\n".to_string()));
    assert_eq!(lineq.read_line(), None);
}

#[test]
fn test_fragment_held_until_terminated() {
    let mut lineq = LineQueue::new();
    lineq.feed(b"partial");

    assert_eq!(lineq.read_line(), None);
    assert_eq!(lineq.fragment(), "partial");

    lineq.feed(b" line\r\nnext");
    assert_eq!(lineq.read_line(), Some("partial line\r\n".to_string()));
    assert_eq!(lineq.fragment(), "next");
}

#[test]
fn test_terminator_split_across_chunks() {
    let mut lineq = LineQueue::new();
    lineq.feed(b"split\r");
    assert_eq!(lineq.read_line(), None);

    lineq.feed(b"\nrest\r\n");
    assert_eq!(lineq.read_line(), Some("split\r\n".to_string()));
    assert_eq!(lineq.read_line(), Some("rest\r\n".to_string()));
}

#[test]
fn test_many_lines_in_one_chunk() {
    let mut lineq = LineQueue::new();
    lineq.feed(b"a\r\nb\r\nc\r\ntail");

    let lines = lineq.read_lines();
    assert_eq!(lines, vec!["a\r\n", "b\r\n", "c\r\n"]);
    assert_eq!(lineq.fragment(), "tail");
}

#[test]
fn test_empty_lines_survive() {
    let mut lineq = LineQueue::new();
    lineq.feed(b"\r\n\r\nx\r\n");

    assert_eq!(lineq.read_lines(), vec!["\r\n", "\r\n", "x\r\n"]);
}

#[test]
fn test_custom_terminator() {
    let mut lineq = LineQueue::with_terminator("\n").unwrap();
    lineq.feed(b"one\ntwo\n");

    assert_eq!(lineq.read_lines(), vec!["one\n", "two\n"]);
}

#[test]
fn test_empty_terminator_rejected() {
    assert!(LineQueue::with_terminator("").is_err());
}

#[test]
fn test_invalid_utf8_is_replaced_not_dropped() {
    let mut lineq = LineQueue::new();
    lineq.feed(b"ok \xff\xfe bytes\r\n");

    let line = lineq.read_line().unwrap();
    assert!(line.starts_with("ok "));
    assert!(line.ends_with(" bytes\r\n"));
    assert!(line.contains('\u{FFFD}'));
}

proptest! {
    // Feeding a stream in arbitrary chunk sizes must yield the same
    // lines as feeding it whole, and draining everything must
    // reproduce the fed input byte for byte.
    #[test]
    fn test_chunking_never_changes_lines(
        lines in prop::collection::vec("[a-zA-Z0-9 ]{0,20}", 1..8),
        tail in "[a-zA-Z0-9 ]{0,10}",
        cuts in prop::collection::vec(1usize..16, 0..8),
    ) {
        let mut stream: String = lines.iter().map(|l| format!("{l}\r\n")).collect();
        stream.push_str(&tail);
        let bytes = stream.as_bytes();

        let mut whole = LineQueue::new();
        whole.feed(bytes);

        let mut chunked = LineQueue::new();
        let mut rest = bytes;
        for cut in cuts {
            if rest.is_empty() {
                break;
            }
            let cut = cut.min(rest.len());
            chunked.feed(&rest[..cut]);
            rest = &rest[cut..];
        }
        chunked.feed(rest);

        let whole_lines = whole.read_lines();
        let chunked_lines = chunked.read_lines();
        prop_assert_eq!(&whole_lines, &chunked_lines);
        prop_assert_eq!(whole.fragment(), chunked.fragment());

        // nothing lost, nothing duplicated
        let rebuilt = format!("{}{}", chunked_lines.concat(), chunked.fragment());
        prop_assert_eq!(rebuilt, stream);

        for line in &chunked_lines {
            prop_assert!(line.ends_with("\r\n"));
        }
    }
}
