// Option table transfers and header normalisation

use proptest::prelude::*;
use transflow::engine::{OptionScope, OptionTable, normalize_headers};

#[test]
fn test_each_entry_transfers_once() {
    let mut table = OptionTable::parse("-loglevel quiet -probesize 1M -vf yadif -an");
    let mut args = Vec::new();
    table.transfer_globals(&mut args);
    table.transfer_globals(&mut args);
    table.transfer_input_options(&mut args);
    table.transfer_all(&mut args);
    table.transfer_all(&mut args);
    assert_eq!(
        args,
        vec!["-loglevel", "quiet", "-probesize", "1M", "-vf", "yadif", "-an"]
    );
    assert!(table.is_empty());
}

#[test]
fn test_named_transfer_leaves_the_rest() {
    let mut table = OptionTable::parse("-vf yadif -sn -an");
    let mut args = Vec::new();
    table.transfer_named(&["-an", "-sn"], &mut args);
    assert_eq!(args, vec!["-sn", "-an"]);
    assert_eq!(table.len(), 1);
    assert!(table.contains("-vf"));
}

#[test]
fn test_scope_transfer_by_kind() {
    let mut table = OptionTable::parse("-re -c:v copy");
    let mut args = Vec::new();
    table.transfer_scope(OptionScope::Output, &mut args);
    assert_eq!(args, vec!["-c:v", "copy"]);
}

#[test]
fn test_headers_split_on_known_fields() {
    assert_eq!(
        normalize_headers("User-Agent: VLC/3.0 Cookie: id=42   Range: bytes=0-"),
        "User-Agent: VLC/3.0\r\nCookie: id=42\r\nRange: bytes=0-\r\n"
    );
    assert_eq!(normalize_headers(""), "\r\n");
}

fn arb_header_blob() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("User-Agent: ".to_string()),
            Just("Cookie: a=1".to_string()),
            Just("Referer: http://x/".to_string()),
            Just("Content-Type:".to_string()),
            "[a-zA-Z0-9 =;:/.\\-\t\r\n]{0,12}",
        ],
        0..8,
    )
    .prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn header_normalisation_is_idempotent(raw in arb_header_blob()) {
        let once = normalize_headers(&raw);
        let twice = normalize_headers(&once);
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.ends_with("\r\n"));
    }

    #[test]
    fn headers_inserted_twice_keep_one_entry(raw in arb_header_blob()) {
        let mut table = OptionTable::new();
        table.insert("-headers", Some(&raw));
        let first = table.get("-headers").map(str::to_string);
        table.insert("-headers", first.as_deref());
        prop_assert_eq!(table.len(), 1);
        prop_assert_eq!(table.get("-headers").map(str::to_string), first);
    }
}
