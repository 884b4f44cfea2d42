//! The log-based pipeline below the socket: WAL messages through `consume`
//! and bookmark arithmetic, the way a replication run drives them.

use pretty_assertions::assert_eq;
use serde_json::json;
use tap_postgres::{consume, WalMessage, LSN_KEY};

fn wal(lsn: u64, payload: &str) -> WalMessage {
    WalMessage {
        data_start: lsn,
        payload: payload.to_string(),
    }
}

#[test]
fn insert_then_delete_run() {
    // The server delivers an insert at LSN 10 and a delete at LSN 20;
    // boundaries around them are suppressed and the unsorted bookmark ends
    // at the maximum observed LSN.
    let messages = vec![
        wal(9, r#"{"action":"B"}"#),
        wal(
            10,
            r#"{"action":"I","columns":[{"name":"id","value":1},{"name":"v","value":"a"}]}"#,
        ),
        wal(20, r#"{"action":"D","identity":[{"name":"id","value":1}]}"#),
        wal(21, r#"{"action":"C"}"#),
    ];

    let mut state = singer::State::default();
    let mut emitted = Vec::new();
    for message in &messages {
        if let Some(row) = consume(message).unwrap() {
            state
                .advance("s-t", Some(LSN_KEY), &row, false)
                .unwrap();
            emitted.push(row);
        }
    }

    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0]["id"], json!(1));
    assert_eq!(emitted[0]["v"], json!("a"));
    assert_eq!(emitted[0]["_sdc_deleted_at"], json!(null));
    assert_eq!(emitted[0]["_sdc_lsn"], json!(10));

    assert_eq!(emitted[1]["id"], json!(1));
    assert!(emitted[1]["_sdc_deleted_at"].is_string());
    assert_eq!(emitted[1]["_sdc_lsn"], json!(20));
    assert!(emitted[1].get("v").is_none());

    assert_eq!(state.bookmark_value("s-t"), Some(&json!(20)));
}

#[test]
fn redelivered_bookmark_record_is_idempotent() {
    // On resume the server may redeliver the record at the bookmark LSN;
    // re-consuming it must not regress the bookmark.
    let mut state = singer::State::default();
    let replay = wal(
        20,
        r#"{"action":"I","columns":[{"name":"id","value":1},{"name":"v","value":"a"}]}"#,
    );
    for _ in 0..2 {
        let row = consume(&replay).unwrap().unwrap();
        state.advance("s-t", Some(LSN_KEY), &row, false).unwrap();
    }
    assert_eq!(state.bookmark_value("s-t"), Some(&json!(20)));
}

#[test]
fn out_of_order_lsns_keep_the_maximum() {
    // Intra-transaction reordering by the decoder means LSNs are not
    // monotone; the advancer must not trust arrival order.
    let mut state = singer::State::default();
    for lsn in [30u64, 45, 38] {
        let row = consume(&wal(
            lsn,
            r#"{"action":"U","columns":[{"name":"id","value":1}]}"#,
        ))
        .unwrap()
        .unwrap();
        state.advance("s-t", Some(LSN_KEY), &row, false).unwrap();
    }
    assert_eq!(state.bookmark_value("s-t"), Some(&json!(45)));
}
