use super::*;
use crate::protocol::ResponseBody;
use tokio::sync::mpsc::unbounded_channel;

fn session(id: &str) -> (ClientSession, tokio::sync::mpsc::UnboundedReceiver<Response>) {
    let (tx, rx) = unbounded_channel();
    (ClientSession::new(id.to_string(), 1, tx), rx)
}

#[test]
fn test_insert_get_remove() {
    let mut table = SessionTable::new();
    let (s, _rx) = session("a");
    table.insert(s);
    assert!(table.get("a").is_some());
    assert!(table.remove("a").is_some());
    assert!(table.get("a").is_none());
}

#[test]
fn test_username_group_and_broadcast_order() {
    let mut table = SessionTable::new();
    let (s1, mut rx1) = session("1");
    let (s2, mut rx2) = session("2");
    let (s3, mut rx3) = session("3");
    table.insert(s1);
    table.insert(s2);
    table.insert(s3);
    table.set_username("1", "alice".to_string()).unwrap();
    table.set_username("2", "alice".to_string()).unwrap();
    table.set_username("3", "bob".to_string()).unwrap();

    let group: Vec<&str> = table.by_username("alice").map(|s| s.id.as_str()).collect();
    assert_eq!(group, vec!["1", "2"]);

    let resp = Response { client_id: "server".to_string(), body: ResponseBody::VisdataComputed };
    table.broadcast_to_group("alice", Some("1"), &resp);

    assert!(rx1.try_recv().is_err());
    assert_eq!(rx2.try_recv().unwrap().body, ResponseBody::VisdataComputed);
    assert!(rx3.try_recv().is_err());
}

#[test]
fn test_unknown_client_set_username_errors() {
    let mut table = SessionTable::new();
    assert!(matches!(table.set_username("missing", "x".to_string()), Err(SessionError::UnknownClient(_))));
}
