use dfsmon::store::{Command, CommandQueue};
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_enqueue_then_dequeue_exactly_once() {
    let temp_dir = TempDir::new().unwrap();
    let queue = CommandQueue::new(temp_dir.path().join("commands"));

    let command = Command::collect_now("ops", Some("after maintenance".to_string()));
    queue.enqueue(&command).await.unwrap();

    let first = queue.dequeue_all().await.unwrap();
    assert_eq!(first, vec![command]);

    let second = queue.dequeue_all().await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_commands_come_back_in_request_order() {
    let temp_dir = TempDir::new().unwrap();
    let queue = CommandQueue::new(temp_dir.path());

    let mut ids = Vec::new();
    for who in ["alice", "bob", "carol"] {
        let command = Command::collect_now(who, None);
        ids.push(command.id);
        queue.enqueue(&command).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    assert_eq!(queue.pending().await.unwrap(), 3);

    let drained: Vec<_> = queue
        .dequeue_all()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(drained, ids);
}

#[tokio::test]
async fn test_malformed_command_is_skipped_and_removed() {
    let temp_dir = TempDir::new().unwrap();
    let queue = CommandQueue::new(temp_dir.path());

    let bad = temp_dir.path().join("collect-now-00000000000000000000000-bad.json");
    fs::write(&bad, b"{ not json").unwrap();
    let good = Command::collect_now("ops", None);
    queue.enqueue(&good).await.unwrap();

    let drained = queue.dequeue_all().await.unwrap();
    assert_eq!(drained, vec![good]);
    assert!(!bad.exists());
}
