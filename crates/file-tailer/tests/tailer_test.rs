//! End-to-end tests driving a `FileTailer` through its search and scroll feeds.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use proven_file_tailer::{
    Error, FileTailer, LineCounts, LineDelta, MemoryFile, ScrollRequest, TailerConfig,
    TailerState,
};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing_test::traced_test;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    file: Arc<MemoryFile>,
    search: watch::Sender<String>,
    scroll: watch::Sender<ScrollRequest>,
    tailer: FileTailer,
}

impl Harness {
    fn start(search: &str, scroll: ScrollRequest) -> Self {
        Self::start_with(search, scroll, fast_config())
    }

    fn start_with(search: &str, scroll: ScrollRequest, config: TailerConfig) -> Self {
        let file = Arc::new(MemoryFile::new());
        let (search_tx, search_rx) = watch::channel(search.to_string());
        let (scroll_tx, scroll_rx) = watch::channel(scroll);

        let tailer = FileTailer::with_source(file.clone(), search_rx, scroll_rx, config).unwrap();

        Self {
            file,
            search: search_tx,
            scroll: scroll_tx,
            tailer,
        }
    }

    fn texts(&self) -> Vec<(usize, String)> {
        self.tailer
            .lines()
            .items()
            .into_iter()
            .map(|line| (line.line, line.text))
            .collect()
    }

    async fn wait_for_lines(&self, expected: &[usize]) {
        let lines = self.tailer.lines().clone();
        let result = timeout(WAIT, async {
            while lines.line_numbers() != expected {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(
            result.is_ok(),
            "expected lines {expected:?}, have {:?}",
            lines.line_numbers()
        );
    }

    async fn wait_for_total(&self, total: usize) {
        let mut rx = self.tailer.total_lines();
        timeout(WAIT, rx.wait_for(|value| *value == total))
            .await
            .expect("timed out waiting for total lines")
            .unwrap();
    }

    async fn wait_for_state(&self, predicate: impl Fn(&TailerState) -> bool) -> TailerState {
        let mut rx = self.tailer.state();
        let state = timeout(WAIT, rx.wait_for(|state| predicate(state)))
            .await
            .expect("timed out waiting for tailer state")
            .unwrap();
        *state
    }
}

fn fast_config() -> TailerConfig {
    TailerConfig::builder()
        .poll_interval(Duration::from_millis(20))
        .build()
}

fn fast_config_with_floor(min_search_length: usize) -> TailerConfig {
    TailerConfig::builder()
        .poll_interval(Duration::from_millis(20))
        .min_search_length(min_search_length)
        .build()
}

fn replay(deltas: &[LineDelta]) -> Vec<usize> {
    let mut visible = std::collections::BTreeSet::new();
    for delta in deltas {
        for line in &delta.removed {
            visible.remove(line);
        }
        for line in &delta.added {
            visible.insert(line.line);
        }
    }
    visible.into_iter().collect()
}

#[tokio::test]
#[traced_test]
async fn test_streams_appends_then_filters() {
    // Two-character searches filter only with a lowered floor
    let harness = Harness::start_with("", ScrollRequest::tail(5), fast_config_with_floor(2));
    harness
        .wait_for_state(|state| *state == TailerState::Streaming)
        .await;
    assert_eq!(*harness.tailer.total_lines().borrow(), 0);

    harness.file.append(b"a\nb\nc\n");
    harness.wait_for_lines(&[1, 2, 3]).await;
    harness.wait_for_total(3).await;

    assert_eq!(
        harness.texts(),
        vec![
            (1, "a".to_string()),
            (2, "b".to_string()),
            (3, "c".to_string())
        ]
    );
    assert_eq!(*harness.tailer.matched_lines().borrow(), 3);
    assert!(
        harness
            .tailer
            .lines()
            .items()
            .iter()
            .all(|line| line.received_at.is_some())
    );

    harness.file.append(b"bb\nbbb\n");
    harness.search.send_replace("bb".to_string());
    harness.wait_for_lines(&[4, 5]).await;
    harness.wait_for_total(5).await;

    let mut matched = harness.tailer.matched_lines();
    timeout(WAIT, matched.wait_for(|value| *value == 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        *harness.tailer.line_counts().borrow(),
        LineCounts::filtered(5, 2)
    );
    assert_eq!(
        harness.tailer.line_counts().borrow().to_string(),
        "Showing 2 of 5 lines"
    );
}

#[tokio::test]
#[traced_test]
async fn test_initial_content_is_not_fresh() {
    let file = Arc::new(MemoryFile::new());
    file.append(b"old 1\nold 2\n");
    let (_search_tx, search_rx) = watch::channel(String::new());
    let (_scroll_tx, scroll_rx) = watch::channel(ScrollRequest::tail(10));
    let tailer =
        FileTailer::with_source(file.clone(), search_rx, scroll_rx, fast_config()).unwrap();

    let lines = tailer.lines().clone();
    timeout(WAIT, async {
        while lines.len() != 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(lines.items().iter().all(|line| line.received_at.is_none()));

    file.append(b"new 3\n");
    timeout(WAIT, async {
        while lines.len() != 3 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let items = lines.items();
    assert!(items[2].received_at.is_some());
    assert!(items[..2].iter().all(|line| line.received_at.is_none()));
}

#[tokio::test]
#[traced_test]
async fn test_truncation_clears_window() {
    let harness = Harness::start("", ScrollRequest::tail(10));
    harness.file.append(b"one\ntwo\nthree\n");
    harness.wait_for_lines(&[1, 2, 3]).await;

    let mut subscription = harness.tailer.lines().connect();
    harness.file.truncate(0);
    harness.wait_for_lines(&[]).await;
    harness.wait_for_total(0).await;

    let mut deltas = Vec::new();
    while let Some(delta) = subscription.try_recv() {
        deltas.push(delta);
    }
    assert!(replay(&deltas).is_empty());
    assert_eq!(*harness.tailer.file_size().borrow(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_tail_window_slides() {
    let harness = Harness::start("", ScrollRequest::tail(3));
    for i in 1..=10 {
        harness.file.append(format!("line {i}\n").as_bytes());
    }
    harness.wait_for_lines(&[8, 9, 10]).await;

    harness.file.append(b"line 11\n");
    harness.wait_for_lines(&[9, 10, 11]).await;
}

#[tokio::test]
#[traced_test]
async fn test_fixed_scroll_and_duplicate_requests() {
    let harness = Harness::start("", ScrollRequest::tail(3));
    for i in 1..=10 {
        harness.file.append(format!("line {i}\n").as_bytes());
    }
    harness.wait_for_lines(&[8, 9, 10]).await;

    harness.scroll.send_replace(ScrollRequest::fixed(3, 2));
    harness.wait_for_lines(&[2, 3, 4]).await;
    assert_eq!(harness.tailer.lines().first_line(), 2);

    // Anchored windows ignore appends
    harness.file.append(b"line 11\n");
    harness.wait_for_total(11).await;
    assert_eq!(harness.tailer.lines().line_numbers(), vec![2, 3, 4]);

    let mut subscription = harness.tailer.lines().connect();
    assert!(subscription.try_recv().is_some());

    harness.scroll.send_replace(ScrollRequest::fixed(3, 2));
    sleep(Duration::from_millis(100)).await;
    assert!(subscription.try_recv().is_none());

    harness.scroll.send_replace(ScrollRequest::from_auto_tail(true, 3, 2));
    harness.wait_for_lines(&[9, 10, 11]).await;
}

#[tokio::test]
#[traced_test]
async fn test_latest_search_wins() {
    let harness = Harness::start("", ScrollRequest::tail(100));
    for i in 1..=300 {
        let tag = if i % 10 == 0 {
            "beta"
        } else if i % 2 == 0 {
            "alpha"
        } else {
            "gamma"
        };
        harness.file.append(format!("{i} {tag}\n").as_bytes());
    }
    harness.wait_for_total(300).await;

    for search in ["alp", "gam", "BETA"] {
        harness.search.send_replace(search.to_string());
    }

    let mut matched = harness.tailer.matched_lines();
    timeout(WAIT, matched.wait_for(|value| *value == 30))
        .await
        .unwrap()
        .unwrap();

    let lines = harness.tailer.lines().clone();
    timeout(WAIT, async {
        while !lines.items().iter().all(|line| line.text.ends_with("beta")) || lines.len() != 30 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_short_search_shows_everything() {
    let harness = Harness::start("zz", ScrollRequest::tail(10));
    harness.file.append(b"abc\nxyz\n");
    harness.wait_for_lines(&[1, 2]).await;

    assert_eq!(*harness.tailer.matched_lines().borrow(), 2);
    assert_eq!(
        harness.tailer.line_counts().borrow().to_string(),
        "File has 2 lines"
    );
}

#[tokio::test]
#[traced_test]
async fn test_two_character_search_is_below_default_floor() {
    let harness = Harness::start("", ScrollRequest::tail(5));
    harness.file.append(b"a\nb\nc\nbb\nbbb\n");
    harness.wait_for_lines(&[1, 2, 3, 4, 5]).await;

    harness.search.send_replace("bb".to_string());
    sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.tailer.lines().line_numbers(), vec![1, 2, 3, 4, 5]);
    assert_eq!(*harness.tailer.matched_lines().borrow(), 5);
    assert_eq!(*harness.tailer.line_counts().borrow(), LineCounts::unfiltered(5));
}

#[tokio::test]
#[traced_test]
async fn test_read_failure_degrades_then_recovers() {
    let harness = Harness::start("", ScrollRequest::tail(10));
    harness.file.append(b"a\nb\n");
    harness.wait_for_lines(&[1, 2]).await;

    harness.file.fail_next_reads(1);
    harness.file.append(b"c\n");

    let degraded = harness
        .wait_for_state(|state| matches!(state, TailerState::Degraded { .. }))
        .await;
    assert_eq!(degraded, TailerState::Degraded { attempt: 1 });
    assert_eq!(harness.tailer.lines().line_numbers(), vec![1, 2]);
    assert_eq!(*harness.tailer.total_lines().borrow(), 2);

    harness
        .wait_for_state(|state| *state == TailerState::Streaming)
        .await;
    harness.wait_for_lines(&[1, 2, 3]).await;
}

#[tokio::test]
#[traced_test]
async fn test_dispose_interrupts_retry_backoff() {
    let config = TailerConfig::builder()
        .poll_interval(Duration::from_millis(20))
        .retry_initial_delay(Duration::from_secs(30))
        .retry_max_delay(Duration::from_secs(30))
        .build();
    let harness = Harness::start_with("", ScrollRequest::tail(10), config);
    harness.file.append(b"a\n");
    harness.wait_for_lines(&[1]).await;

    harness.file.fail_next_reads(1);
    harness.file.append(b"b\n");
    harness
        .wait_for_state(|state| matches!(state, TailerState::Degraded { .. }))
        .await;

    timeout(Duration::from_secs(1), harness.tailer.dispose())
        .await
        .expect("dispose waited for the retry delay");
    assert_eq!(*harness.tailer.state().borrow(), TailerState::Disposed);
    assert_eq!(harness.tailer.lines().line_numbers(), vec![1]);
}

#[tokio::test]
#[traced_test]
async fn test_deleted_file_clears_then_reloads() {
    let harness = Harness::start("", ScrollRequest::tail(10));
    harness.file.append(b"one\ntwo\nthree\n");
    harness.wait_for_lines(&[1, 2, 3]).await;
    assert!(
        harness
            .tailer
            .lines()
            .items()
            .iter()
            .all(|line| line.received_at.is_some())
    );

    harness.file.remove();
    harness.wait_for_lines(&[]).await;
    harness.wait_for_total(0).await;

    let mut matched = harness.tailer.matched_lines();
    timeout(WAIT, matched.wait_for(|value| *value == 0))
        .await
        .unwrap()
        .unwrap();
    let mut size = harness.tailer.file_size();
    timeout(WAIT, size.wait_for(|value| *value == 0))
        .await
        .unwrap()
        .unwrap();

    // A recreated file is a fresh load, not an append
    harness.file.replace(b"four\nfive\n");
    harness.wait_for_lines(&[1, 2]).await;
    harness.wait_for_total(2).await;

    assert_eq!(harness.texts(), vec![(1, "four".to_string()), (2, "five".to_string())]);
    assert!(
        harness
            .tailer
            .lines()
            .items()
            .iter()
            .all(|line| line.received_at.is_none())
    );
}

#[tokio::test]
#[traced_test]
async fn test_missing_file_then_created() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("late.log");
    let (_search_tx, search_rx) = watch::channel(String::new());
    let (_scroll_tx, scroll_rx) = watch::channel(ScrollRequest::tail(10));
    let tailer = FileTailer::new(&path, search_rx, scroll_rx, fast_config()).unwrap();

    let mut state = tailer.state();
    timeout(WAIT, state.wait_for(|state| *state == TailerState::Streaming))
        .await
        .unwrap()
        .unwrap();
    assert!(tailer.lines().is_empty());

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .unwrap();
    writeln!(file, "hello").unwrap();
    writeln!(file, "world").unwrap();
    file.flush().unwrap();

    let mut total = tailer.total_lines();
    timeout(WAIT, total.wait_for(|value| *value == 2))
        .await
        .unwrap()
        .unwrap();

    let lines = tailer.lines().clone();
    timeout(WAIT, async {
        while lines.len() != 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(lines.items()[1].text, "world");
    assert_eq!(*tailer.file_size().borrow(), 12);

    tailer.dispose().await;
}

#[tokio::test]
#[traced_test]
async fn test_dispose_ends_subscriptions() {
    let harness = Harness::start("", ScrollRequest::tail(10));
    harness.file.append(b"x\n");
    harness.wait_for_lines(&[1]).await;

    let mut subscription = harness.tailer.lines().connect();
    harness.tailer.dispose().await;

    assert_eq!(*harness.tailer.state().borrow(), TailerState::Disposed);
    assert!(subscription.recv().await.is_some());
    assert!(subscription.recv().await.is_none());

    // Nothing changes after disposal
    harness.file.append(b"y\n");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.tailer.lines().line_numbers(), vec![1]);
}

#[test]
fn test_requires_runtime() {
    let (_search_tx, search_rx) = watch::channel(String::new());
    let (_scroll_tx, scroll_rx) = watch::channel(ScrollRequest::tail(10));

    let result = FileTailer::with_source(
        Arc::new(MemoryFile::new()),
        search_rx,
        scroll_rx,
        TailerConfig::default(),
    );
    assert!(matches!(result, Err(Error::NoRuntime)));
}

#[tokio::test]
async fn test_rejects_directory() {
    let temp_dir = TempDir::new().unwrap();
    let (_search_tx, search_rx) = watch::channel(String::new());
    let (_scroll_tx, scroll_rx) = watch::channel(ScrollRequest::tail(10));

    let result = FileTailer::new(temp_dir.path(), search_rx, scroll_rx, TailerConfig::default());
    assert!(matches!(result, Err(Error::InvalidPath { .. })));
}
