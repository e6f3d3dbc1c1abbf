mod common;

use std::sync::Arc;

use common::{FakeForge, file, pull_request};
use db::{DBService, models::indexed_file_change::FileChangeStatus};
use git::ChangeIdentifier;
use services::services::{
    config::{DEFAULT_UPSTREAM_MERGE_MARKER, HistoryConfig},
    forge::PullRequestStateFilter,
    history::{HistoryError, HistoryIndex, IndexCoverage, render_changes, render_summary},
};
use utils::status_msg::StatusChannel;

const REPO: &str = "teamstarcup/starcup";

fn change(number: u64) -> ChangeIdentifier {
    format!("{REPO}#{number}").parse().unwrap()
}

/// #5 adds a.txt, #9 modifies it later, #12 is an upstream merge touching
/// both a.txt and the changelog, #14 is still open.
fn seeded_forge() -> Arc<FakeForge> {
    let forge = FakeForge::new("porter");
    forge.add_pull_request(
        REPO,
        pull_request(REPO, 5, "Add lathe", 1, Some(2)),
        vec![file("a.txt", FileChangeStatus::Added)],
    );
    forge.add_pull_request(
        REPO,
        pull_request(REPO, 9, "Tune lathe", 3, Some(4)),
        vec![
            file("a.txt", FileChangeStatus::Modified),
            file("Resources/Prototypes/tags.yml", FileChangeStatus::Modified),
        ],
    );
    forge.add_pull_request(
        REPO,
        pull_request(REPO, 12, "Upstream merge", 5, Some(6)),
        vec![
            file("a.txt", FileChangeStatus::Modified),
            file(DEFAULT_UPSTREAM_MERGE_MARKER, FileChangeStatus::Modified),
        ],
    );
    forge.add_pull_request(
        REPO,
        pull_request(REPO, 14, "Lathe follow-up", 7, None),
        vec![file("a.txt", FileChangeStatus::Modified)],
    );
    let mut empty = pull_request(REPO, 15, "Empty change", 8, Some(9));
    empty.changed_files = 0;
    forge.add_pull_request(REPO, empty, Vec::new());
    forge
}

async fn indexed() -> (HistoryIndex, DBService) {
    let db = DBService::new_in_memory().await.unwrap();
    let index = HistoryIndex::new(db.clone(), seeded_forge(), HistoryConfig::default());
    index
        .index_repository(&REPO.parse().unwrap(), PullRequestStateFilter::All)
        .await
        .unwrap();
    (index, db)
}

#[tokio::test]
async fn indexing_records_every_change_once() {
    let db = DBService::new_in_memory().await.unwrap();
    let channel = StatusChannel::new();
    let mut rx = channel.subscribe();
    let index = HistoryIndex::new(db, seeded_forge(), HistoryConfig::default())
        .with_status(channel);
    let repo = REPO.parse().unwrap();

    let first = index
        .index_repository(&repo, PullRequestStateFilter::All)
        .await
        .unwrap();
    assert_eq!(first.pull_requests, 5);
    assert_eq!(first.file_changes, 6);
    assert_eq!(first.skipped, 0);

    let again = index
        .index_repository(&repo, PullRequestStateFilter::All)
        .await
        .unwrap();
    assert_eq!(again, first);

    assert_eq!(
        index.coverage(&repo).await.unwrap(),
        IndexCoverage {
            pull_requests: 5,
            files: 3,
            file_changes: 6,
        }
    );

    let first_line = rx.recv().await.unwrap();
    assert_eq!(first_line.text, "Indexing 5 pull request(s) of teamstarcup/starcup");
    let second_line = rx.recv().await.unwrap();
    assert_eq!(second_line.text, "[1/5] teamstarcup/starcup#5 - Add lathe");
}

#[tokio::test]
async fn state_filter_limits_the_pass() {
    let db = DBService::new_in_memory().await.unwrap();
    let index = HistoryIndex::new(db, seeded_forge(), HistoryConfig::default());
    let repo = REPO.parse().unwrap();

    assert_eq!(
        index
            .pending_count(&repo, PullRequestStateFilter::Open)
            .await
            .unwrap(),
        1
    );
    let report = index
        .index_repository(&repo, PullRequestStateFilter::Open)
        .await
        .unwrap();
    assert_eq!(report.pull_requests, 1);
}

#[tokio::test]
async fn descendants_and_ancestors_mirror_each_other() {
    let (index, _db) = indexed().await;

    let descendants = index.descendants(&change(5)).await.unwrap();
    assert_eq!(render_changes(&descendants), vec!["#9 - Tune lathe"]);

    let ancestors = index.ancestors(&change(9)).await.unwrap();
    assert_eq!(render_changes(&ancestors), vec!["#5 - Add lathe"]);
}

#[tokio::test]
async fn ancestors_skip_upstream_merges_and_unmerged_changes() {
    let (index, _db) = indexed().await;

    // #14 is open, so its reference time is its creation (day 7).
    let ancestors = index.ancestors(&change(14)).await.unwrap();
    assert_eq!(
        render_changes(&ancestors),
        vec!["#5 - Add lathe", "#9 - Tune lathe"]
    );
}

#[tokio::test]
async fn changes_merged_at_the_same_moment_are_neither_ancestors_nor_descendants() {
    let forge = seeded_forge();
    // #30 and #31 are merged at the same instant, #32 a day later.
    forge.add_pull_request(
        REPO,
        pull_request(REPO, 30, "Add drill", 19, Some(20)),
        vec![file("drill.yml", FileChangeStatus::Added)],
    );
    forge.add_pull_request(
        REPO,
        pull_request(REPO, 31, "Tune drill", 19, Some(20)),
        vec![file("drill.yml", FileChangeStatus::Modified)],
    );
    forge.add_pull_request(
        REPO,
        pull_request(REPO, 32, "Rebalance drill", 20, Some(21)),
        vec![file("drill.yml", FileChangeStatus::Modified)],
    );
    let db = DBService::new_in_memory().await.unwrap();
    let index = HistoryIndex::new(db, forge, HistoryConfig::default());
    index
        .index_repository(&REPO.parse().unwrap(), PullRequestStateFilter::All)
        .await
        .unwrap();

    assert!(index.ancestors(&change(31)).await.unwrap().is_empty());
    assert_eq!(
        render_changes(&index.descendants(&change(30)).await.unwrap()),
        vec!["#32 - Rebalance drill"]
    );
    assert_eq!(
        render_changes(&index.ancestors(&change(32)).await.unwrap()),
        vec!["#30 - Add drill", "#31 - Tune drill"]
    );
}

#[tokio::test]
async fn high_churn_paths_do_not_seed_queries() {
    let forge = seeded_forge();
    forge.add_pull_request(
        REPO,
        pull_request(REPO, 20, "Touch tags", 10, Some(11)),
        vec![file("Resources/Prototypes/tags.yml", FileChangeStatus::Modified)],
    );
    let db = DBService::new_in_memory().await.unwrap();
    let index = HistoryIndex::new(db, forge, HistoryConfig::default());
    index
        .index_repository(&REPO.parse().unwrap(), PullRequestStateFilter::All)
        .await
        .unwrap();

    assert!(index.ancestors(&change(20)).await.unwrap().is_empty());
}

#[tokio::test]
async fn queries_require_an_indexed_repository() {
    let db = DBService::new_in_memory().await.unwrap();
    let index = HistoryIndex::new(db, seeded_forge(), HistoryConfig::default());

    let err = index.ancestors(&change(9)).await.unwrap_err();
    assert!(matches!(err, HistoryError::NotIndexed(ref repo) if repo == REPO));

    let err = index
        .search("a.txt", Some(&REPO.parse().unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::NotIndexed(_)));

    let err = index.coverage(&REPO.parse().unwrap()).await.unwrap_err();
    assert!(matches!(err, HistoryError::NotIndexed(_)));
}

#[tokio::test]
async fn search_lists_unmerged_first() {
    let (index, _db) = indexed().await;

    let hits = index.search("a.txt", None).await.unwrap();
    assert_eq!(
        hits,
        vec![
            "teamstarcup/starcup#14 - Lathe follow-up",
            "teamstarcup/starcup#5 - Add lathe",
            "teamstarcup/starcup#9 - Tune lathe",
            "teamstarcup/starcup#12 - Upstream merge",
        ]
    );
}

#[tokio::test]
async fn show_summarises_a_change() {
    let (index, _db) = indexed().await;

    let summary = index.show(&change(9)).await.unwrap();
    assert_eq!(
        summary,
        "Tune lathe\nState: Merged\n+10 -2\nAuthor: octocat\n\nBody of Tune lathe"
    );

    let mut long = pull_request(REPO, 30, "Long", 1, None);
    long.body = Some(format!("<!-- template -->{}", "x".repeat(400)));
    let rendered = render_summary(&long);
    assert!(rendered.starts_with("Long\nState: Open\n"));
    assert!(!rendered.contains("template"));
    assert!(rendered.ends_with(&format!("{} ...", "x".repeat(300))));
}
