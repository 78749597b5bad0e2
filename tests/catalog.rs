mod common;

use resync_oai::models::{PublishConfig, Resource, Snapshot};
use resync_oai::pipeline::{Publisher, calculate_diff};
use resync_oai::services::{HarvestClient, Repository};
use resync_oai::storage::{CatalogCodec, DocumentStore, LocalStorage};
use resync_oai::utils::mapper::Mapper;
use tempfile::TempDir;

use common::{ScriptedFetcher, created, page};

fn resource(uri: &str, lastmod: &str, size: u64) -> Resource {
    Resource::new(uri).with_lastmod(lastmod).unwrap().with_size(size)
}

#[tokio::test]
async fn test_round_trip_two_resources() {
    let tmp = TempDir::new().unwrap();
    let store = LocalStorage::new(tmp.path());
    let mut snapshot = Snapshot::new();
    snapshot.add(resource("http://x/a", "2012-07-25T17:13:46Z", 20)).unwrap();
    snapshot.add(resource("http://x/b", "2001-09-09T01:46:40Z", 45)).unwrap();

    let codec = CatalogCodec::new();
    let written = codec.write(&snapshot, &store, "sitemap.xml").await.unwrap();
    assert_eq!(written.documents.len(), 1);

    let (read, summary) = codec.read_snapshot(&store.location("sitemap.xml")).await.unwrap();
    assert_eq!(summary.documents, 1);
    assert!(!calculate_diff(&snapshot, &read).has_changes());
}

#[tokio::test]
async fn test_pagination_thresholds() {
    let tmp = TempDir::new().unwrap();
    let codec = CatalogCodec::new().with_max_entries(1000);
    let many: Snapshot = (0..2500)
        .map(|i| resource(&format!("http://x/{i:05}"), "2012-07-25", i))
        .collect();
    let few: Snapshot = many.iter().take(800).cloned().collect();

    let big = LocalStorage::new(tmp.path().join("big"));
    let summary = codec.write(&many, &big, "sitemap.xml").await.unwrap();
    assert_eq!(summary.documents.len(), 4);
    assert!(summary.index.is_some());

    let mut chunk_sizes = Vec::new();
    for key in &summary.documents[..3] {
        let mut chunk = Snapshot::new();
        let bytes = big.read_bytes(key).await.unwrap().unwrap();
        let xml = String::from_utf8(bytes).unwrap();
        chunk_sizes.push(codec.parse_urlset_into(&xml, &mut chunk, key).unwrap());
    }
    assert_eq!(chunk_sizes, vec![1000, 1000, 500]);

    let small = LocalStorage::new(tmp.path().join("small"));
    let summary = codec.write(&few, &small, "sitemap.xml").await.unwrap();
    assert_eq!(summary.documents, vec!["sitemap.xml"]);
    assert!(summary.index.is_none());
}

#[tokio::test]
async fn test_harvest_publish_read_back() {
    let fetcher = ScriptedFetcher::new(vec![page(
        "2012-09-01T10:00:00Z",
        &[
            created("id:1", "2012-08-01", "http://x/1"),
            created("id:2", "2012-08-02", "http://x/2"),
            created("id:3", "2012-08-03", "http://x/3"),
        ],
        None,
    )]);
    let mut repo = Repository::new(HarvestClient::new(fetcher, "http://x/oai").unwrap());
    repo.bootstrap_from(None).await.unwrap();

    let tmp = TempDir::new().unwrap();
    let config = PublishConfig {
        base_uri: "http://x.org/".to_string(),
        output_dir: tmp.path().join("static"),
        temp_dir: tmp.path().join("tmp"),
        max_sitemap_entries: 2,
        ..Default::default()
    };
    let publisher = Publisher::from_config(&config, repo.snapshot_handle()).unwrap();
    let stats = publisher.publish_once().await.unwrap();
    assert_eq!(stats.resource_count, 3);
    assert_eq!(stats.documents_written, 3);

    // The index lists public URIs; map them back onto the output directory
    let output = tmp.path().join("static");
    let mapper = Mapper::parse(&["http://x.org/", output.to_str().unwrap()]).unwrap();
    let reader = CatalogCodec::new().with_mapper(mapper);
    let (read, summary) = reader
        .read_snapshot(output.join("sitemap.xml").to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.documents, 3);
    assert_eq!(read.len(), 3);
    assert!(!calculate_diff(&repo.current_snapshot(), &read).has_changes());
    assert!(read.capabilities.is_empty());

}
