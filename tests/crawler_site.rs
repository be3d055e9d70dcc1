use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use series_harvester::crawler::{CatalogStore, FailureKind, LinkCrawler};
use series_harvester::{jobs_from_catalog, ConfigBuilder};
use tempfile::TempDir;

const SERIES: &str = "Test Show";
const SLUG: &str = "test-show";

fn navigation() -> String {
    format!(
        r#"<ul>
          <li><span><strong>Staffeln:</strong></span></li>
          <li><a href="/serie/stream/{SLUG}/staffel-1">1</a></li>
          <li><a href="/serie/stream/{SLUG}/staffel-2">2</a></li>
          <li><a href="/serie/stream/{SLUG}/filme">Filme</a></li>
        </ul>"#
    )
}

/// Navigation entries for a season; the site always lists one more than exist
fn episode_list(season: u32) -> String {
    let listed = if season == 1 { 4 } else { 3 };
    let items: String = (1..=listed)
        .map(|n| format!(r#"<li><a href="/serie/stream/{SLUG}/staffel-{season}/episode-{n}">{n}</a></li>"#))
        .collect();
    format!("<ul><li><span><strong>Episoden:</strong></span></li>{items}</ul>")
}

fn hosters(services: &[(&str, &str)]) -> String {
    let items: String = services
        .iter()
        .map(|(name, id)| format!(r#"<li><a href="/redirect/{id}"><i class="icon {name}"></i></a></li>"#))
        .collect();
    format!(r#"<div class="hosterSiteVideo"><ul>{items}</ul></div>"#)
}

fn page(path: &str) -> Option<String> {
    let prefix = format!("/serie/stream/{SLUG}/");
    let rest = path.strip_prefix(&prefix)?;

    if rest == "filme" {
        return Some(format!(
            r#"<html><body><div id="stream">{}
              <ul>
                <li><span>Filme:</span></li>
                <li><a href="/serie/stream/{SLUG}/filme/film-1">Der Film</a></li>
                <li><em>announced</em></li>
              </ul></div></body></html>"#,
            navigation()
        ));
    }
    if rest == "filme/film-1" {
        return Some(format!(
            r#"<html><body><div id="stream">{}</div>{}</body></html>"#,
            navigation(),
            hosters(&[("VOE", "f1")])
        ));
    }

    let (season, episode) = rest.strip_prefix("staffel-")?.split_once("/episode-")?;
    let (season, episode): (u32, u32) = (season.parse().ok()?, episode.parse().ok()?);
    let services: Vec<(&str, String)> = if season == 2 && episode == 2 {
        vec![("Streamtape", format!("{season}{episode}9"))]
    } else {
        vec![
            ("Vidoza", format!("{season}{episode}2")),
            ("VOE", format!("{season}{episode}1")),
        ]
    };
    let services: Vec<(&str, &str)> = services.iter().map(|(n, id)| (*n, id.as_str())).collect();

    Some(format!(
        r#"<html><head><title>Test Show</title></head><body>
          <div id="stream">{}{}</div>{}
        </body></html>"#,
        navigation(),
        episode_list(season),
        hosters(&services)
    ))
}

struct SiteStub {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl SiteStub {
    fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start site stub");
        let base_url = format!("http://{}", server.server_addr());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (shutdown, shutdown_rx) = mpsc::channel::<()>();

        let seen = Arc::clone(&requests);
        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let path = request.url().to_string();
            seen.lock().unwrap().push(path.clone());
            let response = match page(&path) {
                Some(body) => tiny_http::Response::from_string(body).with_header(
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html"[..]).unwrap(),
                ),
                None => tiny_http::Response::from_string("not found").with_status_code(404),
            };
            let _ = request.respond(response);
        });

        Self {
            base_url,
            requests,
            shutdown,
            handle,
        }
    }

    fn take_requests(&self) -> Vec<String> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }

    fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.join().unwrap();
    }
}

fn crawler(base_url: &str, catalog_path: &Path) -> LinkCrawler {
    let mut config = ConfigBuilder::new()
        .with_base_url(base_url)
        .with_catalog_path(catalog_path.to_path_buf())
        .with_crawl_concurrency(4)
        .build();
    config.crawler.series_pause_millis = 0;
    LinkCrawler::new(&config.crawler).unwrap()
}

#[tokio::test]
async fn crawl_is_idempotent_and_skips_known_items() {
    let site = SiteStub::spawn();
    let temp_dir = TempDir::new().unwrap();
    let catalog_path = temp_dir.path().join("storage/series/all_series_data.json");
    let crawler = crawler(&site.base_url, &catalog_path);
    let series = vec![SERIES.to_string()];

    let first = crawler.run(&series).await.unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(first.failed, 0);
    assert_eq!(first.new_items, 5);
    let kinds = first.ledger.count_by_kind();
    assert_eq!(kinds.get(&FailureKind::LinkNotFound), Some(&1));
    assert_eq!(kinds.get(&FailureKind::InvalidElement), Some(&1));

    let stored = CatalogStore::new(&catalog_path).load().await.unwrap();
    assert_eq!(stored.len(), 1);
    let catalog = &stored[0];
    assert_eq!(catalog.series_name, SERIES);
    assert_eq!(catalog.seasons.len(), 2);
    assert_eq!(catalog.known_episodes(1).len(), 3);
    // Episode 2 of season 2 has no preferred hoster and is not persisted
    assert_eq!(catalog.known_episodes(2).into_iter().collect::<Vec<_>>(), vec![1]);
    let first_episode = &catalog.seasons[0].episode_links[0];
    assert_eq!(first_episode.links.primary.service, "VOE");
    assert_eq!(first_episode.links.primary.url, format!("{}/redirect/111", site.base_url));
    assert_eq!(first_episode.links.alternates[0].service, "Vidoza");
    assert_eq!(catalog.films.len(), 1);
    assert_eq!(catalog.films[0].title, "Der Film");

    let first_requests = site.take_requests();
    assert!(first_requests.iter().any(|p| p.ends_with("/staffel-1/episode-3")));
    assert!(!first_requests.iter().any(|p| p.ends_with("/staffel-1/episode-4")));

    let second = crawler.run(&series).await.unwrap();
    assert_eq!(second.new_items, 0);
    let second_requests = site.take_requests();
    for known in ["/staffel-1/episode-2", "/staffel-1/episode-3", "/filme/film-1"] {
        assert!(
            !second_requests.iter().any(|p| p.ends_with(known)),
            "{known} was fetched again: {second_requests:?}"
        );
    }
    // Only the item without a preferred hoster is retried
    assert!(second_requests.iter().any(|p| p.ends_with("/staffel-2/episode-2")));

    let restored = CatalogStore::new(&catalog_path).load().await.unwrap();
    assert_eq!(restored, stored);

    site.stop();
}

#[tokio::test]
async fn unknown_series_is_counted_as_failed() {
    let site = SiteStub::spawn();
    let temp_dir = TempDir::new().unwrap();
    let catalog_path = temp_dir.path().join("catalog.json");
    let crawler = crawler(&site.base_url, &catalog_path);

    let summary = crawler
        .run(&["Missing Show".to_string(), SERIES.to_string()])
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.ledger.records()[0].kind, FailureKind::HttpStatus);
    assert_eq!(summary.ledger.records()[0].series, "Missing Show");

    let stored = CatalogStore::new(&catalog_path).load().await.unwrap();
    assert_eq!(stored.len(), 1);

    site.stop();
}

#[tokio::test]
async fn crawled_catalog_feeds_episode_jobs() {
    let site = SiteStub::spawn();
    let temp_dir = TempDir::new().unwrap();
    let catalog_path = temp_dir.path().join("catalog.json");
    crawler(&site.base_url, &catalog_path)
        .run(&[SERIES.to_string()])
        .await
        .unwrap();
    site.stop();

    let catalog = CatalogStore::new(&catalog_path)
        .find("test show")
        .await
        .unwrap()
        .expect("series stored");
    let output = temp_dir.path().join("out");
    let jobs = jobs_from_catalog(&catalog, None, None, &output);

    let labels: Vec<String> = jobs.iter().map(|j| j.label()).collect();
    assert_eq!(
        labels,
        vec![
            "Test Show S01E01",
            "Test Show S01E02",
            "Test Show S01E03",
            "Test Show S02E01",
            "Test Show S00E01"
        ]
    );
    assert!(jobs.iter().all(|j| j.hosting_links.len() == 2 || j.season == 0));
    assert!(jobs.iter().all(|j| j.output_dir == output));
}
