/// HTML parsing for the catalog site's series, season and movie pages
use super::catalog::{HostingLink, StreamLinks};
use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

/// The season navigation list always holds one entry that is not an episode
pub const NAVIGATION_EXTRA_ENTRIES: u32 = 1;

/// Number of episodes to enumerate given the raw navigation-list count
pub fn corrected_episode_count(raw: u32) -> u32 {
    raw.saturating_sub(NAVIGATION_EXTRA_ENTRIES)
}

/// One entry of a series' top navigation list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureEntry {
    Season(u32),
    /// Link (as found on the page) to the series' movie collection
    MovieCollection(String),
}

/// A movie listed on a movie-collection page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieEntry {
    pub title: String,
    pub href: String,
}

/// Parsed movie-collection page
#[derive(Debug, Clone, Default)]
pub struct MovieList {
    pub movies: Vec<MovieEntry>,
    /// Outer HTML of list items that carried no usable link
    pub invalid: Vec<String>,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{}': {:?}", css, e))
}

/// `<li>` children of the n-th `ul` directly under `#stream`
fn stream_list_items<'a>(document: &'a Html, index: usize) -> Result<Vec<ElementRef<'a>>> {
    let lists = selector("#stream > ul")?;
    let Some(list) = document.select(&lists).nth(index) else {
        return Ok(Vec::new());
    };

    Ok(list
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "li")
        .collect())
}

fn first_link<'a>(item: &ElementRef<'a>) -> Result<Option<(ElementRef<'a>, &'a str)>> {
    let anchor = selector("a")?;
    Ok(item
        .select(&anchor)
        .next()
        .and_then(|a| a.value().attr("href").filter(|h| !h.is_empty()).map(|h| (a, h))))
}

fn has_marker(item: &ElementRef<'_>, marker: &str) -> Result<bool> {
    let span = selector("span")?;
    Ok(item
        .select(&span)
        .any(|s| s.text().collect::<String>().trim() == marker))
}

fn link_text(anchor: &ElementRef<'_>) -> String {
    anchor.text().collect::<String>().trim().to_string()
}

/// Seasons and movie collections of a series, seasons ascending and movies last
pub fn parse_structure(html: &str) -> Result<Vec<StructureEntry>> {
    let document = Html::parse_document(html);
    let season_pattern = Regex::new(r"/staffel-(\d+)")?;
    let mut entries = Vec::new();

    for item in stream_list_items(&document, 0)? {
        match first_link(&item)? {
            Some((anchor, href)) if href.contains("/staffel-") => {
                let text = link_text(&anchor);
                let number = text.parse::<u32>().ok().or_else(|| {
                    season_pattern
                        .captures(href)
                        .and_then(|c| c[1].parse::<u32>().ok())
                });
                if let Some(number) = number {
                    entries.push(StructureEntry::Season(number));
                }
            }
            Some((_, href)) if href.contains("/filme") => {
                entries.push(StructureEntry::MovieCollection(href.to_string()));
            }
            Some((_, href)) => debug!("Ignoring navigation link {}", href),
            None if has_marker(&item, "Staffeln:")? => {}
            None => debug!("Unexpected navigation entry: {}", item.html()),
        }
    }

    entries.sort_by_key(|entry| match entry {
        StructureEntry::Season(n) => (0, *n),
        StructureEntry::MovieCollection(_) => (1, 0),
    });
    Ok(entries)
}

/// Raw count of episode entries for `season` on one of its episode pages
pub fn count_episode_entries(html: &str, season: u32) -> Result<u32> {
    let document = Html::parse_document(html);
    let marker = format!("/staffel-{}/episode-", season);
    let episode_pattern = Regex::new(r"/episode-(\d+)")?;

    let mut count: u32 = 0;
    for item in stream_list_items(&document, 1)? {
        let Some((anchor, href)) = first_link(&item)? else {
            continue;
        };
        if !href.contains(&marker) {
            continue;
        }
        if link_text(&anchor).parse::<u32>().is_ok() || episode_pattern.is_match(href) {
            count += 1;
        }
    }
    Ok(count)
}

/// Every hosting service icon on an item page, hrefs resolved against `base`
pub fn parse_hosting_services(html: &str, base: &Url) -> Result<Vec<HostingLink>> {
    let document = Html::parse_document(html);
    let icons = selector("i.icon")?;
    let mut links = Vec::new();

    for icon in document.select(&icons) {
        let Some(service) = icon
            .value()
            .attr("class")
            .and_then(|classes| classes.split_whitespace().nth(1))
        else {
            continue;
        };
        let href = icon
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "a")
            .and_then(|a| a.value().attr("href"));
        let Some(href) = href else {
            continue;
        };

        match base.join(href) {
            Ok(url) => links.push(HostingLink {
                service: service.to_string(),
                url: url.to_string(),
            }),
            Err(e) => debug!("Skipping unresolvable hosting href {}: {}", href, e),
        }
    }
    Ok(links)
}

/// Pick the primary link by preference order. Other preferred services follow as
/// alternates, then the remaining services in page order. `None` when no
/// preferred service is offered.
pub fn select_links(services: &[HostingLink], preference: &[String]) -> Option<StreamLinks> {
    let rank = |link: &HostingLink| {
        preference
            .iter()
            .position(|p| p.eq_ignore_ascii_case(&link.service))
    };

    let mut preferred: Vec<(usize, &HostingLink)> = services
        .iter()
        .filter_map(|link| rank(link).map(|r| (r, link)))
        .collect();
    preferred.sort_by_key(|(r, _)| *r);

    let mut ordered: Vec<HostingLink> = preferred.into_iter().map(|(_, l)| l.clone()).collect();
    ordered.extend(services.iter().filter(|l| rank(l).is_none()).cloned());

    let mut seen = std::collections::HashSet::new();
    ordered.retain(|l| seen.insert(l.url.clone()));

    if ordered.is_empty() || rank(&ordered[0]).is_none() {
        return None;
    }
    let primary = ordered.remove(0);
    Some(StreamLinks {
        primary,
        alternates: ordered,
    })
}

/// Movies on a movie-collection page
pub fn parse_movie_list(html: &str) -> Result<MovieList> {
    let document = Html::parse_document(html);
    let mut list = MovieList::default();

    for item in stream_list_items(&document, 1)? {
        if has_marker(&item, "Filme:")? {
            continue;
        }
        match first_link(&item)? {
            Some((anchor, href)) => {
                let title = link_text(&anchor);
                if title.is_empty() {
                    list.invalid.push(item.html());
                } else {
                    list.movies.push(MovieEntry {
                        title,
                        href: href.to_string(),
                    });
                }
            }
            None => list.invalid.push(item.html()),
        }
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERIES_PAGE: &str = r#"
        <html><body><div id="stream">
          <ul>
            <li><span><strong>Staffeln:</strong></span></li>
            <li><a href="/serie/stream/show/filme">Filme</a></li>
            <li><a href="/serie/stream/show/staffel-2">2</a></li>
            <li><a href="/serie/stream/show/staffel-1" class="active">1</a></li>
            <li><a href="/serie/stream/show/staffel-3" title="Staffel 3">Staffel drei</a></li>
          </ul>
          <ul>
            <li><span><strong>Episoden:</strong></span></li>
            <li><a href="/serie/stream/show/staffel-1/episode-1">1</a></li>
            <li><a href="/serie/stream/show/staffel-1/episode-2">2</a></li>
            <li><a href="/serie/stream/show/staffel-1/episode-3">3</a></li>
            <li><a href="/serie/stream/show/staffel-2/episode-1">1</a></li>
            <li><a href="/serie/stream/show/staffel-1/episode-4">4</a></li>
          </ul>
        </div>
        <div class="hosterSiteVideo"><ul>
          <li><a href="/redirect/111"><i class="icon Vidoza" title="Hoster Vidoza"></i></a></li>
          <li><a href="/redirect/222"><i class="icon Streamtape"></i></a></li>
          <li><a href="/redirect/333"><h4>VOE</h4><i class="icon VOE"></i></a></li>
          <li><i class="icon"></i></li>
        </ul></div>
        </body></html>
    "#;

    fn base() -> Url {
        Url::parse("https://site.example").unwrap()
    }

    fn prefs() -> Vec<String> {
        vec!["VOE".to_string(), "Vidoza".to_string()]
    }

    #[test]
    fn test_structure_sorted_with_movies_last() {
        let entries = parse_structure(SERIES_PAGE).unwrap();
        assert_eq!(
            entries,
            vec![
                StructureEntry::Season(1),
                StructureEntry::Season(2),
                StructureEntry::Season(3),
                StructureEntry::MovieCollection("/serie/stream/show/filme".to_string()),
            ]
        );
    }

    #[test]
    fn test_structure_missing_list_is_empty() {
        assert!(parse_structure("<html><body><p>gone</p></body></html>")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_episode_count_only_counts_own_season() {
        assert_eq!(count_episode_entries(SERIES_PAGE, 1).unwrap(), 4);
        assert_eq!(count_episode_entries(SERIES_PAGE, 2).unwrap(), 1);
    }

    #[test]
    fn test_corrected_episode_count() {
        assert_eq!(corrected_episode_count(13), 12);
        assert_eq!(corrected_episode_count(0), 0);
    }

    #[test]
    fn test_hosting_services_resolved_against_base() {
        let services = parse_hosting_services(SERIES_PAGE, &base()).unwrap();
        let names: Vec<&str> = services.iter().map(|s| s.service.as_str()).collect();
        assert_eq!(names, vec!["Vidoza", "Streamtape", "VOE"]);
        assert_eq!(services[0].url, "https://site.example/redirect/111");
    }

    #[test]
    fn test_select_links_follows_preference() {
        let services = parse_hosting_services(SERIES_PAGE, &base()).unwrap();
        let links = select_links(&services, &prefs()).unwrap();
        assert_eq!(links.primary.service, "VOE");
        let alternates: Vec<&str> = links.alternates.iter().map(|s| s.service.as_str()).collect();
        assert_eq!(alternates, vec!["Vidoza", "Streamtape"]);
    }

    #[test]
    fn test_select_links_requires_a_preferred_service() {
        let services = vec![HostingLink {
            service: "Streamtape".into(),
            url: "https://site.example/redirect/1".into(),
        }];
        assert!(select_links(&services, &prefs()).is_none());
        assert!(select_links(&[], &prefs()).is_none());
    }

    #[test]
    fn test_movie_list_skips_marker_and_reports_invalid_items() {
        let html = r#"<div id="stream">
            <ul><li><a href="/serie/stream/show/filme">Filme</a></li></ul>
            <ul>
              <li><span>Filme:</span></li>
              <li><a href="/serie/stream/show/filme/film-1">Der Film</a></li>
              <li><em>coming soon</em></li>
              <li><a href="/serie/stream/show/filme/film-2">Zweiter Film</a></li>
            </ul>
        </div>"#;
        let list = parse_movie_list(html).unwrap();
        let titles: Vec<&str> = list.movies.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Der Film", "Zweiter Film"]);
        assert_eq!(list.movies[0].href, "/serie/stream/show/filme/film-1");
        assert_eq!(list.invalid.len(), 1);
        assert!(list.invalid[0].contains("coming soon"));
    }
}
