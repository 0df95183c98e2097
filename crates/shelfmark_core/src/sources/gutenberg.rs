use crate::sources::BookSearch;
use crate::sources::candidate::{AuthorCandidate, CandidateRecord, SearchHit, Source};
use crate::sources::client::{HttpClient, SCRAPE_TIMEOUT};
use crate::sources::errors::SourceError;
use crate::sources::language::language_code;
use crate::sources::matching::{author_matches, extract_ebook_id};
use async_trait::async_trait;
use log::{debug, warn};
use scraper::{ElementRef, Html, Selector};

pub const DEFAULT_BASE_URL: &str = "https://www.gutenberg.org";
/// Used when the detail page names no language, or one the table does not know.
const FALLBACK_LANGUAGE: &str = "en";
/// Name segments of a catalog author entry that are honorifics, not names.
const HONORIFICS: &[&str] = &["Sir", "Dame", "Lady", "Lord", "Mrs.", "Mr.", "Dr.", "Jr.", "Sr."];

/// One entry of the HTML search listing, before its detail page is read.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListingEntry {
    ebook_id: String,
    title: String,
    author: Option<String>,
}

/// Adapter for the Project Gutenberg catalog, which has no structured API and is read
/// from its HTML pages.
#[derive(Debug, Clone)]
pub struct Gutenberg {
    client: HttpClient,
    base_url: String,
}

impl Gutenberg {
    #[must_use]
    #[inline]
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Searches the catalog and reads the detail page of every relevant result, up to
    /// `limit`. Results whose author does not resemble `author` are dropped.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn search_titles(
        &self,
        query: &str,
        author: Option<&str>,
        limit: usize,
    ) -> Vec<SearchHit> {
        let url = format!(
            "{}/ebooks/search/?query={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let html = match self.client.get_text(&url, &[], SCRAPE_TIMEOUT).await {
            Ok(Some(html)) => html,
            Ok(None) => return Vec::new(),
            Err(error) => {
                warn!("Catalog search for {query:?} failed: {error}");
                return Vec::new();
            }
        };

        let entries = match parse_listing(&html) {
            Ok(entries) => entries,
            Err(error) => {
                warn!("Could not read catalog listing for {query:?}: {error}");
                return Vec::new();
            }
        };

        let mut hits = Vec::new();
        for entry in entries {
            if hits.len() >= limit {
                break;
            }
            if let (Some(wanted), Some(listed)) = (author, entry.author.as_deref()) {
                if !author_matches(listed, wanted) {
                    debug!("Skipping {:?}, listed author {listed:?} is not {wanted:?}", entry.title);
                    continue;
                }
            }
            let Some(hit) = self.fetch_title(&entry.ebook_id).await else {
                continue;
            };
            let confirmed = author.is_none_or(|wanted| {
                hit.authors
                    .iter()
                    .any(|found| author_matches(&found.name, wanted))
            });
            if confirmed {
                hits.push(hit);
            } else {
                debug!("Dropping ebook {}, author does not match", entry.ebook_id);
            }
        }
        hits
    }

    /// Reads one title page. `None` when the page is missing or unreadable.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn fetch_title(&self, ebook_id: &str) -> Option<SearchHit> {
        let url = format!("{}/ebooks/{ebook_id}", self.base_url);
        match self.client.get_text(&url, &[], SCRAPE_TIMEOUT).await {
            Ok(Some(html)) => match parse_detail(&html, ebook_id, &self.base_url) {
                Ok(hit) => Some(hit),
                Err(error) => {
                    warn!("Could not read catalog page for ebook {ebook_id}: {error}");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!("Fetching ebook {ebook_id} failed: {error}");
                None
            }
        }
    }
}

#[async_trait]
impl BookSearch for Gutenberg {
    async fn search(&self, query: &str, author: Option<&str>, limit: usize) -> Vec<SearchHit> {
        self.search_titles(query, author, limit).await
    }
}

fn clean_text<'a>(pieces: impl Iterator<Item = &'a str>) -> Option<String> {
    let text = pieces
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    clean_text(element.text())
}

fn text_lines(element: ElementRef<'_>) -> Vec<String> {
    element
        .text()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Pairs every ebook link on the listing with its title and author text. Prefers the
/// `.title`/`.subtitle` spans and falls back to the link's own text lines.
fn parse_listing(html: &str) -> Result<Vec<ListingEntry>, SourceError> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]")?;
    let title_selector = Selector::parse(".title")?;
    let author_selector = Selector::parse(".subtitle")?;

    let mut entries: Vec<ListingEntry> = Vec::new();
    for link in document.select(&link_selector) {
        let Some(ebook_id) = link.value().attr("href").and_then(extract_ebook_id) else {
            continue;
        };
        if entries.iter().any(|entry| entry.ebook_id == ebook_id) {
            continue;
        }

        let mut title = link.select(&title_selector).next().and_then(element_text);
        let mut author = link.select(&author_selector).next().and_then(element_text);
        if title.is_none() {
            let mut lines = text_lines(link).into_iter();
            title = lines.next();
            author = author.or_else(|| lines.next());
        }
        let Some(title) = title else {
            debug!("Ebook link {ebook_id} carries no title text");
            continue;
        };

        entries.push(ListingEntry {
            ebook_id,
            title,
            author,
        });
    }
    Ok(entries)
}

/// Reads the bibliographic table of a title page.
fn parse_detail(
    html: &str,
    ebook_id: &str,
    base_url: &str,
) -> Result<SearchHit, SourceError> {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("table.bibrec tr")?;
    let header_selector = Selector::parse("th")?;
    let value_selector = Selector::parse("td")?;
    let cover_selector = Selector::parse("img.cover-art")?;

    let mut title = None;
    let mut authors = Vec::new();
    let mut language = None;
    let mut subjects: Vec<String> = Vec::new();
    let mut release_date = None;
    let mut summary = None;

    for row in document.select(&row_selector) {
        let Some(header) = row.select(&header_selector).next().and_then(element_text) else {
            continue;
        };
        let Some(value) = row.select(&value_selector).next().and_then(element_text) else {
            continue;
        };
        match header.to_lowercase().as_str() {
            "title" => title = Some(value),
            "author" | "creator" => authors.extend(parse_author_entry(&value)),
            "language" => language = language.or(Some(value)),
            "subject" => subjects.extend(
                value
                    .split(" -- ")
                    .map(str::trim)
                    .filter(|subject| !subject.is_empty())
                    .map(ToOwned::to_owned),
            ),
            "release date" => {
                release_date = value.split('[').next().map(str::trim).map(ToOwned::to_owned);
            }
            "summary" => summary = Some(value),
            _ => {}
        }
    }

    let Some(title) = title else {
        return Err(SourceError::Scrape(format!(
            "no title row on the page of ebook {ebook_id}"
        )));
    };

    let mut book = CandidateRecord::new(Source::Gutenberg, title)
        .with_external_key(ebook_id)
        .with_authors(authors.iter().map(|author| author.name.clone()));
    book.subjects = subjects;
    book.publish_date = release_date.filter(|date| !date.is_empty());
    book.description = summary;
    book.language = Some(
        language
            .as_deref()
            .and_then(language_code)
            .unwrap_or(FALLBACK_LANGUAGE)
            .to_owned(),
    );
    book.cover_url = document
        .select(&cover_selector)
        .next()
        .and_then(|image| image.value().attr("src"))
        .map(|src| absolute_url(base_url, src));

    Ok(SearchHit::new(book, authors))
}

fn absolute_url(base_url: &str, src: &str) -> String {
    if src.starts_with("http://") || src.starts_with("https://") {
        src.to_owned()
    } else if let Some(rest) = src.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("{base_url}/{}", src.trim_start_matches('/'))
    }
}

/// Reads a catalog author entry such as `Melville, Herman, 1819-1891` into a
/// candidate named `Herman Melville`.
fn parse_author_entry(entry: &str) -> Option<AuthorCandidate> {
    let mut segments: Vec<&str> = entry
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();

    let mut years = (None, None);
    if segments
        .last()
        .is_some_and(|segment| segment.chars().any(|character| character.is_ascii_digit()))
    {
        years = segments.pop().map(parse_life_years).unwrap_or_default();
    }
    segments.retain(|segment| !HONORIFICS.contains(segment));

    let name = match segments.as_slice() {
        [] => return None,
        [single] => (*single).to_owned(),
        [surname, given, ..] => format!("{given} {surname}"),
    };

    let mut author = AuthorCandidate::new(name);
    (author.birth_year, author.death_year) = years;
    Some(author)
}

/// `1819-1891`, `1812-` and `-1850` are read; era-qualified ranges such as
/// `751? BCE-651? BCE` are left unknown.
fn parse_life_years(segment: &str) -> (Option<i64>, Option<i64>) {
    if segment.contains("BC") {
        return (None, None);
    }
    let Some((birth, death)) = segment.split_once('-') else {
        return (None, None);
    };
    let year = |text: &str| {
        Some(text.trim().trim_end_matches('?'))
            .filter(|digits| {
                digits.len() >= 3 && digits.chars().all(|character| character.is_ascii_digit())
            })
            .and_then(|digits| digits.parse::<i64>().ok())
    };
    (year(birth), year(death))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LISTING: &str = r#"
        <html><body><ul class="results">
          <li class="booklink">
            <a class="link" href="/ebooks/2701">
              <span class="cell content">
                <span class="title">Moby Dick; Or, The Whale</span>
                <span class="subtitle">Herman Melville</span>
              </span>
            </a>
          </li>
          <li class="booklink">
            <a class="link" href="/ebooks/15">
              Moby Multimedia
              Herman Melville
            </a>
          </li>
          <li><a href="/ebooks/2701">duplicate link</a></li>
          <li><a href="/ebooks/search/?query=moby&start_index=26">Next</a></li>
          <li><a href="/ebooks/99"><img src="x.png"></a></li>
          <li><a>broken
        </ul></body></html>
    "#;

    const DETAIL: &str = r#"
        <html><body>
          <img class="cover-art" src="/cache/epub/2701/pg2701.cover.medium.jpg">
          <table class="bibrec">
            <tr><th>Author</th><td><a href="/ebooks/author/9">Melville, Herman, 1819-1891</a></td></tr>
            <tr><th>Title</th><td>Moby Dick;
                Or, The Whale</td></tr>
            <tr><th>Language</th><td>English</td></tr>
            <tr><th>Subject</th><td><a>Whaling -- Fiction</a></td></tr>
            <tr><th>Subject</th><td><a>Sea stories</a></td></tr>
            <tr><th>Release Date</th><td>Jul 1, 2001 [eBook #2701]</td></tr>
            <tr><th>Summary</th><td>The voyage of the Pequod.</td></tr>
            <tr><td>row without header</td></tr>
          </table>
        </body></html>
    "#;

    #[test]
    fn listing_pairs_links_with_text() {
        let entries = parse_listing(LISTING).unwrap();
        assert_eq!(
            entries,
            vec![
                ListingEntry {
                    ebook_id: "2701".to_owned(),
                    title: "Moby Dick; Or, The Whale".to_owned(),
                    author: Some("Herman Melville".to_owned()),
                },
                ListingEntry {
                    ebook_id: "15".to_owned(),
                    title: "Moby Multimedia".to_owned(),
                    author: Some("Herman Melville".to_owned()),
                },
            ]
        );
    }

    #[test]
    fn garbage_listing_is_empty() {
        assert!(parse_listing("<<<not html").unwrap().is_empty());
        assert!(parse_listing("").unwrap().is_empty());
    }

    #[test]
    fn detail_page_becomes_candidate_and_author() {
        let hit = parse_detail(DETAIL, "2701", DEFAULT_BASE_URL).unwrap();
        let book = &hit.book;
        assert_eq!(book.title, "Moby Dick; Or, The Whale");
        assert_eq!(book.external_key.as_deref(), Some("2701"));
        assert_eq!(book.author_names, vec!["Herman Melville"]);
        assert_eq!(book.subjects, vec!["Whaling", "Fiction", "Sea stories"]);
        assert_eq!(book.publish_date.as_deref(), Some("Jul 1, 2001"));
        assert_eq!(book.language.as_deref(), Some("en"));
        assert_eq!(
            book.cover_url.as_deref(),
            Some("https://www.gutenberg.org/cache/epub/2701/pg2701.cover.medium.jpg")
        );
        assert_eq!(
            hit.authors,
            vec![AuthorCandidate {
                name: "Herman Melville".to_owned(),
                birth_year: Some(1819),
                death_year: Some(1891),
                ..AuthorCandidate::default()
            }]
        );
    }

    #[test]
    fn detail_page_without_title_is_an_error() {
        let result = parse_detail("<table class=\"bibrec\"></table>", "1", DEFAULT_BASE_URL);
        assert!(matches!(result, Err(SourceError::Scrape(_))));
    }

    #[test]
    fn unknown_language_falls_back() {
        let html = r#"<table class="bibrec">
            <tr><th>Title</th><td>Beowulf</td></tr>
            <tr><th>Language</th><td>Old English</td></tr>
        </table>"#;
        let hit = parse_detail(html, "16328", DEFAULT_BASE_URL).unwrap();
        assert_eq!(hit.book.language.as_deref(), Some("en"));
        assert!(hit.authors.is_empty());
    }

    #[test]
    fn author_entries_are_reordered() {
        let doyle = parse_author_entry("Doyle, Arthur Conan, Sir, 1859-1930").unwrap();
        assert_eq!(doyle.name, "Arthur Conan Doyle");
        assert_eq!((doyle.birth_year, doyle.death_year), (Some(1859), Some(1930)));

        let homer = parse_author_entry("Homer, 751? BCE-651? BCE").unwrap();
        assert_eq!(homer.name, "Homer");
        assert_eq!((homer.birth_year, homer.death_year), (None, None));

        let open = parse_author_entry("Dickens, Charles, 1812-").unwrap();
        assert_eq!((open.birth_year, open.death_year), (Some(1812), None));

        assert!(parse_author_entry(" , ").is_none());
    }

    #[test]
    fn cover_sources_are_made_absolute() {
        assert_eq!(
            absolute_url("https://www.gutenberg.org", "//cdn.example.org/a.jpg"),
            "https://cdn.example.org/a.jpg"
        );
        assert_eq!(
            absolute_url("https://www.gutenberg.org", "https://x.org/b.jpg"),
            "https://x.org/b.jpg"
        );
    }
}
