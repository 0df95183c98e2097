//! In-memory stand-ins for external services, shared by the unit tests.
#![allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]

use crate::ai::{AiError, CompletionService};
use crate::sources::candidate::{
    AuthorCandidate, CandidateRecord, SearchHit, Source, WorkSummary, WorksPage,
};
use crate::sources::errors::SourceError;
use crate::sources::{BookSearch, CatalogSource};
use async_trait::async_trait;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// A catalog of numbered works `OL{i}W` titled `Work number {i}`.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    pub authors: Vec<AuthorCandidate>,
    pub works: Vec<WorkSummary>,
    pub details: HashMap<String, CandidateRecord>,
    /// Listed entries too incomplete to parse: counted in pages, never returned.
    pub incomplete: HashSet<String>,
    /// Remaining failures per work key.
    pub failures: Mutex<HashMap<String, usize>>,
    pub listing_fails: AtomicBool,
    pub detail_calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn with_works(count: usize) -> Self {
        let mut catalog = Self::default();
        for index in 0..count {
            let key = format!("OL{index}W");
            let title = format!("Work number {index}");
            catalog.details.insert(
                key.clone(),
                CandidateRecord::new(Source::OpenLibrary, title.as_str()).with_external_key(key.as_str()),
            );
            catalog.works.push(WorkSummary::new(key, title));
        }
        catalog
    }

    pub fn fail_times(&self, key: &str, times: usize) {
        self.failures.lock().unwrap().insert(key.to_owned(), times);
    }

    pub fn rename(&mut self, key: &str, title: &str) {
        for work in self.works.iter_mut().filter(|work| work.key == key) {
            title.clone_into(&mut work.title);
        }
        if let Some(detail) = self.details.get_mut(key) {
            title.clone_into(&mut detail.title);
        }
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn search_authors(&self, query: &str, limit: usize) -> Vec<AuthorCandidate> {
        self.authors
            .iter()
            .filter(|author| author.name.to_lowercase().contains(&query.to_lowercase()))
            .take(limit)
            .cloned()
            .collect()
    }

    async fn author_detail(&self, author_key: &str) -> Option<AuthorCandidate> {
        self.authors
            .iter()
            .find(|author| author.external_key.as_deref() == Some(author_key))
            .cloned()
    }

    async fn works_page(
        &self,
        _author_key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<WorksPage, SourceError> {
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(SourceError::RateLimited {
                url: "fake://works".to_owned(),
            });
        }
        let entries: Vec<&WorkSummary> = self.works.iter().skip(offset).take(limit).collect();
        let works = entries
            .iter()
            .filter(|work| !self.incomplete.contains(&work.key))
            .map(|&work| work.clone())
            .collect();
        Ok(WorksPage::new(works, entries.len()))
    }

    async fn work_detail(&self, work_key: &str) -> Result<Option<CandidateRecord>, SourceError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(work_key).filter(|remaining| **remaining > 0) {
            *remaining = remaining.saturating_sub(1);
            return Err(SourceError::Server {
                url: format!("fake://works/{work_key}"),
                status: 503,
            });
        }
        Ok(self.details.get(work_key).cloned())
    }
}

/// Canned search hits, counting calls.
#[derive(Debug, Default)]
pub struct FakeSearch {
    pub hits: Vec<SearchHit>,
    pub calls: AtomicUsize,
}

impl FakeSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BookSearch for FakeSearch {
    async fn search(&self, _query: &str, _author: Option<&str>, limit: usize) -> Vec<SearchHit> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hits.iter().take(limit).cloned().collect()
    }
}

/// Answers completions from a queue, failing once it runs dry. Records every prompt.
#[derive(Debug, Default)]
pub struct FakeCompletion {
    pub replies: Mutex<VecDeque<Result<String, AiError>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeCompletion {
    pub fn replying<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|reply| Ok(reply.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, AiError> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(AiError::EmptyResponse))
    }
}
