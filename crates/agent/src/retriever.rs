//! FAQ evidence retrieval: a primary document search (the vector index) with
//! a keyword fallback over the same document set.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use nova_core::config::AppConfig;
use nova_core::domain::evidence::EvidenceTag;
use nova_core::domain::state::ConversationState;
use serde::{Deserialize, Serialize};
use serde_json::json;

const PASSAGE_CHARS: usize = 600;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub document: String,
    pub text: String,
}

impl Passage {
    pub fn new(document: impl Into<String>, text: impl Into<String>) -> Self {
        Self { document: document.into(), text: text.into() }
    }
}

/// `search(query, k)`: most relevant first, empty on no match, `Err` when the
/// source cannot be reached.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    fn source_name(&self) -> &'static str;
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetrievalOutcome {
    Found(Vec<Passage>),
    Empty,
    Unavailable { error: String },
}

impl RetrievalOutcome {
    async fn from_search(source: Option<&dyn DocumentSearch>, query: &str, k: usize) -> Self {
        let Some(source) = source else {
            return Self::Unavailable { error: "no search source configured".to_string() };
        };
        match source.search(query, k).await {
            Ok(passages) if passages.is_empty() => Self::Empty,
            Ok(mut passages) => {
                passages.truncate(k);
                Self::Found(passages)
            }
            Err(error) => Self::Unavailable { error: format!("{}: {error:#}", source.source_name()) },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetrievalReport {
    pub passages: Vec<Passage>,
    pub source: Option<&'static str>,
    pub errors: Vec<String>,
}

pub struct EvidenceRetriever {
    primary: Option<Arc<dyn DocumentSearch>>,
    fallback: Option<Arc<dyn DocumentSearch>>,
    top_k: usize,
}

impl EvidenceRetriever {
    pub fn new(
        primary: Option<Arc<dyn DocumentSearch>>,
        fallback: Option<Arc<dyn DocumentSearch>>,
        top_k: usize,
    ) -> Self {
        Self { primary, fallback, top_k: top_k.max(1) }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let primary = match &config.retrieval.vector_index_url {
            Some(url) => Some(Arc::new(HttpVectorIndex::new(
                url,
                Duration::from_secs(config.retrieval.timeout_secs),
            )?) as Arc<dyn DocumentSearch>),
            None => None,
        };
        let fallback = Arc::new(KnowledgeBaseSearch::new(&config.retrieval.knowledge_base_dir))
            as Arc<dyn DocumentSearch>;
        Ok(Self::new(primary, Some(fallback), config.retrieval.top_k))
    }

    /// Primary first; the fallback runs when the primary is unavailable or
    /// finds nothing. Never fails.
    pub async fn retrieve(&self, query: &str) -> RetrievalReport {
        let mut report = RetrievalReport::default();

        match RetrievalOutcome::from_search(self.primary.as_deref(), query, self.top_k).await {
            RetrievalOutcome::Found(passages) => {
                report.source = self.primary.as_ref().map(|source| source.source_name());
                report.passages = passages;
                return report;
            }
            RetrievalOutcome::Empty => {}
            RetrievalOutcome::Unavailable { error } => {
                if self.primary.is_some() {
                    report.errors.push(format!("Retrieval error: {error}"));
                }
            }
        }

        match RetrievalOutcome::from_search(self.fallback.as_deref(), query, self.top_k).await {
            RetrievalOutcome::Found(passages) => {
                report.source = self.fallback.as_ref().map(|source| source.source_name());
                report.passages = passages;
            }
            RetrievalOutcome::Empty => {}
            RetrievalOutcome::Unavailable { error } => {
                report.errors.push(format!("Keyword search error: {error}"));
            }
        }
        report
    }

    /// Retrieves for the run's query and writes one `doc:` tag per distinct
    /// document, carrying the passage text for the validator.
    pub async fn collect(&self, state: &mut ConversationState) -> RetrievalReport {
        let report = self.retrieve(state.effective_query()).await;

        let mut seen = BTreeSet::new();
        for passage in &report.passages {
            if !seen.insert(passage.document.clone()) {
                continue;
            }
            let text = report
                .passages
                .iter()
                .filter(|other| other.document == passage.document)
                .map(|other| other.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            state.evidence.record_with_content(EvidenceTag::document(&passage.document), text);
        }
        for error in &report.errors {
            state.record_error(error.clone());
        }
        report
    }
}

/// Vector index reached over HTTP: `POST {url}/search` with `{query, k}`.
pub struct HttpVectorIndex {
    url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(alias = "source", alias = "name")]
    document: String,
    #[serde(alias = "content", alias = "passage")]
    text: String,
}

impl HttpVectorIndex {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build vector index HTTP client")?;
        Ok(Self { url: format!("{}/search", base_url.trim_end_matches('/')), client })
    }
}

#[async_trait]
impl DocumentSearch for HttpVectorIndex {
    fn source_name(&self) -> &'static str {
        "vector_index"
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({"query": query, "k": k}))
            .send()
            .await
            .with_context(|| format!("vector index at {} is unreachable", self.url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("vector index returned HTTP {status}");
        }
        let payload: SearchResponse =
            response.json().await.context("vector index response was not valid JSON")?;

        Ok(payload
            .results
            .into_iter()
            .map(|hit| Passage { document: file_name(&hit.document), text: hit.text })
            .collect())
    }
}

/// Keyword search over the `*.md` files of the knowledge base directory.
pub struct KnowledgeBaseSearch {
    dir: PathBuf,
}

impl KnowledgeBaseSearch {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DocumentSearch for KnowledgeBaseSearch {
    fn source_name(&self) -> &'static str {
        "keyword_search"
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        let terms = search_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("knowledge base not found at {}", self.dir.display()))?;

        let mut scored = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            if let Some((score, passage)) = best_paragraph(&content, &terms) {
                scored.push((score, file_name(&path.to_string_lossy()), passage));
            }
        }

        scored.sort_by(|left, right| right.0.cmp(&left.0).then_with(|| left.1.cmp(&right.1)));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, document, text)| Passage { document, text })
            .collect())
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "what", "how", "does", "can", "with", "you", "your", "our", "this",
    "that", "from", "have", "about", "there", "which", "who", "when", "where", "why", "is",
];

fn search_terms(query: &str) -> Vec<String> {
    let mut terms = query
        .split(|ch: char| !ch.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|term| term.chars().count() >= 3 && !STOPWORDS.contains(&term.as_str()))
        .collect::<Vec<_>>();
    terms.sort();
    terms.dedup();
    terms
}

fn best_paragraph(content: &str, terms: &[String]) -> Option<(usize, String)> {
    let document_score = score(content, terms);
    if document_score == 0 {
        return None;
    }
    let paragraph = content
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .max_by_key(|paragraph| score(paragraph, terms))
        .unwrap_or(content);
    Some((document_score, paragraph.chars().take(PASSAGE_CHARS).collect()))
}

fn score(text: &str, terms: &[String]) -> usize {
    let lowered = text.to_lowercase();
    terms.iter().map(|term| lowered.matches(term.as_str()).count()).sum()
}

fn file_name(source: &str) -> String {
    Path::new(source)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| source.to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use nova_core::domain::evidence::EvidenceTag;
    use nova_core::domain::state::ConversationState;
    use tempfile::TempDir;

    use super::{DocumentSearch, EvidenceRetriever, KnowledgeBaseSearch, Passage};

    enum Fixed {
        Hits(Vec<Passage>),
        Down,
    }

    #[async_trait]
    impl DocumentSearch for Fixed {
        fn source_name(&self) -> &'static str {
            "fixed"
        }

        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>> {
            match self {
                Self::Hits(passages) => Ok(passages.clone()),
                Self::Down => bail!("index offline"),
            }
        }
    }

    fn source(search: Fixed) -> Option<Arc<dyn DocumentSearch>> {
        Some(Arc::new(search))
    }

    #[tokio::test]
    async fn primary_hits_are_recorded_once_per_document() {
        let retriever = EvidenceRetriever::new(
            source(Fixed::Hits(vec![
                Passage::new("pricing_plans.md", "Pro is $99 per month."),
                Passage::new("pricing_plans.md", "Enterprise is custom."),
                Passage::new("faq.md", "Billing is monthly."),
            ])),
            source(Fixed::Down),
            5,
        );
        let mut state = ConversationState::new("What is the pricing?", None);
        let report = retriever.collect(&mut state).await;

        assert_eq!(report.passages.len(), 3);
        assert_eq!(
            state.evidence.tags().cloned().collect::<Vec<_>>(),
            vec![EvidenceTag::document("pricing_plans.md"), EvidenceTag::document("faq.md")]
        );
        assert!(state.evidence.contents().any(|text| text.contains("$99")));
        assert!(state.errors.is_empty());
    }

    #[tokio::test]
    async fn unavailable_primary_falls_back_to_keyword_search() {
        let retriever = EvidenceRetriever::new(
            source(Fixed::Down),
            source(Fixed::Hits(vec![Passage::new("sso.md", "Configure SSO under Settings.")])),
            5,
        );
        let report = retriever.retrieve("How do I configure SSO?").await;

        assert_eq!(report.source, Some("fixed"));
        assert_eq!(report.passages[0].document, "sso.md");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("index offline"));
    }

    #[tokio::test]
    async fn empty_primary_also_consults_the_fallback() {
        let retriever = EvidenceRetriever::new(
            source(Fixed::Hits(Vec::new())),
            source(Fixed::Hits(vec![Passage::new("sso.md", "SSO")])),
            5,
        );
        let report = retriever.retrieve("sso").await;
        assert_eq!(report.passages.len(), 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn both_sources_down_returns_empty_with_errors() {
        let retriever = EvidenceRetriever::new(source(Fixed::Down), source(Fixed::Down), 5);
        let mut state = ConversationState::new("What is the pricing?", None);
        let report = retriever.collect(&mut state).await;

        assert!(report.passages.is_empty());
        assert!(state.evidence.is_empty());
        assert_eq!(state.errors.len(), 2);
    }

    #[tokio::test]
    async fn keyword_search_ranks_markdown_documents() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(
            dir.path().join("pricing_plans.md"),
            "# Pricing\n\nThe Pro plan pricing is $99 per month.\n\nPricing for Enterprise is custom.",
        )
        .expect("write pricing");
        fs::write(dir.path().join("sso.md"), "# SSO\n\nSingle sign-on setup.").expect("write sso");
        fs::write(dir.path().join("notes.txt"), "pricing pricing pricing").expect("write txt");

        let search = KnowledgeBaseSearch::new(dir.path());
        let passages = search.search("What is the pricing of Pro?", 5).await.expect("search");

        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].document, "pricing_plans.md");
        assert!(passages[0].text.contains("$99"));
    }

    #[tokio::test]
    async fn keyword_search_reports_a_missing_directory() {
        let search = KnowledgeBaseSearch::new("/nonexistent/knowledge_base");
        assert!(search.search("pricing", 5).await.is_err());
    }
}
