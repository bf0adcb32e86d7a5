use std::collections::HashMap;

/// Okapi BM25 parameters. k1 saturates term frequency, b scales length
/// normalisation.
const K1: f32 = 1.5;
const B: f32 = 0.75;

/// Minimum token length kept by the tokenizer.
const MIN_TOKEN_LEN: usize = 2;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "with", "that", "this", "from", "not", "but",
    "all", "can", "has", "have", "had", "you", "your", "our", "its", "into", "out", "use",
    "how", "what", "when", "where", "which", "will", "would", "should",
];

/// Lowercase and split on non-alphanumeric characters (underscore counts as
/// a word character, so `snake_case` names survive whole). Stopwords and
/// tokens shorter than two characters are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= MIN_TOKEN_LEN && !STOPWORDS.contains(t))
        .map(str::to_owned)
        .collect()
}

/// Document-frequency lexical ranker over node texts.
///
/// Built once per resolver from the graph; `add_document` replaces any prior
/// entry for the same id so re-indexing a node is idempotent.
#[derive(Debug, Default)]
pub struct Bm25Index {
    /// id → term → term frequency.
    docs: HashMap<String, HashMap<String, usize>>,
    /// id → token count.
    doc_len: HashMap<String, usize>,
    /// term → number of documents containing it.
    doc_freq: HashMap<String, usize>,
    total_len: usize,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Index `text` under `id`, replacing any prior entry.
    pub fn add_document(&mut self, id: &str, text: &str) {
        self.remove_document(id);

        let tokens = tokenize(text);
        let mut tf: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.clone()).or_insert(0) += 1;
        }
        for term in tf.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_len += tokens.len();
        self.doc_len.insert(id.to_owned(), tokens.len());
        self.docs.insert(id.to_owned(), tf);
    }

    fn remove_document(&mut self, id: &str) {
        let Some(tf) = self.docs.remove(id) else {
            return;
        };
        for term in tf.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        if let Some(len) = self.doc_len.remove(id) {
            self.total_len -= len;
        }
    }

    /// Rank documents against `query`. Only positive scores are returned,
    /// sorted descending (ties broken by id for determinism).
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        if self.docs.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let n = self.docs.len() as f32;
        let avg_len = (self.total_len as f32 / n).max(1.0);

        let mut scored: Vec<(String, f32)> = self
            .docs
            .iter()
            .filter_map(|(id, tf)| {
                let dl = *self.doc_len.get(id).unwrap_or(&0) as f32;
                let mut score = 0.0f32;
                for term in &query_terms {
                    let Some(&freq) = tf.get(term) else { continue };
                    let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let freq = freq as f32;
                    score += idf * (freq * (K1 + 1.0)) / (freq + K1 * (1.0 - B + B * dl / avg_len));
                }
                (score > 0.0).then(|| (id.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(top_k);
        scored
    }
}
