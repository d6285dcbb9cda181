use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use wikirag::{
    Error,
    Pipeline,
    RagConfig,
    Result,
    VectorIndex,
    chunking::{ChunkingConfig, DocumentSource},
    corpus::Corpus,
    embedding::{Embedding, EmbeddingModelId, EmbeddingProvider},
    error::FailureKind,
    generation::Generator,
    hash_embedder::HashEmbedder,
    indexer::{BuildOptions, build_index},
    retriever::{DEFAULT_TOP_K, Retriever},
    synthesizer::{
        EmptyContextPolicy,
        Grounding,
        NO_RELEVANT_INFORMATION,
        SynthesisConfig,
        Synthesizer,
    },
    vector_index::{BuildInfo, Similarity},
};

const ARTICLE: &str = "Cybersecurity is the practice of protecting computer \
systems, networks and programs from digital attacks. These attacks usually aim \
to access, change or destroy sensitive information, extort money from users, \
or interrupt normal business processes.

Network security focuses on firewalls, intrusion detection and the \
segmentation of traffic between zones. Administrators monitor logs and apply \
patches so that exposed services stay hardened against known exploits.

Malware is malicious software designed to disrupt, damage or gain \
unauthorized access to a computer system. Common families include viruses, \
worms, trojans, spyware and ransomware that encrypts files until a payment is \
made.

Phishing is the attempt to obtain credentials or payment details by posing as \
a trustworthy entity in electronic communication. Email filtering and user \
training reduce the success rate of these campaigns.

Cryptography protects data in transit and at rest. Modern protocols combine \
public key exchange with symmetric ciphers, and careful key management remains \
essential for keeping secrets confidential.";

const DIMENSION: usize = 4096;

/// Delegates to [`HashEmbedder`] and counts calls.
struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new(dimension: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dimension).unwrap(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingProvider for CountingEmbedder {
    fn model_id(&self) -> EmbeddingModelId {
        self.inner.model_id()
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_many(texts)
    }
}

/// Always fails with a transient service error.
struct UnavailableEmbedder {
    model: EmbeddingModelId,
}

impl EmbeddingProvider for UnavailableEmbedder {
    fn model_id(&self) -> EmbeddingModelId {
        self.model.clone()
    }

    fn embed_many(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
        Err(Error::EmbeddingService {
            kind: FailureKind::Transient,
            message: "503 Service Unavailable".into(),
        })
    }
}

struct CountingGenerator {
    reply: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingGenerator {
    fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Generator for CountingGenerator {
    fn model(&self) -> &str {
        "counting"
    }

    fn generate(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(self.reply.clone())
    }
}

fn source() -> DocumentSource {
    DocumentSource {
        title: "Cybersecurity - Wikipedia".into(),
        url: "https://en.wikipedia.org/wiki/Computer_security".into(),
    }
}

fn build_article_index(dir: &Path, dimension: usize) -> Arc<VectorIndex> {
    let corpus = Corpus {
        text: ARTICLE.to_string(),
        source: source(),
    };
    let embedder = HashEmbedder::new(dimension).unwrap();
    let (index, report) =
        build_index(dir, &corpus, &embedder, &BuildOptions::default()).unwrap();
    assert!(report.chunks >= 1);
    Arc::new(index)
}

fn pipeline_with(
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    generator: Arc<dyn Generator>,
    config: SynthesisConfig,
) -> Pipeline {
    let retriever = Retriever::new(embedder, index).unwrap();
    Pipeline::new(retriever, Synthesizer::new(generator, config))
}

#[test]
fn malware_question_is_answered_from_the_malware_chunk() {
    let tmp = tempfile::tempdir().unwrap();
    let index = build_article_index(tmp.path(), DIMENSION);
    let embedder = Arc::new(CountingEmbedder::new(DIMENSION));
    let generator =
        Arc::new(CountingGenerator::replying("Malware is malicious software."));
    let pipeline = pipeline_with(
        embedder.clone(),
        index,
        generator.clone(),
        SynthesisConfig::default(),
    );

    let retrieved = pipeline.retrieve("What is malware?", DEFAULT_TOP_K).unwrap();
    assert!(
        retrieved[0]
            .chunk
            .text
            .contains("Malware is malicious software")
    );

    let result = pipeline.ask("What is malware?", DEFAULT_TOP_K).unwrap();
    assert_eq!(result.answer, "Malware is malicious software.");
    assert_eq!(result.grounding, Grounding::Grounded);
    assert!(
        result
            .sources
            .iter()
            .any(|chunk| chunk.text.contains("Malware is malicious software"))
    );
    assert!(result.sources.len() <= DEFAULT_TOP_K);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_question_fails_before_any_collaborator_call() {
    let tmp = tempfile::tempdir().unwrap();
    let index = build_article_index(tmp.path(), DIMENSION);
    let embedder = Arc::new(CountingEmbedder::new(DIMENSION));
    let generator = Arc::new(CountingGenerator::replying("unused"));
    let pipeline = pipeline_with(
        embedder.clone(),
        index,
        generator.clone(),
        SynthesisConfig::default(),
    );

    for question in ["", "   ", "\n\t"] {
        assert!(matches!(
            pipeline.ask(question, DEFAULT_TOP_K),
            Err(Error::InvalidInput(_))
        ));
    }
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn transient_embedding_failure_surfaces_unchanged() {
    let tmp = tempfile::tempdir().unwrap();
    let index = build_article_index(tmp.path(), DIMENSION);
    let embedder = Arc::new(UnavailableEmbedder {
        model: index.metadata().embedding.clone(),
    });
    let generator = Arc::new(CountingGenerator::replying("unused"));
    let pipeline =
        pipeline_with(embedder, index, generator.clone(), SynthesisConfig::default());

    let err = pipeline.ask("What is malware?", DEFAULT_TOP_K).unwrap_err();
    assert!(matches!(
        err,
        Error::EmbeddingService {
            kind: FailureKind::Transient,
            ..
        }
    ));
    assert!(err.is_transient());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn query_dimension_mismatch_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let index = build_article_index(tmp.path(), 384);
    let generator = Arc::new(CountingGenerator::replying("unused"));
    let pipeline = pipeline_with(
        Arc::new(HashEmbedder::new(768).unwrap()),
        index.clone(),
        generator.clone(),
        SynthesisConfig::default(),
    );

    let err = pipeline.ask("What is malware?", DEFAULT_TOP_K).unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 384,
            actual: 768
        }
    ));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

    // Directly against the index as well.
    assert!(matches!(
        index.search(&[0.1; 768], 3),
        Err(Error::DimensionMismatch { .. })
    ));
}

#[test]
fn reopened_index_answers_like_the_built_one() {
    let tmp = tempfile::tempdir().unwrap();
    let built = build_article_index(tmp.path(), DIMENSION);
    let reopened = Arc::new(VectorIndex::open(tmp.path()).unwrap());
    assert_eq!(built.metadata(), reopened.metadata());

    let embedder = HashEmbedder::new(DIMENSION).unwrap();
    for entry in reopened.entries() {
        let hits = reopened.search(&entry.vector, 1).unwrap();
        assert_eq!(hits[0].chunk, entry.chunk);
        let query = embedder.embed(&entry.chunk.text).unwrap();
        assert_eq!(query, entry.vector);
    }
}

#[test]
fn decline_policy_on_empty_index_skips_generation() {
    let tmp = tempfile::tempdir().unwrap();
    let embedder = HashEmbedder::new(DIMENSION).unwrap();
    let index = VectorIndex::build(
        tmp.path(),
        BuildInfo {
            metric: Similarity::Cosine,
            embedding: embedder.model_id(),
            source: source(),
            chunking: ChunkingConfig::default(),
        },
        Vec::new(),
    )
    .unwrap();

    let generator = Arc::new(CountingGenerator::replying("unused"));
    let pipeline = pipeline_with(
        Arc::new(embedder),
        Arc::new(index),
        generator.clone(),
        SynthesisConfig {
            empty_context: EmptyContextPolicy::Decline,
            ..Default::default()
        },
    );

    let result = pipeline.ask("What is malware?", DEFAULT_TOP_K).unwrap();
    assert_eq!(result.answer, NO_RELEVANT_INFORMATION);
    assert_eq!(result.grounding, Grounding::InsufficientContext);
    assert!(result.sources.is_empty());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn stop_word_question_is_not_grounded() {
    let tmp = tempfile::tempdir().unwrap();
    let index = build_article_index(tmp.path(), DIMENSION);
    let generator = Arc::new(CountingGenerator::replying("guess"));
    let pipeline = pipeline_with(
        Arc::new(HashEmbedder::new(DIMENSION).unwrap()),
        index.clone(),
        generator.clone(),
        SynthesisConfig::default(),
    );

    // Chunks still come back, but none is similar to the question.
    let retrieved = pipeline.retrieve("What is it?", DEFAULT_TOP_K).unwrap();
    assert!(!retrieved.is_empty());
    assert!(retrieved.iter().all(|r| r.score == 0.0));

    let result = pipeline.ask("What is it?", DEFAULT_TOP_K).unwrap();
    assert_eq!(result.answer, "guess");
    assert_eq!(result.grounding, Grounding::InsufficientContext);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    let declining = Arc::new(CountingGenerator::replying("unused"));
    let pipeline = pipeline_with(
        Arc::new(HashEmbedder::new(DIMENSION).unwrap()),
        index,
        declining.clone(),
        SynthesisConfig {
            empty_context: EmptyContextPolicy::Decline,
            ..Default::default()
        },
    );
    let result = pipeline.ask("What is it?", DEFAULT_TOP_K).unwrap();
    assert_eq!(result.answer, NO_RELEVANT_INFORMATION);
    assert_eq!(result.grounding, Grounding::InsufficientContext);
    assert_eq!(declining.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn slow_generation_times_out() {
    let tmp = tempfile::tempdir().unwrap();
    let index = build_article_index(tmp.path(), DIMENSION);
    let generator = Arc::new(CountingGenerator {
        reply: "late".into(),
        delay: Duration::from_millis(500),
        calls: AtomicUsize::new(0),
    });
    let pipeline = pipeline_with(
        Arc::new(HashEmbedder::new(DIMENSION).unwrap()),
        index,
        generator,
        SynthesisConfig::default(),
    )
    .with_timeout(Some(Duration::from_millis(50)));

    let err = pipeline.ask("What is malware?", DEFAULT_TOP_K).unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(50)));
}

#[test]
fn fast_generation_finishes_within_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let index = build_article_index(tmp.path(), DIMENSION);
    let pipeline = pipeline_with(
        Arc::new(HashEmbedder::new(DIMENSION).unwrap()),
        index,
        Arc::new(CountingGenerator::replying("quick")),
        SynthesisConfig::default(),
    )
    .with_timeout(Some(Duration::from_secs(30)));

    assert_eq!(pipeline.ask("What is phishing?", 2).unwrap().answer, "quick");
}

#[test]
fn concurrent_questions_share_one_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let index = build_article_index(tmp.path(), DIMENSION);
    let generator = Arc::new(CountingGenerator::replying("answer"));
    let pipeline = pipeline_with(
        Arc::new(HashEmbedder::new(DIMENSION).unwrap()),
        index,
        generator.clone(),
        SynthesisConfig::default(),
    );

    let questions = [
        "What is malware?",
        "What is phishing?",
        "How does cryptography protect data?",
        "What do firewalls do?",
    ];
    let handles: Vec<_> = questions
        .iter()
        .map(|q| {
            let pipeline = pipeline.clone();
            let q = q.to_string();
            std::thread::spawn(move || pipeline.ask(&q, DEFAULT_TOP_K))
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap().unwrap();
        assert!(!result.sources.is_empty());
        assert!(result.sources.len() <= DEFAULT_TOP_K);
        assert_eq!(result.answer, "answer");
    }
    assert_eq!(generator.calls.load(Ordering::SeqCst), questions.len());
}

#[test]
fn from_config_without_index_fails_loudly() {
    let tmp = tempfile::tempdir().unwrap();
    let config = RagConfig::new(tmp.path().join("missing"));
    assert!(matches!(
        Pipeline::from_config(&config),
        Err(Error::IndexNotFound(_))
    ));
}

#[test]
fn from_config_without_key_is_retrieval_only() {
    let tmp = tempfile::tempdir().unwrap();
    build_article_index(tmp.path(), 384);

    let mut config = RagConfig::new(tmp.path().to_path_buf());
    config.generation.api_key = None;
    let pipeline = Pipeline::from_config(&config).unwrap();

    assert!(!pipeline.can_answer());
    assert!(!pipeline.retrieve("What is malware?", 2).unwrap().is_empty());
    assert!(matches!(
        pipeline.ask("What is malware?", 2),
        Err(Error::InvalidConfiguration(_))
    ));
}
