//! Corpus builders with known structure

use discovery_engine::corpus::CorpusExport;
use discovery_engine::{Document, Passage};

/// Id prefixes and shared text of the three groups in [`three_group_corpus`].
pub const GROUPS: [(&str, &str); 3] = [
    ("astro", "Telescopes track orbit of distant stars"),
    ("botany", "Leaves and flowers help plants grow"),
    ("church", "The council debated doctrine and creed"),
];

/// Three tight, well-separated embedding groups of four documents each,
/// plus one document sitting between them.
pub fn three_group_corpus() -> CorpusExport {
    let mut documents = Vec::new();
    for (g, (prefix, text)) in GROUPS.iter().enumerate() {
        for i in 0..4 {
            let mut v = vec![0.0f32; 4];
            v[g] = 1.0;
            v[(g + 1) % 4] = i as f32 * 0.03;
            documents.push(
                Document::new(format!("{}-{}", prefix, i), format!("{} {}", prefix, i), *text)
                    .with_embedding(v),
            );
        }
    }
    documents.push(
        Document::new("between", "between", "Notes on several unrelated things")
            .with_embedding(vec![0.5, 0.5, 0.5, 0.5]),
    );
    CorpusExport {
        documents,
        passages: Vec::new(),
    }
}

/// Two documents whose only passages directly contradict each other.
pub fn contradictory_pair() -> CorpusExport {
    CorpusExport {
        documents: vec![
            Document::new("claim", "Claim", "The vaccine is safe for children."),
            Document::new("counter", "Counter", "The vaccine is not safe for children."),
        ],
        passages: vec![
            Passage::new("claim-0", "claim", 0, "The vaccine is safe for children."),
            Passage::new("counter-0", "counter", 0, "The vaccine is not safe for children."),
        ],
    }
}
