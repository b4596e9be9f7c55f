//! Property tests for fusion and confidence scoring.

use groundwork_core::confidence::{self, ConfidenceConfig};
use groundwork_core::fingerprint::{chunk_id, fingerprint};
use groundwork_core::fusion::fuse;
use groundwork_core::models::{CandidateSource, RerankedCandidate, RetrievalCandidate};
use proptest::prelude::*;

fn branch(scores: &[f64], prefix: &str, source: CandidateSource) -> Vec<RetrievalCandidate> {
    scores
        .iter()
        .enumerate()
        .map(|(i, &score)| RetrievalCandidate {
            chunk_id: format!("{}{}", prefix, i),
            score,
            source,
            rank: i + 1,
        })
        .collect()
}

fn evidence(source: &str, score: f64) -> RerankedCandidate {
    RerankedCandidate {
        chunk_id: format!("chunk-{}", source),
        source_id: source.to_string(),
        rerank_score: Some(score),
        fused_score: score,
        final_score: score,
    }
}

proptest! {
    #[test]
    fn fusion_ignores_input_order(
        kw in prop::collection::vec(0.0f64..50.0, 0..12),
        vec in prop::collection::vec(-1.0f64..1.0, 0..12),
        kw_w in 0.0f64..1.0,
        budget in 1usize..20,
    ) {
        // Overlapping id spaces so some chunks appear in both branches.
        let keyword = branch(&kw, "c", CandidateSource::Keyword);
        let vector = branch(&vec, "c", CandidateSource::Vector);
        let vec_w = 1.0 - kw_w;

        let a = fuse(&keyword, &vector, kw_w, vec_w, budget);
        let b = fuse(&keyword, &vector, kw_w, vec_w, budget);
        prop_assert_eq!(&a, &b);

        let mut keyword_rev = keyword.clone();
        keyword_rev.reverse();
        let mut vector_rev = vector.clone();
        vector_rev.reverse();
        let c = fuse(&keyword_rev, &vector_rev, kw_w, vec_w, budget);
        prop_assert_eq!(&a, &c);

        prop_assert!(a.len() <= budget);
        for pair in a.windows(2) {
            prop_assert!(pair[0].fused_score >= pair[1].fused_score);
        }
        for f in &a {
            prop_assert!(f.fused_score >= 0.0 && f.fused_score <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn confidence_never_drops_when_top_score_rises(
        top in 0.0f64..1.0,
        second in 0.0f64..1.0,
        raise in 0.0f64..0.5,
        degradations in 0usize..3,
    ) {
        let cfg = ConfidenceConfig::default();
        let second = second.min(top);
        let before = confidence::score(
            &[evidence("a", top), evidence("b", second)],
            degradations,
            &cfg,
        );
        let after = confidence::score(
            &[evidence("a", top + raise), evidence("b", second)],
            degradations,
            &cfg,
        );
        prop_assert!(after + 1e-12 >= before);
        prop_assert!(before >= cfg.floor && before <= cfg.ceiling);
    }

    #[test]
    fn chunk_identity_survives_whitespace_and_case(
        words in prop::collection::vec("[a-zA-Z]{1,8}", 1..8),
    ) {
        let tight = words.join(" ");
        let loose = format!("  {}  ", words.join("   \n ").to_uppercase());
        let (a, b) = (fingerprint(&tight), fingerprint(&loose));
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(chunk_id("doc", &a), chunk_id("doc", &b));
    }
}
