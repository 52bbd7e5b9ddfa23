use medrag_core::chunk::{chunk_text, ChunkOptions};
use medrag_core::similarity::{cosine_similarity, rank_top_k};
use proptest::prelude::*;

fn vector(dims: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, dims)
}

proptest! {
    #[test]
    fn cosine_is_bounded_and_finite(a in vector(16), b in vector(16)) {
        let sim = cosine_similarity(&a, &b);
        prop_assert!(sim.is_finite());
        prop_assert!((-1.0..=1.0).contains(&sim));
    }

    #[test]
    fn cosine_is_symmetric(a in vector(8), b in vector(8)) {
        let ab = cosine_similarity(&a, &b);
        let ba = cosine_similarity(&b, &a);
        prop_assert!((ab - ba).abs() < 1e-5);
    }

    #[test]
    fn cosine_with_zero_vector_is_zero(a in vector(8)) {
        prop_assert_eq!(cosine_similarity(&a, &[0.0; 8]), 0.0);
    }

    #[test]
    fn cosine_self_is_one_at_any_scale(a in vector(8), exp in -20i32..20) {
        prop_assume!(a.iter().any(|x| *x != 0.0));
        let scale = 10f32.powi(exp);
        let v: Vec<f32> = a.iter().map(|x| x * scale).collect();
        prop_assume!(v.iter().any(|x| *x != 0.0));
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        prop_assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
        prop_assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-5);
    }

    #[test]
    fn top_k_is_sorted_and_bounded(
        query in vector(4),
        vectors in prop::collection::vec(vector(4), 1..40),
        k in 0usize..50,
    ) {
        let text = "z".repeat(vectors.len() * 10);
        let opts = ChunkOptions { size: 10, overlap: 0, min_content_chars: 0 };
        let chunks = chunk_text("doc", &text, &opts).unwrap();
        prop_assert_eq!(chunks.len(), vectors.len());

        let ranked = rank_top_k(
            &query,
            chunks.iter().zip(vectors.iter().map(|v| v.as_slice())),
            k,
        );

        prop_assert_eq!(ranked.len(), k.min(vectors.len()));
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].similarity >= pair[1].similarity);
        }
    }
}
