use medrag_core::batch::{plan_batches, BatchLimits};
use medrag_core::chunk::{chunk_text, expected_chunk_count, ChunkOptions};
use proptest::prelude::*;

fn options() -> impl Strategy<Value = ChunkOptions> {
    (8usize..200)
        .prop_flat_map(|size| (Just(size), 0..size))
        .prop_map(|(size, overlap)| ChunkOptions {
            size,
            overlap,
            min_content_chars: 0,
        })
}

proptest! {
    #[test]
    fn chunking_is_deterministic(text in "[a-zé .]{0,1500}", opts in options()) {
        let a = chunk_text("doc", &text, &opts).unwrap();
        let b = chunk_text("doc", &text, &opts).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn chunk_count_matches_formula(text in "[a-z ]{1,1500}", opts in options()) {
        let chunks = chunk_text("doc", &text, &opts).unwrap();
        prop_assert_eq!(chunks.len(), expected_chunk_count(text.chars().count(), &opts));
    }

    #[test]
    fn windows_cover_text_with_overlap(text in "[a-z ]{1,1500}", opts in options()) {
        let chunks = chunk_text("doc", &text, &opts).unwrap();
        let len = text.chars().count();

        prop_assert_eq!(chunks[0].start_offset, 0);
        prop_assert_eq!(chunks[chunks.len() - 1].end_offset, len);
        for pair in chunks.windows(2) {
            prop_assert_eq!(pair[1].start_offset, pair[0].end_offset - opts.overlap);
        }
        for c in &chunks {
            prop_assert!(c.end_offset - c.start_offset <= opts.size);
            let expected: String = text
                .chars()
                .skip(c.start_offset)
                .take(c.end_offset - c.start_offset)
                .collect();
            prop_assert_eq!(&c.content, &expected);
        }
    }

    #[test]
    fn chunk_ids_are_unique_within_document(text in "[a-z ]{1,1500}", opts in options()) {
        let chunks = chunk_text("doc", &text, &opts).unwrap();
        let mut ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), chunks.len());
    }

    #[test]
    fn batches_preserve_order_and_cardinality(
        lens in prop::collection::vec(0usize..400, 0..120),
        max_items in 1usize..20,
        max_batch_tokens in 1usize..300,
    ) {
        let texts: Vec<String> = lens.iter().map(|n| "w".repeat(*n)).collect();
        let limits = BatchLimits { max_items, max_batch_tokens, max_item_tokens: usize::MAX };
        let batches = plan_batches(&texts, &limits);

        let flattened: Vec<usize> = batches.iter().flat_map(|r| r.clone()).collect();
        let expected: Vec<usize> = (0..texts.len()).collect();
        prop_assert_eq!(flattened, expected);

        for range in &batches {
            prop_assert!(!range.is_empty());
            prop_assert!(range.len() <= max_items);
        }
    }
}
