use proptest::prelude::*;

use cmdstream::report::{DEFAULT_DELIMITER, Frame, FrameCodec};
use cmdstream_test_utils::builders::FrameBuilder;
use serde_json::json;

fn stream_of(n: usize) -> (String, Vec<Frame>) {
    let mut text = String::new();
    let mut frames = Vec::new();
    for i in 0..n {
        let builder = FrameBuilder::new(&format!("tag{}", i % 3))
            .data(json!({ "i": i, "text": "a <| b |> {c}" }));
        text.push_str(&builder.delimited(DEFAULT_DELIMITER));
        frames.push(builder.build());
    }
    (text, frames)
}

/// Feed `text` in pieces cut at `cuts` (byte offsets on char boundaries).
fn decode_in_pieces(text: &str, cuts: &[usize]) -> Vec<Frame> {
    let mut codec = FrameCodec::default();
    let mut out = Vec::new();
    let mut start = 0;
    for &cut in cuts.iter().chain(std::iter::once(&text.len())) {
        if cut < start || !text.is_char_boundary(cut) {
            continue;
        }
        for result in codec.drain(&text[start..cut]) {
            out.push(result.expect("valid frames only"));
        }
        start = cut;
    }
    out
}

#[test]
fn example_split_yields_both_frames_in_order() {
    let text = format!(
        "{}{}{}{}",
        r#"{"type":"x","v":1}"#, DEFAULT_DELIMITER, r#"{"type":"y","v":2}"#, DEFAULT_DELIMITER
    );

    for offset in 0..=text.len() {
        let frames = decode_in_pieces(&text, &[offset]);
        let got: Vec<(String, i64)> = frames
            .iter()
            .map(|f| {
                let v = serde_json::from_str::<serde_json::Value>(&f.raw_payload).unwrap()["v"]
                    .as_i64()
                    .unwrap();
                (f.tag.clone(), v)
            })
            .collect();
        assert_eq!(
            got,
            vec![("x".to_string(), 1), ("y".to_string(), 2)],
            "split at {offset}"
        );
    }
}

#[test]
fn one_byte_at_a_time_matches_single_shot() {
    let (text, expected) = stream_of(6);
    let cuts: Vec<usize> = (1..text.len()).collect();
    assert_eq!(decode_in_pieces(&text, &cuts), expected);
    assert_eq!(decode_in_pieces(&text, &[]), expected);
}

proptest! {
    #[test]
    fn any_chunking_reconstructs_the_same_frames(
        n in 1usize..8,
        raw_cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..24),
    ) {
        let (text, expected) = stream_of(n);
        let mut cuts: Vec<usize> = raw_cuts.iter().map(|i| i.index(text.len() + 1)).collect();
        cuts.sort_unstable();

        prop_assert_eq!(decode_in_pieces(&text, &cuts), expected);
    }
}
